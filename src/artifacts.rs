//! Pairing compiled artifacts with their source files.
//!
//! Matching is by exact base-name equality: `src/**/Token.sol` pairs
//! with `out/**/Token.json`. Test sources (`*.t.sol`) are excluded so
//! test contracts are never deployed, and artifacts without a
//! same-named source (compiler-internal output, vendored interfaces)
//! are dropped silently. When two source files share a base name the
//! sorted traversal makes the winner deterministic (last one wins);
//! there is no namespacing across subdirectories.

use std::collections::BTreeMap;
use std::path::Path;

use tracing::debug;
use walkdir::WalkDir;

use crate::models::{Artifact, SourceFile};

const SOURCE_EXT: &str = ".sol";
const TEST_INFIX: &str = ".t.sol";
const ARTIFACT_EXT: &str = ".json";

/// Walk the checkout's source directory and index every non-test
/// source file by base name. A missing directory yields an empty index.
pub fn collect_source_files(src_dir: &Path) -> BTreeMap<String, SourceFile> {
    let mut sources = BTreeMap::new();
    if !src_dir.is_dir() {
        return sources;
    }

    for entry in WalkDir::new(src_dir)
        .sort_by_file_name()
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file())
    {
        let file_name = entry.file_name().to_string_lossy().to_string();
        if file_name.ends_with(TEST_INFIX) {
            continue;
        }
        // strip_suffix, not trim_end_matches: only one extension comes
        // off, so "X.sol.sol" indexes as "X.sol".
        let Some(name) = file_name.strip_suffix(SOURCE_EXT) else {
            continue;
        };
        let name = name.to_string();
        match std::fs::read_to_string(entry.path()) {
            Ok(source_code) => {
                sources.insert(name.clone(), SourceFile { name, source_code });
            }
            Err(e) => {
                debug!(path = %entry.path().display(), error = %e, "skipping unreadable source");
            }
        }
    }
    sources
}

/// Walk the compiler's artifact root and pair every artifact that has a
/// same-named source file. Unmatched or unparseable artifacts are
/// skipped; a missing artifact root yields an empty list (a repository
/// with no deployable contracts is valid, not an error).
pub fn match_artifacts(workspace_root: &Path, artifact_root: &Path) -> Vec<Artifact> {
    let sources = collect_source_files(&workspace_root.join("src"));
    let mut matched = Vec::new();

    if !artifact_root.is_dir() {
        debug!(path = %artifact_root.display(), "artifact root absent, nothing to deploy");
        return matched;
    }

    for entry in WalkDir::new(artifact_root)
        .sort_by_file_name()
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file())
    {
        let file_name = entry.file_name().to_string_lossy().to_string();
        let Some(name) = file_name.strip_suffix(ARTIFACT_EXT) else {
            continue;
        };
        let name = name.to_string();

        let Some(source) = sources.get(&name) else {
            continue;
        };

        match read_artifact(entry.path(), &name) {
            Some(mut artifact) => {
                artifact.source = Some(source.clone());
                matched.push(artifact);
            }
            None => {
                debug!(path = %entry.path().display(), "skipping unparseable artifact");
            }
        }
    }

    matched
}

/// Read a Foundry artifact JSON: bytecode lives at `bytecode.object`,
/// the interface at `abi`. Absent fields map to empty values so the
/// deployability check downstream can skip interface-only artifacts.
fn read_artifact(path: &Path, name: &str) -> Option<Artifact> {
    let raw = std::fs::read_to_string(path).ok()?;
    let json: serde_json::Value = serde_json::from_str(&raw).ok()?;

    let bytecode = json
        .pointer("/bytecode/object")
        .and_then(|v| v.as_str())
        .unwrap_or("")
        .to_string();
    let abi = json.get("abi").cloned().unwrap_or(serde_json::Value::Null);

    Some(Artifact {
        name: name.to_string(),
        path: path.to_path_buf(),
        bytecode,
        abi,
        source: None,
    })
}
