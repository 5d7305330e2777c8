//! The clone-build-deploy pipeline.
//!
//! One run is a single sequential flow: workspace → clone → optional
//! npm install → forge install → forge build → artifact matching →
//! deployment → project record update → workspace cleanup. Each stage
//! reports a status line on the caller-provided channel before it
//! starts. Stage failures abort the run (the workspace is still
//! reclaimed); a single contract failing to deploy only shrinks the
//! result set and never fails the batch.

use std::ffi::{OsStr, OsString};
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::artifacts::match_artifacts;
use crate::chain::ChainClient;
use crate::db::DbHandle;
use crate::errors::DeployError;
use crate::models::{Artifact, ContractDetails, DeployedContract, DeploymentResult};
use crate::workspace::Workspace;

/// Per-run status channel. Receivers see messages in emission order.
pub type StatusSender = mpsc::Sender<String>;

const CLONE_TIMEOUT: Duration = Duration::from_secs(300);
const INSTALL_TIMEOUT: Duration = Duration::from_secs(300);
const BUILD_TIMEOUT: Duration = Duration::from_secs(600);

/// Orchestrates deployment runs against one chain node and one store.
///
/// All runs deploy from the node's single dev signer, so the deploy
/// stage is serialized behind `deploy_lock` to keep nonce assignment
/// well-defined under concurrent requests. Clone and build stages of
/// concurrent runs still overlap; each owns its own workspace.
pub struct DeployService {
    chain: Arc<ChainClient>,
    db: DbHandle,
    workspace_root: PathBuf,
    deploy_lock: Arc<tokio::sync::Mutex<()>>,
    tool_path: Option<OsString>,
}

impl DeployService {
    pub fn new(chain: Arc<ChainClient>, db: DbHandle, workspace_root: PathBuf) -> Self {
        Self {
            chain,
            db,
            workspace_root,
            deploy_lock: Arc::new(tokio::sync::Mutex::new(())),
            tool_path: None,
        }
    }

    /// Pin the `PATH` handed to spawned toolchain commands (git, npm,
    /// forge). When unset, children inherit the server's environment.
    pub fn with_tool_path(mut self, path: impl Into<OsString>) -> Self {
        self.tool_path = Some(path.into());
        self
    }

    pub fn db(&self) -> &DbHandle {
        &self.db
    }

    pub fn chain(&self) -> &ChainClient {
        &self.chain
    }

    /// Run the full pipeline for one repository URL.
    pub async fn clone_and_deploy(
        &self,
        repo_url: &str,
        use_npm: bool,
        status: &StatusSender,
    ) -> Result<DeploymentResult, DeployError> {
        let url = repo_url.to_string();
        let project = self
            .db
            .call(move |db| db.upsert_project(&url))
            .await
            .map_err(DeployError::Other)?;

        emit(status, "Creating workspace directory...").await;
        let workspace = Workspace::create(&self.workspace_root)?;

        // The workspace drops (and is removed) on every path out of
        // this call, including stage failures.
        let deployed = self.run_stages(&workspace, repo_url, use_npm, status).await?;

        emit(status, "Cleaning up...").await;
        drop(workspace);

        let project_id = project.id;
        let contracts = deployed.clone();
        let project = self
            .db
            .call(move |db| db.finalize_deployment(project_id, &contracts))
            .await
            .map_err(DeployError::Other)?;

        info!(
            project = %project.name,
            contracts = deployed.len(),
            "deployment run complete"
        );
        Ok(DeploymentResult {
            project,
            deployed_contracts: deployed,
        })
    }

    async fn run_stages(
        &self,
        workspace: &Workspace,
        repo_url: &str,
        use_npm: bool,
        status: &StatusSender,
    ) -> Result<Vec<DeployedContract>, DeployError> {
        emit(status, "Cloning repository...").await;
        self.fetch_repo(repo_url, workspace.path()).await?;

        if use_npm {
            emit(status, "Installing NPM dependencies...").await;
            let out = run_in(
                workspace.path(),
                "npm",
                &["install"],
                INSTALL_TIMEOUT,
                self.tool_path.as_deref(),
            )
            .await
            .map_err(DeployError::Dependency)?;
            if !out.status.success() {
                return Err(DeployError::Dependency(stderr_excerpt(&out)));
            }
        }

        emit(status, "Installing Forge dependencies...").await;
        let out = run_in(
            workspace.path(),
            "forge",
            &["install"],
            INSTALL_TIMEOUT,
            self.tool_path.as_deref(),
        )
        .await
        .map_err(DeployError::Dependency)?;
        if !out.status.success() {
            return Err(DeployError::Dependency(stderr_excerpt(&out)));
        }

        emit(status, "Compiling contracts...").await;
        let artifact_root = self.build_contracts(workspace.path()).await?;

        emit(status, "Deploying contracts...").await;
        let matched = match_artifacts(workspace.path(), &artifact_root);
        debug!(matched = matched.len(), "artifact matching complete");
        Ok(self.deploy_all(&matched).await)
    }

    /// Clone the repository into the workspace. Single attempt; a
    /// non-zero exit or timeout is fatal to the run.
    async fn fetch_repo(&self, repo_url: &str, dir: &Path) -> Result<(), DeployError> {
        let out = run_in(
            dir,
            "git",
            &["clone", repo_url, "."],
            CLONE_TIMEOUT,
            self.tool_path.as_deref(),
        )
        .await
        .map_err(DeployError::Fetch)?;
        if !out.status.success() {
            return Err(DeployError::Fetch(stderr_excerpt(&out)));
        }
        Ok(())
    }

    /// Force a clean compilation and return the artifact root.
    /// Combined compiler output is preserved for diagnostics.
    async fn build_contracts(&self, dir: &Path) -> Result<PathBuf, DeployError> {
        let out = run_in(
            dir,
            "forge",
            &["build", "--force"],
            BUILD_TIMEOUT,
            self.tool_path.as_deref(),
        )
        .await
        .map_err(|msg| DeployError::Compile { output: msg })?;
        let combined = format!(
            "{}{}",
            String::from_utf8_lossy(&out.stdout),
            String::from_utf8_lossy(&out.stderr)
        );
        if !out.status.success() {
            return Err(DeployError::Compile { output: combined });
        }
        if !combined.trim().is_empty() {
            debug!(output = %combined.trim(), "compiler output");
        }
        Ok(dir.join("out"))
    }

    /// Deploy every matched, deployable artifact one at a time, in
    /// traversal order. A failing artifact is logged and skipped; the
    /// returned list is whatever subset succeeded.
    pub async fn deploy_all(&self, artifacts: &[Artifact]) -> Vec<DeployedContract> {
        // One signer for every run: hold the lock across the whole
        // batch so concurrent runs cannot interleave nonces.
        let _guard = self.deploy_lock.lock().await;

        let mut deployed = Vec::new();
        for artifact in artifacts {
            if !artifact.is_deployable() {
                debug!(name = %artifact.name, "skipping non-deployable artifact");
                continue;
            }
            let Some(source) = &artifact.source else {
                continue;
            };
            match self.chain.deploy(&artifact.bytecode).await {
                Ok(d) => {
                    info!(name = %artifact.name, address = %d.address, "deployed contract");
                    deployed.push(DeployedContract {
                        name: artifact.name.clone(),
                        address: d.address,
                        abi: artifact.abi.clone(),
                        source_code: source.source_code.clone(),
                        deployer: d.deployer,
                        deployment_tx: Some(d.tx_hash),
                        deployment_block: Some(d.block_number),
                    });
                }
                Err(e) => {
                    let e = DeployError::Deploy(e.to_string());
                    warn!(name = %artifact.name, error = %e, "skipping contract");
                }
            }
        }
        deployed
    }

    /// Merge the persisted record for `address` with live chain state.
    /// Address matching is case-insensitive; a record whose address no
    /// longer holds code (chain reset) is reported as not found.
    pub async fn get_contract_details(
        &self,
        address: &str,
    ) -> Result<ContractDetails, DeployError> {
        let needle = address.to_string();
        let found = self
            .db
            .call(move |db| db.find_contract(&needle))
            .await
            .map_err(DeployError::Other)?;
        let (project, contract) = found.ok_or_else(|| {
            DeployError::NotFound("Contract not found in database".to_string())
        })?;

        let code = self
            .chain
            .get_code(address)
            .await
            .map_err(DeployError::Other)?;
        if code == "0x" {
            return Err(DeployError::NotFound(
                "Contract not found on chain".to_string(),
            ));
        }

        let balance = self
            .chain
            .get_balance(address)
            .await
            .map_err(DeployError::Other)?;
        let tx_count = self
            .chain
            .get_transaction_count(address)
            .await
            .map_err(DeployError::Other)?;
        let block_number = self
            .chain
            .block_number()
            .await
            .map_err(DeployError::Other)?;

        // Best-effort: a contract that never emitted a log simply has
        // no discoverable tx here; fall back to the persisted hash.
        let deployment_tx = match self.chain.first_log_tx(address).await {
            Ok(Some(tx)) => Some(tx),
            Ok(None) => contract.deployment_tx.clone(),
            Err(e) => {
                debug!(error = %e, "could not fetch deployment transaction");
                contract.deployment_tx.clone()
            }
        };

        Ok(ContractDetails {
            name: contract.name,
            source_code: contract.source_code,
            address: address.to_string(),
            deployed_at: project.last_deployment,
            block_number,
            deployer: if contract.deployer.is_empty() {
                "Unknown".to_string()
            } else {
                contract.deployer
            },
            balance,
            transaction_count: tx_count.to_string(),
            deployment_tx,
            abi: contract.abi,
        })
    }
}

async fn emit(status: &StatusSender, message: &str) {
    // A caller that stopped reading must not stall the pipeline.
    if status.send(message.to_string()).await.is_err() {
        debug!(%message, "status receiver dropped");
    }
}

/// Run an external command in `dir` with a bounded timeout, capturing
/// output. Spawn failures and expiry come back as the error message;
/// non-zero exits are left to the caller to classify. On expiry the
/// dropped future kills the child so it cannot keep writing into a
/// workspace that is about to be removed.
async fn run_in(
    dir: &Path,
    program: &str,
    args: &[&str],
    timeout: Duration,
    path_env: Option<&OsStr>,
) -> Result<std::process::Output, String> {
    let mut cmd = tokio::process::Command::new(program);
    cmd.args(args)
        .current_dir(dir)
        .stdin(Stdio::null())
        .kill_on_drop(true);
    if let Some(path) = path_env {
        cmd.env("PATH", path);
    }
    let fut = cmd.output();
    match tokio::time::timeout(timeout, fut).await {
        Ok(Ok(out)) => Ok(out),
        Ok(Err(e)) => Err(format!("failed to run {}: {}", program, e)),
        Err(_) => Err(format!(
            "{} timed out after {}s",
            program,
            timeout.as_secs()
        )),
    }
}

fn stderr_excerpt(out: &std::process::Output) -> String {
    let stderr = String::from_utf8_lossy(&out.stderr);
    let trimmed = stderr.trim();
    if trimmed.is_empty() {
        format!("exit code {}", out.status.code().unwrap_or(-1))
    } else {
        trimmed.to_string()
    }
}
