//! Per-run deployment workspaces.
//!
//! Every pipeline run owns exactly one uniquely named directory under
//! the workspace root. The directory is removed when the handle drops,
//! on every exit path; removal failures are logged, never raised,
//! since pipeline correctness does not depend on cleanup succeeding.

use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use tracing::{debug, warn};

use crate::errors::DeployError;

/// Handle to one run's isolated directory. Dropping it removes the tree.
pub struct Workspace {
    path: PathBuf,
}

impl Workspace {
    /// Allocate a fresh directory under `root`, creating `root` itself
    /// on demand. The name combines a millisecond timestamp with a v4
    /// UUID fragment so concurrent runs cannot collide.
    pub fn create(root: &Path) -> Result<Self, DeployError> {
        std::fs::create_dir_all(root).map_err(DeployError::Resource)?;

        let millis = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis())
            .unwrap_or(0);
        let suffix = uuid::Uuid::new_v4().simple().to_string();
        let path = root.join(format!("deploy_{}_{}", millis, &suffix[..12]));

        std::fs::create_dir(&path).map_err(DeployError::Resource)?;
        debug!(path = %path.display(), "created workspace");
        Ok(Self { path })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for Workspace {
    fn drop(&mut self) {
        if let Err(e) = std::fs::remove_dir_all(&self.path) {
            warn!(path = %self.path.display(), error = %e, "failed to remove workspace");
        } else {
            debug!(path = %self.path.display(), "removed workspace");
        }
    }
}
