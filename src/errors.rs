//! Typed error hierarchy for the deployment service.
//!
//! Each pipeline stage fails with its own variant so callers can tell a
//! clone failure apart from a compile failure or a chain-side rejection.
//! `Compile` carries the compiler's combined output for diagnostics.

use thiserror::Error;

/// Errors raised by the clone-build-deploy pipeline and its lookups.
#[derive(Debug, Error)]
pub enum DeployError {
    #[error("Failed to prepare workspace: {0}")]
    Resource(#[source] std::io::Error),

    #[error("Failed to clone repository: {0}")]
    Fetch(String),

    #[error("Failed to install dependencies: {0}")]
    Dependency(String),

    #[error("Contract compilation failed")]
    Compile { output: String },

    #[error("Deployment failed: {0}")]
    Deploy(String),

    #[error("{0}")]
    NotFound(String),

    #[error("Invalid request: {0}")]
    Validation(String),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl DeployError {
    /// Short human-readable summary for the caller-facing error object.
    /// Detail (captured output, underlying messages) travels separately.
    pub fn summary(&self) -> &'static str {
        match self {
            Self::Resource(_) => "Failed to prepare workspace",
            Self::Fetch(_) => "Failed to clone repository",
            Self::Dependency(_) => "Failed to install dependencies",
            Self::Compile { .. } => "Contract compilation failed",
            Self::Deploy(_) => "Contract deployment failed",
            Self::NotFound(_) => "Not found",
            Self::Validation(_) => "Invalid request",
            Self::Other(_) => "Failed to process contracts",
        }
    }

    /// Detail string surfaced to the caller alongside the summary.
    pub fn detail(&self) -> String {
        match self {
            Self::Compile { output } => output.clone(),
            other => other.to_string(),
        }
    }
}
