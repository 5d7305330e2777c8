use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// A repository that has been deployed at least once (or is being
/// deployed for the first time). One row per distinct repository URL.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Project {
    pub id: i64,
    pub name: String,
    pub repo_url: String,
    pub deployed_contracts: Vec<DeployedContract>,
    pub last_deployment: Option<String>,
    pub status: ProjectStatus,
    pub created_at: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "snake_case")]
pub enum ProjectStatus {
    Active,
    Archived,
}

impl ProjectStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Archived => "archived",
        }
    }
}

impl FromStr for ProjectStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "active" => Ok(Self::Active),
            "archived" => Ok(Self::Archived),
            _ => Err(format!("Invalid project status: {}", s)),
        }
    }
}

/// One successfully deployed contract, embedded in its project's
/// contract list. Immutable once recorded; a later deployment replaces
/// the project's whole list rather than merging into it.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeployedContract {
    pub name: String,
    pub address: String,
    pub abi: serde_json::Value,
    #[serde(default)]
    pub source_code: String,
    #[serde(default)]
    pub deployer: String,
    pub deployment_tx: Option<String>,
    pub deployment_block: Option<u64>,
}

/// Pipeline-local: a non-test source file found in the checkout.
#[derive(Debug, Clone)]
pub struct SourceFile {
    pub name: String,
    pub source_code: String,
}

/// Pipeline-local: one compiled artifact, paired with its source file
/// when a same-named one exists. No source ⇒ the artifact is skipped.
#[derive(Debug, Clone)]
pub struct Artifact {
    pub name: String,
    pub path: std::path::PathBuf,
    pub bytecode: String,
    pub abi: serde_json::Value,
    pub source: Option<SourceFile>,
}

impl Artifact {
    /// Interfaces and abstract contracts compile to artifacts without
    /// runnable bytecode (or with an empty ABI); those are not deployable.
    pub fn is_deployable(&self) -> bool {
        let has_bytecode = !self.bytecode.is_empty() && self.bytecode != "0x";
        let has_abi = self.abi.as_array().map(|a| !a.is_empty()).unwrap_or(false);
        has_bytecode && has_abi
    }
}

/// Terminal payload of a successful deployment stream.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeploymentResult {
    pub project: Project,
    pub deployed_contracts: Vec<DeployedContract>,
}

/// Merged view of persisted contract metadata and live chain state.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContractDetails {
    pub name: String,
    pub source_code: String,
    pub address: String,
    pub deployed_at: Option<String>,
    pub block_number: u64,
    pub deployer: String,
    pub balance: String,
    pub transaction_count: String,
    pub deployment_tx: Option<String>,
    pub abi: serde_json::Value,
}
