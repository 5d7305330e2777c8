use std::path::PathBuf;

/// Server configuration. Defaults mirror a local dev setup: Anvil on
/// its standard port, everything else under the current directory.
/// Environment variables (loaded via dotenv in `main`) override the
/// defaults; CLI flags override both.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub port: u16,
    pub rpc_url: String,
    pub db_path: PathBuf,
    pub workspace_root: PathBuf,
    pub dev_mode: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: 3001,
            rpc_url: "http://127.0.0.1:8545".to_string(),
            db_path: PathBuf::from(".anvilhub/projects.db"),
            workspace_root: PathBuf::from(".anvilhub/deployments"),
            dev_mode: false,
        }
    }
}

impl ServerConfig {
    /// Apply environment overrides on top of the defaults.
    pub fn from_env() -> Self {
        let mut config = Self::default();
        if let Ok(port) = std::env::var("ANVILHUB_PORT") {
            if let Ok(port) = port.parse() {
                config.port = port;
            }
        }
        if let Ok(url) = std::env::var("ANVILHUB_RPC_URL") {
            config.rpc_url = url;
        }
        if let Ok(path) = std::env::var("ANVILHUB_DB") {
            config.db_path = PathBuf::from(path);
        }
        if let Ok(path) = std::env::var("ANVILHUB_WORKSPACE_ROOT") {
            config.workspace_root = PathBuf::from(path);
        }
        config
    }
}
