use anyhow::Result;
use clap::Parser;
use tracing_subscriber::EnvFilter;

use anvilhub::config::ServerConfig;
use anvilhub::server;

#[derive(Parser)]
#[command(name = "anvilhub")]
#[command(version, about = "Clone, build, and deploy smart-contract repos to a local Anvil node")]
struct Cli {
    /// Port to listen on
    #[arg(short, long)]
    port: Option<u16>,

    /// JSON-RPC URL of the Anvil node
    #[arg(long)]
    rpc_url: Option<String>,

    /// Path to the project database
    #[arg(long)]
    db: Option<std::path::PathBuf>,

    /// Root directory for per-run deployment workspaces
    #[arg(long)]
    workspace_root: Option<std::path::PathBuf>,

    /// Bind on all interfaces and allow any CORS origin
    #[arg(long)]
    dev: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let cli = Cli::parse();
    let mut config = ServerConfig::from_env();
    if let Some(port) = cli.port {
        config.port = port;
    }
    if let Some(rpc_url) = cli.rpc_url {
        config.rpc_url = rpc_url;
    }
    if let Some(db) = cli.db {
        config.db_path = db;
    }
    if let Some(root) = cli.workspace_root {
        config.workspace_root = root;
    }
    config.dev_mode = config.dev_mode || cli.dev;

    server::start_server(config).await
}
