//! CKB mirror - main entry point

use anyhow::Context;
use ckb_mirror::{
    api::{ApiServer, AppState},
    cli,
    database::Database,
    indexer::SyncService,
    websocket::{run_dispatcher, ClientRegistry, EventService},
    Config,
};
use rpc_wrpc::NodeConnection;
use std::sync::Arc;
use tracing::{error, info};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = cli::parse_args();
    let config = Config::from_args(&args).context("invalid configuration")?;

    init_logging(&config);
    info!("Starting CKB mirror");

    info!("Database path: {:?}", config.storage.database_path);
    let database = Arc::new(
        Database::new(&config.storage.database_path, config.storage.max_connections)
            .await
            .context("failed to open database")?,
    );
    database.migrate().await.context("failed to migrate database")?;
    info!("Database migrations completed");

    info!("Connecting to CKB node at: {}", config.node.ws_url);
    let node = NodeConnection::start(config.node.ws_url.clone(), config.node.connection_config());

    let (events, event_stream) = EventService::channel();
    let registry = ClientRegistry::new();
    tokio::spawn(run_dispatcher(registry.clone(), event_stream));

    let sync = SyncService::new(Arc::new(node.clone()), database.pool().clone(), events);
    sync.start().await;

    let server = ApiServer::new(
        AppState {
            database: database.clone(),
            registry,
            sync: sync.clone(),
            node: node.clone(),
        },
        config.server.listen_address(),
    );
    if let Err(e) = server.start(shutdown_signal()).await {
        error!("Gateway error: {}", e);
    }

    sync.shutdown().await;
    node.shutdown();
    info!("CKB mirror stopped");
    Ok(())
}

fn init_logging(config: &Config) {
    use tracing_subscriber::{fmt, EnvFilter};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_level));

    if config.json_logs {
        fmt().json().with_env_filter(filter).with_target(true).init();
    } else {
        fmt().with_env_filter(filter).with_target(true).init();
    }
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("Failed to listen for Ctrl-C: {}", e);
        std::future::pending::<()>().await;
    }
    info!("Shutdown requested");
}
