use std::process;
use std::sync::Arc;

use dag_syncd::notifications::{Publisher, RedisPublisher};
use dag_syncd::rpc_client::RpcClient;
use dag_syncd::{cli, Config, IndexerService, Result};
use database::Database;
use rpc_core::{NotificationApi, RpcApi};
use tokio::signal;
use tokio::sync::broadcast;
use tracing::{error, info, warn};

#[tokio::main]
async fn main() {
    let args = cli::parse_args();
    init_logging(&args);

    info!("Starting dag-syncd {}", env!("CARGO_PKG_VERSION"));

    if let Err(e) = run(&args).await {
        if e.is_fatal() {
            error!("Fatal error, store and subscribers may need attention: {}", e);
        } else {
            error!("Sync stopped: {}", e);
        }
        process::exit(e.exit_code());
    }

    info!("dag-syncd stopped gracefully");
}

async fn run(args: &cli::Args) -> Result<()> {
    let mut config = match &args.config_path {
        Some(path) => Config::load(path)?,
        None => Config::default(),
    };
    config.apply_cli_overrides(args);
    config.validate()?;

    info!("Database path: {:?}", config.database.path);
    let database = Arc::new(Database::open(&config.database.path).await?);
    if config.database.migrate {
        database.migrate().await?;
        info!("Database migrations applied");
    }
    database.ensure_schema_current().await?;

    info!("Connecting to node at {}", config.rpc.url);
    let client = Arc::new(RpcClient::new(&config.rpc.url)?);

    let publisher: Option<Arc<dyn Publisher>> = match &config.notifications.redis_url {
        Some(url) => Some(Arc::new(RedisPublisher::connect(url).await?)),
        None => {
            warn!("No redis url configured, notifications are disabled");
            None
        }
    };

    let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
    tokio::spawn(async move {
        if signal::ctrl_c().await.is_ok() {
            info!("Received Ctrl+C, shutting down");
            let _ = shutdown_tx.send(());
        }
    });

    // Subscribe before bootstrap so nothing announced during the backfill is lost.
    let notifications = client.subscribe().await?;
    let rpc: Arc<dyn RpcApi> = client;
    let mut service = IndexerService::new(database, rpc, publisher, &config.sync);
    service.bootstrap().await?;
    service.run(notifications, shutdown_rx).await
}

fn init_logging(args: &cli::Args) {
    use tracing_subscriber::{fmt, EnvFilter};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&args.log_level));

    fmt().with_env_filter(filter).with_target(true).with_thread_ids(true).init();
}
