use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use tracing::{error, info};

use dubflow::api::{ApiServer, AppState};
use dubflow::config::AppConfig;
use dubflow::database;
use dubflow::logging;
use dubflow::providers::Providers;
use dubflow::services::ServiceContainer;
use dubflow::storage::LocalBlobStorage;
use dubflow::utils::http_client;

/// Upper bound for a single provider request (uploads of long audio included).
const HTTP_REQUEST_TIMEOUT: Duration = Duration::from_secs(600);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables
    dotenvy::dotenv().ok();

    let config = AppConfig::from_env().context("loading configuration")?;

    let (logging_config, _log_guard) =
        logging::init_logging(&config.log_dir).context("initializing logging")?;

    info!("Starting dubflow v{}", env!("CARGO_PKG_VERSION"));

    let pool = database::init_pool(&config.database_url)
        .await
        .with_context(|| format!("opening database {}", config.database_url))?;
    database::run_migrations(&pool)
        .await
        .context("running migrations")?;

    let client = http_client::build_client(HTTP_REQUEST_TIMEOUT)?;
    let providers = Providers::from_settings(&config.providers, client.clone())?;
    let storage = Arc::new(LocalBlobStorage::new(
        config.storage_dir.clone(),
        config.public_base_url.clone(),
        client,
    ));

    let container = ServiceContainer::new(pool, &config, providers, storage);
    container.initialize().await?;

    let cancel_token = container.cancellation_token();
    logging_config.start_retention_cleanup(cancel_token.child_token());

    let state = AppState::new(
        container.dubbing_service.clone(),
        container.job_queue.clone(),
    )
    .with_files_dir(config.storage_dir.clone())
    .with_logging_config(logging_config.clone());
    let server = ApiServer::new(config.api.clone(), state, cancel_token.child_token());

    let shutdown_token = cancel_token.clone();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => info!("Received Ctrl-C, shutting down"),
            Err(e) => error!("Failed to listen for Ctrl-C: {}", e),
        }
        shutdown_token.cancel();
    });

    let served = server.run().await;

    container.shutdown().await?;
    served?;

    info!("dubflow stopped");
    Ok(())
}
