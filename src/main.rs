use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use routeplane::{
    api::start_api_server,
    cli::{Cli, Commands},
    config::AppConfig,
    observability::{init_observability, log_config_info},
    services::{
        ConfigMerger, FetchCoordinator, ResourceWatcher, ServiceWatcher,
        StoredCertificateAuthority,
    },
    storage::{check_schema, create_pool, DbPool, SettingsRepository},
    upstream::{build_http_client, create_fetcher},
    APP_NAME, VERSION,
};
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // A missing .env file is fine; anything else is worth a warning
    if let Err(e) = dotenvy::dotenv() {
        if !e.not_found() {
            eprintln!("Warning: Error loading .env file: {}", e);
        }
    }

    let cli = Cli::parse();

    let mut config = AppConfig::from_env().context("Failed to load configuration")?;
    if let Some(url) = &cli.database_url {
        config.database.url = url.clone();
    }
    if let Some(url) = &cli.upstream_url {
        config.upstream.url = url.clone();
    }
    config.validate().context("Invalid configuration")?;

    init_observability(&config.observability)?;
    info!(app_name = APP_NAME, version = VERSION, "Starting routeplane");
    log_config_info(&config);

    let pool = create_pool(&config.database)
        .await
        .context("Failed to open database")?;
    check_schema(&pool)
        .await
        .context("Database schema check failed")?;

    let client = build_http_client(&config.upstream)?;
    let fetcher = create_fetcher(&config.upstream, client);
    let coordinator = Arc::new(FetchCoordinator::new(fetcher, config.sync.fetch_min_interval()));

    let ca = Arc::new(StoredCertificateAuthority::new(SettingsRepository::new(pool.clone())));
    let merger = Arc::new(ConfigMerger::new(
        coordinator.clone(),
        pool.clone(),
        ca,
        config.sync.config_cache_ttl(),
    ));

    match cli.command() {
        Commands::Serve => serve(&config, pool, coordinator, merger).await,
        Commands::Render { pretty } => {
            let document = merger.get_merged_config().await?;
            let output = if pretty {
                serde_json::to_string_pretty(document.as_ref())?
            } else {
                String::from_utf8(document.to_json_bytes()?)?
            };
            println!("{}", output);
            Ok(())
        }
        Commands::Reconcile => {
            let resources = ResourceWatcher::new(
                coordinator.clone(),
                pool.clone(),
                config.sync.resource_poll_interval(),
            );
            let services =
                ServiceWatcher::new(coordinator, pool, config.sync.service_poll_interval());

            let resource_report = resources.check_resources().await?;
            let service_report = services.check_services().await?;
            info!(
                resources = ?resource_report,
                services = ?service_report,
                "Reconcile pass complete"
            );
            Ok(())
        }
    }
}

async fn serve(
    config: &AppConfig,
    pool: DbPool,
    coordinator: Arc<FetchCoordinator>,
    merger: Arc<ConfigMerger>,
) -> anyhow::Result<()> {
    let shutdown = CancellationToken::new();

    let resource_watcher = ResourceWatcher::new(
        coordinator.clone(),
        pool.clone(),
        config.sync.resource_poll_interval(),
    );
    let resource_task = tokio::spawn({
        let shutdown = shutdown.clone();
        async move { resource_watcher.run(shutdown).await }
    });

    let service_watcher =
        ServiceWatcher::new(coordinator, pool, config.sync.service_poll_interval());
    let service_task = tokio::spawn({
        let shutdown = shutdown.clone();
        async move { service_watcher.run(shutdown).await }
    });

    tokio::spawn({
        let shutdown = shutdown.clone();
        async move {
            if let Err(e) = tokio::signal::ctrl_c().await {
                error!(error = %e, "Failed to listen for shutdown signal");
            }
            info!("Shutdown signal received");
            shutdown.cancel();
        }
    });

    let served = start_api_server(&config.server, merger, shutdown.clone()).await;

    // stop the watchers whether the server exited cleanly or not
    shutdown.cancel();
    for (name, task) in [("resource watcher", resource_task), ("service watcher", service_task)] {
        if let Err(e) = task.await {
            error!(task = name, error = %e, "Background task ended abnormally");
        }
    }

    served?;
    info!("routeplane shutdown completed");
    Ok(())
}
