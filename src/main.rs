use std::sync::Arc;

use anyhow::Context;
use tracing::info;
use tracing_subscriber::EnvFilter;

use stockcontrol::config::load_config;
use stockcontrol::db::{check_connection, establish_connection_from_app_config, run_migrations};
use stockcontrol::events;
use stockcontrol::StockEngine;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = load_config().context("failed to load configuration")?;

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.log_level.clone()));
    if config.log_json {
        tracing_subscriber::fmt().with_env_filter(filter).json().init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }

    info!(environment = %config.environment, "Starting stockcontrol");

    let db = establish_connection_from_app_config(&config)
        .await
        .context("failed to connect to database")?;
    check_connection(&db).await.context("database ping failed")?;

    if config.auto_migrate {
        run_migrations(&db).await.context("migrations failed")?;
    }

    let (event_sender, event_rx) = events::channel(1024);
    let event_processor = tokio::spawn(events::process_events(event_rx));

    let engine = StockEngine::new(Arc::new(db), event_sender, config);
    let sweeper = engine.spawn_sweeper();

    info!("Sweeper daemon running, press Ctrl-C to stop");
    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for shutdown signal")?;

    info!("Shutting down");
    sweeper.abort();
    event_processor.abort();

    Ok(())
}
