use std::sync::Arc;
use std::time::Duration;

use tracing::info;
use tracing_subscriber::EnvFilter;

use carhire::config::Config;
use carhire::engine::Engine;
use carhire::uploads::DocumentStore;

/// Resolves on ctrl-c, or SIGTERM on unix.
async fn shutdown_signal() -> std::io::Result<()> {
    #[cfg(unix)]
    {
        let mut sigterm = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())?;
        tokio::select! {
            r = tokio::signal::ctrl_c() => r,
            _ = sigterm.recv() => Ok(()),
        }
    }
    #[cfg(not(unix))]
    {
        tokio::signal::ctrl_c().await
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let config = Config::from_env()?;

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_level));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    carhire::observability::init(config.metrics_port)?;

    std::fs::create_dir_all(&config.data_dir)?;
    let documents = DocumentStore::new(config.upload_dir(), &config.allowed_extensions, config.upload_policy)?;

    let engine = Arc::new(Engine::new(config.wal_path())?);
    if config.seed_sample_catalog {
        carhire::seed::seed_sample_catalog(&engine).await?;
    }

    let compactor = tokio::spawn(carhire::compactor::run_compactor(
        engine.clone(),
        config.compact_threshold,
        Duration::from_secs(config.compact_interval_secs.max(1)),
    ));

    info!("carhire engine ready");
    info!("  journal: {}", config.wal_path().display());
    info!("  cars: {}, bookings: {}", engine.store().car_count(), engine.store().booking_count());
    info!("  uploads: {} ({:?})", documents.dir().display(), config.upload_policy);
    info!(
        "  metrics: {}",
        config
            .metrics_port
            .map_or("disabled".to_string(), |p| format!("http://0.0.0.0:{p}/metrics"))
    );

    shutdown_signal().await?;
    info!("shutdown signal received");

    compactor.abort();
    match engine.compact_wal().await {
        Ok(events) => info!("final compaction wrote {events} event(s)"),
        Err(e) => tracing::error!("final compaction failed: {e}"),
    }

    info!("carhire stopped");
    Ok(())
}
