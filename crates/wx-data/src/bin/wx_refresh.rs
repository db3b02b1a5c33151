use std::path::PathBuf;
use std::sync::Arc;

use tracing_subscriber::EnvFilter;
use wx_data::{default_data_dir, BatchCoordinator, DataConfig, DataManager};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let config_path = std::env::var("WX_CONFIG")
        .map(PathBuf::from)
        .unwrap_or_else(|_| default_data_dir().join("config.toml"));
    let config = DataConfig::load(&config_path)?;

    let manager = Arc::new(DataManager::from_config(&config)?);
    let swept = manager.cache.sweep_expired()?;
    if swept > 0 {
        tracing::info!("Removed {} expired snapshots", swept);
    }

    let coordinator = BatchCoordinator::from_config(manager.clone(), &config);
    let report = coordinator.refresh_all(&config.default_fields).await;

    for failure in report.failures() {
        tracing::warn!("Location {} not refreshed: {}", failure.location_id, failure.message);
    }
    tracing::info!("Refresh {}: {}", report.run_id, report.message());

    if report.attempted > 0 && report.succeeded == 0 {
        anyhow::bail!("refresh failed for every location");
    }
    Ok(())
}
