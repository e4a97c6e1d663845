use anyhow::Result;
use solar_client::db::SampleStore;
use solar_monitor::{
    config::AppConfig,
    observability, transform,
    window::{SampleWindow, WindowSettings},
};
use std::sync::Arc;

/// Print the rates the chart would currently show, one JSON object per line.
#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    observability::init_tracing();

    let cfg = AppConfig::load()?;
    let offset = cfg.chart.resolve_offset()?;

    let store = Arc::new(SampleStore::open(&cfg.store.url).await?);
    store.initialize().await?;

    let window = SampleWindow::warm_start(
        store.clone(),
        WindowSettings::from_config(&cfg.window, &cfg.retention),
    )
    .await?;

    let samples = window.snapshot().await;
    for point in transform::reconstruct(&samples, offset) {
        println!("{}", serde_json::to_string(&point)?);
    }

    store.close().await?;

    Ok(())
}
