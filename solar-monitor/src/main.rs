use anyhow::Result;
use solar_client::{
    db::{SampleStore, TokenStore},
    domain::Sample,
};
use solar_monitor::{
    auth::{Credentials, EnlightenTokenManager, TokenProvider},
    chart::{chart_channel, ChartRenderer},
    config::AppConfig,
    gateway::GatewayClient,
    metrics_server, observability,
    pipeline::Pipeline,
    sinks::WindowSink,
    sources::GatewayPollSource,
    transform, web,
    window::{SampleWindow, WindowSettings},
};
use std::{sync::Arc, time::Duration};
use time::UtcOffset;

fn main() -> Result<()> {
    observability::init_tracing();

    let cfg = AppConfig::load()?;
    // Must happen before the runtime spawns its worker threads.
    let offset = cfg.chart.resolve_offset()?;

    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?
        .block_on(run(cfg, offset))
}

async fn run(cfg: AppConfig, offset: UtcOffset) -> Result<()> {
    if let Some(metrics_cfg) = &cfg.metrics {
        metrics_server::init(&metrics_cfg.bind_addr)?;
    }

    let store = SampleStore::open(&cfg.store.url).await?;
    store.initialize().await?;
    let pruned = store.prune(cfg.retention.max_records).await?;
    tracing::info!(url = %cfg.store.url, pruned, "sample store ready");
    let store = Arc::new(store);

    let window = Arc::new(
        SampleWindow::warm_start(
            store.clone(),
            WindowSettings::from_config(&cfg.window, &cfg.retention),
        )
        .await?,
    );

    let mut tokens = EnlightenTokenManager::new(
        Credentials::from(&cfg.auth),
        Duration::from_secs(cfg.auth.expiration_secs),
    )?;
    match TokenStore::open(&cfg.auth.token_db_url).await {
        Ok(token_store) => tokens = tokens.with_store(token_store).await,
        Err(e) => tracing::warn!(error = %e, "token store unavailable, tokens will not survive restarts"),
    }
    let tokens = Arc::new(tokens);

    let gateway = GatewayClient::new(&cfg.gateway)?;
    tracing::info!(url = gateway.reports_url(), interval_secs = cfg.poll.interval_secs, "polling gateway");

    let (publisher, charts) = chart_channel();

    let pipeline: Pipeline<_, Sample, _> = Pipeline {
        source: GatewayPollSource::new(tokens.clone() as Arc<dyn TokenProvider>, gateway, cfg.poll.interval()),
        transforms: vec![Arc::new(transform::SampleValidation)],
        sink: WindowSink::new(
            window,
            ChartRenderer::new(cfg.chart.width, cfg.chart.height, offset),
            cfg.chart.series,
            offset,
            publisher,
        ),
    };

    let app = web::router(charts, cfg.poll.interval().as_secs());

    tokio::select! {
        res = pipeline.run() => {
            if let Err(e) = res {
                tracing::error!(error = %e, "poll pipeline stopped");
            }
        }
        res = web::serve(&cfg.http.bind_addr, app) => {
            if let Err(e) = res {
                tracing::error!(error = %e, "chart server stopped");
            }
        }
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("shutdown requested");
        }
    }

    tokens.close().await;
    store.close().await?;
    tracing::info!("stores closed");

    Ok(())
}
