use std::sync::Arc;

use futures::StreamExt;
use solar_client::domain::Sample;
use time::UtcOffset;

use crate::{
    chart::{ChartData, ChartPublisher, ChartRenderer},
    config::SeriesSource,
    pipeline::{Envelope, PipelineError, Sink},
    transform,
    window::{IngestOutcome, SampleWindow},
};

/// Terminal stage of the poll pipeline: feeds each reading into the window,
/// then redraws and publishes the chart.
///
/// Failed cycles arrive as error items; they are logged and counted and the
/// previously published chart stays in place.
pub struct WindowSink {
    window: Arc<SampleWindow>,
    renderer: ChartRenderer,
    series: SeriesSource,
    offset: UtcOffset,
    publisher: ChartPublisher,
}

impl WindowSink {
    pub fn new(
        window: Arc<SampleWindow>,
        renderer: ChartRenderer,
        series: SeriesSource,
        offset: UtcOffset,
        publisher: ChartPublisher,
    ) -> Self {
        Self {
            window,
            renderer,
            series,
            offset,
            publisher,
        }
    }

    async fn handle(&self, env: Envelope<Sample>) -> Result<(), PipelineError> {
        let timestamp = env.payload.timestamp;
        match self.window.ingest(env.payload).await {
            // A restart can warm-start with the reading the gateway still
            // reports; draw once so the window's data is served.
            IngestOutcome::Duplicate if self.publisher.has_chart() => return Ok(()),
            IngestOutcome::Duplicate => {
                tracing::debug!(timestamp, "duplicate sample, drawing first chart");
            }
            IngestOutcome::Accepted { persisted, evicted } => {
                tracing::info!(timestamp, persisted, ?evicted, "sample ingested");
            }
        }

        let samples = self.window.snapshot().await;
        let data = match self.series {
            SeriesSource::Derived => ChartData::from_rates(&transform::reconstruct(&samples, self.offset)),
            SeriesSource::Reported => ChartData::from_samples(&samples),
        };

        let chart = self.renderer.render(&data)?;
        metrics::counter!("charts_rendered_total").increment(1);
        if let Ok(latency) = std::time::SystemTime::now().duration_since(env.received_at) {
            metrics::histogram!("poll_to_chart_latency_seconds").record(latency.as_secs_f64());
        }
        self.publisher.publish(chart);

        Ok(())
    }
}

#[async_trait::async_trait]
impl Sink<Sample> for WindowSink {
    async fn run<S>(&self, mut input: S) -> Result<(), PipelineError>
    where
        S: futures::Stream<Item = Result<Envelope<Sample>, PipelineError>> + Send + Unpin + 'static,
    {
        while let Some(item) = input.next().await {
            let result = match item {
                Ok(env) => self.handle(env).await,
                Err(e) => Err(e),
            };

            if let Err(e) = result {
                metrics::counter!("poll_cycle_failures_total", "kind" => e.kind()).increment(1);
                tracing::warn!(error = %e, "poll cycle failed, keeping last chart");
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chart::chart_channel;
    use solar_client::{db::SampleStore, domain::EnergyChannel};

    fn sample(timestamp: i64, production_wh: i64) -> Sample {
        Sample {
            timestamp,
            production: EnergyChannel::new(700, production_wh, 0),
            net_consumption: EnergyChannel::new(-100, 0, 0),
            total_consumption: EnergyChannel::new(600, 0, 0),
        }
    }

    async fn window() -> Arc<SampleWindow> {
        let store = SampleStore::open("sqlite::memory:").await.unwrap();
        store.initialize().await.unwrap();
        Arc::new(SampleWindow::new(Arc::new(store), 96))
    }

    #[tokio::test]
    async fn failed_cycles_keep_the_last_chart() {
        let window = window().await;
        let (publisher, handle) = chart_channel();
        let sink = WindowSink::new(
            window.clone(),
            ChartRenderer::new(400, 240, UtcOffset::UTC),
            SeriesSource::Derived,
            UtcOffset::UTC,
            publisher,
        );

        let items = vec![
            Err(PipelineError::Validation("before first success".to_string())),
            Ok(Envelope::now(sample(1_717_243_200, 100))),
            Ok(Envelope::now(sample(1_717_243_260, 110))),
            Err(PipelineError::Validation("later failure".to_string())),
        ];
        sink.run(futures::stream::iter(items)).await.unwrap();

        assert_eq!(window.len().await, 2);
        let chart = handle.latest().expect("chart published");
        assert_eq!(chart.points, 2);
    }

    #[tokio::test]
    async fn duplicate_after_warm_start_still_draws_the_first_chart() {
        let window = window().await;
        window.ingest(sample(1_717_243_200, 100)).await;
        window.ingest(sample(1_717_243_260, 110)).await;

        let (publisher, handle) = chart_channel();
        let sink = WindowSink::new(
            window.clone(),
            ChartRenderer::new(400, 240, UtcOffset::UTC),
            SeriesSource::Derived,
            UtcOffset::UTC,
            publisher,
        );

        let items: Vec<Result<Envelope<Sample>, PipelineError>> =
            vec![Ok(Envelope::now(sample(1_717_243_260, 110)))];
        sink.run(futures::stream::iter(items)).await.unwrap();

        assert_eq!(window.len().await, 2);
        let first = handle.latest().expect("chart published");
        assert_eq!(first.points, 2);

        // Once a chart exists, duplicates leave it untouched.
        let items: Vec<Result<Envelope<Sample>, PipelineError>> =
            vec![Ok(Envelope::now(sample(1_717_243_260, 110)))];
        sink.run(futures::stream::iter(items)).await.unwrap();
        let second = handle.latest().expect("chart published");
        assert!(Arc::ptr_eq(&first, &second));
    }

    #[tokio::test]
    async fn nothing_is_published_without_a_successful_cycle() {
        let (publisher, handle) = chart_channel();
        let sink = WindowSink::new(
            window().await,
            ChartRenderer::new(400, 240, UtcOffset::UTC),
            SeriesSource::Reported,
            UtcOffset::UTC,
            publisher,
        );

        let items: Vec<Result<Envelope<Sample>, PipelineError>> =
            vec![Err(PipelineError::Validation("gateway down".to_string()))];
        sink.run(futures::stream::iter(items)).await.unwrap();

        assert!(handle.latest().is_none());
    }
}
