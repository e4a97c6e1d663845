use std::{sync::Arc, time::Duration};

use solar_client::domain::Sample;

use crate::{
    auth::TokenProvider,
    gateway::GatewayClient,
    pipeline::{Envelope, EnvelopeStream, PipelineError, Source},
};

/// Polls the gateway's meter reports on a fixed delay.
///
/// Each cycle yields either a sample or the error that ended the cycle; the
/// stream itself never ends. The delay starts only once the consumer asks
/// for the next item.
#[derive(Clone)]
pub struct GatewayPollSource {
    tokens: Arc<dyn TokenProvider>,
    gateway: GatewayClient,
    interval: Duration,
}

impl GatewayPollSource {
    pub fn new(tokens: Arc<dyn TokenProvider>, gateway: GatewayClient, interval: Duration) -> Self {
        Self {
            tokens,
            gateway,
            interval,
        }
    }

    /// Run a single poll cycle: obtain a token, fetch the reports and convert
    /// them to a sample.
    pub async fn poll_once(&self) -> Result<Sample, PipelineError> {
        let token = self.tokens.get_token().await?;
        let reports = self.gateway.fetch_reports(&token).await?;
        Ok(reports.to_sample())
    }
}

#[async_trait::async_trait]
impl Source<Sample> for GatewayPollSource {
    async fn stream(&self) -> EnvelopeStream<Sample> {
        let source = self.clone();

        let s = async_stream::stream! {
            loop {
                metrics::counter!("gateway_poll_cycles_total").increment(1);
                let started = std::time::Instant::now();
                let result = source.poll_once().await;
                metrics::histogram!("gateway_poll_duration_seconds").record(started.elapsed().as_secs_f64());

                match &result {
                    Ok(sample) => tracing::debug!(timestamp = sample.timestamp, "gateway poll succeeded"),
                    Err(e) => tracing::debug!(error = %e, "gateway poll failed"),
                }
                yield result.map(Envelope::now);

                tokio::time::sleep(source.interval).await;
            }
        };

        Box::pin(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{auth::AuthError, config::GatewayConfig, test_support::spawn_server};
    use axum::{routing::get, Router};
    use futures::StreamExt;
    use std::sync::atomic::{AtomicUsize, Ordering};

    const REPORTS: &str = r#"[
        { "createdAt": 1717243200, "reportType": "production",
          "cumulative": { "currW": 1500.0, "whDlvdCum": 9000.0, "whRcvdCum": 0.0 } },
        { "createdAt": 1717243200, "reportType": "net-consumption",
          "cumulative": { "currW": -900.0, "whDlvdCum": 100.0, "whRcvdCum": 4000.0 } },
        { "createdAt": 1717243200, "reportType": "total-consumption",
          "cumulative": { "currW": 600.0, "whDlvdCum": 5000.0, "whRcvdCum": 0.0 } }
    ]"#;

    /// Fails every other call, starting with the second.
    struct FlakyTokens {
        calls: AtomicUsize,
    }

    #[async_trait::async_trait]
    impl TokenProvider for FlakyTokens {
        async fn get_token(&self) -> Result<String, AuthError> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst);
            if n % 2 == 1 {
                Err(AuthError::InvalidResponse("no token".to_string()))
            } else {
                Ok("token".to_string())
            }
        }
    }

    async fn source() -> GatewayPollSource {
        let app = Router::new().route("/ivp/meters/reports/", get(|| async { REPORTS }));
        let addr = spawn_server(app).await;
        let gateway = GatewayClient::new(&GatewayConfig {
            base_url: format!("http://{addr}"),
            reports_path: "/ivp/meters/reports/".to_string(),
            accept_invalid_certs: false,
            request_timeout_secs: 5,
        })
        .unwrap();

        GatewayPollSource::new(
            Arc::new(FlakyTokens {
                calls: AtomicUsize::new(0),
            }),
            gateway,
            Duration::from_millis(10),
        )
    }

    #[tokio::test]
    async fn poll_once_builds_a_sample() {
        let sample = source().await.poll_once().await.unwrap();

        assert_eq!(sample.timestamp, 1_717_243_200);
        assert_eq!(sample.production.watts, 1_500);
        assert_eq!(sample.net_consumption.wh_received, 4_000);
    }

    #[tokio::test]
    async fn stream_continues_after_a_failed_cycle() {
        let mut stream = source().await.stream().await;

        let first = stream.next().await.unwrap();
        assert_eq!(first.unwrap().payload.production.watts, 1_500);

        let second = stream.next().await.unwrap();
        assert!(matches!(second, Err(PipelineError::Auth(_))));

        let third = stream.next().await.unwrap();
        assert!(third.is_ok());
    }
}
