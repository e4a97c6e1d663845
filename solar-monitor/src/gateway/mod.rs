use std::time::Duration;

use reqwest::header::{ACCEPT, AUTHORIZATION};
use serde::Deserialize;
use solar_client::domain::{EnergyChannel, Sample};

use crate::config::GatewayConfig;

#[derive(thiserror::Error, Debug)]
pub enum FetchError {
    #[error("gateway request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("gateway returned status {0}")]
    Status(reqwest::StatusCode),
    #[error("unexpected meter report payload: {0}")]
    Payload(String),
}

/// Cumulative block of one meter report. Older firmware omits the watt-hour
/// counters.
#[derive(Debug, Clone, Copy, Deserialize)]
pub struct CumulativeReading {
    #[serde(rename = "currW")]
    pub curr_w: f64,
    #[serde(rename = "whDlvdCum", default)]
    pub wh_dlvd_cum: Option<f64>,
    #[serde(rename = "whRcvdCum", default)]
    pub wh_rcvd_cum: Option<f64>,
}

impl From<CumulativeReading> for EnergyChannel {
    fn from(c: CumulativeReading) -> Self {
        EnergyChannel {
            watts: c.curr_w.round() as i64,
            wh_delivered: c.wh_dlvd_cum.map(|v| v.round() as i64).unwrap_or(0),
            wh_received: c.wh_rcvd_cum.map(|v| v.round() as i64).unwrap_or(0),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MeterReport {
    pub created_at: i64,
    #[serde(default)]
    pub report_type: Option<String>,
    pub cumulative: CumulativeReading,
}

/// The three reports returned by `/ivp/meters/reports/`.
#[derive(Debug, Clone)]
pub struct MeterReports {
    pub production: MeterReport,
    pub net_consumption: MeterReport,
    pub total_consumption: MeterReport,
}

impl MeterReports {
    /// Pick reports by `reportType`, falling back to array position
    /// (production, net, total) when the type is missing.
    pub fn from_reports(reports: Vec<MeterReport>) -> Result<Self, FetchError> {
        let by_type = |wanted: &str| {
            reports
                .iter()
                .find(|r| r.report_type.as_deref() == Some(wanted))
                .cloned()
        };

        let typed = (
            by_type("production"),
            by_type("net-consumption"),
            by_type("total-consumption"),
        );
        if let (Some(production), Some(net_consumption), Some(total_consumption)) = typed {
            return Ok(Self {
                production,
                net_consumption,
                total_consumption,
            });
        }

        let n = reports.len();
        let mut it = reports.into_iter();
        match (it.next(), it.next(), it.next()) {
            (Some(production), Some(net_consumption), Some(total_consumption)) => Ok(Self {
                production,
                net_consumption,
                total_consumption,
            }),
            _ => Err(FetchError::Payload(format!("expected 3 meter reports, got {n}"))),
        }
    }

    /// Convert to a [`Sample`] keyed by the production report's timestamp.
    pub fn to_sample(&self) -> Sample {
        Sample {
            timestamp: self.production.created_at,
            production: self.production.cumulative.into(),
            net_consumption: self.net_consumption.cumulative.into(),
            total_consumption: self.total_consumption.cumulative.into(),
        }
    }
}

/// HTTP client for the gateway's local API.
#[derive(Clone)]
pub struct GatewayClient {
    client: reqwest::Client,
    reports_url: String,
}

impl GatewayClient {
    pub fn new(cfg: &GatewayConfig) -> Result<Self, FetchError> {
        let client = reqwest::Client::builder()
            .danger_accept_invalid_certs(cfg.accept_invalid_certs)
            .timeout(Duration::from_secs(cfg.request_timeout_secs))
            .build()?;

        Ok(Self {
            client,
            reports_url: join_url(&cfg.base_url, &cfg.reports_path),
        })
    }

    pub fn reports_url(&self) -> &str {
        &self.reports_url
    }

    pub async fn fetch_reports(&self, token: &str) -> Result<MeterReports, FetchError> {
        let resp = self
            .client
            .get(&self.reports_url)
            .header(ACCEPT, "application/json")
            .header(AUTHORIZATION, format!("Bearer {token}"))
            .send()
            .await?;

        let status = resp.status();
        if !status.is_success() {
            return Err(FetchError::Status(status));
        }

        let reports: Vec<MeterReport> = resp
            .json()
            .await
            .map_err(|e| FetchError::Payload(e.to_string()))?;
        MeterReports::from_reports(reports)
    }
}

fn join_url(base: &str, path: &str) -> String {
    format!("{}/{}", base.trim_end_matches('/'), path.trim_start_matches('/'))
}
