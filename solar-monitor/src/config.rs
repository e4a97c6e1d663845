use serde::Deserialize;
use std::{fs, time::Duration};
use time::{macros::format_description, UtcOffset};

#[derive(Debug, Clone, Deserialize)]
pub struct GatewayConfig {
    pub base_url: String,
    #[serde(default = "default_reports_path")]
    pub reports_path: String,
    /// The gateway serves a self-signed certificate on the local network.
    #[serde(default = "default_true")]
    pub accept_invalid_certs: bool,
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AuthConfig {
    pub token_url: String,
    pub registration_url: String,
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub password: String,
    pub gateway_serial: String,
    #[serde(default = "default_expiration_secs")]
    pub expiration_secs: u64,
    #[serde(default = "default_token_db_url")]
    pub token_db_url: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StoreConfig {
    #[serde(default = "default_store_url")]
    pub url: String,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            url: default_store_url(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct RetentionConfig {
    #[serde(default = "default_max_records")]
    pub max_records: usize,
    #[serde(default = "default_max_age_hours")]
    pub max_age_hours: u64,
}

impl Default for RetentionConfig {
    fn default() -> Self {
        Self {
            max_records: default_max_records(),
            max_age_hours: default_max_age_hours(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct WindowConfig {
    #[serde(default = "default_window_capacity")]
    pub capacity: usize,
    #[serde(default = "default_window_capacity")]
    pub warm_start_limit: usize,
}

impl Default for WindowConfig {
    fn default() -> Self {
        Self {
            capacity: default_window_capacity(),
            warm_start_limit: default_window_capacity(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct PollConfig {
    #[serde(default = "default_poll_interval_secs")]
    pub interval_secs: u64,
}

impl Default for PollConfig {
    fn default() -> Self {
        Self {
            interval_secs: default_poll_interval_secs(),
        }
    }
}

impl PollConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs.max(1))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SeriesSource {
    /// Power reconstructed from cumulative watt-hour counters.
    Derived,
    /// Power as reported by the gateway at sample time.
    Reported,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ChartConfig {
    #[serde(default = "default_chart_width")]
    pub width: u32,
    #[serde(default = "default_chart_height")]
    pub height: u32,
    #[serde(default = "default_series_source")]
    pub series: SeriesSource,
    /// Fixed offset such as `"-05:00"`. When absent the host's local offset is
    /// used.
    #[serde(default)]
    pub utc_offset: Option<String>,
}

impl Default for ChartConfig {
    fn default() -> Self {
        Self {
            width: default_chart_width(),
            height: default_chart_height(),
            series: default_series_source(),
            utc_offset: None,
        }
    }
}

impl ChartConfig {
    /// Resolve the offset used for calendar days and axis labels.
    ///
    /// The host offset can only be read while the process is single threaded,
    /// so call this before starting the runtime.
    pub fn resolve_offset(&self) -> anyhow::Result<UtcOffset> {
        match &self.utc_offset {
            Some(raw) => parse_utc_offset(raw),
            None => Ok(UtcOffset::current_local_offset().unwrap_or_else(|e| {
                tracing::warn!(error = %e, "local utc offset unavailable, using UTC");
                UtcOffset::UTC
            })),
        }
    }
}

pub fn parse_utc_offset(raw: &str) -> anyhow::Result<UtcOffset> {
    let format = format_description!("[offset_hour sign:mandatory]:[offset_minute]");
    UtcOffset::parse(raw.trim(), format)
        .map_err(|e| anyhow::anyhow!("invalid chart.utc_offset '{raw}': {e}"))
}

#[derive(Debug, Clone, Deserialize)]
pub struct HttpConfig {
    #[serde(default = "default_http_bind_addr")]
    pub bind_addr: String,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            bind_addr: default_http_bind_addr(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct MetricsConfig {
    pub bind_addr: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub gateway: GatewayConfig,
    pub auth: AuthConfig,
    #[serde(default)]
    pub store: StoreConfig,
    #[serde(default)]
    pub retention: RetentionConfig,
    #[serde(default)]
    pub window: WindowConfig,
    #[serde(default)]
    pub poll: PollConfig,
    #[serde(default)]
    pub chart: ChartConfig,
    #[serde(default)]
    pub http: HttpConfig,
    pub metrics: Option<MetricsConfig>,
}

impl AppConfig {
    pub fn load() -> anyhow::Result<Self> {
        use std::env;

        let path = env::var("SOLAR_MONITOR_CONFIG").unwrap_or_else(|_| "solar-monitor.toml".to_string());
        let contents = fs::read_to_string(&path)
            .map_err(|e| anyhow::anyhow!("failed to read config '{path}': {e}"))?;
        let mut cfg: AppConfig = toml::from_str(&contents)?;

        // Credentials are usually kept out of the config file.
        if let Ok(user) = env::var("ENVOY_USER") {
            cfg.auth.username = user;
        }
        if let Ok(pass) = env::var("ENVOY_USER_PASS") {
            cfg.auth.password = pass;
        }

        Ok(cfg)
    }
}

fn default_reports_path() -> String {
    "/ivp/meters/reports/".to_string()
}

fn default_true() -> bool {
    true
}

fn default_request_timeout_secs() -> u64 {
    30
}

fn default_expiration_secs() -> u64 {
    3600
}

fn default_token_db_url() -> String {
    "sqlite://token_db.sqlite".to_string()
}

fn default_store_url() -> String {
    "sqlite://solar_monitor.sqlite".to_string()
}

fn default_max_records() -> usize {
    10_000
}

fn default_max_age_hours() -> u64 {
    72
}

// One day at 15-minute resolution.
fn default_window_capacity() -> usize {
    96
}

fn default_poll_interval_secs() -> u64 {
    60
}

fn default_chart_width() -> u32 {
    1200
}

fn default_chart_height() -> u32 {
    600
}

fn default_series_source() -> SeriesSource {
    SeriesSource::Derived
}

fn default_http_bind_addr() -> String {
    "0.0.0.0:8080".to_string()
}
