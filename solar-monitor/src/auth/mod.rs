use std::time::Duration;

use serde::{Deserialize, Serialize};
use solar_client::db::{StoredToken, TokenStore};
use time::OffsetDateTime;
use tokio::sync::Mutex;

use crate::config::AuthConfig;

#[derive(thiserror::Error, Debug)]
pub enum AuthError {
    #[error("token request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("{step} returned status {status}")]
    Status {
        step: &'static str,
        status: reqwest::StatusCode,
    },
    #[error("invalid token response: {0}")]
    InvalidResponse(String),
}

/// Supplies a bearer token for gateway requests.
#[async_trait::async_trait]
pub trait TokenProvider: Send + Sync {
    async fn get_token(&self) -> Result<String, AuthError>;
}

#[derive(Debug, Clone)]
pub struct Credentials {
    pub token_url: String,
    pub registration_url: String,
    pub username: String,
    pub password: String,
    pub gateway_serial: String,
}

impl From<&AuthConfig> for Credentials {
    fn from(cfg: &AuthConfig) -> Self {
        Self {
            token_url: cfg.token_url.clone(),
            registration_url: cfg.registration_url.clone(),
            username: cfg.username.clone(),
            password: cfg.password.clone(),
            gateway_serial: cfg.gateway_serial.clone(),
        }
    }
}

#[derive(Deserialize)]
struct LoginResponse {
    session_id: String,
}

#[derive(Serialize)]
struct RegistrationRequest<'a> {
    session_id: &'a str,
    serial_num: &'a str,
    username: &'a str,
}

/// Token provider backed by the Enlighten login and token-registration
/// endpoints.
///
/// A token is reused until `expiration` has passed since it was issued. When a
/// [`TokenStore`] is attached the token also survives restarts.
pub struct EnlightenTokenManager {
    client: reqwest::Client,
    credentials: Credentials,
    expiration: Duration,
    cached: Mutex<Option<StoredToken>>,
    store: Option<TokenStore>,
}

impl EnlightenTokenManager {
    pub fn new(credentials: Credentials, expiration: Duration) -> Result<Self, AuthError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()?;

        Ok(Self {
            client,
            credentials,
            expiration,
            cached: Mutex::new(None),
            store: None,
        })
    }

    /// Attach a persistent token store and seed the cache from it.
    pub async fn with_store(mut self, store: TokenStore) -> Self {
        match store.load().await {
            Ok(Some(saved)) => {
                tracing::info!(issued_at = saved.issued_at, "loaded saved gateway token");
                *self.cached.get_mut() = Some(saved);
            }
            Ok(None) => {}
            Err(e) => tracing::warn!(error = %e, "failed to load saved gateway token"),
        }
        self.store = Some(store);
        self
    }

    /// Close the attached token store, if any.
    pub async fn close(&self) {
        if let Some(store) = &self.store {
            if let Err(e) = store.close().await {
                tracing::warn!(error = %e, "failed to close token store");
            }
        }
    }

    fn is_valid(&self, token: &StoredToken, now: i64) -> bool {
        let expiration = i64::try_from(self.expiration.as_secs()).unwrap_or(i64::MAX);
        now.saturating_sub(token.issued_at) < expiration
    }

    async fn retrieve_new_token(&self) -> Result<String, AuthError> {
        let creds = &self.credentials;

        let resp = self
            .client
            .post(&creds.token_url)
            .form(&[
                ("user[email]", creds.username.as_str()),
                ("user[password]", creds.password.as_str()),
            ])
            .send()
            .await?;
        if !resp.status().is_success() {
            return Err(AuthError::Status {
                step: "login",
                status: resp.status(),
            });
        }
        let login: LoginResponse = resp.json().await?;

        let resp = self
            .client
            .post(&creds.registration_url)
            .json(&RegistrationRequest {
                session_id: &login.session_id,
                serial_num: &creds.gateway_serial,
                username: &creds.username,
            })
            .send()
            .await?;
        if !resp.status().is_success() {
            return Err(AuthError::Status {
                step: "token registration",
                status: resp.status(),
            });
        }

        let token = resp.text().await?.trim().to_string();
        if token.is_empty() {
            return Err(AuthError::InvalidResponse(
                "registration response contained no token".to_string(),
            ));
        }
        Ok(token)
    }
}

#[async_trait::async_trait]
impl TokenProvider for EnlightenTokenManager {
    async fn get_token(&self) -> Result<String, AuthError> {
        let mut cached = self.cached.lock().await;
        let now = OffsetDateTime::now_utc().unix_timestamp();

        if let Some(token) = cached.as_ref().filter(|t| self.is_valid(t, now)) {
            tracing::debug!("using cached gateway token");
            return Ok(token.token.clone());
        }

        tracing::info!("gateway token expired or missing, requesting a new one");
        let token = match self.retrieve_new_token().await {
            Ok(token) => token,
            Err(e) => {
                metrics::counter!("gateway_token_failures_total").increment(1);
                return Err(e);
            }
        };
        metrics::counter!("gateway_token_renewals_total").increment(1);

        let fresh = StoredToken {
            token: token.clone(),
            issued_at: now,
        };
        if let Some(store) = &self.store {
            if let Err(e) = store.save(&fresh).await {
                tracing::warn!(error = %e, "failed to persist gateway token");
            }
        }
        *cached = Some(fresh);

        Ok(token)
    }
}
