//! OAuth client-credentials HTTP source with retry and a time-boxed token cache.

use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use reqwest::StatusCode;
use serde::Deserialize;
use serde_json::Value as JsonValue;
use tokio::sync::Mutex;
use tracing::{debug, info_span, warn, Instrument};

use crate::{SourceClient, SourceError, SourcePage};

/// Tokens are treated as expired this long before the server says so.
const EXPIRY_MARGIN: Duration = Duration::from_secs(60);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDisposition {
    Retryable,
    NonRetryable,
}

pub fn classify_status(status: StatusCode) -> RetryDisposition {
    if status.is_server_error() || status == StatusCode::TOO_MANY_REQUESTS {
        RetryDisposition::Retryable
    } else {
        RetryDisposition::NonRetryable
    }
}

pub fn classify_reqwest_error(err: &reqwest::Error) -> RetryDisposition {
    if err.is_timeout() || err.is_connect() || err.is_request() {
        RetryDisposition::Retryable
    } else {
        RetryDisposition::NonRetryable
    }
}

#[derive(Debug, Clone, Copy)]
pub struct BackoffPolicy {
    pub max_retries: usize,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_millis(250),
            max_delay: Duration::from_secs(5),
        }
    }
}

impl BackoffPolicy {
    pub fn delay_for_attempt(&self, attempt_index: usize) -> Duration {
        let factor = 1u32.checked_shl(attempt_index as u32).unwrap_or(u32::MAX);
        self.base_delay.saturating_mul(factor).min(self.max_delay)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccessToken {
    value: String,
    expires_at: Instant,
}

impl AccessToken {
    pub fn new(value: impl Into<String>, expires_in: Duration, obtained_at: Instant) -> Self {
        Self {
            value: value.into(),
            expires_at: obtained_at + expires_in.saturating_sub(EXPIRY_MARGIN),
        }
    }

    pub fn value(&self) -> &str {
        &self.value
    }

    pub fn is_valid_at(&self, now: Instant) -> bool {
        now < self.expires_at
    }
}

/// Shared slot for the current bearer token. Injected into the client so
/// several clients (or tests) can share or inspect it.
#[derive(Debug, Default)]
pub struct TokenCache {
    slot: Mutex<Option<AccessToken>>,
}

impl TokenCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn valid_at(&self, now: Instant) -> Option<String> {
        self.slot
            .lock()
            .await
            .as_ref()
            .filter(|t| t.is_valid_at(now))
            .map(|t| t.value.clone())
    }

    pub async fn store(&self, token: AccessToken) {
        *self.slot.lock().await = Some(token);
    }

    pub async fn invalidate(&self) {
        *self.slot.lock().await = None;
    }
}

#[derive(Debug, Clone)]
pub struct HttpSourceConfig {
    pub base_url: String,
    pub client_id: String,
    pub client_secret: String,
    pub timeout: Duration,
    pub backoff: BackoffPolicy,
}

impl HttpSourceConfig {
    /// All three credentials must be present and non-blank.
    pub fn new(
        base_url: Option<String>,
        client_id: Option<String>,
        client_secret: Option<String>,
        timeout: Duration,
    ) -> Result<Self, SourceError> {
        let require = |value: Option<String>, name: &str| {
            value
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
                .ok_or_else(|| SourceError::Config(format!("{name} must be set")))
        };
        Ok(Self {
            base_url: require(base_url, "SOURCE_API_URL")?
                .trim_end_matches('/')
                .to_string(),
            client_id: require(client_id, "SOURCE_CLIENT_ID")?,
            client_secret: require(client_secret, "SOURCE_CLIENT_SECRET")?,
            timeout,
            backoff: BackoffPolicy::default(),
        })
    }
}

#[derive(Debug, Deserialize)]
struct AuthResponse {
    access_token: String,
    #[serde(default = "default_expires_in")]
    expires_in: u64,
}

fn default_expires_in() -> u64 {
    3600
}

#[derive(Debug)]
pub struct HttpSourceClient {
    client: reqwest::Client,
    config: HttpSourceConfig,
    tokens: Arc<TokenCache>,
}

impl HttpSourceClient {
    pub fn new(config: HttpSourceConfig) -> Result<Self, SourceError> {
        let client = reqwest::Client::builder()
            .gzip(true)
            .brotli(true)
            .timeout(config.timeout)
            .build()?;
        Ok(Self {
            client,
            config,
            tokens: Arc::new(TokenCache::new()),
        })
    }

    pub fn with_token_cache(mut self, tokens: Arc<TokenCache>) -> Self {
        self.tokens = tokens;
        self
    }

    pub fn endpoint_url(&self, endpoint: &str) -> String {
        format!(
            "{}/{}",
            self.config.base_url,
            endpoint.trim_start_matches('/')
        )
    }

    async fn token(&self) -> Result<String, SourceError> {
        if let Some(token) = self.tokens.valid_at(Instant::now()).await {
            return Ok(token);
        }
        let obtained_at = Instant::now();
        let resp = self
            .client
            .post(format!("{}/auth", self.config.base_url))
            .json(&serde_json::json!({
                "client_id": self.config.client_id,
                "client_secret": self.config.client_secret,
            }))
            .send()
            .await?;
        if !resp.status().is_success() {
            return Err(SourceError::Auth {
                status: resp.status().as_u16(),
            });
        }
        let auth: AuthResponse = resp.json().await?;
        debug!(expires_in = auth.expires_in, "obtained source access token");
        let token = AccessToken::new(
            auth.access_token,
            Duration::from_secs(auth.expires_in),
            obtained_at,
        );
        let value = token.value().to_string();
        self.tokens.store(token).await;
        Ok(value)
    }

    async fn fetch_with_retry(&self, endpoint: &str) -> Result<SourcePage, SourceError> {
        let url = self.endpoint_url(endpoint);
        let backoff = self.config.backoff;
        let mut reauthenticated = false;
        let mut attempt = 0;

        loop {
            let token = self.token().await?;
            let resp = match self.client.get(&url).bearer_auth(&token).send().await {
                Ok(resp) => resp,
                Err(err) => {
                    if classify_reqwest_error(&err) == RetryDisposition::Retryable
                        && attempt < backoff.max_retries
                    {
                        warn!(attempt, error = %err, "source request failed, retrying");
                        tokio::time::sleep(backoff.delay_for_attempt(attempt)).await;
                        attempt += 1;
                        continue;
                    }
                    return Err(SourceError::Request(err));
                }
            };

            let status = resp.status();
            if status.is_success() {
                let body: JsonValue = resp.json().await?;
                return SourcePage::from_json(endpoint, body);
            }
            if status == StatusCode::UNAUTHORIZED && !reauthenticated {
                self.tokens.invalidate().await;
                reauthenticated = true;
                continue;
            }
            if classify_status(status) == RetryDisposition::Retryable && attempt < backoff.max_retries {
                warn!(attempt, status = status.as_u16(), "source returned retryable status");
                tokio::time::sleep(backoff.delay_for_attempt(attempt)).await;
                attempt += 1;
                continue;
            }
            return Err(SourceError::HttpStatus {
                status: status.as_u16(),
                url,
            });
        }
    }
}

#[async_trait]
impl SourceClient for HttpSourceClient {
    async fn fetch(&self, endpoint: &str) -> Result<SourcePage, SourceError> {
        let span = info_span!("source_fetch", endpoint);
        async {
            let page = self.fetch_with_retry(endpoint).await?;
            debug!(records = page.data.len(), "fetched source page");
            Ok(page)
        }
        .instrument(span)
        .await
    }
}
