//! Endpoint and retry configuration for the live-update streams.

use crate::error::{ConfigError, StreamError};
use reqwest::Url;
use std::time::Duration;

/// Base URL used when `AUTOSHOP_API_URL` is not set.
pub const DEFAULT_API_URL: &str = "http://localhost:8080/api";

/// Query parameter carrying the access token. EventSource-style transports
/// cannot send an `Authorization` header.
pub const DEFAULT_TOKEN_PARAM: &str = "token";

/// Reconnect delay used until the server advertises one with `retry:`.
pub const DEFAULT_RETRY_DELAY: Duration = Duration::from_secs(3);

/// Where the streams live and how the platform transport retries.
#[derive(Debug, Clone)]
pub struct StreamConfig {
    base_url: Url,
    token_param: String,
    retry_delay: Duration,
}

impl StreamConfig {
    /// Creates a config rooted at `base_url`, e.g. `https://shop.example.com/api`.
    pub fn new(base_url: &str) -> Result<Self, StreamError> {
        let base_url = Url::parse(base_url).map_err(|e| StreamError::InvalidUrl(e.to_string()))?;
        if base_url.cannot_be_a_base() {
            return Err(StreamError::InvalidUrl(format!(
                "{base_url} cannot be used as a base url"
            )));
        }
        Ok(Self {
            base_url,
            token_param: DEFAULT_TOKEN_PARAM.to_string(),
            retry_delay: DEFAULT_RETRY_DELAY,
        })
    }

    /// Loads the config from `AUTOSHOP_API_URL`, `AUTOSHOP_SSE_TOKEN_PARAM`
    /// and `AUTOSHOP_SSE_RETRY_MS`, falling back to defaults for unset values.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|var| std::env::var(var).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let base = lookup("AUTOSHOP_API_URL").unwrap_or_else(|| DEFAULT_API_URL.to_string());
        let mut config = Self::new(&base).map_err(|e| ConfigError::Invalid {
            var: "AUTOSHOP_API_URL",
            reason: e.to_string(),
        })?;

        if let Some(param) = lookup("AUTOSHOP_SSE_TOKEN_PARAM") {
            if param.trim().is_empty() {
                return Err(ConfigError::Invalid {
                    var: "AUTOSHOP_SSE_TOKEN_PARAM",
                    reason: "must not be blank".to_string(),
                });
            }
            config.token_param = param.trim().to_string();
        }

        if let Some(ms) = lookup("AUTOSHOP_SSE_RETRY_MS") {
            let ms: u64 = ms.trim().parse().map_err(|e| ConfigError::Invalid {
                var: "AUTOSHOP_SSE_RETRY_MS",
                reason: format!("{e}"),
            })?;
            config.retry_delay = Duration::from_millis(ms);
        }

        Ok(config)
    }

    /// Overrides the query parameter name used for the access token.
    pub fn with_token_param(mut self, param: impl Into<String>) -> Self {
        self.token_param = param.into();
        self
    }

    /// Overrides the default reconnect delay of the SSE transport.
    pub fn with_retry_delay(mut self, delay: Duration) -> Self {
        self.retry_delay = delay;
        self
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    pub fn token_param(&self) -> &str {
        &self.token_param
    }

    pub fn retry_delay(&self) -> Duration {
        self.retry_delay
    }

    /// `{base}/notifications/stream/{user_id}`
    pub fn notification_stream_url(&self, user_id: &str) -> Url {
        self.endpoint(&["notifications", "stream", user_id])
    }

    /// `{base}/projects/{project_id}/progress/stream`
    pub fn progress_stream_url(&self, project_id: &str) -> Url {
        self.endpoint(&["projects", project_id, "progress", "stream"])
    }

    fn endpoint(&self, segments: &[&str]) -> Url {
        let mut url = self.base_url.clone();
        // `new` rejects cannot-be-a-base urls, so this always succeeds.
        if let Ok(mut path) = url.path_segments_mut() {
            path.pop_if_empty().extend(segments);
        }
        url
    }
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            base_url: Url::parse(DEFAULT_API_URL).expect("default api url is valid"),
            token_param: DEFAULT_TOKEN_PARAM.to_string(),
            retry_delay: DEFAULT_RETRY_DELAY,
        }
    }
}
