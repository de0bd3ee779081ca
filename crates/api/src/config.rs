//! API configuration loaded from the environment.

use std::net::SocketAddr;
use std::time::Duration;

use medrelay_queue::RetryPolicy;
use thiserror::Error;

/// Hosted chat backend used when `CHAT_BACKEND_URL` is unset.
pub const DEFAULT_CHAT_BACKEND_URL: &str = "https://medication-assistant-backend.vercel.app";
/// Local image analysis backend used when `ANALYSIS_BACKEND_URL` is unset.
pub const DEFAULT_ANALYSIS_BACKEND_URL: &str = "http://127.0.0.1:5000";
/// OpenAI-compatible API used for question memory when `MEMORY_API_URL` is unset.
pub const DEFAULT_MEMORY_API_URL: &str = "https://api.openai.com/v1";

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("{name} is not a valid socket address: {value}")]
    InvalidAddr { name: &'static str, value: String },
    #[error("{name} must be a positive number of seconds, got {value}")]
    InvalidSeconds { name: &'static str, value: String },
    #[error("{name} must be an http(s) url, got {value}")]
    InvalidUrl { name: &'static str, value: String },
}

#[derive(Debug, Clone)]
pub struct ApiConfig {
    pub bind_addr: SocketAddr,
    /// Base url of the streaming chat backend (`/api/chat/stream` is appended).
    pub chat_backend_url: String,
    /// Base url of the image analysis backend (`/api/calculator` and
    /// `/api/health` are appended).
    pub analysis_backend_url: String,
    /// Embedding and summary API for question memory, version segment included.
    pub memory_api_url: String,
    /// Bearer token for the memory API (`OPENAI_API_KEY`).
    pub memory_api_key: Option<String>,
    /// Feedback and question memory go to Postgres when set, to in-memory
    /// stores otherwise.
    pub database_url: Option<String>,
    /// Bound on every outbound request, streamed bodies included.
    pub upstream_timeout: Duration,
    /// Retry policy for feedback writes.
    pub feedback_retry: RetryPolicy,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from(([0, 0, 0, 0], 8080)),
            chat_backend_url: DEFAULT_CHAT_BACKEND_URL.to_string(),
            analysis_backend_url: DEFAULT_ANALYSIS_BACKEND_URL.to_string(),
            memory_api_url: DEFAULT_MEMORY_API_URL.to_string(),
            memory_api_key: None,
            database_url: None,
            upstream_timeout: Duration::from_secs(300),
            feedback_retry: RetryPolicy::exponential(
                3,
                Duration::from_secs(1),
                Duration::from_secs(4),
            ),
        }
    }
}

impl ApiConfig {
    /// Read `BIND_ADDR`, `CHAT_BACKEND_URL`, `ANALYSIS_BACKEND_URL`,
    /// `MEMORY_API_URL`, `OPENAI_API_KEY`, `DATABASE_URL` and
    /// `UPSTREAM_TIMEOUT_SECS`.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Like [`from_env`](Self::from_env) with a custom variable source.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        let mut config = Self::default();

        if let Some(value) = get("BIND_ADDR") {
            config.bind_addr = value.trim().parse().map_err(|_| ConfigError::InvalidAddr {
                name: "BIND_ADDR",
                value: value.clone(),
            })?;
        }
        if let Some(value) = get("CHAT_BACKEND_URL") {
            config.chat_backend_url = parse_base_url("CHAT_BACKEND_URL", &value)?;
        }
        if let Some(value) = get("ANALYSIS_BACKEND_URL") {
            config.analysis_backend_url = parse_base_url("ANALYSIS_BACKEND_URL", &value)?;
        }
        if let Some(value) = get("MEMORY_API_URL") {
            config.memory_api_url = parse_base_url("MEMORY_API_URL", &value)?;
        }
        config.memory_api_key = get("OPENAI_API_KEY").map(|k| k.trim().to_string());
        config.database_url = get("DATABASE_URL");
        if let Some(value) = get("UPSTREAM_TIMEOUT_SECS") {
            let secs: u64 = value
                .trim()
                .parse()
                .ok()
                .filter(|s| *s > 0)
                .ok_or_else(|| ConfigError::InvalidSeconds {
                    name: "UPSTREAM_TIMEOUT_SECS",
                    value: value.clone(),
                })?;
            config.upstream_timeout = Duration::from_secs(secs);
        }

        Ok(config)
    }

    pub fn with_chat_backend(mut self, url: impl Into<String>) -> Self {
        self.chat_backend_url = url.into();
        self
    }

    pub fn with_analysis_backend(mut self, url: impl Into<String>) -> Self {
        self.analysis_backend_url = url.into();
        self
    }

    pub fn with_memory_api(mut self, url: impl Into<String>) -> Self {
        self.memory_api_url = url.into();
        self
    }

    pub fn with_upstream_timeout(mut self, timeout: Duration) -> Self {
        self.upstream_timeout = timeout;
        self
    }

    pub fn with_feedback_retry(mut self, policy: RetryPolicy) -> Self {
        self.feedback_retry = policy;
        self
    }

    pub fn chat_stream_url(&self) -> String {
        format!("{}/api/chat/stream", self.chat_backend_url)
    }

    pub fn analysis_url(&self) -> String {
        format!("{}/api/calculator", self.analysis_backend_url)
    }

    pub fn analysis_health_url(&self) -> String {
        format!("{}/api/health", self.analysis_backend_url)
    }
}

fn parse_base_url(name: &'static str, value: &str) -> Result<String, ConfigError> {
    let trimmed = value.trim().trim_end_matches('/');
    if trimmed.starts_with("http://") || trimmed.starts_with("https://") {
        Ok(trimmed.to_string())
    } else {
        Err(ConfigError::InvalidUrl {
            name,
            value: value.to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn defaults_when_nothing_is_set() {
        let config = ApiConfig::from_lookup(lookup(&[])).unwrap();
        assert_eq!(config.bind_addr.port(), 8080);
        assert_eq!(config.analysis_url(), "http://127.0.0.1:5000/api/calculator");
        assert_eq!(config.upstream_timeout, Duration::from_secs(300));
        assert!(config.database_url.is_none());
        assert_eq!(config.feedback_retry.total_attempts(), 3);
        assert_eq!(config.memory_api_url, "https://api.openai.com/v1");
        assert!(config.memory_api_key.is_none());
    }

    #[test]
    fn reads_memory_api_settings() {
        let config = ApiConfig::from_lookup(lookup(&[
            ("MEMORY_API_URL", "http://llm.local:8000/v1/"),
            ("OPENAI_API_KEY", " sk-test "),
        ]))
        .unwrap();
        assert_eq!(config.memory_api_url, "http://llm.local:8000/v1");
        assert_eq!(config.memory_api_key.as_deref(), Some("sk-test"));

        let err = ApiConfig::from_lookup(lookup(&[("MEMORY_API_URL", "llm.local")])).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidUrl { name: "MEMORY_API_URL", .. }));
    }

    #[test]
    fn reads_overrides() {
        let config = ApiConfig::from_lookup(lookup(&[
            ("BIND_ADDR", "127.0.0.1:9000"),
            ("CHAT_BACKEND_URL", "http://chat.local/"),
            ("DATABASE_URL", "postgres://localhost/feedback"),
            ("UPSTREAM_TIMEOUT_SECS", "30"),
        ]))
        .unwrap();

        assert_eq!(config.bind_addr, "127.0.0.1:9000".parse().unwrap());
        assert_eq!(config.chat_stream_url(), "http://chat.local/api/chat/stream");
        assert_eq!(config.database_url.as_deref(), Some("postgres://localhost/feedback"));
        assert_eq!(config.upstream_timeout, Duration::from_secs(30));
    }

    #[test]
    fn blank_database_url_means_in_memory() {
        let config = ApiConfig::from_lookup(lookup(&[("DATABASE_URL", "  ")])).unwrap();
        assert!(config.database_url.is_none());
    }

    #[test]
    fn rejects_malformed_values() {
        let err = ApiConfig::from_lookup(lookup(&[("BIND_ADDR", "nope")])).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidAddr { .. }));

        let err = ApiConfig::from_lookup(lookup(&[("UPSTREAM_TIMEOUT_SECS", "0")])).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidSeconds { .. }));

        let err = ApiConfig::from_lookup(lookup(&[("CHAT_BACKEND_URL", "ftp://x")])).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidUrl { .. }));
    }
}
