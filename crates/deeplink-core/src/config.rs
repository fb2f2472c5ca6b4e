//! SDK configuration: JSON document, then environment overrides.
//!
//! Env overrides: DEEPLINK_BRANCH_KEY, DEEPLINK_API_BASE_URL,
//! DEEPLINK_RETRY_COUNT, DEEPLINK_RETRY_INTERVAL_MS, DEEPLINK_TIMEOUT_MS.

use std::time::Duration;

use serde::Deserialize;
use url::Url;

use crate::domain::RetryPolicy;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    #[error("branch key is missing")]
    MissingBranchKey,

    #[error("branch key must start with key_live_ or key_test_, got {0:?}")]
    InvalidBranchKey(String),

    #[error("invalid api base url {url:?}: {message}")]
    InvalidBaseUrl { url: String, message: String },

    #[error("max_queue_items must be at least 1")]
    ZeroQueueCapacity,

    #[error("{field} must be greater than zero")]
    NonPositive { field: &'static str },

    #[error("retry multiplier must be a finite number of at least 1.0")]
    InvalidRetryMultiplier,

    #[error("config parse error: {0}")]
    Parse(String),
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SdkConfig {
    /// Public app key (`key_live_...` / `key_test_...`).
    #[serde(default)]
    pub branch_key: String,

    #[serde(default = "default_api_base_url")]
    pub api_base_url: String,

    #[serde(default)]
    pub retry: RetryPolicy,

    /// Per-call transport timeout.
    #[serde(default = "default_timeout", with = "duration_ms")]
    pub timeout: Duration,

    /// Window after a session starts during which close requests are ignored.
    #[serde(default = "default_keep_alive", with = "duration_ms")]
    pub keep_alive: Duration,

    /// Delay between a close request and the actual teardown.
    #[serde(default = "default_close_delay", with = "duration_ms")]
    pub close_delay: Duration,

    #[serde(default = "default_max_queue_items")]
    pub max_queue_items: usize,

    #[serde(default = "default_true")]
    pub smart_session: bool,

    #[serde(default)]
    pub debug: bool,

    /// Value of the `sdk` field on every call.
    #[serde(default = "default_sdk_tag")]
    pub sdk_tag: String,
}

fn default_api_base_url() -> String {
    "https://api.branch.io/".to_string()
}
fn default_timeout() -> Duration {
    Duration::from_millis(5500)
}
fn default_keep_alive() -> Duration {
    Duration::from_millis(2000)
}
fn default_close_delay() -> Duration {
    Duration::from_millis(500)
}
fn default_max_queue_items() -> usize {
    25
}
fn default_true() -> bool {
    true
}
fn default_sdk_tag() -> String {
    format!("rust{}", env!("CARGO_PKG_VERSION"))
}

impl Default for SdkConfig {
    fn default() -> Self {
        Self {
            branch_key: String::new(),
            api_base_url: default_api_base_url(),
            retry: RetryPolicy::default(),
            timeout: default_timeout(),
            keep_alive: default_keep_alive(),
            close_delay: default_close_delay(),
            max_queue_items: default_max_queue_items(),
            smart_session: default_true(),
            debug: false,
            sdk_tag: default_sdk_tag(),
        }
    }
}

impl SdkConfig {
    pub fn new(branch_key: impl Into<String>) -> Self {
        Self {
            branch_key: branch_key.into(),
            ..Self::default()
        }
    }

    pub fn from_json_str(raw: &str) -> Result<Self, ConfigError> {
        serde_json::from_str(raw).map_err(|e| ConfigError::Parse(e.to_string()))
    }

    /// Applies `DEEPLINK_*` environment variables on top of the current values.
    /// Unparseable numbers are ignored.
    pub fn apply_env(mut self) -> Self {
        self.apply_vars(|name| std::env::var(name).ok());
        self
    }

    fn apply_vars(&mut self, var: impl Fn(&str) -> Option<String>) {
        if let Some(key) = var("DEEPLINK_BRANCH_KEY") {
            self.branch_key = key;
        }
        if let Some(url) = var("DEEPLINK_API_BASE_URL") {
            self.api_base_url = url;
        }
        if let Some(n) = var("DEEPLINK_RETRY_COUNT").and_then(|s| s.parse::<u32>().ok()) {
            self.retry.max_retries = n;
        }
        if let Some(ms) = var("DEEPLINK_RETRY_INTERVAL_MS").and_then(|s| s.parse::<u64>().ok()) {
            self.retry.interval = Duration::from_millis(ms);
        }
        if let Some(ms) = var("DEEPLINK_TIMEOUT_MS").and_then(|s| s.parse::<u64>().ok()) {
            self.timeout = Duration::from_millis(ms);
        }
    }

    /// Fail-fast checks run by the builder.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.branch_key.is_empty() {
            return Err(ConfigError::MissingBranchKey);
        }
        if !(self.branch_key.starts_with("key_live_") || self.branch_key.starts_with("key_test_")) {
            return Err(ConfigError::InvalidBranchKey(self.branch_key.clone()));
        }
        if self.max_queue_items == 0 {
            return Err(ConfigError::ZeroQueueCapacity);
        }
        if self.timeout.is_zero() {
            return Err(ConfigError::NonPositive { field: "timeout" });
        }
        if !self.retry.has_valid_multiplier() {
            return Err(ConfigError::InvalidRetryMultiplier);
        }
        self.base_url().map(|_| ())
    }

    /// Base URL with a guaranteed trailing slash, so `join` appends paths.
    pub fn base_url(&self) -> Result<Url, ConfigError> {
        let mut raw = self.api_base_url.clone();
        if !raw.ends_with('/') {
            raw.push('/');
        }
        Url::parse(&raw).map_err(|e| ConfigError::InvalidBaseUrl {
            url: self.api_base_url.clone(),
            message: e.to_string(),
        })
    }
}

/// Serde helper: `Duration` as integer milliseconds.
pub mod duration_ms {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        u64::deserialize(d).map(Duration::from_millis)
    }
}
