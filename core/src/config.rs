//! Dispatcher and transport configuration.
//!
//! Both structs deserialize from JSON with every field optional; missing
//! fields take the defaults below.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::FetchError;
use crate::retry::DEFAULT_MAX_ATTEMPTS;

pub const DEFAULT_MAX_IN_FLIGHT: usize = 5;
pub const DEFAULT_TIMEOUT_MS: u64 = 10_000;
pub const DEFAULT_BODY_LIMIT: u64 = 10 * 1024 * 1024;

/// Concurrency and retry limits for a `Dispatcher`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DispatcherConfig {
    /// Maximum asynchronous requests running a transport call at once.
    pub max_in_flight: usize,
    /// Total attempts per request, counting the first.
    pub max_attempts: u32,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            max_in_flight: DEFAULT_MAX_IN_FLIGHT,
            max_attempts: DEFAULT_MAX_ATTEMPTS,
        }
    }
}

impl DispatcherConfig {
    pub fn from_json(raw: &str) -> Result<Self, FetchError> {
        let config: Self = serde_json::from_str(raw).map_err(|e| FetchError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), FetchError> {
        if self.max_in_flight == 0 {
            return Err(FetchError::Config("max_in_flight must be at least 1".into()));
        }
        if self.max_attempts == 0 {
            return Err(FetchError::Config("max_attempts must be at least 1".into()));
        }
        Ok(())
    }
}

/// Defaults applied by `UreqTransport` to every request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TransportConfig {
    /// Per-attempt timeout in milliseconds. `None` waits forever.
    pub timeout_ms: Option<u64>,
    /// Proxy URL: `http://`, `https://`, `socks4://` or `socks5://`.
    pub proxy: Option<String>,
    pub user_agent: Option<String>,
    pub default_headers: Vec<(String, String)>,
    /// Largest response body read, in bytes. A longer body fails the
    /// attempt with a non-timeout error.
    pub body_limit: u64,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            timeout_ms: Some(DEFAULT_TIMEOUT_MS),
            proxy: None,
            user_agent: None,
            default_headers: Vec::new(),
            body_limit: DEFAULT_BODY_LIMIT,
        }
    }
}

impl TransportConfig {
    pub fn from_json(raw: &str) -> Result<Self, FetchError> {
        let config: Self = serde_json::from_str(raw).map_err(|e| FetchError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), FetchError> {
        if self.timeout_ms == Some(0) {
            return Err(FetchError::Config("timeout_ms must be greater than 0".into()));
        }
        if self.body_limit == 0 {
            return Err(FetchError::Config("body_limit must be greater than 0".into()));
        }
        if let Some(proxy) = &self.proxy {
            if proxy.trim().is_empty() {
                return Err(FetchError::Config("proxy must not be empty".into()));
            }
        }
        Ok(())
    }

    pub fn timeout(&self) -> Option<Duration> {
        self.timeout_ms.map(Duration::from_millis)
    }
}
