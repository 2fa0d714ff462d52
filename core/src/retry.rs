//! Bounded retry loop around a single transport attempt.

use tracing::{error, info, warn};
use uuid::Uuid;

use crate::error::TransportError;

pub const DEFAULT_MAX_ATTEMPTS: u32 = 5;

/// Retries timeouts up to `max_attempts` total attempts.
///
/// Only `TransportError::Timeout` is retried. Any other error ends the loop
/// on first occurrence.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    max_attempts: u32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
        }
    }
}

impl RetryPolicy {
    /// `max_attempts` of zero is raised to one: a request is always tried.
    pub fn new(max_attempts: u32) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
        }
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Run `attempt` until it succeeds, fails with a non-timeout error, or
    /// the attempt budget is spent.
    ///
    /// Returns `Ok(Some(_))` on success, `Ok(None)` when every attempt timed
    /// out, and `Err(_)` for the first non-timeout failure.
    pub fn run<T, F>(&self, url: &str, request_id: Uuid, mut attempt: F) -> Result<Option<T>, TransportError>
    where
        F: FnMut() -> Result<T, TransportError>,
    {
        info!(%request_id, url, "start to crawl");
        let mut retries = 0;
        while retries < self.max_attempts {
            match attempt() {
                Ok(value) => {
                    info!(%request_id, url, attempt = retries + 1, "crawl succeeded");
                    return Ok(Some(value));
                }
                Err(TransportError::Timeout) => {
                    warn!(%request_id, url, retries, "crawl timed out");
                    retries += 1;
                }
                Err(err) => {
                    warn!(%request_id, url, error = %err, "crawl failed, not retrying");
                    return Err(err);
                }
            }
        }
        error!(%request_id, url, attempts = self.max_attempts, "crawl gave up after max retries");
        Ok(None)
    }
}
