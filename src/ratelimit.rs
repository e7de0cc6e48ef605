//! Rate limit retry wrapper
//!
//! Every protocol call goes through [`RateLimitRetrier::execute`]. A
//! `RateLimited` answer puts the caller to sleep for the server's backoff plus
//! a small deadzone and then repeats the same call; any other answer, good or
//! bad, is returned untouched.

use crate::protocol::{ProtocolError, ProtocolResult};
use std::future::Future;
use std::time::Duration;
use tracing::{debug, warn};

/// Extra wait added to every server backoff to absorb clock skew
pub const RATE_LIMIT_DEADZONE: Duration = Duration::from_millis(50);

/// Retries protocol operations while the server keeps rate limiting them
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimitRetrier {
    deadzone: Duration,
    /// `None` retries for as long as the server keeps answering 429
    max_retries: Option<u32>,
}

impl Default for RateLimitRetrier {
    fn default() -> Self {
        Self {
            deadzone: RATE_LIMIT_DEADZONE,
            max_retries: None,
        }
    }
}

impl RateLimitRetrier {
    /// Create a retrier with a custom deadzone and optional retry cap
    #[must_use]
    pub const fn new(deadzone: Duration, max_retries: Option<u32>) -> Self {
        Self {
            deadzone,
            max_retries,
        }
    }

    /// How long to sleep for a given server backoff
    #[must_use]
    pub fn backoff(&self, retry_after_ms: u64) -> Duration {
        Duration::from_millis(retry_after_ms) + self.deadzone
    }

    /// Run `operation` until it returns something other than a rate limit
    ///
    /// # Errors
    /// Returns whatever non rate limit error the operation returns, or the
    /// last `RateLimited` error once a configured retry cap is exhausted.
    pub async fn execute<T, F, Fut>(&self, label: &str, mut operation: F) -> ProtocolResult<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = ProtocolResult<T>>,
    {
        let mut retries: u32 = 0;

        loop {
            debug!(operation = label, attempt = retries + 1, "Executing protocol call");

            match operation().await {
                Err(ProtocolError::RateLimited { retry_after_ms }) => {
                    if self.max_retries.is_some_and(|max| retries >= max) {
                        warn!(
                            operation = label,
                            retries, "Giving up after repeated rate limiting"
                        );
                        return Err(ProtocolError::RateLimited { retry_after_ms });
                    }

                    let delay = self.backoff(retry_after_ms);
                    warn!(
                        operation = label,
                        retry_after_ms,
                        delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                        "Rate limited, backing off"
                    );
                    tokio::time::sleep(delay).await;
                    retries = retries.saturating_add(1);
                }
                other => return other,
            }
        }
    }
}
