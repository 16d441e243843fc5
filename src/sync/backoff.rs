use crate::backend::BackendError;
use std::future::Future;
use std::time::Duration;

/// Extra second slept on top of the backend's Retry-After.
const RETRY_AFTER_PADDING: Duration = Duration::from_secs(1);

/// Sleep-and-retry handling for rate-limit responses.
///
/// Rate limits are retried without an attempt limit; every other error is
/// returned to the caller on first sight.
#[derive(Debug, Clone, Copy)]
pub struct RateLimitBackoff {
    fallback: Duration,
    max_wait: Option<Duration>,
}

impl RateLimitBackoff {
    pub fn new(fallback: Duration, max_wait: Option<Duration>) -> Self {
        Self { fallback, max_wait }
    }

    /// How long to sleep for a given Retry-After hint.
    pub fn wait_for(&self, retry_after: Option<Duration>) -> Duration {
        let wait = retry_after
            .unwrap_or(self.fallback)
            .saturating_add(RETRY_AFTER_PADDING);
        match self.max_wait {
            Some(cap) => wait.min(cap),
            None => wait,
        }
    }

    /// Run `operation` until it returns anything other than a rate-limit error.
    pub async fn retry<F, Fut, T>(&self, context: &str, mut operation: F) -> Result<T, BackendError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, BackendError>>,
    {
        let mut attempts = 0u32;

        loop {
            match operation().await {
                Err(BackendError::RateLimited { retry_after }) => {
                    attempts += 1;
                    let wait = self.wait_for(retry_after);
                    tracing::warn!(
                        context,
                        attempt = attempts,
                        retry_after_secs = retry_after.map(|d| d.as_secs()),
                        wait_secs = wait.as_secs_f64(),
                        "Rate limited, sleeping before retry"
                    );
                    tokio::time::sleep(wait).await;
                }
                other => return other,
            }
        }
    }
}

impl Default for RateLimitBackoff {
    fn default() -> Self {
        Self::new(Duration::from_secs(60), None)
    }
}
