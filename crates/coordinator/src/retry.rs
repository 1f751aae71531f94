//! Bounded exponential backoff for transient store errors.

use darkroom_core::config::RetryPolicy;
use std::fmt::Display;
use std::future::Future;

/// Run `op` up to `policy.max_attempts` times, sleeping between attempts
/// per the policy's backoff schedule. Returns the first success or the
/// last error.
pub async fn with_backoff<T, E, F, Fut>(
    policy: &RetryPolicy,
    operation: &str,
    mut op: F,
) -> Result<T, E>
where
    E: Display,
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
{
    let attempts = policy.max_attempts.max(1);
    let mut last_err = None;

    for attempt in 1..=attempts {
        match op().await {
            Ok(value) => return Ok(value),
            Err(err) => {
                if attempt < attempts {
                    let delay = policy.delay_for(attempt);
                    tracing::warn!(
                        operation,
                        attempt,
                        max_attempts = attempts,
                        delay_ms = delay.as_millis() as u64,
                        error = %err,
                        "Retrying after transient failure"
                    );
                    tokio::time::sleep(delay).await;
                } else {
                    tracing::warn!(
                        operation,
                        attempt,
                        error = %err,
                        "Giving up after final attempt"
                    );
                }
                last_err = Some(err);
            }
        }
    }

    // attempts >= 1, so at least one iteration ran
    Err(last_err.unwrap_or_else(|| unreachable!("retry loop ran zero attempts")))
}
