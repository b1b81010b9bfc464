//! Polling helper for waits on cluster state

use std::future::Future;
use std::time::Duration;

use tokio::time::Instant;
use tracing::trace;

use crate::{Error, Result};

/// Poll `check_fn` until it returns `Ok(true)` or `timeout` elapses.
///
/// `Ok(false)` and retryable errors keep polling. A non-retryable error ends
/// the wait immediately, so a pod that has already failed does not burn the
/// whole timeout. On timeout the last error seen (if any) is included.
pub async fn poll_until<F, Fut>(
    operation: &str,
    timeout: Duration,
    poll_interval: Duration,
    timeout_msg: impl Into<String>,
    mut check_fn: F,
) -> Result<()>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<bool>>,
{
    let deadline = Instant::now() + timeout;
    let timeout_msg = timeout_msg.into();
    let mut last_error: Option<String> = None;

    loop {
        match check_fn().await {
            Ok(true) => return Ok(()),
            Ok(false) => trace!(operation, "Condition not yet met"),
            Err(e) if e.is_retryable() => {
                trace!(operation, error = %e, "Polling check returned error (retrying)");
                last_error = Some(e.to_string());
            }
            Err(e) => return Err(e),
        }

        if Instant::now() + poll_interval > deadline {
            return Err(Error::timeout(
                operation,
                match last_error {
                    Some(err) => format!("{timeout_msg} (last error: {err})"),
                    None => timeout_msg,
                },
            ));
        }

        tokio::time::sleep(poll_interval).await;
    }
}
