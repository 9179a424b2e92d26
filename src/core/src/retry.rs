//! Bounded retry for container runtime calls.

use std::future::Future;
use std::time::Duration;

use crate::error::Result;

/// Attempts made before giving up.
pub const ATTEMPTS: usize = 6;

/// Delay between attempts.
pub const DELAY: Duration = Duration::from_millis(150);

/// Run `op` up to [`ATTEMPTS`] times, sleeping [`DELAY`] between attempts,
/// returning the first success or the last error.
pub async fn retry<T, F, Fut>(what: &str, mut op: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let mut err = match op().await {
        Ok(value) => return Ok(value),
        Err(err) => err,
    };
    for attempt in 1..ATTEMPTS {
        tracing::warn!("retry {attempt}/{} for {what}: {err}", ATTEMPTS - 1);
        tokio::time::sleep(DELAY).await;
        match op().await {
            Ok(value) => return Ok(value),
            Err(e) => err = e,
        }
    }
    Err(err)
}
