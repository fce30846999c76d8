//! Bounded polling until a probe reports convergence
//!
//! The probe runs immediately and then once per retry interval until it
//! reports success, returns a fatal error, or the budget runs out. Waiting is a
//! plain `tokio::time::sleep` on the calling task, so steps that poll are
//! strictly ordered with respect to each other.

use std::future::Future;

use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::config::PollConfig;
use crate::error::{Error, ProbeError, Result};

/// Poll until `probe` yields a value
///
/// - `Ok(Some(v))` ends the wait with `v`.
/// - `Ok(None)` means "not yet".
/// - `Err(ProbeError::Transient(_))` is remembered and polling continues.
/// - `Err(ProbeError::Fatal(e))` ends the wait with `e`.
///
/// When the budget is exhausted the result is [`Error::Timeout`] carrying the
/// most recent transient error. The probe always runs at least once, and the
/// final sleep is clipped to the remaining budget.
pub async fn wait_for<T, F, Fut>(cfg: &PollConfig, what: &str, mut probe: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = std::result::Result<Option<T>, ProbeError>>,
{
    let start = Instant::now();
    let deadline = start + cfg.timeout;
    let mut attempts: u32 = 0;
    let mut last_error: Option<Error> = None;

    loop {
        attempts = attempts.saturating_add(1);

        match probe().await {
            Ok(Some(value)) => {
                info!(
                    what,
                    attempts,
                    elapsed = ?start.elapsed(),
                    "Condition met"
                );
                return Ok(value);
            }
            Ok(None) => {
                debug!(what, attempt = attempts, "Condition not met yet");
            }
            Err(ProbeError::Transient(e)) => {
                debug!(what, attempt = attempts, error = %e, "Transient error, retrying");
                last_error = Some(e);
            }
            Err(ProbeError::Fatal(e)) => {
                warn!(what, attempt = attempts, error = %e, "Fatal error, giving up");
                return Err(e);
            }
        }

        let now = Instant::now();
        if now >= deadline {
            let waited = now.duration_since(start);
            warn!(what, attempts, waited = ?waited, "Timed out waiting for condition");
            return Err(Error::Timeout {
                what: what.to_string(),
                waited,
                attempts,
                last_error: last_error.map(Box::new),
            });
        }

        tokio::time::sleep(cfg.retry_interval.min(deadline - now)).await;
    }
}

/// Poll until `probe` reports `true`
pub async fn wait_until<F, Fut>(cfg: &PollConfig, what: &str, mut probe: F) -> Result<()>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = std::result::Result<bool, ProbeError>>,
{
    wait_for(cfg, what, || {
        let fut = probe();
        async move { fut.await.map(|done| done.then_some(())) }
    })
    .await
}
