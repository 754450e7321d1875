//! Retry primitives for the payment ledger

use crate::{error::Conflict, Error, Result};
use prometheus::IntCounter;
use std::future::Future;
use tracing::warn;

/// Run `op` until it stops losing numbering races.
///
/// `op` receives the 1-based attempt. Only [`Conflict::PaymentNumber`] is
/// retried; any other outcome is returned as is. After `max_attempts` the
/// last numbering conflict is returned.
pub async fn retry_numbering<T, F, Fut>(
    max_attempts: u32,
    retries: &IntCounter,
    mut op: F,
) -> Result<T>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let max_attempts = max_attempts.max(1);
    let mut attempt = 1;

    loop {
        match op(attempt).await {
            Err(Error::Conflict(Conflict::PaymentNumber { username, number }))
                if attempt < max_attempts =>
            {
                warn!(%username, number, attempt, "Lost numbering race, retrying");
                retries.inc();
                attempt += 1;
            }
            other => return other,
        }
    }
}
