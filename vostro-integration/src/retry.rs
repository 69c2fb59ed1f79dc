use std::fmt::Display;
use tracing::warn;

/// Classifies an error as worth re-attempting (network blip, nonce
/// desync) or terminal for the current cycle.
pub trait Retryable {
    fn is_retryable(&self) -> bool;
}

/// Invoke `op` up to `attempts` times while it fails with a retryable
/// error. The final error is returned untouched.
///
/// Only wrap calls that are safe to repeat: read-only venue queries and
/// cancels. Order submission must never go through here.
pub fn with_retry<T, E, F>(attempts: usize, mut op: F) -> Result<T, E>
where
    E: Retryable + Display,
    F: FnMut() -> Result<T, E>,
{
    let mut attempt = 1;
    loop {
        match op() {
            Ok(value) => return Ok(value),
            Err(error) if attempt < attempts && error.is_retryable() => {
                warn!(%error, attempt, attempts, "retryable error, re-attempting");
                attempt += 1;
            }
            Err(error) => return Err(error),
        }
    }
}
