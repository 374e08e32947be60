//! Retry policy for transient I/O failures.
//!
//! A fallible async operation is run up to [`RetryPolicy::max_attempts`]
//! times. Between attempts the policy sleeps an exponentially growing delay
//! plus uniform jitter, so concurrently failing file operations do not all
//! re-contend for the same lock at the same instant. Only failures on the
//! transient allow-list are retried; everything else propagates unchanged.

use anyhow::Result;
use rand::Rng;
use std::fmt;
use std::future::Future;
use std::io;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Control signal for cooperative shutdown. Not an I/O failure: it unwinds
/// the whole run and is reported distinctly from errors.
#[derive(Debug, Clone, Copy)]
pub struct Cancelled;

impl fmt::Display for Cancelled {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("operation cancelled")
    }
}

impl std::error::Error for Cancelled {}

/// Whether `err` carries the [`Cancelled`] control signal anywhere in its
/// chain.
pub fn is_cancelled(err: &anyhow::Error) -> bool {
    err.chain()
        .any(|cause| cause.downcast_ref::<Cancelled>().is_some())
}

/// Error kinds worth retrying: lock or sharing contention, a connection or
/// name torn down mid-operation, and timeout-style conditions.
const TRANSIENT_KINDS: &[io::ErrorKind] = &[
    io::ErrorKind::WouldBlock,
    io::ErrorKind::TimedOut,
    io::ErrorKind::Interrupted,
    io::ErrorKind::ResourceBusy,
    io::ErrorKind::ConnectionReset,
    io::ErrorKind::ConnectionAborted,
    io::ErrorKind::BrokenPipe,
];

/// Raw OS codes without a stable `ErrorKind` mapping.
#[cfg(windows)]
const TRANSIENT_OS_CODES: &[i32] = &[
    32,   // ERROR_SHARING_VIOLATION
    33,   // ERROR_LOCK_VIOLATION
    1224, // ERROR_USER_MAPPED_FILE
];
#[cfg(unix)]
const TRANSIENT_OS_CODES: &[i32] = &[
    16,  // EBUSY
    26,  // ETXTBSY
    116, // ESTALE
];

/// Whether `err` chains to an I/O failure on the transient allow-list.
pub fn is_transient(err: &anyhow::Error) -> bool {
    err.chain().any(|cause| {
        cause.downcast_ref::<io::Error>().is_some_and(|io_err| {
            TRANSIENT_KINDS.contains(&io_err.kind())
                || io_err
                    .raw_os_error()
                    .is_some_and(|code| TRANSIENT_OS_CODES.contains(&code))
        })
    })
}

/// Backoff parameters for retrying transient failures.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    /// Total attempts, including the first.
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub multiplier: u32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            base_delay: Duration::from_millis(250),
            multiplier: 2,
        }
    }
}

impl RetryPolicy {
    /// Delay before retry number `attempt` (0-based): `base * multiplier^attempt`
    /// plus uniform jitter of up to a quarter of that delay.
    fn backoff(&self, attempt: u32) -> Duration {
        let delay = self
            .base_delay
            .saturating_mul(self.multiplier.saturating_pow(attempt));
        let jitter_cap = (delay / 4).as_millis() as u64;
        let jitter = if jitter_cap == 0 {
            0
        } else {
            rand::thread_rng().gen_range(0..=jitter_cap)
        };
        delay + Duration::from_millis(jitter)
    }

    /// Run `op`, retrying transient failures with backoff and jitter.
    ///
    /// Permanent failures and attempt exhaustion propagate the last error
    /// unchanged. Cancellation, whether requested during the operation or
    /// during a backoff sleep, aborts the loop immediately.
    pub async fn run<T, F, Fut>(&self, cancel: &CancellationToken, mut op: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let mut attempt: u32 = 0;
        loop {
            if cancel.is_cancelled() {
                return Err(Cancelled.into());
            }
            match op().await {
                Ok(value) => return Ok(value),
                Err(err) => {
                    if is_cancelled(&err) {
                        return Err(err);
                    }
                    attempt += 1;
                    if attempt >= self.max_attempts || !is_transient(&err) {
                        return Err(err);
                    }
                    let delay = self.backoff(attempt - 1);
                    debug!(
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %format!("{err:#}"),
                        "transient failure, backing off"
                    );
                    tokio::select! {
                        _ = tokio::time::sleep(delay) => {}
                        _ = cancel.cancelled() => return Err(Cancelled.into()),
                    }
                }
            }
        }
    }
}
