use std::future::Future;
use std::time::Duration;

use tokio::time::Instant;

use crate::error::{Error, Result};

/// Read and write deadlines currently armed on a connection
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Deadlines {
    pub read: Option<Instant>,
    pub write: Option<Instant>,
}

impl Deadlines {
    pub fn set(&mut self, deadline: Option<Instant>) {
        self.read = deadline;
        self.write = deadline;
    }
}

// Roughly 30 years, the same horizon tokio clamps its own timeouts to.
const FAR_FUTURE: Duration = Duration::from_secs(86400 * 365 * 30);

/// Absolute instant `timeout` from now
///
/// Timeouts too large to represent are clamped to a far-future instant.
pub fn deadline_in(timeout: Duration) -> Instant {
    let now = Instant::now();
    now.checked_add(timeout).unwrap_or_else(|| now + FAR_FUTURE)
}

/// Absolute deadline `timeout` from now, or none for a zero timeout
pub fn after(timeout: Duration) -> Option<Instant> {
    (!timeout.is_zero()).then(|| deadline_in(timeout))
}

/// Run `op`, failing with [`Error::DeadlineExceeded`] once `deadline` passes.
///
/// An already elapsed deadline fails without polling `op`.
pub async fn run_until<F, T>(deadline: Option<Instant>, op: F) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    match deadline {
        Some(at) => {
            if Instant::now() >= at {
                return Err(Error::DeadlineExceeded);
            }
            tokio::time::timeout_at(at, op)
                .await
                .map_err(|_| Error::DeadlineExceeded)?
        }
        None => op.await,
    }
}

/// Relative-timeout flavour of [`run_until`], used for dialing.
pub async fn run_within<F, T>(timeout: Option<Duration>, op: F) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    match timeout {
        Some(timeout) => tokio::time::timeout(timeout, op)
            .await
            .map_err(|_| Error::DeadlineExceeded)?,
        None => op.await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn elapsed_deadline_fails_without_polling() {
        let at = Instant::now();
        tokio::time::advance(Duration::from_millis(1)).await;

        let result = run_until(Some(at), async { Ok::<_, Error>(7) }).await;
        assert!(matches!(result, Err(Error::DeadlineExceeded)));
    }

    #[tokio::test(start_paused = true)]
    async fn pending_op_times_out() {
        let at = Instant::now() + Duration::from_millis(50);
        let result: Result<()> = run_until(Some(at), std::future::pending()).await;
        assert!(matches!(result, Err(Error::DeadlineExceeded)));
    }

    #[test]
    fn zero_timeout_has_no_deadline() {
        assert_eq!(after(Duration::ZERO), None);
    }

    #[tokio::test(start_paused = true)]
    async fn huge_timeout_is_clamped() {
        let now = Instant::now();
        assert_eq!(after(Duration::MAX), Some(now + FAR_FUTURE));
        assert_eq!(deadline_in(Duration::from_secs(5)), now + Duration::from_secs(5));

        let result = run_until(after(Duration::MAX), async { Ok::<_, Error>(7) }).await;
        assert_eq!(result.unwrap(), 7);
    }
}
