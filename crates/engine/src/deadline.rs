//! Explicit deadlines for database I/O
//!
//! A [`Deadline`] is threaded through every call that may suspend. Child
//! deadlines never outlive their parent, so an operation started late in a
//! unit gets whatever budget the unit has left.

use std::future::Future;
use std::time::Duration;
use tokio::time::Instant;

use crate::error::{MigrateError, MigrateResult};

/// Point in time after which an operation is abandoned
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Deadline {
    at: Instant,
}

impl Deadline {
    /// Deadline `timeout` from now
    pub fn after(timeout: Duration) -> Self {
        Self {
            at: Instant::now() + timeout,
        }
    }

    /// Derive a deadline `timeout` from now, clipped to this one
    pub fn child(&self, timeout: Duration) -> Self {
        Self {
            at: self.at.min(Instant::now() + timeout),
        }
    }

    /// The instant this deadline expires at
    pub fn instant(&self) -> Instant {
        self.at
    }

    /// Time left before expiry, zero once expired
    pub fn remaining(&self) -> Duration {
        self.at.saturating_duration_since(Instant::now())
    }

    pub fn is_expired(&self) -> bool {
        Instant::now() >= self.at
    }

    /// Run `fut` until it completes or the deadline passes.
    ///
    /// Expiry is reported as [`MigrateError::DeadlineExceeded`] naming
    /// `operation`; there is no separate cancellation path.
    pub async fn run<T, F>(&self, operation: &str, fut: F) -> MigrateResult<T>
    where
        F: Future<Output = MigrateResult<T>>,
    {
        match tokio::time::timeout_at(self.at, fut).await {
            Ok(result) => result,
            Err(_) => Err(MigrateError::DeadlineExceeded {
                operation: operation.to_string(),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_child_is_clipped_to_parent() {
        let parent = Deadline::after(Duration::from_secs(2));
        let child = parent.child(Duration::from_secs(10));
        assert_eq!(child.instant(), parent.instant());

        let short = parent.child(Duration::from_secs(1));
        assert!(short.instant() < parent.instant());
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_completes_within_deadline() {
        let deadline = Deadline::after(Duration::from_secs(1));
        let value = deadline.run("compute", async { Ok(42) }).await.unwrap();
        assert_eq!(value, 42);
        assert!(!deadline.is_expired());
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_reports_expiry() {
        let deadline = Deadline::after(Duration::from_millis(100));
        let result: MigrateResult<()> = deadline
            .run("sleep past the deadline", async {
                tokio::time::sleep(Duration::from_secs(5)).await;
                Ok(())
            })
            .await;

        match result {
            Err(MigrateError::DeadlineExceeded { operation }) => {
                assert_eq!(operation, "sleep past the deadline");
            }
            other => panic!("Expected deadline error, got {:?}", other),
        }
        assert!(deadline.is_expired());
        assert_eq!(deadline.remaining(), Duration::ZERO);
    }

    #[tokio::test(start_paused = true)]
    async fn test_inner_error_passes_through() {
        let deadline = Deadline::after(Duration::from_secs(1));
        let result: MigrateResult<()> = deadline
            .run("fail", async { Err(MigrateError::database("boom")) })
            .await;
        assert!(matches!(result, Err(MigrateError::Database { .. })));
    }
}
