//! Time limits that never cancel the operation they guard.
//!
//! A [`TimeLimit`] races a spawned task against a deadline and an abort
//! token. Whichever wins, the task keeps running: on timeout or abort the
//! caller gets the task's [`JoinHandle`] back so it can still observe the
//! late result.

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use tokio::task::{JoinError, JoinHandle};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::error::{PoolError, PoolResult};

/// How a time-limited race ended.
#[derive(Debug)]
pub enum Race<T> {
    /// The operation settled before the deadline and before any abort.
    OnTime {
        /// The operation's own result.
        result: Result<T, JoinError>,
        /// Time from the start of the race to settlement.
        elapsed: Duration,
    },
    /// The deadline passed first. The operation is still running.
    TimedOut(JoinHandle<T>),
    /// The abort token fired first. The operation is still running.
    Aborted(JoinHandle<T>),
}

/// Races operations against a deadline and an external abort signal.
#[derive(Debug)]
pub struct TimeLimit {
    name: &'static str,
    duration: Duration,
    abort: CancellationToken,
    racing: AtomicBool,
}

impl TimeLimit {
    /// Create a time limit named after the operation it guards.
    #[must_use]
    pub fn new(name: &'static str, duration: Duration, abort: CancellationToken) -> Self {
        Self {
            name,
            duration,
            abort,
            racing: AtomicBool::new(false),
        }
    }

    /// The configured limit.
    #[must_use]
    pub fn duration(&self) -> Duration {
        self.duration
    }

    /// Abort the race in flight, or the next one if none is running.
    pub fn abort(&self) {
        self.abort.cancel();
    }

    /// Race `task` against the deadline and the abort token.
    ///
    /// Only one race may run per instance; a concurrent call is a bug.
    pub async fn restrict<T>(&self, mut task: JoinHandle<T>) -> PoolResult<Race<T>> {
        if self.racing.swap(true, Ordering::AcqRel) {
            return Err(PoolError::internal(format!(
                "time limit for {} is already racing",
                self.name
            )));
        }

        let started = Instant::now();
        let race = tokio::select! {
            biased;
            result = &mut task => Race::OnTime {
                result,
                elapsed: started.elapsed(),
            },
            () = self.abort.cancelled() => {
                tracing::debug!(operation = self.name, "operation aborted");
                Race::Aborted(task)
            }
            () = tokio::time::sleep(self.duration) => {
                tracing::warn!(
                    operation = self.name,
                    timeout_ms = self.duration.as_millis() as u64,
                    "operation timed out"
                );
                Race::TimedOut(task)
            }
        };

        self.racing.store(false, Ordering::Release);
        Ok(race)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn limit(ms: u64) -> TimeLimit {
        TimeLimit::new("test", Duration::from_millis(ms), CancellationToken::new())
    }

    #[tokio::test(start_paused = true)]
    async fn settles_on_time() {
        let task = tokio::spawn(async {
            tokio::time::sleep(Duration::from_millis(10)).await;
            "done"
        });
        match limit(100).restrict(task).await.unwrap() {
            Race::OnTime { result, elapsed } => {
                assert_eq!(result.unwrap(), "done");
                assert!(elapsed < Duration::from_millis(100));
            }
            other => panic!("unexpected race outcome: {other:?}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn timeout_leaves_the_task_running() {
        let task = tokio::spawn(async {
            tokio::time::sleep(Duration::from_millis(200)).await;
            "late"
        });
        let started = Instant::now();
        let Race::TimedOut(handle) = limit(100).restrict(task).await.unwrap() else {
            panic!("expected a timeout");
        };
        let timed_out_at = started.elapsed();
        assert!(timed_out_at >= Duration::from_millis(100));
        assert!(timed_out_at < Duration::from_millis(200));
        assert_eq!(handle.await.unwrap(), "late");
        assert!(started.elapsed() >= Duration::from_millis(200));
    }

    #[tokio::test(start_paused = true)]
    async fn abort_wins_without_cancelling() {
        let limit = limit(1_000);
        limit.abort();
        let task = tokio::spawn(async {
            tokio::time::sleep(Duration::from_millis(50)).await;
            7
        });
        let Race::Aborted(handle) = limit.restrict(task).await.unwrap() else {
            panic!("expected an abort");
        };
        assert_eq!(handle.await.unwrap(), 7);
    }
}
