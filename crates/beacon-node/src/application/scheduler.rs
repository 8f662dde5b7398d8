//! Periodic announcement driver.
//!
//! [`schedule`] runs an action once immediately and then once per interval on
//! a background Tokio task until the returned [`ScheduleHandle`] is cancelled
//! or dropped.
//!
//! There is no catch-up: if the process is suspended and several intervals
//! are missed, the action fires once on wake-up and the next firing is one
//! full interval after that (`MissedTickBehavior::Delay`).

use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::{self, MissedTickBehavior};
use tracing::trace;

/// Shortest interval accepted; `tokio::time::interval` panics on zero.
const MIN_INTERVAL: Duration = Duration::from_millis(1);

/// Cancellation handle for a scheduled action.
///
/// Dropping the handle cancels the schedule.
#[derive(Debug)]
pub struct ScheduleHandle {
    cancelled: Arc<AtomicBool>,
    task: JoinHandle<()>,
}

impl ScheduleHandle {
    /// Stops the schedule.
    ///
    /// Once this returns the action will not be invoked again.  An invocation
    /// already running on another worker thread may still finish.  Calling
    /// `cancel` more than once is harmless.
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
        self.task.abort();
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }
}

impl Drop for ScheduleHandle {
    fn drop(&mut self) {
        self.cancel();
    }
}

/// Invokes `action` now and then every `interval`.
///
/// Must be called from within a Tokio runtime.
pub fn schedule<F>(interval: Duration, mut action: F) -> ScheduleHandle
where
    F: FnMut() + Send + 'static,
{
    let cancelled = Arc::new(AtomicBool::new(false));
    let flag = Arc::clone(&cancelled);
    let period = interval.max(MIN_INTERVAL);

    let task = tokio::spawn(async move {
        let mut ticker = time::interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            // The first tick completes immediately.
            ticker.tick().await;
            if flag.load(Ordering::SeqCst) {
                break;
            }
            trace!("scheduler tick");
            action();
        }
    });

    ScheduleHandle { cancelled, task }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    /// Lets spawned tasks run after the paused clock has moved.
    async fn settle() {
        for _ in 0..16 {
            tokio::task::yield_now().await;
        }
    }

    fn counting() -> (Arc<AtomicUsize>, impl FnMut() + Send + 'static) {
        let count = Arc::new(AtomicUsize::new(0));
        let c = Arc::clone(&count);
        (count, move || {
            c.fetch_add(1, Ordering::SeqCst);
        })
    }

    #[tokio::test(start_paused = true)]
    async fn test_action_fires_immediately() {
        // Arrange
        let (count, action) = counting();

        // Act
        let _handle = schedule(Duration::from_secs(5), action);
        settle().await;

        // Assert
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_action_fires_every_interval() {
        let (count, action) = counting();
        let _handle = schedule(Duration::from_secs(5), action);
        settle().await;

        for expected in 2..=4 {
            time::advance(Duration::from_secs(5)).await;
            settle().await;
            assert_eq!(count.load(Ordering::SeqCst), expected);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_missed_intervals_are_not_replayed() {
        // Arrange
        let (count, action) = counting();
        let _handle = schedule(Duration::from_secs(5), action);
        settle().await;

        // Act – jump four intervals at once
        time::advance(Duration::from_secs(20)).await;
        settle().await;

        // Assert – one late firing, not four
        assert_eq!(count.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_stops_further_firings() {
        // Arrange
        let (count, action) = counting();
        let handle = schedule(Duration::from_secs(5), action);
        settle().await;

        // Act
        handle.cancel();
        time::advance(Duration::from_secs(30)).await;
        settle().await;

        // Assert
        assert_eq!(count.load(Ordering::SeqCst), 1);
        assert!(handle.is_cancelled());
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_is_idempotent_and_drop_cancels() {
        let (count, action) = counting();
        let handle = schedule(Duration::from_secs(5), action);
        settle().await;

        handle.cancel();
        handle.cancel();
        drop(handle);
        time::advance(Duration::from_secs(10)).await;
        settle().await;

        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_zero_interval_is_clamped() {
        let (count, action) = counting();
        let handle = schedule(Duration::ZERO, action);
        settle().await;
        handle.cancel();
        assert!(count.load(Ordering::SeqCst) >= 1);
    }
}
