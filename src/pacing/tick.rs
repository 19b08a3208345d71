//! Periodic tick sources
//!
//! The scheduler registers once when its first channel starts and
//! unregisters when the last one ends. On real hardware the callback is
//! driven by the vsync interrupt; [`IntervalTicker`] stands in with a tokio
//! interval task.

use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use super::frame::ChannelId;

/// Callback invoked once per display refresh
pub type TickCallback = Arc<dyn Fn() + Send + Sync>;

/// Periodic driver for the dispatcher
pub trait TickSource: Send + Sync {
    /// Start invoking `callback` every refresh interval
    ///
    /// `channel` is the channel whose start caused the registration.
    fn subscribe(&self, channel: ChannelId, callback: TickCallback);

    /// Stop invoking the callback
    fn unsubscribe(&self, channel: ChannelId);
}

/// Tick source backed by `tokio::time::interval`
pub struct IntervalTicker {
    period: Duration,
    runtime: Option<Handle>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl IntervalTicker {
    /// Create a ticker firing every `period`
    ///
    /// Captures the current tokio runtime when there is one; otherwise the
    /// runtime of the caller of `subscribe` is used.
    pub fn new(period: Duration) -> Self {
        Self {
            period,
            runtime: Handle::try_current().ok(),
            task: Mutex::new(None),
        }
    }

    /// Tick period
    pub fn period(&self) -> Duration {
        self.period
    }

    /// Whether the interval task is running
    pub fn is_active(&self) -> bool {
        self.task
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .is_some_and(|task| !task.is_finished())
    }
}

impl TickSource for IntervalTicker {
    fn subscribe(&self, channel: ChannelId, callback: TickCallback) {
        let Some(runtime) = self.runtime.clone().or_else(|| Handle::try_current().ok()) else {
            tracing::error!(channel = %channel, "No tokio runtime for tick task");
            return;
        };

        let mut task = self.task.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(previous) = task.take() {
            previous.abort();
        }

        let period = self.period;
        *task = Some(runtime.spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            loop {
                ticker.tick().await;
                callback();
            }
        }));

        tracing::debug!(
            channel = %channel,
            period_us = period.as_micros() as u64,
            "Tick task started"
        );
    }

    fn unsubscribe(&self, channel: ChannelId) {
        if let Some(task) = self
            .task
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
        {
            task.abort();
            tracing::debug!(channel = %channel, "Tick task stopped");
        }
    }
}

impl Drop for IntervalTicker {
    fn drop(&mut self) {
        if let Some(task) = self
            .task
            .get_mut()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
        {
            task.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test(start_paused = true)]
    async fn test_interval_ticker_fires_until_unsubscribed() {
        let ticker = IntervalTicker::new(Duration::from_millis(16));
        let count = Arc::new(AtomicUsize::new(0));

        let counter = Arc::clone(&count);
        ticker.subscribe(
            ChannelId::MAIN,
            Arc::new(move || {
                counter.fetch_add(1, Ordering::SeqCst);
            }),
        );
        assert!(ticker.is_active());

        tokio::time::sleep(Duration::from_millis(100)).await;
        let fired = count.load(Ordering::SeqCst);
        assert!(fired >= 6, "fired {} times", fired);

        ticker.unsubscribe(ChannelId::MAIN);
        tokio::task::yield_now().await;
        assert!(!ticker.is_active());

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(count.load(Ordering::SeqCst), fired);
    }
}
