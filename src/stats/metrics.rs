//! Per-channel pacing statistics

use std::sync::atomic::{AtomicU64, Ordering};

/// Counters updated from the producer and tick contexts
#[derive(Debug, Default)]
pub struct ChannelCounters {
    pub(crate) pushed: AtomicU64,
    pub(crate) dispatched: AtomicU64,
    pub(crate) fields: AtomicU64,
    pub(crate) superseded: AtomicU64,
    pub(crate) dropped: AtomicU64,
    pub(crate) flushes: AtomicU64,
    pub(crate) clock_adjustments: AtomicU64,
    pub(crate) clock_resets: AtomicU64,
    pub(crate) backpressure_waits: AtomicU64,
}

impl ChannelCounters {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn add(counter: &AtomicU64, n: u64) {
        counter.fetch_add(n, Ordering::Relaxed);
    }

    /// Copy the counters out
    pub fn snapshot(&self) -> ChannelStats {
        ChannelStats {
            pushed: self.pushed.load(Ordering::Relaxed),
            dispatched: self.dispatched.load(Ordering::Relaxed),
            fields: self.fields.load(Ordering::Relaxed),
            superseded: self.superseded.load(Ordering::Relaxed),
            dropped: self.dropped.load(Ordering::Relaxed),
            flushes: self.flushes.load(Ordering::Relaxed),
            clock_adjustments: self.clock_adjustments.load(Ordering::Relaxed),
            clock_resets: self.clock_resets.load(Ordering::Relaxed),
            backpressure_waits: self.backpressure_waits.load(Ordering::Relaxed),
        }
    }

    /// Zero every counter
    pub fn reset(&self) {
        for counter in [
            &self.pushed,
            &self.dispatched,
            &self.fields,
            &self.superseded,
            &self.dropped,
            &self.flushes,
            &self.clock_adjustments,
            &self.clock_resets,
            &self.backpressure_waits,
        ] {
            counter.store(0, Ordering::Relaxed);
        }
    }
}

/// Snapshot of a channel's counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ChannelStats {
    /// Frames accepted by `push`
    pub pushed: u64,
    /// Display calls made (frames and fields)
    pub dispatched: u64,
    /// Of which were deinterlaced fields
    pub fields: u64,
    /// Due frames dropped because a later due frame replaced them
    pub superseded: u64,
    /// Frames discarded without display (skip mode, invalid, flushed)
    pub dropped: u64,
    /// Full ring flushes
    pub flushes: u64,
    /// Gradual clock corrections
    pub clock_adjustments: u64,
    /// Hard clock resets
    pub clock_resets: u64,
    /// Pushes that had to wait for space
    pub backpressure_waits: u64,
}

impl ChannelStats {
    /// Share of pushed frames that never reached the display, in percent
    pub fn drop_rate(&self) -> f64 {
        if self.pushed == 0 {
            0.0
        } else {
            ((self.superseded + self.dropped) as f64 / self.pushed as f64) * 100.0
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counters_snapshot_and_reset() {
        let counters = ChannelCounters::new();
        ChannelCounters::bump(&counters.pushed);
        ChannelCounters::bump(&counters.pushed);
        ChannelCounters::add(&counters.dropped, 3);

        let stats = counters.snapshot();
        assert_eq!(stats.pushed, 2);
        assert_eq!(stats.dropped, 3);

        counters.reset();
        assert_eq!(counters.snapshot(), ChannelStats::default());
    }

    #[test]
    fn test_drop_rate() {
        assert_eq!(ChannelStats::default().drop_rate(), 0.0);

        let stats = ChannelStats {
            pushed: 10,
            superseded: 1,
            dropped: 1,
            ..Default::default()
        };
        assert!((stats.drop_rate() - 20.0).abs() < f64::EPSILON);
    }
}
