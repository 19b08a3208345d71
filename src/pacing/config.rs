//! Pacing configuration
//!
//! Every timing constant has a named default and a builder override.

use std::time::Duration;

/// Default ring capacity per channel
pub const DEFAULT_RING_CAPACITY: usize = 8;

/// Default display refresh rate
pub const DEFAULT_REFRESH_RATE_HZ: u32 = 60;

/// Number of drift samples averaged before a correction
pub const DEFAULT_DRIFT_WINDOW: usize = 32;

/// Samples after a reset during which corrections may happen before the
/// window has filled
pub const DEFAULT_STARTUP_SAMPLES: u32 = 100;

/// Minimum samples needed for a startup correction
pub const DEFAULT_STARTUP_MIN_SAMPLES: usize = 4;

/// Drift beyond which the clock is re-anchored instead of nudged
pub const DEFAULT_HARD_RESET_THRESHOLD: Duration = Duration::from_millis(200);

/// How long `push` waits for a free slot
pub const DEFAULT_PUSH_WAIT: Duration = Duration::from_millis(500);

/// Gap between due time and clock under which dithering kicks in
pub const DEFAULT_DITHER_GAP: Duration = Duration::from_millis(4);

/// Base-time nudge applied per dither step (half a millisecond tick)
pub const DEFAULT_DITHER_STEP: Duration = Duration::from_micros(500);

/// Drift tolerance when the content frame rate is unknown
pub const DEFAULT_TOLERANCE: Duration = Duration::from_millis(32);

/// Pacing configuration options
#[derive(Debug, Clone)]
pub struct PacingConfig {
    /// Frame slots per channel ring
    pub ring_capacity: usize,

    /// Display refresh rate driving the tick
    pub refresh_rate_hz: u32,

    /// Drift averaging window length
    pub drift_window: usize,

    /// Startup period (in samples) with early corrections
    pub startup_samples: u32,

    /// Samples required before an early correction
    pub startup_min_samples: usize,

    /// Drift treated as a discontinuity
    pub hard_reset_threshold: Duration,

    /// Bounded wait for backpressure in `push`
    pub push_wait: Duration,

    /// Dither gap threshold
    pub dither_gap: Duration,

    /// Dither nudge size
    pub dither_step: Duration,

    /// Tolerance used before a frame rate is known
    pub default_tolerance: Duration,
}

impl Default for PacingConfig {
    fn default() -> Self {
        Self {
            ring_capacity: DEFAULT_RING_CAPACITY,
            refresh_rate_hz: DEFAULT_REFRESH_RATE_HZ,
            drift_window: DEFAULT_DRIFT_WINDOW,
            startup_samples: DEFAULT_STARTUP_SAMPLES,
            startup_min_samples: DEFAULT_STARTUP_MIN_SAMPLES,
            hard_reset_threshold: DEFAULT_HARD_RESET_THRESHOLD,
            push_wait: DEFAULT_PUSH_WAIT,
            dither_gap: DEFAULT_DITHER_GAP,
            dither_step: DEFAULT_DITHER_STEP,
            default_tolerance: DEFAULT_TOLERANCE,
        }
    }
}

impl PacingConfig {
    /// Set the ring capacity (at least one slot)
    pub fn ring_capacity(mut self, capacity: usize) -> Self {
        self.ring_capacity = capacity.max(1);
        self
    }

    /// Set the display refresh rate
    pub fn refresh_rate(mut self, hz: u32) -> Self {
        self.refresh_rate_hz = hz.max(1);
        self
    }

    /// Set the drift window length
    pub fn drift_window(mut self, samples: usize) -> Self {
        self.drift_window = samples.max(1);
        self
    }

    /// Disable corrections before the window has filled
    pub fn disable_startup_corrections(mut self) -> Self {
        self.startup_samples = 0;
        self
    }

    /// Set the hard reset threshold
    pub fn hard_reset_threshold(mut self, threshold: Duration) -> Self {
        self.hard_reset_threshold = threshold;
        self
    }

    /// Set the backpressure wait
    pub fn push_wait(mut self, wait: Duration) -> Self {
        self.push_wait = wait;
        self
    }

    /// Set the dither gap and step
    pub fn dither(mut self, gap: Duration, step: Duration) -> Self {
        self.dither_gap = gap;
        self.dither_step = step;
        self
    }

    /// Display tick interval
    pub fn tick_interval(&self) -> Duration {
        Duration::from_micros(1_000_000 / self.refresh_rate_hz as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = PacingConfig::default();

        assert_eq!(config.ring_capacity, DEFAULT_RING_CAPACITY);
        assert_eq!(config.refresh_rate_hz, 60);
        assert_eq!(config.hard_reset_threshold, Duration::from_millis(200));
        assert_eq!(config.push_wait, Duration::from_millis(500));
        assert_eq!(config.dither_gap, Duration::from_millis(4));
        assert_eq!(config.default_tolerance, Duration::from_millis(32));
    }

    #[test]
    fn test_tick_interval() {
        assert_eq!(
            PacingConfig::default().tick_interval(),
            Duration::from_micros(16_666)
        );
        assert_eq!(
            PacingConfig::default().refresh_rate(50).tick_interval(),
            Duration::from_millis(20)
        );
    }

    #[test]
    fn test_builder_clamps() {
        let config = PacingConfig::default()
            .ring_capacity(0)
            .refresh_rate(0)
            .drift_window(0);

        assert_eq!(config.ring_capacity, 1);
        assert_eq!(config.refresh_rate_hz, 1);
        assert_eq!(config.drift_window, 1);
    }

    #[test]
    fn test_builder_chaining() {
        let config = PacingConfig::default()
            .ring_capacity(4)
            .push_wait(Duration::from_millis(100))
            .hard_reset_threshold(Duration::from_millis(300))
            .dither(Duration::from_millis(2), Duration::from_micros(250))
            .disable_startup_corrections();

        assert_eq!(config.ring_capacity, 4);
        assert_eq!(config.push_wait, Duration::from_millis(100));
        assert_eq!(config.hard_reset_threshold, Duration::from_millis(300));
        assert_eq!(config.dither_gap, Duration::from_millis(2));
        assert_eq!(config.dither_step, Duration::from_micros(250));
        assert_eq!(config.startup_samples, 0);
    }
}
