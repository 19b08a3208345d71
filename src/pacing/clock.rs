//! Virtual presentation clock
//!
//! Each channel keeps a virtual clock anchored to the hardware tick counter:
//!
//! ```text
//! virtual_now = hardware_now - base_time
//! ```
//!
//! Producers declare a sync time with every frame. The difference between
//! that declared time and `virtual_now` is collected in a fixed window; once
//! the average drifts past the tolerance, `base_time` absorbs the average in
//! a single jump. A drift beyond the hard-reset threshold is a discontinuity
//! (seek, restart, stall) and re-anchors the clock directly.
//!
//! Hardware time is in microseconds, frame times in milliseconds.

use std::sync::atomic::{AtomicI64, Ordering};
use std::time::Duration;

use crate::error::{Error, Result};

use super::config::PacingConfig;

/// Source of the hardware tick counter
pub trait HardwareClock: Send + Sync {
    /// Current hardware time in microseconds
    fn now_us(&self) -> i64;
}

/// Monotonic clock counting from its creation
///
/// Built on `tokio::time::Instant` so paused test time applies to it.
#[derive(Debug, Clone, Copy)]
pub struct MonotonicClock {
    origin: tokio::time::Instant,
}

impl MonotonicClock {
    pub fn new() -> Self {
        Self {
            origin: tokio::time::Instant::now(),
        }
    }
}

impl Default for MonotonicClock {
    fn default() -> Self {
        Self::new()
    }
}

impl HardwareClock for MonotonicClock {
    fn now_us(&self) -> i64 {
        self.origin.elapsed().as_micros() as i64
    }
}

/// Manually driven clock for simulation and tests
#[derive(Debug, Default)]
pub struct ManualClock {
    now_us: AtomicI64,
}

impl ManualClock {
    pub fn new() -> Self {
        Self::default()
    }

    /// Jump to `ms` milliseconds
    pub fn set_ms(&self, ms: i64) {
        self.now_us.store(ms * 1000, Ordering::SeqCst);
    }

    /// Move forward by `by`
    pub fn advance(&self, by: Duration) {
        self.now_us
            .fetch_add(by.as_micros() as i64, Ordering::SeqCst);
    }
}

impl HardwareClock for ManualClock {
    fn now_us(&self) -> i64 {
        self.now_us.load(Ordering::SeqCst)
    }
}

/// Outcome of a successful [`ClockSync::reconcile`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Correction {
    /// Drift within tolerance, or not enough samples yet
    None,
    /// Base time shifted by the window average
    Adjusted {
        /// Applied offset in microseconds
        offset_us: i64,
    },
}

/// Map truncated NTSC-style rates onto their nominal rate
pub fn normalize_frame_rate(fps: u32) -> u32 {
    match fps {
        23 => 24,
        29 => 30,
        59 => 60,
        other => other,
    }
}

/// Signed accumulator spreading sub-millisecond rounding error
///
/// Each step flips the sign and moves the base by one step in that
/// direction, so consecutive nudges cancel instead of always truncating the
/// same way.
#[derive(Debug, Clone, Copy, Default)]
struct Dither {
    sign: i64,
    offset_us: i64,
}

impl Dither {
    fn step(&mut self, step_us: i64) -> i64 {
        self.sign = if self.sign > 0 { -1 } else { 1 };
        let nudge = self.sign * step_us;
        self.offset_us += nudge;
        nudge
    }
}

/// Per-channel virtual clock with drift averaging
#[derive(Debug, Clone)]
pub struct ClockSync {
    base_us: i64,
    window: Vec<i64>,
    cursor: usize,
    sum: i64,
    full: bool,
    samples_since_reset: u32,
    last_declared: Option<i64>,
    last_diff_us: Option<i64>,

    tolerance_us: i64,
    frame_rate: Option<u32>,
    exact_multiple: bool,
    duplicate_fields: bool,
    dither: Dither,

    refresh_rate_hz: u32,
    hard_reset_us: i64,
    startup_samples: u32,
    startup_min_samples: usize,
    dither_gap_us: i64,
    dither_step_us: i64,
    default_tolerance_us: i64,
}

impl ClockSync {
    /// Create a clock anchored at hardware time zero
    pub fn new(config: &PacingConfig) -> Self {
        let default_tolerance_us = config.default_tolerance.as_micros() as i64;
        Self {
            base_us: 0,
            window: vec![0; config.drift_window.max(1)],
            cursor: 0,
            sum: 0,
            full: false,
            samples_since_reset: 0,
            last_declared: None,
            last_diff_us: None,
            tolerance_us: default_tolerance_us,
            frame_rate: None,
            exact_multiple: false,
            duplicate_fields: false,
            dither: Dither::default(),
            refresh_rate_hz: config.refresh_rate_hz.max(1),
            hard_reset_us: config.hard_reset_threshold.as_micros() as i64,
            startup_samples: config.startup_samples,
            startup_min_samples: config.startup_min_samples.max(1),
            dither_gap_us: config.dither_gap.as_micros() as i64,
            dither_step_us: config.dither_step.as_micros() as i64,
            default_tolerance_us,
        }
    }

    /// Virtual time in microseconds
    pub fn virtual_now_us(&self, hw_now_us: i64) -> i64 {
        hw_now_us - self.base_us
    }

    /// Virtual time in milliseconds
    pub fn virtual_now_ms(&self, hw_now_us: i64) -> i64 {
        self.virtual_now_us(hw_now_us).div_euclid(1000)
    }

    /// Re-anchor so that `virtual_now == virtual_ms` and drop all samples
    ///
    /// The learned frame-rate tolerance is kept.
    pub fn reset(&mut self, hw_now_us: i64, virtual_ms: i64) {
        self.base_us = hw_now_us - virtual_ms * 1000;
        self.clear_window();
        self.samples_since_reset = 0;
        self.last_declared = None;
        self.last_diff_us = None;
        self.dither = Dither::default();
    }

    /// Record a declared sync time
    ///
    /// Returns false when the sample was ignored: a declared time at or
    /// before the previous one (within the hard-reset threshold) would count
    /// the same interval twice.
    pub fn observe(&mut self, hw_now_us: i64, declared_ms: i64) -> bool {
        if let Some(last) = self.last_declared {
            if declared_ms <= last && (last - declared_ms) * 1000 <= self.hard_reset_us {
                return false;
            }
        }

        let diff = declared_ms * 1000 - self.virtual_now_us(hw_now_us);
        self.last_declared = Some(declared_ms);
        self.last_diff_us = Some(diff);

        self.sum += diff - self.window[self.cursor];
        self.window[self.cursor] = diff;
        self.cursor = (self.cursor + 1) % self.window.len();
        if self.cursor == 0 {
            self.full = true;
        }
        self.samples_since_reset = self.samples_since_reset.saturating_add(1);
        true
    }

    /// Apply the drift correction, if one is due
    ///
    /// A raw drift above the hard-reset threshold re-anchors the clock on the
    /// declared time and reports [`Error::ClockDiscontinuity`].
    pub fn reconcile(&mut self, hw_now_us: i64) -> Result<Correction> {
        if let Some(diff) = self.last_diff_us.take() {
            if diff.abs() > self.hard_reset_us {
                let declared = self.last_declared.unwrap_or(0);
                self.reset(hw_now_us, declared);
                self.last_declared = Some(declared);
                return Err(Error::ClockDiscontinuity {
                    drift_ms: diff / 1000,
                });
            }
        }

        let count = if self.full {
            self.window.len()
        } else {
            self.cursor
        };
        let startup = self.samples_since_reset <= self.startup_samples
            && count >= self.startup_min_samples;
        if count == 0 || !(self.full || startup) {
            return Ok(Correction::None);
        }

        let average = self.sum / count as i64;
        if average.abs() <= self.tolerance_us {
            return Ok(Correction::None);
        }

        self.base_us -= average;
        self.clear_window();
        Ok(Correction::Adjusted { offset_us: average })
    }

    /// Derive tolerance and rate-ratio policies from the content frame rate
    ///
    /// `fps == 0` means unknown. Returns false when the normalized rate is
    /// unchanged.
    pub fn set_tolerance_from_frame_rate(&mut self, fps: u32) -> bool {
        let fps = normalize_frame_rate(fps);
        let rate = (fps > 0).then_some(fps);
        if rate == self.frame_rate {
            return false;
        }

        self.frame_rate = rate;
        match rate {
            Some(fps) => {
                self.tolerance_us = 1_000_000 / fps as i64;
                self.exact_multiple = self.refresh_rate_hz % fps == 0;
                self.duplicate_fields = fps * 2 < self.refresh_rate_hz;
            }
            None => {
                self.tolerance_us = self.default_tolerance_us;
                self.exact_multiple = false;
                self.duplicate_fields = false;
            }
        }
        true
    }

    /// Bias added to the clock when testing whether a frame is due
    ///
    /// Half of the shorter of the frame interval and the display interval.
    pub fn early_margin_us(&self) -> i64 {
        let display_us = 1_000_000 / self.refresh_rate_hz as i64;
        self.tolerance_us.min(display_us) / 2
    }

    /// Nudge the base by one dither step when a frame landed within the
    /// dither gap and the display rate is an exact multiple of the content
    /// rate. Returns the applied nudge.
    pub fn dither(&mut self, gap_us: i64) -> Option<i64> {
        if !self.exact_multiple || gap_us.abs() >= self.dither_gap_us {
            return None;
        }
        let nudge = self.dither.step(self.dither_step_us);
        self.base_us += nudge;
        Some(nudge)
    }

    /// Average of the current drift samples
    pub fn average_drift_us(&self) -> Option<i64> {
        let count = if self.full {
            self.window.len()
        } else {
            self.cursor
        };
        (count > 0).then(|| self.sum / count as i64)
    }

    /// Base time in microseconds
    pub fn base_time_us(&self) -> i64 {
        self.base_us
    }

    /// Drift tolerance in milliseconds
    pub fn tolerance_ms(&self) -> i64 {
        self.tolerance_us / 1000
    }

    /// Normalized content frame rate, if known
    pub fn frame_rate(&self) -> Option<u32> {
        self.frame_rate
    }

    /// Display rate is an exact multiple of the content rate
    pub fn exact_multiple(&self) -> bool {
        self.exact_multiple
    }

    /// Content rate is low enough that fields must be repeated
    pub fn duplicate_fields(&self) -> bool {
        self.duplicate_fields
    }

    /// Net offset currently applied by dithering
    pub fn dither_offset_us(&self) -> i64 {
        self.dither.offset_us
    }

    fn clear_window(&mut self) {
        self.window.iter_mut().for_each(|s| *s = 0);
        self.cursor = 0;
        self.sum = 0;
        self.full = false;
    }
}
