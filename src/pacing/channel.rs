//! One pacing pipeline
//!
//! A channel owns a [`RingBuffer`] and a [`ClockSync`] behind one short
//! mutex ([`PacingCore`]); that pair is the only state shared between the
//! producer calling `push` and the tick. Dispatcher-side state (what is on
//! screen, field phase, mode flags) sits behind a second mutex only the tick
//! and the control surface take.
//!
//! Lock order is dispatch state, then core. Neither lock is held across an
//! `.await` or a call into the display collaborator.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::sync::Notify;

use crate::error::{Error, Result};
use crate::stats::{ChannelCounters, ChannelStats};

use super::clock::{ClockSync, Correction, HardwareClock};
use super::config::PacingConfig;
use super::field::FieldState;
use super::frame::{ChannelId, FrameRecord, OutputId};
use super::ring::RingBuffer;

/// Parameters for [`Scheduler::start`](super::Scheduler::start)
#[derive(Debug, Clone, Default)]
pub struct StartParams {
    /// Output the channel's frames are meant for
    pub output: OutputId,
    /// Split interlaced frames into two fields
    pub deinterlace: bool,
    /// Frames are written to memory instead of a live display
    pub to_memory: bool,
    /// Content frame rate, if already known
    pub frame_rate: Option<u32>,
    /// First frame to queue
    pub initial_frame: Option<FrameRecord>,
}

impl StartParams {
    /// Parameters targeting `output`
    pub fn new(output: OutputId) -> Self {
        Self {
            output,
            ..Default::default()
        }
    }

    /// Enable deinterlacing
    pub fn deinterlace(mut self) -> Self {
        self.deinterlace = true;
        self
    }

    /// Route output to memory
    pub fn to_memory(mut self) -> Self {
        self.to_memory = true;
        self
    }

    /// Set the content frame rate
    pub fn frame_rate(mut self, fps: u32) -> Self {
        self.frame_rate = Some(fps);
        self
    }

    /// Queue a frame as part of start
    pub fn initial_frame(mut self, frame: FrameRecord) -> Self {
        self.initial_frame = Some(frame);
        self
    }
}

/// Ring and clock, shared between producer and tick
#[derive(Debug)]
pub(crate) struct PacingCore {
    pub(crate) ring: RingBuffer,
    pub(crate) clock: ClockSync,
}

/// Tick-side state
#[derive(Debug)]
pub(crate) struct DispatchState {
    pub(crate) output: OutputId,
    pub(crate) deinterlace: bool,
    pub(crate) to_memory: bool,
    /// Frame currently on screen (last known good)
    pub(crate) displayed: Option<FrameRecord>,
    pub(crate) fields: FieldState,
}

impl DispatchState {
    fn new(params: &StartParams) -> Self {
        Self {
            output: params.output,
            deinterlace: params.deinterlace,
            to_memory: params.to_memory,
            displayed: None,
            fields: FieldState::new(),
        }
    }
}

/// Result of [`Channel::start`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Started {
    Fresh,
    Rearmed,
}

/// An independent pacing pipeline
pub struct Channel {
    id: ChannelId,
    capacity: usize,
    push_wait: Duration,
    core: Mutex<PacingCore>,
    dispatch: Mutex<DispatchState>,
    running: AtomicBool,
    skip_mode: AtomicBool,
    space: Notify,
    pub(crate) counters: ChannelCounters,
}

pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl Channel {
    /// Create a stopped channel
    pub fn new(id: ChannelId, config: &PacingConfig) -> Self {
        Self {
            id,
            capacity: config.ring_capacity.max(1),
            push_wait: config.push_wait,
            core: Mutex::new(PacingCore {
                ring: RingBuffer::new(config.ring_capacity),
                clock: ClockSync::new(config),
            }),
            dispatch: Mutex::new(DispatchState::new(&StartParams::default())),
            running: AtomicBool::new(false),
            skip_mode: AtomicBool::new(false),
            space: Notify::new(),
            counters: ChannelCounters::new(),
        }
    }

    /// Channel id
    pub fn id(&self) -> ChannelId {
        self.id
    }

    /// Whether the channel is running
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    /// Whether skip mode is set
    pub fn in_skip_mode(&self) -> bool {
        self.skip_mode.load(Ordering::Acquire)
    }

    pub(crate) fn lock_core(&self) -> MutexGuard<'_, PacingCore> {
        lock(&self.core)
    }

    pub(crate) fn lock_dispatch(&self) -> MutexGuard<'_, DispatchState> {
        lock(&self.dispatch)
    }

    /// Reset transient state and start pacing from virtual time zero
    ///
    /// A running channel is only re-armed (counters reset).
    pub(crate) fn start(&self, params: StartParams, hw_now_us: i64) -> Started {
        if self.is_running() {
            self.counters.reset();
            return Started::Rearmed;
        }

        let mut dispatch = self.lock_dispatch();
        *dispatch = DispatchState::new(&params);

        let mut core = self.lock_core();
        core.ring = RingBuffer::new(self.capacity);
        core.clock.reset(hw_now_us, 0);
        if let Some(fps) = params.frame_rate {
            core.clock.set_tolerance_from_frame_rate(fps);
        }
        self.counters.reset();
        if let Some(mut frame) = params.initial_frame {
            self.mark_invalid(&mut frame);
            if let Err(err) = self.admit(&mut core, &frame, hw_now_us) {
                tracing::warn!(channel = %self.id, error = %err, "Initial frame rejected");
            }
        }

        self.skip_mode.store(false, Ordering::Release);
        self.running.store(true, Ordering::Release);
        Started::Fresh
    }

    /// Stop the channel and drop everything buffered
    ///
    /// Returns `None` when it was not running, otherwise whether it ran in
    /// deinterlace mode.
    pub(crate) fn stop(&self) -> Option<bool> {
        let mut dispatch = self.lock_dispatch();
        if !self.running.swap(false, Ordering::AcqRel) {
            return None;
        }

        let deinterlaced = dispatch.deinterlace;
        dispatch.displayed = None;
        dispatch.fields.reset();

        self.flush(&mut self.lock_core(), "stop");
        self.skip_mode.store(false, Ordering::Release);
        drop(dispatch);
        self.space.notify_waiters();
        Some(deinterlaced)
    }

    /// Queue a frame, waiting up to the configured bound for space
    ///
    /// A frame whose timestamp precedes its sync time is queued as skip and
    /// reported as [`Error::TimestampInvalid`]. When no slot frees up in
    /// time the frame is dropped, the channel flushed and the clock re-anchored.
    pub(crate) async fn push(&self, mut frame: FrameRecord, clock: &dyn HardwareClock) -> Result<()> {
        let invalid = self.mark_invalid(&mut frame);

        let deadline = tokio::time::Instant::now() + self.push_wait;
        let mut waited = false;
        loop {
            let notified = self.space.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if self.try_accept(&frame, clock.now_us())? {
                break;
            }
            if tokio::time::Instant::now() >= deadline {
                return Err(self.overflow(clock.now_us()));
            }
            if !waited {
                waited = true;
                ChannelCounters::bump(&self.counters.backpressure_waits);
                tracing::debug!(channel = %self.id, frame_id = frame.id, "Ring full, waiting for space");
            }
            let _ = tokio::time::timeout_at(deadline, notified).await;
        }

        match invalid {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    /// Mark a frame whose timestamp precedes its sync time as skip
    fn mark_invalid(&self, frame: &mut FrameRecord) -> Option<Error> {
        let sync_time = frame.sync_time.filter(|&sync| frame.timestamp < sync)?;
        let err = Error::TimestampInvalid {
            id: frame.id,
            timestamp: frame.timestamp,
            sync_time,
        };
        frame.skip = true;
        tracing::warn!(channel = %self.id, error = %err, "Frame marked as skip");
        Some(err)
    }

    fn try_accept(&self, frame: &FrameRecord, hw_now_us: i64) -> Result<bool> {
        let mut core = self.lock_core();
        if !self.is_running() {
            return Err(Error::NotRunning(self.id));
        }
        if core.ring.is_full() {
            return Ok(false);
        }

        self.admit(&mut core, frame, hw_now_us)?;
        Ok(true)
    }

    /// Feed the frame's sync time to the clock, then queue it
    fn admit(&self, core: &mut PacingCore, frame: &FrameRecord, hw_now_us: i64) -> Result<()> {
        if let Some(sync_time) = frame.sync_time.filter(|_| !frame.skip) {
            if core.clock.observe(hw_now_us, sync_time) {
                match core.clock.reconcile(hw_now_us) {
                    Ok(Correction::None) => {}
                    Ok(Correction::Adjusted { offset_us }) => {
                        ChannelCounters::bump(&self.counters.clock_adjustments);
                        tracing::debug!(
                            channel = %self.id,
                            offset_us = offset_us,
                            "Clock drift corrected"
                        );
                    }
                    Err(err) => {
                        ChannelCounters::bump(&self.counters.clock_resets);
                        let dropped = self.flush(core, "clock discontinuity");
                        tracing::warn!(
                            channel = %self.id,
                            error = %err,
                            dropped = dropped,
                            "Clock re-anchored"
                        );
                    }
                }
            }
        }

        core.ring.push(frame)?;
        ChannelCounters::bump(&self.counters.pushed);
        Ok(())
    }

    fn overflow(&self, hw_now_us: i64) -> Error {
        let mut core = self.lock_core();
        let dropped = self.flush(&mut core, "backpressure timeout");
        let now_ms = core.clock.virtual_now_ms(hw_now_us);
        core.clock.reset(hw_now_us, now_ms);
        ChannelCounters::bump(&self.counters.clock_resets);
        ChannelCounters::bump(&self.counters.dropped);

        tracing::warn!(
            channel = %self.id,
            capacity = self.capacity,
            dropped = dropped,
            "Ring stayed full, frame dropped and channel resynchronized"
        );
        Error::BufferFull {
            capacity: self.capacity,
        }
    }

    fn flush(&self, core: &mut PacingCore, reason: &str) -> usize {
        let dropped = core.ring.flush_all(reason);
        ChannelCounters::bump(&self.counters.flushes);
        ChannelCounters::add(&self.counters.dropped, dropped as u64);
        dropped
    }

    /// Release popped slots and wake a waiting producer
    pub(crate) fn clean(&self) -> usize {
        let freed = self.lock_core().ring.clean();
        if freed > 0 {
            self.space.notify_waiters();
        }
        freed
    }

    /// Drop everything buffered and any half-emitted field pair
    pub(crate) fn clear(&self, reason: &str) -> Result<usize> {
        let mut dispatch = self.lock_dispatch();
        if !self.is_running() {
            return Err(Error::NotRunning(self.id));
        }
        dispatch.fields.reset();
        let dropped = self.flush(&mut self.lock_core(), reason);
        drop(dispatch);
        self.space.notify_waiters();
        Ok(dropped)
    }

    /// Enter skip mode: flush and discard whatever arrives until `skip_end`
    pub(crate) fn skip_start(&self) -> Result<usize> {
        let dropped = self.clear("skip start")?;
        self.skip_mode.store(true, Ordering::Release);
        Ok(dropped)
    }

    /// Leave skip mode and restart the clock at zero
    pub(crate) fn skip_end(&self, hw_now_us: i64) -> Result<()> {
        let mut core = self.lock_core();
        if !self.is_running() {
            return Err(Error::NotRunning(self.id));
        }
        self.skip_mode.store(false, Ordering::Release);
        core.clock.reset(hw_now_us, 0);
        Ok(())
    }

    /// Fast-forward `last_cleared_id` without touching the buffer
    pub(crate) fn skip_one(&self, id: u64) -> Result<()> {
        let mut core = self.lock_core();
        if !self.is_running() {
            return Err(Error::NotRunning(self.id));
        }
        core.ring.skip_to(id);
        Ok(())
    }

    /// Update the content frame rate; returns whether anything changed
    pub(crate) fn notify_framerate(&self, fps: u32) -> bool {
        self.lock_core().clock.set_tolerance_from_frame_rate(fps)
    }

    /// Frames waiting to be dispatched
    pub fn readable_count(&self) -> usize {
        self.lock_core().ring.readable_count()
    }

    /// Frames held by the ring (readable plus popped but not cleaned)
    pub fn valid_count(&self) -> usize {
        self.lock_core().ring.total_count()
    }

    /// Highest id the channel has finished with
    pub fn last_cleared_id(&self) -> u64 {
        self.lock_core().ring.last_cleared_id()
    }

    /// Id of the frame on screen
    pub fn last_displayed_id(&self) -> Option<u64> {
        self.lock_dispatch().displayed.as_ref().map(|frame| frame.id)
    }

    /// Frame on screen, for callers persisting the last picture
    pub fn displayed_frame(&self) -> Option<FrameRecord> {
        self.lock_dispatch().displayed.clone()
    }

    /// Current virtual time in milliseconds
    pub fn virtual_now_ms(&self, hw_now_us: i64) -> i64 {
        self.lock_core().clock.virtual_now_ms(hw_now_us)
    }

    /// Counter snapshot
    pub fn stats(&self) -> ChannelStats {
        self.counters.snapshot()
    }
}

impl std::fmt::Debug for Channel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Channel")
            .field("id", &self.id)
            .field("running", &self.is_running())
            .field("skip_mode", &self.in_skip_mode())
            .field("capacity", &self.capacity)
            .finish()
    }
}
