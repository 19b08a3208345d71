//! Process-wide pacing scheduler
//!
//! Owns the fixed channel array and the collaborators, exposes the control
//! surface and drives [`Dispatcher::tick`] for every running channel from
//! the tick source.

use std::sync::{Arc, Mutex, TryLockError, Weak};

use crate::error::{Error, Result};
use crate::stats::ChannelStats;

use super::channel::{lock, Channel, StartParams, Started};
use super::clock::HardwareClock;
use super::config::PacingConfig;
use super::dispatch::Dispatcher;
use super::frame::{ChannelId, FrameRecord};
use super::output::{DisplayProgram, OutputMonitor};
use super::tick::{TickCallback, TickSource};

/// External collaborators of a [`Scheduler`]
#[derive(Clone)]
pub struct Backends {
    /// Hardware display programming
    pub display: Arc<dyn DisplayProgram>,
    /// Output state
    pub outputs: Arc<dyn OutputMonitor>,
    /// Hardware tick counter
    pub clock: Arc<dyn HardwareClock>,
    /// Periodic tick driver
    pub ticker: Arc<dyn TickSource>,
}

/// Running channel count and the id the tick source was registered with
#[derive(Debug, Default)]
struct Lifecycle {
    running: usize,
    subscribed: Option<ChannelId>,
}

/// Owner of every pacing channel
///
/// Built with [`Scheduler::new`], which returns an `Arc` so the tick
/// callback can hold a weak reference back to it.
pub struct Scheduler {
    config: PacingConfig,
    channels: Vec<Channel>,
    dispatcher: Dispatcher,
    display: Arc<dyn DisplayProgram>,
    outputs: Arc<dyn OutputMonitor>,
    clock: Arc<dyn HardwareClock>,
    ticker: Arc<dyn TickSource>,
    /// Serializes start and end
    lifecycle: Mutex<Lifecycle>,
    /// Held for the duration of one tick
    tick_guard: Mutex<()>,
    this: Weak<Scheduler>,
}

impl Scheduler {
    /// Create a scheduler with all channels stopped
    pub fn new(config: PacingConfig, backends: Backends) -> Arc<Self> {
        let Backends {
            display,
            outputs,
            clock,
            ticker,
        } = backends;

        Arc::new_cyclic(|this| Self {
            channels: ChannelId::all()
                .map(|id| Channel::new(id, &config))
                .collect(),
            dispatcher: Dispatcher::new(display.clone(), outputs.clone(), clock.clone()),
            config,
            display,
            outputs,
            clock,
            ticker,
            lifecycle: Mutex::new(Lifecycle::default()),
            tick_guard: Mutex::new(()),
            this: this.clone(),
        })
    }

    /// Get the scheduler configuration
    pub fn config(&self) -> &PacingConfig {
        &self.config
    }

    /// Look up a channel
    pub fn channel(&self, id: ChannelId) -> Result<&Channel> {
        self.channels
            .get(id.index())
            .ok_or(Error::InvalidChannel(id.index() as u8))
    }

    /// Number of running channels
    pub fn running_count(&self) -> usize {
        lock(&self.lifecycle).running
    }

    /// Start a channel
    ///
    /// A running channel is re-armed: its counters reset, nothing else
    /// changes. Otherwise the target output must be available, the channel
    /// state is reset and the clock anchored at virtual time zero. The first
    /// running channel registers with the tick source.
    pub fn start(&self, id: ChannelId, params: StartParams) -> Result<()> {
        let channel = self.channel(id)?;
        let mut lifecycle = lock(&self.lifecycle);

        if !channel.is_running() && !self.outputs.is_available(params.output) {
            tracing::warn!(channel = %id, output = %params.output, "Output unavailable");
            return Err(Error::OutputUnavailable(params.output));
        }

        let output = params.output;
        let deinterlace = params.deinterlace;
        let to_memory = params.to_memory;
        if channel.start(params, self.clock.now_us()) == Started::Rearmed {
            tracing::debug!(channel = %id, "Channel re-armed");
            return Ok(());
        }

        lifecycle.running += 1;
        if lifecycle.subscribed.is_none() {
            self.ticker.subscribe(id, self.tick_callback());
            lifecycle.subscribed = Some(id);
        }

        tracing::info!(
            channel = %id,
            output = %output,
            deinterlace = deinterlace,
            to_memory = to_memory,
            running = lifecycle.running,
            "Channel started"
        );
        Ok(())
    }

    /// Stop a channel; no-op when it is not running
    ///
    /// Waits for an in-flight tick, flushes the buffer, disables the layer
    /// and releases deinterlacer resources. The last running channel
    /// unregisters from the tick source.
    pub fn end(&self, id: ChannelId) -> Result<()> {
        let channel = self.channel(id)?;
        let mut lifecycle = lock(&self.lifecycle);
        let tick = lock(&self.tick_guard);

        let Some(deinterlaced) = channel.stop() else {
            return Ok(());
        };
        drop(tick);

        lifecycle.running = lifecycle.running.saturating_sub(1);
        if lifecycle.running == 0 {
            if let Some(subscribed) = lifecycle.subscribed.take() {
                self.ticker.unsubscribe(subscribed);
            }
        }

        self.display.disable(id);
        if deinterlaced {
            self.display.release_deinterlacer(id);
        }

        tracing::info!(
            channel = %id,
            running = lifecycle.running,
            last_cleared = channel.last_cleared_id(),
            "Channel ended"
        );
        Ok(())
    }

    /// Queue a frame on a channel
    ///
    /// Waits up to the configured push wait when the ring is full.
    pub async fn push(&self, id: ChannelId, frame: FrameRecord) -> Result<()> {
        self.channel(id)?.push(frame, self.clock.as_ref()).await
    }

    /// Flush the channel and discard frames until [`skip_end`](Self::skip_end)
    pub fn skip_start(&self, id: ChannelId) -> Result<()> {
        let channel = self.channel(id)?;
        let _tick = lock(&self.tick_guard);
        let dropped = channel.skip_start()?;
        tracing::info!(channel = %id, dropped = dropped, "Skip mode started");
        Ok(())
    }

    /// Leave skip mode and restart the clock at zero
    pub fn skip_end(&self, id: ChannelId) -> Result<()> {
        self.channel(id)?.skip_end(self.clock.now_us())?;
        tracing::info!(channel = %id, "Skip mode ended");
        Ok(())
    }

    /// Fast-forward `last_cleared_id` to `frame_id`, buffer untouched
    pub fn skip_one(&self, id: ChannelId, frame_id: u64) -> Result<()> {
        self.channel(id)?.skip_one(frame_id)?;
        tracing::debug!(channel = %id, frame_id = frame_id, "Skipped to frame");
        Ok(())
    }

    /// Flush a running channel without stopping it
    pub fn clear(&self, id: ChannelId) -> Result<usize> {
        let channel = self.channel(id)?;
        let _tick = lock(&self.tick_guard);
        let dropped = channel.clear("clear")?;
        tracing::info!(channel = %id, dropped = dropped, "Channel cleared");
        Ok(dropped)
    }

    /// Report the content frame rate (0 = unknown)
    pub fn notify_framerate(&self, id: ChannelId, fps: u32) -> Result<()> {
        if self.channel(id)?.notify_framerate(fps) {
            tracing::info!(channel = %id, fps = fps, "Frame rate changed");
        }
        Ok(())
    }

    /// Run one tick for every running channel
    ///
    /// Normally invoked by the tick source. A tick that starts while the
    /// previous one is still running is skipped.
    pub fn tick(&self) {
        let _guard = match self.tick_guard.try_lock() {
            Ok(guard) => guard,
            Err(TryLockError::Poisoned(poisoned)) => poisoned.into_inner(),
            Err(TryLockError::WouldBlock) => {
                tracing::trace!("Previous tick still running, skipping");
                return;
            }
        };

        for channel in &self.channels {
            self.dispatcher.tick(channel);
        }
    }

    /// End every running channel
    pub fn shutdown(&self) {
        for id in ChannelId::all() {
            if let Err(e) = self.end(id) {
                tracing::error!(channel = %id, error = %e, "Failed to end channel");
            }
        }
        tracing::info!("Scheduler shut down");
    }

    /// Frames waiting to be dispatched
    pub fn readable_count(&self, id: ChannelId) -> Result<usize> {
        Ok(self.channel(id)?.readable_count())
    }

    /// Frames held by the ring
    pub fn valid_count(&self, id: ChannelId) -> Result<usize> {
        Ok(self.channel(id)?.valid_count())
    }

    /// Id of the frame on screen
    pub fn last_displayed_id(&self, id: ChannelId) -> Result<Option<u64>> {
        Ok(self.channel(id)?.last_displayed_id())
    }

    /// Highest id the channel has finished with
    pub fn last_cleared_id(&self, id: ChannelId) -> Result<u64> {
        Ok(self.channel(id)?.last_cleared_id())
    }

    /// Frame on screen
    pub fn displayed_frame(&self, id: ChannelId) -> Result<Option<FrameRecord>> {
        Ok(self.channel(id)?.displayed_frame())
    }

    /// Counter snapshot
    pub fn stats(&self, id: ChannelId) -> Result<ChannelStats> {
        Ok(self.channel(id)?.stats())
    }

    fn tick_callback(&self) -> TickCallback {
        let this = self.this.clone();
        Arc::new(move || {
            if let Some(scheduler) = this.upgrade() {
                scheduler.tick();
            }
        })
    }
}

impl std::fmt::Debug for Scheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Scheduler")
            .field("config", &self.config)
            .field("channels", &self.channels)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pacing::clock::ManualClock;
    use crate::pacing::frame::OutputId;
    use crate::pacing::output::{DisplayRequest, SharedOutputs};

    #[derive(Default)]
    struct Recorder {
        events: Mutex<Vec<String>>,
    }

    impl Recorder {
        fn events(&self) -> Vec<String> {
            self.events.lock().unwrap().clone()
        }
    }

    impl DisplayProgram for Recorder {
        fn display(&self, request: &DisplayRequest) {
            let mut event = format!("show {} {}", request.channel, request.frame.id);
            if let Some(field) = request.field {
                event.push_str(&format!(" f{}", field.index));
            }
            self.events.lock().unwrap().push(event);
        }

        fn disable(&self, channel: ChannelId) {
            self.events.lock().unwrap().push(format!("disable {}", channel));
        }

        fn release_deinterlacer(&self, channel: ChannelId) {
            self.events.lock().unwrap().push(format!("release {}", channel));
        }
    }

    #[derive(Default)]
    struct RecordingTicker {
        subscribed: Mutex<Vec<ChannelId>>,
        unsubscribed: Mutex<Vec<ChannelId>>,
    }

    impl TickSource for RecordingTicker {
        fn subscribe(&self, channel: ChannelId, _callback: TickCallback) {
            self.subscribed.lock().unwrap().push(channel);
        }

        fn unsubscribe(&self, channel: ChannelId) {
            self.unsubscribed.lock().unwrap().push(channel);
        }
    }

    struct Rig {
        scheduler: Arc<Scheduler>,
        clock: Arc<ManualClock>,
        outputs: Arc<SharedOutputs>,
        display: Arc<Recorder>,
        ticker: Arc<RecordingTicker>,
    }

    fn rig() -> Rig {
        let clock = Arc::new(ManualClock::new());
        let outputs = Arc::new(SharedOutputs::new(OutputId(0)));
        let display = Arc::new(Recorder::default());
        let ticker = Arc::new(RecordingTicker::default());
        let scheduler = Scheduler::new(
            PacingConfig::default(),
            Backends {
                display: display.clone(),
                outputs: outputs.clone(),
                clock: clock.clone(),
                ticker: ticker.clone(),
            },
        );
        Rig {
            scheduler,
            clock,
            outputs,
            display,
            ticker,
        }
    }

    #[test]
    fn test_start_requires_available_output() {
        let rig = rig();
        let result = rig
            .scheduler
            .start(ChannelId::MAIN, StartParams::new(OutputId(2)));
        assert_eq!(result, Err(Error::OutputUnavailable(OutputId(2))));
        assert_eq!(rig.scheduler.running_count(), 0);

        rig.outputs.set_available(OutputId(2), true);
        rig.scheduler
            .start(ChannelId::MAIN, StartParams::new(OutputId(2)))
            .unwrap();
        assert_eq!(rig.scheduler.running_count(), 1);
    }

    #[test]
    fn test_tick_source_registration_follows_running_channels() {
        let rig = rig();
        let sub = ChannelId::sub(1).unwrap();

        rig.scheduler.start(ChannelId::MAIN, StartParams::default()).unwrap();
        rig.scheduler.start(sub, StartParams::default()).unwrap();
        // Re-arm does not count twice
        rig.scheduler.start(sub, StartParams::default()).unwrap();
        assert_eq!(rig.scheduler.running_count(), 2);
        assert_eq!(*rig.ticker.subscribed.lock().unwrap(), vec![ChannelId::MAIN]);

        rig.scheduler.end(ChannelId::MAIN).unwrap();
        assert!(rig.ticker.unsubscribed.lock().unwrap().is_empty());
        rig.scheduler.end(sub).unwrap();
        // Unregistered under the id it was registered with
        assert_eq!(*rig.ticker.unsubscribed.lock().unwrap(), vec![ChannelId::MAIN]);

        // A later start registers again, under the new first channel
        rig.scheduler.start(sub, StartParams::default()).unwrap();
        rig.scheduler.end(sub).unwrap();
        assert_eq!(*rig.ticker.subscribed.lock().unwrap(), vec![ChannelId::MAIN, sub]);
        assert_eq!(*rig.ticker.unsubscribed.lock().unwrap(), vec![ChannelId::MAIN, sub]);

        // Ending a stopped channel is a no-op
        rig.scheduler.end(sub).unwrap();
        assert_eq!(rig.scheduler.running_count(), 0);
    }

    #[tokio::test]
    async fn test_end_disables_and_releases_deinterlacer() {
        let rig = rig();
        rig.scheduler
            .start(ChannelId::MAIN, StartParams::default().deinterlace())
            .unwrap();
        rig.scheduler
            .push(ChannelId::MAIN, FrameRecord::new(4, 0, 64, 64))
            .await
            .unwrap();

        rig.scheduler.end(ChannelId::MAIN).unwrap();
        assert_eq!(rig.display.events(), vec!["disable main", "release main"]);
        assert_eq!(rig.scheduler.valid_count(ChannelId::MAIN), Ok(0));
        assert_eq!(rig.scheduler.last_cleared_id(ChannelId::MAIN), Ok(4));
    }

    #[tokio::test]
    async fn test_tick_services_every_running_channel() {
        let rig = rig();
        let sub = ChannelId::sub(2).unwrap();
        rig.scheduler.start(ChannelId::MAIN, StartParams::default()).unwrap();
        rig.scheduler.start(sub, StartParams::default()).unwrap();

        rig.scheduler
            .push(ChannelId::MAIN, FrameRecord::new(1, 0, 64, 64))
            .await
            .unwrap();
        rig.scheduler
            .push(sub, FrameRecord::new(7, 0, 64, 64))
            .await
            .unwrap();

        rig.scheduler.tick();
        assert_eq!(rig.display.events(), vec!["show main 1", "show sub2 7"]);
        assert_eq!(rig.scheduler.last_displayed_id(sub), Ok(Some(7)));
        assert_eq!(
            rig.scheduler.displayed_frame(ChannelId::MAIN).unwrap().map(|f| f.id),
            Some(1)
        );
    }

    #[tokio::test]
    async fn test_clear_and_skip_require_running() {
        let rig = rig();
        let not_running = Error::NotRunning(ChannelId::MAIN);
        assert_eq!(rig.scheduler.clear(ChannelId::MAIN), Err(not_running.clone()));
        assert_eq!(rig.scheduler.skip_start(ChannelId::MAIN), Err(not_running.clone()));
        assert_eq!(rig.scheduler.skip_end(ChannelId::MAIN), Err(not_running));

        rig.scheduler.start(ChannelId::MAIN, StartParams::default()).unwrap();
        for id in 1..=3 {
            rig.scheduler
                .push(ChannelId::MAIN, FrameRecord::new(id, 1_000, 64, 64))
                .await
                .unwrap();
        }
        assert_eq!(rig.scheduler.clear(ChannelId::MAIN), Ok(3));
        assert_eq!(rig.scheduler.readable_count(ChannelId::MAIN), Ok(0));
        assert_eq!(rig.scheduler.last_cleared_id(ChannelId::MAIN), Ok(3));
        assert!(rig.scheduler.channel(ChannelId::MAIN).unwrap().is_running());
    }

    #[tokio::test]
    async fn test_skip_end_restarts_clock() {
        let rig = rig();
        rig.scheduler.start(ChannelId::MAIN, StartParams::default()).unwrap();
        rig.scheduler.skip_start(ChannelId::MAIN).unwrap();

        rig.clock.set_ms(5_000);
        rig.scheduler
            .push(ChannelId::MAIN, FrameRecord::new(1, 0, 64, 64))
            .await
            .unwrap();
        rig.scheduler.tick();
        assert!(rig.display.events().is_empty());

        rig.scheduler.skip_end(ChannelId::MAIN).unwrap();
        rig.scheduler
            .push(ChannelId::MAIN, FrameRecord::new(2, 0, 64, 64))
            .await
            .unwrap();
        rig.scheduler.tick();
        assert_eq!(rig.display.events(), vec!["show main 2"]);
    }

    #[tokio::test]
    async fn test_cancellation_drops_half_emitted_field_pair() {
        for cancel in ["skip", "clear", "end"] {
            let rig = rig();
            let params = StartParams::default().deinterlace();
            rig.scheduler.start(ChannelId::MAIN, params.clone()).unwrap();
            rig.scheduler
                .push(ChannelId::MAIN, FrameRecord::new(1, 0, 720, 480).interlaced(false))
                .await
                .unwrap();
            rig.scheduler.tick();
            assert_eq!(rig.display.events(), vec!["show main 1 f0"], "{}", cancel);

            match cancel {
                "skip" => {
                    rig.scheduler.skip_start(ChannelId::MAIN).unwrap();
                    rig.scheduler.skip_end(ChannelId::MAIN).unwrap();
                }
                "clear" => {
                    rig.scheduler.clear(ChannelId::MAIN).unwrap();
                }
                _ => {
                    rig.scheduler.end(ChannelId::MAIN).unwrap();
                    rig.scheduler.start(ChannelId::MAIN, params).unwrap();
                }
            }

            rig.scheduler
                .push(ChannelId::MAIN, FrameRecord::new(2, 0, 720, 480).interlaced(false))
                .await
                .unwrap();
            rig.scheduler.tick();

            let events = rig.display.events();
            assert!(!events.iter().any(|e| e == "show main 1 f1"), "{}: {:?}", cancel, events);
            assert_eq!(events.last().map(String::as_str), Some("show main 2 f0"), "{}", cancel);
        }
    }

    #[test]
    fn test_notify_framerate() {
        let rig = rig();
        rig.scheduler.notify_framerate(ChannelId::MAIN, 29).unwrap();
        let channel = rig.scheduler.channel(ChannelId::MAIN).unwrap();
        assert_eq!(channel.lock_core().clock.frame_rate(), Some(30));
        assert_eq!(channel.lock_core().clock.tolerance_ms(), 33);
    }

    #[test]
    fn test_overlapping_tick_is_skipped() {
        let rig = rig();
        let _held = rig.scheduler.tick_guard.lock().unwrap();
        // Would deadlock if tick blocked on the guard
        rig.scheduler.tick();
    }

    #[test]
    fn test_shutdown_ends_all() {
        let rig = rig();
        for id in ChannelId::all() {
            rig.scheduler.start(id, StartParams::default()).unwrap();
        }
        assert_eq!(rig.scheduler.running_count(), 5);

        rig.scheduler.shutdown();
        assert_eq!(rig.scheduler.running_count(), 0);
        assert_eq!(*rig.ticker.unsubscribed.lock().unwrap(), vec![ChannelId::MAIN]);
    }
}
