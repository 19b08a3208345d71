//! Tick-driven frame selection
//!
//! Per tick and channel:
//! 1. release slots popped on the previous tick
//! 2. bail out when stopped, on a foreign output, or in skip mode
//! 3. finish a pending field pair
//! 4. pop every frame that is due; only the latest one is shown, older due
//!    frames are dropped (bounded latency under overload, not FIFO)
//! 5. hand the result to the display collaborator with no lock held

use std::sync::Arc;

use crate::error::Error;
use crate::stats::ChannelCounters;

use super::channel::{Channel, DispatchState};
use super::clock::HardwareClock;
use super::frame::FrameRecord;
use super::output::{DisplayProgram, DisplayRequest, OutputMonitor};

/// What the tick decided, executed after the locks are released
#[derive(Debug)]
enum Action {
    Show(DisplayRequest),
    Disable,
    Idle,
}

/// Frame selected from the ring this tick
struct Due {
    frame: Option<FrameRecord>,
    duplicate_fields: bool,
}

/// Decides, per tick, which buffered frame goes to the display
pub struct Dispatcher {
    display: Arc<dyn DisplayProgram>,
    outputs: Arc<dyn OutputMonitor>,
    clock: Arc<dyn HardwareClock>,
}

impl Dispatcher {
    pub fn new(
        display: Arc<dyn DisplayProgram>,
        outputs: Arc<dyn OutputMonitor>,
        clock: Arc<dyn HardwareClock>,
    ) -> Self {
        Self {
            display,
            outputs,
            clock,
        }
    }

    /// Run one tick for `channel`
    pub fn tick(&self, channel: &Channel) {
        channel.clean();
        if !channel.is_running() {
            return;
        }

        match self.decide(channel) {
            Action::Show(request) => {
                ChannelCounters::bump(&channel.counters.dispatched);
                if request.field.is_some() {
                    ChannelCounters::bump(&channel.counters.fields);
                }
                self.display.display(&request);
            }
            Action::Disable => {
                ChannelCounters::bump(&channel.counters.dispatched);
                self.display.disable(channel.id());
            }
            Action::Idle => {}
        }
    }

    fn decide(&self, channel: &Channel) -> Action {
        let mut state = channel.lock_dispatch();

        let active = self.outputs.active_output();
        if state.output != active {
            state.fields.reset();
            state.displayed = None;
            let dropped = channel.lock_core().ring.flush_all("output mismatch");
            if dropped > 0 {
                ChannelCounters::add(&channel.counters.dropped, dropped as u64);
                let err = Error::OutputMismatch {
                    selected: state.output,
                    active,
                };
                tracing::debug!(
                    channel = %channel.id(),
                    error = %err,
                    dropped = dropped,
                    "Frames dropped"
                );
            }
            return Action::Idle;
        }

        if channel.in_skip_mode() {
            self.drain(channel);
            return Action::Idle;
        }

        if let Some(field) = state.fields.second_field() {
            return match state.displayed.clone() {
                Some(frame) => Action::Show(DisplayRequest {
                    channel: channel.id(),
                    frame,
                    field: Some(field),
                    to_memory: state.to_memory,
                }),
                None => Action::Idle,
            };
        }

        let due = if state.to_memory {
            self.next_in_order(channel)
        } else {
            self.latest_due(channel)
        };

        match due.frame {
            Some(frame) => Self::present(channel, &mut state, frame, due.duplicate_fields),
            None => Self::repeat_field(channel, &state, due.duplicate_fields),
        }
    }

    /// Pop every due frame and keep the last one
    fn latest_due(&self, channel: &Channel) -> Due {
        let mut core = channel.lock_core();
        let hw_now = self.clock.now_us();
        let now = core.clock.virtual_now_us(hw_now) + core.clock.early_margin_us();

        let mut latest: Option<FrameRecord> = None;
        while core
            .ring
            .peek(0)
            .is_some_and(|frame| frame.timestamp * 1000 <= now)
        {
            let Ok(frame) = core.ring.pop() else {
                break;
            };
            if frame.is_skip() {
                ChannelCounters::bump(&channel.counters.dropped);
                tracing::debug!(channel = %channel.id(), frame_id = frame.id, "Skip-marked frame dropped");
                continue;
            }

            let gap = frame.timestamp * 1000 - core.clock.virtual_now_us(hw_now);
            if let Some(nudge) = core.clock.dither(gap) {
                tracing::trace!(channel = %channel.id(), gap_us = gap, nudge_us = nudge, "Dither");
            }

            if let Some(older) = latest.replace(frame) {
                ChannelCounters::bump(&channel.counters.superseded);
                tracing::debug!(
                    channel = %channel.id(),
                    frame_id = older.id,
                    timestamp = older.timestamp,
                    "Frame skipped, newer frame due"
                );
            }
        }

        Due {
            frame: latest,
            duplicate_fields: core.clock.duplicate_fields(),
        }
    }

    /// Memory output: one frame per tick, in order, clock ignored
    fn next_in_order(&self, channel: &Channel) -> Due {
        let mut core = channel.lock_core();
        let mut next = None;
        while let Ok(frame) = core.ring.pop() {
            if frame.is_skip() {
                ChannelCounters::bump(&channel.counters.dropped);
                continue;
            }
            next = Some(frame);
            break;
        }
        Due {
            frame: next,
            duplicate_fields: false,
        }
    }

    fn drain(&self, channel: &Channel) {
        let mut core = channel.lock_core();
        let mut dropped = 0;
        while core.ring.pop().is_ok() {
            dropped += 1;
        }
        if dropped > 0 {
            ChannelCounters::add(&channel.counters.dropped, dropped);
            tracing::trace!(channel = %channel.id(), dropped = dropped, "Skip mode, frames discarded");
        }
    }

    fn present(
        channel: &Channel,
        state: &mut DispatchState,
        mut frame: FrameRecord,
        duplicate_fields: bool,
    ) -> Action {
        if state
            .displayed
            .as_ref()
            .is_some_and(|current| current.same_picture(&frame))
        {
            return Self::repeat_field(channel, state, duplicate_fields);
        }

        let previous = state.displayed.as_ref();
        frame.size_changed = previous.is_some_and(|prev| !prev.same_geometry(&frame));
        let resolution_changed = previous.is_some_and(|prev| prev.crop != frame.crop);

        if !frame.enable {
            state.fields.reset();
            state.displayed = Some(frame);
            return Action::Disable;
        }

        let field = (state.deinterlace && frame.interlaced).then(|| {
            if resolution_changed {
                tracing::debug!(
                    channel = %channel.id(),
                    frame_id = frame.id,
                    width = frame.crop.width,
                    height = frame.crop.height,
                    "Resolution changed, resetting deinterlacer"
                );
            }
            state
                .fields
                .first_field(frame.odd_field_first, resolution_changed)
        });

        state.displayed = Some(frame.clone());
        Action::Show(DisplayRequest {
            channel: channel.id(),
            frame,
            field,
            to_memory: state.to_memory,
        })
    }

    /// Re-render the last field when content runs slower than two fields
    /// per frame can cover
    fn repeat_field(channel: &Channel, state: &DispatchState, duplicate_fields: bool) -> Action {
        if !(state.deinterlace && duplicate_fields) {
            return Action::Idle;
        }
        let Some(frame) = state.displayed.as_ref().filter(|frame| frame.interlaced) else {
            return Action::Idle;
        };
        match state.fields.repeat() {
            Some(field) => Action::Show(DisplayRequest {
                channel: channel.id(),
                frame: frame.clone(),
                field: Some(field),
                to_memory: state.to_memory,
            }),
            None => Action::Idle,
        }
    }
}

impl std::fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dispatcher").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    use crate::pacing::channel::StartParams;
    use crate::pacing::clock::ManualClock;
    use crate::pacing::config::PacingConfig;
    use crate::pacing::field::Parity;
    use crate::pacing::frame::{ChannelId, CropRect, OutputId};
    use crate::pacing::output::SharedOutputs;

    #[derive(Default)]
    struct Recorder {
        shown: Mutex<Vec<DisplayRequest>>,
        disabled: Mutex<u32>,
    }

    impl Recorder {
        fn ids(&self) -> Vec<u64> {
            self.shown.lock().unwrap().iter().map(|r| r.frame.id).collect()
        }
    }

    impl DisplayProgram for Recorder {
        fn display(&self, request: &DisplayRequest) {
            self.shown.lock().unwrap().push(request.clone());
        }

        fn disable(&self, _channel: ChannelId) {
            *self.disabled.lock().unwrap() += 1;
        }
    }

    struct Rig {
        channel: Channel,
        clock: Arc<ManualClock>,
        outputs: Arc<SharedOutputs>,
        display: Arc<Recorder>,
        dispatcher: Dispatcher,
    }

    impl Rig {
        fn new(params: StartParams) -> Self {
            let clock = Arc::new(ManualClock::new());
            let outputs = Arc::new(SharedOutputs::new(OutputId(0)));
            let display = Arc::new(Recorder::default());
            let channel = Channel::new(ChannelId::MAIN, &PacingConfig::default());
            channel.start(params, clock.now_us());
            let dispatcher = Dispatcher::new(display.clone(), outputs.clone(), clock.clone());
            Self {
                channel,
                clock,
                outputs,
                display,
                dispatcher,
            }
        }

        fn push(&self, frame: FrameRecord) {
            self.channel.lock_core().ring.push(&frame).unwrap();
        }

        fn tick_at(&self, ms: i64) {
            self.clock.set_ms(ms);
            self.dispatcher.tick(&self.channel);
        }
    }

    #[test]
    fn test_latest_due_wins() {
        let rig = Rig::new(StartParams::default().frame_rate(30));
        for id in 0..4 {
            rig.push(FrameRecord::new(id, id as i64 * 33, 64, 64));
        }

        // Frames 0, 1 and 2 are all due at 80ms: only 2 is shown
        rig.tick_at(80);
        assert_eq!(rig.display.ids(), vec![2]);
        assert_eq!(rig.channel.stats().superseded, 2);
        assert_eq!(rig.channel.last_displayed_id(), Some(2));
        assert_eq!(rig.channel.readable_count(), 1);
    }

    #[test]
    fn test_never_shows_future_frames() {
        let rig = Rig::new(StartParams::default().frame_rate(30));
        rig.push(FrameRecord::new(1, 100, 64, 64));

        // now + margin = 80 + 8.3 < 100
        rig.tick_at(80);
        assert!(rig.display.ids().is_empty());
        rig.tick_at(96);
        assert_eq!(rig.display.ids(), vec![1]);
    }

    #[test]
    fn test_same_picture_not_redispatched() {
        let rig = Rig::new(StartParams::default());
        let frame = FrameRecord::new(1, 0, 64, 64);
        rig.push(frame.clone());
        rig.tick_at(0);
        rig.push(frame);
        rig.tick_at(16);
        assert_eq!(rig.display.ids(), vec![1]);
    }

    #[test]
    fn test_output_mismatch_drops_softly() {
        let rig = Rig::new(StartParams::default());
        rig.push(FrameRecord::new(1, 0, 64, 64));
        rig.push(FrameRecord::new(2, 0, 64, 64));

        rig.outputs.set_active(OutputId(1));
        rig.tick_at(0);
        assert!(rig.display.ids().is_empty());
        assert!(rig.channel.is_running());
        assert_eq!(rig.channel.last_cleared_id(), 2);
        assert_eq!(rig.channel.readable_count(), 0);

        rig.outputs.set_active(OutputId(0));
        rig.push(FrameRecord::new(3, 0, 64, 64));
        rig.tick_at(16);
        assert_eq!(rig.display.ids(), vec![3]);
    }

    #[test]
    fn test_output_mismatch_cancels_field_pair() {
        let rig = Rig::new(StartParams::default().deinterlace());
        rig.push(FrameRecord::new(1, 0, 720, 480).interlaced(false));
        rig.tick_at(0);

        rig.outputs.set_active(OutputId(1));
        rig.tick_at(16);
        assert_eq!(rig.channel.last_displayed_id(), None);

        rig.outputs.set_active(OutputId(0));
        rig.tick_at(1_000);

        let shown = rig.display.shown.lock().unwrap();
        let fields: Vec<(u64, u8)> = shown
            .iter()
            .map(|r| (r.frame.id, r.field.unwrap().index))
            .collect();
        assert_eq!(fields, vec![(1, 0)]);
    }

    #[test]
    fn test_skip_marked_frames_not_shown() {
        let rig = Rig::new(StartParams::default());
        let mut bad = FrameRecord::new(1, 0, 64, 64);
        bad.skip = true;
        rig.push(bad);
        rig.tick_at(0);
        assert!(rig.display.ids().is_empty());
        assert_eq!(rig.channel.stats().dropped, 1);
    }

    #[test]
    fn test_disabled_frame_disables_layer() {
        let rig = Rig::new(StartParams::default());
        rig.push(FrameRecord::new(1, 0, 64, 64).disabled());
        rig.tick_at(0);
        assert!(rig.display.ids().is_empty());
        assert_eq!(*rig.display.disabled.lock().unwrap(), 1);
        assert_eq!(rig.channel.last_displayed_id(), Some(1));
    }

    #[test]
    fn test_field_pair_then_next_frame() {
        let rig = Rig::new(StartParams::default().deinterlace().frame_rate(30));
        rig.push(FrameRecord::new(1, 0, 720, 480).interlaced(false));
        rig.push(FrameRecord::new(2, 33, 720, 480).interlaced(false));

        rig.tick_at(0);
        // Frame 2 is due here, but field 1 of frame 1 goes first
        rig.tick_at(33);
        rig.tick_at(50);

        let shown = rig.display.shown.lock().unwrap();
        let fields: Vec<(u64, u8, Parity)> = shown
            .iter()
            .map(|r| {
                let field = r.field.unwrap();
                (r.frame.id, field.index, field.parity)
            })
            .collect();
        assert_eq!(
            fields,
            vec![
                (1, 0, Parity::Top),
                (1, 1, Parity::Bottom),
                (2, 0, Parity::Top),
            ]
        );
    }

    #[test]
    fn test_resolution_change_resets_deinterlacer() {
        let rig = Rig::new(StartParams::default().deinterlace().frame_rate(30));
        rig.push(FrameRecord::new(1, 0, 720, 480).interlaced(false));
        rig.tick_at(0);
        rig.tick_at(16);

        let resized = FrameRecord::new(2, 33, 720, 576)
            .interlaced(false)
            .with_crop(CropRect::full(720, 576));
        rig.push(resized);
        rig.tick_at(33);
        rig.tick_at(50);

        let shown = rig.display.shown.lock().unwrap();
        assert_eq!(shown.len(), 3);
        let reset = &shown[2];
        assert_eq!(reset.frame.id, 2);
        assert!(reset.frame.size_changed);
        assert!(reset.field.unwrap().reset);
    }

    #[test]
    fn test_low_rate_repeats_field() {
        // 24fps on a 60Hz display: two fields do not cover the frame period
        let rig = Rig::new(StartParams::default().deinterlace().frame_rate(24));
        rig.push(FrameRecord::new(1, 0, 720, 480).interlaced(false));

        rig.tick_at(0);
        rig.tick_at(16);
        rig.tick_at(33);

        let shown = rig.display.shown.lock().unwrap();
        assert_eq!(shown.len(), 3);
        let repeat = shown[2].field.unwrap();
        assert!(repeat.repeat);
        assert_eq!(repeat.parity, Parity::Bottom);
    }

    #[test]
    fn test_memory_output_is_fifo() {
        let rig = Rig::new(StartParams::default().to_memory());
        for id in 1..=3 {
            rig.push(FrameRecord::new(id, 10_000, 64, 64));
        }

        rig.tick_at(0);
        rig.tick_at(16);
        rig.tick_at(33);
        assert_eq!(rig.display.ids(), vec![1, 2, 3]);
        assert!(rig.display.shown.lock().unwrap()[0].to_memory);
    }

    #[test]
    fn test_skip_mode_discards() {
        let rig = Rig::new(StartParams::default());
        rig.channel.skip_start().unwrap();
        rig.push(FrameRecord::new(1, 0, 64, 64));
        rig.tick_at(0);
        rig.tick_at(16);

        assert!(rig.display.ids().is_empty());
        assert_eq!(rig.channel.valid_count(), 0);
        assert_eq!(rig.channel.last_cleared_id(), 1);
    }
}
