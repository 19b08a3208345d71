//! Display-side collaborators
//!
//! The pacing core never touches hardware. It hands frames to a
//! [`DisplayProgram`] implementation and asks an [`OutputMonitor`] which
//! output is live.

use std::sync::atomic::{AtomicU32, AtomicU8, Ordering};

use super::field::FieldSubmission;
use super::frame::{ChannelId, FrameRecord, OutputId};

/// A "put this on screen now" request
#[derive(Debug, Clone)]
pub struct DisplayRequest {
    /// Channel the frame belongs to
    pub channel: ChannelId,
    /// Frame to show (read-only borrow of the buffered picture)
    pub frame: FrameRecord,
    /// Field to show when deinterlacing, `None` for progressive output
    pub field: Option<FieldSubmission>,
    /// Output goes to memory rather than a live display
    pub to_memory: bool,
}

/// Hardware display programming
///
/// Calls are synchronous and made without any pacing lock held. Showing the
/// same frame twice in a row must be harmless.
pub trait DisplayProgram: Send + Sync {
    /// Program the layer with this frame (or field)
    fn display(&self, request: &DisplayRequest);

    /// Disable the channel's layer
    fn disable(&self, channel: ChannelId);

    /// Free deinterlacer resources held for the channel
    fn release_deinterlacer(&self, _channel: ChannelId) {}
}

/// Process-wide output state
pub trait OutputMonitor: Send + Sync {
    /// Output currently driven by the display engine
    fn active_output(&self) -> OutputId;

    /// Whether the output is powered and present
    fn is_available(&self, output: OutputId) -> bool;
}

/// Output state held in atomics, set by the owning driver
#[derive(Debug)]
pub struct SharedOutputs {
    active: AtomicU8,
    available: AtomicU32,
}

impl SharedOutputs {
    /// Single available output that is also active
    pub fn new(active: OutputId) -> Self {
        Self {
            active: AtomicU8::new(active.0),
            available: AtomicU32::new(Self::bit(active)),
        }
    }

    /// Switch the active output
    pub fn set_active(&self, output: OutputId) {
        self.active.store(output.0, Ordering::Release);
    }

    /// Mark an output as plugged in / powered or not
    pub fn set_available(&self, output: OutputId, available: bool) {
        if available {
            self.available.fetch_or(Self::bit(output), Ordering::AcqRel);
        } else {
            self.available
                .fetch_and(!Self::bit(output), Ordering::AcqRel);
        }
    }

    fn bit(output: OutputId) -> u32 {
        1u32.checked_shl(output.0 as u32).unwrap_or(0)
    }
}

impl Default for SharedOutputs {
    fn default() -> Self {
        Self::new(OutputId::default())
    }
}

impl OutputMonitor for SharedOutputs {
    fn active_output(&self) -> OutputId {
        OutputId(self.active.load(Ordering::Acquire))
    }

    fn is_available(&self, output: OutputId) -> bool {
        self.available.load(Ordering::Acquire) & Self::bit(output) != 0
    }
}
