//! Two-phase field emission for interlaced sources
//!
//! ```text
//!            new frame / submit field 0
//!   Field0 ─────────────────────────────► Field1
//!     ▲  │                                  │
//!     │  └─ unchanged + duplicate policy:   │
//!     │     repeat last field               │
//!     └──────── submit field 1 ─────────────┘
//!               (regardless of buffer)
//! ```
//!
//! A resolution change while in `Field0` resets the downstream deinterlacer
//! and submits a single field; the pair restarts with the next frame.

/// Scan-line parity of a field
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Parity {
    /// Even lines (top field)
    Top,
    /// Odd lines (bottom field)
    Bottom,
}

impl Parity {
    /// The other parity
    pub fn opposite(self) -> Self {
        match self {
            Parity::Top => Parity::Bottom,
            Parity::Bottom => Parity::Top,
        }
    }

    /// Parity of the temporally first field
    pub fn first(odd_field_first: bool) -> Self {
        if odd_field_first {
            Parity::Bottom
        } else {
            Parity::Top
        }
    }
}

/// Where the state machine stands
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldPhase {
    /// Waiting for a new interlaced source frame
    Field0,
    /// Second field of the frame in flight is pending
    Field1,
}

/// One field handed to the display collaborator
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FieldSubmission {
    /// 0 for the first field of a frame, 1 for the second
    pub index: u8,
    /// Lines to show
    pub parity: Parity,
    /// Downstream deinterlacer must drop its history
    pub reset: bool,
    /// Same field shown again because no new frame arrived
    pub repeat: bool,
}

/// Deinterlace state for one channel
#[derive(Debug, Clone)]
pub struct FieldState {
    phase: FieldPhase,
    /// Parity of the last submitted field, `None` before the first one
    parity: Option<Parity>,
    last: Option<FieldSubmission>,
}

impl FieldState {
    pub fn new() -> Self {
        Self {
            phase: FieldPhase::Field0,
            parity: None,
            last: None,
        }
    }

    /// Current phase
    pub fn phase(&self) -> FieldPhase {
        self.phase
    }

    /// Parity of the last submitted field
    pub fn parity(&self) -> Option<Parity> {
        self.parity
    }

    /// Emit field 1 of the frame in flight, if pending
    pub fn second_field(&mut self) -> Option<FieldSubmission> {
        if self.phase != FieldPhase::Field1 {
            return None;
        }
        let parity = self.parity.map_or(Parity::Bottom, Parity::opposite);
        let submission = FieldSubmission {
            index: 1,
            parity,
            reset: false,
            repeat: false,
        };
        self.parity = Some(parity);
        self.phase = FieldPhase::Field0;
        self.last = Some(submission);
        Some(submission)
    }

    /// Emit field 0 of a new source frame
    ///
    /// With `resolution_changed` the deinterlacer is reset and the state
    /// stays in `Field0`, so the pair is not completed.
    pub fn first_field(&mut self, odd_field_first: bool, resolution_changed: bool) -> FieldSubmission {
        let parity = Parity::first(odd_field_first);
        let submission = FieldSubmission {
            index: 0,
            parity,
            reset: resolution_changed,
            repeat: false,
        };
        self.parity = Some(parity);
        self.phase = if resolution_changed {
            FieldPhase::Field0
        } else {
            FieldPhase::Field1
        };
        self.last = Some(submission);
        submission
    }

    /// Re-render the last field while waiting for new data
    pub fn repeat(&self) -> Option<FieldSubmission> {
        if self.phase != FieldPhase::Field0 {
            return None;
        }
        self.last.map(|last| FieldSubmission {
            reset: false,
            repeat: true,
            ..last
        })
    }

    /// Drop any half-emitted pair
    pub fn reset(&mut self) {
        *self = Self::new();
    }
}

impl Default for FieldState {
    fn default() -> Self {
        Self::new()
    }
}
