//! Frame pacing core
//!
//! Producers push decoded frames into a channel at any time; a periodic tick
//! decides, per channel, which buffered frame the display shows next.
//!
//! # Architecture
//!
//! ```text
//!                           Arc<Scheduler>
//!                  ┌──────────────────────────────┐
//!                  │ channels: [Channel; 5] {     │
//!                  │   core: Mutex<PacingCore {   │
//!                  │     ring: RingBuffer,        │
//!                  │     clock: ClockSync,        │
//!                  │   }>,                        │
//!                  │   dispatch: Mutex<..>,       │
//!                  │ }                            │
//!                  └───────┬──────────────▲───────┘
//!                          │              │
//!         push().await ────┘              └──── TickSource (vsync)
//!         observe + reconcile                   Dispatcher::tick()
//!                                                  │
//!                                                  ▼
//!                                         DisplayProgram::display()
//! ```
//!
//! # Dispatch policy
//!
//! A tick shows the latest due frame and drops older due frames, so latency
//! stays bounded when the display falls behind. Within a channel frames are
//! shown in non-decreasing timestamp order.

pub mod channel;
pub mod clock;
pub mod config;
pub mod dispatch;
pub mod field;
pub mod frame;
pub mod output;
pub mod ring;
pub mod scheduler;
pub mod tick;

pub use channel::{Channel, StartParams};
pub use clock::{ClockSync, Correction, HardwareClock, ManualClock, MonotonicClock};
pub use config::PacingConfig;
pub use dispatch::Dispatcher;
pub use field::{FieldPhase, FieldState, FieldSubmission, Parity};
pub use frame::{ChannelId, CropRect, FrameRecord, OutputId, MAX_CHANNELS};
pub use output::{DisplayProgram, DisplayRequest, OutputMonitor, SharedOutputs};
pub use ring::RingBuffer;
pub use scheduler::{Backends, Scheduler};
pub use tick::{IntervalTicker, TickCallback, TickSource};
