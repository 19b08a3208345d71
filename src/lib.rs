//! Vsync-driven video frame pacing
//!
//! Accepts decoded picture buffers tagged with presentation timestamps and
//! releases the right one to the display on every refresh tick. A virtual
//! clock per channel absorbs drift between the producer's media clock and
//! the hardware clock, interlaced sources are split into two fields, and
//! seeks are handled with skip and flush controls.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use frame_pacer::pacing::{
//!     Backends, ChannelId, DisplayProgram, DisplayRequest, FrameRecord, IntervalTicker,
//!     MonotonicClock, PacingConfig, Scheduler, SharedOutputs, StartParams,
//! };
//!
//! struct Panel;
//!
//! impl DisplayProgram for Panel {
//!     fn display(&self, request: &DisplayRequest) {
//!         println!("frame {}", request.frame.id);
//!     }
//!
//!     fn disable(&self, _channel: ChannelId) {}
//! }
//!
//! #[tokio::main]
//! async fn main() -> frame_pacer::Result<()> {
//!     let config = PacingConfig::default();
//!     let scheduler = Scheduler::new(
//!         config.clone(),
//!         Backends {
//!             display: Arc::new(Panel),
//!             outputs: Arc::new(SharedOutputs::default()),
//!             clock: Arc::new(MonotonicClock::new()),
//!             ticker: Arc::new(IntervalTicker::new(config.tick_interval())),
//!         },
//!     );
//!
//!     scheduler.start(ChannelId::MAIN, StartParams::default().frame_rate(30))?;
//!     scheduler
//!         .push(ChannelId::MAIN, FrameRecord::new(1, 0, 1920, 1080))
//!         .await?;
//!     Ok(())
//! }
//! ```

pub mod error;
pub mod pacing;
pub mod stats;

pub use error::{Error, Result};
pub use pacing::{ChannelId, FrameRecord, PacingConfig, Scheduler, StartParams};
pub use stats::ChannelStats;
