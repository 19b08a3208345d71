//! Statistics for pacing channels

pub mod metrics;

pub use metrics::{ChannelCounters, ChannelStats};
