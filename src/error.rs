//! Error types
//!
//! All failures of the pacing core surface as [`Error`] values to the owning
//! driver. Transient conditions (`Empty`, `OutputMismatch`) are normally
//! absorbed inside the core and only logged.

use crate::pacing::frame::{ChannelId, OutputId};

/// Error type for pacing operations
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Error {
    /// Ring buffer has no free slot (backpressure)
    BufferFull {
        /// Capacity of the ring that rejected the frame
        capacity: usize,
    },
    /// Nothing readable in the ring buffer
    Empty,
    /// Requested output is not powered or not present
    OutputUnavailable(OutputId),
    /// Frame presentation time precedes its sync time; the frame was queued
    /// but marked as skip
    TimestampInvalid {
        /// Frame id
        id: u64,
        /// Presentation timestamp (ms)
        timestamp: i64,
        /// Sync timestamp (ms)
        sync_time: i64,
    },
    /// Declared time jumped too far from the virtual clock
    ClockDiscontinuity {
        /// Observed drift in milliseconds
        drift_ms: i64,
    },
    /// Channel output does not match the process-wide active output
    OutputMismatch {
        /// Output selected by the channel
        selected: OutputId,
        /// Output currently active
        active: OutputId,
    },
    /// Channel id outside the fixed channel set
    InvalidChannel(u8),
    /// Operation requires a running channel
    NotRunning(ChannelId),
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Error::BufferFull { capacity } => {
                write!(f, "Frame buffer full ({} slots)", capacity)
            }
            Error::Empty => write!(f, "Frame buffer empty"),
            Error::OutputUnavailable(output) => write!(f, "Output unavailable: {}", output),
            Error::TimestampInvalid {
                id,
                timestamp,
                sync_time,
            } => write!(
                f,
                "Frame {} timestamp {}ms precedes sync time {}ms",
                id, timestamp, sync_time
            ),
            Error::ClockDiscontinuity { drift_ms } => {
                write!(f, "Clock discontinuity ({}ms drift)", drift_ms)
            }
            Error::OutputMismatch { selected, active } => write!(
                f,
                "Output mismatch: channel targets {}, active is {}",
                selected, active
            ),
            Error::InvalidChannel(id) => write!(f, "Invalid channel: {}", id),
            Error::NotRunning(id) => write!(f, "Channel not running: {}", id),
        }
    }
}

impl std::error::Error for Error {}

/// Result alias for pacing operations
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_messages() {
        assert_eq!(
            Error::BufferFull { capacity: 4 }.to_string(),
            "Frame buffer full (4 slots)"
        );
        assert_eq!(
            Error::InvalidChannel(9).to_string(),
            "Invalid channel: 9"
        );
        assert_eq!(
            Error::NotRunning(ChannelId::MAIN).to_string(),
            "Channel not running: main"
        );
        let err = Error::TimestampInvalid {
            id: 3,
            timestamp: 10,
            sync_time: 20,
        };
        assert!(err.to_string().contains("precedes sync time 20ms"));
    }
}
