//! Frame records and identifiers
//!
//! This module defines the identifiers for channels and outputs and the
//! [`FrameRecord`] that producers push into a channel.

use bytes::Bytes;

/// Number of pacing channels (one main feed plus sub feeds)
pub const MAX_CHANNELS: usize = 5;

/// Identifier of a pacing channel
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ChannelId(u8);

impl ChannelId {
    /// The main video channel
    pub const MAIN: ChannelId = ChannelId(0);

    /// Create a channel id, returning `None` outside the fixed channel set
    pub fn new(index: u8) -> Option<Self> {
        ((index as usize) < MAX_CHANNELS).then_some(Self(index))
    }

    /// Sub channel `n` (1-based, e.g. picture-in-picture feeds)
    pub fn sub(n: u8) -> Option<Self> {
        if n == 0 {
            None
        } else {
            Self::new(n)
        }
    }

    /// Index into the channel array
    pub fn index(self) -> usize {
        self.0 as usize
    }

    /// Whether this is the main channel
    pub fn is_main(self) -> bool {
        self.0 == 0
    }

    /// All channel ids in dispatch order
    pub fn all() -> impl Iterator<Item = ChannelId> {
        (0..MAX_CHANNELS as u8).map(ChannelId)
    }
}

impl TryFrom<u8> for ChannelId {
    type Error = crate::error::Error;

    fn try_from(index: u8) -> Result<Self, Self::Error> {
        Self::new(index).ok_or(crate::error::Error::InvalidChannel(index))
    }
}

impl std::fmt::Display for ChannelId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.is_main() {
            write!(f, "main")
        } else {
            write!(f, "sub{}", self.0)
        }
    }
}

/// Identifier of a display output (panel, HDMI, CVBS, ...)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct OutputId(pub u8);

impl std::fmt::Display for OutputId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "output{}", self.0)
    }
}

/// Crop rectangle within the decoded picture
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CropRect {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

impl CropRect {
    /// Create a crop rectangle
    pub fn new(x: u32, y: u32, width: u32, height: u32) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    /// Full-picture crop for the given size
    pub fn full(width: u32, height: u32) -> Self {
        Self::new(0, 0, width, height)
    }
}

/// One buffered picture plus its scheduling metadata
///
/// Cheap to clone: buffer handles and metadata are reference counted
/// [`Bytes`]. The core never interprets either of them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FrameRecord {
    /// Unique, monotonically increasing id assigned by the producer
    pub id: u64,
    /// Presentation timestamp on the producer's media clock (ms)
    pub timestamp: i64,
    /// Wall-clock hint from the producer (ms)
    pub sync_time: Option<i64>,
    /// When false the layer is disabled instead of showing this frame
    pub enable: bool,
    /// Layer selector within the channel
    pub layer: u8,
    /// Picture width
    pub width: u32,
    /// Picture height
    pub height: u32,
    /// Visible region
    pub crop: CropRect,
    /// Opaque buffer handles (one per plane)
    pub planes: Vec<Bytes>,
    /// Source is interlaced
    pub interlaced: bool,
    /// Bottom (odd) field is temporally first
    pub odd_field_first: bool,
    /// Opaque side information (HDR and similar), passed through untouched
    pub metadata: Option<Bytes>,
    /// Set by the core when geometry differs from the previous frame
    pub size_changed: bool,
    /// Set by the core when the frame must be dropped at dispatch
    pub(crate) skip: bool,
}

impl FrameRecord {
    /// Create a progressive frame with full-picture crop
    pub fn new(id: u64, timestamp: i64, width: u32, height: u32) -> Self {
        Self {
            id,
            timestamp,
            sync_time: None,
            enable: true,
            layer: 0,
            width,
            height,
            crop: CropRect::full(width, height),
            planes: Vec::new(),
            interlaced: false,
            odd_field_first: false,
            metadata: None,
            size_changed: false,
            skip: false,
        }
    }

    /// Set the sync timestamp
    pub fn with_sync_time(mut self, sync_time: i64) -> Self {
        self.sync_time = Some(sync_time);
        self
    }

    /// Mark as interlaced
    pub fn interlaced(mut self, odd_field_first: bool) -> Self {
        self.interlaced = true;
        self.odd_field_first = odd_field_first;
        self
    }

    /// Set the crop rectangle
    pub fn with_crop(mut self, crop: CropRect) -> Self {
        self.crop = crop;
        self
    }

    /// Attach a buffer handle
    pub fn with_plane(mut self, plane: Bytes) -> Self {
        self.planes.push(plane);
        self
    }

    /// Attach opaque metadata
    pub fn with_metadata(mut self, metadata: Bytes) -> Self {
        self.metadata = Some(metadata);
        self
    }

    /// Disable the layer when this frame is dispatched
    pub fn disabled(mut self) -> Self {
        self.enable = false;
        self
    }

    /// Whether the frame was marked to be dropped at dispatch
    pub fn is_skip(&self) -> bool {
        self.skip
    }

    /// Same id and geometry as `other`
    pub fn same_picture(&self, other: &FrameRecord) -> bool {
        self.id == other.id && self.same_geometry(other)
    }

    /// Same size and crop as `other`
    pub fn same_geometry(&self, other: &FrameRecord) -> bool {
        self.width == other.width && self.height == other.height && self.crop == other.crop
    }
}
