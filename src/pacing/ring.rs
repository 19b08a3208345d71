//! Bounded frame ring with write/read/clear cursors
//!
//! Frames move through three stages:
//! 1. pushed (between `clear` and `write`): owned by the ring
//! 2. popped (between `clear` and `read`): handed to the dispatcher but the
//!    slot is not yet released
//! 3. cleaned: slot released, `last_cleared_id` advanced
//!
//! `total` counts stages 1 and 2, `readable` only stage 1.

use crate::error::{Error, Result};

use super::frame::FrameRecord;

/// Fixed-capacity circular store of frames
#[derive(Debug)]
pub struct RingBuffer {
    slots: Vec<Option<FrameRecord>>,
    write_idx: usize,
    read_idx: usize,
    clear_idx: usize,
    /// Frames pushed and not yet cleaned
    total: usize,
    /// Frames pushed and not yet popped
    readable: usize,
    /// Highest id released back to the producer
    last_cleared_id: u64,
    /// Highest id ever pushed
    newest_id: u64,
}

impl RingBuffer {
    /// Create an empty ring with the given capacity
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            slots: vec![None; capacity],
            write_idx: 0,
            read_idx: 0,
            clear_idx: 0,
            total: 0,
            readable: 0,
            last_cleared_id: 0,
            newest_id: 0,
        }
    }

    /// Copy a frame into the next free slot
    pub fn push(&mut self, frame: &FrameRecord) -> Result<()> {
        if self.is_full() {
            return Err(Error::BufferFull {
                capacity: self.capacity(),
            });
        }

        self.slots[self.write_idx] = Some(frame.clone());
        self.write_idx = self.advance(self.write_idx);
        self.total += 1;
        self.readable += 1;
        self.newest_id = self.newest_id.max(frame.id);
        Ok(())
    }

    /// Take the oldest readable frame
    ///
    /// The slot stays occupied until the next [`clean`](Self::clean).
    pub fn pop(&mut self) -> Result<FrameRecord> {
        if self.readable == 0 {
            return Err(Error::Empty);
        }

        let frame = self.slots[self.read_idx].clone().ok_or(Error::Empty)?;
        self.read_idx = self.advance(self.read_idx);
        self.readable -= 1;
        Ok(frame)
    }

    /// Look `offset` frames past the read cursor without consuming
    pub fn peek(&self, offset: usize) -> Option<&FrameRecord> {
        if offset >= self.readable {
            return None;
        }
        let idx = (self.read_idx + offset) % self.capacity();
        self.slots[idx].as_ref()
    }

    /// Release every popped slot
    ///
    /// Returns the number of slots freed, so the caller can wake producers
    /// waiting for space.
    pub fn clean(&mut self) -> usize {
        // Counting instead of comparing cursors: a fully popped ring has
        // clear_idx == read_idx with every slot pending.
        let pending = self.total - self.readable;
        for _ in 0..pending {
            if let Some(frame) = self.slots[self.clear_idx].take() {
                self.last_cleared_id = self.last_cleared_id.max(frame.id);
            }
            self.clear_idx = self.advance(self.clear_idx);
            self.total -= 1;
        }
        pending
    }

    /// Drop everything, releasing all ids seen so far
    ///
    /// `reason` only feeds the log.
    pub fn flush_all(&mut self, reason: &str) -> usize {
        let dropped = self.readable;
        self.last_cleared_id = self.last_cleared_id.max(self.newest_id);
        for slot in &mut self.slots {
            *slot = None;
        }
        self.clear_idx = self.write_idx;
        self.read_idx = self.write_idx;
        self.total = 0;
        self.readable = 0;

        tracing::debug!(
            reason = reason,
            dropped = dropped,
            last_cleared_id = self.last_cleared_id,
            "Frame ring flushed"
        );
        dropped
    }

    /// Mark everything up to `id` as finished without touching the slots
    pub fn skip_to(&mut self, id: u64) {
        self.last_cleared_id = self.last_cleared_id.max(id);
    }

    /// Slot count
    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    /// Frames still waiting to be popped
    pub fn readable_count(&self) -> usize {
        self.readable
    }

    /// Frames pushed and not yet cleaned
    pub fn total_count(&self) -> usize {
        self.total
    }

    /// Whether no slot is free
    pub fn is_full(&self) -> bool {
        self.total >= self.capacity()
    }

    /// Highest id finished with (displayed, dropped or skipped)
    pub fn last_cleared_id(&self) -> u64 {
        self.last_cleared_id
    }

    fn advance(&self, idx: usize) -> usize {
        (idx + 1) % self.capacity()
    }
}
