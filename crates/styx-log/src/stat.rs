//! Log boundaries and the in-memory state they are derived from.

use serde::{Deserialize, Serialize};

use crate::segment::SegmentDescriptor;

/// Snapshot of the live boundaries of a log.
///
/// `end_*` is the durable end: readers never see a record before the fsync
/// covering it has completed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Stat {
    pub start_position: i64,
    pub start_offset: i64,
    pub start_timestamp: i64,
    pub end_position: i64,
    pub end_offset: i64,
}

impl Stat {
    /// Number of records between start and end.
    pub fn len(&self) -> i64 {
        self.end_position - self.start_position
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Bytes between start and end.
    pub fn size(&self) -> i64 {
        self.end_offset - self.start_offset
    }
}

/// State guarded by the log's state mutex.
///
/// Invariant: `synced <= flushed <= writer position`, for positions and
/// offsets alike.
#[derive(Debug, Default)]
pub(crate) struct LogState {
    pub segments: Vec<SegmentDescriptor>,
    pub flushed_position: i64,
    pub flushed_offset: i64,
    pub synced_position: i64,
    pub synced_offset: i64,
    pub directory_dirty: bool,
}

impl LogState {
    pub fn new(segments: Vec<SegmentDescriptor>, position: i64, offset: i64) -> Self {
        Self {
            segments,
            flushed_position: position,
            flushed_offset: offset,
            synced_position: position,
            synced_offset: offset,
            directory_dirty: false,
        }
    }

    pub fn stat(&self) -> Stat {
        let (start_position, start_offset, start_timestamp) = match self.segments.first() {
            Some(first) => (first.base_position, first.base_offset, first.base_timestamp),
            None => (self.synced_position, self.synced_offset, 0),
        };
        // Count retention can run ahead of the syncer and drop records that
        // were never synced; nothing below start is readable then.
        let (end_position, end_offset) = if self.synced_position < start_position {
            (start_position, start_offset)
        } else {
            (self.synced_position, self.synced_offset)
        };
        Stat {
            start_position,
            start_offset,
            start_timestamp,
            end_position,
            end_offset,
        }
    }

    /// Remove the leading run of segments for which `expired(segment, next)`
    /// holds. The last segment is never removed.
    pub fn remove_leading<F>(&mut self, mut expired: F) -> Vec<SegmentDescriptor>
    where
        F: FnMut(&SegmentDescriptor, &SegmentDescriptor) -> bool,
    {
        let mut count = 0;
        while count + 1 < self.segments.len()
            && expired(&self.segments[count], &self.segments[count + 1])
        {
            count += 1;
        }
        if count > 0 {
            self.directory_dirty = true;
        }
        self.segments.drain(..count).collect()
    }
}
