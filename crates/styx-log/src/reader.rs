//! Log Reader
//!
//! A cursor over the records of a log. Readers never see past the synced
//! end published in the log's [`Stat`], so everything they return is
//! durable.
//!
//! ## Segment Walk
//!
//! ```text
//! segment N ──Eof──► segment whose base == position ──► ...
//!                     │ none, position < first base   → Lagging
//!                     │ none, later segment exists    → Corrupt (gap)
//!                     └ current is last                → keep filling
//! ```
//!
//! ## Follow Mode
//!
//! At the end of the log a following reader blocks in `fill` until the
//! writer publishes a new stat, the log closes (`Closed`), or the deadline
//! armed by [`LogReader::set_wait_deadline`] passes (`Timeout`). The
//! deadline is single-shot and consumed by the wait it applies to.

use std::io::ErrorKind;

use styx_core::{IoMode, Record};
use tokio::sync::watch;
use tokio::time::Instant;
use tracing::debug;

use crate::error::{Error, Result};
use crate::log::Log;
use crate::segment::{SegmentDescriptor, SegmentReader};
use crate::stat::Stat;

/// Reference point for [`LogReader::seek`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Whence {
    /// Absolute position
    Origin,
    /// Relative to the first retained record
    Start,
    /// Relative to the cursor
    Current,
    /// Relative to the synced end
    End,
}

pub struct LogReader {
    log: Log,
    buffer_size: usize,
    follow: bool,
    mode: IoMode,
    segment: Option<SegmentReader>,
    position: i64,
    offset: i64,
    stat: Stat,
    stat_rx: watch::Receiver<Stat>,
    deadline: Option<Instant>,
    stalled: bool,
    closed: bool,
}

impl LogReader {
    pub(crate) async fn new(log: Log, buffer_size: usize, follow: bool, mode: IoMode) -> Result<Self> {
        let stat_rx = log.subscribe()?;
        let mut reader = Self {
            log,
            buffer_size,
            follow,
            mode,
            segment: None,
            position: 0,
            offset: 0,
            stat: Stat::default(),
            stat_rx,
            deadline: None,
            stalled: false,
            closed: false,
        };

        // Retention can delete the first segment between snapshot and open
        loop {
            let (stat, segments) = reader.log.snapshot();
            reader.stat = stat;
            reader.position = stat.start_position;
            reader.offset = stat.start_offset;
            let Some(first) = segments.first() else {
                break;
            };
            match reader.open_segment(first.clone()).await {
                Ok(segment) => {
                    reader.segment = Some(segment);
                    break;
                }
                Err(Error::Lagging) => continue,
                Err(e) => return Err(e),
            }
        }

        debug!(
            path = ?reader.log.path(),
            position = reader.position,
            follow,
            "Log reader opened"
        );
        Ok(reader)
    }

    /// Read the next record into `record`, returning its on-disk size.
    pub async fn read(&mut self, record: &mut Record) -> Result<usize> {
        self.check_usable()?;
        loop {
            if self.position >= self.stat.end_position {
                self.refresh();
                if self.position >= self.stat.end_position {
                    if !self.follow {
                        return Err(Error::Eof);
                    }
                    match self.mode {
                        IoMode::Manual => return Err(Error::MustFill),
                        IoMode::Auto => {
                            self.wait_for_data().await?;
                            continue;
                        }
                    }
                }
            }

            if self.segment.is_none() {
                self.open_at(self.position).await?;
            }
            let Some(segment) = self.segment.as_mut() else {
                return Err(Error::Eof);
            };

            match segment.read(record).await {
                Ok(n) => {
                    self.stalled = false;
                    self.position += 1;
                    self.offset += n as i64;
                    return Ok(n);
                }
                Err(Error::MustFill) => match self.mode {
                    IoMode::Manual => return Err(Error::MustFill),
                    IoMode::Auto => {
                        segment.fill().await?;
                    }
                },
                Err(Error::Eof) => {
                    if self.next_segment().await? {
                        continue;
                    }
                    self.stalled = true;
                    match self.mode {
                        IoMode::Manual => return Err(Error::MustFill),
                        IoMode::Auto => {
                            self.fill_current().await?;
                        }
                    }
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Refill the read buffer, blocking for new records in follow mode.
    pub async fn fill(&mut self) -> Result<usize> {
        self.check_usable()?;
        if self.position >= self.stat.end_position {
            self.refresh();
            if self.position >= self.stat.end_position {
                if !self.follow {
                    return Err(Error::Eof);
                }
                self.wait_for_data().await?;
            }
        }
        if self.segment.is_none() {
            self.open_at(self.position).await?;
        }
        self.fill_current().await
    }

    /// Fill the current segment's buffer. After the segment reported
    /// `Eof` with records still owed, an empty fill means the file was cut
    /// short.
    async fn fill_current(&mut self) -> Result<usize> {
        let Some(segment) = self.segment.as_mut() else {
            return Ok(0);
        };
        let n = segment.fill().await?;
        if n == 0 && self.stalled && self.position < self.stat.end_position {
            return Err(Error::corrupt(format!(
                "segment ends at position {} before log end {}",
                self.position, self.stat.end_position
            )));
        }
        Ok(n)
    }

    /// Switch to the segment starting at the cursor. Returns `false` when
    /// the current segment is still the right one.
    async fn next_segment(&mut self) -> Result<bool> {
        let segments = self.log.segments();
        if let Some(next) = segments.iter().find(|d| d.base_position == self.position) {
            let current = self.segment.as_ref().map(|s| s.descriptor().name.as_str());
            if current == Some(next.name.as_str()) {
                return Ok(false);
            }
            let segment = self.open_segment(next.clone()).await?;
            self.segment = Some(segment);
            self.stalled = false;
            return Ok(true);
        }

        match segments.first() {
            Some(first) if self.position < first.base_position => Err(Error::Lagging),
            _ => {
                let current_base = self
                    .segment
                    .as_ref()
                    .map_or(i64::MIN, |s| s.descriptor().base_position);
                if segments.iter().any(|d| d.base_position > current_base) {
                    Err(Error::corrupt(format!(
                        "no segment starts at position {}",
                        self.position
                    )))
                } else {
                    Ok(false)
                }
            }
        }
    }

    async fn wait_for_data(&mut self) -> Result<()> {
        let mut deadline = None;
        let mut armed = false;
        loop {
            self.refresh();
            if self.position < self.stat.end_position {
                return Ok(());
            }
            if self.log.is_closed() {
                return Err(Error::Closed);
            }

            // Only a wait that actually blocks consumes the deadline.
            if !armed {
                deadline = self.deadline.take();
                armed = true;
            }
            let changed = self.stat_rx.changed();
            match deadline {
                Some(deadline) => {
                    tokio::select! {
                        result = changed => result.map_err(|_| Error::Closed)?,
                        _ = tokio::time::sleep_until(deadline) => return Err(Error::Timeout),
                    }
                }
                None => changed.await.map_err(|_| Error::Closed)?,
            }
        }
    }

    /// Move the cursor. The target must lie within `[start, end]`.
    pub async fn seek(&mut self, pos: i64, whence: Whence) -> Result<i64> {
        self.check_usable()?;
        self.refresh();
        let reference = match whence {
            Whence::Origin => 0,
            Whence::Start => self.stat.start_position,
            Whence::Current => self.position,
            Whence::End => self.stat.end_position,
        };
        let target = reference.checked_add(pos).ok_or(Error::OutOfRange)?;
        if target < self.stat.start_position || target > self.stat.end_position {
            return Err(Error::OutOfRange);
        }

        self.open_at(target).await?;
        Ok(target)
    }

    /// Open the segment holding `target` and position inside it.
    async fn open_at(&mut self, target: i64) -> Result<()> {
        let segments = self.log.segments();
        let Some(desc) = segments.iter().rev().find(|d| d.base_position <= target) else {
            return match segments.first() {
                Some(_) => Err(Error::Lagging),
                None => {
                    self.segment = None;
                    self.position = target;
                    Ok(())
                }
            };
        };

        let mut segment = self.open_segment(desc.clone()).await?;
        if target > desc.base_position {
            segment.seek(target).await?;
        }
        self.position = segment.position();
        self.offset = segment.offset();
        self.segment = Some(segment);
        self.stalled = false;
        Ok(())
    }

    async fn open_segment(&self, desc: SegmentDescriptor) -> Result<SegmentReader> {
        let inner = self.log.inner();
        match SegmentReader::open(
            &inner.path,
            desc,
            inner.config.max_record_size,
            self.buffer_size,
            inner.options.index_buffer_size,
            IoMode::Manual,
        )
        .await
        {
            Ok(segment) => Ok(segment),
            Err(Error::Io(e)) if e.kind() == ErrorKind::NotFound => Err(Error::Lagging),
            Err(e) => Err(e),
        }
    }

    fn refresh(&mut self) {
        self.stat_rx.borrow_and_update();
        self.stat = self.log.stat();
    }

    /// Arm a single-shot deadline for the next blocking wait.
    pub fn set_wait_deadline(&mut self, deadline: Instant) {
        self.deadline = Some(deadline);
    }

    /// Position and offset of the next record to be read.
    pub fn tell(&self) -> (i64, i64) {
        (self.position, self.offset)
    }

    /// Last stat this reader observed.
    pub fn stat(&self) -> Stat {
        self.stat
    }

    pub fn is_follow(&self) -> bool {
        self.follow
    }

    pub fn close(&mut self) -> Result<()> {
        if self.closed {
            return Err(Error::Closed);
        }
        self.closed = true;
        self.segment = None;
        Ok(())
    }

    fn check_usable(&self) -> Result<()> {
        if self.closed {
            return Err(Error::Closed);
        }
        self.log.check_open()
    }
}
