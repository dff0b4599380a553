//! Bounded record store with a replay cursor.
//!
//! Records are numbered from 0 in arrival order. When the store is full
//! the oldest record is folded into a base channel state, so replaying
//! from the first stored record still yields the full channel picture.

use dia_common::channel::{ChannelSnapshot, LoggingEvent, LoggingEventKind};
use dia_common::error::{CoreError, CoreResult};
use std::collections::{BTreeMap, VecDeque};

/// Reference point of a seek.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Whence {
    /// Relative to the earliest stored record.
    Set,
    /// Relative to the cursor.
    Cur,
    /// Relative to the latest stored record.
    End,
    /// Relative to an explicit absolute record index.
    Rec,
}

/// Record last delivered by the cursor.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LogPosition {
    /// Absolute record index.
    pub record: u64,
    /// Timestamp of that record's sample (0.0 for `META`).
    pub timestamp: f64,
}

/// Record store plus cursor.
///
/// The cursor names the next record [`next`](Self::next) returns; the
/// replayed channel state covers every record before it.
#[derive(Debug, Clone)]
pub struct LogReplay {
    capacity: usize,
    base: BTreeMap<String, ChannelSnapshot>,
    records: VecDeque<LoggingEvent>,
    next_record: u64,
    cursor: u64,
    last_read: Option<LogPosition>,
}

fn apply_event(state: &mut BTreeMap<String, ChannelSnapshot>, event: &LoggingEvent) {
    let Some(channel) = &event.channel else {
        return;
    };
    match event.kind {
        LoggingEventKind::ChannelAdded | LoggingEventKind::NewSample => {
            state.insert(channel.name.clone(), channel.clone());
        }
        LoggingEventKind::ChannelRemoved => {
            state.remove(&channel.name);
        }
        LoggingEventKind::Meta => {}
    }
}

impl LogReplay {
    /// Empty store holding at most `capacity` records (at least one).
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            base: BTreeMap::new(),
            records: VecDeque::new(),
            next_record: 0,
            cursor: 0,
            last_read: None,
        }
    }

    /// Maximum number of stored records.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Change the capacity, evicting the oldest records if needed.
    pub fn set_capacity(&mut self, capacity: usize) {
        self.capacity = capacity.max(1);
        self.evict();
    }

    /// Number of stored records.
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// True when nothing is stored.
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Absolute index of the earliest stored record.
    pub fn first_record(&self) -> u64 {
        self.next_record - self.records.len() as u64
    }

    /// Absolute index of the latest stored record.
    pub fn last_record(&self) -> Option<u64> {
        self.next_record.checked_sub(1).filter(|_| !self.records.is_empty())
    }

    /// Cursor: index of the next record to read.
    pub fn cursor(&self) -> u64 {
        self.cursor
    }

    /// Store an event, assigning its record number.
    pub fn append(&mut self, mut event: LoggingEvent) -> u64 {
        let record = self.next_record;
        event.record = record;
        self.records.push_back(event);
        self.next_record += 1;
        self.evict();
        record
    }

    fn evict(&mut self) {
        while self.records.len() > self.capacity {
            if let Some(oldest) = self.records.pop_front() {
                apply_event(&mut self.base, &oldest);
            }
        }
        self.cursor = self.cursor.max(self.first_record());
    }

    /// Stored record by absolute index.
    pub fn get(&self, record: u64) -> Option<&LoggingEvent> {
        let offset = record.checked_sub(self.first_record())?;
        self.records.get(usize::try_from(offset).ok()?)
    }

    fn deliver(&mut self, record: u64) -> Option<LoggingEvent> {
        let event = self.get(record)?.clone();
        self.last_read = Some(LogPosition {
            record,
            timestamp: event.timestamp().unwrap_or(0.0),
        });
        Some(event)
    }

    /// Record at the cursor; advances the cursor.
    pub fn next(&mut self) -> Option<LoggingEvent> {
        let event = self.deliver(self.cursor)?;
        self.cursor += 1;
        Some(event)
    }

    /// Record before the cursor; moves the cursor back onto it.
    pub fn prev(&mut self) -> Option<LoggingEvent> {
        if self.cursor <= self.first_record() {
            return None;
        }
        self.cursor -= 1;
        self.deliver(self.cursor)
    }

    /// Move the cursor to the earliest stored record.
    pub fn rewind(&mut self) {
        self.cursor = self.first_record();
        self.last_read = None;
    }

    /// Move the cursor. Returns the new cursor.
    ///
    /// Valid targets are the stored records plus the position just past
    /// the latest one. `Rec` without an explicit record is relative to
    /// the cursor.
    ///
    /// # Errors
    /// Returns `CoreError::SeekOutOfRange` for any other target.
    pub fn seek(&mut self, offset: i64, whence: Whence, record: Option<u64>) -> CoreResult<u64> {
        let reference = match whence {
            Whence::Set => self.first_record(),
            Whence::Cur => self.cursor,
            Whence::End => self.next_record.saturating_sub(1),
            Whence::Rec => record.unwrap_or(self.cursor),
        };
        let requested = i64::try_from(reference).unwrap_or(i64::MAX).saturating_add(offset);
        let first = self.first_record();
        let out_of_range = || CoreError::SeekOutOfRange {
            requested,
            first,
            last: self.next_record,
        };
        let target = u64::try_from(requested).map_err(|_| out_of_range())?;
        if target < first || target > self.next_record {
            return Err(out_of_range());
        }
        self.cursor = target;
        Ok(target)
    }

    /// Record last delivered by `next` or `prev`.
    pub fn position(&self) -> Option<LogPosition> {
        self.last_read
    }

    /// Channel state replayed up to the cursor.
    pub fn state(&self) -> BTreeMap<String, ChannelSnapshot> {
        let mut state = self.base.clone();
        let upto = self.cursor.saturating_sub(self.first_record());
        for event in self.records.iter().take(usize::try_from(upto).unwrap_or(usize::MAX)) {
            apply_event(&mut state, event);
        }
        state
    }
}
