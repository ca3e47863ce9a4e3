use parking_lot::{RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::{
    ops::{Deref, DerefMut},
    time::Duration,
};
use tracing::trace;

use super::{EngineError, Record};

/// Default number of slots when no capacity is configured.
pub const DEFAULT_CAPACITY: usize = 100_000;

/// Slots past this many can hold no record, since ids are `i32`.
pub const MAX_ADDRESSABLE: usize = i32::MAX as usize + 1;

/// One fixed-position cell of the table.
///
/// `used` is the only thing deletion touches: a deleted record keeps its
/// stale bytes but is invisible to scans and handlers.
#[derive(Clone, Debug, Default)]
pub struct Slot {
    pub used: bool,
    pub record: Record,
}

/// Fixed-capacity table with one reader/writer lock per slot.
///
/// Records are addressed by id, which is also their position in the slot
/// array. Locks on different ids are independent, so queries touching
/// distinct records never serialize on a table-wide lock.
///
/// ## Scans
/// [`next_used_read`](Self::next_used_read) and
/// [`next_used_write`](Self::next_used_write) walk the table one slot at a
/// time and hold at most one lock at any moment. A scan therefore may or
/// may not observe inserts and deletes that happen while it runs; there is
/// no snapshot isolation.
///
/// ## Lock waits
/// By default acquisition blocks until the lock is free. A store built
/// with [`with_lock_timeout`](Self::with_lock_timeout) gives up after the
/// timeout and reports [`EngineError::LockTimeout`].
pub struct RecordStore {
    slots: Box<[RwLock<Slot>]>,
    lock_timeout: Option<Duration>,
}

impl RecordStore {
    /// Allocates `capacity` unused slots.
    pub fn new(capacity: usize) -> Self {
        let slots = (0..capacity)
            .map(|_| RwLock::new(Slot::default()))
            .collect::<Vec<_>>()
            .into_boxed_slice();
        Self {
            slots,
            lock_timeout: None,
        }
    }

    pub fn with_lock_timeout(capacity: usize, timeout: Duration) -> Self {
        Self {
            lock_timeout: Some(timeout),
            ..Self::new(capacity)
        }
    }

    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    pub fn lock_timeout(&self) -> Option<Duration> {
        self.lock_timeout
    }

    /// Takes a shared lock on slot `id`, whether or not it holds a live
    /// record.
    pub fn acquire_read(&self, id: i64) -> Result<ReadHandle<'_>, EngineError> {
        let index = self.index(id)?;
        self.read_slot(index)
    }

    /// Takes the exclusive lock on slot `id`.
    pub fn acquire_write(&self, id: i64) -> Result<WriteHandle<'_>, EngineError> {
        let index = self.index(id)?;
        self.write_slot(index)
    }

    /// Returns the first live slot after `after` (from the start when
    /// `None`), read-locked.
    ///
    /// Every candidate is locked in turn and unlocked again if unused. The
    /// caller must drop the previous handle before calling again.
    pub fn next_used_read(&self, after: Option<usize>) -> Result<Option<ReadHandle<'_>>, EngineError> {
        for index in Self::scan_start(after)..self.capacity() {
            let handle = self.read_slot(index)?;
            if handle.used {
                return Ok(Some(handle));
            }
        }
        Ok(None)
    }

    /// Write-locking counterpart of [`next_used_read`](Self::next_used_read).
    pub fn next_used_write(&self, after: Option<usize>) -> Result<Option<WriteHandle<'_>>, EngineError> {
        for index in Self::scan_start(after)..self.capacity() {
            let handle = self.write_slot(index)?;
            if handle.used {
                return Ok(Some(handle));
            }
        }
        Ok(None)
    }

    /// Number of live records, counted with a read scan.
    pub fn live_count(&self) -> Result<usize, EngineError> {
        let mut count = 0;
        let mut cursor = None;
        while let Some(handle) = self.next_used_read(cursor)? {
            cursor = Some(handle.id());
            count += 1;
        }
        Ok(count)
    }

    fn scan_start(after: Option<usize>) -> usize {
        after.map_or(0, |a| a.saturating_add(1))
    }

    fn index(&self, id: i64) -> Result<usize, EngineError> {
        usize::try_from(id)
            .ok()
            .filter(|&i| i < self.slots.len())
            .ok_or(EngineError::OutOfRange {
                id,
                capacity: self.slots.len(),
            })
    }

    fn read_slot(&self, index: usize) -> Result<ReadHandle<'_>, EngineError> {
        let lock = &self.slots[index];
        let guard = match self.lock_timeout {
            None => lock.read(),
            Some(timeout) => lock
                .try_read_for(timeout)
                .ok_or(EngineError::LockTimeout { id: index })?,
        };
        trace!(id = index, "locked read");
        Ok(ReadHandle { id: index, guard })
    }

    fn write_slot(&self, index: usize) -> Result<WriteHandle<'_>, EngineError> {
        let lock = &self.slots[index];
        let guard = match self.lock_timeout {
            None => lock.write(),
            Some(timeout) => lock
                .try_write_for(timeout)
                .ok_or(EngineError::LockTimeout { id: index })?,
        };
        trace!(id = index, "locked write");
        Ok(WriteHandle { id: index, guard })
    }
}

fn record_id(index: usize) -> Result<i32, EngineError> {
    i32::try_from(index).map_err(|_| EngineError::OutOfRange {
        id: i64::try_from(index).unwrap_or(i64::MAX),
        capacity: MAX_ADDRESSABLE,
    })
}

impl Default for RecordStore {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

/// Shared lock on one slot; unlocked when dropped.
pub struct ReadHandle<'a> {
    id: usize,
    guard: RwLockReadGuard<'a, Slot>,
}

impl ReadHandle<'_> {
    pub fn id(&self) -> usize {
        self.id
    }

    pub fn record(&self) -> &Record {
        &self.guard.record
    }

    /// Unlocks the slot. Dropping the handle does the same.
    pub fn release(self) {}
}

impl Deref for ReadHandle<'_> {
    type Target = Slot;

    fn deref(&self) -> &Slot {
        &self.guard
    }
}

impl Drop for ReadHandle<'_> {
    fn drop(&mut self) {
        trace!(id = self.id, "released read");
    }
}

/// Exclusive lock on one slot; unlocked when dropped.
pub struct WriteHandle<'a> {
    id: usize,
    guard: RwLockWriteGuard<'a, Slot>,
}

impl WriteHandle<'_> {
    pub fn id(&self) -> usize {
        self.id
    }

    pub fn record(&self) -> &Record {
        &self.guard.record
    }

    pub fn record_mut(&mut self) -> &mut Record {
        &mut self.guard.record
    }

    /// Stores `record` in this slot and marks it live. The record id is
    /// forced to the slot position.
    ///
    /// Fails with `OutOfRange` for slots past `i32::MAX`, which no record id
    /// can name.
    pub fn put(&mut self, mut record: Record) -> Result<(), EngineError> {
        record.id = record_id(self.id)?;
        self.guard.record = record;
        self.guard.used = true;
        Ok(())
    }

    /// Hides the record from scans. Its bytes stay in place.
    pub fn mark_deleted(&mut self) {
        self.guard.used = false;
    }

    pub fn release(self) {}
}

impl Deref for WriteHandle<'_> {
    type Target = Slot;

    fn deref(&self) -> &Slot {
        &self.guard
    }
}

impl DerefMut for WriteHandle<'_> {
    fn deref_mut(&mut self) -> &mut Slot {
        &mut self.guard
    }
}

impl Drop for WriteHandle<'_> {
    fn drop(&mut self) {
        trace!(id = self.id, "released write");
    }
}
