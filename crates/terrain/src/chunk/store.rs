//! Chunk slot table
//!
//! Pure bookkeeping: maps chunk keys to stable slot indices and keeps the
//! per-chunk fields. The key map, free list and reference counts live behind
//! one mutex; per-slot state is atomic; native handles sit behind a small
//! per-slot lock that in practice only the physics thread takes.

use super::key::ChunkKey;
use super::state::{AtomicStateWord, ChunkState, StateWord};
use crate::error::{Result, TerrainError};
use crate::jobs::JobPriority;
use crate::shape::handle::{BodyHandle, ShapeHandle};
use parking_lot::{Mutex, MutexGuard, RwLock};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, AtomicU8, Ordering};
use std::sync::Arc;

/// Stable index of a chunk slot
pub type SlotIndex = u32;

/// Native resources owned by a chunk
#[derive(Debug, Default)]
pub struct SlotResources {
    pub shape: Option<ShapeHandle>,
    pub body: Option<BodyHandle>,
}

impl SlotResources {
    /// Install a new shape, returning the previous one for release
    pub fn replace_shape(&mut self, shape: ShapeHandle) -> Option<ShapeHandle> {
        self.shape.replace(shape)
    }

    pub fn is_empty(&self) -> bool {
        self.shape.is_none() && self.body.is_none()
    }
}

/// One chunk record
#[derive(Debug)]
pub struct ChunkSlot {
    key: AtomicU64,
    word: AtomicStateWord,
    ref_count: AtomicU32,
    placeholder: AtomicBool,
    wants_active: AtomicBool,
    priority: AtomicU8,
    resources: Mutex<SlotResources>,
}

impl ChunkSlot {
    fn new(key: ChunkKey) -> Self {
        Self {
            key: AtomicU64::new(key.pack()),
            word: AtomicStateWord::new(ChunkState::Unloaded),
            ref_count: AtomicU32::new(0),
            placeholder: AtomicBool::new(true),
            wants_active: AtomicBool::new(false),
            priority: AtomicU8::new(JobPriority::Normal as u8),
            resources: Mutex::new(SlotResources::default()),
        }
    }

    pub fn key(&self) -> ChunkKey {
        ChunkKey::unpack(self.key.load(Ordering::Acquire))
    }

    pub fn word(&self) -> &AtomicStateWord {
        &self.word
    }

    pub fn state(&self) -> ChunkState {
        self.word.load().state
    }

    pub fn version(&self) -> u64 {
        self.word.load().version
    }

    pub fn state_word(&self) -> StateWord {
        self.word.load()
    }

    pub fn ref_count(&self) -> u32 {
        self.ref_count.load(Ordering::Acquire)
    }

    pub fn is_placeholder(&self) -> bool {
        self.placeholder.load(Ordering::Acquire)
    }

    pub fn set_placeholder(&self, placeholder: bool) {
        self.placeholder.store(placeholder, Ordering::Release);
    }

    pub fn wants_active(&self) -> bool {
        self.wants_active.load(Ordering::Acquire)
    }

    /// Returns the previous value
    pub fn set_wants_active(&self, active: bool) -> bool {
        self.wants_active.swap(active, Ordering::AcqRel)
    }

    pub fn priority(&self) -> JobPriority {
        JobPriority::from_u8(self.priority.load(Ordering::Acquire))
    }

    pub fn set_priority(&self, priority: JobPriority) {
        self.priority.store(priority as u8, Ordering::Release);
    }

    /// Lock the native resources
    pub fn resources(&self) -> MutexGuard<'_, SlotResources> {
        self.resources.lock()
    }

    /// Whether this slot currently belongs to `key` at `version`
    pub fn is_current(&self, key: ChunkKey, version: u64) -> bool {
        self.key() == key && self.version() == version
    }

    fn reassign(&self, key: ChunkKey) {
        self.key.store(key.pack(), Ordering::Release);
        self.word.reset(ChunkState::Unloaded);
        self.ref_count.store(0, Ordering::Release);
        self.placeholder.store(true, Ordering::Release);
        self.wants_active.store(false, Ordering::Release);
        self.priority.store(JobPriority::Normal as u8, Ordering::Release);
    }
}

#[derive(Debug, Default)]
struct SlotTable {
    by_key: HashMap<ChunkKey, SlotIndex>,
    free: Vec<SlotIndex>,
}

/// Slot arena for all tracked chunks
#[derive(Debug)]
pub struct ChunkDataStore {
    table: Mutex<SlotTable>,
    slots: RwLock<Vec<Arc<ChunkSlot>>>,
    capacity: usize,
}

impl ChunkDataStore {
    /// Create a store that admits at most `capacity` chunks at once
    pub fn new(capacity: usize) -> Self {
        Self {
            table: Mutex::new(SlotTable::default()),
            slots: RwLock::new(Vec::new()),
            capacity,
        }
    }

    /// Maximum number of live slots
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Number of live (keyed) slots
    pub fn len(&self) -> usize {
        self.table.lock().by_key.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Existing slot for `key`, or a freshly allocated `Unloaded` one
    ///
    /// A slot allocated here starts with zero references; callers normally go
    /// through [`ChunkDataStore::retain`] instead.
    pub fn add_or_get_slot(&self, key: ChunkKey) -> Result<SlotIndex> {
        let mut table = self.table.lock();
        self.add_or_get_locked(&mut table, key)
    }

    fn add_or_get_locked(&self, table: &mut SlotTable, key: ChunkKey) -> Result<SlotIndex> {
        if let Some(&index) = table.by_key.get(&key) {
            return Ok(index);
        }

        let index = match table.free.pop() {
            Some(index) => {
                self.slots.read()[index as usize].reassign(key);
                index
            }
            None => {
                let mut slots = self.slots.write();
                if slots.len() >= self.capacity {
                    return Err(TerrainError::SlotsExhausted {
                        capacity: self.capacity,
                    });
                }
                slots.push(Arc::new(ChunkSlot::new(key)));
                (slots.len() - 1) as SlotIndex
            }
        };

        table.by_key.insert(key, index);
        Ok(index)
    }

    /// Add a reference to `key`, allocating its slot if needed.
    ///
    /// `on_first` runs under the table lock when the count goes 0 → 1, so a
    /// concurrent final release cannot interleave with the first schedule.
    /// Returns the slot index and the new reference count.
    pub fn retain(
        &self,
        key: ChunkKey,
        on_first: impl FnOnce(SlotIndex, &ChunkSlot),
    ) -> Result<(SlotIndex, u32)> {
        let mut table = self.table.lock();
        let index = self.add_or_get_locked(&mut table, key)?;
        let slot = Arc::clone(&self.slots.read()[index as usize]);

        let count = slot.ref_count.fetch_add(1, Ordering::AcqRel) + 1;
        if count == 1 {
            on_first(index, &slot);
        }
        Ok((index, count))
    }

    /// Drop a reference to `key`.
    ///
    /// `on_last` runs under the table lock when the count goes 1 → 0.
    /// Returns `None` for untracked keys or keys already at zero.
    pub fn unretain(
        &self,
        key: ChunkKey,
        on_last: impl FnOnce(SlotIndex, &ChunkSlot),
    ) -> Option<(SlotIndex, u32)> {
        let table = self.table.lock();
        let index = *table.by_key.get(&key)?;
        let slot = Arc::clone(&self.slots.read()[index as usize]);

        let count = slot.ref_count();
        if count == 0 {
            return None;
        }
        slot.ref_count.store(count - 1, Ordering::Release);
        if count == 1 {
            on_last(index, &slot);
        }
        Some((index, count - 1))
    }

    /// Run `f` on the slot of a referenced `key` while holding the table lock.
    ///
    /// Returns `None` for untracked keys and keys with no references. The
    /// slot cannot be freed or handed to another key while `f` runs.
    pub fn with_tracked<R>(
        &self,
        key: ChunkKey,
        f: impl FnOnce(SlotIndex, &ChunkSlot) -> R,
    ) -> Option<R> {
        let table = self.table.lock();
        let index = *table.by_key.get(&key)?;
        let slot = Arc::clone(&self.slots.read()[index as usize]);
        if slot.ref_count() == 0 {
            return None;
        }
        Some(f(index, &slot))
    }

    /// Free a slot whose handles have already been released.
    ///
    /// Refuses (returns `false`) unless the slot is still unreferenced, at
    /// `expected_version`, and in `Removing` or `Unloaded`. That covers a chunk
    /// that was requested again while its cleanup was queued.
    pub fn release_slot(&self, index: SlotIndex, expected_version: u64) -> bool {
        let mut table = self.table.lock();
        let Some(slot) = self.slot(index) else {
            return false;
        };

        let word = slot.state_word();
        let releasable = matches!(word.state, ChunkState::Removing | ChunkState::Unloaded);
        if slot.ref_count() != 0 || word.version != expected_version || !releasable {
            return false;
        }

        let key = slot.key();
        if table.by_key.get(&key) != Some(&index) {
            return false;
        }
        debug_assert!(
            slot.resources().is_empty(),
            "slot {index} for {key} freed while still owning native handles"
        );

        table.by_key.remove(&key);
        slot.word.reset(ChunkState::Unloaded);
        slot.set_placeholder(true);
        slot.set_wants_active(false);
        slot.set_priority(JobPriority::Normal);
        table.free.push(index);
        true
    }

    /// Slot index for a tracked key
    pub fn lookup(&self, key: ChunkKey) -> Option<SlotIndex> {
        self.table.lock().by_key.get(&key).copied()
    }

    /// Key currently assigned to a live slot
    pub fn key_of(&self, index: SlotIndex) -> Option<ChunkKey> {
        let table = self.table.lock();
        let key = self.slot(index)?.key();
        (table.by_key.get(&key) == Some(&index)).then_some(key)
    }

    /// Slot by index (live or free)
    pub fn slot(&self, index: SlotIndex) -> Option<Arc<ChunkSlot>> {
        self.slots.read().get(index as usize).cloned()
    }

    /// Slot for a tracked key
    pub fn get(&self, key: ChunkKey) -> Option<(SlotIndex, Arc<ChunkSlot>)> {
        let index = self.lookup(key)?;
        self.slot(index).map(|slot| (index, slot))
    }

    pub fn state(&self, index: SlotIndex) -> Option<ChunkState> {
        self.slot(index).map(|s| s.state())
    }

    pub fn version(&self, index: SlotIndex) -> Option<u64> {
        self.slot(index).map(|s| s.version())
    }

    pub fn ref_count(&self, index: SlotIndex) -> Option<u32> {
        self.slot(index).map(|s| s.ref_count())
    }

    /// Whether `index` still belongs to `key` at `version`
    pub fn is_current(&self, index: SlotIndex, key: ChunkKey, version: u64) -> bool {
        self.slot(index)
            .is_some_and(|slot| slot.is_current(key, version))
    }

    /// Snapshot of all live slot indices
    pub fn active_indices(&self) -> Vec<SlotIndex> {
        let mut indices: Vec<_> = self.table.lock().by_key.values().copied().collect();
        indices.sort_unstable();
        indices
    }

    /// Snapshot of all tracked keys
    pub fn tracked_keys(&self) -> Vec<ChunkKey> {
        let mut keys: Vec<_> = self.table.lock().by_key.keys().copied().collect();
        keys.sort_unstable();
        keys
    }
}
