//! Chunk keys, lifecycle states and the slot table

mod key;
mod state;
mod store;

pub use key::{ChunkKey, CHUNK_SIZE, CHUNK_VOLUME};
pub use state::{is_stale, AtomicStateWord, ChunkState, StateWord, TransitionError};
pub use store::{ChunkDataStore, ChunkSlot, SlotIndex, SlotResources};
