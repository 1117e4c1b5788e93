//! Hand-off messages between pipeline stages
//!
//! Every message carries the slot, key and version it was created for. The
//! receiving stage compares them with the slot's current word before acting.

use crate::chunk::{ChunkKey, SlotIndex};
use crate::snapshot::{ChunkSnapshot, ContentHash};
use rapier3d::prelude::SharedShape;

/// World thread: capture a snapshot for this generation
#[derive(Debug)]
pub(crate) struct CaptureRequest {
    pub slot: SlotIndex,
    pub key: ChunkKey,
    pub version: u64,
    /// First build since the chunk was requested (persistent store is consulted)
    pub initial: bool,
}

/// Worker pool: mesh one captured snapshot
pub(crate) struct GenerateJob {
    pub slot: SlotIndex,
    pub key: ChunkKey,
    pub version: u64,
    pub initial: bool,
    pub snapshot: ChunkSnapshot,
}

/// Result of one generation
pub(crate) enum MeshOutcome {
    Shape { shape: SharedShape, hash: ContentHash },
    Empty,
    Failed,
}

impl MeshOutcome {
    pub fn label(&self) -> &'static str {
        match self {
            Self::Shape { .. } => "shape",
            Self::Empty => "air",
            Self::Failed => "failed",
        }
    }
}

/// Physics thread commands
pub(crate) enum PhysicsTask {
    Apply {
        slot: SlotIndex,
        key: ChunkKey,
        version: u64,
        outcome: MeshOutcome,
    },
    Cleanup {
        slot: SlotIndex,
        key: ChunkKey,
        version: u64,
    },
    SyncActivation {
        slot: SlotIndex,
        key: ChunkKey,
    },
}
