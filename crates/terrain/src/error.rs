//! Error types for the terrain streaming pipeline

use crate::chunk::ChunkKey;
use std::io;
use thiserror::Error;

/// Result type for terrain operations
pub type Result<T> = std::result::Result<T, TerrainError>;

/// Errors surfaced by the terrain pipeline
///
/// Most failures inside the pipeline never reach a caller: they are logged and
/// converted into chunk state transitions. The variants here cover the few
/// that are returned directly (slot exhaustion, configuration) and the ones
/// produced by collaborators before they are logged.
#[derive(Error, Debug)]
pub enum TerrainError {
    /// Chunk slot table cannot grow any further
    #[error("chunk slot table exhausted ({capacity} slots)")]
    SlotsExhausted { capacity: usize },

    /// Chunk coordinates cannot be packed into a slot key
    #[error("chunk {0} is outside the addressable range")]
    KeyOutOfRange(ChunkKey),

    /// Job submitted after shutdown
    #[error("terrain job system is shut down")]
    JobSystemShutdown,

    /// Native collision shape could not be built
    #[error("degenerate collision geometry: {0}")]
    Geometry(String),

    /// Physics engine rejected a body or shape operation
    #[error("physics operation failed: {0}")]
    Physics(String),

    /// Configuration value out of range
    #[error("invalid configuration: {0}")]
    Config(String),

    /// Configuration file could not be parsed
    #[error("config parse error: {0}")]
    ConfigParse(#[from] toml::de::Error),
}

/// Errors emitted by persistent shape store implementations.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("io error: {0}")]
    Io(#[from] io::Error),
    #[error("serialization error: {0}")]
    Serialization(#[from] bincode::Error),
}
