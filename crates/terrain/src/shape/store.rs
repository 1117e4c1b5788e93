//! Persistent box lists, reused across sessions

use crate::chunk::ChunkKey;
use crate::error::StoreError;
use crate::mesher::ShapeBox;
use crate::snapshot::ContentHash;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::{fs, io, path::PathBuf};

/// Backend for reusing generated box lists across sessions.
///
/// One entry per chunk position. An entry stored for a different content
/// hash than the one asked for is a miss.
pub trait PersistentShapeStore: Send + Sync + 'static {
    fn get_shape_data(
        &self,
        key: ChunkKey,
        hash: ContentHash,
    ) -> Result<Option<Vec<ShapeBox>>, StoreError>;
    fn store_shape_data(
        &self,
        key: ChunkKey,
        hash: ContentHash,
        boxes: &[ShapeBox],
    ) -> Result<(), StoreError>;
    fn remove_shape_data(&self, key: ChunkKey) -> Result<(), StoreError>;
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct ShapeEntry {
    hash: u64,
    boxes: Vec<ShapeBox>,
}

/// In-process store, mostly for tests and single-session embedding
#[derive(Debug, Default)]
pub struct MemoryShapeStore {
    entries: Mutex<HashMap<ChunkKey, ShapeEntry>>,
}

impl MemoryShapeStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn contains(&self, key: ChunkKey) -> bool {
        self.entries.lock().contains_key(&key)
    }
}

impl PersistentShapeStore for MemoryShapeStore {
    fn get_shape_data(
        &self,
        key: ChunkKey,
        hash: ContentHash,
    ) -> Result<Option<Vec<ShapeBox>>, StoreError> {
        Ok(self
            .entries
            .lock()
            .get(&key)
            .filter(|entry| entry.hash == hash.0)
            .map(|entry| entry.boxes.clone()))
    }

    fn store_shape_data(
        &self,
        key: ChunkKey,
        hash: ContentHash,
        boxes: &[ShapeBox],
    ) -> Result<(), StoreError> {
        self.entries.lock().insert(
            key,
            ShapeEntry {
                hash: hash.0,
                boxes: boxes.to_vec(),
            },
        );
        Ok(())
    }

    fn remove_shape_data(&self, key: ChunkKey) -> Result<(), StoreError> {
        self.entries.lock().remove(&key);
        Ok(())
    }
}

/// One bincode file per chunk under a directory
#[derive(Debug)]
pub struct FileShapeStore {
    dir: PathBuf,
}

impl FileShapeStore {
    /// Open (and create if needed) a store rooted at `dir`
    pub fn open(dir: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let dir = dir.into();
        fs::create_dir_all(&dir)?;
        Ok(Self { dir })
    }

    fn path_for(&self, key: ChunkKey) -> PathBuf {
        self.dir.join(format!("{}_{}_{}.bin", key.x, key.y, key.z))
    }
}

impl PersistentShapeStore for FileShapeStore {
    fn get_shape_data(
        &self,
        key: ChunkKey,
        hash: ContentHash,
    ) -> Result<Option<Vec<ShapeBox>>, StoreError> {
        match fs::read(self.path_for(key)) {
            Ok(bytes) => {
                let entry: ShapeEntry = bincode::deserialize(&bytes)?;
                Ok((entry.hash == hash.0).then_some(entry.boxes))
            }
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(err) => Err(StoreError::Io(err)),
        }
    }

    fn store_shape_data(
        &self,
        key: ChunkKey,
        hash: ContentHash,
        boxes: &[ShapeBox],
    ) -> Result<(), StoreError> {
        let entry = ShapeEntry {
            hash: hash.0,
            boxes: boxes.to_vec(),
        };
        let data = bincode::serialize(&entry)?;
        let path = self.path_for(key);
        let tmp = path.with_extension("tmp");
        fs::write(&tmp, data)?;
        fs::rename(tmp, &path)?;
        Ok(())
    }

    fn remove_shape_data(&self, key: ChunkKey) -> Result<(), StoreError> {
        match fs::remove_file(self.path_for(key)) {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(StoreError::Io(err)),
        }
    }
}
