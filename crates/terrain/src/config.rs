//! Pipeline configuration: defaults, TOML files and `TERRAIN_*` overrides

use crate::error::{Result, TerrainError};
use serde::Deserialize;
use std::{env, fs, path::Path, str::FromStr};

/// Tuning for chunk streaming, tracking and generation.
///
/// Distances are in world units (one voxel = one unit), times in seconds.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct TerrainConfig {
    /// Lowest world height that gets collision geometry.
    pub min_height: f32,
    /// Highest world height that gets collision geometry.
    pub max_height: f32,
    /// Distance around body clusters whose chunks are kept loaded.
    pub preload_radius: f32,
    /// Distance around awake bodies whose chunks are in the active simulation.
    pub activation_radius: f32,
    /// Look-ahead used to extrapolate body AABBs for preloading.
    pub prediction_seconds: f32,
    /// Look-ahead used for the activation set.
    pub activation_prediction_seconds: f32,
    /// Per-axis cap on the extrapolation distance.
    pub max_prediction_distance: f32,
    /// Safety brake: a cluster that rasterizes to more chunks than this is skipped.
    pub max_chunks_per_cluster: u64,
    /// Cluster grid cell size, in chunks.
    pub cluster_cell_chunks: u32,
    /// Mesh worker threads. Zero runs jobs inline on the world thread.
    pub worker_threads: usize,
    /// Maximum number of native shapes kept in the content cache.
    pub shape_cache_capacity: usize,
    /// Upper bound on simultaneously tracked chunks.
    pub max_chunk_slots: usize,
}

impl Default for TerrainConfig {
    fn default() -> Self {
        Self {
            min_height: -64.0,
            max_height: 320.0,
            preload_radius: 32.0,
            activation_radius: 8.0,
            prediction_seconds: 1.0,
            activation_prediction_seconds: 0.25,
            max_prediction_distance: 64.0,
            max_chunks_per_cluster: 4096,
            cluster_cell_chunks: 4,
            worker_threads: 2,
            shape_cache_capacity: 1024,
            max_chunk_slots: 65_536,
        }
    }
}

impl TerrainConfig {
    /// Parse a TOML document. Missing fields keep their defaults.
    pub fn from_toml_str(source: &str) -> Result<Self> {
        let config: Self = toml::from_str(source)?;
        config.validate()?;
        Ok(config)
    }

    /// Load a TOML file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let source = fs::read_to_string(path.as_ref()).map_err(|e| {
            TerrainError::Config(format!("cannot read {}: {e}", path.as_ref().display()))
        })?;
        Self::from_toml_str(&source)
    }

    /// Builds a configuration from `TERRAIN_*` environment variables, falling
    /// back to defaults for anything unset or unparsable.
    pub fn from_env() -> Result<Self> {
        let defaults = Self::default();
        let config = Self {
            min_height: env_or("TERRAIN_MIN_HEIGHT", defaults.min_height),
            max_height: env_or("TERRAIN_MAX_HEIGHT", defaults.max_height),
            preload_radius: env_or("TERRAIN_PRELOAD_RADIUS", defaults.preload_radius),
            activation_radius: env_or("TERRAIN_ACTIVATION_RADIUS", defaults.activation_radius),
            prediction_seconds: env_or("TERRAIN_PREDICTION_SECONDS", defaults.prediction_seconds),
            activation_prediction_seconds: env_or(
                "TERRAIN_ACTIVATION_PREDICTION_SECONDS",
                defaults.activation_prediction_seconds,
            ),
            max_prediction_distance: env_or(
                "TERRAIN_MAX_PREDICTION_DISTANCE",
                defaults.max_prediction_distance,
            ),
            max_chunks_per_cluster: env_or(
                "TERRAIN_MAX_CHUNKS_PER_CLUSTER",
                defaults.max_chunks_per_cluster,
            ),
            cluster_cell_chunks: env_or("TERRAIN_CLUSTER_CELL_CHUNKS", defaults.cluster_cell_chunks),
            worker_threads: env_or("TERRAIN_WORKER_THREADS", defaults.worker_threads),
            shape_cache_capacity: env_or("TERRAIN_SHAPE_CACHE_SIZE", defaults.shape_cache_capacity),
            max_chunk_slots: env_or("TERRAIN_MAX_CHUNK_SLOTS", defaults.max_chunk_slots),
        };
        config.validate()?;
        Ok(config)
    }

    /// Reject values the tracker and store cannot work with.
    pub fn validate(&self) -> Result<()> {
        let finite = [
            self.min_height,
            self.max_height,
            self.preload_radius,
            self.activation_radius,
            self.prediction_seconds,
            self.activation_prediction_seconds,
            self.max_prediction_distance,
        ];
        if finite.iter().any(|v| !v.is_finite()) {
            return Err(TerrainError::Config("all distances and times must be finite".into()));
        }
        if self.min_height > self.max_height {
            return Err(TerrainError::Config(format!(
                "min_height {} is above max_height {}",
                self.min_height, self.max_height
            )));
        }
        if self.preload_radius < 0.0 || self.activation_radius < 0.0 {
            return Err(TerrainError::Config("radii must be >= 0".into()));
        }
        if self.prediction_seconds < 0.0
            || self.activation_prediction_seconds < 0.0
            || self.max_prediction_distance < 0.0
        {
            return Err(TerrainError::Config("prediction settings must be >= 0".into()));
        }
        if self.cluster_cell_chunks == 0 {
            return Err(TerrainError::Config("cluster_cell_chunks must be >= 1".into()));
        }
        if self.max_chunk_slots == 0 {
            return Err(TerrainError::Config("max_chunk_slots must be >= 1".into()));
        }
        Ok(())
    }
}

fn env_or<T: FromStr>(name: &str, default: T) -> T {
    env::var(name)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}
