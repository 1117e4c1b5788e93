//! Body-driven chunk tracking
//!
//! Each tick the tracker turns the live bodies into two chunk sets, one to
//! keep loaded and one to keep in the active simulation, and diffs them
//! against the previous tick. Only the differences reach the [`ChunkSink`].

use crate::chunk::{ChunkKey, CHUNK_SIZE};
use crate::collision::Aabb;
use crate::config::TerrainConfig;
use crate::error::Result;
use glam::{IVec3, Vec3};
use std::collections::{BTreeMap, BTreeSet};

/// A moving body as seen by the tracker
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct TrackedBody {
    pub id: u64,
    pub position: Vec3,
    pub aabb: Aabb,
    pub velocity: Vec3,
    pub awake: bool,
}

impl TrackedBody {
    fn is_finite(&self) -> bool {
        self.position.is_finite() && self.aabb.is_valid() && self.velocity.is_finite()
    }
}

/// Receiver of the tracker's load/activation decisions
pub trait ChunkSink {
    fn request_chunk(&self, key: ChunkKey) -> Result<()>;
    fn release_chunk(&self, key: ChunkKey);
    fn activate_chunk(&self, key: ChunkKey) -> bool;
    fn deactivate_chunk(&self, key: ChunkKey) -> bool;
    fn prioritize_chunk(&self, key: ChunkKey) -> bool;
}

/// What one tick changed
#[derive(Clone, Copy, Default, PartialEq, Eq, Debug)]
pub struct TickReport {
    pub requested: usize,
    pub released: usize,
    pub activated: usize,
    pub deactivated: usize,
    pub failed_requests: usize,
    /// Bodies with non-finite position, bounds or velocity
    pub skipped_bodies: usize,
    /// Bodies outside the generation height range
    pub out_of_range_bodies: usize,
    /// Clusters dropped by the volume brake
    pub braked_clusters: usize,
}

/// Which body set and look-ahead a region is built from
struct RegionParams {
    radius: f32,
    prediction_seconds: f32,
}

/// Tracks the chunks required by a set of moving bodies
pub struct SpatialTracker {
    config: TerrainConfig,
    loaded: BTreeSet<ChunkKey>,
    active: BTreeSet<ChunkKey>,
}

impl SpatialTracker {
    pub fn new(config: TerrainConfig) -> Self {
        Self {
            config,
            loaded: BTreeSet::new(),
            active: BTreeSet::new(),
        }
    }

    /// Chunks this tracker currently holds a reference to
    pub fn loaded_keys(&self) -> impl Iterator<Item = ChunkKey> + '_ {
        self.loaded.iter().copied()
    }

    /// Chunks this tracker currently wants in the active simulation
    pub fn active_keys(&self) -> impl Iterator<Item = ChunkKey> + '_ {
        self.active.iter().copied()
    }

    /// Recompute the required chunk sets and push the differences to `sink`.
    ///
    /// Order: requests, activations, deactivations, releases.
    pub fn tick<S: ChunkSink + ?Sized>(&mut self, bodies: &[TrackedBody], sink: &S) -> TickReport {
        let mut report = TickReport::default();

        let mut eligible = Vec::with_capacity(bodies.len());
        for body in bodies {
            if !body.is_finite() {
                tracing::debug!("skipping body {} with non-finite state", body.id);
                report.skipped_bodies += 1;
                continue;
            }
            if body.position.y < self.config.min_height || body.position.y > self.config.max_height
            {
                report.out_of_range_bodies += 1;
                continue;
            }
            eligible.push(*body);
        }

        let clusters = self.cluster(&eligible);

        let preload = RegionParams {
            radius: self.config.preload_radius,
            prediction_seconds: self.config.prediction_seconds,
        };
        let activation = RegionParams {
            radius: self.config.activation_radius,
            prediction_seconds: self.config.activation_prediction_seconds,
        };

        let mut wanted_loaded = BTreeSet::new();
        let mut wanted_active = BTreeSet::new();
        let mut preload_braked = false;
        let mut activation_braked = false;
        for (cell, members) in &clusters {
            if !self.rasterize(members, &preload, &mut wanted_loaded) {
                tracing::warn!(
                    "cluster at cell {cell} ({} bodies) exceeds {} chunks, skipping it this tick",
                    members.len(),
                    self.config.max_chunks_per_cluster
                );
                report.braked_clusters += 1;
                preload_braked = true;
                continue;
            }

            let awake: Vec<TrackedBody> = members.iter().filter(|b| b.awake).copied().collect();
            if !awake.is_empty() && !self.rasterize(&awake, &activation, &mut wanted_active) {
                tracing::warn!("activation region of cluster at cell {cell} exceeds the brake");
                report.braked_clusters += 1;
                activation_braked = true;
            }
        }

        // A braked cluster requests nothing new but keeps what it already holds
        if preload_braked {
            wanted_loaded.extend(self.loaded.iter().copied());
        }
        if preload_braked || activation_braked {
            wanted_active.extend(self.active.iter().copied());
        }
        // Never activate something that is not also loaded
        wanted_active.retain(|key| wanted_loaded.contains(key));

        let to_request: Vec<ChunkKey> = wanted_loaded.difference(&self.loaded).copied().collect();
        for key in to_request {
            match sink.request_chunk(key) {
                Ok(()) => {
                    self.loaded.insert(key);
                    report.requested += 1;
                }
                Err(e) => {
                    tracing::warn!("request for chunk {key} failed, retrying next tick: {e}");
                    report.failed_requests += 1;
                }
            }
        }

        let to_activate: Vec<ChunkKey> = wanted_active
            .iter()
            .filter(|key| self.loaded.contains(key) && !self.active.contains(key))
            .copied()
            .collect();
        for key in to_activate {
            if sink.activate_chunk(key) {
                self.active.insert(key);
                report.activated += 1;
            }
        }

        let to_deactivate: Vec<ChunkKey> = self.active.difference(&wanted_active).copied().collect();
        for key in to_deactivate {
            sink.deactivate_chunk(key);
            self.active.remove(&key);
            report.deactivated += 1;
        }

        let to_release: Vec<ChunkKey> = self.loaded.difference(&wanted_loaded).copied().collect();
        for key in to_release {
            sink.release_chunk(key);
            self.loaded.remove(&key);
            report.released += 1;
        }

        // Critical tier for everything near awake bodies; also revives stalled chunks
        for key in &self.active {
            sink.prioritize_chunk(*key);
        }

        if report.requested + report.released + report.activated + report.deactivated > 0 {
            tracing::debug!(
                "tracker tick: +{} -{} loaded, +{} -{} active ({} loaded, {} active)",
                report.requested,
                report.released,
                report.activated,
                report.deactivated,
                self.loaded.len(),
                self.active.len()
            );
        }

        report
    }

    /// Release and deactivate everything this tracker holds
    pub fn clear<S: ChunkSink + ?Sized>(&mut self, sink: &S) {
        for key in std::mem::take(&mut self.active) {
            sink.deactivate_chunk(key);
        }
        for key in std::mem::take(&mut self.loaded) {
            sink.release_chunk(key);
        }
    }

    fn cluster(&self, bodies: &[TrackedBody]) -> BTreeMap<ClusterCell, Vec<TrackedBody>> {
        let cell_size = self.config.cluster_cell_chunks as f32 * CHUNK_SIZE as f32;
        let mut clusters: BTreeMap<ClusterCell, Vec<TrackedBody>> = BTreeMap::new();
        for body in bodies {
            let cell = (body.position / cell_size).floor();
            let cell = ClusterCell(IVec3::new(cell.x as i32, cell.y as i32, cell.z as i32));
            clusters.entry(cell).or_default().push(*body);
        }
        clusters
    }

    /// Add the chunks covering `bodies` to `out`. Returns `false` (adding
    /// nothing) when the region trips the volume brake.
    fn rasterize(
        &self,
        bodies: &[TrackedBody],
        params: &RegionParams,
        out: &mut BTreeSet<ChunkKey>,
    ) -> bool {
        let Some(region) = self.region_of(bodies, params) else {
            return true;
        };

        let (mut min, mut max) = region.chunk_range();
        let (y_lo, y_hi) = self.chunk_height_range();
        min.y = min.y.max(y_lo);
        max.y = max.y.min(y_hi);
        let h = ChunkKey::HORIZONTAL_LIMIT;
        min.x = min.x.max(-h);
        min.z = min.z.max(-h);
        max.x = max.x.min(h - 1);
        max.z = max.z.min(h - 1);
        if min.cmpgt(max).any() {
            return true;
        }

        let span = |lo: i32, hi: i32| (hi as i64 - lo as i64 + 1) as u64;
        let volume = span(min.x, max.x)
            .checked_mul(span(min.y, max.y))
            .and_then(|v| v.checked_mul(span(min.z, max.z)));
        match volume {
            Some(v) if v <= self.config.max_chunks_per_cluster => {}
            _ => return false,
        }

        for y in min.y..=max.y {
            for z in min.z..=max.z {
                for x in min.x..=max.x {
                    out.insert(ChunkKey::new(x, y, z));
                }
            }
        }
        true
    }

    /// Union of the current and velocity-extrapolated bounds, grown by the radius
    fn region_of(&self, bodies: &[TrackedBody], params: &RegionParams) -> Option<Aabb> {
        let limit = Vec3::splat(self.config.max_prediction_distance);
        bodies
            .iter()
            .map(|body| {
                let offset = (body.velocity * params.prediction_seconds).clamp(-limit, limit);
                body.aabb.union(&body.aabb.translated(offset))
            })
            .reduce(|a, b| a.union(&b))
            .map(|aabb| aabb.expanded(params.radius))
    }

    /// Inclusive chunk-y range covering `[min_height, max_height)`
    fn chunk_height_range(&self) -> (i32, i32) {
        let size = CHUNK_SIZE as f32;
        let lo = (self.config.min_height / size).floor() as i32;
        let hi = ((self.config.max_height / size).ceil() as i32).saturating_sub(1);
        (lo, hi.max(lo))
    }
}

/// Cluster grid cell; ordered so ticks are deterministic
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
struct ClusterCell(IVec3);

impl Ord for ClusterCell {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.0.to_array().cmp(&other.0.to_array())
    }
}

impl PartialOrd for ClusterCell {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl std::fmt::Display for ClusterCell {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::TerrainError;
    use std::cell::RefCell;

    /// Records every call in order
    #[derive(Default)]
    struct RecordingSink {
        calls: RefCell<Vec<(&'static str, ChunkKey)>>,
        refuse: RefCell<BTreeSet<ChunkKey>>,
    }

    impl RecordingSink {
        fn count(&self, op: &str) -> usize {
            self.calls.borrow().iter().filter(|(o, _)| *o == op).count()
        }

        fn reset(&self) {
            self.calls.borrow_mut().clear();
        }
    }

    impl ChunkSink for RecordingSink {
        fn request_chunk(&self, key: ChunkKey) -> Result<()> {
            if self.refuse.borrow().contains(&key) {
                return Err(TerrainError::SlotsExhausted { capacity: 0 });
            }
            self.calls.borrow_mut().push(("request", key));
            Ok(())
        }
        fn release_chunk(&self, key: ChunkKey) {
            self.calls.borrow_mut().push(("release", key));
        }
        fn activate_chunk(&self, key: ChunkKey) -> bool {
            self.calls.borrow_mut().push(("activate", key));
            true
        }
        fn deactivate_chunk(&self, key: ChunkKey) -> bool {
            self.calls.borrow_mut().push(("deactivate", key));
            true
        }
        fn prioritize_chunk(&self, key: ChunkKey) -> bool {
            self.calls.borrow_mut().push(("prioritize", key));
            true
        }
    }

    fn config() -> TerrainConfig {
        TerrainConfig {
            preload_radius: 0.0,
            activation_radius: 0.0,
            prediction_seconds: 0.0,
            activation_prediction_seconds: 0.0,
            ..TerrainConfig::default()
        }
    }

    fn body(id: u64, position: Vec3) -> TrackedBody {
        TrackedBody {
            id,
            position,
            aabb: Aabb::from_center(position, Vec3::splat(0.5)),
            velocity: Vec3::ZERO,
            awake: true,
        }
    }

    #[test]
    fn test_single_body_requests_its_chunk() {
        let mut tracker = SpatialTracker::new(config());
        let sink = RecordingSink::default();

        let report = tracker.tick(&[body(1, Vec3::new(8.0, 8.0, 8.0))], &sink);

        assert_eq!(report.requested, 1);
        assert_eq!(report.activated, 1);
        assert_eq!(tracker.loaded_keys().collect::<Vec<_>>(), vec![ChunkKey::new(0, 0, 0)]);
        assert_eq!(tracker.active_keys().count(), 1);
    }

    #[test]
    fn test_unchanged_tick_is_quiet() {
        let mut tracker = SpatialTracker::new(config());
        let sink = RecordingSink::default();
        let bodies = [body(1, Vec3::new(8.0, 8.0, 8.0))];

        tracker.tick(&bodies, &sink);
        sink.reset();
        let report = tracker.tick(&bodies, &sink);

        assert_eq!(report, TickReport::default());
        assert_eq!(sink.count("request"), 0);
        assert_eq!(sink.count("release"), 0);
        // Activation keys are re-prioritized every tick
        assert_eq!(sink.count("prioritize"), 1);
    }

    #[test]
    fn test_moving_body_diffs_sets() {
        let mut tracker = SpatialTracker::new(config());
        let sink = RecordingSink::default();

        tracker.tick(&[body(1, Vec3::new(8.0, 8.0, 8.0))], &sink);
        sink.reset();
        let report = tracker.tick(&[body(1, Vec3::new(40.0, 8.0, 8.0))], &sink);

        assert_eq!(report.requested, 1);
        assert_eq!(report.released, 1);
        assert_eq!(report.deactivated, 1);

        // Requests first, then activations, deactivations, releases
        let order: Vec<_> = sink.calls.borrow().iter().map(|(op, _)| *op).collect();
        assert_eq!(order, vec!["request", "activate", "deactivate", "release", "prioritize"]);
    }

    #[test]
    fn test_velocity_prediction_extends_region() {
        let mut tracker = SpatialTracker::new(TerrainConfig {
            prediction_seconds: 1.0,
            ..config()
        });
        let sink = RecordingSink::default();
        let mut fast = body(1, Vec3::new(8.0, 8.0, 8.0));
        fast.velocity = Vec3::new(40.0, 0.0, 0.0);

        tracker.tick(&[fast], &sink);

        // Current chunk through the predicted one at x = 48
        let xs: Vec<i32> = tracker.loaded_keys().map(|k| k.x).collect();
        assert_eq!(xs, vec![0, 1, 2, 3]);
    }

    #[test]
    fn test_prediction_is_clamped() {
        let mut tracker = SpatialTracker::new(TerrainConfig {
            prediction_seconds: 1.0,
            max_prediction_distance: 16.0,
            ..config()
        });
        let sink = RecordingSink::default();
        let mut fast = body(1, Vec3::new(8.0, 8.0, 8.0));
        fast.velocity = Vec3::new(1.0e6, 0.0, 0.0);

        tracker.tick(&[fast], &sink);

        assert_eq!(tracker.loaded_keys().count(), 2);
    }

    #[test]
    fn test_safety_brake_drops_whole_cluster() {
        let mut tracker = SpatialTracker::new(TerrainConfig {
            preload_radius: 200.0,
            max_chunks_per_cluster: 64,
            ..config()
        });
        let sink = RecordingSink::default();

        let report = tracker.tick(&[body(1, Vec3::new(8.0, 8.0, 8.0))], &sink);

        assert_eq!(report.braked_clusters, 1);
        assert_eq!(report.requested, 0);
        assert_eq!(sink.count("request"), 0);
    }

    #[test]
    fn test_brake_only_affects_offending_cluster() {
        let mut tracker = SpatialTracker::new(TerrainConfig {
            max_chunks_per_cluster: 8,
            ..config()
        });
        let sink = RecordingSink::default();
        let mut huge = body(2, Vec3::new(1000.0, 8.0, 8.0));
        huge.aabb = Aabb::from_center(huge.position, Vec3::splat(40.0));

        let report = tracker.tick(&[body(1, Vec3::new(8.0, 8.0, 8.0)), huge], &sink);

        assert_eq!(report.braked_clusters, 1);
        assert_eq!(report.requested, 1);
    }

    #[test]
    fn test_brake_keeps_previously_loaded_chunks() {
        let mut tracker = SpatialTracker::new(TerrainConfig {
            max_chunks_per_cluster: 8,
            ..config()
        });
        let sink = RecordingSink::default();
        let mut ball = body(1, Vec3::new(8.0, 8.0, 8.0));

        let report = tracker.tick(&[ball], &sink);
        assert_eq!(report.requested, 1);
        sink.reset();

        // One glitched tick with absurd bounds
        ball.aabb = Aabb::from_center(ball.position, Vec3::splat(500.0));
        let report = tracker.tick(&[ball], &sink);
        assert_eq!(report.braked_clusters, 1);
        assert_eq!(report.requested, 0);
        assert_eq!(report.released, 0);
        assert_eq!(report.deactivated, 0);
        assert_eq!(sink.count("release"), 0);
        assert_eq!(sink.count("deactivate"), 0);
        assert_eq!(tracker.loaded_keys().count(), 1);
        assert_eq!(tracker.active_keys().count(), 1);

        // Back to normal: nothing to re-request
        ball.aabb = Aabb::from_center(ball.position, Vec3::splat(0.5));
        sink.reset();
        let report = tracker.tick(&[ball], &sink);
        assert_eq!(report.braked_clusters, 0);
        assert_eq!(report.requested + report.released, 0);
    }

    #[test]
    fn test_brake_still_releases_after_recovery() {
        let mut tracker = SpatialTracker::new(TerrainConfig {
            max_chunks_per_cluster: 8,
            ..config()
        });
        let sink = RecordingSink::default();
        let mut ball = body(1, Vec3::new(8.0, 8.0, 8.0));
        tracker.tick(&[ball], &sink);

        ball.aabb = Aabb::from_center(ball.position, Vec3::splat(500.0));
        tracker.tick(&[ball], &sink);

        // The body moved on; the old chunk goes once the brake clears
        let moved = body(1, Vec3::new(40.0, 8.0, 8.0));
        let report = tracker.tick(&[moved], &sink);
        assert_eq!(report.requested, 1);
        assert_eq!(report.released, 1);
        assert_eq!(
            tracker.loaded_keys().collect::<Vec<_>>(),
            vec![ChunkKey::new(2, 0, 0)]
        );
    }

    #[test]
    fn test_extreme_height_range_does_not_overflow() {
        let tracker = SpatialTracker::new(TerrainConfig {
            min_height: -1.0e12,
            max_height: -1.0e11,
            ..config()
        });
        let (lo, hi) = tracker.chunk_height_range();
        assert_eq!(lo, i32::MIN);
        assert_eq!(hi, i32::MIN);
    }

    #[test]
    fn test_non_finite_body_skipped() {
        let mut tracker = SpatialTracker::new(config());
        let sink = RecordingSink::default();
        let mut broken = body(1, Vec3::new(8.0, 8.0, 8.0));
        broken.velocity = Vec3::new(f32::NAN, 0.0, 0.0);

        let report = tracker.tick(&[broken], &sink);

        assert_eq!(report.skipped_bodies, 1);
        assert_eq!(report.requested, 0);
    }

    #[test]
    fn test_height_range_filters_bodies_and_chunks() {
        let mut tracker = SpatialTracker::new(TerrainConfig {
            min_height: 0.0,
            max_height: 32.0,
            preload_radius: 40.0,
            ..config()
        });
        let sink = RecordingSink::default();

        let report = tracker.tick(
            &[body(1, Vec3::new(8.0, 8.0, 8.0)), body(2, Vec3::new(8.0, 500.0, 8.0))],
            &sink,
        );

        assert_eq!(report.out_of_range_bodies, 1);
        assert!(tracker.loaded_keys().all(|k| (0..=1).contains(&k.y)));
    }

    #[test]
    fn test_sleeping_bodies_load_but_do_not_activate() {
        let mut tracker = SpatialTracker::new(config());
        let sink = RecordingSink::default();
        let mut sleeper = body(1, Vec3::new(8.0, 8.0, 8.0));
        sleeper.awake = false;

        let report = tracker.tick(&[sleeper], &sink);

        assert_eq!(report.requested, 1);
        assert_eq!(report.activated, 0);
    }

    #[test]
    fn test_failed_request_retried_next_tick() {
        let mut tracker = SpatialTracker::new(config());
        let sink = RecordingSink::default();
        let bodies = [body(1, Vec3::new(8.0, 8.0, 8.0))];
        sink.refuse.borrow_mut().insert(ChunkKey::new(0, 0, 0));

        let report = tracker.tick(&bodies, &sink);
        assert_eq!(report.failed_requests, 1);
        assert_eq!(report.activated, 0);
        assert_eq!(tracker.loaded_keys().count(), 0);

        sink.refuse.borrow_mut().clear();
        let report = tracker.tick(&bodies, &sink);
        assert_eq!(report.requested, 1);
    }

    #[test]
    fn test_empty_bodies_releases_everything() {
        let mut tracker = SpatialTracker::new(TerrainConfig {
            preload_radius: 16.0,
            ..config()
        });
        let sink = RecordingSink::default();
        tracker.tick(&[body(1, Vec3::new(8.0, 8.0, 8.0))], &sink);
        let loaded = tracker.loaded_keys().count();

        let report = tracker.tick(&[], &sink);

        assert_eq!(report.released, loaded);
        assert_eq!(report.deactivated, 1);
        assert_eq!(tracker.loaded_keys().count(), 0);
    }

    #[test]
    fn test_clear_releases_everything() {
        let mut tracker = SpatialTracker::new(config());
        let sink = RecordingSink::default();
        tracker.tick(&[body(1, Vec3::new(8.0, 8.0, 8.0))], &sink);

        tracker.clear(&sink);

        assert_eq!(sink.count("release"), 1);
        assert_eq!(sink.count("deactivate"), 1);
        assert_eq!(tracker.active_keys().count(), 0);
    }

    #[test]
    fn test_nearby_bodies_share_a_cluster() {
        let tracker = SpatialTracker::new(config());
        let clusters = tracker.cluster(&[
            body(1, Vec3::new(1.0, 1.0, 1.0)),
            body(2, Vec3::new(60.0, 1.0, 1.0)),
            body(3, Vec3::new(70.0, 1.0, 1.0)),
        ]);
        assert_eq!(clusters.len(), 2);
    }
}
