//! Drops a handful of balls onto procedural hills whose collision is streamed
//! in around them.
//!
//! The world lives on its own thread, mesh jobs run on the manager's worker
//! pool, and the main thread owns physics and the tracker.
//!
//! Run with `RUST_LOG=terrain_stream=debug` to watch chunks move through the
//! pipeline.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};
use terrain_stream::glam::{IVec3, Vec3};
use terrain_stream::{
    BodyRegistry, ChunkKey, ChunkSnapshot, SpatialTracker, TerrainConfig, TerrainManager, Voxel,
    WorldSource, CHUNK_SIZE,
};
use tracing_subscriber::EnvFilter;

/// Heightmap terrain generated on demand
struct Hills {
    captures: usize,
}

impl Hills {
    fn height(x: i32, z: i32) -> i32 {
        let (x, z) = (x as f32, z as f32);
        (6.0 + 4.0 * (x * 0.05).sin() + 3.0 * (z * 0.07).cos()) as i32
    }
}

impl WorldSource for Hills {
    fn capture_snapshot(&mut self, key: ChunkKey) -> Option<ChunkSnapshot> {
        self.captures += 1;
        let origin = key.voxel_origin();
        Some(ChunkSnapshot::from_fn(key, |local: IVec3| {
            let p = origin + local;
            (p.y < Self::height(p.x, p.z)).then(|| Voxel::solid(1))
        }))
    }
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let config = match std::env::var("TERRAIN_CONFIG") {
        Ok(path) => TerrainConfig::load(path)?,
        Err(_) => TerrainConfig::from_env()?,
    };
    println!("=== Streaming Terrain Simulation ===\n");
    println!(
        "preload radius {} / activation radius {} / {} workers\n",
        config.preload_radius, config.activation_radius, config.worker_threads
    );

    let manager = Arc::new(TerrainManager::new(config.clone())?);
    let mut tracker = SpatialTracker::new(config);

    let running = Arc::new(AtomicBool::new(true));
    let world_thread = {
        let manager = Arc::clone(&manager);
        let running = Arc::clone(&running);
        thread::Builder::new()
            .name("world".into())
            .spawn(move || {
                let mut world = Hills { captures: 0 };
                while running.load(Ordering::Acquire) {
                    if manager.process_world_tasks(&mut world) == 0 {
                        thread::sleep(Duration::from_millis(1));
                    }
                }
                world.captures
            })?
    };
    let mut physics = terrain_stream::PhysicsWorld::new(Vec3::new(0.0, -9.81, 0.0));
    println!("physics world gravity {:?}", physics.gravity());

    let balls: Vec<_> = (0..5)
        .map(|i| {
            let x = i as f32 * 40.0 + 8.0;
            let y = Hills::height(x as i32, 8) as f32 + 12.0;
            physics.spawn_ball(Vec3::new(x, y, 8.0), 0.5)
        })
        .collect();

    // Let the first chunks arrive before anything can fall through
    let bodies = physics.all_tracked_bodies();
    tracker.tick(&bodies, manager.as_ref());
    let deadline = Instant::now() + Duration::from_secs(5);
    loop {
        let stats = manager.stats();
        if stats.applied + stats.air >= stats.scheduled || Instant::now() >= deadline {
            break;
        }
        manager.process_physics_tasks(&mut physics);
        thread::sleep(Duration::from_millis(1));
    }

    let dt = 1.0 / 60.0;
    for frame in 0..360 {
        let bodies = physics.all_tracked_bodies();
        let report = tracker.tick(&bodies, manager.as_ref());
        manager.process_physics_tasks(&mut physics);
        physics.step(dt);

        if frame % 60 == 0 {
            let stats = manager.stats();
            println!(
                "t={:.1}s | chunks {} (+{} -{}) | terrain bodies {} | applied {} air {} stale {}",
                frame as f32 * dt,
                manager.tracked_chunks().len(),
                report.requested,
                report.released,
                physics.terrain_body_count(),
                stats.applied,
                stats.air,
                stats.stale,
            );
        }
    }

    println!();
    for (i, ball) in balls.iter().enumerate() {
        if let Some(pos) = physics.body_position(*ball) {
            let ground = Hills::height(pos.x.floor() as i32, pos.z.floor() as i32);
            let status = if pos.y >= ground as f32 - 0.1 {
                "resting"
            } else {
                "fell through"
            };
            println!(
                "ball {i}: ({:.2}, {:.2}, {:.2}) ground {ground} -> {status}",
                pos.x, pos.y, pos.z
            );
        }
    }

    tracker.clear(manager.as_ref());
    manager.process_physics_tasks(&mut physics);
    manager.shutdown();
    running.store(false, Ordering::Release);
    let captures = world_thread
        .join()
        .map_err(|_| anyhow::anyhow!("world thread panicked"))?;

    let cache = manager.shape_cache().stats();
    println!(
        "\ncaptures {captures} | shape cache {} hits / {} misses | chunk size {CHUNK_SIZE}",
        cache.hits, cache.misses
    );
    Ok(())
}
