//! Mesh worker pool
//!
//! Two crossbeam queues, one per priority tier. Workers always drain the
//! critical queue before blocking on both. Shutdown drops the senders, which
//! wakes every blocked worker; anything still queued is discarded.

use crate::error::{Result, TerrainError};
use crossbeam_channel::{select, unbounded, Receiver, Sender, TryRecvError};
use parking_lot::Mutex;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

/// Scheduling tier of a mesh job
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Debug)]
#[repr(u8)]
pub enum JobPriority {
    /// Near or about to be hit by an awake body, or an edit on an active chunk
    Critical = 0,
    /// Preload
    Normal = 1,
}

impl JobPriority {
    pub(crate) fn from_u8(bits: u8) -> Self {
        match bits {
            0 => Self::Critical,
            _ => Self::Normal,
        }
    }
}

/// What a running job can see of the pool
pub struct JobContext {
    shutdown: Arc<AtomicBool>,
}

impl JobContext {
    /// Jobs that observe shutdown must return without producing output.
    pub fn is_shutdown(&self) -> bool {
        self.shutdown.load(Ordering::Acquire)
    }
}

pub type Job = Box<dyn FnOnce(&JobContext) + Send + 'static>;

struct Queues {
    critical: Sender<Job>,
    normal: Sender<Job>,
}

/// Priority worker pool for mesh generation
pub struct TerrainJobSystem {
    shutdown: Arc<AtomicBool>,
    queues: Mutex<Option<Queues>>,
    workers: Mutex<Vec<JoinHandle<()>>>,
}

impl TerrainJobSystem {
    /// Spawn `threads` workers named `terrain-mesh-{i}`. Zero threads gives an
    /// inline pool.
    pub fn new(threads: usize) -> Self {
        if threads == 0 {
            return Self::inline();
        }

        let shutdown = Arc::new(AtomicBool::new(false));
        let (critical_tx, critical_rx) = unbounded::<Job>();
        let (normal_tx, normal_rx) = unbounded::<Job>();

        let mut workers = Vec::with_capacity(threads);
        for i in 0..threads {
            let critical = critical_rx.clone();
            let normal = normal_rx.clone();
            let ctx = JobContext {
                shutdown: Arc::clone(&shutdown),
            };
            let spawned = thread::Builder::new()
                .name(format!("terrain-mesh-{i}"))
                .spawn(move || worker_loop(ctx, critical, normal));
            match spawned {
                Ok(handle) => workers.push(handle),
                Err(e) => tracing::error!("failed to spawn mesh worker {i}: {e}"),
            }
        }

        if workers.is_empty() {
            tracing::warn!("no mesh workers could be started; running jobs inline");
            return Self::inline();
        }

        tracing::debug!("started {} mesh workers", workers.len());
        Self {
            shutdown,
            queues: Mutex::new(Some(Queues {
                critical: critical_tx,
                normal: normal_tx,
            })),
            workers: Mutex::new(workers),
        }
    }

    /// Pool that runs every job on the submitting thread before `submit` returns
    pub fn inline() -> Self {
        Self {
            shutdown: Arc::new(AtomicBool::new(false)),
            queues: Mutex::new(None),
            workers: Mutex::new(Vec::new()),
        }
    }

    pub fn is_inline(&self) -> bool {
        self.workers.lock().is_empty() && !self.is_shutdown()
    }

    pub fn is_shutdown(&self) -> bool {
        self.shutdown.load(Ordering::Acquire)
    }

    /// Queue a job. Fails once the pool is shut down.
    pub fn submit(
        &self,
        priority: JobPriority,
        job: impl FnOnce(&JobContext) + Send + 'static,
    ) -> Result<()> {
        if self.is_shutdown() {
            return Err(TerrainError::JobSystemShutdown);
        }

        {
            let queues = self.queues.lock();
            if let Some(queues) = queues.as_ref() {
                let sender = match priority {
                    JobPriority::Critical => &queues.critical,
                    JobPriority::Normal => &queues.normal,
                };
                return sender
                    .send(Box::new(job))
                    .map_err(|_| TerrainError::JobSystemShutdown);
            }
        }

        // Inline pool, or shut down between the check above and the lock
        if self.is_shutdown() {
            return Err(TerrainError::JobSystemShutdown);
        }
        let ctx = JobContext {
            shutdown: Arc::clone(&self.shutdown),
        };
        run_job(&ctx, Box::new(job));
        Ok(())
    }

    /// Jobs queued and not yet picked up by a worker
    pub fn pending(&self) -> usize {
        self.queues
            .lock()
            .as_ref()
            .map_or(0, |q| q.critical.len() + q.normal.len())
    }

    /// Stop accepting jobs, discard queued ones and join the workers.
    pub fn shutdown(&self) {
        if self.shutdown.swap(true, Ordering::AcqRel) {
            return;
        }
        self.queues.lock().take();

        let workers = std::mem::take(&mut *self.workers.lock());
        let current = thread::current().id();
        for handle in workers {
            if handle.thread().id() == current {
                continue;
            }
            if handle.join().is_err() {
                tracing::error!("mesh worker exited with a panic");
            }
        }
        tracing::debug!("terrain job system shut down");
    }
}

impl Drop for TerrainJobSystem {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn worker_loop(ctx: JobContext, critical: Receiver<Job>, normal: Receiver<Job>) {
    loop {
        if ctx.is_shutdown() {
            break;
        }

        let job = match critical.try_recv() {
            Ok(job) => job,
            Err(TryRecvError::Disconnected) => break,
            Err(TryRecvError::Empty) => {
                let received = select! {
                    recv(critical) -> msg => msg,
                    recv(normal) -> msg => msg,
                };
                match received {
                    Ok(job) => job,
                    Err(_) => break,
                }
            }
        };

        if ctx.is_shutdown() {
            break;
        }
        run_job(&ctx, job);
    }

    // Drop whatever is still queued without running it
    let discarded = critical.try_iter().count() + normal.try_iter().count();
    if discarded > 0 {
        tracing::debug!("discarded {discarded} queued mesh jobs on shutdown");
    }
}

fn run_job(ctx: &JobContext, job: Job) {
    if let Err(panic) = catch_unwind(AssertUnwindSafe(|| job(ctx))) {
        let message = panic
            .downcast_ref::<&str>()
            .map(|s| s.to_string())
            .or_else(|| panic.downcast_ref::<String>().cloned())
            .unwrap_or_else(|| "unknown panic".to_string());
        tracing::error!("mesh job panicked: {message}");
    }
}
