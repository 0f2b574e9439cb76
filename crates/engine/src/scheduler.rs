//! Background thread pools.
//!
//! Flushes run on the high-priority pool and compactions on the low one, so
//! a long compaction never delays the flush that unblocks writers. Jobs are
//! boxed closures sent over a `crossbeam_channel`; each worker loops on
//! `recv` until the pool is shut down.

use std::thread::JoinHandle;

use crossbeam_channel::{unbounded, Receiver, Sender};
use parking_lot::Mutex;
use tracing::{debug, warn};

pub(crate) type Job = Box<dyn FnOnce() + Send + 'static>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Priority {
    /// Flushes.
    High,
    /// Compactions.
    Low,
}

impl Priority {
    fn label(self) -> &'static str {
        match self {
            Priority::High => "flush",
            Priority::Low => "compaction",
        }
    }
}

struct Pool {
    priority: Priority,
    tx: Mutex<Option<Sender<Job>>>,
    rx: Receiver<Job>,
    workers: Mutex<Vec<JoinHandle<()>>>,
}

impl Pool {
    fn new(priority: Priority, threads: usize) -> Self {
        let (tx, rx) = unbounded::<Job>();
        let pool = Self {
            priority,
            tx: Mutex::new(Some(tx)),
            rx,
            workers: Mutex::new(Vec::new()),
        };
        pool.ensure_threads(threads);
        pool
    }

    fn ensure_threads(&self, threads: usize) {
        let mut workers = self.workers.lock();
        while workers.len() < threads.max(1) {
            let rx = self.rx.clone();
            let name = format!("riptide-{}-{}", self.priority.label(), workers.len());
            match std::thread::Builder::new().name(name).spawn(move || {
                while let Ok(job) = rx.recv() {
                    job();
                }
            }) {
                Ok(handle) => workers.push(handle),
                Err(e) => {
                    warn!(error = %e, pool = self.priority.label(), "failed to spawn background thread");
                    break;
                }
            }
        }
    }

    fn submit(&self, job: Job) -> bool {
        match self.tx.lock().as_ref() {
            Some(tx) => tx.send(job).is_ok(),
            None => false,
        }
    }

    fn shutdown(&self) {
        self.tx.lock().take();
        let workers: Vec<JoinHandle<()>> = self.workers.lock().drain(..).collect();
        let current = std::thread::current().id();
        for handle in workers {
            // A job dropping the last database handle ends up here on its own
            // worker; that thread exits once its job returns.
            if handle.thread().id() == current {
                continue;
            }
            if handle.join().is_err() {
                warn!(pool = self.priority.label(), "background thread panicked");
            }
        }
    }
}

pub(crate) struct Scheduler {
    high: Pool,
    low: Pool,
}

impl Scheduler {
    pub(crate) fn new(flush_threads: usize, compaction_threads: usize) -> Self {
        debug!(flush_threads, compaction_threads, "starting background pools");
        Self {
            high: Pool::new(Priority::High, flush_threads),
            low: Pool::new(Priority::Low, compaction_threads),
        }
    }

    fn pool(&self, priority: Priority) -> &Pool {
        match priority {
            Priority::High => &self.high,
            Priority::Low => &self.low,
        }
    }

    /// Queues `job`. Returns `false` once the scheduler is shut down, in
    /// which case the job is dropped without running.
    pub(crate) fn schedule(&self, priority: Priority, job: Job) -> bool {
        self.pool(priority).submit(job)
    }

    /// Grows a pool to at least `threads` workers. Pools never shrink.
    pub(crate) fn ensure_threads(&self, priority: Priority, threads: usize) {
        self.pool(priority).ensure_threads(threads);
    }

    /// Stops accepting jobs, lets queued ones run, and joins the workers.
    pub(crate) fn shutdown(&self) {
        self.high.shutdown();
        self.low.shutdown();
    }
}
