//! Fixed-size mover worker pool
//!
//! Phase moves are dispatched one task per entry and awaited synchronously
//! by the writer; the pool only provides parallelism, not pipelining. Each
//! task takes its entry by value, so no two in-flight tasks can share one.

use crate::entry::TrackedEntry;
use crate::error::{FlagError, Result};
use crate::mover::{MoveOutcome, Mover};
use std::sync::mpsc;
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::debug;

struct MoveTask {
    mover: Arc<dyn Mover>,
    entry: TrackedEntry,
    result_tx: mpsc::Sender<Result<MoveOutcome>>,
}

/// Handle to one submitted move. Waiting consumes the handle.
pub struct PendingMove {
    rx: mpsc::Receiver<Result<MoveOutcome>>,
}

impl PendingMove {
    /// Block until the move completes.
    pub fn wait(self) -> Result<MoveOutcome> {
        self.rx
            .recv()
            .map_err(|_| FlagError::WorkerPool("mover task dropped without a result".into()))?
    }

    /// Bounded wait used while draining leftovers during rollback. `None`
    /// means the task is still outstanding (or its worker died).
    pub fn wait_timeout(&self, timeout: Duration) -> Option<Result<MoveOutcome>> {
        self.rx.recv_timeout(timeout).ok()
    }
}

/// Worker pool executing movers on plain threads.
pub struct MoverPool {
    task_tx: mpsc::Sender<MoveTask>,
    workers: Vec<JoinHandle<()>>,
}

impl MoverPool {
    pub fn new(threads: usize) -> Self {
        let threads = threads.max(1);
        let (task_tx, task_rx) = mpsc::channel::<MoveTask>();
        let task_rx = Arc::new(Mutex::new(task_rx));

        let workers = (0..threads)
            .map(|_| {
                let task_rx = Arc::clone(&task_rx);
                thread::spawn(move || loop {
                    let task = {
                        let guard = match task_rx.lock() {
                            Ok(guard) => guard,
                            Err(poisoned) => poisoned.into_inner(),
                        };
                        guard.recv()
                    };
                    match task {
                        Ok(task) => {
                            let result = task.mover.relocate(task.entry);
                            // Receiver may have been dropped during rollback
                            let _ = task.result_tx.send(result);
                        }
                        Err(_) => break,
                    }
                })
            })
            .collect();

        Self { task_tx, workers }
    }

    /// Dispatch one move; the returned handle is the only way to observe it.
    pub fn submit(&self, mover: Arc<dyn Mover>, entry: TrackedEntry) -> PendingMove {
        let (result_tx, result_rx) = mpsc::channel();
        let task = MoveTask {
            mover,
            entry,
            result_tx,
        };
        // Send only fails if all workers are gone; surface that on wait()
        let _ = self.task_tx.send(task);
        PendingMove { rx: result_rx }
    }

    /// Close the task channel and join the workers.
    pub fn shutdown(self) {
        drop(self.task_tx);
        for handle in self.workers {
            let _ = handle.join();
        }
        debug!("mover pool drained and stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entry::TrackedDir;
    use crate::mover::MoveStatus;
    use std::sync::atomic::{AtomicU64, Ordering};

    /// Mover stub that records invocations without touching the filesystem.
    struct CountingMover {
        calls: AtomicU64,
    }

    impl Mover for CountingMover {
        fn target(&self) -> TrackedDir {
            TrackedDir::Staging
        }

        fn relocate(&self, mut entry: TrackedEntry) -> Result<MoveOutcome> {
            self.calls.fetch_add(1, Ordering::Relaxed);
            entry.mark_moved(TrackedDir::Staging);
            Ok(MoveOutcome {
                entry,
                status: MoveStatus::Moved,
            })
        }
    }

    #[test]
    fn test_pool_runs_all_tasks() {
        let pool = MoverPool::new(3);
        let mover = Arc::new(CountingMover {
            calls: AtomicU64::new(0),
        });

        let pending: Vec<PendingMove> = (0..20)
            .map(|i| {
                let entry = TrackedEntry::new("a", format!("f{i}"), 10, 5, i);
                pool.submit(Arc::clone(&mover) as Arc<dyn Mover>, entry)
            })
            .collect();

        for p in pending {
            let outcome = p.wait().unwrap();
            assert_eq!(outcome.status, MoveStatus::Moved);
        }
        assert_eq!(mover.calls.load(Ordering::Relaxed), 20);
        pool.shutdown();
    }

    #[test]
    fn test_wait_timeout_returns_none_when_outstanding() {
        struct SlowMover;
        impl Mover for SlowMover {
            fn target(&self) -> TrackedDir {
                TrackedDir::Staging
            }
            fn relocate(&self, mut entry: TrackedEntry) -> Result<MoveOutcome> {
                thread::sleep(Duration::from_millis(200));
                entry.mark_moved(TrackedDir::Staging);
                Ok(MoveOutcome {
                    entry,
                    status: MoveStatus::Moved,
                })
            }
        }

        let pool = MoverPool::new(1);
        let entry = TrackedEntry::new("a", "slow", 10, 5, 1);
        let pending = pool.submit(Arc::new(SlowMover), entry);
        assert!(pending.wait_timeout(Duration::from_millis(10)).is_none());
        // A longer drain eventually observes the result
        assert!(pending.wait_timeout(Duration::from_secs(2)).is_some());
        pool.shutdown();
    }
}
