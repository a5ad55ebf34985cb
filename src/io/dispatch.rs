//! Single-threaded callback dispatch
//!
//! Network events are produced by many tokio tasks at once, but application
//! handlers must observe them one at a time and in order. Every event is
//! turned into a job and queued here; a dedicated OS thread drains the queue
//! once per refresh tick and runs each job against the owned context (the
//! user's handler). Handlers therefore take `&mut self` and need no locking.

use crate::error::Result;
use parking_lot::Mutex;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle, ThreadId};
use std::time::Duration;
use tokio::sync::mpsc::{self, error::TryRecvError};
use tracing::{debug, error, trace};

type Job<C> = Box<dyn FnOnce(&mut C) + Send>;

/// Counters describing dispatch activity
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DispatchStats {
    /// Jobs accepted by [`DispatchQueue::execute`]
    pub enqueued: u64,
    /// Jobs that ran to completion or panicked
    pub executed: u64,
    /// Jobs discarded because the queue was stopped
    pub dropped: u64,
    /// Jobs that panicked
    pub panicked: u64,
}

#[derive(Debug, Default)]
struct Counters {
    enqueued: AtomicU64,
    executed: AtomicU64,
    dropped: AtomicU64,
    panicked: AtomicU64,
}

/// Queue of jobs executed sequentially on one dedicated thread
///
/// `C` is the context owned by the dispatch thread. Jobs receive it by
/// mutable reference; nothing else can reach it.
pub struct DispatchQueue<C> {
    tx: mpsc::UnboundedSender<Job<C>>,
    running: Arc<AtomicBool>,
    worker: Mutex<Option<JoinHandle<()>>>,
    worker_id: ThreadId,
    counters: Arc<Counters>,
}

impl<C: Send + 'static> DispatchQueue<C> {
    /// Spawn the dispatch thread
    ///
    /// # Arguments
    /// * `name` - Thread name, visible in logs and debuggers
    /// * `interval` - Time between two drains of the queue
    /// * `context` - State handed to every job
    pub fn start(name: impl Into<String>, interval: Duration, mut context: C) -> Result<Self> {
        let (tx, mut rx) = mpsc::unbounded_channel::<Job<C>>();
        let running = Arc::new(AtomicBool::new(true));
        let counters = Arc::new(Counters::default());

        let worker = {
            let running = running.clone();
            let counters = counters.clone();
            thread::Builder::new().name(name.into()).spawn(move || {
                debug!(interval_ms = interval.as_millis() as u64, "Dispatch thread started");

                'ticks: while running.load(Ordering::Acquire) {
                    loop {
                        if !running.load(Ordering::Acquire) {
                            break 'ticks;
                        }
                        match rx.try_recv() {
                            Ok(job) => {
                                let ctx = &mut context;
                                if catch_unwind(AssertUnwindSafe(move || job(ctx))).is_err() {
                                    counters.panicked.fetch_add(1, Ordering::Relaxed);
                                    error!("Handler panicked during dispatch");
                                }
                                counters.executed.fetch_add(1, Ordering::Relaxed);
                            }
                            Err(TryRecvError::Empty) => break,
                            Err(TryRecvError::Disconnected) => break 'ticks,
                        }
                    }
                    thread::park_timeout(interval);
                }

                rx.close();
                let mut discarded = 0;
                while rx.try_recv().is_ok() {
                    discarded += 1;
                }
                counters.dropped.fetch_add(discarded, Ordering::Relaxed);
                debug!(discarded, "Dispatch thread stopped");
            })?
        };

        Ok(DispatchQueue {
            tx,
            running,
            worker_id: worker.thread().id(),
            worker: Mutex::new(Some(worker)),
            counters,
        })
    }

    /// Queue a job
    ///
    /// # Returns
    /// `false` if the queue is stopped and the job was discarded
    pub fn execute<F>(&self, job: F) -> bool
    where
        F: FnOnce(&mut C) + Send + 'static,
    {
        if !self.running.load(Ordering::Acquire) || self.tx.send(Box::new(job)).is_err() {
            self.counters.dropped.fetch_add(1, Ordering::Relaxed);
            trace!("Dispatch queue stopped, job discarded");
            return false;
        }
        self.counters.enqueued.fetch_add(1, Ordering::Relaxed);
        true
    }
}

impl<C> DispatchQueue<C> {
    /// Stop the dispatch thread
    ///
    /// Pending jobs are discarded. Waits for the job in progress to finish,
    /// except when called from a job, where it returns immediately and the
    /// thread exits after the current job.
    pub fn stop(&self) {
        self.running.store(false, Ordering::Release);

        let Some(worker) = self.worker.lock().take() else {
            return;
        };
        worker.thread().unpark();
        if self.is_dispatch_thread() {
            return;
        }
        if worker.join().is_err() {
            error!("Dispatch thread terminated abnormally");
        }
    }

    /// Whether jobs are still accepted
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    /// Whether the caller is running on the dispatch thread
    pub fn is_dispatch_thread(&self) -> bool {
        thread::current().id() == self.worker_id
    }

    /// Snapshot of the dispatch counters
    pub fn stats(&self) -> DispatchStats {
        DispatchStats {
            enqueued: self.counters.enqueued.load(Ordering::Relaxed),
            executed: self.counters.executed.load(Ordering::Relaxed),
            dropped: self.counters.dropped.load(Ordering::Relaxed),
            panicked: self.counters.panicked.load(Ordering::Relaxed),
        }
    }
}

impl<C> Drop for DispatchQueue<C> {
    fn drop(&mut self) {
        self.running.store(false, Ordering::Release);
        if let Some(worker) = self.worker.lock().take() {
            worker.thread().unpark();
        }
    }
}

impl<C> std::fmt::Debug for DispatchQueue<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DispatchQueue")
            .field("running", &self.is_running())
            .field("stats", &self.stats())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::mpsc as std_mpsc;

    const TICK: Duration = Duration::from_millis(5);
    const WAIT: Duration = Duration::from_secs(2);

    #[test]
    fn test_jobs_run_in_order_on_one_thread() {
        let queue = DispatchQueue::start("test-dispatch", TICK, Vec::new()).unwrap();
        let (tx, rx) = std_mpsc::channel();

        for i in 0..10u32 {
            let tx = tx.clone();
            assert!(queue.execute(move |seen: &mut Vec<u32>| {
                seen.push(i);
                tx.send((seen.clone(), thread::current().id())).unwrap();
            }));
        }

        let mut threads = Vec::new();
        let mut last = Vec::new();
        for _ in 0..10 {
            let (seen, id) = rx.recv_timeout(WAIT).unwrap();
            threads.push(id);
            last = seen;
        }

        assert_eq!(last, (0..10).collect::<Vec<_>>());
        assert!(threads.iter().all(|id| *id == threads[0]));
        assert_ne!(threads[0], thread::current().id());

        queue.stop();
        assert_eq!(queue.stats().executed, 10);
    }

    #[test]
    fn test_panicking_job_does_not_stop_dispatch() {
        let queue = DispatchQueue::start("test-dispatch", TICK, ()).unwrap();
        let (tx, rx) = std_mpsc::channel();

        queue.execute(|_| panic!("handler failure"));
        queue.execute(move |_| tx.send("still running").unwrap());

        assert_eq!(rx.recv_timeout(WAIT).unwrap(), "still running");
        queue.stop();
        assert_eq!(queue.stats().panicked, 1);
    }

    #[test]
    fn test_execute_after_stop_is_rejected() {
        let queue = DispatchQueue::start("test-dispatch", TICK, ()).unwrap();
        queue.stop();

        assert!(!queue.is_running());
        assert!(!queue.execute(|_| {}));
        assert_eq!(queue.stats().dropped, 1);

        // Second stop is a no-op
        queue.stop();
    }

    #[test]
    fn test_stop_from_dispatch_thread_discards_pending() {
        let queue = Arc::new(DispatchQueue::start("test-dispatch", TICK, ()).unwrap());
        let (tx, rx) = std_mpsc::channel();

        let inner = queue.clone();
        let first = tx.clone();
        queue.execute(move |_| {
            assert!(inner.is_dispatch_thread());
            inner.stop();
            first.send("stopped").unwrap();
        });
        queue.execute(move |_| tx.send("after stop").unwrap());

        assert_eq!(rx.recv_timeout(WAIT).unwrap(), "stopped");
        assert!(rx.recv_timeout(Duration::from_millis(100)).is_err());
        assert!(!queue.is_dispatch_thread());
    }
}
