//! Bounded, never-blocking hand-off of rendered actions to executors.
//!
//! The poll loop pushes into a [`DispatchQueue`]; a [`DispatchWorkers`] pool
//! pops requests and runs them through an [`ActionExecutor`]. When the queue
//! is full the oldest pending request is dropped.

use crate::binding::{Action, InputChannel, TriggerKind};
use crate::error::Result;
use crossbeam_channel::{bounded, Receiver, RecvTimeoutError, Sender, TrySendError};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;
use tracing::{debug, warn};

/// Default queue capacity.
pub const DEFAULT_QUEUE_CAPACITY: usize = 64;

/// How long a worker waits for work before re-checking its stop flag.
const WORKER_POLL: Duration = Duration::from_millis(20);

/// A rendered action ready for execution.
#[derive(Debug, Clone, PartialEq)]
pub struct DispatchRequest {
    /// Index of the originating binding.
    pub binding: usize,
    pub channel: InputChannel,
    pub trigger: TriggerKind,
    pub action: Action,
    /// Device frame counter of the sample that fired.
    pub sequence: u8,
}

/// Result of a push.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Enqueued {
    Accepted,
    /// Accepted after evicting the oldest pending request.
    DroppedOldest,
}

/// Bounded MPMC queue with drop-oldest overflow.
#[derive(Clone)]
pub struct DispatchQueue {
    tx: Sender<DispatchRequest>,
    rx: Receiver<DispatchRequest>,
    capacity: usize,
    dropped: Arc<AtomicU64>,
}

impl DispatchQueue {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        let (tx, rx) = bounded(capacity);
        Self {
            tx,
            rx,
            capacity,
            dropped: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Enqueue without blocking, evicting the oldest entry if full.
    pub fn push(&self, request: DispatchRequest) -> Enqueued {
        let mut pending = request;
        let mut outcome = Enqueued::Accepted;
        loop {
            match self.tx.try_send(pending) {
                Ok(()) => return outcome,
                Err(TrySendError::Full(back)) => {
                    if let Ok(oldest) = self.rx.try_recv() {
                        self.dropped.fetch_add(1, Ordering::Relaxed);
                        warn!(
                            capacity = self.capacity,
                            binding = oldest.binding,
                            action = oldest.action.kind(),
                            "dispatch queue full, dropped oldest request"
                        );
                        outcome = Enqueued::DroppedOldest;
                    }
                    pending = back;
                }
                // Unreachable while `self.rx` is alive
                Err(TrySendError::Disconnected(_)) => return outcome,
            }
        }
    }

    /// Non-blocking pop.
    pub fn try_pop(&self) -> Option<DispatchRequest> {
        self.rx.try_recv().ok()
    }

    /// Receiver end for executors.
    pub fn receiver(&self) -> Receiver<DispatchRequest> {
        self.rx.clone()
    }

    /// Remove every pending request, returning how many were discarded.
    pub fn clear(&self) -> usize {
        self.rx.try_iter().count()
    }

    pub fn len(&self) -> usize {
        self.rx.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rx.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Total requests evicted because the queue was full.
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

/// Runs rendered actions. Implemented by collaborators (shell runner, HTTP client, ...).
pub trait ActionExecutor: Send + Sync {
    fn execute(&self, request: &DispatchRequest) -> Result<()>;
}

/// What happens to pending requests when dispatching stops.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum DrainPolicy {
    /// Execute everything still queued before returning.
    #[default]
    Drain,
    /// Drop everything still queued.
    Discard,
}

/// Fixed-size pool of executor threads fed by a [`DispatchQueue`].
pub struct DispatchWorkers {
    queue: DispatchQueue,
    stop: Arc<AtomicBool>,
    handles: Vec<JoinHandle<()>>,
    executed: Arc<AtomicU64>,
    failed: Arc<AtomicU64>,
}

impl DispatchWorkers {
    pub fn spawn(queue: &DispatchQueue, executor: Arc<dyn ActionExecutor>, workers: usize) -> Self {
        let stop = Arc::new(AtomicBool::new(false));
        let executed = Arc::new(AtomicU64::new(0));
        let failed = Arc::new(AtomicU64::new(0));

        let handles = (0..workers.max(1))
            .map(|id| {
                let rx = queue.receiver();
                let stop = Arc::clone(&stop);
                let executor = Arc::clone(&executor);
                let executed = Arc::clone(&executed);
                let failed = Arc::clone(&failed);
                std::thread::spawn(move || loop {
                    if stop.load(Ordering::Acquire) {
                        break;
                    }
                    match rx.recv_timeout(WORKER_POLL) {
                        Ok(request) => {
                            if let Err(e) = executor.execute(&request) {
                                failed.fetch_add(1, Ordering::Relaxed);
                                warn!(worker = id, action = request.action.kind(), error = %e, "action failed");
                            } else {
                                executed.fetch_add(1, Ordering::Relaxed);
                            }
                        }
                        Err(RecvTimeoutError::Timeout) => continue,
                        Err(RecvTimeoutError::Disconnected) => break,
                    }
                })
            })
            .collect();

        debug!(workers = workers.max(1), "dispatch workers started");
        Self {
            queue: queue.clone(),
            stop,
            handles,
            executed,
            failed,
        }
    }

    pub fn executed(&self) -> u64 {
        self.executed.load(Ordering::Relaxed)
    }

    pub fn failed(&self) -> u64 {
        self.failed.load(Ordering::Relaxed)
    }

    /// Stop the pool, draining or discarding what is still queued.
    pub fn stop(mut self, policy: DrainPolicy) {
        match policy {
            DrainPolicy::Discard => {
                let discarded = self.queue.clear();
                debug!(discarded, "dispatch queue discarded");
            }
            DrainPolicy::Drain => {
                while !self.queue.is_empty() {
                    std::thread::sleep(Duration::from_millis(1));
                }
            }
        }
        self.shutdown();
    }

    fn shutdown(&mut self) {
        self.stop.store(true, Ordering::Release);
        for handle in self.handles.drain(..) {
            let _ = handle.join();
        }
    }
}

impl Drop for DispatchWorkers {
    fn drop(&mut self) {
        self.shutdown();
    }
}
