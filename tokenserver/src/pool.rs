//! Crypto worker pool
//!
//! A fixed set of long-lived OS threads, each owning one bounded job queue.
//! Chain verification is CPU-bound, so it runs here instead of on the async
//! request path; the pool is sized independently of request concurrency.
//!
//! Every job carries a correlation id and its own `oneshot` reply channel, so
//! replies route back to the submitting caller regardless of completion
//! order. A caller that gives up (deadline or cancellation) drops the
//! receiver and the worker's late reply is discarded.
//!
//! Jobs run under `catch_unwind`: a panicking job loses its reply but the
//! worker thread keeps serving. The caller sees the closed reply channel,
//! retries once on a different worker, and then reports `WorkerFailure`.

use std::future::Future;
use std::io;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use tokio::sync::{mpsc, oneshot};
use tokio::time::{timeout_at, Instant};
use tokenserver_core::{
    AssertionBundle, ErrorKind, Result as CoreResult, TrustAnchors, Verdict,
};

use crate::runner::{chain_verdict, CryptoWorker, VerificationRunner};

/// Jobs a single worker may have queued behind the one it is running
const QUEUE_DEPTH: usize = 64;

/// Attempts per request: the first dispatch plus one retry
const MAX_ATTEMPTS: usize = 2;

struct Job {
    correlation_id: u64,
    bundle: Arc<AssertionBundle>,
    anchors: Arc<TrustAnchors>,
    reply: oneshot::Sender<CoreResult<String>>,
}

struct WorkerHandle {
    queue: mpsc::Sender<Job>,
    in_flight: Arc<AtomicUsize>,
    thread: JoinHandle<()>,
}

enum DispatchError {
    /// Every candidate queue stayed full until the deadline
    Timeout,
    /// Every worker has shut down
    Closed,
}

pub struct WorkerPool {
    workers: Vec<WorkerHandle>,
    cursor: AtomicUsize,
    next_correlation_id: AtomicU64,
}

impl WorkerPool {
    /// Start `size` worker threads (at least one) sharing `worker`
    pub fn start<W: CryptoWorker>(size: usize, worker: W) -> io::Result<Self> {
        let worker = Arc::new(worker);
        let size = size.max(1);
        let mut workers = Vec::with_capacity(size);

        for index in 0..size {
            let (queue, jobs) = mpsc::channel(QUEUE_DEPTH);
            let in_flight = Arc::new(AtomicUsize::new(0));

            let thread = thread::Builder::new()
                .name(format!("crypto-worker-{}", index))
                .spawn({
                    let worker = Arc::clone(&worker);
                    let in_flight = Arc::clone(&in_flight);
                    move || run_worker(index, jobs, worker, in_flight)
                })?;

            workers.push(WorkerHandle {
                queue,
                in_flight,
                thread,
            });
        }

        tracing::info!(size, "Crypto worker pool started");

        Ok(Self {
            workers,
            cursor: AtomicUsize::new(0),
            next_correlation_id: AtomicU64::new(1),
        })
    }

    /// Number of worker threads
    pub fn size(&self) -> usize {
        self.workers.len()
    }

    /// Jobs queued or running across all workers
    pub fn in_flight(&self) -> usize {
        self.workers
            .iter()
            .map(|w| w.in_flight.load(Ordering::SeqCst))
            .sum()
    }

    /// Submit a bundle and wait for its chain verdict.
    ///
    /// Never waits past `deadline`; a late reply is dropped.
    pub async fn submit(
        &self,
        bundle: Arc<AssertionBundle>,
        anchors: Arc<TrustAnchors>,
        deadline: Duration,
    ) -> Verdict {
        let deadline = Instant::now() + deadline;
        let correlation_id = self.next_correlation_id.fetch_add(1, Ordering::Relaxed);
        let mut failed_worker = None;

        for attempt in 1..=MAX_ATTEMPTS {
            let (reply, answer) = oneshot::channel();
            let job = Job {
                correlation_id,
                bundle: Arc::clone(&bundle),
                anchors: Arc::clone(&anchors),
                reply,
            };

            let worker = match self.dispatch(job, failed_worker, deadline).await {
                Ok(worker) => worker,
                Err(DispatchError::Timeout) => {
                    tracing::warn!(correlation_id, "Worker queues full until deadline");
                    return Verdict::rejected(ErrorKind::VerificationTimeout);
                }
                Err(DispatchError::Closed) => {
                    tracing::error!(correlation_id, "No live crypto workers");
                    return Verdict::rejected(ErrorKind::WorkerFailure);
                }
            };

            match timeout_at(deadline, answer).await {
                Ok(Ok(result)) => return chain_verdict(&bundle, result),
                Ok(Err(_)) => {
                    tracing::warn!(correlation_id, worker, attempt, "Worker dropped the job");
                    failed_worker = Some(worker);
                }
                Err(_) => {
                    tracing::warn!(correlation_id, worker, "Verification timed out");
                    return Verdict::rejected(ErrorKind::VerificationTimeout);
                }
            }
        }

        Verdict::rejected(ErrorKind::WorkerFailure)
    }

    /// Hand `job` to a worker, preferring idle workers in round-robin order
    /// and skipping `exclude` unless it is the only one left.
    async fn dispatch(
        &self,
        mut job: Job,
        exclude: Option<usize>,
        deadline: Instant,
    ) -> Result<usize, DispatchError> {
        let correlation_id = job.correlation_id;
        let candidates = self.candidates(exclude);

        for &index in &candidates {
            let handle = &self.workers[index];
            handle.in_flight.fetch_add(1, Ordering::SeqCst);
            match handle.queue.try_send(job) {
                Ok(()) => {
                    tracing::debug!(correlation_id, worker = index, "Dispatched job");
                    return Ok(index);
                }
                Err(mpsc::error::TrySendError::Full(back))
                | Err(mpsc::error::TrySendError::Closed(back)) => {
                    handle.in_flight.fetch_sub(1, Ordering::SeqCst);
                    job = back;
                }
            }
        }

        // Every queue is full or closed: wait on the first live one.
        let Some(&index) = candidates
            .iter()
            .find(|&&i| !self.workers[i].queue.is_closed())
        else {
            return Err(DispatchError::Closed);
        };
        let handle = &self.workers[index];
        handle.in_flight.fetch_add(1, Ordering::SeqCst);
        match timeout_at(deadline, handle.queue.send(job)).await {
            Ok(Ok(())) => Ok(index),
            Ok(Err(_)) => {
                handle.in_flight.fetch_sub(1, Ordering::SeqCst);
                Err(DispatchError::Closed)
            }
            Err(_) => {
                handle.in_flight.fetch_sub(1, Ordering::SeqCst);
                Err(DispatchError::Timeout)
            }
        }
    }

    fn candidates(&self, exclude: Option<usize>) -> Vec<usize> {
        let n = self.workers.len();
        let start = self.cursor.fetch_add(1, Ordering::Relaxed) % n;

        let mut order: Vec<usize> = (0..n)
            .map(|i| (start + i) % n)
            .filter(|&i| Some(i) != exclude)
            .collect();
        if order.is_empty() {
            order.extend(exclude);
        }
        // stable: idle workers keep their round-robin order ahead of busy ones
        order.sort_by_key(|&i| self.workers[i].in_flight.load(Ordering::SeqCst));
        order
    }

    /// Close every queue and wait for the workers to finish their current job
    pub fn shutdown(self) {
        // dropping each handle's queue lets its thread drain and exit
        let threads: Vec<_> = self.workers.into_iter().map(|w| w.thread).collect();
        for thread in threads {
            if thread.join().is_err() {
                tracing::error!("Crypto worker exited abnormally");
            }
        }
        tracing::info!("Crypto worker pool stopped");
    }
}

impl VerificationRunner for WorkerPool {
    fn submit(
        &self,
        bundle: Arc<AssertionBundle>,
        anchors: Arc<TrustAnchors>,
        deadline: Duration,
    ) -> impl Future<Output = Verdict> + Send {
        WorkerPool::submit(self, bundle, anchors, deadline)
    }
}

fn run_worker<W: CryptoWorker>(
    index: usize,
    mut jobs: mpsc::Receiver<Job>,
    worker: Arc<W>,
    in_flight: Arc<AtomicUsize>,
) {
    tracing::debug!(worker = index, "Crypto worker running");

    while let Some(job) = jobs.blocking_recv() {
        let Job {
            correlation_id,
            bundle,
            anchors,
            reply,
        } = job;

        let outcome = panic::catch_unwind(AssertUnwindSafe(|| worker.verify(&bundle, &anchors)));
        in_flight.fetch_sub(1, Ordering::SeqCst);

        match outcome {
            Ok(result) => {
                if reply.send(result).is_err() {
                    tracing::debug!(correlation_id, worker = index, "Caller gone, result discarded");
                }
            }
            Err(_) => {
                tracing::error!(correlation_id, worker = index, "Crypto worker panicked on job");
                drop(reply);
            }
        }
    }

    tracing::debug!(worker = index, "Crypto worker stopped");
}
