//! Bounded worker pool.
//!
//! A fixed set of workers drains a bounded FIFO queue of job ids. `submit`
//! never blocks: a full queue rejects the id and the caller surfaces the
//! overflow. Handler panics are isolated per job; the worker that ran the job
//! survives.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

/// Invoked by workers for each dequeued job id.
#[async_trait]
pub trait JobHandler: Send + Sync {
    async fn handle(&self, job_id: String);
}

pub struct WorkerPool {
    tx: mpsc::Sender<String>,
    rx: Arc<tokio::sync::Mutex<mpsc::Receiver<String>>>,
    handler: Arc<dyn JobHandler>,
    worker_count: usize,
    active: Arc<AtomicI64>,
    running: AtomicBool,
    cancel: CancellationToken,
    queued: Arc<Mutex<Vec<String>>>,
}

impl WorkerPool {
    pub fn new(num_workers: usize, queue_size: usize, handler: Arc<dyn JobHandler>) -> WorkerPool {
        let num_workers = if num_workers == 0 { 2 } else { num_workers };
        let queue_size = if queue_size == 0 { 100 } else { queue_size };
        let (tx, rx) = mpsc::channel(queue_size);
        WorkerPool {
            tx,
            rx: Arc::new(tokio::sync::Mutex::new(rx)),
            handler,
            worker_count: num_workers,
            active: Arc::new(AtomicI64::new(0)),
            running: AtomicBool::new(false),
            cancel: CancellationToken::new(),
            queued: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Launch the workers. Idempotent.
    pub fn start(&self) {
        if self
            .running
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return;
        }
        for id in 0..self.worker_count {
            let rx = self.rx.clone();
            let handler = self.handler.clone();
            let active = self.active.clone();
            let queued = self.queued.clone();
            let cancel = self.cancel.clone();
            tokio::spawn(async move {
                loop {
                    let job_id = tokio::select! {
                        _ = cancel.cancelled() => break,
                        job = async { rx.lock().await.recv().await } => match job {
                            Some(job_id) => job_id,
                            None => break,
                        },
                    };

                    {
                        let mut queued = queued.lock();
                        if let Some(pos) = queued.iter().position(|j| *j == job_id) {
                            queued.remove(pos);
                        }
                    }

                    active.fetch_add(1, Ordering::SeqCst);
                    let handler = handler.clone();
                    let result =
                        tokio::spawn(async move { handler.handle(job_id).await }).await;
                    if let Err(e) = result {
                        if e.is_panic() {
                            error!("worker {} recovered from panic while processing job", id);
                        }
                    }
                    active.fetch_sub(1, Ordering::SeqCst);
                }
            });
        }
        info!(
            "🚀 Worker pool started with {} workers and queue size {}",
            self.worker_count,
            self.queue_capacity()
        );
    }

    /// Signal workers to shut down and wait up to `timeout` for in-flight
    /// jobs to drain. Idempotent.
    pub async fn stop(&self, timeout: Duration) {
        if self
            .running
            .compare_exchange(true, false, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return;
        }
        self.cancel.cancel();
        if !timeout.is_zero() {
            tokio::time::sleep(timeout).await;
        }
        info!("🛑 Worker pool stopped");
    }

    /// Non-blocking enqueue. Returns false when the queue is full.
    pub fn submit(&self, job_id: &str) -> bool {
        match self.tx.try_send(job_id.to_string()) {
            Ok(()) => {
                self.queued.lock().push(job_id.to_string());
                true
            }
            Err(_) => false,
        }
    }

    pub fn queue_length(&self) -> usize {
        self.tx.max_capacity() - self.tx.capacity()
    }

    pub fn queue_capacity(&self) -> usize {
        self.tx.max_capacity()
    }

    pub fn active_workers(&self) -> i64 {
        self.active.load(Ordering::SeqCst)
    }

    pub fn worker_count(&self) -> usize {
        self.worker_count
    }

    /// Copy of the ids currently waiting in the queue.
    pub fn snapshot_queue(&self) -> Vec<String> {
        self.queued.lock().clone()
    }
}
