//! Task dispatcher
//!
//! Accepts decoded tasks, runs each on a pooled worker and publishes the
//! outcome. Stopping waits until every accepted task has been answered.

use crate::error::{AppError, Result};
use crate::metrics::Metrics;
use crate::models::{ConversionResult, ConversionTask};
use crate::pool::WorkerPool;
use crate::worker::panic_message;
use async_trait::async_trait;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{oneshot, Mutex, Notify};
use tracing::{debug, error, info};

/// Outbound side of the dispatcher
#[async_trait]
pub trait ResultPublisher: Send + Sync {
    /// Deliver the result of `task` to every configured destination
    async fn publish(&self, task: &ConversionTask, result: &ConversionResult) -> Result<()>;

    fn check_ready(&self) -> Result<()>;
}

/// What the submitter of a task gets back
#[derive(Debug)]
pub struct TaskReply {
    pub result: ConversionResult,
    pub delivery: Result<()>,
}

impl TaskReply {
    /// Outcome used to decide whether the inbound message may be committed
    pub fn into_outcome(self) -> Result<()> {
        match (self.result.error, self.delivery) {
            (_, Err(e)) => Err(e),
            (Some(e), Ok(())) => Err(e),
            (None, Ok(())) => Ok(()),
        }
    }
}

struct Shared {
    pool: WorkerPool,
    publisher: Arc<dyn ResultPublisher>,
    metrics: Metrics,
    pending: AtomicUsize,
    idle: Notify,
}

impl Shared {
    fn finish_one(&self) {
        self.metrics.pending_tasks.dec();
        if self.pending.fetch_sub(1, Ordering::AcqRel) == 1 {
            self.idle.notify_waiters();
        }
    }

    async fn wait_idle(&self) {
        loop {
            let notified = self.idle.notified();
            if self.pending.load(Ordering::Acquire) == 0 {
                return;
            }
            notified.await;
        }
    }
}

#[derive(Clone)]
pub struct Dispatcher {
    shared: Arc<Shared>,
    started: Arc<Mutex<bool>>,
}

impl Dispatcher {
    pub fn new(pool: WorkerPool, publisher: Arc<dyn ResultPublisher>, metrics: Metrics) -> Self {
        Self {
            shared: Arc::new(Shared {
                pool,
                publisher,
                metrics,
                pending: AtomicUsize::new(0),
                idle: Notify::new(),
            }),
            started: Arc::new(Mutex::new(false)),
        }
    }

    pub fn pool(&self) -> &WorkerPool {
        &self.shared.pool
    }

    pub fn publisher(&self) -> &Arc<dyn ResultPublisher> {
        &self.shared.publisher
    }

    /// Tasks accepted and not yet answered
    pub fn pending(&self) -> usize {
        self.shared.pending.load(Ordering::Acquire)
    }

    pub async fn start(&self) -> Result<()> {
        let mut started = self.started.lock().await;
        if *started {
            return Err(AppError::AlreadyStarted);
        }
        *started = true;
        info!(workers = self.shared.pool.size(), "Dispatcher started");
        Ok(())
    }

    /// Refuse new tasks and wait for the accepted ones to finish
    pub async fn stop(&self) -> Result<()> {
        let mut started = self.started.lock().await;
        if !*started {
            return Err(AppError::NotStarted);
        }
        *started = false;

        let pending = self.pending();
        if pending > 0 {
            info!(pending, "Waiting for pending tasks");
        }
        self.shared.wait_idle().await;

        info!("Dispatcher stopped");
        Ok(())
    }

    /// Accept a task; the reply arrives once it is processed and published
    pub async fn submit(&self, task: ConversionTask) -> Result<oneshot::Receiver<TaskReply>> {
        // Held while counting so stop() cannot miss a task accepted concurrently.
        let started = self.started.lock().await;
        if !*started {
            return Err(AppError::NotStarted);
        }

        self.shared.pending.fetch_add(1, Ordering::AcqRel);
        self.shared.metrics.pending_tasks.inc();
        drop(started);

        let (reply_tx, reply_rx) = oneshot::channel();
        let shared = self.shared.clone();

        tokio::spawn(async move {
            let reply = run_task(&shared, task).await;
            if reply_tx.send(reply).is_err() {
                debug!("Task reply receiver dropped");
            }
            shared.finish_one();
        });

        Ok(reply_rx)
    }
}

async fn run_task(shared: &Shared, task: ConversionTask) -> TaskReply {
    let accepted = Instant::now();

    let mut result = match execute(shared, &task).await {
        Ok(result) => result,
        Err(e) => ConversionResult::failed(e),
    };
    result.work_time_async_ms = elapsed_ms(accepted.elapsed());

    let labels = [task.mime_type.as_str()];
    shared
        .metrics
        .conversion_duration_async
        .with_label_values(&labels)
        .observe(result.work_time_async_ms as f64);

    if result.is_success() {
        shared
            .metrics
            .processed_conversion_requests
            .with_label_values(&labels)
            .inc();
    } else {
        shared
            .metrics
            .failed_conversion_requests
            .with_label_values(&labels)
            .inc();
    }

    let delivery = shared.publisher.publish(&task, &result).await;
    if let Err(e) = &delivery {
        shared.metrics.kafka_producer_errors.inc();
        error!(path = %task.file_path, error = %e, "Failed to publish conversion result");
    }

    TaskReply { result, delivery }
}

/// Run the pipeline on a leased worker, in its own task so a panic stays contained
async fn execute(shared: &Shared, task: &ConversionTask) -> Result<ConversionResult> {
    let lease = shared.pool.acquire().await?;
    let worker_number = lease.number();
    let task = task.clone();

    let handle = tokio::spawn(async move {
        let result = lease.process(&task).await;
        drop(lease);
        result
    });

    match handle.await {
        Ok(result) => Ok(result),
        Err(e) if e.is_panic() => {
            let mut result =
                ConversionResult::failed(AppError::Panic(panic_message(e.into_panic().as_ref())));
            result.worker_number = worker_number;
            Ok(result)
        }
        Err(e) => Err(AppError::Internal(format!("conversion task failed: {e}"))),
    }
}

fn elapsed_ms(elapsed: Duration) -> u64 {
    elapsed.as_millis() as u64
}
