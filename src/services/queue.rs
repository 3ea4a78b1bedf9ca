//! In-process fulfillment work queue.
//!
//! At-least-once delivery with bounded attempts and backoff between them.
//! A job is identified by `<jobType>:<transactionId>`; while a job with that
//! key is waiting, running or sleeping before a retry, enqueueing it again
//! is a no-op.
//!
//! # Flow
//!
//! 1. `enqueue` records the key and hands the job to the worker channel
//! 2. A worker runs the registered `JobHandler`
//! 3. On error with attempts left, the job is re-sent after the backoff delay
//! 4. On the last failed attempt, `on_final_failure` runs once
//! 5. The key is released when the job finishes either way

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex as StdMutex, RwLock as StdRwLock};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{Mutex, Notify, mpsc};
use tokio::task::JoinHandle;

use crate::error::AppError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum JobType {
    VendorFulfillment,
}

impl JobType {
    pub fn as_str(self) -> &'static str {
        match self {
            JobType::VendorFulfillment => "vendor-fulfillment",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Backoff {
    Fixed(Duration),
    /// `base * 2^(attempt - 1)`
    Exponential(Duration),
}

impl Backoff {
    /// Delay before the next attempt, after `failed_attempts` failures.
    pub fn delay(&self, failed_attempts: u32) -> Duration {
        match *self {
            Backoff::Fixed(delay) => delay,
            Backoff::Exponential(base) => {
                let exponent = failed_attempts.saturating_sub(1).min(16);
                base.saturating_mul(1u32 << exponent)
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct JobOptions {
    pub max_attempts: u32,
    pub backoff: Backoff,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Job {
    pub job_type: JobType,
    pub transaction_id: String,
    /// 1-based attempt number
    pub attempt: u32,
    pub options: JobOptions,
}

impl Job {
    pub fn idempotency_key(&self) -> String {
        idempotency_key(self.job_type, &self.transaction_id)
    }

    pub fn is_last_attempt(&self) -> bool {
        self.attempt >= self.options.max_attempts
    }
}

fn idempotency_key(job_type: JobType, transaction_id: &str) -> String {
    format!("{}:{}", job_type.as_str(), transaction_id)
}

#[async_trait]
pub trait JobHandler: Send + Sync {
    /// An `Err` schedules another attempt while attempts remain.
    async fn handle(&self, job: &Job) -> Result<(), AppError>;

    /// Runs once when the last attempt failed.
    async fn on_final_failure(&self, job: &Job, error: &AppError);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnqueueOutcome {
    Queued,
    Duplicate,
}

struct QueueInner {
    sender: mpsc::UnboundedSender<Job>,
    receiver: Mutex<mpsc::UnboundedReceiver<Job>>,
    pending: StdMutex<HashSet<String>>,
    handlers: StdRwLock<HashMap<JobType, Arc<dyn JobHandler>>>,
    idle: Notify,
}

#[derive(Clone)]
pub struct FulfillmentQueue {
    inner: Arc<QueueInner>,
}

impl Default for FulfillmentQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl FulfillmentQueue {
    pub fn new() -> Self {
        let (sender, receiver) = mpsc::unbounded_channel();
        Self {
            inner: Arc::new(QueueInner {
                sender,
                receiver: Mutex::new(receiver),
                pending: StdMutex::new(HashSet::new()),
                handlers: StdRwLock::new(HashMap::new()),
                idle: Notify::new(),
            }),
        }
    }

    pub fn register_handler(&self, job_type: JobType, handler: Arc<dyn JobHandler>) {
        match self.inner.handlers.write() {
            Ok(mut handlers) => {
                handlers.insert(job_type, handler);
            }
            Err(poisoned) => {
                poisoned.into_inner().insert(job_type, handler);
            }
        }
    }

    /// Queue a job unless one with the same key is already in flight.
    pub fn enqueue(
        &self,
        job_type: JobType,
        transaction_id: &str,
        options: JobOptions,
    ) -> Result<EnqueueOutcome, AppError> {
        let key = idempotency_key(job_type, transaction_id);
        if !self.pending_mut(|pending| pending.insert(key.clone())) {
            tracing::info!("Job {} already queued, skipping", key);
            return Ok(EnqueueOutcome::Duplicate);
        }

        let job = Job {
            job_type,
            transaction_id: transaction_id.to_string(),
            attempt: 1,
            options,
        };
        if self.inner.sender.send(job).is_err() {
            self.finish(&key);
            return Err(AppError::Queue(format!("queue closed, could not enqueue {key}")));
        }

        tracing::info!("Job {} queued", key);
        Ok(EnqueueOutcome::Queued)
    }

    pub fn is_pending(&self, job_type: JobType, transaction_id: &str) -> bool {
        let key = idempotency_key(job_type, transaction_id);
        self.pending_mut(|pending| pending.contains(&key))
    }

    pub fn pending_count(&self) -> usize {
        self.pending_mut(|pending| pending.len())
    }

    /// Spawn `workers` tasks pulling from the queue.
    pub fn start(&self, workers: usize) -> Vec<JoinHandle<()>> {
        (0..workers.max(1))
            .map(|worker_id| {
                let queue = self.clone();
                tokio::spawn(async move { queue.run_worker(worker_id).await })
            })
            .collect()
    }

    /// Wait until no job is waiting, running or scheduled for retry.
    pub async fn wait_idle(&self) {
        loop {
            let notified = self.inner.idle.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            if self.pending_count() == 0 {
                return;
            }
            notified.await;
        }
    }

    async fn run_worker(&self, worker_id: usize) {
        tracing::debug!("Fulfillment worker {} started", worker_id);
        loop {
            let next = {
                let mut receiver = self.inner.receiver.lock().await;
                receiver.recv().await
            };
            let Some(job) = next else {
                tracing::debug!("Fulfillment worker {} stopping", worker_id);
                return;
            };
            self.process(job).await;
        }
    }

    async fn process(&self, job: Job) {
        let key = job.idempotency_key();
        let handler = match self.inner.handlers.read() {
            Ok(handlers) => handlers.get(&job.job_type).cloned(),
            Err(poisoned) => poisoned.into_inner().get(&job.job_type).cloned(),
        };
        let Some(handler) = handler else {
            tracing::error!("No handler registered for job type {}", job.job_type.as_str());
            self.finish(&key);
            return;
        };

        match handler.handle(&job).await {
            Ok(()) => {
                tracing::debug!("Job {} completed on attempt {}", key, job.attempt);
                self.finish(&key);
            }
            Err(e) if !job.is_last_attempt() => {
                let delay = job.options.backoff.delay(job.attempt);
                tracing::warn!(
                    "Job {} failed on attempt {}/{}: {}. Retrying in {:?}",
                    key,
                    job.attempt,
                    job.options.max_attempts,
                    e,
                    delay
                );
                let queue = self.clone();
                let retry = Job {
                    attempt: job.attempt + 1,
                    ..job
                };
                tokio::spawn(async move {
                    tokio::time::sleep(delay).await;
                    if queue.inner.sender.send(retry).is_err() {
                        tracing::error!("Queue closed, dropping retry of {}", key);
                        queue.finish(&key);
                    }
                });
            }
            Err(e) => {
                tracing::error!(
                    "Job {} failed after {} attempts: {}",
                    key,
                    job.attempt,
                    e
                );
                handler.on_final_failure(&job, &e).await;
                self.finish(&key);
            }
        }
    }

    fn finish(&self, key: &str) {
        let now_idle = self.pending_mut(|pending| {
            pending.remove(key);
            pending.is_empty()
        });
        if now_idle {
            self.inner.idle.notify_waiters();
        }
    }

    fn pending_mut<T>(&self, f: impl FnOnce(&mut HashSet<String>) -> T) -> T {
        match self.inner.pending.lock() {
            Ok(mut pending) => f(&mut pending),
            Err(poisoned) => f(&mut poisoned.into_inner()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    const FAST: JobOptions = JobOptions {
        max_attempts: 3,
        backoff: Backoff::Exponential(Duration::from_millis(5)),
    };

    struct FlakyHandler {
        calls: AtomicU32,
        succeed_on: u32,
        final_failures: AtomicU32,
    }

    impl FlakyHandler {
        fn new(succeed_on: u32) -> Arc<Self> {
            Arc::new(Self {
                calls: AtomicU32::new(0),
                succeed_on,
                final_failures: AtomicU32::new(0),
            })
        }
    }

    #[async_trait]
    impl JobHandler for FlakyHandler {
        async fn handle(&self, job: &Job) -> Result<(), AppError> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
            assert_eq!(call, job.attempt);
            if call >= self.succeed_on {
                Ok(())
            } else {
                Err(AppError::Internal(format!("attempt {call} failed")))
            }
        }

        async fn on_final_failure(&self, _job: &Job, _error: &AppError) {
            self.final_failures.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[test]
    fn test_exponential_backoff_doubles() {
        let backoff = Backoff::Exponential(Duration::from_secs(5));
        assert_eq!(backoff.delay(1), Duration::from_secs(5));
        assert_eq!(backoff.delay(2), Duration::from_secs(10));
        assert_eq!(backoff.delay(3), Duration::from_secs(20));
        assert_eq!(Backoff::Fixed(Duration::from_secs(1)).delay(4), Duration::from_secs(1));
    }

    #[tokio::test]
    async fn test_retries_until_success() {
        let queue = FulfillmentQueue::new();
        let handler = FlakyHandler::new(3);
        queue.register_handler(JobType::VendorFulfillment, handler.clone());
        queue.start(2);

        queue.enqueue(JobType::VendorFulfillment, "t1", FAST).unwrap();
        queue.wait_idle().await;

        assert_eq!(handler.calls.load(Ordering::SeqCst), 3);
        assert_eq!(handler.final_failures.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_final_failure_hook_runs_once_after_max_attempts() {
        let queue = FulfillmentQueue::new();
        let handler = FlakyHandler::new(u32::MAX);
        queue.register_handler(JobType::VendorFulfillment, handler.clone());
        queue.start(2);

        queue.enqueue(JobType::VendorFulfillment, "t1", FAST).unwrap();
        queue.wait_idle().await;

        assert_eq!(handler.calls.load(Ordering::SeqCst), 3);
        assert_eq!(handler.final_failures.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_duplicate_enqueue_is_ignored_while_pending() {
        let queue = FulfillmentQueue::new();
        let handler = FlakyHandler::new(1);
        queue.register_handler(JobType::VendorFulfillment, handler.clone());

        assert_eq!(
            queue.enqueue(JobType::VendorFulfillment, "t1", FAST).unwrap(),
            EnqueueOutcome::Queued
        );
        assert_eq!(
            queue.enqueue(JobType::VendorFulfillment, "t1", FAST).unwrap(),
            EnqueueOutcome::Duplicate
        );
        assert!(queue.is_pending(JobType::VendorFulfillment, "t1"));

        queue.start(1);
        queue.wait_idle().await;
        assert_eq!(handler.calls.load(Ordering::SeqCst), 1);

        assert_eq!(
            queue.enqueue(JobType::VendorFulfillment, "t1", FAST).unwrap(),
            EnqueueOutcome::Queued
        );
    }
}
