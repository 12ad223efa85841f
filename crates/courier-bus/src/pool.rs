//! # Worker Pool
//!
//! A fixed set of Tokio worker tasks draining a bounded job queue. Used by
//! executor channels and asynchronous publish-subscribe channels.
//!
//! ```text
//! submit(job) ──→ [bounded mpsc queue] ──→ worker-0 ┐
//!      │                                 ──→ worker-1 ├─→ job.await
//!      │ queue full?                     ──→ worker-N ┘
//!      ▼
//! RejectionPolicy: Block(timeout) | Abort | CallerRuns
//! ```
//!
//! Jobs run in submission order per worker pick-up; each job runs in its own
//! task so a panicking job never takes a worker down.

use crate::config::MessagingDefaults;
use crate::error::{ChannelError, ConfigError};
use futures::future::BoxFuture;
use parking_lot::{Mutex, RwLock};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Unit of work accepted by the pool.
pub type Job = BoxFuture<'static, ()>;

/// What `submit` does when the queue is full.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RejectionPolicy {
    /// Wait for space, up to `timeout` (`None` waits indefinitely).
    Block { timeout: Option<Duration> },
    /// Fail immediately with `CapacityExceeded`.
    Abort,
    /// Run the job in the submitting task.
    CallerRuns,
}

impl Default for RejectionPolicy {
    fn default() -> Self {
        Self::Block {
            timeout: Some(Duration::from_secs(5)),
        }
    }
}

/// Worker pool configuration.
#[derive(Debug, Clone)]
pub struct WorkerPoolConfig {
    pub name: String,
    /// Number of worker tasks.
    pub workers: usize,
    /// Jobs that may wait in the queue.
    pub queue_capacity: usize,
    pub rejection: RejectionPolicy,
}

impl Default for WorkerPoolConfig {
    fn default() -> Self {
        Self {
            name: "courier-pool".to_string(),
            workers: 4,
            queue_capacity: 256,
            rejection: RejectionPolicy::default(),
        }
    }
}

impl WorkerPoolConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.name.is_empty() {
            return Err(ConfigError::EmptyName);
        }
        if self.workers == 0 {
            return Err(ConfigError::InvalidPool {
                pool: self.name.clone(),
                detail: "at least one worker is required".to_string(),
            });
        }
        if self.queue_capacity == 0 {
            return Err(ConfigError::InvalidPool {
                pool: self.name.clone(),
                detail: "queue capacity must be greater than zero".to_string(),
            });
        }
        Ok(())
    }
}

/// Bounded pool of Tokio worker tasks.
pub struct WorkerPool {
    config: WorkerPoolConfig,
    sender: RwLock<Option<mpsc::Sender<Job>>>,
    workers: Mutex<Vec<JoinHandle<()>>>,
    submitted: AtomicU64,
    completed: Arc<AtomicU64>,
    active: Arc<AtomicUsize>,
}

impl WorkerPool {
    /// Spawns the workers on the current Tokio runtime.
    ///
    /// # Errors
    /// - `InvalidPool` / `EmptyName` for a bad configuration
    /// - `NoRuntime` when called outside a Tokio runtime
    pub fn start(config: WorkerPoolConfig) -> Result<Arc<Self>, ConfigError> {
        config.validate()?;
        let runtime = tokio::runtime::Handle::try_current().map_err(|_| ConfigError::NoRuntime {
            component: config.name.clone(),
        })?;

        let (sender, receiver) = mpsc::channel::<Job>(config.queue_capacity);
        let receiver = Arc::new(tokio::sync::Mutex::new(receiver));
        let completed = Arc::new(AtomicU64::new(0));
        let active = Arc::new(AtomicUsize::new(0));

        let workers = (0..config.workers)
            .map(|index| {
                let receiver = Arc::clone(&receiver);
                let completed = Arc::clone(&completed);
                let active = Arc::clone(&active);
                let pool = config.name.clone();
                runtime.spawn(async move {
                    loop {
                        let job = { receiver.lock().await.recv().await };
                        let Some(job) = job else {
                            debug!(pool = %pool, worker = index, "Worker exiting");
                            break;
                        };
                        active.fetch_add(1, Ordering::Relaxed);
                        if let Err(e) = tokio::spawn(job).await {
                            error!(pool = %pool, worker = index, error = %e, "Job panicked");
                        }
                        active.fetch_sub(1, Ordering::Relaxed);
                        completed.fetch_add(1, Ordering::Relaxed);
                    }
                })
            })
            .collect();

        info!(
            pool = %config.name,
            workers = config.workers,
            queue_capacity = config.queue_capacity,
            "Worker pool started"
        );

        Ok(Arc::new(Self {
            config,
            sender: RwLock::new(Some(sender)),
            workers: Mutex::new(workers),
            submitted: AtomicU64::new(0),
            completed,
            active,
        }))
    }

    /// Starts a pool sized from process-wide defaults.
    pub fn with_defaults(
        name: &str,
        defaults: &MessagingDefaults,
        rejection: RejectionPolicy,
    ) -> Result<Arc<Self>, ConfigError> {
        Self::start(defaults.worker_pool_config(name, rejection))
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.config.name
    }

    #[must_use]
    pub fn policy(&self) -> RejectionPolicy {
        self.config.rejection
    }

    /// Submits a job under the pool's rejection policy.
    ///
    /// `timeout` overrides the `Block` policy's own timeout when given.
    ///
    /// # Errors
    /// - `CapacityExceeded` when the queue is full under `Abort`, or under
    ///   `Block` with a zero wait
    /// - `Timeout` when a `Block` wait elapses
    /// - `Closed` after `shutdown`
    pub async fn submit(&self, job: Job, timeout: Option<Duration>) -> Result<(), ChannelError> {
        let Some(sender) = self.sender.read().clone() else {
            return Err(self.closed());
        };

        match self.config.rejection {
            RejectionPolicy::Abort => match sender.try_send(job) {
                Ok(()) => {}
                Err(mpsc::error::TrySendError::Full(_)) => return Err(self.rejected()),
                Err(mpsc::error::TrySendError::Closed(_)) => return Err(self.closed()),
            },
            RejectionPolicy::CallerRuns => match sender.try_send(job) {
                Ok(()) => {}
                Err(mpsc::error::TrySendError::Full(job)) => {
                    debug!(pool = %self.config.name, "Queue full, running job in caller");
                    self.submitted.fetch_add(1, Ordering::Relaxed);
                    job.await;
                    self.completed.fetch_add(1, Ordering::Relaxed);
                    return Ok(());
                }
                Err(mpsc::error::TrySendError::Closed(_)) => return Err(self.closed()),
            },
            RejectionPolicy::Block { timeout: default } => match timeout.or(default) {
                None => sender.send(job).await.map_err(|_| self.closed())?,
                Some(wait) if wait.is_zero() => match sender.try_send(job) {
                    Ok(()) => {}
                    Err(mpsc::error::TrySendError::Full(_)) => return Err(self.rejected()),
                    Err(mpsc::error::TrySendError::Closed(_)) => return Err(self.closed()),
                },
                Some(wait) => match sender.send_timeout(job, wait).await {
                    Ok(()) => {}
                    Err(mpsc::error::SendTimeoutError::Timeout(_)) => {
                        warn!(pool = %self.config.name, waited = ?wait, "Job submission timed out");
                        return Err(ChannelError::Timeout {
                            channel: self.config.name.clone(),
                            timeout: wait,
                        });
                    }
                    Err(mpsc::error::SendTimeoutError::Closed(_)) => return Err(self.closed()),
                },
            },
        }

        self.submitted.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    /// Stops accepting jobs, lets queued jobs finish, and waits for the workers.
    pub async fn shutdown(&self) {
        let sender = self.sender.write().take();
        drop(sender);

        let workers: Vec<JoinHandle<()>> = std::mem::take(&mut *self.workers.lock());
        for worker in workers {
            if let Err(e) = worker.await {
                warn!(pool = %self.config.name, error = %e, "Worker ended abnormally");
            }
        }
        info!(pool = %self.config.name, "Worker pool shut down");
    }

    #[must_use]
    pub fn is_shutdown(&self) -> bool {
        self.sender.read().is_none()
    }

    /// Jobs accepted so far (including caller-run jobs).
    #[must_use]
    pub fn submitted(&self) -> u64 {
        self.submitted.load(Ordering::Relaxed)
    }

    #[must_use]
    pub fn completed(&self) -> u64 {
        self.completed.load(Ordering::Relaxed)
    }

    /// Jobs currently running on workers.
    #[must_use]
    pub fn active(&self) -> usize {
        self.active.load(Ordering::Relaxed)
    }

    fn rejected(&self) -> ChannelError {
        warn!(pool = %self.config.name, "Job rejected, queue full");
        ChannelError::CapacityExceeded {
            channel: self.config.name.clone(),
            capacity: self.config.queue_capacity,
        }
    }

    fn closed(&self) -> ChannelError {
        ChannelError::Closed {
            channel: self.config.name.clone(),
        }
    }
}

impl std::fmt::Debug for WorkerPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkerPool")
            .field("name", &self.config.name)
            .field("workers", &self.config.workers)
            .field("queue_capacity", &self.config.queue_capacity)
            .field("rejection", &self.config.rejection)
            .finish()
    }
}
