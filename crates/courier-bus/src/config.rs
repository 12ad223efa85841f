//! # Configuration
//!
//! Plain configuration structs with defaults, plus process-wide defaults
//! loaded from the environment.

use crate::dispatcher::LoadBalancing;
use crate::error::ConfigError;
use crate::pool::{RejectionPolicy, WorkerPoolConfig};
use std::env;
use std::time::Duration;

/// Options for queue and priority channels.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueConfig {
    /// Maximum buffered envelopes; `None` is unbounded.
    pub capacity: Option<usize>,
    /// Store group; defaults to the channel name.
    pub group: Option<String>,
    pub track_history: bool,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            capacity: Some(crate::DEFAULT_QUEUE_CAPACITY),
            group: None,
            track_history: false,
        }
    }
}

impl QueueConfig {
    pub fn validate(&self, channel: &str) -> Result<(), ConfigError> {
        if channel.is_empty() {
            return Err(ConfigError::EmptyName);
        }
        if self.capacity == Some(0) {
            return Err(ConfigError::InvalidCapacity {
                channel: channel.to_string(),
            });
        }
        if self.group.as_deref() == Some("") {
            return Err(ConfigError::InvalidValue {
                key: "group".to_string(),
                value: String::new(),
            });
        }
        Ok(())
    }
}

/// Point-to-point dispatch options.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DispatcherConfig {
    pub load_balancing: LoadBalancing,
    /// Try the next subscriber when one fails.
    pub failover: bool,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            load_balancing: LoadBalancing::RoundRobin,
            failover: true,
        }
    }
}

/// Options for publish-subscribe channels.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PublishSubscribeConfig {
    /// `send` fails with `NoSubscriber` below this count.
    pub min_subscribers: usize,
    /// Report subscriber failures to the error handler instead of returning them.
    pub ignore_failures: bool,
    /// Stamp `sequenceNumber`/`sequenceSize` on each delivered copy.
    pub apply_sequence: bool,
    pub track_history: bool,
}

impl Default for PublishSubscribeConfig {
    fn default() -> Self {
        Self {
            min_subscribers: 0,
            ignore_failures: true,
            apply_sequence: false,
            track_history: false,
        }
    }
}

/// Process-wide defaults.
///
/// # Environment Variables
///
/// - `COURIER_QUEUE_CAPACITY`: default queue capacity, `0` for unbounded (default: 1000)
/// - `COURIER_POLL_MAX_MESSAGES`: messages per poll (default: 1)
/// - `COURIER_POLL_PERIOD_MS`: poll period in milliseconds (default: 1000)
/// - `COURIER_WORKERS`: worker tasks per pool (default: 4)
/// - `COURIER_WORKER_QUEUE`: pool queue capacity (default: 256)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessagingDefaults {
    pub queue_capacity: Option<usize>,
    pub poll_max_messages: usize,
    pub poll_period: Duration,
    pub workers: usize,
    pub worker_queue: usize,
}

impl Default for MessagingDefaults {
    fn default() -> Self {
        Self {
            queue_capacity: Some(crate::DEFAULT_QUEUE_CAPACITY),
            poll_max_messages: 1,
            poll_period: Duration::from_millis(1000),
            workers: 4,
            worker_queue: 256,
        }
    }
}

impl MessagingDefaults {
    /// Loads defaults, applying any environment overrides.
    ///
    /// # Errors
    /// `InvalidValue` when a variable is set but does not parse.
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut defaults = Self::default();

        if let Some(capacity) = parse_var::<usize>("COURIER_QUEUE_CAPACITY")? {
            defaults.queue_capacity = (capacity > 0).then_some(capacity);
        }
        if let Some(max) = parse_var("COURIER_POLL_MAX_MESSAGES")? {
            defaults.poll_max_messages = max;
        }
        if let Some(ms) = parse_var("COURIER_POLL_PERIOD_MS")? {
            defaults.poll_period = Duration::from_millis(ms);
        }
        if let Some(workers) = parse_var("COURIER_WORKERS")? {
            defaults.workers = workers;
        }
        if let Some(queue) = parse_var("COURIER_WORKER_QUEUE")? {
            defaults.worker_queue = queue;
        }

        defaults.validate()?;
        Ok(defaults)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let invalid = |key: &str, value: usize| ConfigError::InvalidValue {
            key: key.to_string(),
            value: value.to_string(),
        };
        if self.poll_max_messages == 0 {
            return Err(invalid("COURIER_POLL_MAX_MESSAGES", 0));
        }
        if self.workers == 0 {
            return Err(invalid("COURIER_WORKERS", 0));
        }
        if self.worker_queue == 0 {
            return Err(invalid("COURIER_WORKER_QUEUE", 0));
        }
        Ok(())
    }

    #[must_use]
    pub fn queue_config(&self) -> QueueConfig {
        QueueConfig {
            capacity: self.queue_capacity,
            ..QueueConfig::default()
        }
    }

    #[must_use]
    pub fn worker_pool_config(&self, name: &str, rejection: RejectionPolicy) -> WorkerPoolConfig {
        WorkerPoolConfig {
            name: name.to_string(),
            workers: self.workers,
            queue_capacity: self.worker_queue,
            rejection,
        }
    }
}

fn parse_var<T: std::str::FromStr>(key: &str) -> Result<Option<T>, ConfigError> {
    match env::var(key) {
        Ok(raw) => raw
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| ConfigError::InvalidValue {
                key: key.to_string(),
                value: raw,
            }),
        Err(_) => Ok(None),
    }
}
