//! # Triggers
//!
//! A trigger decides when a polling endpoint fires next. Returning `None`
//! stops the endpoint.

use courier_bus::MessagingDefaults;
use std::time::{Duration, Instant};

pub trait Trigger: Send + Sync {
    /// Delay until the next fire. `last_fire` is when the previous poll
    /// started, `None` before the first one.
    fn next_fire_delay(&self, last_fire: Option<Instant>) -> Option<Duration>;
}

impl<F> Trigger for F
where
    F: Fn(Option<Instant>) -> Option<Duration> + Send + Sync,
{
    fn next_fire_delay(&self, last_fire: Option<Instant>) -> Option<Duration> {
        self(last_fire)
    }
}

/// Fires on a fixed period.
///
/// - fixed delay: `period` after the previous poll completes
/// - fixed rate: `period` after the previous poll started, immediately if overdue
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PeriodicTrigger {
    period: Duration,
    initial_delay: Duration,
    fixed_rate: bool,
}

impl PeriodicTrigger {
    #[must_use]
    pub fn fixed_delay(period: Duration) -> Self {
        Self {
            period,
            initial_delay: Duration::ZERO,
            fixed_rate: false,
        }
    }

    #[must_use]
    pub fn fixed_rate(period: Duration) -> Self {
        Self {
            period,
            initial_delay: Duration::ZERO,
            fixed_rate: true,
        }
    }

    /// Fixed delay of `poll_period`.
    #[must_use]
    pub fn from_defaults(defaults: &MessagingDefaults) -> Self {
        Self::fixed_delay(defaults.poll_period)
    }

    #[must_use]
    pub fn with_initial_delay(mut self, delay: Duration) -> Self {
        self.initial_delay = delay;
        self
    }

    #[must_use]
    pub fn period(&self) -> Duration {
        self.period
    }

    #[must_use]
    pub fn is_fixed_rate(&self) -> bool {
        self.fixed_rate
    }
}

impl Trigger for PeriodicTrigger {
    fn next_fire_delay(&self, last_fire: Option<Instant>) -> Option<Duration> {
        let Some(last) = last_fire else {
            return Some(self.initial_delay);
        };
        if self.fixed_rate {
            Some((last + self.period).saturating_duration_since(Instant::now()))
        } else {
            Some(self.period)
        }
    }
}
