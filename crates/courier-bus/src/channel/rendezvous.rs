//! # Rendezvous Channel
//!
//! Zero-capacity hand-off: a send completes only when a receiver takes the
//! envelope directly.
//!
//! ```text
//! sender ──→ [waiting senders] ──→ receiver
//!              slot per sender      takes under the state lock
//! ```
//!
//! An envelope stays in its sender's slot until a receiver removes it under
//! the state lock. A receiver that gives up (timeout, `select!`, abort)
//! never held anything, and a sender that gives up withdraws its slot under
//! the same lock, so a hand-off either happened completely or not at all.

use super::{
    deadline_for, is_non_blocking, wait_until, ChannelKind, ChannelMetrics, ChannelStats, MessageChannel,
    PollableChannel,
};
use crate::error::ChannelError;
use async_trait::async_trait;
use courier_types::Envelope;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;
use tracing::debug;

#[derive(Debug)]
struct PendingSend {
    slot: Mutex<Option<Envelope>>,
    taken: Notify,
}

#[derive(Debug, Default)]
struct RendezvousState {
    /// Receivers blocked in `receive`.
    receivers: usize,
    senders: VecDeque<Arc<PendingSend>>,
}

#[derive(Debug)]
pub struct RendezvousChannel {
    name: String,
    state: Mutex<RendezvousState>,
    arrivals: Notify,
    metrics: ChannelMetrics,
}

/// Withdraws a waiting sender when its send gives up or is dropped.
struct PendingGuard<'a> {
    channel: &'a RendezvousChannel,
    pending: Arc<PendingSend>,
    armed: bool,
}

impl PendingGuard<'_> {
    /// Returns true if the envelope was still waiting and is now withdrawn.
    fn withdraw(&mut self) -> bool {
        self.armed = false;
        let mut state = self.channel.state.lock();
        let reclaimed = self.pending.slot.lock().take().is_some();
        if reclaimed {
            state.senders.retain(|p| !Arc::ptr_eq(p, &self.pending));
        }
        reclaimed
    }
}

impl Drop for PendingGuard<'_> {
    fn drop(&mut self) {
        if self.armed {
            self.withdraw();
        }
    }
}

/// Counts a blocked receiver for as long as its `receive` future lives.
struct WaitingReceiver<'a> {
    channel: &'a RendezvousChannel,
}

impl<'a> WaitingReceiver<'a> {
    fn register(channel: &'a RendezvousChannel) -> Self {
        channel.state.lock().receivers += 1;
        Self { channel }
    }
}

impl Drop for WaitingReceiver<'_> {
    fn drop(&mut self) {
        let mut state = self.channel.state.lock();
        state.receivers = state.receivers.saturating_sub(1);
        if state.senders.is_empty() {
            return;
        }
        // The wake-up this receiver consumed may have been meant for a sender
        // still waiting; pass it on.
        self.channel.arrivals.notify_one();
        if state.receivers == 0 {
            // Non-blocking senders re-check whether anyone is left to take.
            for pending in &state.senders {
                pending.taken.notify_one();
            }
        }
    }
}

impl RendezvousChannel {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            state: Mutex::new(RendezvousState::default()),
            arrivals: Notify::new(),
            metrics: ChannelMetrics::default(),
        }
    }

    /// Senders currently blocked waiting for a receiver.
    #[must_use]
    pub fn waiting_senders(&self) -> usize {
        self.state.lock().senders.len()
    }

    /// Receivers currently blocked waiting for a sender.
    #[must_use]
    pub fn waiting_receivers(&self) -> usize {
        self.state.lock().receivers
    }

    /// Takes the envelope of the oldest waiting sender.
    fn take_waiting(&self) -> Option<Envelope> {
        let mut state = self.state.lock();
        while let Some(pending) = state.senders.pop_front() {
            let envelope = pending.slot.lock().take();
            if let Some(envelope) = envelope {
                pending.taken.notify_one();
                self.metrics.record_receive();
                return Some(envelope);
            }
        }
        None
    }

    async fn send_inner(&self, envelope: Envelope, timeout: Option<Duration>) -> Result<(), ChannelError> {
        let non_blocking = is_non_blocking(timeout);
        let pending = {
            let mut state = self.state.lock();
            if non_blocking && state.receivers == 0 {
                return Err(ChannelError::NoSubscriber {
                    channel: self.name.clone(),
                });
            }
            let pending = Arc::new(PendingSend {
                slot: Mutex::new(Some(envelope)),
                taken: Notify::new(),
            });
            state.senders.push_back(Arc::clone(&pending));
            pending
        };
        self.arrivals.notify_one();

        let mut guard = PendingGuard {
            channel: self,
            pending: Arc::clone(&pending),
            armed: true,
        };
        // A non-blocking send waits only while some receiver is waiting.
        let deadline = if non_blocking { None } else { deadline_for(timeout) };

        loop {
            let taken = pending.taken.notified();
            tokio::pin!(taken);
            taken.as_mut().enable();

            let receivers = {
                let state = self.state.lock();
                if pending.slot.lock().is_none() {
                    guard.armed = false;
                    return Ok(());
                }
                state.receivers
            };
            if non_blocking && receivers == 0 {
                if guard.withdraw() {
                    return Err(ChannelError::NoSubscriber {
                        channel: self.name.clone(),
                    });
                }
                return Ok(());
            }

            if !wait_until(taken.as_mut(), deadline).await {
                if !guard.withdraw() {
                    return Ok(());
                }
                debug!(channel = %self.name, "Rendezvous send timed out, nothing handed off");
                return Err(ChannelError::Timeout {
                    channel: self.name.clone(),
                    timeout: timeout.unwrap_or_default(),
                });
            }
        }
    }
}

#[async_trait]
impl MessageChannel for RendezvousChannel {
    fn name(&self) -> &str {
        &self.name
    }

    fn kind(&self) -> ChannelKind {
        ChannelKind::Rendezvous
    }

    /// Blocks until a receiver takes the envelope. A non-blocking send with
    /// no waiting receiver fails with `NoSubscriber`.
    async fn send(&self, envelope: Envelope, timeout: Option<Duration>) -> Result<(), ChannelError> {
        let result = self.send_inner(envelope, timeout).await;
        self.metrics.record_send(&result);
        result
    }

    fn stats(&self) -> ChannelStats {
        self.metrics.snapshot()
    }
}

#[async_trait]
impl PollableChannel for RendezvousChannel {
    /// Cancel safe: dropping the future before it returns leaves any waiting
    /// sender's envelope in place.
    async fn receive(&self, timeout: Option<Duration>) -> Result<Option<Envelope>, ChannelError> {
        if is_non_blocking(timeout) {
            return Ok(self.take_waiting());
        }

        let deadline = deadline_for(timeout);
        let _waiting = WaitingReceiver::register(self);
        loop {
            let arrived = self.arrivals.notified();
            tokio::pin!(arrived);
            arrived.as_mut().enable();

            if let Some(envelope) = self.take_waiting() {
                return Ok(Some(envelope));
            }
            if !wait_until(arrived.as_mut(), deadline).await {
                return match self.take_waiting() {
                    Some(envelope) => Ok(Some(envelope)),
                    None => Err(ChannelError::Timeout {
                        channel: self.name.clone(),
                        timeout: timeout.unwrap_or_default(),
                    }),
                };
            }
        }
    }
}
