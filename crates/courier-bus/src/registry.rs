//! # Channel Registry
//!
//! Explicit name → channel map, passed through wiring code. There is no
//! process-global registry.

use crate::channel::{Channel, PollableChannel, SubscribableChannel};
use crate::error::RegistryError;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;

#[derive(Debug, Default)]
pub struct ChannelRegistry {
    channels: RwLock<HashMap<String, Channel>>,
}

impl ChannelRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a channel under its own name.
    ///
    /// # Errors
    /// `Duplicate` if the name is taken.
    pub fn register(&self, channel: Channel) -> Result<(), RegistryError> {
        let mut channels = self.channels.write();
        let name = channel.name().to_string();
        if channels.contains_key(&name) {
            return Err(RegistryError::Duplicate(name));
        }
        debug!(channel = %name, kind = %channel.kind(), "Channel registered");
        channels.insert(name, channel);
        Ok(())
    }

    pub fn get(&self, name: &str) -> Result<Channel, RegistryError> {
        self.channels
            .read()
            .get(name)
            .cloned()
            .ok_or_else(|| RegistryError::NotFound(name.to_string()))
    }

    /// Looks up a channel consumers can receive from.
    pub fn pollable(&self, name: &str) -> Result<Arc<dyn PollableChannel>, RegistryError> {
        let channel = self.get(name)?;
        channel.as_pollable().ok_or_else(|| RegistryError::WrongKind {
            name: name.to_string(),
            expected: "pollable",
            actual: channel.kind().as_str(),
        })
    }

    /// Looks up a channel consumers can subscribe to.
    pub fn subscribable(&self, name: &str) -> Result<Arc<dyn SubscribableChannel>, RegistryError> {
        let channel = self.get(name)?;
        channel.as_subscribable().ok_or_else(|| RegistryError::WrongKind {
            name: name.to_string(),
            expected: "subscribable",
            actual: channel.kind().as_str(),
        })
    }

    pub fn remove(&self, name: &str) -> Option<Channel> {
        self.channels.write().remove(name)
    }

    /// Registered names, sorted.
    #[must_use]
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.channels.read().keys().cloned().collect();
        names.sort();
        names
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.channels.read().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.channels.read().is_empty()
    }
}
