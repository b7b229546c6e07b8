//! Process-wide named channel registry.
//!
//! Gateways register themselves here when they start and deregister when they
//! stop. Consumers (the router in particular) resolve names at request time,
//! never caching the result, so a channel can be swapped or taken down and
//! the very next request observes it.

use crate::channel::RequestChannel;
use dashmap::DashMap;
use std::sync::Arc;
use tracing::info;

/// Registry mapping well-known names to live request channels.
#[derive(Default)]
pub struct ChannelRegistry {
    entries: DashMap<String, Arc<dyn RequestChannel>>,
}

impl ChannelRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Binds a channel under a name, replacing any previous binding.
    pub fn register(&self, name: impl Into<String>, channel: Arc<dyn RequestChannel>) {
        let name = name.into();
        info!(channel = %name, "registered channel");
        self.entries.insert(name, channel);
    }

    /// Resolves a name to its channel, if currently bound.
    pub fn lookup(&self, name: &str) -> Option<Arc<dyn RequestChannel>> {
        self.entries.get(name).map(|entry| Arc::clone(&entry))
    }

    /// Removes a binding. Returns false when the name was not bound.
    pub fn unregister(&self, name: &str) -> bool {
        let removed = self.entries.remove(name).is_some();
        if removed {
            info!(channel = %name, "unregistered channel");
        }
        removed
    }

    pub fn is_registered(&self, name: &str) -> bool {
        self.entries.contains_key(name)
    }

    /// Currently bound names, sorted for stable output.
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.entries.iter().map(|e| e.key().clone()).collect();
        names.sort();
        names
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
