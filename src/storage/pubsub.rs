// src/storage/pubsub.rs
//! In-process publish/subscribe
//!
//! Topics are namespaced by provider (`<provider>/<topic>`). A message
//! published through a `Subscription` is not delivered back to that same
//! subscription.

use dashmap::DashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::trace;

/// Callback invoked with each message on a topic
pub type Listener = Arc<dyn Fn(&str) + Send + Sync>;

struct Inner {
    next_id: AtomicU64,
    topics: DashMap<String, Vec<(u64, Listener)>>,
}

impl Inner {
    fn deliver(&self, topic: &str, message: &str, skip: Option<u64>) -> usize {
        // Listeners run outside the shard lock so they may (un)subscribe
        let listeners: Vec<Listener> = match self.topics.get(topic) {
            Some(entry) => entry
                .iter()
                .filter(|(id, _)| Some(*id) != skip)
                .map(|(_, listener)| listener.clone())
                .collect(),
            None => return 0,
        };
        for listener in &listeners {
            listener(message);
        }
        trace!(topic, delivered = listeners.len(), "published");
        listeners.len()
    }
}

#[derive(Clone)]
pub struct LocalPubsub {
    provider: Arc<str>,
    inner: Arc<Inner>,
}

impl LocalPubsub {
    pub fn new(provider: impl Into<String>) -> Self {
        Self {
            provider: Arc::from(provider.into()),
            inner: Arc::new(Inner {
                next_id: AtomicU64::new(1),
                topics: DashMap::new(),
            }),
        }
    }

    /// Same bus, different provider namespace
    pub fn scoped(&self, provider: impl Into<String>) -> Self {
        Self {
            provider: Arc::from(provider.into()),
            inner: self.inner.clone(),
        }
    }

    pub fn provider(&self) -> &str {
        &self.provider
    }

    fn namespaced(&self, topic: &str) -> String {
        format!("{}/{}", self.provider, topic)
    }

    /// Deliver `message` to every subscriber of `topic`; returns how many
    /// listeners received it
    pub fn publish(&self, topic: &str, message: &str) -> usize {
        self.inner.deliver(&self.namespaced(topic), message, None)
    }

    pub fn subscribe<F>(&self, topic: &str, listener: F) -> Subscription
    where
        F: Fn(&str) + Send + Sync + 'static,
    {
        let topic = self.namespaced(topic);
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        self.inner
            .topics
            .entry(topic.clone())
            .or_default()
            .push((id, Arc::new(listener)));
        Subscription {
            inner: self.inner.clone(),
            topic,
            id,
        }
    }

    pub fn subscriber_count(&self, topic: &str) -> usize {
        self.inner
            .topics
            .get(&self.namespaced(topic))
            .map_or(0, |entry| entry.len())
    }
}

/// Handle to one listener on one topic
pub struct Subscription {
    inner: Arc<Inner>,
    topic: String,
    id: u64,
}

impl Subscription {
    pub fn topic(&self) -> &str {
        &self.topic
    }

    /// Publish to this subscription's topic, skipping this subscription
    pub fn publish(&self, message: &str) -> usize {
        self.inner.deliver(&self.topic, message, Some(self.id))
    }

    pub fn disconnect(self) {
        let empty = match self.inner.topics.get_mut(&self.topic) {
            Some(mut entry) => {
                entry.retain(|(id, _)| *id != self.id);
                entry.is_empty()
            }
            None => false,
        };
        if empty {
            self.inner.topics.remove_if(&self.topic, |_, listeners| listeners.is_empty());
        }
    }
}
