//! A small bounded, multi-subscriber event bus.
//!
//! Used by the policy loader's watcher to announce reloads (spec §4.4) and
//! by the decision cache to announce invalidations, without either producer
//! having to know who is listening. Backed by [`tokio::sync::broadcast`],
//! whose lagging-receiver semantics are exactly the "slow consumers drop
//! oldest" behavior the policy reload pipeline asks for: a subscriber that
//! falls behind the bus's capacity observes a `Lagged` error on its next
//! `recv` and resumes from the oldest event still buffered, rather than the
//! bus blocking the publisher or growing without bound.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::broadcast;

/// Emitted by the loader/watcher after every reload attempt, successful or
/// not (spec §4.4).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ReloadEvent {
    pub timestamp: DateTime<Utc>,
    pub affected_policy_ids: Vec<String>,
    pub error: Option<String>,
}

impl ReloadEvent {
    pub fn success(timestamp: DateTime<Utc>, affected_policy_ids: Vec<String>) -> Self {
        Self {
            timestamp,
            affected_policy_ids,
            error: None,
        }
    }

    pub fn failure(timestamp: DateTime<Utc>, error: impl Into<String>) -> Self {
        Self {
            timestamp,
            affected_policy_ids: Vec::new(),
            error: Some(error.into()),
        }
    }

    pub fn is_failure(&self) -> bool {
        self.error.is_some()
    }
}

/// Emitted by the decision cache when an entry (or the whole cache) is
/// invalidated, e.g. as a side effect of a reload.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub enum CacheEvent {
    Invalidated { fingerprint: String },
    Cleared,
}

#[derive(Debug, Error)]
pub enum RecvError {
    #[error("subscriber lagged behind the bus and skipped {0} events")]
    Lagged(u64),
    #[error("event bus closed: no publisher remains")]
    Closed,
}

impl From<broadcast::error::RecvError> for RecvError {
    fn from(e: broadcast::error::RecvError) -> Self {
        match e {
            broadcast::error::RecvError::Lagged(n) => RecvError::Lagged(n),
            broadcast::error::RecvError::Closed => RecvError::Closed,
        }
    }
}

/// A bounded pub/sub bus. Publishing never blocks; once the bounded buffer
/// is full, the oldest still-buffered event is dropped to make room.
pub struct EventBus<T: Clone> {
    sender: broadcast::Sender<T>,
}

impl<T: Clone> EventBus<T> {
    pub fn new(capacity: usize) -> Self {
        let (sender, _receiver) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    /// Publishes an event to all current subscribers. Returns the number of
    /// subscribers the event was delivered to; `0` if there are none, which
    /// is not an error (nobody is listening right now, and that's fine).
    pub fn publish(&self, event: T) -> usize {
        self.sender.send(event).unwrap_or(0)
    }

    pub fn subscribe(&self) -> EventReceiver<T> {
        EventReceiver {
            inner: self.sender.subscribe(),
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

pub struct EventReceiver<T: Clone> {
    inner: broadcast::Receiver<T>,
}

impl<T: Clone> EventReceiver<T> {
    pub async fn recv(&mut self) -> Result<T, RecvError> {
        self.inner.recv().await.map_err(RecvError::from)
    }
}

pub type ReloadBus = EventBus<ReloadEvent>;
pub type CacheBus = EventBus<CacheEvent>;
