//! Participant registry shared by the admission task and the session loop
//!
//! This module owns the ordered roster of connected participants:
//! - Monotonic participant id allocation (ids are never reused)
//! - Structural mutation (append on admission, removal on eviction)
//! - Lookup by id and ordered snapshots for turn order and broadcast
//!
//! The roster sits behind a single structural lock. Channel I/O never
//! happens under it except while closing an evicted participant's channel,
//! and then always structural lock first, channel lock second.

use crate::channel::Channel;
use log::info;
use shared::PlayerId;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::Mutex;

/// A connected participant and its dedicated channel
#[derive(Debug)]
pub struct Participant {
    /// Identifier handed out at admission
    pub id: PlayerId,
    /// Dedicated channel, guarded by its own lock
    pub channel: Channel,
    /// When the handshake completed
    pub joined_at: Instant,
}

impl Participant {
    pub fn new(id: PlayerId, channel: Channel) -> Self {
        Self {
            id,
            channel,
            joined_at: Instant::now(),
        }
    }
}

/// Ordered roster of connected participants
///
/// Insertion order is the turn order once a game starts. Removal never
/// reorders the remaining entries.
pub struct Registry {
    /// Structural lock around the roster
    participants: Mutex<Vec<Arc<Participant>>>,
    /// Next id to hand out
    next_id: AtomicU32,
}

impl Registry {
    /// Creates an empty registry. Ids start from 1.
    pub fn new() -> Self {
        Self {
            participants: Mutex::new(Vec::new()),
            next_id: AtomicU32::new(1),
        }
    }

    /// Reserves a fresh participant id
    ///
    /// The id is consumed even if the handshake that follows fails.
    pub fn allocate_id(&self) -> PlayerId {
        PlayerId(self.next_id.fetch_add(1, Ordering::Relaxed))
    }

    /// Appends a participant at the end of the turn order
    pub async fn add(&self, participant: Participant) -> Arc<Participant> {
        let participant = Arc::new(participant);
        let mut participants = self.participants.lock().await;
        info!(
            "Participant {} joined from {}",
            participant.id,
            participant.channel.peer_addr()
        );
        participants.push(Arc::clone(&participant));
        participant
    }

    /// Removes a participant and closes its channel
    ///
    /// Returns the removed entry, or None if the id was not registered.
    pub async fn evict(&self, id: PlayerId) -> Option<Arc<Participant>> {
        let mut participants = self.participants.lock().await;
        let index = participants.iter().position(|p| p.id == id)?;
        let participant = participants.remove(index);
        participant.channel.close().await;
        info!("Participant {} removed", id);
        Some(participant)
    }

    pub async fn get(&self, id: PlayerId) -> Option<Arc<Participant>> {
        self.participants
            .lock()
            .await
            .iter()
            .find(|p| p.id == id)
            .cloned()
    }

    pub async fn contains(&self, id: PlayerId) -> bool {
        self.participants.lock().await.iter().any(|p| p.id == id)
    }

    /// Ordered copy of the roster
    pub async fn snapshot(&self) -> Vec<Arc<Participant>> {
        self.participants.lock().await.clone()
    }

    /// Ordered list of participant ids
    pub async fn ids(&self) -> Vec<PlayerId> {
        self.participants.lock().await.iter().map(|p| p.id).collect()
    }

    /// Returns the number of registered participants
    pub async fn len(&self) -> usize {
        self.participants.lock().await.len()
    }

    /// Returns true if nobody is registered
    pub async fn is_empty(&self) -> bool {
        self.participants.lock().await.is_empty()
    }
}

impl Default for Registry {
    fn default() -> Self {
        Self::new()
    }
}

/// Registry test suite
///
/// Covers id allocation, ordering across removals and channel shutdown on
/// eviction.
#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::tests::channel_pair;

    async fn admit(registry: &Registry) -> PlayerId {
        let (channel, _client) = channel_pair().await;
        let id = registry.allocate_id();
        registry.add(Participant::new(id, channel)).await;
        id
    }

    #[tokio::test]
    async fn test_registry_creation() {
        let registry = Registry::new();
        assert!(registry.is_empty().await);
        assert_eq!(registry.len().await, 0);
    }

    #[tokio::test]
    async fn test_ids_are_monotonic() {
        let registry = Registry::new();
        assert_eq!(registry.allocate_id(), PlayerId(1));
        assert_eq!(registry.allocate_id(), PlayerId(2));
        // A discarded reservation is never handed out again
        let third = admit(&registry).await;
        assert_eq!(third, PlayerId(3));
    }

    #[tokio::test]
    async fn test_insertion_order_survives_eviction() {
        let registry = Registry::new();
        let a = admit(&registry).await;
        let b = admit(&registry).await;
        let c = admit(&registry).await;

        assert_eq!(registry.ids().await, vec![a, b, c]);

        let removed = registry.evict(b).await.unwrap();
        assert!(removed.channel.is_closed().await);
        assert_eq!(registry.ids().await, vec![a, c]);
        assert!(!registry.contains(b).await);
    }

    #[tokio::test]
    async fn test_evict_unknown() {
        let registry = Registry::new();
        admit(&registry).await;
        assert!(registry.evict(PlayerId(99)).await.is_none());
        assert_eq!(registry.len().await, 1);
    }

    #[tokio::test]
    async fn test_get_by_id() {
        let registry = Registry::new();
        let a = admit(&registry).await;
        let found = registry.get(a).await.unwrap();
        assert_eq!(found.id, a);
        assert!(registry.get(PlayerId(42)).await.is_none());
    }
}
