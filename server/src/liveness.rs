//! Liveness sweep over the registry.
//!
//! Every participant gets a `Ping` on its own channel and must answer with
//! `Pong` before the probe timeout. Anyone else is evicted for good.

use crate::registry::{Participant, Registry};
use log::{debug, warn};
use shared::{Message, PlayerId};
use std::time::Duration;

/// Round-trips one probe. Err carries the reason for the log line.
async fn probe(participant: &Participant, wait: Duration) -> Result<(), String> {
    match participant.channel.request(&Message::Ping, wait).await {
        Ok(Some(Message::Pong)) => Ok(()),
        Ok(Some(other)) => Err(format!("unexpected {}", other.kind())),
        Ok(None) => Err("no answer".to_string()),
        Err(e) => Err(e.to_string()),
    }
}

/// Probes every participant and evicts the ones that fail.
///
/// The scan starts over after each eviction, so it runs at most
/// `len + 1` passes. Returns the evicted ids in eviction order.
pub async fn sweep(registry: &Registry, wait: Duration) -> Vec<PlayerId> {
    let mut evicted = Vec::new();

    'restart: loop {
        let participants = registry.snapshot().await;
        debug!("Checking liveness of {} participants", participants.len());

        for participant in &participants {
            if let Err(reason) = probe(participant, wait).await {
                warn!("Participant {} dropped: {}", participant.id, reason);
                registry.evict(participant.id).await;
                evicted.push(participant.id);
                continue 'restart;
            }
        }

        return evicted;
    }
}

/// Sweeps, then reports whether at least `min_players` remain.
pub async fn is_ready(registry: &Registry, min_players: usize, wait: Duration) -> bool {
    sweep(registry, wait).await;
    registry.len().await >= min_players
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::tests::{channel_pair, client_send};
    use shared::{decode, MAX_DATAGRAM};
    use tokio::net::UdpSocket;
    use tokio::task::JoinHandle;

    /// Answers every ping with a pong until the socket is dropped.
    fn responder(socket: UdpSocket) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut buffer = vec![0u8; MAX_DATAGRAM];
            while let Ok(len) = socket.recv(&mut buffer).await {
                if let Ok(Message::Ping) = decode(&buffer[..len]) {
                    client_send(&socket, &Message::Pong).await;
                }
            }
        })
    }

    async fn admit(registry: &Registry) -> (PlayerId, UdpSocket) {
        let (channel, client) = channel_pair().await;
        let id = registry.allocate_id();
        registry.add(Participant::new(id, channel)).await;
        (id, client)
    }

    #[tokio::test]
    async fn test_sweep_evicts_silent_participant() {
        let registry = Registry::new();
        let mut silent = None;
        let mut responders = Vec::new();

        for _ in 0..4 {
            let (id, client) = admit(&registry).await;
            if id == PlayerId(3) {
                silent = Some(client);
            } else {
                responders.push(responder(client));
            }
        }
        let third = registry.get(PlayerId(3)).await.unwrap();

        let evicted = sweep(&registry, Duration::from_millis(200)).await;

        assert_eq!(evicted, vec![PlayerId(3)]);
        assert_eq!(registry.len().await, 3);
        assert_eq!(
            registry.ids().await,
            vec![PlayerId(1), PlayerId(2), PlayerId(4)]
        );
        assert!(third.channel.is_closed().await);
        assert!(!is_ready(&registry, 4, Duration::from_millis(200)).await);
        assert!(is_ready(&registry, 3, Duration::from_millis(200)).await);

        drop(silent);
        for handle in responders {
            handle.abort();
        }
    }

    #[tokio::test]
    async fn test_wrong_answer_is_evicted() {
        let registry = Registry::new();
        let (_id, client) = admit(&registry).await;

        let answer = tokio::spawn(async move {
            let mut buffer = vec![0u8; MAX_DATAGRAM];
            let _ = client.recv(&mut buffer).await;
            client_send(&client, &Message::ConnectAck).await;
            client
        });

        let evicted = sweep(&registry, Duration::from_millis(500)).await;
        assert_eq!(evicted, vec![PlayerId(1)]);
        assert!(registry.is_empty().await);
        answer.await.unwrap();
    }

    #[tokio::test]
    async fn test_sweep_keeps_everyone_alive() {
        let registry = Registry::new();
        let mut responders = Vec::new();
        for _ in 0..3 {
            let (_, client) = admit(&registry).await;
            responders.push(responder(client));
        }

        let evicted = sweep(&registry, Duration::from_millis(500)).await;
        assert!(evicted.is_empty());
        assert_eq!(registry.len().await, 3);

        for handle in responders {
            handle.abort();
        }
    }

    #[tokio::test]
    async fn test_sweep_empty_registry() {
        let registry = Registry::new();
        assert!(sweep(&registry, Duration::from_millis(50)).await.is_empty());
        assert!(!is_ready(&registry, 1, Duration::from_millis(50)).await);
    }
}
