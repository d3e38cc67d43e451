//! Dedicated per-participant channel and the multiplexed wait primitive.
//!
//! A channel wraps one connected UDP socket behind its own mutex. Every send
//! and receive happens under that lock, so a liveness probe, a kick and a
//! turn poll can never interleave on the same participant.

use futures::stream::{FuturesUnordered, StreamExt};
use log::debug;
use shared::{decode, encode, CodecError, Message, PlayerId, MAX_DATAGRAM};
use std::net::SocketAddr;
use std::time::Duration;
use tokio::net::UdpSocket;
use tokio::sync::{Mutex, MutexGuard};
use tokio::time::timeout;

#[derive(Debug, thiserror::Error)]
pub enum ChannelError {
    #[error("channel is closed")]
    Closed,

    #[error("transport error: {0}")]
    Io(#[from] std::io::Error),

    #[error("malformed message: {0}")]
    Codec(#[from] CodecError),
}

impl ChannelError {
    /// Transport-level failures; the peer is unlikely to answer again soon.
    pub fn is_transport(&self) -> bool {
        matches!(self, ChannelError::Closed | ChannelError::Io(_))
    }
}

#[derive(Debug)]
pub struct Channel {
    peer: SocketAddr,
    socket: Mutex<Option<UdpSocket>>,
}

impl Channel {
    /// Wraps a socket already connected to `peer`.
    pub fn new(socket: UdpSocket, peer: SocketAddr) -> Self {
        Self {
            peer,
            socket: Mutex::new(Some(socket)),
        }
    }

    pub fn peer_addr(&self) -> SocketAddr {
        self.peer
    }

    pub async fn lock(&self) -> ChannelGuard<'_> {
        ChannelGuard {
            socket: self.socket.lock().await,
        }
    }

    pub async fn send(&self, message: &Message) -> Result<(), ChannelError> {
        self.lock().await.send(message).await
    }

    /// Receives one message, or `None` once `wait` has elapsed.
    pub async fn recv_timeout(&self, wait: Duration) -> Result<Option<Message>, ChannelError> {
        let guard = self.lock().await;
        let received = timeout(wait, guard.recv()).await;
        match received {
            Ok(result) => result.map(Some),
            Err(_) => Ok(None),
        }
    }

    /// Sends `message` and waits for the reply without releasing the lock
    /// in between.
    pub async fn request(
        &self,
        message: &Message,
        wait: Duration,
    ) -> Result<Option<Message>, ChannelError> {
        let guard = self.lock().await;
        guard.send(message).await?;
        let received = timeout(wait, guard.recv()).await;
        match received {
            Ok(result) => result.map(Some),
            Err(_) => Ok(None),
        }
    }

    /// Discards whatever is already queued, then sends `message`, without
    /// releasing the lock in between. Returns how many datagrams were dropped.
    ///
    /// Replies to an earlier prompt can never be read as answers to this one.
    pub async fn prompt(&self, message: &Message) -> Result<usize, ChannelError> {
        let guard = self.lock().await;
        let dropped = guard.drain();
        guard.send(message).await?;
        Ok(dropped)
    }

    /// Drops the socket. Later operations fail with [`ChannelError::Closed`].
    pub async fn close(&self) {
        if self.socket.lock().await.take().is_some() {
            debug!("Closed channel to {}", self.peer);
        }
    }

    pub async fn is_closed(&self) -> bool {
        self.socket.lock().await.is_none()
    }
}

/// Exclusive access to a channel's socket.
pub struct ChannelGuard<'a> {
    socket: MutexGuard<'a, Option<UdpSocket>>,
}

impl ChannelGuard<'_> {
    pub async fn send(&self, message: &Message) -> Result<(), ChannelError> {
        let socket = self.socket.as_ref().ok_or(ChannelError::Closed)?;
        let data = encode(message)?;
        socket.send(&data).await?;
        Ok(())
    }

    /// Discards every datagram already waiting in the socket buffer.
    pub fn drain(&self) -> usize {
        let socket = match self.socket.as_ref() {
            Some(socket) => socket,
            None => return 0,
        };

        let mut buffer = vec![0u8; MAX_DATAGRAM];
        let mut dropped = 0;
        // Stops on WouldBlock, and on any queued socket error as well
        while socket.try_recv(&mut buffer).is_ok() {
            dropped += 1;
        }
        dropped
    }

    /// Waits for the next datagram. Cancel-safe: dropping the future before
    /// it completes does not consume a datagram.
    pub async fn recv(&self) -> Result<Message, ChannelError> {
        let socket = self.socket.as_ref().ok_or(ChannelError::Closed)?;
        let mut buffer = vec![0u8; MAX_DATAGRAM];
        let len = socket.recv(&mut buffer).await?;
        Ok(decode(&buffer[..len])?)
    }
}

/// Result of one multiplexed wait.
#[derive(Debug)]
pub enum PollOutcome {
    Ready {
        id: PlayerId,
        result: Result<Message, ChannelError>,
    },
    TimedOut,
}

/// Locks every channel in `targets`, waits up to `wait` for the first one to
/// produce a datagram, then releases all locks.
///
/// Locks are taken in the order given. Callers that hold other channel locks
/// must not call this.
pub async fn poll_any(targets: &[(PlayerId, &Channel)], wait: Duration) -> PollOutcome {
    if targets.is_empty() {
        tokio::time::sleep(wait).await;
        return PollOutcome::TimedOut;
    }

    let mut guards = Vec::with_capacity(targets.len());
    for (id, channel) in targets {
        guards.push((*id, channel.lock().await));
    }

    let mut pending: FuturesUnordered<_> = guards
        .iter()
        .map(|(id, guard)| async move { (*id, guard.recv().await) })
        .collect();

    let first = timeout(wait, pending.next()).await;
    match first {
        Ok(Some((id, result))) => PollOutcome::Ready { id, result },
        Ok(None) | Err(_) => PollOutcome::TimedOut,
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::time::Instant;

    /// A server-side channel plus the raw participant socket on the other end.
    pub(crate) async fn channel_pair() -> (Channel, UdpSocket) {
        let server = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let client = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let server_addr = server.local_addr().unwrap();
        let client_addr = client.local_addr().unwrap();
        server.connect(client_addr).await.unwrap();
        client.connect(server_addr).await.unwrap();
        (Channel::new(server, client_addr), client)
    }

    pub(crate) async fn client_send(socket: &UdpSocket, message: &Message) {
        socket.send(&encode(message).unwrap()).await.unwrap();
    }

    pub(crate) async fn client_recv(socket: &UdpSocket) -> Message {
        let mut buffer = vec![0u8; MAX_DATAGRAM];
        let len = timeout(Duration::from_secs(2), socket.recv(&mut buffer))
            .await
            .expect("timed out waiting for server message")
            .unwrap();
        decode(&buffer[..len]).unwrap()
    }

    #[tokio::test]
    async fn test_send_and_receive() {
        let (channel, client) = channel_pair().await;

        channel.send(&Message::Ping).await.unwrap();
        assert_eq!(client_recv(&client).await, Message::Ping);

        client_send(&client, &Message::Pong).await;
        let received = channel
            .recv_timeout(Duration::from_millis(500))
            .await
            .unwrap();
        assert_eq!(received, Some(Message::Pong));
    }

    #[tokio::test]
    async fn test_recv_timeout_is_not_an_error() {
        let (channel, _client) = channel_pair().await;
        let received = channel
            .recv_timeout(Duration::from_millis(50))
            .await
            .unwrap();
        assert!(received.is_none());
    }

    #[tokio::test]
    async fn test_malformed_datagram() {
        let (channel, client) = channel_pair().await;
        client.send(&[0xff, 0xff, 0xff, 0xff]).await.unwrap();

        let result = channel.recv_timeout(Duration::from_millis(500)).await;
        match result {
            Err(err @ ChannelError::Codec(_)) => assert!(!err.is_transport()),
            other => panic!("Expected codec error, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_closed_channel() {
        let (channel, _client) = channel_pair().await;
        assert!(!channel.is_closed().await);

        channel.close().await;
        assert!(channel.is_closed().await);
        assert!(matches!(
            channel.send(&Message::Ping).await,
            Err(ChannelError::Closed)
        ));
    }

    #[tokio::test]
    async fn test_prompt_discards_queued_replies() {
        let (channel, client) = channel_pair().await;

        client_send(&client, &Message::ActionDiscard { card_ids: vec![] }).await;
        client_send(&client, &Message::Pong).await;
        tokio::time::sleep(Duration::from_millis(50)).await;

        let dropped = channel.prompt(&Message::Ping).await.unwrap();
        assert_eq!(dropped, 2);
        assert_eq!(client_recv(&client).await, Message::Ping);

        // Only what arrives after the prompt is read
        client_send(&client, &Message::Pong).await;
        let received = channel
            .recv_timeout(Duration::from_millis(500))
            .await
            .unwrap();
        assert_eq!(received, Some(Message::Pong));
    }

    #[tokio::test]
    async fn test_drain_on_closed_channel() {
        let (channel, _client) = channel_pair().await;
        channel.close().await;
        assert_eq!(channel.lock().await.drain(), 0);
        assert!(matches!(
            channel.prompt(&Message::Ping).await,
            Err(ChannelError::Closed)
        ));
    }

    #[tokio::test]
    async fn test_poll_any_returns_first_ready() {
        let (first, _first_client) = channel_pair().await;
        let (second, second_client) = channel_pair().await;

        client_send(&second_client, &Message::ActionDiscard { card_ids: vec![4] }).await;

        let targets = [(PlayerId(1), &first), (PlayerId(2), &second)];
        match poll_any(&targets, Duration::from_millis(500)).await {
            PollOutcome::Ready { id, result } => {
                assert_eq!(id, PlayerId(2));
                assert_eq!(result.unwrap(), Message::ActionDiscard { card_ids: vec![4] });
            }
            PollOutcome::TimedOut => panic!("Expected a ready channel"),
        }
    }

    #[tokio::test]
    async fn test_poll_any_times_out() {
        let (first, _first_client) = channel_pair().await;
        let targets = [(PlayerId(1), &first)];

        let started = Instant::now();
        let outcome = poll_any(&targets, Duration::from_millis(100)).await;
        assert!(matches!(outcome, PollOutcome::TimedOut));
        assert!(started.elapsed() >= Duration::from_millis(100));
    }

    #[tokio::test]
    async fn test_poll_releases_locks() {
        let (channel, _client) = channel_pair().await;
        let targets = [(PlayerId(1), &channel)];
        poll_any(&targets, Duration::from_millis(20)).await;

        // Would deadlock if the poll kept the guard.
        channel.close().await;
        assert!(channel.is_closed().await);
    }
}
