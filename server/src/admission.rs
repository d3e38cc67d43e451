//! Connection admission: rendezvous socket, dedicated port allocation and handshake

use crate::channel::Channel;
use crate::config::SessionConfig;
use crate::error::{Result, SessionError};
use crate::registry::{Participant, Registry};
use log::{debug, error, info, warn};
use shared::{decode, encode, Message, MAX_DATAGRAM};
use std::io::ErrorKind;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::UdpSocket;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::timeout;

const MAX_PORT: u32 = u16::MAX as u32;

/// Binds a UDP socket on the first free port at or above `start`
///
/// Only "address in use" moves on to the next candidate; any other bind
/// failure is returned as is.
pub async fn bind_dedicated(host: &str, start: u32) -> Result<(UdpSocket, u16)> {
    let mut candidate = start;

    while candidate <= MAX_PORT {
        let port = candidate as u16;
        match UdpSocket::bind((host, port)).await {
            Ok(socket) => {
                let bound = socket.local_addr()?.port();
                return Ok((socket, bound));
            }
            Err(e) if e.kind() == ErrorKind::AddrInUse => {
                warn!("Port {} is already in use", port);
                candidate += 1;
            }
            Err(e) => return Err(e.into()),
        }
    }

    Err(SessionError::PortsExhausted(start))
}

/// Background admission loop feeding the registry
pub struct AdmissionService {
    inner: Arc<Inner>,
    task: Mutex<Option<JoinHandle<Result<()>>>>,
}

struct Inner {
    rendezvous: UdpSocket,
    host: String,
    next_port: AtomicU32,
    registry: Arc<Registry>,
    target_players: usize,
    handshake_timeout: Duration,
    rendezvous_poll: Duration,
    running: AtomicBool,
}

impl AdmissionService {
    /// Opens the rendezvous socket
    ///
    /// The rendezvous port follows the same increment-on-conflict policy as
    /// dedicated ports; dedicated candidates start right after it.
    pub async fn bind(config: &SessionConfig, registry: Arc<Registry>) -> Result<Self> {
        let (rendezvous, port) = bind_dedicated(&config.host, config.port as u32).await?;
        info!("Rendezvous listening on {}:{}", config.host, port);

        Ok(AdmissionService {
            inner: Arc::new(Inner {
                rendezvous,
                host: config.host.clone(),
                next_port: AtomicU32::new(port as u32 + 1),
                registry,
                target_players: config.target_players,
                handshake_timeout: config.handshake_timeout,
                rendezvous_poll: config.rendezvous_poll,
                running: AtomicBool::new(false),
            }),
            task: Mutex::new(None),
        })
    }

    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.inner.rendezvous.local_addr()
    }

    pub fn is_accepting(&self) -> bool {
        self.inner.running.load(Ordering::SeqCst)
    }

    /// Spawns the admission loop unless one is already running
    pub async fn accept_connections(&self) {
        let mut task = self.task.lock().await;
        if let Some(handle) = task.as_ref() {
            if !handle.is_finished() {
                debug!("Admission loop already running");
                return;
            }
        }

        self.inner.running.store(true, Ordering::SeqCst);
        info!("Waiting for participants");
        *task = Some(tokio::spawn(Arc::clone(&self.inner).run()));
    }

    /// Signals the admission loop and waits for it to exit
    ///
    /// Returns the loop's own result, so a port exhaustion inside the loop
    /// surfaces here. A panicked loop is reported as
    /// [`SessionError::AdmissionTask`].
    pub async fn stop(&self) -> Result<()> {
        self.inner.running.store(false, Ordering::SeqCst);

        let handle = self.task.lock().await.take();
        match handle {
            Some(handle) => match handle.await {
                Ok(result) => result,
                Err(e) => {
                    error!("Admission task failed: {}", e);
                    Err(e.into())
                }
            },
            None => Ok(()),
        }
    }
}

impl Drop for AdmissionService {
    fn drop(&mut self) {
        self.inner.running.store(false, Ordering::SeqCst);
    }
}

impl Inner {
    /// Serves connect requests until stopped or the target size is reached
    async fn run(self: Arc<Self>) -> Result<()> {
        let mut buffer = vec![0u8; MAX_DATAGRAM];

        while self.running.load(Ordering::SeqCst) {
            if self.registry.len().await >= self.target_players {
                info!("Reached {} participants", self.target_players);
                break;
            }

            let received = timeout(self.rendezvous_poll, self.rendezvous.recv_from(&mut buffer)).await;
            let (len, addr) = match received {
                Err(_) => continue,
                Ok(Err(e)) => {
                    error!("Error receiving on rendezvous: {}", e);
                    continue;
                }
                Ok(Ok(received)) => received,
            };

            match decode(&buffer[..len]) {
                Ok(Message::ConnectRequest) => {
                    info!("Connect request from {}", addr);
                    match self.connect_with_client(addr).await {
                        Ok(()) => {}
                        Err(e @ SessionError::PortsExhausted(_)) => {
                            error!("Stopping admission: {}", e);
                            self.running.store(false, Ordering::SeqCst);
                            return Err(e);
                        }
                        Err(e) => error!("Failed to admit {}: {}", addr, e),
                    }
                }
                Ok(other) => debug!("Ignoring {} on rendezvous from {}", other.kind(), addr),
                Err(e) => debug!("Undecodable rendezvous datagram from {}: {}", addr, e),
            }
        }

        self.running.store(false, Ordering::SeqCst);
        debug!("Admission loop finished");
        Ok(())
    }

    /// Allocates a dedicated socket for `requester` and runs the handshake
    ///
    /// Handshake failures are logged and swallowed; only bind failures are
    /// returned.
    async fn connect_with_client(&self, requester: SocketAddr) -> Result<()> {
        let start = self.next_port.load(Ordering::SeqCst);
        let (socket, port) = bind_dedicated(&self.host, start).await?;
        self.next_port.store(port as u32 + 1, Ordering::SeqCst);

        let id = self.registry.allocate_id();
        debug!("Assigned port {} to participant {}", port, id);

        let reply = match encode(&Message::ConnectReply {
            port,
            player_id: id,
        }) {
            Ok(reply) => reply,
            Err(e) => {
                error!("Failed to encode connect reply: {}", e);
                return Ok(());
            }
        };
        if let Err(e) = self.rendezvous.send_to(&reply, requester).await {
            warn!("Failed to reply to {}: {}", requester, e);
            return Ok(());
        }

        let mut buffer = vec![0u8; MAX_DATAGRAM];
        let received = timeout(self.handshake_timeout, socket.recv_from(&mut buffer)).await;
        let (len, peer) = match received {
            Ok(Ok(received)) => received,
            Ok(Err(e)) => {
                warn!("Participant {} failed handshake: {}", id, e);
                return Ok(());
            }
            Err(_) => {
                warn!("Participant {} failed handshake: timed out", id);
                return Ok(());
            }
        };

        match decode(&buffer[..len]) {
            Ok(Message::ConnectAck) => {
                if let Err(e) = socket.connect(peer).await {
                    warn!("Participant {} failed handshake: {}", id, e);
                    return Ok(());
                }
                self.registry
                    .add(Participant::new(id, Channel::new(socket, peer)))
                    .await;
            }
            Ok(other) => warn!(
                "Participant {} failed handshake: unexpected {}",
                id,
                other.kind()
            ),
            Err(e) => warn!("Participant {} failed handshake: {}", id, e),
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use shared::PlayerId;
    use std::time::Instant;

    fn test_config(target_players: usize) -> SessionConfig {
        SessionConfig {
            host: "127.0.0.1".to_string(),
            port: 0,
            target_players,
            handshake_timeout: Duration::from_millis(300),
            rendezvous_poll: Duration::from_millis(50),
            ..SessionConfig::default()
        }
    }

    /// Plays the participant side of admission, acknowledging with `ack`
    async fn request_admission(rendezvous: SocketAddr, ack: &Message) -> (UdpSocket, PlayerId, u16) {
        let socket = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        socket
            .send_to(&encode(&Message::ConnectRequest).unwrap(), rendezvous)
            .await
            .unwrap();

        let mut buffer = vec![0u8; MAX_DATAGRAM];
        let (len, _) = timeout(Duration::from_secs(2), socket.recv_from(&mut buffer))
            .await
            .unwrap()
            .unwrap();

        match decode(&buffer[..len]).unwrap() {
            Message::ConnectReply { port, player_id } => {
                socket
                    .send_to(&encode(ack).unwrap(), ("127.0.0.1", port))
                    .await
                    .unwrap();
                (socket, player_id, port)
            }
            other => panic!("Expected connect reply, got {:?}", other),
        }
    }

    async fn wait_for_len(registry: &Registry, len: usize) {
        let started = Instant::now();
        while registry.len().await < len {
            assert!(started.elapsed() < Duration::from_secs(2), "registry never reached {}", len);
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }

    fn free_port_pair() -> (std::net::UdpSocket, std::net::UdpSocket, u16) {
        for _ in 0..50 {
            let first = std::net::UdpSocket::bind("127.0.0.1:0").unwrap();
            let port = first.local_addr().unwrap().port();
            if port >= u16::MAX - 2 {
                continue;
            }
            if let Ok(second) = std::net::UdpSocket::bind(("127.0.0.1", port + 1)) {
                return (first, second, port);
            }
        }
        panic!("could not find two adjacent free ports");
    }

    #[tokio::test]
    async fn test_bind_skips_ports_in_use() {
        let (_first, _second, port) = free_port_pair();

        let (_socket, bound) = bind_dedicated("127.0.0.1", port as u32).await.unwrap();
        assert_eq!(bound, port + 2);
    }

    /// Three consecutive ports, all bound. Drop the first to free it.
    fn occupied_port_run() -> (Vec<std::net::UdpSocket>, u16) {
        for _ in 0..50 {
            let first = std::net::UdpSocket::bind("127.0.0.1:0").unwrap();
            let port = first.local_addr().unwrap().port();
            if port >= u16::MAX - 4 {
                continue;
            }
            let rest: Vec<_> = (1..3)
                .filter_map(|offset| std::net::UdpSocket::bind(("127.0.0.1", port + offset)).ok())
                .collect();
            if rest.len() == 2 {
                let mut sockets = vec![first];
                sockets.extend(rest);
                return (sockets, port);
            }
        }
        panic!("could not find three adjacent free ports");
    }

    #[tokio::test]
    async fn test_reply_reports_skipped_port() {
        let (mut sockets, port) = occupied_port_run();
        // The rendezvous takes the first port; the next two stay busy
        drop(sockets.remove(0));

        let registry = Arc::new(Registry::new());
        let config = SessionConfig {
            port,
            ..test_config(4)
        };
        let service = AdmissionService::bind(&config, Arc::clone(&registry))
            .await
            .unwrap();
        assert_eq!(service.local_addr().unwrap().port(), port);
        service.accept_connections().await;

        let rendezvous = service.local_addr().unwrap();
        let (_socket, _, reported) = request_admission(rendezvous, &Message::ConnectAck).await;
        assert_eq!(reported, port + 3);

        wait_for_len(&registry, 1).await;
        service.stop().await.unwrap();
    }

    #[tokio::test]
    async fn test_stop_reports_crashed_loop() {
        let registry = Arc::new(Registry::new());
        let service = AdmissionService::bind(&test_config(4), registry)
            .await
            .unwrap();

        *service.task.lock().await = Some(tokio::spawn(async {
            if true {
                panic!("admission loop crashed");
            }
            Ok(())
        }));

        let result = service.stop().await;
        assert!(matches!(result, Err(SessionError::AdmissionTask(_))));
    }

    #[tokio::test]
    async fn test_bind_exhausted() {
        let result = bind_dedicated("127.0.0.1", MAX_PORT + 1).await;
        assert!(matches!(result, Err(SessionError::PortsExhausted(_))));
    }

    #[tokio::test]
    async fn test_handshake_admits_participant() {
        let registry = Arc::new(Registry::new());
        let service = AdmissionService::bind(&test_config(4), Arc::clone(&registry))
            .await
            .unwrap();
        let rendezvous = service.local_addr().unwrap();
        service.accept_connections().await;

        let (_socket, id, port) = request_admission(rendezvous, &Message::ConnectAck).await;
        assert_eq!(id, PlayerId(1));
        assert!(port as u32 > rendezvous.port() as u32);

        wait_for_len(&registry, 1).await;
        assert_eq!(registry.ids().await, vec![PlayerId(1)]);

        service.stop().await.unwrap();
        assert!(!service.is_accepting());
    }

    #[tokio::test]
    async fn test_failed_handshake_burns_id() {
        let registry = Arc::new(Registry::new());
        let service = AdmissionService::bind(&test_config(4), Arc::clone(&registry))
            .await
            .unwrap();
        let rendezvous = service.local_addr().unwrap();
        service.accept_connections().await;

        let (_bad, bad_id, _) = request_admission(rendezvous, &Message::Ping).await;
        let (_good, good_id, _) = request_admission(rendezvous, &Message::ConnectAck).await;

        assert_eq!(bad_id, PlayerId(1));
        assert_eq!(good_id, PlayerId(2));

        wait_for_len(&registry, 1).await;
        assert_eq!(registry.ids().await, vec![PlayerId(2)]);

        service.stop().await.unwrap();
    }

    #[tokio::test]
    async fn test_silent_handshake_times_out() {
        let registry = Arc::new(Registry::new());
        let service = AdmissionService::bind(&test_config(4), Arc::clone(&registry))
            .await
            .unwrap();
        let rendezvous = service.local_addr().unwrap();
        service.accept_connections().await;

        // Request a port but never acknowledge it
        let silent = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        silent
            .send_to(&encode(&Message::ConnectRequest).unwrap(), rendezvous)
            .await
            .unwrap();
        let mut buffer = vec![0u8; MAX_DATAGRAM];
        timeout(Duration::from_secs(2), silent.recv_from(&mut buffer))
            .await
            .unwrap()
            .unwrap();

        let (_good, good_id, _) = request_admission(rendezvous, &Message::ConnectAck).await;
        assert_eq!(good_id, PlayerId(2));

        wait_for_len(&registry, 1).await;
        assert_eq!(registry.ids().await, vec![PlayerId(2)]);

        service.stop().await.unwrap();
    }

    #[tokio::test]
    async fn test_stops_at_target_size() {
        let registry = Arc::new(Registry::new());
        let service = AdmissionService::bind(&test_config(1), Arc::clone(&registry))
            .await
            .unwrap();
        let rendezvous = service.local_addr().unwrap();
        service.accept_connections().await;

        // Junk on the rendezvous socket is ignored
        let stray = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        stray
            .send_to(&encode(&Message::Ping).unwrap(), rendezvous)
            .await
            .unwrap();

        request_admission(rendezvous, &Message::ConnectAck).await;
        wait_for_len(&registry, 1).await;

        let started = Instant::now();
        while service.is_accepting() {
            assert!(started.elapsed() < Duration::from_secs(2));
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        service.stop().await.unwrap();
    }

    #[tokio::test]
    async fn test_accept_is_idempotent() {
        let registry = Arc::new(Registry::new());
        let service = AdmissionService::bind(&test_config(4), Arc::clone(&registry))
            .await
            .unwrap();

        service.accept_connections().await;
        service.accept_connections().await;
        assert!(service.is_accepting());

        service.stop().await.unwrap();
        assert!(!service.is_accepting());
    }
}
