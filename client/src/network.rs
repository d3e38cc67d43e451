use crate::Error;
use log::{debug, info};
use shared::{decode, encode, Message, PlayerId, MAX_DATAGRAM};
use std::io;
use std::net::{Ipv4Addr, Ipv6Addr, SocketAddr};
use std::time::Duration;
use tokio::net::UdpSocket;
use tokio::time::timeout;

/// A participant's end of its dedicated channel.
pub struct Connection {
    socket: UdpSocket,
    player_id: PlayerId,
}

impl Connection {
    /// Joins a session through its rendezvous address.
    ///
    /// `wait` bounds the wait for the server's reply.
    pub async fn connect(
        rendezvous: SocketAddr,
        wait: Duration,
    ) -> Result<Self, Error> {
        let local: SocketAddr = if rendezvous.is_ipv4() {
            (Ipv4Addr::UNSPECIFIED, 0).into()
        } else {
            (Ipv6Addr::UNSPECIFIED, 0).into()
        };
        let socket = UdpSocket::bind(local).await?;

        info!("Connecting to {}...", rendezvous);
        socket
            .send_to(&encode(&Message::ConnectRequest)?, rendezvous)
            .await?;

        let mut buffer = vec![0u8; MAX_DATAGRAM];
        let (port, player_id) = loop {
            let (len, from) = timeout(wait, socket.recv_from(&mut buffer))
                .await
                .map_err(|_| io::Error::new(io::ErrorKind::TimedOut, "no reply from server"))??;
            if from != rendezvous {
                debug!("Ignoring datagram from {}", from);
                continue;
            }
            match decode(&buffer[..len])? {
                Message::ConnectReply { port, player_id } => break (port, player_id),
                other => debug!("Ignoring {} before connect reply", other.kind()),
            }
        };

        let dedicated = SocketAddr::new(rendezvous.ip(), port);
        socket.send_to(&encode(&Message::ConnectAck)?, dedicated).await?;
        socket.connect(dedicated).await?;

        info!("Connected as player {} on port {}", player_id, port);
        Ok(Connection { socket, player_id })
    }

    pub fn player_id(&self) -> PlayerId {
        self.player_id
    }

    pub async fn send(&self, message: &Message) -> Result<(), Error> {
        let data = encode(message)?;
        self.socket.send(&data).await?;
        Ok(())
    }

    pub async fn recv(&self) -> Result<Message, Error> {
        let mut buffer = vec![0u8; MAX_DATAGRAM];
        let len = self.socket.recv(&mut buffer).await?;
        Ok(decode(&buffer[..len])?)
    }

    /// Like [`Connection::recv`], but gives up after `wait`.
    pub async fn recv_timeout(
        &self,
        wait: Duration,
    ) -> Result<Option<Message>, Error> {
        match timeout(wait, self.recv()).await {
            Ok(message) => message.map(Some),
            Err(_) => Ok(None),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_handshake_against_fake_server() {
        let rendezvous = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let dedicated = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let rendezvous_addr = rendezvous.local_addr().unwrap();
        let dedicated_port = dedicated.local_addr().unwrap().port();

        let server = tokio::spawn(async move {
            let mut buffer = vec![0u8; MAX_DATAGRAM];
            let (len, from) = rendezvous.recv_from(&mut buffer).await.unwrap();
            assert_eq!(decode(&buffer[..len]).unwrap(), Message::ConnectRequest);

            let reply = Message::ConnectReply {
                port: dedicated_port,
                player_id: PlayerId(7),
            };
            rendezvous
                .send_to(&encode(&reply).unwrap(), from)
                .await
                .unwrap();

            let (len, peer) = dedicated.recv_from(&mut buffer).await.unwrap();
            assert_eq!(decode(&buffer[..len]).unwrap(), Message::ConnectAck);
            dedicated.connect(peer).await.unwrap();
            dedicated.send(&encode(&Message::Ping).unwrap()).await.unwrap();
            dedicated
        });

        let connection = Connection::connect(rendezvous_addr, Duration::from_secs(2))
            .await
            .unwrap();
        assert_eq!(connection.player_id(), PlayerId(7));

        let dedicated = server.await.unwrap();
        let ping = connection
            .recv_timeout(Duration::from_secs(2))
            .await
            .unwrap();
        assert_eq!(ping, Some(Message::Ping));

        connection.send(&Message::Pong).await.unwrap();
        let mut buffer = vec![0u8; MAX_DATAGRAM];
        let len = dedicated.recv(&mut buffer).await.unwrap();
        assert_eq!(decode(&buffer[..len]).unwrap(), Message::Pong);
    }

    #[tokio::test]
    async fn test_connect_times_out_without_server() {
        let silent = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let result =
            Connection::connect(silent.local_addr().unwrap(), Duration::from_millis(100)).await;
        assert!(result.is_err());
    }
}
