//! # Card Session Client Library
//!
//! A headless participant for the card session server. It joins through the
//! rendezvous socket, then answers every prompt on its dedicated channel with
//! a simple rule-based strategy.
//!
//! ## Module Organization
//!
//! ### Network Module (`network`)
//! Connection handshake and datagram transport:
//! - `ConnectRequest` to the rendezvous, `ConnectReply` back
//! - `ConnectAck` to the dedicated port, after which the socket is connected
//! - Message encoding through the shared codec
//!
//! ### Bot Module (`bot`)
//! The decision logic, kept free of I/O so it can be tested directly:
//! - Answers liveness probes
//! - Tracks its own hand and the public table from status updates
//! - Heals when wounded, attacks a neighbour once per turn, dodges and saves
//!   when it can
//!
//! ## Usage Example
//!
//! ```rust,no_run
//! use client::bot::Bot;
//! use client::network::Connection;
//! use std::time::Duration;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), client::Error> {
//!     let connection =
//!         Connection::connect("127.0.0.1:5000".parse()?, Duration::from_secs(2)).await?;
//!     let mut bot = Bot::new(connection.player_id());
//!
//!     // Plays until kicked or the game ends
//!     client::run(&connection, &mut bot).await?;
//!     Ok(())
//! }
//! ```

pub mod bot;
pub mod network;

use bot::Bot;
use log::{info, warn};
use network::Connection;
use shared::Message;

pub type Error = Box<dyn std::error::Error + Send + Sync>;

/// Feeds every incoming message to `bot` and sends back its answers.
///
/// Returns once the server kicks this participant or the game is over.
pub async fn run(connection: &Connection, bot: &mut Bot) -> Result<(), Error> {
    loop {
        let message = match connection.recv().await {
            Ok(message) => message,
            Err(e) => {
                warn!("Dropping unreadable message: {}", e);
                continue;
            }
        };

        match &message {
            Message::Kick => {
                info!("Kicked by the server");
                return Ok(());
            }
            Message::GameOver { winner } => {
                match winner {
                    Some(id) if *id == bot.id() => info!("Game over, we won"),
                    Some(id) => info!("Game over, player {} won", id),
                    None => info!("Game over, no winner"),
                }
                return Ok(());
            }
            _ => {}
        }

        if let Some(reply) = bot.respond(&message) {
            connection.send(&reply).await?;
        }
    }
}
