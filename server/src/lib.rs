//! # Card Session Server Library
//!
//! This library provides the authoritative server for a turn-based multiplayer
//! card game. It admits participants over a rendezvous socket, keeps the
//! roster healthy with liveness probes, and runs the turn engine that decides
//! who may act, for how long, and what happens when a player's health runs out.
//!
//! ## Core Responsibilities
//!
//! ### Admission
//! A single well-known UDP socket answers connection requests. Every admitted
//! participant gets a dedicated socket of its own and a monotonically assigned
//! id once the handshake completes. Admission stops by itself when the target
//! table size is reached.
//!
//! ### Liveness
//! Before a game starts, every participant is pinged on its dedicated channel.
//! Anyone who fails to answer `Pong` in time is evicted and the sweep restarts.
//!
//! ### Turn Engine
//! The engine walks the living seats in order, prompts the current player,
//! and opens reaction windows for dodges and dying saves. Each window ends as
//! soon as every invited player has answered or passed.
//!
//! ## Architecture Design
//!
//! ### Message-Oriented UDP
//! Every datagram carries exactly one `shared::Message`, encoded with bincode.
//! Dedicated sockets are connected to their peer after the handshake, so a
//! channel only ever sees its own participant's datagrams.
//!
//! ### Lock Discipline
//! The registry's roster lock is structural and held briefly. Each channel
//! has its own lock, and all traffic on a channel happens under it. When both
//! are needed the roster lock is taken first.
//!
//! ## Module Organization
//!
//! - [`admission`]: rendezvous loop, port allocation, handshake
//! - [`channel`]: per-participant socket and the multiplexed wait
//! - [`config`]: session and engine settings
//! - [`engine`]: turns, reactions, damage and the dying protocol
//! - [`error`]: error types shared across the crate
//! - [`game`]: per-player state, deck and seat helpers
//! - [`liveness`]: probe sweep and readiness check
//! - [`registry`]: the live participant roster
//! - [`server`]: the control surface used by the bootstrap console
//!
//! ## Usage Example
//!
//! ```rust,no_run
//! use server::config::SessionConfig;
//! use server::server::Server;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let server = Server::new(SessionConfig::default()).await?;
//!
//!     // Admit participants in the background until the table is full
//!     server.accept_connections().await;
//!
//!     // ... later, once enough participants have joined
//!     if server.is_ready().await {
//!         let winner = server.start().await?;
//!         println!("Winner: {:?}", winner);
//!     }
//!
//!     Ok(())
//! }
//! ```

pub mod admission;
pub mod channel;
pub mod config;
pub mod engine;
pub mod error;
pub mod game;
pub mod liveness;
pub mod registry;
pub mod server;
