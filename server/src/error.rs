//! Errors surfaced by the session server.
//!
//! Protocol faults (malformed or unexpected messages) are logged where they
//! happen and never reach this type. What lands here aborts the current call.

use shared::{CardId, CardKind, PlayerId};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("player {0} does not exist")]
    UnknownPlayer(PlayerId),

    #[error("player {0} is already dead")]
    PlayerDead(PlayerId),

    #[error("card {card} held by player {player} is a {found}, expected {expected}")]
    CardMismatch {
        player: PlayerId,
        card: CardId,
        expected: CardKind,
        found: CardKind,
    },

    #[error("player {player} does not hold card {card}")]
    CardNotInHand { player: PlayerId, card: CardId },

    #[error("player {player} may not do that: {reason}")]
    IllegalAction { player: PlayerId, reason: String },

    #[error("no living player left to take a turn")]
    NoLivingPlayer,

    #[error("no free port at or above {0}")]
    PortsExhausted(u32),

    #[error("not enough players: {have} connected, {need} required")]
    NotReady { have: usize, need: usize },

    #[error("admission task failed: {0}")]
    AdmissionTask(#[from] tokio::task::JoinError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, SessionError>;
