//! Wire protocol shared by the session server and its participants.
//!
//! Every datagram exchanged between the server and a participant carries
//! exactly one [`Message`], encoded with [`encode`] and decoded with
//! [`decode`]. Nothing outside this crate looks at raw bytes.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Largest datagram either side expects to receive.
pub const MAX_DATAGRAM: usize = 8192;

/// Stable participant identifier, assigned monotonically at admission.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct PlayerId(pub u32);

impl fmt::Display for PlayerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Card identifier, unique within one session.
pub type CardId = u32;

/// Closed card vocabulary understood by the engine.
///
/// `Other` covers the rest of the catalogue, which the engine moves around
/// but never interprets.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CardKind {
    Attack,
    Dodge,
    Heal,
    MassHeal,
    Other(u16),
}

impl fmt::Display for CardKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CardKind::Attack => write!(f, "attack"),
            CardKind::Dodge => write!(f, "dodge"),
            CardKind::Heal => write!(f, "heal"),
            CardKind::MassHeal => write!(f, "mass-heal"),
            CardKind::Other(tag) => write!(f, "other#{}", tag),
        }
    }
}

#[derive(Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Card {
    pub id: CardId,
    pub kind: CardKind,
}

impl Card {
    pub fn new(id: CardId, kind: CardKind) -> Self {
        Self { id, kind }
    }

    /// Wire reference to this card. The card itself keeps its single owner.
    pub fn reference(&self) -> CardRef {
        CardRef {
            id: self.id,
            kind: self.kind,
        }
    }
}

/// Copyable description of a card as it appears on the wire.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CardRef {
    pub id: CardId,
    pub kind: CardKind,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Identity {
    Leader,
    Loyalist,
    Rebel,
    Renegade,
}

/// What a `YourTurn` prompt is asking for.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TurnType {
    /// The actor's own turn: play cards or discard to finish.
    Play,
    /// Answer an attack.
    Dodge,
    /// Save a dying participant.
    Dying,
}

impl TurnType {
    /// Whether a card of `kind` is a valid answer to this prompt.
    pub fn accepts(self, kind: CardKind) -> bool {
        match self {
            TurnType::Play => !matches!(kind, CardKind::Dodge),
            TurnType::Dodge => kind == CardKind::Dodge,
            TurnType::Dying => matches!(kind, CardKind::Heal | CardKind::MassHeal),
        }
    }
}

/// Public view of one seat, as broadcast to every participant.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlayerView {
    pub id: PlayerId,
    /// Only the leader's identity is public while the game runs.
    pub identity: Option<Identity>,
    pub health: u32,
    pub max_health: u32,
    pub hand_size: u32,
    pub alive: bool,
}

#[derive(Debug, PartialEq, Serialize, Deserialize)]
pub enum Message {
    // Rendezvous
    ConnectRequest,
    ConnectReply { port: u16, player_id: PlayerId },

    // Dedicated channel, handshake and liveness
    ConnectAck,
    Ping,
    Pong,
    Kick,

    // Server notices
    GameStart {
        identity: Identity,
        leader_id: PlayerId,
    },
    YourTurn {
        remaining_ms: u64,
        turn_type: TurnType,
    },
    GameStatus {
        players: Vec<PlayerView>,
        current_turn: PlayerId,
        /// The recipient's own hand; other hands are never sent.
        hand: Vec<CardRef>,
    },
    NoticeCard {
        card: CardRef,
        source: PlayerId,
        target: Option<PlayerId>,
    },
    NoticeDying {
        player_id: PlayerId,
    },
    NoticeDead {
        player_id: PlayerId,
    },
    GameOver {
        winner: Option<PlayerId>,
    },

    // Participant actions
    ActionPlay {
        card: CardRef,
        target: Option<PlayerId>,
    },
    ActionDiscard {
        card_ids: Vec<CardId>,
    },
}

impl Message {
    /// Short name used in log lines.
    pub fn kind(&self) -> &'static str {
        match self {
            Message::ConnectRequest => "connect-request",
            Message::ConnectReply { .. } => "connect-reply",
            Message::ConnectAck => "connect-ack",
            Message::Ping => "ping",
            Message::Pong => "pong",
            Message::Kick => "kick",
            Message::GameStart { .. } => "game-start",
            Message::YourTurn { .. } => "your-turn",
            Message::GameStatus { .. } => "game-status",
            Message::NoticeCard { .. } => "notice-card",
            Message::NoticeDying { .. } => "notice-dying",
            Message::NoticeDead { .. } => "notice-dead",
            Message::GameOver { .. } => "game-over",
            Message::ActionPlay { .. } => "action-play",
            Message::ActionDiscard { .. } => "action-discard",
        }
    }
}

pub type CodecError = bincode::Error;

pub fn encode(message: &Message) -> Result<Vec<u8>, CodecError> {
    bincode::serialize(message)
}

pub fn decode(bytes: &[u8]) -> Result<Message, CodecError> {
    bincode::deserialize(bytes)
}
