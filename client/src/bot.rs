//! Rule-based decisions for a headless participant.

use log::{debug, info};
use shared::{CardKind, CardRef, Identity, Message, PlayerId, PlayerView, TurnType};

#[derive(Debug)]
pub struct Bot {
    id: PlayerId,
    identity: Option<Identity>,
    hand: Vec<CardRef>,
    players: Vec<PlayerView>,
    current_turn: Option<PlayerId>,
    attacked: bool,
}

impl Bot {
    pub fn new(id: PlayerId) -> Self {
        Self {
            id,
            identity: None,
            hand: Vec::new(),
            players: Vec::new(),
            current_turn: None,
            attacked: false,
        }
    }

    pub fn id(&self) -> PlayerId {
        self.id
    }

    pub fn identity(&self) -> Option<Identity> {
        self.identity
    }

    pub fn hand(&self) -> &[CardRef] {
        &self.hand
    }

    /// Updates local knowledge from `message` and returns the answer to send,
    /// if one is due.
    pub fn respond(&mut self, message: &Message) -> Option<Message> {
        match message {
            Message::Ping => Some(Message::Pong),
            Message::GameStart { identity, leader_id } => {
                info!("Playing as {:?}, leader is {}", identity, leader_id);
                self.identity = Some(*identity);
                None
            }
            Message::GameStatus {
                players,
                current_turn,
                hand,
            } => {
                if *current_turn != self.id {
                    self.attacked = false;
                }
                self.players = players.clone();
                self.current_turn = Some(*current_turn);
                self.hand = hand.clone();
                None
            }
            Message::YourTurn { turn_type, .. } => Some(self.act(*turn_type)),
            Message::NoticeDying { player_id } if *player_id == self.id => {
                debug!("We are dying");
                None
            }
            other => {
                debug!("Noted {}", other.kind());
                None
            }
        }
    }

    fn act(&mut self, turn_type: TurnType) -> Message {
        match turn_type {
            TurnType::Play => self.play(),
            TurnType::Dodge => self.react(|kind| kind == CardKind::Dodge),
            TurnType::Dying => self.react(|kind| matches!(kind, CardKind::Heal | CardKind::MassHeal)),
        }
    }

    fn play(&mut self) -> Message {
        if self.is_wounded() {
            if let Some(card) = self.take(|kind| kind == CardKind::Heal) {
                return Message::ActionPlay { card, target: None };
            }
        }

        if !self.attacked {
            if let Some(target) = self.neighbour() {
                if let Some(card) = self.take(|kind| kind == CardKind::Attack) {
                    self.attacked = true;
                    return Message::ActionPlay {
                        card,
                        target: Some(target),
                    };
                }
            }
        }

        Message::ActionDiscard {
            card_ids: Vec::new(),
        }
    }

    /// Plays the first matching card, or passes with an empty discard.
    fn react(&mut self, wanted: impl Fn(CardKind) -> bool) -> Message {
        match self.take(wanted) {
            Some(card) => Message::ActionPlay { card, target: None },
            None => Message::ActionDiscard {
                card_ids: Vec::new(),
            },
        }
    }

    /// Removes the first card of a wanted kind from the local hand. The next
    /// status update replaces the hand either way.
    fn take(&mut self, wanted: impl Fn(CardKind) -> bool) -> Option<CardRef> {
        let position = self.hand.iter().position(|card| wanted(card.kind))?;
        Some(self.hand.remove(position))
    }

    fn me(&self) -> Option<&PlayerView> {
        self.players.iter().find(|player| player.id == self.id)
    }

    fn is_wounded(&self) -> bool {
        self.me()
            .map(|me| me.alive && me.health < me.max_health)
            .unwrap_or(false)
    }

    /// The next living player after this one in seat order.
    fn neighbour(&self) -> Option<PlayerId> {
        let seat = self.players.iter().position(|player| player.id == self.id)?;
        let count = self.players.len();
        (1..count)
            .map(|step| &self.players[(seat + step) % count])
            .find(|player| player.alive)
            .map(|player| player.id)
    }
}
