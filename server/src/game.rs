//! Per-seat game state, deck construction and seat rotation.

use crate::config::DeckComposition;
use log::info;
use rand::seq::SliceRandom;
use rand::Rng;
use shared::{Card, CardId, CardKind, Identity, PlayerId, PlayerView};

#[derive(Debug)]
pub struct Player {
    pub id: PlayerId,
    pub identity: Identity,
    health: u32,
    max_health: u32,
    pub hand: Vec<Card>,
    alive: bool,
}

impl Player {
    pub fn new(id: PlayerId, identity: Identity, max_health: u32) -> Self {
        Self {
            id,
            identity,
            health: max_health,
            max_health,
            hand: Vec::new(),
            alive: true,
        }
    }

    pub fn health(&self) -> u32 {
        self.health
    }

    pub fn max_health(&self) -> u32 {
        self.max_health
    }

    pub fn is_alive(&self) -> bool {
        self.alive
    }

    /// Clamped to the maximum so `health <= max_health` always holds.
    pub fn set_health(&mut self, health: u32) {
        self.health = health.min(self.max_health);
    }

    pub fn heal(&mut self, amount: u32) {
        self.set_health(self.health.saturating_add(amount));
    }

    pub fn is_wounded(&self) -> bool {
        self.health < self.max_health
    }

    pub fn has_card(&self, accepts: impl Fn(CardKind) -> bool) -> bool {
        self.hand.iter().any(|card| accepts(card.kind))
    }

    pub fn card(&self, card_id: CardId) -> Option<&Card> {
        self.hand.iter().find(|card| card.id == card_id)
    }

    pub fn remove_card(&mut self, card_id: CardId) -> Option<Card> {
        let index = self.hand.iter().position(|card| card.id == card_id)?;
        Some(self.hand.remove(index))
    }

    /// Marks the player dead and hands back every card they held.
    pub fn die(&mut self) -> Vec<Card> {
        self.alive = false;
        self.health = 0;
        std::mem::take(&mut self.hand)
    }

    /// What everybody else may see about this seat.
    pub fn view(&self) -> PlayerView {
        PlayerView {
            id: self.id,
            identity: (self.identity == Identity::Leader || !self.alive).then_some(self.identity),
            health: self.health,
            max_health: self.max_health,
            hand_size: self.hand.len() as u32,
            alive: self.alive,
        }
    }
}

/// Builds an unshuffled deck with sequential ids starting at 0.
pub fn build_deck(composition: &DeckComposition) -> Vec<Card> {
    let mut next_id: CardId = 0;
    let mut deck = Vec::with_capacity(composition.total() as usize);
    for (kind, count) in &composition.entries {
        for _ in 0..*count {
            deck.push(Card::new(next_id, *kind));
            next_id += 1;
        }
    }
    deck
}

/// Deals identities for `count` seats: one leader, then loyalists, rebels and
/// a renegade in roughly the usual proportions.
pub fn deal_identities<R: Rng>(count: usize, rng: &mut R) -> Vec<Identity> {
    let mut identities = Vec::with_capacity(count);
    if count == 0 {
        return identities;
    }

    identities.push(Identity::Leader);
    let others = count - 1;
    let renegades = usize::from(others >= 3);
    let loyalists = (others - renegades) / 2;
    let rebels = others - renegades - loyalists;

    identities.extend(std::iter::repeat(Identity::Renegade).take(renegades));
    identities.extend(std::iter::repeat(Identity::Loyalist).take(loyalists));
    identities.extend(std::iter::repeat(Identity::Rebel).take(rebels));
    identities.shuffle(rng);

    info!("Dealt {} identities", identities.len());
    identities
}

/// Index of the next living seat after `cursor`, walking at most `len` steps.
///
/// Returns `cursor` itself when it is the only living seat, None when no
/// seat is alive.
pub fn next_living(len: usize, cursor: usize, alive: impl Fn(usize) -> bool) -> Option<usize> {
    (1..=len)
        .map(|step| (cursor + step) % len)
        .find(|&index| alive(index))
}

/// Nearest living seats to the left and right of `cursor`, excluding it.
pub fn living_neighbours(
    len: usize,
    cursor: usize,
    alive: impl Fn(usize) -> bool,
) -> (Option<usize>, Option<usize>) {
    let left = (1..len)
        .map(|step| (cursor + len - step) % len)
        .find(|&index| alive(index));
    let right = (1..len)
        .map(|step| (cursor + step) % len)
        .find(|&index| alive(index));
    (left, right)
}
