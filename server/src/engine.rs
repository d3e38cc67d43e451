//! Turn and reaction engine.
//!
//! One turn runs `AdvanceTurn -> CollectAction -> ResolveAction ->
//! (DyingReaction) -> BroadcastState` and repeats until a discard ends it or
//! the turn deadline passes. Every wait in here is bounded, and a timeout is
//! an ordinary `None`, not an error.

use crate::channel::{poll_any, PollOutcome};
use crate::config::EngineConfig;
use crate::error::{Result, SessionError};
use crate::game::{build_deck, deal_identities, living_neighbours, next_living, Player};
use crate::registry::{Participant, Registry};
use log::{debug, info, warn};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use shared::{Card, CardId, CardKind, CardRef, Identity, Message, PlayerId, PlayerView, TurnType};
use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Instant;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlayAction {
    pub card_id: CardId,
    pub kind: CardKind,
    pub source: PlayerId,
    pub target: Option<PlayerId>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiscardAction {
    pub source: PlayerId,
    pub card_ids: BTreeSet<CardId>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Action {
    Play(PlayAction),
    Discard(DiscardAction),
}

impl Action {
    /// Decodes a participant message into an action, handing anything else
    /// back to the caller.
    fn from_message(source: PlayerId, message: Message) -> std::result::Result<Action, Message> {
        match message {
            Message::ActionPlay { card, target } => Ok(Action::Play(PlayAction {
                card_id: card.id,
                kind: card.kind,
                source,
                target,
            })),
            Message::ActionDiscard { card_ids } => Ok(Action::Discard(DiscardAction {
                source,
                card_ids: card_ids.into_iter().collect(),
            })),
            other => Err(other),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DamageOutcome {
    Wounded,
    Saved { by: PlayerId, kind: CardKind },
    Died,
}

#[derive(Debug)]
struct Seat {
    participant: Arc<Participant>,
    player: Player,
}

fn illegal(player: PlayerId, reason: &str) -> SessionError {
    SessionError::IllegalAction {
        player,
        reason: reason.to_string(),
    }
}

pub struct TurnEngine {
    config: EngineConfig,
    registry: Arc<Registry>,
    /// Fixed at construction; eviction and death tombstone seats in place.
    seats: Vec<Seat>,
    cursor: usize,
    playing_id: PlayerId,
    /// Top of the pile is the end of the vector.
    draw_pile: Vec<Card>,
    discard_pile: Vec<Card>,
    turn_deadline: Instant,
    turns: u32,
    rng: StdRng,
}

impl TurnEngine {
    /// Seats everybody currently registered, in registration order, and deals
    /// identities.
    pub async fn from_registry(registry: Arc<Registry>, config: EngineConfig) -> Self {
        let participants = registry.snapshot().await;
        let mut rng = match config.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };

        let identities = deal_identities(participants.len(), &mut rng);
        let seats: Vec<Seat> = participants
            .into_iter()
            .zip(identities)
            .map(|(participant, identity)| {
                let max_health = match identity {
                    Identity::Leader => config.base_health + 1,
                    _ => config.base_health,
                };
                Seat {
                    player: Player::new(participant.id, identity, max_health),
                    participant,
                }
            })
            .collect();

        // The leader opens, so park the cursor one seat before them.
        let leader = seats
            .iter()
            .position(|seat| seat.player.identity == Identity::Leader)
            .unwrap_or(0);
        let cursor = match seats.len() {
            0 => 0,
            len => (leader + len - 1) % len,
        };
        let playing_id = seats
            .get(leader)
            .map(|seat| seat.player.id)
            .unwrap_or(PlayerId(0));

        Self {
            config,
            registry,
            seats,
            cursor,
            playing_id,
            draw_pile: Vec::new(),
            discard_pile: Vec::new(),
            turn_deadline: Instant::now(),
            turns: 0,
            rng,
        }
    }

    pub fn current_player(&self) -> PlayerId {
        self.playing_id
    }

    pub fn player(&self, id: PlayerId) -> Option<&Player> {
        self.seats
            .iter()
            .find(|seat| seat.player.id == id)
            .map(|seat| &seat.player)
    }

    pub fn discard_pile(&self) -> &[Card] {
        &self.discard_pile
    }

    pub fn draw_pile_len(&self) -> usize {
        self.draw_pile.len()
    }

    pub fn turns_played(&self) -> u32 {
        self.turns
    }

    fn seat_index(&self, id: PlayerId) -> Result<usize> {
        self.seats
            .iter()
            .position(|seat| seat.player.id == id)
            .ok_or(SessionError::UnknownPlayer(id))
    }

    fn seat(&self, id: PlayerId) -> Result<&Seat> {
        Ok(&self.seats[self.seat_index(id)?])
    }

    fn seat_mut(&mut self, id: PlayerId) -> Result<&mut Seat> {
        let index = self.seat_index(id)?;
        Ok(&mut self.seats[index])
    }

    fn living_ids(&self) -> Vec<PlayerId> {
        self.seats
            .iter()
            .filter(|seat| seat.player.is_alive())
            .map(|seat| seat.player.id)
            .collect()
    }

    pub fn living_count(&self) -> usize {
        self.seats.iter().filter(|seat| seat.player.is_alive()).count()
    }

    /// Moves the cursor to the next living seat.
    pub fn next_player(&mut self) -> Result<PlayerId> {
        let seats = &self.seats;
        let index = next_living(seats.len(), self.cursor, |i| seats[i].player.is_alive())
            .ok_or(SessionError::NoLivingPlayer)?;

        self.cursor = index;
        self.playing_id = self.seats[index].player.id;
        info!("Next player: {}", self.playing_id);
        Ok(self.playing_id)
    }

    /// Whether `target` is the nearest living seat to the left or right of
    /// the current actor.
    pub fn is_nearby(&self, target: PlayerId) -> bool {
        let seats = &self.seats;
        let (left, right) =
            living_neighbours(seats.len(), self.cursor, |i| seats[i].player.is_alive());
        [left, right]
            .into_iter()
            .flatten()
            .any(|index| seats[index].player.id == target)
    }

    async fn send_to(&self, seat: &Seat, message: &Message) {
        if let Err(e) = seat.participant.channel.send(message).await {
            debug!(
                "Failed to send {} to player {}: {}",
                message.kind(),
                seat.player.id,
                e
            );
        }
    }

    /// Sends a `YourTurn` prompt after dropping anything the seat sent
    /// before it.
    async fn prompt(&self, seat: &Seat, message: &Message) {
        match seat.participant.channel.prompt(message).await {
            Ok(0) => {}
            Ok(dropped) => debug!(
                "Dropped {} stale messages from player {}",
                dropped, seat.player.id
            ),
            Err(e) => debug!("Failed to prompt player {}: {}", seat.player.id, e),
        }
    }

    pub async fn broadcast(&self, message: &Message) {
        for seat in &self.seats {
            self.send_to(seat, message).await;
        }
    }

    /// Sends every seat the public roster plus its own hand.
    pub async fn broadcast_status(&self) {
        let players: Vec<PlayerView> = self.seats.iter().map(|seat| seat.player.view()).collect();

        for seat in &self.seats {
            let message = Message::GameStatus {
                players: players.clone(),
                current_turn: self.playing_id,
                hand: seat.player.hand.iter().map(Card::reference).collect(),
            };
            self.send_to(seat, &message).await;
        }
    }

    async fn broadcast_card(&self, action: &PlayAction) {
        self.broadcast(&Message::NoticeCard {
            card: CardRef {
                id: action.card_id,
                kind: action.kind,
            },
            source: action.source,
            target: action.target,
        })
        .await;
    }

    /// Takes the top card, reshuffling the discard pile in when the draw
    /// pile runs dry.
    pub fn draw_card(&mut self) -> Option<Card> {
        if self.draw_pile.is_empty() && !self.discard_pile.is_empty() {
            info!("Reshuffling {} discarded cards", self.discard_pile.len());
            self.draw_pile.append(&mut self.discard_pile);
            self.draw_pile.shuffle(&mut self.rng);
        }
        self.draw_pile.pop()
    }

    /// Draws up to `count` cards into a player's hand.
    pub fn deal(&mut self, id: PlayerId, count: usize) -> Result<usize> {
        let index = self.seat_index(id)?;
        let mut dealt = 0;
        while dealt < count {
            match self.draw_card() {
                Some(card) => {
                    self.seats[index].player.hand.push(card);
                    dealt += 1;
                }
                None => {
                    warn!("Out of cards");
                    break;
                }
            }
        }
        Ok(dealt)
    }

    /// Waits for the first play or discard from any of `targets` until the
    /// turn deadline.
    pub async fn wait_for_card(&self, targets: &[PlayerId]) -> Result<Option<Action>> {
        let mut channels = Vec::with_capacity(targets.len());
        for id in targets {
            channels.push((*id, &self.seat(*id)?.participant.channel));
        }

        loop {
            let now = Instant::now();
            if now >= self.turn_deadline {
                break;
            }
            let remaining = self.turn_deadline - now;
            debug!("Polling, {} ms left", remaining.as_millis());

            match poll_any(&channels, remaining.min(self.config.poll_interval)).await {
                PollOutcome::TimedOut => continue,
                PollOutcome::Ready {
                    id,
                    result: Ok(message),
                } => match Action::from_message(id, message) {
                    Ok(Action::Play(play)) => {
                        info!("Player {} plays {} {}", id, play.card_id, play.kind);
                        self.broadcast_card(&play).await;
                        return Ok(Some(Action::Play(play)));
                    }
                    Ok(discard) => {
                        info!("Player {} discards", id);
                        return Ok(Some(discard));
                    }
                    Err(other) => warn!("Player {} sent unexpected {}", id, other.kind()),
                },
                PollOutcome::Ready { id, result: Err(e) } => {
                    warn!("Player {} sent an invalid message: {}", id, e);
                    if e.is_transport() {
                        channels.retain(|(channel_id, _)| *channel_id != id);
                    }
                }
            }
        }

        Ok(None)
    }

    /// Opens a reaction window for the targets holding a card `turn_type`
    /// accepts.
    ///
    /// Ends on the first valid matching play, once every invited player has
    /// passed, or when the react budget runs out.
    pub async fn wait_for_react(
        &self,
        targets: &[PlayerId],
        turn_type: TurnType,
    ) -> Result<Option<PlayAction>> {
        let limit = self.config.react_time_limit;
        let prompt = Message::YourTurn {
            remaining_ms: limit.as_millis() as u64,
            turn_type,
        };

        let mut waiting = Vec::with_capacity(targets.len());
        for id in targets {
            let seat = self.seat(*id)?;
            if seat.player.is_alive() && seat.player.has_card(|kind| turn_type.accepts(kind)) {
                self.prompt(seat, &prompt).await;
                waiting.push((*id, &seat.participant.channel));
            }
        }
        if waiting.is_empty() {
            debug!("Nobody can react to {:?}", turn_type);
            return Ok(None);
        }

        let deadline = Instant::now() + limit;
        while !waiting.is_empty() {
            let now = Instant::now();
            if now >= deadline {
                break;
            }

            match poll_any(&waiting, deadline - now).await {
                PollOutcome::TimedOut => break,
                PollOutcome::Ready {
                    id,
                    result: Ok(message),
                } => match message {
                    Message::ActionPlay { card, target } => {
                        if !turn_type.accepts(card.kind) {
                            warn!("Player {} reacted with a {}", id, card.kind);
                            continue;
                        }
                        let held = self.seat(id)?.player.card(card.id).map(|c| c.kind);
                        if held != Some(card.kind) {
                            warn!("Player {} does not hold {} {}", id, card.id, card.kind);
                            continue;
                        }

                        let action = PlayAction {
                            card_id: card.id,
                            kind: card.kind,
                            source: id,
                            target,
                        };
                        info!("Player {} reacts with {} {}", id, card.id, card.kind);
                        self.broadcast_card(&action).await;
                        return Ok(Some(action));
                    }
                    Message::ActionDiscard { .. } => {
                        debug!("Player {} passes", id);
                        waiting.retain(|(channel_id, _)| *channel_id != id);
                    }
                    other => warn!("Player {} sent unexpected {}", id, other.kind()),
                },
                PollOutcome::Ready { id, result: Err(e) } => {
                    warn!("Player {} sent an invalid message: {}", id, e);
                    if e.is_transport() {
                        waiting.retain(|(channel_id, _)| *channel_id != id);
                    }
                }
            }
        }

        if waiting.is_empty() {
            debug!("Everybody passed on {:?}", turn_type);
        }
        Ok(None)
    }

    fn check_card(&self, player: PlayerId, card: CardId, expected: Option<CardKind>) -> Result<()> {
        let found = self
            .seat(player)?
            .player
            .card(card)
            .ok_or(SessionError::CardNotInHand { player, card })?
            .kind;

        match expected {
            Some(expected) if expected != found => Err(SessionError::CardMismatch {
                player,
                card,
                expected,
                found,
            }),
            _ => Ok(()),
        }
    }

    /// Moves a card from a hand to the discard pile. Nothing moves on error.
    pub fn remove_card(
        &mut self,
        player: PlayerId,
        card: CardId,
        expected: Option<CardKind>,
    ) -> Result<()> {
        self.check_card(player, card, expected)?;

        let removed = self
            .seat_mut(player)?
            .player
            .remove_card(card)
            .ok_or(SessionError::CardNotInHand { player, card })?;
        debug!("Player {} discards {} {}", player, removed.id, removed.kind);
        self.discard_pile.push(removed);
        Ok(())
    }

    /// Deals `amount` damage, running the dying window when it would be
    /// lethal. The dying player is not invited to save themselves.
    pub async fn damage(&mut self, player_id: PlayerId, amount: u32) -> Result<DamageOutcome> {
        let index = self.seat_index(player_id)?;
        let target = &mut self.seats[index].player;
        if !target.is_alive() {
            return Err(SessionError::PlayerDead(player_id));
        }

        if amount < target.health() {
            target.set_health(target.health() - amount);
            info!(
                "Player {} takes {} damage, {} health left",
                player_id,
                amount,
                target.health()
            );
            return Ok(DamageOutcome::Wounded);
        }

        target.set_health(0);
        info!("Player {} is dying", player_id);
        self.broadcast(&Message::NoticeDying { player_id }).await;

        let rescuers: Vec<PlayerId> = self
            .living_ids()
            .into_iter()
            .filter(|id| *id != player_id)
            .collect();
        match self.wait_for_react(&rescuers, TurnType::Dying).await? {
            Some(save) => {
                self.remove_card(save.source, save.card_id, Some(save.kind))?;
                match save.kind {
                    CardKind::MassHeal => {
                        for seat in &mut self.seats {
                            if seat.player.id != player_id && seat.player.is_alive() {
                                seat.player.heal(1);
                            }
                        }
                        info!("Player {} saves player {} with a mass heal", save.source, player_id);
                    }
                    _ => {
                        self.seats[index].player.set_health(1);
                        info!("Player {} saves player {} with a heal", save.source, player_id);
                    }
                }
                Ok(DamageOutcome::Saved {
                    by: save.source,
                    kind: save.kind,
                })
            }
            None => {
                let cards = self.seats[index].player.die();
                self.discard_pile.extend(cards);
                self.broadcast(&Message::NoticeDead { player_id }).await;
                info!("Player {} died", player_id);
                Ok(DamageOutcome::Died)
            }
        }
    }

    /// Resolves one play from the current actor.
    async fn resolve_play(&mut self, play: PlayAction, attacked: &mut bool) -> Result<()> {
        let source = play.source;
        self.check_card(source, play.card_id, Some(play.kind))?;

        match play.kind {
            CardKind::Attack => {
                if *attacked {
                    return Err(illegal(source, "only one attack per turn"));
                }
                let target = play
                    .target
                    .ok_or_else(|| illegal(source, "attack needs a target"))?;
                if !self.seat(target)?.player.is_alive() || !self.is_nearby(target) {
                    return Err(illegal(source, "target out of reach"));
                }

                self.remove_card(source, play.card_id, Some(CardKind::Attack))?;
                *attacked = true;

                match self.wait_for_react(&[target], TurnType::Dodge).await? {
                    Some(dodge) => {
                        self.remove_card(dodge.source, dodge.card_id, Some(CardKind::Dodge))?;
                        info!("Player {} dodges", target);
                    }
                    None => {
                        self.damage(target, 1).await?;
                    }
                }
            }
            CardKind::Heal => {
                if !self.seat(source)?.player.is_wounded() {
                    return Err(illegal(source, "already at full health"));
                }
                self.remove_card(source, play.card_id, Some(CardKind::Heal))?;
                self.seat_mut(source)?.player.heal(1);
            }
            CardKind::MassHeal => {
                self.remove_card(source, play.card_id, Some(CardKind::MassHeal))?;
                for seat in &mut self.seats {
                    if seat.player.is_alive() {
                        seat.player.heal(1);
                    }
                }
            }
            CardKind::Dodge => return Err(illegal(source, "dodge only answers an attack")),
            CardKind::Other(_) => {
                self.remove_card(source, play.card_id, None)?;
            }
        }

        Ok(())
    }

    /// Moves every listed card to the discard pile, or none if any is missing.
    fn discard_cards(&mut self, discard: &DiscardAction) -> Result<()> {
        for card in &discard.card_ids {
            self.check_card(discard.source, *card, None)?;
        }
        for card in &discard.card_ids {
            self.remove_card(discard.source, *card, None)?;
        }
        Ok(())
    }

    /// Discards the oldest cards until the hand fits the player's health.
    fn enforce_hand_limit(&mut self, id: PlayerId) -> Result<()> {
        let index = self.seat_index(id)?;
        let player = &mut self.seats[index].player;
        if !player.is_alive() {
            return Ok(());
        }

        let limit = player.health() as usize;
        if player.hand.len() > limit {
            let excess = player.hand.len() - limit;
            info!("Player {} discards {} cards over the hand limit", id, excess);
            self.discard_pile.extend(player.hand.drain(..excess));
        }
        Ok(())
    }

    /// Tombstones seats whose participant has left the registry.
    async fn sync_evictions(&mut self) {
        let mut departed = Vec::new();
        for seat in &mut self.seats {
            if seat.player.is_alive() && !self.registry.contains(seat.player.id).await {
                info!("Player {} left the game", seat.player.id);
                self.discard_pile.extend(seat.player.die());
                departed.push(seat.player.id);
            }
        }
        for player_id in departed {
            self.broadcast(&Message::NoticeDead { player_id }).await;
        }
    }

    /// Deals starting hands and tells everybody their identity.
    pub async fn start(&mut self) {
        let mut deck = build_deck(&self.config.deck);
        deck.shuffle(&mut self.rng);
        self.draw_pile = deck;
        self.discard_pile.clear();

        let ids: Vec<PlayerId> = self.seats.iter().map(|seat| seat.player.id).collect();
        for id in &ids {
            if let Err(e) = self.deal(*id, self.config.initial_hand) {
                warn!("Failed to deal to player {}: {}", id, e);
            }
        }

        let leader_id = self
            .seats
            .iter()
            .find(|seat| seat.player.identity == Identity::Leader)
            .map(|seat| seat.player.id)
            .unwrap_or(self.playing_id);

        for seat in &self.seats {
            let message = Message::GameStart {
                identity: seat.player.identity,
                leader_id,
            };
            self.send_to(seat, &message).await;
        }
        info!(
            "Game started with {} players, leader is {}",
            self.seats.len(),
            leader_id
        );
        self.broadcast_status().await;
    }

    /// Plays one full turn for the next living player.
    pub async fn play_turn(&mut self) -> Result<()> {
        self.sync_evictions().await;
        let current = self.next_player()?;
        self.turn_deadline = Instant::now() + self.config.turn_time_limit;
        self.turns += 1;

        let drawn = self.deal(current, self.config.draw_per_turn)?;
        debug!("Player {} draws {} cards", current, drawn);

        let mut attacked = false;
        loop {
            self.broadcast_status().await;
            if self.living_count() <= 1 || !self.seat(current)?.player.is_alive() {
                break;
            }

            let remaining = self.turn_deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                break;
            }
            let prompt = Message::YourTurn {
                remaining_ms: remaining.as_millis() as u64,
                turn_type: TurnType::Play,
            };
            self.prompt(self.seat(current)?, &prompt).await;

            match self.wait_for_card(&[current]).await? {
                None => {
                    info!("Player {} ran out of time", current);
                    break;
                }
                Some(Action::Discard(discard)) => match self.discard_cards(&discard) {
                    Ok(()) => break,
                    Err(e) => warn!("Rejected discard: {}", e),
                },
                Some(Action::Play(play)) => {
                    if let Err(e) = self.resolve_play(play, &mut attacked).await {
                        warn!("Rejected play: {}", e);
                    }
                }
            }
        }

        self.enforce_hand_limit(current)?;
        self.broadcast_status().await;
        Ok(())
    }

    /// Runs turns until one player is left or the turn limit is hit.
    /// Returns the winner, if there is exactly one survivor.
    pub async fn run(&mut self) -> Result<Option<PlayerId>> {
        self.start().await;

        while self.living_count() > 1 {
            if let Some(max_turns) = self.config.max_turns {
                if self.turns >= max_turns {
                    info!("Turn limit of {} reached", max_turns);
                    break;
                }
            }
            self.play_turn().await?;
        }

        let living = self.living_ids();
        let winner = match living.as_slice() {
            [survivor] => Some(*survivor),
            _ => None,
        };
        self.broadcast(&Message::GameOver { winner }).await;
        info!("Game over after {} turns, winner: {:?}", self.turns, winner);
        Ok(winner)
    }
}
