//! Session configuration.

use shared::CardKind;
use std::time::Duration;

/// How many copies of each card kind go into a fresh deck.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeckComposition {
    pub entries: Vec<(CardKind, u32)>,
}

impl DeckComposition {
    pub fn total(&self) -> u32 {
        self.entries.iter().map(|(_, count)| count).sum()
    }
}

impl Default for DeckComposition {
    fn default() -> Self {
        Self {
            entries: vec![
                (CardKind::Attack, 30),
                (CardKind::Dodge, 15),
                (CardKind::Heal, 8),
                (CardKind::MassHeal, 1),
                (CardKind::Other(1), 6),
                (CardKind::Other(2), 4),
            ],
        }
    }
}

#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Address the rendezvous and dedicated sockets bind to
    pub host: String,
    /// First port tried for the rendezvous socket
    pub port: u16,
    /// Players required before a game may start
    pub min_players: usize,
    /// Admission stops by itself once this many players are registered
    pub target_players: usize,
    pub handshake_timeout: Duration,
    pub probe_timeout: Duration,
    /// How often the admission loop wakes up to check for `stop()`
    pub rendezvous_poll: Duration,
    pub engine: EngineConfig,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 5000,
            min_players: 2,
            target_players: 5,
            handshake_timeout: Duration::from_secs(1),
            probe_timeout: Duration::from_secs(1),
            rendezvous_poll: Duration::from_millis(500),
            engine: EngineConfig::default(),
        }
    }
}

/// Rules and time budgets for the turn engine.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Budget for a whole turn, re-armed when a turn begins
    pub turn_time_limit: Duration,
    /// Budget for one reaction window
    pub react_time_limit: Duration,
    /// Per-iteration wait inside a turn
    pub poll_interval: Duration,
    pub initial_hand: usize,
    pub draw_per_turn: usize,
    pub base_health: u32,
    pub deck: DeckComposition,
    /// Seed for identity assignment and shuffling; random when None
    pub seed: Option<u64>,
    /// Stop after this many turns even without a single survivor
    pub max_turns: Option<u32>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            turn_time_limit: Duration::from_secs(15),
            react_time_limit: Duration::from_secs(5),
            poll_interval: Duration::from_secs(1),
            initial_hand: 4,
            draw_per_turn: 2,
            base_health: 4,
            deck: DeckComposition::default(),
            seed: None,
            max_turns: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_deck_covers_starting_hands() {
        let config = SessionConfig::default();
        let needed = config.target_players * config.engine.initial_hand;
        assert!(config.engine.deck.total() as usize > needed);
    }

    #[test]
    fn test_default_timeouts() {
        let config = SessionConfig::default();
        assert_eq!(config.handshake_timeout, Duration::from_secs(1));
        assert!(config.rendezvous_poll < config.handshake_timeout);
        assert!(config.engine.poll_interval <= config.engine.turn_time_limit);
    }
}
