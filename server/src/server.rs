//! Session control surface used by the bootstrap console.

use crate::admission::AdmissionService;
use crate::config::SessionConfig;
use crate::engine::TurnEngine;
use crate::error::{Result, SessionError};
use crate::liveness;
use crate::registry::Registry;
use log::{info, warn};
use shared::{Message, PlayerId};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

/// Owns the registry and the admission service, and hands the live roster
/// to a [`TurnEngine`] when the game starts.
pub struct Server {
    config: SessionConfig,
    min_players: AtomicUsize,
    registry: Arc<Registry>,
    admission: AdmissionService,
}

impl Server {
    /// Binds the rendezvous socket. Admission does not start until
    /// [`Server::accept_connections`] is called.
    pub async fn new(config: SessionConfig) -> Result<Self> {
        let registry = Arc::new(Registry::new());
        let admission = AdmissionService::bind(&config, Arc::clone(&registry)).await?;

        Ok(Server {
            min_players: AtomicUsize::new(config.min_players),
            config,
            registry,
            admission,
        })
    }

    pub fn rendezvous_addr(&self) -> std::io::Result<SocketAddr> {
        self.admission.local_addr()
    }

    pub fn registry(&self) -> &Arc<Registry> {
        &self.registry
    }

    pub fn set_min_players(&self, min_players: usize) {
        self.min_players.store(min_players, Ordering::SeqCst);
    }

    pub fn min_players(&self) -> usize {
        self.min_players.load(Ordering::SeqCst)
    }

    pub async fn accept_connections(&self) {
        self.admission.accept_connections().await;
    }

    pub async fn stop_admission(&self) -> Result<()> {
        self.admission.stop().await
    }

    /// Drops unreachable participants, then checks the minimum.
    pub async fn is_ready(&self) -> bool {
        liveness::is_ready(&self.registry, self.min_players(), self.config.probe_timeout).await
    }

    /// Stops admission, probes the final roster and runs a full game on it.
    ///
    /// Returns the winner, if any. When too few players answer, admission
    /// is reopened if it was running before.
    pub async fn start(&self) -> Result<Option<PlayerId>> {
        let was_accepting = self.admission.is_accepting();
        self.admission.stop().await?;

        if !self.is_ready().await {
            if was_accepting {
                self.admission.accept_connections().await;
            }
            return Err(SessionError::NotReady {
                have: self.registry.len().await,
                need: self.min_players(),
            });
        }

        info!("Starting game");

        let mut engine =
            TurnEngine::from_registry(Arc::clone(&self.registry), self.config.engine.clone()).await;
        engine.run().await
    }

    pub async fn list_participants(&self) -> Vec<PlayerId> {
        let ids = self.registry.ids().await;
        info!("{} participants connected", ids.len());
        for id in &ids {
            info!("Participant {}", id);
        }
        ids
    }

    /// Tells a participant it has been kicked, then evicts it.
    pub async fn kick(&self, id: PlayerId) -> Result<()> {
        let participant = match self.registry.get(id).await {
            Some(participant) => participant,
            None => {
                warn!("Participant {} does not exist", id);
                return Err(SessionError::UnknownPlayer(id));
            }
        };

        if let Err(e) = participant.channel.send(&Message::Kick).await {
            warn!("Failed to notify participant {}: {}", id, e);
        }
        self.registry.evict(id).await;
        info!("Participant {} kicked", id);
        Ok(())
    }
}
