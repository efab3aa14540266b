//! # Session Registry
//!
//! Maps connection ids to live agents. A session exists from the moment its connection
//! is accepted until the connection goes away; nothing is kept afterwards.
//!
//! ## Invariants:
//! - At most `max_sessions` entries, counting slots whose agent is still being built
//! - Agents are built outside the registry lock; only the reservation and the insert hold it
//! - Every id is a fresh uuid v4, so a closed session can never be resurrected
//! - Each agent sits behind its own `tokio::sync::Mutex`, so turns of one session run one at
//!   a time while different sessions never wait on each other

use crate::pipeline::PipelineAgent;
use anyhow::{anyhow, Result};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use uuid::Uuid;

pub type SharedAgent = Arc<tokio::sync::Mutex<PipelineAgent>>;

#[derive(Default)]
struct Sessions {
    live: HashMap<String, SharedAgent>,
    pending: usize,
}

pub struct SessionRegistry {
    max_sessions: usize,
    sessions: Mutex<Sessions>,
}

/// A capacity slot held while an agent is built. Released on drop unless committed.
struct Reservation<'a> {
    registry: &'a SessionRegistry,
    committed: bool,
}

impl Reservation<'_> {
    fn commit(mut self, id: String, agent: SharedAgent) -> usize {
        let mut sessions = self.registry.sessions();
        sessions.pending -= 1;
        sessions.live.insert(id, agent);
        self.committed = true;
        sessions.live.len()
    }
}

impl Drop for Reservation<'_> {
    fn drop(&mut self) {
        if !self.committed {
            self.registry.sessions().pending -= 1;
        }
    }
}

impl SessionRegistry {
    pub fn new(max_sessions: usize) -> Self {
        Self {
            max_sessions,
            sessions: Mutex::new(Sessions::default()),
        }
    }

    fn sessions(&self) -> MutexGuard<'_, Sessions> {
        // entries stay consistent even if a holder panicked
        self.sessions.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn reserve(&self) -> Result<Reservation<'_>> {
        let mut sessions = self.sessions();
        if sessions.live.len() + sessions.pending >= self.max_sessions {
            return Err(anyhow!(
                "Server is at capacity ({} concurrent sessions)",
                self.max_sessions
            ));
        }
        sessions.pending += 1;
        Ok(Reservation {
            registry: self,
            committed: false,
        })
    }

    /// Allocate an id, build its agent with `build` and register it.
    ///
    /// Fails without calling `build` when the registry is full.
    pub fn open<F>(&self, build: F) -> Result<(String, SharedAgent)>
    where
        F: FnOnce(&str) -> Result<PipelineAgent>,
    {
        let reservation = self.reserve()?;

        let id = Uuid::new_v4().to_string();
        let agent = Arc::new(tokio::sync::Mutex::new(build(id.as_str())?));
        let active = reservation.commit(id.clone(), Arc::clone(&agent));

        tracing::info!(connection_id = %id, active, "Session opened");
        Ok((id, agent))
    }

    /// Drop a session. Returns whether it was registered.
    pub fn remove(&self, id: &str) -> bool {
        let mut sessions = self.sessions();
        let removed = sessions.live.remove(id).is_some();
        if removed {
            tracing::info!(connection_id = %id, active = sessions.live.len(), "Session closed");
        }
        removed
    }

    pub fn count(&self) -> usize {
        self.sessions().live.len()
    }

    pub fn capacity(&self) -> usize {
        self.max_sessions
    }
}
