//! Session-to-ship affinity.
//!
//! In-memory maps under a single mutex, write-through to the repository so
//! recovery can rebuild bindings. The mutex guards map access only; the
//! durable write happens after it is released. Durable cleanup of a
//! stopping ship's bindings rides the record's stop transaction
//! (`ShipRepository::mark_stopped`), so [`AffinityIndex::unbind_ship`]
//! touches memory only.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use thiserror::Error;
use tokio::sync::Mutex;

use crate::error::{BayError, RepositoryError};
use crate::repository::ShipRepository;

#[derive(Debug, Error)]
pub enum AffinityError {
    #[error("ship {ship_id} is at its session cap")]
    SessionCapExceeded { ship_id: String },

    #[error("session {session_id} is bound to ship {other}")]
    BoundElsewhere { session_id: String, other: String },

    #[error(transparent)]
    Store(#[from] RepositoryError),
}

impl From<AffinityError> for BayError {
    fn from(e: AffinityError) -> Self {
        match e {
            AffinityError::SessionCapExceeded { ship_id } => BayError::CapacityExhausted {
                reason: format!("ship {ship_id} has no free session slots"),
            },
            AffinityError::BoundElsewhere { session_id, other } => BayError::IllegalState {
                ship_id: other,
                state: format!("already bound to session {session_id}"),
            },
            AffinityError::Store(e) => e.into(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BindOutcome {
    Bound,
    AlreadyBound,
}

#[derive(Default)]
struct Maps {
    by_session: HashMap<String, String>,
    by_ship: HashMap<String, HashSet<String>>,
}

pub struct AffinityIndex {
    maps: Mutex<Maps>,
    repo: Arc<dyn ShipRepository>,
}

impl AffinityIndex {
    pub fn new(repo: Arc<dyn ShipRepository>) -> Self {
        Self {
            maps: Mutex::new(Maps::default()),
            repo,
        }
    }

    /// Bind a session to a ship, enforcing the ship's session fan-out cap.
    ///
    /// Binding the same pair twice is a no-op; a session bound to a
    /// different ship is rejected (callers garbage-collect stopped-ship
    /// bindings via [`Self::unbind_session`] first).
    pub async fn bind(
        &self,
        session_id: &str,
        ship_id: &str,
        max_session_num: u32,
    ) -> Result<BindOutcome, AffinityError> {
        {
            let mut maps = self.maps.lock().await;
            match maps.by_session.get(session_id) {
                Some(bound) if bound == ship_id => return Ok(BindOutcome::AlreadyBound),
                Some(bound) => {
                    return Err(AffinityError::BoundElsewhere {
                        session_id: session_id.to_string(),
                        other: bound.clone(),
                    });
                }
                None => {}
            }

            let sessions = maps.by_ship.entry(ship_id.to_string()).or_default();
            if sessions.len() >= max_session_num as usize {
                return Err(AffinityError::SessionCapExceeded {
                    ship_id: ship_id.to_string(),
                });
            }
            sessions.insert(session_id.to_string());
            maps.by_session
                .insert(session_id.to_string(), ship_id.to_string());
        }

        // Write-through outside the lock; roll back the in-memory bind if
        // the store refuses it.
        if let Err(e) = self.repo.bind_session(ship_id, session_id).await {
            let mut maps = self.maps.lock().await;
            maps.by_session.remove(session_id);
            if let Some(sessions) = maps.by_ship.get_mut(ship_id) {
                sessions.remove(session_id);
            }
            return Err(AffinityError::Store(e));
        }

        Ok(BindOutcome::Bound)
    }

    pub async fn lookup(&self, session_id: &str) -> Option<String> {
        self.maps.lock().await.by_session.get(session_id).cloned()
    }

    pub async fn session_count(&self, ship_id: &str) -> usize {
        self.maps
            .lock()
            .await
            .by_ship
            .get(ship_id)
            .map(|s| s.len())
            .unwrap_or(0)
    }

    /// Remove one session's binding, in memory and durably.
    pub async fn unbind_session(&self, session_id: &str) -> Result<(), AffinityError> {
        let removed = {
            let mut maps = self.maps.lock().await;
            let removed = maps.by_session.remove(session_id);
            if let Some(ref ship_id) = removed
                && let Some(sessions) = maps.by_ship.get_mut(ship_id)
            {
                sessions.remove(session_id);
            }
            removed
        };
        if removed.is_some() {
            self.repo.unbind_session(session_id).await?;
        }
        Ok(())
    }

    /// Drop all in-memory bindings for a ship (stop path).
    pub async fn unbind_ship(&self, ship_id: &str) {
        let mut maps = self.maps.lock().await;
        if let Some(sessions) = maps.by_ship.remove(ship_id) {
            for session in sessions {
                maps.by_session.remove(&session);
            }
        }
    }

    /// Rebuild the maps from persisted bindings (recovery path).
    pub async fn restore(&self, bindings: &[(String, String)]) {
        let mut maps = self.maps.lock().await;
        maps.by_session.clear();
        maps.by_ship.clear();
        for (session_id, ship_id) in bindings {
            maps.by_session.insert(session_id.clone(), ship_id.clone());
            maps.by_ship
                .entry(ship_id.clone())
                .or_default()
                .insert(session_id.clone());
        }
    }
}
