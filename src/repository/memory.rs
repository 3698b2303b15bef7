//! In-memory ship repository, for tests and ephemeral runs.

use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::error::RepositoryError;
use crate::repository::ShipRepository;
use crate::ship::{Ship, ShipStatus};

#[derive(Default)]
struct Inner {
    ships: HashMap<String, Ship>,
    /// session_id -> ship_id
    bindings: HashMap<String, String>,
}

#[derive(Default)]
pub struct InMemoryShipRepository {
    inner: RwLock<Inner>,
}

impl InMemoryShipRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ShipRepository for InMemoryShipRepository {
    async fn insert(&self, ship: &Ship) -> Result<(), RepositoryError> {
        let mut inner = self.inner.write().await;
        if inner.ships.contains_key(&ship.id) {
            return Err(RepositoryError::DuplicateKey {
                key: ship.id.clone(),
            });
        }
        inner.ships.insert(ship.id.clone(), ship.clone());
        Ok(())
    }

    async fn get(&self, id: &str) -> Result<Option<Ship>, RepositoryError> {
        Ok(self.inner.read().await.ships.get(id).cloned())
    }

    async fn update(&self, ship: &Ship) -> Result<(), RepositoryError> {
        self.inner
            .write()
            .await
            .ships
            .insert(ship.id.clone(), ship.clone());
        Ok(())
    }

    async fn list_live(&self) -> Result<Vec<Ship>, RepositoryError> {
        let inner = self.inner.read().await;
        let mut live: Vec<Ship> = inner
            .ships
            .values()
            .filter(|s| s.status.is_live())
            .cloned()
            .collect();
        live.sort_by_key(|s| s.created_at);
        Ok(live)
    }

    async fn load_all(&self) -> Result<Vec<Ship>, RepositoryError> {
        let inner = self.inner.read().await;
        let mut all: Vec<Ship> = inner.ships.values().cloned().collect();
        all.sort_by_key(|s| s.created_at);
        Ok(all)
    }

    async fn mark_stopped(&self, id: &str) -> Result<(), RepositoryError> {
        let mut inner = self.inner.write().await;
        if let Some(ship) = inner.ships.get_mut(id) {
            ship.status = ShipStatus::Stopped;
            ship.updated_at = chrono::Utc::now();
        }
        inner.bindings.retain(|_, ship_id| ship_id != id);
        Ok(())
    }

    async fn bind_session(&self, ship_id: &str, session_id: &str) -> Result<(), RepositoryError> {
        self.inner
            .write()
            .await
            .bindings
            .entry(session_id.to_string())
            .or_insert_with(|| ship_id.to_string());
        Ok(())
    }

    async fn unbind_session(&self, session_id: &str) -> Result<(), RepositoryError> {
        self.inner.write().await.bindings.remove(session_id);
        Ok(())
    }

    async fn unbind_all(&self, ship_id: &str) -> Result<(), RepositoryError> {
        self.inner
            .write()
            .await
            .bindings
            .retain(|_, bound| bound != ship_id);
        Ok(())
    }

    async fn sessions_for(&self, ship_id: &str) -> Result<Vec<String>, RepositoryError> {
        let inner = self.inner.read().await;
        Ok(inner
            .bindings
            .iter()
            .filter(|(_, bound)| *bound == ship_id)
            .map(|(session, _)| session.clone())
            .collect())
    }

    async fn load_bindings(&self) -> Result<Vec<(String, String)>, RepositoryError> {
        let inner = self.inner.read().await;
        Ok(inner
            .bindings
            .iter()
            .map(|(s, sh)| (s.clone(), sh.clone()))
            .collect())
    }
}
