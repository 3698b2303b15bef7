//! Persistence for ship records and session bindings.
//!
//! The scheduler's in-memory live-count is the authority while Bay runs;
//! the repository is the truth across restarts. All timestamps are stored
//! as epoch milliseconds.

pub mod memory;
pub mod sqlite;

use async_trait::async_trait;

use crate::error::RepositoryError;
use crate::ship::Ship;

pub use memory::InMemoryShipRepository;
pub use sqlite::SqliteShipRepository;

#[async_trait]
pub trait ShipRepository: Send + Sync {
    async fn insert(&self, ship: &Ship) -> Result<(), RepositoryError>;

    async fn get(&self, id: &str) -> Result<Option<Ship>, RepositoryError>;

    /// Persist the full record, keyed by id. Idempotent.
    async fn update(&self, ship: &Ship) -> Result<(), RepositoryError>;

    /// Ships with status != Stopped, oldest first.
    async fn list_live(&self) -> Result<Vec<Ship>, RepositoryError>;

    /// Every record, for recovery.
    async fn load_all(&self) -> Result<Vec<Ship>, RepositoryError>;

    /// Transition the record to Stopped and drop its bindings, atomically.
    async fn mark_stopped(&self, id: &str) -> Result<(), RepositoryError>;

    /// Durably record a session binding. Idempotent per session.
    async fn bind_session(&self, ship_id: &str, session_id: &str) -> Result<(), RepositoryError>;

    async fn unbind_session(&self, session_id: &str) -> Result<(), RepositoryError>;

    /// Drop every binding for a ship.
    async fn unbind_all(&self, ship_id: &str) -> Result<(), RepositoryError>;

    async fn sessions_for(&self, ship_id: &str) -> Result<Vec<String>, RepositoryError>;

    /// All (session_id, ship_id) pairs, for recovery.
    async fn load_bindings(&self) -> Result<Vec<(String, String)>, RepositoryError>;
}
