//! Container driver abstraction.
//!
//! The driver is pure: it creates, starts, inspects, stops, and removes
//! ship containers and resolves their addresses, but holds no fleet state.
//! A bollard-backed Docker implementation is the production driver; tests
//! substitute [`fake::FakeDriver`].

pub mod docker;
pub mod fake;

use std::time::Duration;

use async_trait::async_trait;

use crate::error::DriverError;
use crate::ship::Ship;

pub use docker::DockerDriver;

/// Runtime view of a single container.
#[derive(Debug, Clone, Default)]
pub struct ContainerStatus {
    pub running: bool,
    pub ip_address: Option<String>,
}

/// Operations Bay needs from a Docker-compatible runtime.
#[async_trait]
pub trait ContainerDriver: Send + Sync {
    /// Create a container for the ship. Pulls the image if missing.
    /// Returns the runtime's container id.
    async fn create(&self, ship: &Ship) -> Result<String, DriverError>;

    /// Start the container and return an address reachable from Bay.
    async fn start(&self, container_id: &str) -> Result<String, DriverError>;

    /// Report whether the container is running and its current address.
    async fn inspect(&self, container_id: &str) -> Result<ContainerStatus, DriverError>;

    /// Recent stdout+stderr, capped to the last `tail_bytes`.
    async fn logs(&self, container_id: &str, tail_bytes: usize) -> Result<Vec<u8>, DriverError>;

    /// Graceful stop with the given grace period, then forceful.
    /// Stopping an already-gone container is not an error.
    async fn stop(&self, container_id: &str, grace: Duration) -> Result<(), DriverError>;

    /// Remove the container. Idempotent.
    async fn remove(&self, container_id: &str) -> Result<(), DriverError>;
}
