//! In-process driver used by tests.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

use crate::driver::{ContainerDriver, ContainerStatus};
use crate::error::DriverError;
use crate::ship::Ship;

#[derive(Debug, Clone)]
pub struct FakeContainer {
    pub running: bool,
    pub address: String,
    pub logs: Vec<u8>,
}

#[derive(Default)]
struct Inner {
    containers: HashMap<String, FakeContainer>,
    next_id: u64,
    /// Address handed to the next started container. Defaults to a
    /// synthetic bridge IP.
    next_address: Option<String>,
    fail_create: bool,
    /// Number of upcoming `stop` calls that fail.
    stop_failures: u32,
}

/// A driver backed by an in-memory container table, with failure injection
/// for create and stop paths.
#[derive(Default)]
pub struct FakeDriver {
    inner: Mutex<Inner>,
}

impl FakeDriver {
    pub fn new() -> Self {
        Self::default()
    }

    /// The next started container reports this address.
    pub fn set_next_address(&self, address: impl Into<String>) {
        self.inner.lock().unwrap().next_address = Some(address.into());
    }

    pub fn set_fail_create(&self, fail: bool) {
        self.inner.lock().unwrap().fail_create = fail;
    }

    pub fn set_stop_failures(&self, n: u32) {
        self.inner.lock().unwrap().stop_failures = n;
    }

    /// Simulate the container dying (or being removed) out from under Bay.
    pub fn kill(&self, container_id: &str) {
        let mut inner = self.inner.lock().unwrap();
        inner.containers.remove(container_id);
    }

    pub fn push_logs(&self, container_id: &str, bytes: &[u8]) {
        let mut inner = self.inner.lock().unwrap();
        if let Some(c) = inner.containers.get_mut(container_id) {
            c.logs.extend_from_slice(bytes);
        }
    }

    pub fn container_count(&self) -> usize {
        self.inner.lock().unwrap().containers.len()
    }

    pub fn is_running(&self, container_id: &str) -> bool {
        self.inner
            .lock()
            .unwrap()
            .containers
            .get(container_id)
            .map(|c| c.running)
            .unwrap_or(false)
    }
}

#[async_trait::async_trait]
impl ContainerDriver for FakeDriver {
    async fn create(&self, ship: &Ship) -> Result<String, DriverError> {
        let mut inner = self.inner.lock().unwrap();
        if inner.fail_create {
            return Err(DriverError::BackendUnavailable {
                reason: "injected create failure".to_string(),
            });
        }
        inner.next_id += 1;
        let container_id = format!("fake-{}-{}", inner.next_id, ship.id);
        let address = inner
            .next_address
            .take()
            .unwrap_or_else(|| format!("10.0.0.{}", inner.next_id));
        inner.containers.insert(
            container_id.clone(),
            FakeContainer {
                running: false,
                address,
                logs: Vec::new(),
            },
        );
        Ok(container_id)
    }

    async fn start(&self, container_id: &str) -> Result<String, DriverError> {
        let mut inner = self.inner.lock().unwrap();
        let container =
            inner
                .containers
                .get_mut(container_id)
                .ok_or_else(|| DriverError::NotFound {
                    container_id: container_id.to_string(),
                })?;
        container.running = true;
        Ok(container.address.clone())
    }

    async fn inspect(&self, container_id: &str) -> Result<ContainerStatus, DriverError> {
        let inner = self.inner.lock().unwrap();
        match inner.containers.get(container_id) {
            Some(c) => Ok(ContainerStatus {
                running: c.running,
                ip_address: Some(c.address.clone()),
            }),
            None => Err(DriverError::NotFound {
                container_id: container_id.to_string(),
            }),
        }
    }

    async fn logs(&self, container_id: &str, tail_bytes: usize) -> Result<Vec<u8>, DriverError> {
        let inner = self.inner.lock().unwrap();
        let container =
            inner
                .containers
                .get(container_id)
                .ok_or_else(|| DriverError::NotFound {
                    container_id: container_id.to_string(),
                })?;
        let logs = &container.logs;
        let start = logs.len().saturating_sub(tail_bytes);
        Ok(logs[start..].to_vec())
    }

    async fn stop(&self, container_id: &str, _grace: Duration) -> Result<(), DriverError> {
        let mut inner = self.inner.lock().unwrap();
        if inner.stop_failures > 0 {
            inner.stop_failures -= 1;
            return Err(DriverError::BackendUnavailable {
                reason: "injected stop failure".to_string(),
            });
        }
        if let Some(c) = inner.containers.get_mut(container_id) {
            c.running = false;
        }
        Ok(())
    }

    async fn remove(&self, container_id: &str) -> Result<(), DriverError> {
        let mut inner = self.inner.lock().unwrap();
        inner.containers.remove(container_id);
        Ok(())
    }
}
