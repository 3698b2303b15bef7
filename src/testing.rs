//! Test doubles shared by unit tests and the integration suite.

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::health::{HealthProbe, ProbeError};

/// A health probe with a switchable verdict. Unhealthy probes fail fast
/// instead of burning the configured deadline.
#[derive(Default)]
pub struct StubProbe {
    healthy: AtomicBool,
}

impl StubProbe {
    pub fn healthy() -> Self {
        Self {
            healthy: AtomicBool::new(true),
        }
    }

    pub fn unhealthy() -> Self {
        Self {
            healthy: AtomicBool::new(false),
        }
    }

    pub fn set_healthy(&self, healthy: bool) {
        self.healthy.store(healthy, Ordering::SeqCst);
    }
}

#[async_trait]
impl HealthProbe for StubProbe {
    async fn wait_ready(
        &self,
        _address: &str,
        deadline: Duration,
        cancel: &CancellationToken,
    ) -> Result<(), ProbeError> {
        if cancel.is_cancelled() {
            return Err(ProbeError::Cancelled);
        }
        if self.healthy.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(ProbeError::Timeout { timeout: deadline })
        }
    }

    async fn check(&self, _address: &str) -> bool {
        self.healthy.load(Ordering::SeqCst)
    }
}
