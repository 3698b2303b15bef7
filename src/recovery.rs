//! Boot-time reconciliation of persisted records against live containers.
//!
//! Runs once before the HTTP front comes up. The waiter queue is not
//! persisted; callers that were parked before a crash must retry.

use std::sync::Arc;

use crate::affinity::AffinityIndex;
use crate::driver::ContainerDriver;
use crate::error::BayError;
use crate::health::HealthProbe;
use crate::reaper::ReaperHandle;
use crate::repository::ShipRepository;
use crate::ship::{Ship, ShipStatus};

#[derive(Debug, Default, Clone, Copy)]
pub struct RecoveryReport {
    /// Ships restored to Running. Seeds the scheduler's live-count.
    pub restored: usize,
    /// Ships whose containers were gone or unhealthy.
    pub stopped: usize,
}

pub async fn recover(
    repo: Arc<dyn ShipRepository>,
    driver: Arc<dyn ContainerDriver>,
    affinity: Arc<AffinityIndex>,
    prober: Arc<dyn HealthProbe>,
    reaper: Arc<ReaperHandle>,
) -> Result<RecoveryReport, BayError> {
    let mut report = RecoveryReport::default();
    let mut surviving: Vec<String> = Vec::new();

    for ship in repo.load_all().await? {
        if ship.status == ShipStatus::Stopped {
            continue;
        }
        if reconcile_ship(&repo, &driver, &prober, &reaper, ship).await? {
            report.restored += 1;
        } else {
            report.stopped += 1;
        }
    }

    // Rebuild affinity from the bindings of surviving ships. Bindings of
    // ships stopped above were already dropped by their stop transaction.
    for ship in repo.list_live().await? {
        surviving.push(ship.id);
    }
    let bindings: Vec<(String, String)> = repo
        .load_bindings()
        .await?
        .into_iter()
        .filter(|(_, ship_id)| surviving.contains(ship_id))
        .collect();
    affinity.restore(&bindings).await;

    tracing::info!(
        restored = report.restored,
        stopped = report.stopped,
        bindings = bindings.len(),
        "Recovery complete"
    );
    Ok(report)
}

/// Returns true when the ship was restored to Running.
async fn reconcile_ship(
    repo: &Arc<dyn ShipRepository>,
    driver: &Arc<dyn ContainerDriver>,
    prober: &Arc<dyn HealthProbe>,
    reaper: &Arc<ReaperHandle>,
    mut ship: Ship,
) -> Result<bool, BayError> {
    let status = if ship.container_id.is_empty() {
        None
    } else {
        driver.inspect(&ship.container_id).await.ok()
    };

    let healthy = match status {
        Some(ref s) if s.running => {
            if ship.ip_address.is_empty()
                && let Some(ref ip) = s.ip_address
            {
                ship.ip_address = ip.clone();
            }
            match ship.address() {
                Some(address) => prober.check(&address).await,
                None => false,
            }
        }
        _ => false,
    };

    if healthy {
        ship.status = ShipStatus::Running;
        ship.updated_at = chrono::Utc::now();
        repo.update(&ship).await?;
        reaper.schedule(&ship.id, ship.deadline);
        tracing::info!(ship_id = %ship.id, "Restored running ship");
        return Ok(true);
    }

    tracing::warn!(
        ship_id = %ship.id,
        container_id = %ship.container_id,
        "Container missing or unhealthy, stopping record"
    );
    repo.mark_stopped(&ship.id).await?;
    if !ship.container_id.is_empty()
        && let Err(e) = driver.remove(&ship.container_id).await
    {
        tracing::warn!(
            container_id = %ship.container_id,
            error = %e,
            "Failed to remove dead container during recovery"
        );
    }
    Ok(false)
}
