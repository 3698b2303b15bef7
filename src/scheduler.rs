//! Fleet scheduler and admission control.
//!
//! The scheduler owns the in-memory live-count (the runtime authority for
//! the fleet cap), the FIFO waiter queue for the `wait` overflow policy,
//! and the create/stop lifecycle shared by the HTTP front and the TTL
//! reaper. The capacity lock is held only for counting and queue
//! manipulation, never across container or repository I/O.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::{Mutex, oneshot};
use tokio_util::sync::CancellationToken;

use crate::affinity::{AffinityError, AffinityIndex};
use crate::config::{BayConfig, OverflowPolicy};
use crate::driver::ContainerDriver;
use crate::error::BayError;
use crate::health::HealthProbe;
use crate::reaper::ReaperHandle;
use crate::repository::ShipRepository;
use crate::ship::{CreateShipRequest, Ship, ShipSpec, ShipStatus, parse_memory_size};

/// Grace period for container stop before the runtime kills it.
const STOP_GRACE: Duration = Duration::from_secs(10);

/// Attempts at stopping a container before the record is stopped anyway
/// and the container id is surfaced for manual cleanup.
const STOP_RETRIES: u32 = 3;

#[derive(Default)]
struct CapacityState {
    live: usize,
    waiters: VecDeque<oneshot::Sender<()>>,
}

/// Validated `POST /ship` parameters.
#[derive(Debug, Clone)]
pub struct CreateParams {
    pub ttl: i64,
    pub spec: ShipSpec,
    pub max_session_num: u32,
}

pub struct Scheduler {
    config: BayConfig,
    driver: Arc<dyn ContainerDriver>,
    repo: Arc<dyn ShipRepository>,
    affinity: Arc<AffinityIndex>,
    prober: Arc<dyn HealthProbe>,
    reaper: Arc<ReaperHandle>,
    capacity: Mutex<CapacityState>,
}

impl Scheduler {
    pub fn new(
        config: BayConfig,
        driver: Arc<dyn ContainerDriver>,
        repo: Arc<dyn ShipRepository>,
        affinity: Arc<AffinityIndex>,
        prober: Arc<dyn HealthProbe>,
        reaper: Arc<ReaperHandle>,
    ) -> Self {
        Self {
            config,
            driver,
            repo,
            affinity,
            prober,
            reaper,
            capacity: Mutex::new(CapacityState::default()),
        }
    }

    pub fn config(&self) -> &BayConfig {
        &self.config
    }

    pub async fn live_count(&self) -> usize {
        self.capacity.lock().await.live
    }

    /// Seed the live-count from recovery.
    pub async fn set_live_count(&self, live: usize) {
        self.capacity.lock().await.live = live;
    }

    pub async fn session_count(&self, ship_id: &str) -> usize {
        self.affinity.session_count(ship_id).await
    }

    fn validate(&self, req: &CreateShipRequest) -> Result<CreateParams, BayError> {
        let ttl = req.ttl.unwrap_or(self.config.default_ship_ttl as i64);
        if ttl <= 0 {
            return Err(BayError::InvalidArgument {
                reason: format!("ttl must be positive, got {ttl}"),
            });
        }
        let max_session_num = req.max_session_num.unwrap_or(1);
        if max_session_num < 1 || max_session_num > u32::MAX as i64 {
            return Err(BayError::InvalidArgument {
                reason: format!("max_session_num out of range: {max_session_num}"),
            });
        }
        let spec = req.spec.clone().unwrap_or_default();
        if let Some(cpus) = spec.cpus
            && cpus <= 0.0
        {
            return Err(BayError::InvalidArgument {
                reason: format!("cpus must be positive, got {cpus}"),
            });
        }
        if let Some(ref memory) = spec.memory {
            parse_memory_size(memory)
                .map_err(|reason| BayError::InvalidArgument { reason })?;
        }
        Ok(CreateParams {
            ttl,
            spec,
            max_session_num: max_session_num as u32,
        })
    }

    /// Create a ship for `session_id`, or hand back one the session can
    /// already use (affinity first, then any running ship with free
    /// session slots and a matching-or-looser spec, oldest first).
    pub async fn create_ship(
        &self,
        session_id: &str,
        req: &CreateShipRequest,
        cancel: &CancellationToken,
    ) -> Result<Ship, BayError> {
        let params = self.validate(req)?;

        if let Some(existing) = self.acquire_for_session(session_id, &params.spec).await? {
            tracing::debug!(ship_id = %existing.id, session_id = %session_id, "Reusing ship for session");
            return Ok(existing);
        }

        self.reserve_slot(cancel).await?;
        self.allocate(session_id, params, cancel).await
    }

    /// The ship this session is bound to, or a reusable candidate with
    /// capacity; `None` when a fresh ship is needed.
    pub async fn acquire_for_session(
        &self,
        session_id: &str,
        requested: &ShipSpec,
    ) -> Result<Option<Ship>, BayError> {
        if let Some(ship_id) = self.affinity.lookup(session_id).await {
            match self.repo.get(&ship_id).await? {
                Some(ship) if ship.status == ShipStatus::Running => return Ok(Some(ship)),
                // Bound ship is stopped or gone: collect the stale binding.
                _ => {
                    self.affinity
                        .unbind_session(session_id)
                        .await
                        .map_err(BayError::from)?;
                }
            }
        }

        for ship in self.repo.list_live().await? {
            if ship.status != ShipStatus::Running || !ship.spec.covers(requested) {
                continue;
            }
            match self
                .affinity
                .bind(session_id, &ship.id, ship.max_session_num)
                .await
            {
                Ok(_) => return Ok(Some(ship)),
                Err(AffinityError::SessionCapExceeded { .. }) => continue,
                Err(AffinityError::BoundElsewhere { other, .. }) => {
                    // Lost a race against another bind for this session.
                    if let Some(bound) = self.repo.get(&other).await? {
                        return Ok(Some(bound));
                    }
                    continue;
                }
                Err(e) => return Err(e.into()),
            }
        }
        Ok(None)
    }

    /// Reserve a fleet slot, applying the overflow policy when full.
    async fn reserve_slot(&self, cancel: &CancellationToken) -> Result<(), BayError> {
        loop {
            let mut rx = {
                let mut cap = self.capacity.lock().await;
                if cap.live < self.config.max_ship_num {
                    cap.live += 1;
                    return Ok(());
                }
                match self.config.behavior_after_max_ship {
                    OverflowPolicy::Reject => {
                        return Err(BayError::CapacityExhausted {
                            reason: format!(
                                "fleet is at max_ship_num={}",
                                self.config.max_ship_num
                            ),
                        });
                    }
                    OverflowPolicy::Wait => {
                        let (tx, rx) = oneshot::channel();
                        cap.waiters.push_back(tx);
                        rx
                    }
                }
            };

            tokio::select! {
                _ = cancel.cancelled() => {
                    // The slot may have been handed over between the
                    // cancellation and our deregistration; pass it on.
                    if rx.try_recv().is_ok() {
                        self.release_slot().await;
                    }
                    return Err(BayError::DeadlineExceeded {
                        reason: "cancelled while waiting for a ship slot".to_string(),
                    });
                }
                handed = &mut rx => match handed {
                    // A releasing ship handed its slot straight to us.
                    Ok(()) => return Ok(()),
                    // Sender dropped without handing off; re-check capacity.
                    Err(_) => continue,
                },
            }
        }
    }

    /// Release one fleet slot: hand it to the first live waiter, FIFO,
    /// else decrement the live count.
    async fn release_slot(&self) {
        let mut cap = self.capacity.lock().await;
        while let Some(tx) = cap.waiters.pop_front() {
            if tx.send(()).is_ok() {
                return;
            }
        }
        cap.live = cap.live.saturating_sub(1);
    }

    /// Drive container creation through to a Running, session-bound record.
    /// The caller must hold a reserved slot; every failure path releases it.
    async fn allocate(
        &self,
        session_id: &str,
        params: CreateParams,
        cancel: &CancellationToken,
    ) -> Result<Ship, BayError> {
        let mut ship = Ship::new(params.ttl, params.spec, params.max_session_num);

        let container_id = match self.driver.create(&ship).await {
            Ok(id) => id,
            Err(e) => {
                self.release_slot().await;
                return Err(BayError::Unavailable {
                    reason: e.to_string(),
                });
            }
        };
        ship.container_id = container_id.clone();

        match self.driver.start(&container_id).await {
            Ok(ip) => ship.ip_address = ip,
            Err(e) => {
                self.cleanup_container(&container_id).await;
                self.release_slot().await;
                return Err(BayError::Unavailable {
                    reason: e.to_string(),
                });
            }
        }

        if let Err(e) = self.repo.insert(&ship).await {
            self.cleanup_container(&container_id).await;
            self.release_slot().await;
            return Err(e.into());
        }

        let address = match ship.address() {
            Some(address) => address,
            None => {
                self.fail_startup(&ship).await;
                return Err(BayError::StartupFailed {
                    ship_id: ship.id.clone(),
                    reason: "no address after start".to_string(),
                });
            }
        };

        if let Err(e) = self
            .prober
            .wait_ready(&address, self.config.health_check_timeout, cancel)
            .await
        {
            tracing::warn!(ship_id = %ship.id, error = %e, "Ship never became healthy");
            self.fail_startup(&ship).await;
            return Err(BayError::StartupFailed {
                ship_id: ship.id.clone(),
                reason: e.to_string(),
            });
        }

        ship.status = ShipStatus::Running;
        ship.updated_at = Utc::now();
        if let Err(e) = self.repo.update(&ship).await {
            self.fail_startup(&ship).await;
            return Err(e.into());
        }
        self.reaper.schedule(&ship.id, ship.deadline);

        if let Err(e) = self
            .affinity
            .bind(session_id, &ship.id, ship.max_session_num)
            .await
        {
            // The fresh ship has no other users; don't leak it.
            if let Err(stop_err) = self.stop_ship(&ship.id).await {
                tracing::error!(ship_id = %ship.id, error = %stop_err, "Failed to tear down unbindable ship");
            }
            return Err(e.into());
        }

        tracing::info!(
            ship_id = %ship.id,
            container_id = %ship.container_id,
            ip_address = %ship.ip_address,
            ttl = ship.ttl,
            "Created and started ship"
        );
        Ok(ship)
    }

    /// Startup failed after the record was inserted: tear down the
    /// container, stop the record, release the slot.
    async fn fail_startup(&self, ship: &Ship) {
        self.cleanup_container(&ship.container_id).await;
        if let Err(e) = self.repo.mark_stopped(&ship.id).await {
            tracing::error!(ship_id = %ship.id, error = %e, "Failed to mark failed ship stopped");
        }
        self.release_slot().await;
    }

    /// Best-effort stop+remove; failures are logged and swallowed.
    async fn cleanup_container(&self, container_id: &str) {
        if container_id.is_empty() {
            return;
        }
        if let Err(e) = self.driver.stop(container_id, STOP_GRACE).await {
            tracing::warn!(container_id = %container_id, error = %e, "Failed to stop container during cleanup");
        }
        if let Err(e) = self.driver.remove(container_id).await {
            tracing::warn!(container_id = %container_id, error = %e, "Failed to remove container during cleanup");
        }
    }

    /// Stop a ship: terminal record transition, unbind sessions, destroy
    /// the container, release the fleet slot. Idempotent for stopped
    /// ships; `NotFound` for unknown ids.
    pub async fn stop_ship(&self, ship_id: &str) -> Result<(), BayError> {
        let ship = self
            .repo
            .get(ship_id)
            .await?
            .ok_or_else(|| BayError::NotFound {
                ship_id: ship_id.to_string(),
            })?;
        if ship.status == ShipStatus::Stopped {
            return Ok(());
        }

        // Record first: a ship is dead once we say so, even if the runtime
        // drags its feet below.
        self.repo.mark_stopped(ship_id).await?;
        self.affinity.unbind_ship(ship_id).await;

        if !ship.container_id.is_empty() {
            let mut torn_down = false;
            for attempt in 1..=STOP_RETRIES {
                match self.teardown_container(&ship.container_id).await {
                    Ok(()) => {
                        torn_down = true;
                        break;
                    }
                    Err(e) => {
                        tracing::warn!(
                            ship_id = %ship_id,
                            container_id = %ship.container_id,
                            attempt,
                            error = %e,
                            "Container teardown attempt failed"
                        );
                        if attempt < STOP_RETRIES {
                            tokio::time::sleep(Duration::from_millis(500)).await;
                        }
                    }
                }
            }
            if !torn_down {
                tracing::error!(
                    ship_id = %ship_id,
                    container_id = %ship.container_id,
                    "Giving up on container teardown; manual cleanup required"
                );
            }
        }

        self.release_slot().await;
        tracing::info!(ship_id = %ship_id, "Ship stopped");
        Ok(())
    }

    async fn teardown_container(&self, container_id: &str) -> Result<(), crate::error::DriverError> {
        self.driver.stop(container_id, STOP_GRACE).await?;
        self.driver.remove(container_id).await
    }

    /// Reset the TTL budget: `deadline = now + ttl`.
    pub async fn extend_ttl(&self, ship_id: &str, ttl: i64) -> Result<Ship, BayError> {
        if ttl <= 0 {
            return Err(BayError::InvalidArgument {
                reason: format!("ttl must be positive, got {ttl}"),
            });
        }
        let mut ship = self
            .repo
            .get(ship_id)
            .await?
            .ok_or_else(|| BayError::NotFound {
                ship_id: ship_id.to_string(),
            })?;
        if ship.status == ShipStatus::Stopped {
            return Err(BayError::IllegalState {
                ship_id: ship_id.to_string(),
                state: ship.status.to_string(),
            });
        }

        let now = Utc::now();
        ship.ttl = ttl;
        ship.updated_at = now;
        ship.deadline = now + chrono::Duration::seconds(ttl);
        self.repo.update(&ship).await?;
        self.reaper.schedule(&ship.id, ship.deadline);
        tracing::info!(ship_id = %ship_id, ttl, "Ship TTL extended");
        Ok(ship)
    }

    pub async fn get_ship(&self, ship_id: &str) -> Result<Ship, BayError> {
        self.repo
            .get(ship_id)
            .await?
            .ok_or_else(|| BayError::NotFound {
                ship_id: ship_id.to_string(),
            })
    }

    pub async fn list_live(&self) -> Result<Vec<Ship>, BayError> {
        Ok(self.repo.list_live().await?)
    }

    /// Recent container logs for a ship, capped to the configured tail.
    pub async fn logs(&self, ship_id: &str) -> Result<String, BayError> {
        let ship = self.get_ship(ship_id).await?;
        if ship.container_id.is_empty() {
            return Ok(String::new());
        }
        let bytes = self
            .driver
            .logs(&ship.container_id, self.config.logs_tail_bytes)
            .await?;
        Ok(String::from_utf8_lossy(&bytes).into_owned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::driver::fake::FakeDriver;
    use crate::repository::InMemoryShipRepository;
    use crate::testing::StubProbe;

    struct Harness {
        scheduler: Arc<Scheduler>,
        driver: Arc<FakeDriver>,
        repo: Arc<InMemoryShipRepository>,
        probe: Arc<StubProbe>,
    }

    fn harness(config: BayConfig) -> Harness {
        let driver = Arc::new(FakeDriver::new());
        let repo = Arc::new(InMemoryShipRepository::new());
        let probe = Arc::new(StubProbe::healthy());
        let affinity = Arc::new(AffinityIndex::new(repo.clone() as Arc<dyn ShipRepository>));
        let scheduler = Arc::new(Scheduler::new(
            config,
            driver.clone(),
            repo.clone(),
            affinity,
            probe.clone(),
            Arc::new(ReaperHandle::new()),
        ));
        Harness {
            scheduler,
            driver,
            repo,
            probe,
        }
    }

    fn plain_request() -> CreateShipRequest {
        CreateShipRequest {
            ttl: Some(60),
            spec: None,
            max_session_num: None,
        }
    }

    fn shared_request(max_session_num: i64) -> CreateShipRequest {
        CreateShipRequest {
            ttl: Some(60),
            spec: None,
            max_session_num: Some(max_session_num),
        }
    }

    #[tokio::test]
    async fn create_ship_happy_path() {
        let h = harness(BayConfig::default());
        let cancel = CancellationToken::new();
        let ship = h
            .scheduler
            .create_ship("s1", &plain_request(), &cancel)
            .await
            .unwrap();

        assert_eq!(ship.status, ShipStatus::Running);
        assert!(!ship.container_id.is_empty());
        assert!(!ship.ip_address.is_empty());
        assert_eq!(h.scheduler.live_count().await, 1);
        assert_eq!(h.scheduler.session_count(&ship.id).await, 1);
        assert!(h.driver.is_running(&ship.container_id));

        let persisted = h.repo.get(&ship.id).await.unwrap().unwrap();
        assert_eq!(persisted.status, ShipStatus::Running);
        assert_eq!(persisted.ip_address, ship.ip_address);
    }

    #[tokio::test]
    async fn create_validates_arguments() {
        let h = harness(BayConfig::default());
        let cancel = CancellationToken::new();

        let bad_ttl = CreateShipRequest {
            ttl: Some(0),
            spec: None,
            max_session_num: None,
        };
        assert!(matches!(
            h.scheduler.create_ship("s1", &bad_ttl, &cancel).await,
            Err(BayError::InvalidArgument { .. })
        ));

        let bad_sessions = CreateShipRequest {
            ttl: Some(10),
            spec: None,
            max_session_num: Some(0),
        };
        assert!(matches!(
            h.scheduler.create_ship("s1", &bad_sessions, &cancel).await,
            Err(BayError::InvalidArgument { .. })
        ));

        let bad_memory = CreateShipRequest {
            ttl: Some(10),
            spec: Some(ShipSpec {
                cpus: None,
                memory: Some("plenty".into()),
            }),
            max_session_num: None,
        };
        assert!(matches!(
            h.scheduler.create_ship("s1", &bad_memory, &cancel).await,
            Err(BayError::InvalidArgument { .. })
        ));
    }

    #[tokio::test]
    async fn reject_policy_saturation() {
        let config = BayConfig {
            max_ship_num: 1,
            behavior_after_max_ship: OverflowPolicy::Reject,
            ..BayConfig::default()
        };
        let h = harness(config);
        let cancel = CancellationToken::new();

        let a = h
            .scheduler
            .create_ship("s1", &plain_request(), &cancel)
            .await
            .unwrap();
        let err = h
            .scheduler
            .create_ship("s2", &plain_request(), &cancel)
            .await
            .unwrap_err();
        assert!(matches!(err, BayError::CapacityExhausted { .. }));

        h.scheduler.stop_ship(&a.id).await.unwrap();
        assert_eq!(h.scheduler.live_count().await, 0);

        h.scheduler
            .create_ship("s2", &plain_request(), &cancel)
            .await
            .expect("slot freed after delete");
    }

    #[tokio::test(start_paused = true)]
    async fn wait_policy_hands_slots_fifo() {
        let config = BayConfig {
            max_ship_num: 1,
            behavior_after_max_ship: OverflowPolicy::Wait,
            ..BayConfig::default()
        };
        let h = harness(config);
        let cancel = CancellationToken::new();

        let a = h
            .scheduler
            .create_ship("s1", &plain_request(), &cancel)
            .await
            .unwrap();

        let sched_b = h.scheduler.clone();
        let waiter_b = tokio::spawn(async move {
            sched_b
                .create_ship("s2", &plain_request(), &CancellationToken::new())
                .await
        });
        tokio::time::sleep(Duration::from_millis(10)).await;

        let sched_c = h.scheduler.clone();
        let waiter_c = tokio::spawn(async move {
            sched_c
                .create_ship("s3", &plain_request(), &CancellationToken::new())
                .await
        });
        tokio::time::sleep(Duration::from_millis(10)).await;

        assert!(!waiter_b.is_finished());
        assert!(!waiter_c.is_finished());

        // First release goes to the first waiter.
        h.scheduler.stop_ship(&a.id).await.unwrap();
        let b = waiter_b.await.unwrap().expect("first waiter admitted");
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(!waiter_c.is_finished());

        h.scheduler.stop_ship(&b.id).await.unwrap();
        waiter_c.await.unwrap().expect("second waiter admitted");
        assert_eq!(h.scheduler.live_count().await, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn cancelled_waiter_deregisters() {
        let config = BayConfig {
            max_ship_num: 1,
            behavior_after_max_ship: OverflowPolicy::Wait,
            ..BayConfig::default()
        };
        let h = harness(config);
        let cancel = CancellationToken::new();

        let a = h
            .scheduler
            .create_ship("s1", &plain_request(), &cancel)
            .await
            .unwrap();

        let waiter_cancel = CancellationToken::new();
        let sched_b = h.scheduler.clone();
        let token_b = waiter_cancel.clone();
        let waiter_b = tokio::spawn(async move {
            sched_b.create_ship("s2", &plain_request(), &token_b).await
        });
        tokio::time::sleep(Duration::from_millis(10)).await;

        waiter_cancel.cancel();
        let err = waiter_b.await.unwrap().unwrap_err();
        assert!(matches!(err, BayError::DeadlineExceeded { .. }));

        // The abandoned waiter must not swallow the released slot.
        h.scheduler.stop_ship(&a.id).await.unwrap();
        h.scheduler
            .create_ship("s3", &plain_request(), &cancel)
            .await
            .expect("slot available after cancelled waiter");
    }

    #[tokio::test]
    async fn create_failure_releases_slot() {
        let config = BayConfig {
            max_ship_num: 1,
            behavior_after_max_ship: OverflowPolicy::Reject,
            ..BayConfig::default()
        };
        let h = harness(config);
        let cancel = CancellationToken::new();

        h.driver.set_fail_create(true);
        let err = h
            .scheduler
            .create_ship("s1", &plain_request(), &cancel)
            .await
            .unwrap_err();
        assert!(matches!(err, BayError::Unavailable { .. }));
        assert_eq!(h.scheduler.live_count().await, 0);

        h.driver.set_fail_create(false);
        h.scheduler
            .create_ship("s1", &plain_request(), &cancel)
            .await
            .expect("slot not leaked by failed create");
    }

    #[tokio::test]
    async fn startup_failure_leaves_no_running_record() {
        let h = harness(BayConfig::default());
        let cancel = CancellationToken::new();

        h.probe.set_healthy(false);
        let err = h
            .scheduler
            .create_ship("s1", &plain_request(), &cancel)
            .await
            .unwrap_err();
        assert!(matches!(err, BayError::StartupFailed { .. }));
        assert_eq!(h.scheduler.live_count().await, 0);
        assert_eq!(h.driver.container_count(), 0);
        assert!(h.repo.list_live().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn bound_session_gets_its_ship_back() {
        let h = harness(BayConfig::default());
        let cancel = CancellationToken::new();

        let first = h
            .scheduler
            .create_ship("s1", &plain_request(), &cancel)
            .await
            .unwrap();
        let second = h
            .scheduler
            .create_ship("s1", &plain_request(), &cancel)
            .await
            .unwrap();
        assert_eq!(first.id, second.id);
        assert_eq!(h.scheduler.live_count().await, 1);
    }

    #[tokio::test]
    async fn new_session_reuses_ship_with_free_slots() {
        let h = harness(BayConfig::default());
        let cancel = CancellationToken::new();

        let a = h
            .scheduler
            .create_ship("s1", &shared_request(2), &cancel)
            .await
            .unwrap();
        let b = h
            .scheduler
            .create_ship("s2", &plain_request(), &cancel)
            .await
            .unwrap();
        assert_eq!(a.id, b.id);
        assert_eq!(h.scheduler.session_count(&a.id).await, 2);
        assert_eq!(h.driver.container_count(), 1);

        // Fan-out cap reached: the next session gets a fresh ship.
        let c = h
            .scheduler
            .create_ship("s3", &plain_request(), &cancel)
            .await
            .unwrap();
        assert_ne!(a.id, c.id);
        assert_eq!(h.driver.container_count(), 2);
    }

    #[tokio::test]
    async fn candidate_must_cover_requested_spec() {
        let h = harness(BayConfig::default());
        let cancel = CancellationToken::new();

        let a = h
            .scheduler
            .create_ship("s1", &shared_request(4), &cancel)
            .await
            .unwrap();

        let demanding = CreateShipRequest {
            ttl: Some(60),
            spec: Some(ShipSpec {
                cpus: Some(2.0),
                memory: None,
            }),
            max_session_num: None,
        };
        let b = h
            .scheduler
            .create_ship("s2", &demanding, &cancel)
            .await
            .unwrap();
        assert_ne!(a.id, b.id);
    }

    #[tokio::test]
    async fn extend_ttl_moves_the_deadline() {
        let h = harness(BayConfig::default());
        let cancel = CancellationToken::new();

        let ship = h
            .scheduler
            .create_ship("s1", &plain_request(), &cancel)
            .await
            .unwrap();
        let extended = h.scheduler.extend_ttl(&ship.id, 600).await.unwrap();
        assert!(extended.deadline > ship.deadline);
        assert_eq!(extended.ttl, 600);

        assert!(matches!(
            h.scheduler.extend_ttl(&ship.id, 0).await,
            Err(BayError::InvalidArgument { .. })
        ));
        assert!(matches!(
            h.scheduler.extend_ttl("missing", 10).await,
            Err(BayError::NotFound { .. })
        ));

        h.scheduler.stop_ship(&ship.id).await.unwrap();
        assert!(matches!(
            h.scheduler.extend_ttl(&ship.id, 10).await,
            Err(BayError::IllegalState { .. })
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn stop_exhausts_retries_but_record_is_terminal() {
        let h = harness(BayConfig::default());
        let cancel = CancellationToken::new();

        let ship = h
            .scheduler
            .create_ship("s1", &plain_request(), &cancel)
            .await
            .unwrap();
        h.driver.set_stop_failures(10);

        h.scheduler.stop_ship(&ship.id).await.unwrap();
        let record = h.repo.get(&ship.id).await.unwrap().unwrap();
        assert_eq!(record.status, ShipStatus::Stopped);
        assert_eq!(h.scheduler.live_count().await, 0);
        assert_eq!(h.scheduler.session_count(&ship.id).await, 0);
    }

    #[tokio::test]
    async fn stop_is_idempotent_and_missing_is_not_found() {
        let h = harness(BayConfig::default());
        let cancel = CancellationToken::new();

        let ship = h
            .scheduler
            .create_ship("s1", &plain_request(), &cancel)
            .await
            .unwrap();
        h.scheduler.stop_ship(&ship.id).await.unwrap();
        h.scheduler.stop_ship(&ship.id).await.unwrap();
        assert!(matches!(
            h.scheduler.stop_ship("missing").await,
            Err(BayError::NotFound { .. })
        ));
    }
}
