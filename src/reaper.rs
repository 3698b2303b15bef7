//! TTL reaper.
//!
//! A single background task driven by the monotonic clock. Deadlines live
//! in a min-heap; `ReaperHandle::schedule` re-arms the loop through a
//! `Notify`. Each popped entry is re-verified against the repository
//! before anything is destroyed, so extensions and stale heap entries are
//! handled without coordination: an entry whose recorded deadline moved is
//! simply dropped (the extension scheduled its own entry).

use std::cmp::Reverse;
use std::collections::BinaryHeap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::Notify;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::repository::ShipRepository;
use crate::scheduler::Scheduler;
use crate::ship::ShipStatus;

/// Heap entry: monotonic fire target plus the wall-clock deadline snapshot
/// it was derived from.
type Entry = Reverse<(Instant, i64, String)>;

#[derive(Default)]
pub struct ReaperHandle {
    queue: std::sync::Mutex<BinaryHeap<Entry>>,
    notify: Notify,
}

impl ReaperHandle {
    pub fn new() -> Self {
        Self::default()
    }

    /// Track a (possibly updated) deadline for a ship.
    pub fn schedule(&self, ship_id: &str, deadline: DateTime<Utc>) {
        let delta = (deadline - Utc::now())
            .to_std()
            .unwrap_or(Duration::ZERO);
        let target = Instant::now() + delta;
        self.queue.lock().unwrap().push(Reverse((
            target,
            deadline.timestamp_millis(),
            ship_id.to_string(),
        )));
        self.notify.notify_one();
    }

    fn next_target(&self) -> Option<Instant> {
        self.queue
            .lock()
            .unwrap()
            .peek()
            .map(|Reverse((target, _, _))| *target)
    }

    fn pop_due(&self, now: Instant) -> Option<(i64, String)> {
        let mut queue = self.queue.lock().unwrap();
        match queue.peek() {
            Some(Reverse((target, _, _))) if *target <= now => {
                let Reverse((_, snapshot_ms, ship_id)) = queue.pop().unwrap();
                Some((snapshot_ms, ship_id))
            }
            _ => None,
        }
    }
}

pub struct TtlReaper {
    scheduler: Arc<Scheduler>,
    repo: Arc<dyn ShipRepository>,
    handle: Arc<ReaperHandle>,
}

impl TtlReaper {
    pub fn new(
        scheduler: Arc<Scheduler>,
        repo: Arc<dyn ShipRepository>,
        handle: Arc<ReaperHandle>,
    ) -> Self {
        Self {
            scheduler,
            repo,
            handle,
        }
    }

    /// Run until cancelled.
    pub async fn run(self, cancel: CancellationToken) {
        tracing::debug!("TTL reaper started");
        loop {
            let next = self.handle.next_target();
            let target = next.unwrap_or_else(|| Instant::now() + Duration::from_secs(3600));
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = self.handle.notify.notified() => {}
                _ = tokio::time::sleep_until(target), if next.is_some() => {
                    self.sweep().await;
                }
            }
        }
        tracing::debug!("TTL reaper stopped");
    }

    /// Handle every entry whose fire target has passed.
    async fn sweep(&self) {
        let now = Instant::now();
        while let Some((snapshot_ms, ship_id)) = self.handle.pop_due(now) {
            let ship = match self.repo.get(&ship_id).await {
                Ok(Some(ship)) => ship,
                Ok(None) => continue,
                Err(e) => {
                    tracing::error!(ship_id = %ship_id, error = %e, "Reaper failed to load ship");
                    continue;
                }
            };
            if ship.status == ShipStatus::Stopped {
                continue;
            }
            // Deadline moved since this entry was armed: the extension
            // scheduled a fresh entry, drop this one.
            if ship.deadline.timestamp_millis() > snapshot_ms {
                continue;
            }

            tracing::info!(ship_id = %ship_id, ttl = ship.ttl, "Ship TTL expired, destroying");
            if let Err(e) = self.scheduler.stop_ship(&ship_id).await {
                tracing::error!(ship_id = %ship_id, error = %e, "Failed to destroy expired ship");
            }
        }
    }
}
