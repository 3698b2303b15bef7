//! Bay: control plane for container-backed agent execution sandboxes.
//!
//! A Ship is an isolated container exposing code execution, shell, and
//! file I/O over HTTP. Bay schedules ships against a Docker-compatible
//! runtime, multiplexes them across caller sessions, enforces per-ship
//! TTLs, proxies operation calls upstream, and reconciles fleet state
//! across restarts.
//!
//! ```text
//! ┌──────────────────────────────────────────────────┐
//! │                      Bay                         │
//! │                                                  │
//! │  HTTP front (bearer auth)                        │
//! │    POST   /ship                                  │
//! │    GET    /ship/{id}        DELETE /ship/{id}    │
//! │    POST   /ship/{id}/exec/{oper_endpoint}        │
//! │    POST   /ship/{id}/extend-ttl                  │
//! │    GET    /ship/logs/{id}   GET /ships           │
//! │                                                  │
//! │  Scheduler ── admission, reuse, slot handoff     │
//! │  AffinityIndex ── session ⇄ ship, fan-out caps   │
//! │  TtlReaper ── deadline heap, expiry teardown     │
//! │  OperationRouter ── proxy to ship HTTP           │
//! │  ContainerDriver ── Docker via bollard           │
//! │  ShipRepository ── sqlite via sqlx               │
//! └──────────────────────────────────────────────────┘
//! ```

pub mod affinity;
pub mod config;
pub mod driver;
pub mod error;
pub mod health;
pub mod http;
pub mod proxy;
pub mod reaper;
pub mod recovery;
pub mod repository;
pub mod scheduler;
pub mod ship;
pub mod testing;

pub use config::BayConfig;
pub use error::BayError;
pub use scheduler::Scheduler;
pub use ship::{Ship, ShipSpec, ShipStatus};
