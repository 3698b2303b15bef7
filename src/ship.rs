//! Ship records and the wire types built from them.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Fixed service port inside every ship container.
pub const SHIP_PORT: u16 = 8123;

/// State of a ship.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShipStatus {
    /// Container is up but the first health probe has not succeeded yet.
    Starting,
    Running,
    /// Terminal. A stopped ship's id is never reused.
    Stopped,
}

impl ShipStatus {
    /// Wire encoding: 0 = stopped, 1 = running, 2 = starting.
    pub fn as_i32(&self) -> i32 {
        match self {
            Self::Stopped => 0,
            Self::Running => 1,
            Self::Starting => 2,
        }
    }

    pub fn from_i32(v: i32) -> Self {
        match v {
            1 => Self::Running,
            2 => Self::Starting,
            _ => Self::Stopped,
        }
    }

    pub fn is_live(&self) -> bool {
        !matches!(self, Self::Stopped)
    }
}

impl std::fmt::Display for ShipStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Starting => write!(f, "starting"),
            Self::Running => write!(f, "running"),
            Self::Stopped => write!(f, "stopped"),
        }
    }
}

/// Resource hints passed to the container driver.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ShipSpec {
    /// CPU allocation, e.g. 1.5.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cpus: Option<f64>,
    /// Memory allocation as a size string, e.g. "512m", "1g".
    #[serde(skip_serializing_if = "Option::is_none")]
    pub memory: Option<String>,
}

impl ShipSpec {
    /// Whether a ship provisioned with `self` can serve a request asking
    /// for `requested` (equal or looser on every axis).
    pub fn covers(&self, requested: &ShipSpec) -> bool {
        let cpus_ok = match (self.cpus, requested.cpus) {
            (_, None) => true,
            (None, Some(_)) => false,
            (Some(have), Some(want)) => have >= want,
        };
        let memory_ok = match (
            self.memory.as_deref().map(parse_memory_size),
            requested.memory.as_deref().map(parse_memory_size),
        ) {
            (_, None) => true,
            (None, Some(_)) => false,
            (Some(Ok(have)), Some(Ok(want))) => have >= want,
            _ => false,
        };
        cpus_ok && memory_ok
    }
}

/// Parse a memory size string ("512m", "1g", "1024kb", bare bytes) to bytes.
pub fn parse_memory_size(s: &str) -> Result<i64, String> {
    let s = s.trim().to_ascii_lowercase();
    let (digits, multiplier) = if let Some(head) = s.strip_suffix("kb").or(s.strip_suffix('k')) {
        (head, 1024)
    } else if let Some(head) = s.strip_suffix("mb").or(s.strip_suffix('m')) {
        (head, 1024 * 1024)
    } else if let Some(head) = s.strip_suffix("gb").or(s.strip_suffix('g')) {
        (head, 1024 * 1024 * 1024)
    } else {
        (s.as_str(), 1)
    };
    let value: i64 = digits
        .trim()
        .parse()
        .map_err(|_| format!("invalid memory size: '{s}'"))?;
    if value <= 0 {
        return Err(format!("memory size must be positive: '{s}'"));
    }
    Ok(value * multiplier)
}

/// The central fleet entity.
#[derive(Debug, Clone)]
pub struct Ship {
    pub id: String,
    pub status: ShipStatus,
    /// Runtime's identifier; empty while allocating.
    pub container_id: String,
    /// Resolved after start; empty until the ship is reachable.
    pub ip_address: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    /// Current TTL budget in seconds.
    pub ttl: i64,
    /// `updated_at + ttl`; recomputed on extend.
    pub deadline: DateTime<Utc>,
    /// Upper bound on distinct sessions bound to this ship.
    pub max_session_num: u32,
    pub spec: ShipSpec,
}

impl Ship {
    pub fn new(ttl: i64, spec: ShipSpec, max_session_num: u32) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4().to_string(),
            status: ShipStatus::Starting,
            container_id: String::new(),
            ip_address: String::new(),
            created_at: now,
            updated_at: now,
            ttl,
            deadline: now + Duration::seconds(ttl),
            max_session_num,
            spec,
        }
    }

    /// Host:port of the ship's HTTP service, once an address is known.
    /// Bare IPs from the driver get the fixed ship port appended; an
    /// address that already carries a port is used as-is.
    pub fn address(&self) -> Option<String> {
        if self.ip_address.is_empty() {
            None
        } else if self.ip_address.contains(':') {
            Some(self.ip_address.clone())
        } else {
            Some(format!("{}:{}", self.ip_address, SHIP_PORT))
        }
    }
}

// -- API request/response types --

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CreateShipRequest {
    /// Time to live in seconds. Falls back to the configured default.
    pub ttl: Option<i64>,
    pub spec: Option<ShipSpec>,
    /// Maximum number of sessions that can share this ship.
    pub max_session_num: Option<i64>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ExtendTtlRequest {
    /// New TTL in seconds, measured from now.
    pub ttl: i64,
}

#[derive(Debug, Clone, Serialize)]
pub struct ShipResponse {
    pub id: String,
    pub status: i32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub container_id: String,
    pub ip_address: String,
    pub ttl: i64,
    pub max_session_num: u32,
    pub current_session_num: usize,
}

impl ShipResponse {
    pub fn from_ship(ship: &Ship, current_session_num: usize) -> Self {
        Self {
            id: ship.id.clone(),
            status: ship.status.as_i32(),
            created_at: ship.created_at,
            updated_at: ship.updated_at,
            container_id: ship.container_id.clone(),
            ip_address: ship.ip_address.clone(),
            ttl: ship.ttl,
            max_session_num: ship.max_session_num,
            current_session_num,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct LogsResponse {
    pub logs: String,
}
