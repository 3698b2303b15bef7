//! Configuration for Bay.
//!
//! Settings are loaded with priority: env var > default. `DATABASE_URL`
//! and friends live in `.env` (loaded via dotenvy early in startup).

pub(crate) mod helpers;

use std::time::Duration;

use crate::error::ConfigError;

use self::helpers::{optional_env, parse_optional_env, parse_string_env};

/// What the scheduler does when the fleet is at `max_ship_num`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OverflowPolicy {
    /// Fail the request with `CapacityExhausted`.
    Reject,
    /// Park the caller on a FIFO queue until a slot frees up.
    Wait,
}

impl OverflowPolicy {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Reject => "reject",
            Self::Wait => "wait",
        }
    }
}

impl std::str::FromStr for OverflowPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "reject" => Ok(Self::Reject),
            "wait" => Ok(Self::Wait),
            other => Err(format!("expected 'reject' or 'wait', got '{other}'")),
        }
    }
}

/// Main configuration for the Bay service.
#[derive(Debug, Clone)]
pub struct BayConfig {
    /// Address the HTTP front binds to.
    pub host: String,
    /// Port the HTTP front binds to.
    pub port: u16,
    /// Bearer token required on every `/ship` route.
    pub access_token: String,
    /// Upper bound on ships with status != Stopped.
    pub max_ship_num: usize,
    /// Back-pressure policy once the fleet is full.
    pub behavior_after_max_ship: OverflowPolicy,
    /// Database connection URL.
    pub database_url: String,
    /// Image ships are started from.
    pub docker_image: String,
    /// Docker network ships are attached to. Empty means the default bridge.
    pub docker_network: String,
    /// TTL applied when `POST /ship` omits one.
    pub default_ship_ttl: u64,
    /// Deadline for a ship's first successful health probe.
    pub health_check_timeout: Duration,
    /// Pause between health probe attempts.
    pub health_check_interval: Duration,
    /// Per-operation timeout when proxying to a ship.
    pub exec_timeout: Duration,
    /// How much of the container log tail `GET /ship/logs/{id}` returns.
    pub logs_tail_bytes: usize,
}

impl Default for BayConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8000,
            access_token: "secret-token".to_string(),
            max_ship_num: 10,
            behavior_after_max_ship: OverflowPolicy::Wait,
            database_url: "sqlite://bay.db?mode=rwc".to_string(),
            docker_image: "ship:latest".to_string(),
            docker_network: "shipyard".to_string(),
            default_ship_ttl: 3600,
            health_check_timeout: Duration::from_secs(60),
            health_check_interval: Duration::from_secs(2),
            exec_timeout: Duration::from_secs(30),
            logs_tail_bytes: 64 * 1024,
        }
    }
}

impl BayConfig {
    /// Resolve configuration from environment variables.
    pub fn resolve() -> Result<Self, ConfigError> {
        let defaults = Self::default();
        Ok(Self {
            host: parse_string_env("BAY_HOST", defaults.host)?,
            port: parse_optional_env("BAY_PORT", defaults.port)?,
            access_token: parse_string_env("ACCESS_TOKEN", defaults.access_token)?,
            max_ship_num: parse_optional_env("MAX_SHIP_NUM", defaults.max_ship_num)?,
            behavior_after_max_ship: parse_optional_env(
                "BEHAVIOR_AFTER_MAX_SHIP",
                defaults.behavior_after_max_ship,
            )?,
            database_url: parse_string_env("DATABASE_URL", defaults.database_url)?,
            docker_image: parse_string_env("DOCKER_IMAGE", defaults.docker_image)?,
            docker_network: optional_env("DOCKER_NETWORK")?.unwrap_or(defaults.docker_network),
            default_ship_ttl: parse_optional_env("DEFAULT_SHIP_TTL", defaults.default_ship_ttl)?,
            health_check_timeout: Duration::from_secs(parse_optional_env(
                "SHIP_HEALTH_CHECK_TIMEOUT",
                defaults.health_check_timeout.as_secs(),
            )?),
            health_check_interval: Duration::from_secs(parse_optional_env(
                "SHIP_HEALTH_CHECK_INTERVAL",
                defaults.health_check_interval.as_secs(),
            )?),
            exec_timeout: Duration::from_secs(parse_optional_env(
                "SHIP_EXEC_TIMEOUT",
                defaults.exec_timeout.as_secs(),
            )?),
            logs_tail_bytes: parse_optional_env("SHIP_LOGS_TAIL_BYTES", defaults.logs_tail_bytes)?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_values() {
        let config = BayConfig::default();
        assert_eq!(config.max_ship_num, 10);
        assert_eq!(config.behavior_after_max_ship, OverflowPolicy::Wait);
        assert_eq!(config.access_token, "secret-token");
        assert_eq!(config.health_check_timeout, Duration::from_secs(60));
        assert_eq!(config.health_check_interval, Duration::from_secs(2));
        assert_eq!(config.logs_tail_bytes, 64 * 1024);
    }

    #[test]
    fn overflow_policy_parses_both_values() {
        assert_eq!(
            "reject".parse::<OverflowPolicy>().unwrap(),
            OverflowPolicy::Reject
        );
        assert_eq!(
            "WAIT".parse::<OverflowPolicy>().unwrap(),
            OverflowPolicy::Wait
        );
        assert!("drop".parse::<OverflowPolicy>().is_err());
    }
}
