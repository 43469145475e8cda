//! Runtime configuration — environment-driven, no config-file framework.
//! A typed config struct with explicit defaults, parsed directly from
//! env vars rather than through a settings crate.

use std::env;
use std::time::Duration;

use crate::driver::Consistency;
use crate::error::{Result, StoreError};

const DEFAULT_CONTACT_POINT: &str = "127.0.0.1:9042";
const DEFAULT_RECONNECT_INTERVAL_MS: u64 = 500;

/// Connection and behavior knobs for a live `StorageEngine`.
#[derive(Debug, Clone)]
pub struct StoreConfig {
    pub contact_points: Vec<String>,
    pub default_consistency: Consistency,
    pub reconnect_interval_ms: u64,
    /// Overrides the derived keyspace name entirely; set by deployments
    /// that pin a fixed keyspace rather than deriving one per (domain,
    /// table) pair.
    pub keyspace_override: Option<String>,
}

impl StoreConfig {
    /// Load from `RASHOMON_*` environment variables, falling back to
    /// single-node localhost defaults suitable for local development
    /// against a real cluster (tests use [`crate::driver::fake::FakeCqlDriver`]
    /// and never touch this path).
    pub fn from_env() -> Result<Self> {
        let contact_points = match env::var("RASHOMON_CONTACT_POINTS") {
            Ok(raw) => raw.split(',').map(|s| s.trim().to_string()).filter(|s| !s.is_empty()).collect(),
            Err(_) => vec![DEFAULT_CONTACT_POINT.to_string()],
        };

        let default_consistency = match env::var("RASHOMON_CONSISTENCY") {
            Ok(raw) => parse_consistency(&raw)?,
            Err(_) => Consistency::One,
        };

        let reconnect_interval_ms = match env::var("RASHOMON_RECONNECT_INTERVAL_MS") {
            Ok(raw) => raw
                .parse()
                .map_err(|_| StoreError::InvalidSchema(format!("invalid RASHOMON_RECONNECT_INTERVAL_MS: {raw}")))?,
            Err(_) => DEFAULT_RECONNECT_INTERVAL_MS,
        };

        let keyspace_override = env::var("RASHOMON_KEYSPACE_OVERRIDE").ok();

        Ok(StoreConfig {
            contact_points,
            default_consistency,
            reconnect_interval_ms,
            keyspace_override,
        })
    }

    pub fn reconnect_interval(&self) -> Duration {
        Duration::from_millis(self.reconnect_interval_ms)
    }
}

impl Default for StoreConfig {
    fn default() -> Self {
        StoreConfig {
            contact_points: vec![DEFAULT_CONTACT_POINT.to_string()],
            default_consistency: Consistency::One,
            reconnect_interval_ms: DEFAULT_RECONNECT_INTERVAL_MS,
            keyspace_override: None,
        }
    }
}

fn parse_consistency(raw: &str) -> Result<Consistency> {
    match raw {
        "one" => Ok(Consistency::One),
        "all" => Ok(Consistency::All),
        "localQuorum" => Ok(Consistency::LocalQuorum),
        other => Err(StoreError::InvalidQuery(format!("unknown consistency level: {other}"))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_targets_localhost() {
        let config = StoreConfig::default();
        assert_eq!(config.contact_points, vec![DEFAULT_CONTACT_POINT.to_string()]);
        assert_eq!(config.reconnect_interval_ms, DEFAULT_RECONNECT_INTERVAL_MS);
    }

    #[test]
    fn rejects_unknown_consistency_level() {
        assert!(parse_consistency("quorum").is_err());
        assert!(parse_consistency("one").is_ok());
    }
}
