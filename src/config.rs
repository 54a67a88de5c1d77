//! Configuration Module
//!
//! Handles loading and managing server configuration from environment variables.

use std::env;
use std::path::PathBuf;

use crate::cache::Policy;

/// Default capacity: 64 MB of value bytes
pub const DEFAULT_CAPACITY: u64 = 64 * 1024 * 1024;

/// Server configuration parameters.
///
/// All values can be configured via environment variables with sensible defaults.
#[derive(Debug, Clone)]
pub struct Config {
    /// Cache capacity in bytes of stored values
    pub capacity: u64,
    /// Eviction policy
    pub policy: Policy,
    /// HTTP server port
    pub server_port: u16,
    /// Route writes through the replicated log
    pub replicated: bool,
    /// Snapshot file restored at startup and written periodically
    pub snapshot_path: Option<PathBuf>,
    /// Interval in seconds between periodic snapshots
    pub snapshot_interval: u64,
}

impl Config {
    /// Creates a new Config by loading values from environment variables.
    ///
    /// # Environment Variables
    /// - `CACHE_CAPACITY` - Capacity in bytes, `KB`/`MB`/`GB` suffixes allowed (default: 64MB)
    /// - `CACHE_POLICY` - `lru` or `lfu` (default: lfu)
    /// - `SERVER_PORT` - HTTP server port (default: 3000)
    /// - `REPLICATED` - `true`/`1` to route writes through the log (default: false)
    /// - `SNAPSHOT_PATH` - Snapshot file (default: none)
    /// - `SNAPSHOT_INTERVAL` - Snapshot frequency in seconds (default: 60)
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            capacity: env::var("CACHE_CAPACITY")
                .ok()
                .and_then(|v| parse_byte_size(&v))
                .unwrap_or(defaults.capacity),
            policy: env::var("CACHE_POLICY")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(defaults.policy),
            server_port: env::var("SERVER_PORT")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(defaults.server_port),
            replicated: env::var("REPLICATED")
                .ok()
                .map(|v| matches!(v.trim().to_ascii_lowercase().as_str(), "1" | "true" | "yes"))
                .unwrap_or(defaults.replicated),
            snapshot_path: env::var("SNAPSHOT_PATH")
                .ok()
                .filter(|v| !v.trim().is_empty())
                .map(PathBuf::from),
            snapshot_interval: env::var("SNAPSHOT_INTERVAL")
                .ok()
                .and_then(|v| v.parse().ok())
                .filter(|secs| *secs > 0)
                .unwrap_or(defaults.snapshot_interval),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            capacity: DEFAULT_CAPACITY,
            policy: Policy::Lfu,
            server_port: 3000,
            replicated: false,
            snapshot_path: None,
            snapshot_interval: 60,
        }
    }
}

/// Parses `"512"`, `"64KB"`, `"64 MB"`, `"1gb"` into bytes (1024-based).
pub fn parse_byte_size(input: &str) -> Option<u64> {
    let input = input.trim();
    let split = input
        .find(|c: char| !c.is_ascii_digit())
        .unwrap_or(input.len());
    let (digits, unit) = input.split_at(split);
    let number: u64 = digits.parse().ok()?;

    let multiplier = match unit.trim().to_ascii_uppercase().as_str() {
        "" | "B" => 1,
        "K" | "KB" => 1024,
        "M" | "MB" => 1024 * 1024,
        "G" | "GB" => 1024 * 1024 * 1024,
        _ => return None,
    };
    number.checked_mul(multiplier)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_default() {
        let config = Config::default();
        assert_eq!(config.capacity, DEFAULT_CAPACITY);
        assert_eq!(config.policy, Policy::Lfu);
        assert_eq!(config.server_port, 3000);
        assert!(!config.replicated);
        assert!(config.snapshot_path.is_none());
        assert_eq!(config.snapshot_interval, 60);
    }

    #[test]
    fn test_config_from_env_defaults() {
        // Clear any existing env vars to test defaults
        env::remove_var("CACHE_CAPACITY");
        env::remove_var("CACHE_POLICY");
        env::remove_var("SERVER_PORT");
        env::remove_var("REPLICATED");
        env::remove_var("SNAPSHOT_PATH");
        env::remove_var("SNAPSHOT_INTERVAL");

        let config = Config::from_env();
        assert_eq!(config.capacity, DEFAULT_CAPACITY);
        assert_eq!(config.policy, Policy::Lfu);
        assert_eq!(config.server_port, 3000);
        assert!(!config.replicated);
        assert!(config.snapshot_path.is_none());
    }

    #[test]
    fn test_parse_byte_size() {
        assert_eq!(parse_byte_size("512"), Some(512));
        assert_eq!(parse_byte_size("512B"), Some(512));
        assert_eq!(parse_byte_size("64KB"), Some(64 * 1024));
        assert_eq!(parse_byte_size("64 mb"), Some(64 * 1024 * 1024));
        assert_eq!(parse_byte_size("1G"), Some(1024 * 1024 * 1024));
        assert_eq!(parse_byte_size("0"), Some(0));
    }

    #[test]
    fn test_parse_byte_size_rejects_garbage() {
        assert_eq!(parse_byte_size(""), None);
        assert_eq!(parse_byte_size("MB"), None);
        assert_eq!(parse_byte_size("12TB"), None);
        assert_eq!(parse_byte_size("-5"), None);
        assert_eq!(parse_byte_size("99999999999999999999GB"), None);
    }
}
