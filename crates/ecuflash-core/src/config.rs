//! `FlashConfig` (§6, §9 ambient): the one piece of process-wide
//! configuration the orchestrator accepts, loaded from a JSON document on
//! disk or built in-process for tests, then threaded explicitly through
//! [`crate::session::FlashSession`] rather than read from global state.
//!
//! Mirrors the plain `serde`-derived config struct with a `from_file`/
//! `to_file` pair and a `#[serde(default = "...")]`-per-field defaulting
//! scheme found elsewhere in this codebase's wider family of network-facing
//! Rust services, rather than inventing a bespoke config format.

use crate::types::{CALIBRATION_BASE_ADDR, CALIBRATION_REGION_LEN, ControllerVariant, DEFAULT_RX_ID, DEFAULT_TX_ID, N_BS_MS, P2_STAR_MS};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Top-level configuration schema (§6): `{ transport, variant, timing, safety, security }`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FlashConfig {
    pub transport: TransportConfig,
    pub variant: VariantConfig,
    #[serde(default)]
    pub timing: TimingConfig,
    pub safety: SafetyConfig,
    #[serde(default)]
    pub security: SecurityConfig,
}

/// `transport: {driver, channel, bitrate}`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TransportConfig {
    /// Which adapter implementation to bind, e.g. `"socketcan"` or `"mock"`.
    pub driver: String,
    /// Adapter-specific channel name (a SocketCAN interface like `"can0"`, or
    /// a vendor dongle's serial path).
    pub channel: String,
    #[serde(default = "default_bitrate")]
    pub bitrate: u32,
}

fn default_bitrate() -> u32 {
    500_000
}

/// `variant: {id, base_addr, size, zone_map_id}`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct VariantConfig {
    pub id: ControllerVariant,
    #[serde(default = "default_base_addr")]
    pub base_addr: u32,
    #[serde(default = "default_calibration_size")]
    pub size: usize,
    pub zone_map_id: String,
    #[serde(default = "default_tx_id")]
    pub tx_id: u32,
    #[serde(default = "default_rx_id")]
    pub rx_id: u32,
}

fn default_base_addr() -> u32 {
    CALIBRATION_BASE_ADDR
}

fn default_calibration_size() -> usize {
    CALIBRATION_REGION_LEN
}

fn default_tx_id() -> u32 {
    DEFAULT_TX_ID
}

fn default_rx_id() -> u32 {
    DEFAULT_RX_ID
}

/// `timing: {p2, p2_star, st_min_override?, block_size_override?}`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TimingConfig {
    #[serde(default = "default_p2_ms")]
    pub p2_ms: u64,
    #[serde(default = "default_p2_star_ms")]
    pub p2_star_ms: u64,
    #[serde(default)]
    pub st_min_override: Option<u8>,
    #[serde(default)]
    pub block_size_override: Option<u8>,
}

fn default_p2_ms() -> u64 {
    N_BS_MS
}

fn default_p2_star_ms() -> u64 {
    P2_STAR_MS
}

impl Default for TimingConfig {
    fn default() -> Self {
        Self {
            p2_ms: default_p2_ms(),
            p2_star_ms: default_p2_star_ms(),
            st_min_override: None,
            block_size_override: None,
        }
    }
}

/// `safety: {require_explicit_warning_ack, backup_store_path, forbid_missing_backup}`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SafetyConfig {
    #[serde(default = "default_true")]
    pub require_explicit_warning_ack: bool,
    pub backup_store_path: PathBuf,
    #[serde(default = "default_true")]
    pub forbid_missing_backup: bool,
}

fn default_true() -> bool {
    true
}

/// `security: {algorithm_order, lockout_backoff_ms}`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SecurityConfig {
    #[serde(default = "default_algorithm_order")]
    pub algorithm_order: Vec<String>,
    #[serde(default = "default_lockout_backoff_ms")]
    pub lockout_backoff_ms: u64,
}

fn default_algorithm_order() -> Vec<String> {
    vec!["A".to_string(), "B".to_string(), "C".to_string(), "RFTX".to_string()]
}

fn default_lockout_backoff_ms() -> u64 {
    10_000
}

impl Default for SecurityConfig {
    fn default() -> Self {
        Self { algorithm_order: default_algorithm_order(), lockout_backoff_ms: default_lockout_backoff_ms() }
    }
}

/// Errors loading, parsing, or validating a [`FlashConfig`].
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Io { path: PathBuf, #[source] source: std::io::Error },
    #[error("failed to parse config JSON: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

impl FlashConfig {
    /// Loads and validates a [`FlashConfig`] from a JSON file on disk.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io { path: path.to_path_buf(), source })?;
        let config: Self = serde_json::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Writes this configuration out as pretty-printed JSON.
    pub fn to_file(&self, path: &Path) -> Result<(), ConfigError> {
        let content = serde_json::to_string_pretty(self).expect("FlashConfig is always serializable");
        std::fs::write(path, content).map_err(|source| ConfigError::Io { path: path.to_path_buf(), source })
    }

    /// Checks the cross-field invariants a loaded config must satisfy before
    /// it is handed to [`crate::session::FlashSession::begin_flash`].
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.variant.size == 0 {
            return Err(ConfigError::Invalid("variant.size must be non-zero".to_string()));
        }
        if self.variant.tx_id == self.variant.rx_id {
            return Err(ConfigError::Invalid("variant.tx_id and variant.rx_id must differ".to_string()));
        }
        if self.transport.bitrate == 0 {
            return Err(ConfigError::Invalid("transport.bitrate must be non-zero".to_string()));
        }
        if self.security.algorithm_order.is_empty() {
            return Err(ConfigError::Invalid("security.algorithm_order must not be empty".to_string()));
        }
        if let Some(unknown) = self.security.algorithm_order.iter().find(|name| crate::diag::security::algorithm_for_name(name).is_none()) {
            return Err(ConfigError::Invalid(format!("security.algorithm_order names unknown algorithm '{unknown}'")));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_config() -> FlashConfig {
        FlashConfig {
            transport: TransportConfig { driver: "mock".to_string(), channel: "loopback".to_string(), bitrate: default_bitrate() },
            variant: VariantConfig {
                id: ControllerVariant::Msd80,
                base_addr: default_base_addr(),
                size: default_calibration_size(),
                zone_map_id: "msd80-default".to_string(),
                tx_id: default_tx_id(),
                rx_id: default_rx_id(),
            },
            timing: TimingConfig::default(),
            safety: SafetyConfig {
                require_explicit_warning_ack: true,
                backup_store_path: PathBuf::from("/var/lib/ecuflash/backups"),
                forbid_missing_backup: true,
            },
            security: SecurityConfig::default(),
        }
    }

    #[test]
    fn test_roundtrip_through_json() {
        let config = sample_config();
        let json = serde_json::to_string(&config).unwrap();
        let parsed: FlashConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(config, parsed);
    }

    #[test]
    fn test_minimal_json_fills_in_defaults() {
        let minimal = serde_json::json!({
            "transport": {"driver": "mock", "channel": "loopback"},
            "variant": {"id": "Msd80", "zone_map_id": "msd80-default"},
            "safety": {"backup_store_path": "/tmp/backups"},
        });
        let config: FlashConfig = serde_json::from_value(minimal).unwrap();
        assert_eq!(config.transport.bitrate, 500_000);
        assert_eq!(config.variant.tx_id, DEFAULT_TX_ID);
        assert_eq!(config.security.algorithm_order, default_algorithm_order());
    }

    #[test]
    fn test_same_tx_rx_id_rejected() {
        let mut config = sample_config();
        config.variant.rx_id = config.variant.tx_id;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_unknown_algorithm_name_in_order_rejected() {
        let mut config = sample_config();
        config.security.algorithm_order = vec!["D".to_string()];
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_reordered_algorithm_list_is_accepted() {
        let mut config = sample_config();
        config.security.algorithm_order = vec!["RFTX".to_string(), "A".to_string()];
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_load_from_file_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        sample_config().to_file(&path).unwrap();
        let loaded = FlashConfig::from_file(&path).unwrap();
        assert_eq!(loaded, sample_config());
    }
}
