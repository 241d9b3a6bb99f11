// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Topology and runtime configuration.
//!
//! The registry persists its adaptor/reader topology through a
//! [`ConfigStore`]. [`TomlConfigStore`] keeps it in a file:
//!
//! ```toml
//! [[adaptors]]
//! name = "DEFAULT"
//! is_local = true
//!
//! [[adaptors.readers]]
//! name = "dock-door-1"
//! address = "10.0.0.21"
//! port = 5084
//! client_initiated = true
//! connect_immediately = true
//!
//! [[adaptors]]
//! name = "warehouse"
//! address = "10.0.1.5:5090"
//! is_local = false
//! ```

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

/// IANA-registered LLRP port.
pub const DEFAULT_LLRP_PORT: u16 = 5084;
pub const DEFAULT_KEEPALIVE_PERIOD_MS: u32 = 10_000;
pub const DEFAULT_ALLOWED_KEEPALIVE_MISSES: u32 = 3;
/// Outbound entries an adaptor worker holds before rejecting enqueues.
pub const DEFAULT_WORKER_THRESHOLD: usize = 100;
/// Consecutive remote-call failures after which a worker is evicted.
pub const DEFAULT_FAILURE_CEILING: u32 = 3;
pub const DEFAULT_HEALTH_SWEEP_INTERVAL_MS: u64 = 5_000;

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("TOML serialize error: {0}")]
    TomlSer(#[from] toml::ser::Error),

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// One reader definition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReaderConfig {
    pub name: String,

    pub address: String,

    #[serde(default = "default_port")]
    pub port: u16,

    /// Dial the interrogator (true) or wait for it to connect (false).
    #[serde(default = "default_true")]
    pub client_initiated: bool,

    #[serde(default = "default_true")]
    pub connect_immediately: bool,

    #[serde(default = "default_keepalive_period")]
    pub keepalive_period_ms: u32,

    #[serde(default = "default_keepalive_misses")]
    pub allowed_keepalive_misses: u32,

    /// Forward keepalives to subscribers instead of consuming them.
    #[serde(default)]
    pub report_keepalive: bool,

    /// Post a `ReaderLost` event when the keepalive watchdog fires.
    #[serde(default = "default_true")]
    pub throw_on_timeout: bool,
}

fn default_port() -> u16 {
    DEFAULT_LLRP_PORT
}

fn default_true() -> bool {
    true
}

fn default_keepalive_period() -> u32 {
    DEFAULT_KEEPALIVE_PERIOD_MS
}

fn default_keepalive_misses() -> u32 {
    DEFAULT_ALLOWED_KEEPALIVE_MISSES
}

impl ReaderConfig {
    pub fn new(name: impl Into<String>, address: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            address: address.into(),
            port: DEFAULT_LLRP_PORT,
            client_initiated: true,
            connect_immediately: true,
            keepalive_period_ms: DEFAULT_KEEPALIVE_PERIOD_MS,
            allowed_keepalive_misses: DEFAULT_ALLOWED_KEEPALIVE_MISSES,
            report_keepalive: false,
            throw_on_timeout: true,
        }
    }

    pub fn port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    pub fn client_initiated(mut self, enabled: bool) -> Self {
        self.client_initiated = enabled;
        self
    }

    pub fn connect_immediately(mut self, enabled: bool) -> Self {
        self.connect_immediately = enabled;
        self
    }

    pub fn keepalive(mut self, period_ms: u32, allowed_misses: u32) -> Self {
        self.keepalive_period_ms = period_ms;
        self.allowed_keepalive_misses = allowed_misses;
        self
    }

    pub fn report_keepalive(mut self, enabled: bool) -> Self {
        self.report_keepalive = enabled;
        self
    }

    pub fn throw_on_timeout(mut self, enabled: bool) -> Self {
        self.throw_on_timeout = enabled;
        self
    }

    /// Length of one watchdog window (`misses x period`).
    pub fn keepalive_window(&self) -> Duration {
        let misses = u64::from(self.allowed_keepalive_misses.max(1));
        Duration::from_millis(u64::from(self.keepalive_period_ms) * misses)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.name.is_empty() {
            return Err(ConfigError::Invalid("reader name is empty".into()));
        }
        if self.client_initiated && self.address.is_empty() {
            return Err(ConfigError::Invalid(format!(
                "reader '{}' dials out but has no address",
                self.name
            )));
        }
        if self.keepalive_period_ms == 0 {
            return Err(ConfigError::Invalid(format!(
                "reader '{}' has a zero keepalive period",
                self.name
            )));
        }
        Ok(())
    }
}

/// One adaptor definition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AdaptorConfig {
    pub name: String,

    /// `host:port` of the remote instance; absent for local adaptors.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub address: Option<String>,

    #[serde(default = "default_true")]
    pub is_local: bool,

    /// Readers of a local adaptor (remote adaptors own their readers).
    #[serde(default)]
    pub readers: Vec<ReaderConfig>,
}

impl AdaptorConfig {
    pub fn local(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            address: None,
            is_local: true,
            readers: Vec::new(),
        }
    }

    pub fn remote(name: impl Into<String>, address: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            address: Some(address.into()),
            is_local: false,
            readers: Vec::new(),
        }
    }

    pub fn reader(mut self, reader: ReaderConfig) -> Self {
        self.readers.push(reader);
        self
    }
}

/// Load/store contract for the persisted topology.
pub trait ConfigStore: Send + Sync {
    fn load(&self) -> Result<Vec<AdaptorConfig>, ConfigError>;

    fn store(&self, adaptors: &[AdaptorConfig]) -> Result<(), ConfigError>;
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct TopologyFile {
    #[serde(default)]
    adaptors: Vec<AdaptorConfig>,
}

/// TOML file store. A missing file loads as an empty topology.
#[derive(Debug, Clone)]
pub struct TomlConfigStore {
    path: PathBuf,
}

impl TomlConfigStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl ConfigStore for TomlConfigStore {
    fn load(&self) -> Result<Vec<AdaptorConfig>, ConfigError> {
        if !self.path.exists() {
            log::debug!(
                "[config] {} missing, starting with an empty topology",
                self.path.display()
            );
            return Ok(Vec::new());
        }

        let content = std::fs::read_to_string(&self.path)?;
        let file: TopologyFile = toml::from_str(&content)?;
        for adaptor in &file.adaptors {
            if adaptor.name.is_empty() {
                return Err(ConfigError::Invalid("adaptor name is empty".into()));
            }
            if !adaptor.is_local && adaptor.address.is_none() {
                return Err(ConfigError::Invalid(format!(
                    "remote adaptor '{}' has no address",
                    adaptor.name
                )));
            }
            for reader in &adaptor.readers {
                reader.validate()?;
            }
        }
        Ok(file.adaptors)
    }

    fn store(&self, adaptors: &[AdaptorConfig]) -> Result<(), ConfigError> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let file = TopologyFile {
            adaptors: adaptors.to_vec(),
        };
        std::fs::write(&self.path, toml::to_string_pretty(&file)?)?;
        Ok(())
    }
}

/// In-memory store, for embedding and tests.
#[derive(Debug, Default)]
pub struct MemoryConfigStore {
    adaptors: Mutex<Vec<AdaptorConfig>>,
}

impl MemoryConfigStore {
    pub fn new(adaptors: Vec<AdaptorConfig>) -> Self {
        Self {
            adaptors: Mutex::new(adaptors),
        }
    }

    /// Last stored topology.
    pub fn snapshot(&self) -> Vec<AdaptorConfig> {
        self.adaptors.lock().clone()
    }
}

impl ConfigStore for MemoryConfigStore {
    fn load(&self) -> Result<Vec<AdaptorConfig>, ConfigError> {
        Ok(self.snapshot())
    }

    fn store(&self, adaptors: &[AdaptorConfig]) -> Result<(), ConfigError> {
        *self.adaptors.lock() = adaptors.to_vec();
        Ok(())
    }
}

/// Registry tunables.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegistryConfig {
    /// Persist the topology after every structural change.
    #[serde(default = "default_true")]
    pub commit_on_change: bool,

    #[serde(default = "default_worker_threshold")]
    pub worker_threshold: usize,

    #[serde(default = "default_failure_ceiling")]
    pub failure_ceiling: u32,

    /// Health sweep period; 0 disables the sweep thread.
    #[serde(default = "default_health_sweep_interval")]
    pub health_sweep_interval_ms: u64,
}

fn default_worker_threshold() -> usize {
    DEFAULT_WORKER_THRESHOLD
}

fn default_failure_ceiling() -> u32 {
    DEFAULT_FAILURE_CEILING
}

fn default_health_sweep_interval() -> u64 {
    DEFAULT_HEALTH_SWEEP_INTERVAL_MS
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            commit_on_change: true,
            worker_threshold: DEFAULT_WORKER_THRESHOLD,
            failure_ceiling: DEFAULT_FAILURE_CEILING,
            health_sweep_interval_ms: DEFAULT_HEALTH_SWEEP_INTERVAL_MS,
        }
    }
}

impl RegistryConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.worker_threshold == 0 {
            return Err(ConfigError::Invalid("worker_threshold must be > 0".into()));
        }
        if self.failure_ceiling == 0 {
            return Err(ConfigError::Invalid("failure_ceiling must be > 0".into()));
        }
        Ok(())
    }

    pub fn health_sweep_interval(&self) -> Option<Duration> {
        (self.health_sweep_interval_ms > 0)
            .then(|| Duration::from_millis(self.health_sweep_interval_ms))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_reader_defaults_from_toml() {
        let toml_str = r#"
            [[adaptors]]
            name = "DEFAULT"

            [[adaptors.readers]]
            name = "r1"
            address = "10.0.0.1"
        "#;
        let file: TopologyFile = toml::from_str(toml_str).unwrap();
        let reader = &file.adaptors[0].readers[0];
        assert!(file.adaptors[0].is_local);
        assert_eq!(reader.port, DEFAULT_LLRP_PORT);
        assert!(reader.client_initiated);
        assert_eq!(reader.keepalive_period_ms, 10_000);
        assert_eq!(reader.allowed_keepalive_misses, 3);
        assert!(!reader.report_keepalive);
        assert!(reader.throw_on_timeout);
    }

    #[test]
    fn test_toml_store_roundtrip_and_missing_file() {
        let dir = TempDir::new().unwrap();
        let store = TomlConfigStore::new(dir.path().join("nested").join("topology.toml"));
        assert!(store.load().unwrap().is_empty());

        let topology = vec![
            AdaptorConfig::local("DEFAULT").reader(
                ReaderConfig::new("r1", "10.0.0.1")
                    .port(5085)
                    .keepalive(2_000, 2),
            ),
            AdaptorConfig::remote("warehouse", "10.0.1.5:5090"),
        ];
        store.store(&topology).unwrap();
        assert_eq!(store.load().unwrap(), topology);
    }

    #[test]
    fn test_toml_store_rejects_remote_without_address() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("bad.toml");
        std::fs::write(&path, "[[adaptors]]\nname = \"x\"\nis_local = false\n").unwrap();
        let err = TomlConfigStore::new(&path).load().unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));
    }

    #[test]
    fn test_keepalive_window() {
        let reader = ReaderConfig::new("r", "h").keepalive(100, 2);
        assert_eq!(reader.keepalive_window(), Duration::from_millis(200));
        let zero_misses = ReaderConfig::new("r", "h").keepalive(100, 0);
        assert_eq!(zero_misses.keepalive_window(), Duration::from_millis(100));
    }

    #[test]
    fn test_registry_config_validation() {
        assert!(RegistryConfig::default().validate().is_ok());
        let bad = RegistryConfig {
            worker_threshold: 0,
            ..Default::default()
        };
        assert!(bad.validate().is_err());
        assert_eq!(
            RegistryConfig::default().health_sweep_interval(),
            Some(Duration::from_millis(DEFAULT_HEALTH_SWEEP_INTERVAL_MS))
        );
        let off = RegistryConfig {
            health_sweep_interval_ms: 0,
            ..Default::default()
        };
        assert_eq!(off.health_sweep_interval(), None);
    }
}
