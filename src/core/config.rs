//! Configuration parsing and validation.
//!
//! GridGate configuration is loaded from TOML files with CLI overrides.
//! The proxy section controls the paged-query transfer threshold and the
//! worker pool that keeps cache operations off the transport thread.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Default paged-query transfer threshold in bytes (512 KiB).
pub const DEFAULT_TRANSFER_THRESHOLD: u64 = 524_288;

/// Top-level GridGate configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// gRPC listener configuration.
    #[serde(default)]
    pub listener: ListenerConfig,

    /// Proxy behavior configuration.
    #[serde(default)]
    pub proxy: ProxyConfig,

    /// In-memory fabric backend configuration.
    #[serde(default)]
    pub fabric: FabricConfig,

    /// Telemetry configuration.
    #[serde(default)]
    pub telemetry: TelemetryConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            listener: ListenerConfig::default(),
            proxy: ProxyConfig::default(),
            fabric: FabricConfig::default(),
            telemetry: TelemetryConfig::default(),
        }
    }
}

/// gRPC listener configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ListenerConfig {
    /// Bind address for the gRPC listener.
    #[serde(default = "default_bind")]
    pub bind: String,

    /// Maximum inbound gRPC message size in bytes.
    #[serde(default = "default_max_message_size")]
    pub max_message_size: usize,
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
            max_message_size: default_max_message_size(),
        }
    }
}

/// Proxy behavior configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProxyConfig {
    /// Byte-size threshold controlling how much data one query page may
    /// return. Calibrates the paged scanner's partition batch size.
    #[serde(default = "default_transfer_threshold")]
    pub transfer_threshold: u64,

    /// Minimum number of worker threads in the cache-operation pool.
    #[serde(default = "default_min_workers")]
    pub min_workers: usize,

    /// Maximum number of worker threads. Zero means unbounded growth.
    #[serde(default)]
    pub max_workers: usize,
}

impl Default for ProxyConfig {
    fn default() -> Self {
        Self {
            transfer_threshold: default_transfer_threshold(),
            min_workers: default_min_workers(),
            max_workers: 0,
        }
    }
}

/// In-memory fabric backend configuration, used when the proxy serves
/// its bundled reference backend.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FabricConfig {
    /// Partition count for partitioned caches.
    #[serde(default = "default_partitions")]
    pub partitions: u32,

    /// Simulated member count for partition ownership.
    #[serde(default = "default_members")]
    pub members: u32,
}

impl Default for FabricConfig {
    fn default() -> Self {
        Self {
            partitions: default_partitions(),
            members: default_members(),
        }
    }
}

/// Telemetry configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TelemetryConfig {
    /// Log level (trace, debug, info, warn, error).
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
        }
    }
}

fn default_bind() -> String {
    "127.0.0.1:1408".to_string()
}

fn default_max_message_size() -> usize {
    4 * 1024 * 1024
}

fn default_transfer_threshold() -> u64 {
    DEFAULT_TRANSFER_THRESHOLD
}

fn default_min_workers() -> usize {
    4
}

fn default_partitions() -> u32 {
    257
}

fn default_members() -> u32 {
    1
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Config {
    /// Load configuration from a TOML file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config file {}", path.display()))?;
        let config: Config = toml::from_str(&raw)
            .with_context(|| format!("failed to parse config file {}", path.display()))?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<()> {
        self.listener
            .bind
            .parse::<std::net::SocketAddr>()
            .with_context(|| format!("listener.bind is not a socket address: {}", self.listener.bind))?;

        anyhow::ensure!(
            self.proxy.transfer_threshold > 0,
            "proxy.transfer_threshold must be positive"
        );
        anyhow::ensure!(self.proxy.min_workers > 0, "proxy.min_workers must be positive");
        anyhow::ensure!(
            self.proxy.max_workers == 0 || self.proxy.max_workers >= self.proxy.min_workers,
            "proxy.max_workers must be zero or >= proxy.min_workers"
        );
        anyhow::ensure!(self.fabric.partitions > 0, "fabric.partitions must be positive");
        anyhow::ensure!(self.fabric.members > 0, "fabric.members must be positive");
        anyhow::ensure!(
            matches!(
                self.telemetry.log_level.as_str(),
                "trace" | "debug" | "info" | "warn" | "error"
            ),
            "telemetry.log_level must be one of trace, debug, info, warn, error"
        );
        Ok(())
    }
}
