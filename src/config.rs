//! Configuration management
//!
//! Handles loading and validating reserve configuration from TOML files.

use anyhow::{Context, Result};
use serde::Deserialize;
use std::collections::HashSet;
use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;

use crate::allocator::RetryPolicy;

/// Root configuration structure
#[derive(Debug, Clone, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub pool: PoolConfig,
    #[serde(default)]
    pub metrics: MetricsConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// One size class and its total block budget
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub struct SizeClassConfig {
    /// Power-of-two exponent over `block_size`
    pub order: u32,
    /// Blocks reserved for this size class, split across allocation classes
    pub total_blocks: usize,
}

/// Reserve pool configuration
#[derive(Debug, Clone, Deserialize)]
pub struct PoolConfig {
    /// Serve the fast path at all
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Bytes in an order-0 block
    #[serde(default = "default_block_size")]
    pub block_size: usize,
    /// Allocation classes per pool
    #[serde(default = "default_alloc_classes")]
    pub alloc_classes: usize,
    /// Ask the backing allocator for zero-filled blocks on refill
    #[serde(default = "default_true")]
    pub zero_fill: bool,
    /// Retries after an empty fast-path attempt
    #[serde(default = "default_retry_attempts")]
    pub retry_attempts: u32,
    /// Sleep between retries in milliseconds
    #[serde(default = "default_retry_interval_ms")]
    pub retry_interval_ms: u64,
    #[serde(default = "default_size_classes")]
    pub size_classes: Vec<SizeClassConfig>,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            block_size: default_block_size(),
            alloc_classes: default_alloc_classes(),
            zero_fill: true,
            retry_attempts: default_retry_attempts(),
            retry_interval_ms: default_retry_interval_ms(),
            size_classes: default_size_classes(),
        }
    }
}

impl PoolConfig {
    /// Retry policy for fast-path allocations
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_retries: self.retry_attempts,
            interval: Duration::from_millis(self.retry_interval_ms),
        }
    }

    /// Configured orders in declaration order
    pub fn orders(&self) -> Vec<u32> {
        self.size_classes.iter().map(|s| s.order).collect()
    }

    /// Validate pool values
    pub fn validate(&self) -> Result<()> {
        if self.size_classes.is_empty() {
            anyhow::bail!("at least one size class must be configured");
        }
        if self.alloc_classes == 0 || self.alloc_classes > usize::from(u8::MAX) {
            anyhow::bail!("alloc_classes must be between 1 and 255");
        }
        if !self.block_size.is_power_of_two() {
            anyhow::bail!("block_size must be a power of two, got {}", self.block_size);
        }
        if self.retry_attempts > 0 && self.retry_interval_ms == 0 {
            anyhow::bail!("retry_interval_ms must be > 0 when retry_attempts > 0");
        }

        let mut seen = HashSet::new();
        for class in &self.size_classes {
            if !seen.insert(class.order) {
                anyhow::bail!("size class order {} configured twice", class.order);
            }
            let fits = self
                .block_size
                .checked_shl(class.order)
                .is_some_and(|size| size >> class.order == self.block_size);
            if !fits {
                anyhow::bail!(
                    "order {} overflows block size {}",
                    class.order,
                    self.block_size
                );
            }
        }
        Ok(())
    }
}

/// Metrics configuration
#[derive(Debug, Clone, Deserialize)]
pub struct MetricsConfig {
    /// Enable counters, Prometheus endpoint and pool API
    #[serde(default)]
    pub enabled: bool,
    /// Prometheus exporter bind address
    #[serde(default = "default_metrics_addr")]
    pub bind_addr: SocketAddr,
    /// JSON pool API bind address
    #[serde(default = "default_api_addr")]
    pub api_addr: SocketAddr,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            bind_addr: default_metrics_addr(),
            api_addr: default_api_addr(),
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// Log level
    #[serde(default = "default_log_level")]
    pub level: String,
    /// Output format: "json" or "pretty"
    #[serde(default = "default_log_format")]
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}

// Default value functions
fn default_true() -> bool { true }
fn default_block_size() -> usize { 4096 }
fn default_alloc_classes() -> usize { 2 }
fn default_retry_attempts() -> u32 { 5 }
fn default_retry_interval_ms() -> u64 { 2 }
fn default_metrics_addr() -> SocketAddr { SocketAddr::from(([127, 0, 0, 1], 9090)) }
fn default_api_addr() -> SocketAddr { SocketAddr::from(([127, 0, 0, 1], 9091)) }
fn default_log_level() -> String { "info".to_string() }
fn default_log_format() -> String { "json".to_string() }

// 32 MiB of order-0 blocks, 8 MiB worth of order-1 budget
fn default_size_classes() -> Vec<SizeClassConfig> {
    vec![
        SizeClassConfig { order: 0, total_blocks: (32 << 20) >> 12 },
        SizeClassConfig { order: 1, total_blocks: (8 << 20) >> 12 },
    ]
}

impl Config {
    /// Load configuration from a TOML file
    pub fn load(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {:?}", path))?;

        Self::from_toml(&contents)
    }

    /// Parse and validate configuration from TOML text
    pub fn from_toml(contents: &str) -> Result<Self> {
        let config: Config = toml::from_str(contents)
            .with_context(|| "Failed to parse config file")?;

        config.validate()?;
        Ok(config)
    }

    /// Validate configuration values
    fn validate(&self) -> Result<()> {
        self.pool.validate()
    }
}
