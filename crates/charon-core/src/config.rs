//! Application configuration
//!
//! Centralized configuration management using the `config` crate.
//! Values can come from config files and `CHARON__`-prefixed environment
//! variables.

use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;
use std::env;
use std::time::Duration;

/// Main application configuration
#[derive(Debug, Deserialize, Clone)]
pub struct AppConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub rating: RatingConfig,
    #[serde(default)]
    pub accounting: AccountingConfig,
    #[serde(default)]
    pub scheduler: SchedulerConfig,
}

/// HTTP server configuration
#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    /// Server host address
    #[serde(default = "default_host")]
    pub host: String,

    /// Server port
    #[serde(default = "default_port")]
    pub port: u16,

    /// End-to-end deadline for RPC-initiated operations, in milliseconds
    #[serde(default = "default_rpc_deadline_ms")]
    pub rpc_deadline_ms: u64,
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    2012
}

fn default_rpc_deadline_ms() -> u64 {
    2_000
}

/// Rating engine configuration
#[derive(Debug, Deserialize, Clone)]
pub struct RatingConfig {
    /// Decimals used when rounding timespan costs
    #[serde(default = "default_rounding_decimals")]
    pub rounding_decimals: u32,

    /// Retry profile lookups with progressively shorter subjects
    #[serde(default)]
    pub prefix_subject_matching: bool,

    /// Maximum depth of the fallback-subject chain
    #[serde(default = "default_fallback_depth_max")]
    pub fallback_depth_max: usize,

    /// Bounded LRU capacity per cached tariff-plan kind
    #[serde(default = "default_cache_capacity")]
    pub cache_capacity: usize,
}

fn default_rounding_decimals() -> u32 {
    4
}

fn default_fallback_depth_max() -> usize {
    16
}

fn default_cache_capacity() -> usize {
    10_000
}

/// Balance engine configuration
#[derive(Debug, Deserialize, Clone)]
pub struct AccountingConfig {
    /// Guardian lock acquisition timeout, in milliseconds
    #[serde(default = "default_guardian_timeout_ms")]
    pub guardian_timeout_ms: u64,

    /// Maximum trigger re-evaluation passes inside one debit
    #[serde(default = "default_trigger_depth_max")]
    pub trigger_depth_max: usize,
}

fn default_guardian_timeout_ms() -> u64 {
    5_000
}

fn default_trigger_depth_max() -> usize {
    16
}

/// Scheduler configuration
#[derive(Debug, Deserialize, Clone)]
pub struct SchedulerConfig {
    /// Bounded worker pool size for action execution
    #[serde(default = "default_scheduler_workers")]
    pub workers: usize,

    /// Capacity of the reload signal channel
    #[serde(default = "default_reload_queue_depth")]
    pub reload_queue_depth: usize,
}

fn default_scheduler_workers() -> usize {
    10
}

fn default_reload_queue_depth() -> usize {
    8
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            rpc_deadline_ms: default_rpc_deadline_ms(),
        }
    }
}

impl Default for RatingConfig {
    fn default() -> Self {
        Self {
            rounding_decimals: default_rounding_decimals(),
            prefix_subject_matching: false,
            fallback_depth_max: default_fallback_depth_max(),
            cache_capacity: default_cache_capacity(),
        }
    }
}

impl Default for AccountingConfig {
    fn default() -> Self {
        Self {
            guardian_timeout_ms: default_guardian_timeout_ms(),
            trigger_depth_max: default_trigger_depth_max(),
        }
    }
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            workers: default_scheduler_workers(),
            reload_queue_depth: default_reload_queue_depth(),
        }
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            server: ServerConfig::default(),
            rating: RatingConfig::default(),
            accounting: AccountingConfig::default(),
            scheduler: SchedulerConfig::default(),
        }
    }
}

impl AppConfig {
    /// Load configuration from config files and environment
    pub fn load() -> Result<Self, ConfigError> {
        let run_mode = env::var("RUN_MODE").unwrap_or_else(|_| "development".to_string());

        let config = Config::builder()
            .add_source(File::with_name("config/default").required(false))
            .add_source(File::with_name(&format!("config/{}", run_mode)).required(false))
            .add_source(
                Environment::with_prefix("CHARON")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        config.try_deserialize()
    }

    /// Load configuration from a specific file
    pub fn from_file(path: &str) -> Result<Self, ConfigError> {
        let config = Config::builder()
            .add_source(File::with_name(path))
            .add_source(Environment::with_prefix("CHARON").separator("__"))
            .build()?;

        config.try_deserialize()
    }

    /// Get the server bind address
    pub fn server_addr(&self) -> String {
        format!("{}:{}", self.server.host, self.server.port)
    }

    /// Guardian acquisition timeout
    pub fn guardian_timeout(&self) -> Duration {
        Duration::from_millis(self.accounting.guardian_timeout_ms)
    }

    /// End-to-end RPC deadline
    pub fn rpc_deadline(&self) -> Duration {
        Duration::from_millis(self.server.rpc_deadline_ms)
    }
}
