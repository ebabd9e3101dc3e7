//! Image manager configuration structures.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::core::admission::DEFAULT_EXECUTING_CAP;
use crate::core::decoder::ImageDecoder;
use crate::core::error::ConfigError;

/// Environment variable overriding [`QueueConfig::max_concurrent_transfers`].
pub const ENV_MAX_CONCURRENT: &str = "IMAGE_LOADER_MAX_CONCURRENT";
/// Environment variable overriding [`QueueConfig::congestion_control_enabled`].
pub const ENV_CONGESTION_CONTROL: &str = "IMAGE_LOADER_CONGESTION_CONTROL";
/// Environment variable overriding [`CacheConfig::memory_cache_items`].
pub const ENV_MEMORY_CACHE_ITEMS: &str = "IMAGE_LOADER_MEMORY_CACHE_ITEMS";

/// Admission queue settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct QueueConfig {
    /// Maximum number of transfers executing at once.
    pub max_concurrent_transfers: usize,
    /// Delay scheduling passes in proportion to the number of executing transfers.
    pub congestion_control_enabled: bool,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            max_concurrent_transfers: DEFAULT_EXECUTING_CAP,
            congestion_control_enabled: true,
        }
    }
}

impl QueueConfig {
    /// Validate queue settings.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_concurrent_transfers == 0 {
            return Err(ConfigError::Invalid(
                "max_concurrent_transfers must be greater than 0".into(),
            ));
        }
        Ok(())
    }
}

/// HTTP transport settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TransportConfig {
    /// Time allowed to connect, and the longest idle gap between reads, in seconds.
    pub request_timeout_secs: u64,
    /// Time allowed for the whole transfer, in seconds.
    pub resource_timeout_secs: u64,
    /// Byte budget of the response cache; zero disables it.
    pub response_cache_bytes: usize,
    /// User agent sent with every request.
    pub user_agent: Option<String>,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            request_timeout_secs: 60,
            resource_timeout_secs: 360,
            response_cache_bytes: 200 * 1024 * 1024,
            user_agent: None,
        }
    }
}

impl TransportConfig {
    /// Request timeout as a duration.
    pub const fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    /// Resource timeout as a duration.
    pub const fn resource_timeout(&self) -> Duration {
        Duration::from_secs(self.resource_timeout_secs)
    }

    /// Validate transport settings.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.request_timeout_secs == 0 {
            return Err(ConfigError::Invalid(
                "request_timeout_secs must be greater than 0".into(),
            ));
        }
        if self.resource_timeout_secs < self.request_timeout_secs {
            return Err(ConfigError::Invalid(
                "resource_timeout_secs must not be shorter than request_timeout_secs".into(),
            ));
        }
        Ok(())
    }
}

/// Memory cache settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Maximum number of processed images kept in memory; zero disables the cache.
    pub memory_cache_items: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            memory_cache_items: 100,
        }
    }
}

/// Root configuration for an image manager.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ImageManagerConfig {
    /// Admission queue settings.
    pub queue: QueueConfig,
    /// HTTP transport settings.
    pub transport: TransportConfig,
    /// Memory cache settings.
    pub cache: CacheConfig,
    /// Decoder settings.
    pub decoder: ImageDecoder,
}

impl ImageManagerConfig {
    /// Validate all sections.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.queue.validate()?;
        self.transport.validate()?;
        if self.decoder.max_pixels == Some(0) {
            return Err(ConfigError::Invalid(
                "decoder.max_pixels must be greater than 0".into(),
            ));
        }
        Ok(())
    }

    /// Parse configuration from a JSON string and validate. Missing fields take defaults.
    pub fn from_json_str(input: &str) -> Result<Self, ConfigError> {
        let cfg: Self = serde_json::from_str(input)?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Build configuration from defaults overridden by the process environment.
    ///
    /// A `.env` file in the working directory is loaded first if present.
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build configuration from defaults overridden by `lookup`, then validate.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut cfg = Self::default();
        if let Some(value) = lookup(ENV_MAX_CONCURRENT) {
            cfg.queue.max_concurrent_transfers = parse_var(ENV_MAX_CONCURRENT, &value)?;
        }
        if let Some(value) = lookup(ENV_CONGESTION_CONTROL) {
            cfg.queue.congestion_control_enabled = parse_flag(ENV_CONGESTION_CONTROL, &value)?;
        }
        if let Some(value) = lookup(ENV_MEMORY_CACHE_ITEMS) {
            cfg.cache.memory_cache_items = parse_var(ENV_MEMORY_CACHE_ITEMS, &value)?;
        }
        cfg.validate()?;
        Ok(cfg)
    }
}

fn parse_var<T: std::str::FromStr>(key: &str, value: &str) -> Result<T, ConfigError> {
    value.trim().parse().map_err(|_| env_error(key, value))
}

fn parse_flag(key: &str, value: &str) -> Result<bool, ConfigError> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(env_error(key, value)),
    }
}

fn env_error(key: &str, value: &str) -> ConfigError {
    ConfigError::Env {
        key: key.to_string(),
        value: value.to_string(),
    }
}
