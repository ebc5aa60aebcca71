//! Offline sync configuration.

use crate::geo::ServiceRegion;
use crate::platform::get_default_store_path;
use crate::{FixerError, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Sliding-window limit for one action.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RateLimitRule {
    pub max: u32,
    pub window_secs: u64,
}

impl RateLimitRule {
    pub fn window_ms(&self) -> i64 {
        (self.window_secs as i64).saturating_mul(1000)
    }
}

/// Parameters for the bounded exponential retry after a failed sync pass.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BackoffConfig {
    pub base_ms: u64,
    pub factor: u32,
    pub max_attempts: u32,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            base_ms: 2_000,
            factor: 2,
            max_attempts: 5,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FixerConfig {
    pub api_base_url: String,
    pub database_path: PathBuf,
    pub region: ServiceRegion,
    pub report_limit: RateLimitRule,
    pub verification_limit: RateLimitRule,
    pub report_retry_cap: u32,
    pub verification_retry_cap: u32,
    pub cache_ttl_secs: u64,
    pub default_query_radius_m: f64,
    pub resource_type_filter: Option<String>,
    pub settle_delay_ms: u64,
    pub max_in_flight: usize,
    pub request_timeout_secs: u64,
    pub health_check_interval_secs: u64,
    pub backoff: BackoffConfig,
    pub audit_log: bool,
}

impl Default for FixerConfig {
    fn default() -> Self {
        Self {
            api_base_url: "http://127.0.0.1:8080/api/v1".to_string(),
            database_path: get_default_store_path(),
            region: ServiceRegion::default(),
            report_limit: RateLimitRule {
                max: 10,
                window_secs: 3600,
            },
            verification_limit: RateLimitRule {
                max: 20,
                window_secs: 3600,
            },
            report_retry_cap: 5,
            verification_retry_cap: 3,
            cache_ttl_secs: 24 * 3600,
            default_query_radius_m: 10_000.0,
            resource_type_filter: None,
            settle_delay_ms: 1_000,
            max_in_flight: 4,
            request_timeout_secs: 30,
            health_check_interval_secs: 15,
            backoff: BackoffConfig::default(),
            audit_log: true,
        }
    }
}

impl FixerConfig {
    /// Load config from a TOML file. Missing fields fall back to defaults.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Self =
            toml::from_str(&content).map_err(|e| FixerError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Load from `path` if it exists, otherwise use defaults.
    pub fn load_or_default(path: &Path) -> Result<Self> {
        if path.exists() {
            Self::load(path)
        } else {
            tracing::info!("No config file at {:?}, using defaults", path);
            Ok(Self::default())
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.region.south > self.region.north || self.region.west > self.region.east {
            return Err(FixerError::Config("region bounds are inverted".to_string()));
        }
        if self.report_retry_cap == 0 || self.verification_retry_cap == 0 {
            return Err(FixerError::Config("retry caps must be at least 1".to_string()));
        }
        if self.max_in_flight == 0 {
            return Err(FixerError::Config("max_in_flight must be at least 1".to_string()));
        }
        if self.backoff.factor == 0 {
            return Err(FixerError::Config("backoff factor must be at least 1".to_string()));
        }
        Ok(())
    }

    pub fn cache_ttl_ms(&self) -> i64 {
        (self.cache_ttl_secs as i64).saturating_mul(1000)
    }

    pub fn settle_delay(&self) -> Duration {
        Duration::from_millis(self.settle_delay_ms)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn health_check_interval(&self) -> Duration {
        Duration::from_secs(self.health_check_interval_secs)
    }
}
