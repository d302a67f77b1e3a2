use serde::{Deserialize, Serialize};
use std::time::Duration;
use validator::Validate;

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct ResolverConfig {
    #[serde(default = "default_endpoint")]
    #[validate(url)]
    pub endpoint: String,

    #[serde(default)]
    pub api_key: Option<String>,

    #[serde(default = "default_timeout_ms")]
    #[validate(range(min = 1))]
    pub timeout_ms: u64,
}

impl Default for ResolverConfig {
    fn default() -> Self {
        Self {
            endpoint: default_endpoint(),
            api_key: None,
            timeout_ms: default_timeout_ms(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct NearbyConfig {
    #[serde(default = "default_max_cache_size")]
    #[validate(range(min = 1))]
    pub max_cache_size: usize,

    #[serde(default = "default_max_cache_age_secs")]
    #[validate(range(min = 1))]
    pub max_cache_age_secs: u64,

    #[serde(default = "default_stale_notification_timeout_secs")]
    pub stale_notification_timeout_secs: u64,

    #[serde(default = "default_store_path")]
    #[validate(length(min = 1))]
    pub store_path: String,

    #[serde(default)]
    #[validate(nested)]
    pub resolver: ResolverConfig,

    /// Optional path to a parent configuration file to inherit from
    #[serde(default)]
    pub extends: Option<String>,
}

impl Default for NearbyConfig {
    fn default() -> Self {
        Self {
            max_cache_size: default_max_cache_size(),
            max_cache_age_secs: default_max_cache_age_secs(),
            stale_notification_timeout_secs: default_stale_notification_timeout_secs(),
            store_path: default_store_path(),
            resolver: ResolverConfig::default(),
            extends: None,
        }
    }
}

impl NearbyConfig {
    pub fn max_cache_age(&self) -> Duration {
        Duration::from_secs(self.max_cache_age_secs)
    }

    pub fn stale_notification_timeout(&self) -> Duration {
        Duration::from_secs(self.stale_notification_timeout_secs)
    }
}

pub(crate) fn default_endpoint() -> String {
    "http://127.0.0.1:8787/resolve".to_string()
}

pub(crate) fn default_timeout_ms() -> u64 {
    10_000
}

pub(crate) fn default_max_cache_size() -> usize {
    100
}

pub(crate) fn default_max_cache_age_secs() -> u64 {
    24 * 60 * 60
}

pub(crate) fn default_stale_notification_timeout_secs() -> u64 {
    30 * 60
}

pub(crate) fn default_store_path() -> String {
    "nearby_urls.db".to_string()
}
