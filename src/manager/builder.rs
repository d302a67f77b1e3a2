use super::UrlManager;
use crate::clock::{Clock, SystemClock};
use crate::config::NearbyConfig;
use crate::features::cache::{DEFAULT_MAX_CACHE_AGE, DEFAULT_MAX_CACHE_SIZE};
use crate::features::notification::NotificationSink;
use crate::resolver::ResolutionService;
use crate::state::KeyValueStore;
use std::sync::Arc;
use std::time::Duration;

pub const DEFAULT_STALE_NOTIFICATION_TIMEOUT: Duration = Duration::from_secs(30 * 60);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CacheSettings {
    pub max_cache_size: usize,
    pub max_cache_age: Duration,
    pub stale_notification_timeout: Duration,
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self {
            max_cache_size: DEFAULT_MAX_CACHE_SIZE,
            max_cache_age: DEFAULT_MAX_CACHE_AGE,
            stale_notification_timeout: DEFAULT_STALE_NOTIFICATION_TIMEOUT,
        }
    }
}

impl From<&NearbyConfig> for CacheSettings {
    fn from(config: &NearbyConfig) -> Self {
        Self {
            max_cache_size: config.max_cache_size,
            max_cache_age: config.max_cache_age(),
            stale_notification_timeout: config.stale_notification_timeout(),
        }
    }
}

/// Wires collaborators into a [`UrlManager`]. Building hydrates the manager
/// from the store.
pub struct UrlManagerBuilder {
    pub(super) resolver: Arc<dyn ResolutionService>,
    pub(super) notifier: Arc<dyn NotificationSink>,
    pub(super) store: Arc<dyn KeyValueStore>,
    pub(super) clock: Arc<dyn Clock>,
    pub(super) settings: CacheSettings,
}

impl UrlManagerBuilder {
    pub fn new(
        resolver: Arc<dyn ResolutionService>,
        notifier: Arc<dyn NotificationSink>,
        store: Arc<dyn KeyValueStore>,
    ) -> Self {
        Self {
            resolver,
            notifier,
            store,
            clock: Arc::new(SystemClock),
            settings: CacheSettings::default(),
        }
    }

    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn settings(mut self, settings: CacheSettings) -> Self {
        self.settings = settings;
        self
    }

    pub fn build(self) -> UrlManager {
        UrlManager::from_parts(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_settings_from_config() {
        let config = NearbyConfig {
            max_cache_size: 7,
            max_cache_age_secs: 60,
            stale_notification_timeout_secs: 5,
            ..NearbyConfig::default()
        };
        let settings = CacheSettings::from(&config);
        assert_eq!(settings.max_cache_size, 7);
        assert_eq!(settings.max_cache_age, Duration::from_secs(60));
        assert_eq!(settings.stale_notification_timeout, Duration::from_secs(5));
    }
}
