//! Persisted layout of the URL cache.
//!
//! Each cache entry is stored as its own JSON string inside a string set, so
//! a single corrupt record only costs that record.

use super::KeyValueStore;
use crate::error::StoreError;
use crate::models::{UrlEntry, UrlObservation};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashSet};

pub const SCHEMA_VERSION: u32 = 2;

pub const VERSION_KEY: &str = "nearby_urls.version";
pub const ENTRIES_KEY: &str = "nearby_urls.entries";
pub const NEARBY_KEY: &str = "nearby_urls.nearby";
pub const UPDATED_AT_KEY: &str = "nearby_urls.notification_updated_at";

/// Layout used before the store carried a version marker.
pub const LEGACY_ALL_URLS_KEY: &str = "nearby_urls.all_urls";
pub const LEGACY_RESOLVED_URLS_KEY: &str = "nearby_urls.resolved_urls";

/// A cache entry as persisted, with the cache's insertion and touch
/// sequence numbers. Records written without them load as zero.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoredEntry {
    #[serde(flatten)]
    pub entry: UrlEntry,
    #[serde(default)]
    pub inserted: u64,
    #[serde(default)]
    pub touched: u64,
}

impl From<UrlEntry> for StoredEntry {
    fn from(entry: UrlEntry) -> Self {
        Self {
            entry,
            inserted: 0,
            touched: 0,
        }
    }
}

#[derive(Debug, Default)]
pub struct Snapshot {
    /// Ordered by insertion sequence.
    pub entries: Vec<StoredEntry>,
    pub nearby: BTreeSet<String>,
}

/// Reads the cache back, migrating or wiping older layouts first.
pub fn load(store: &dyn KeyValueStore) -> Result<Snapshot, StoreError> {
    let current = SCHEMA_VERSION.to_string();

    match store.get_string(VERSION_KEY)? {
        Some(version) if version == current => {}
        None => {
            let snapshot = migrate_legacy(store)?;
            store.put_string(VERSION_KEY, &current)?;
            return Ok(snapshot);
        }
        Some(version) => {
            tracing::info!(
                "Discarding cached URLs stored with schema version {} (current {})",
                version,
                current
            );
            wipe(store)?;
            store.put_string(VERSION_KEY, &current)?;
            return Ok(Snapshot::default());
        }
    }

    let mut entries: Vec<StoredEntry> = store
        .get_string_set(ENTRIES_KEY)?
        .unwrap_or_default()
        .iter()
        .filter_map(|serialized| parse_entry(serialized))
        .collect();
    entries.sort_by_key(|stored| stored.inserted);
    let nearby = store.get_string_set(NEARBY_KEY)?.unwrap_or_default();

    Ok(Snapshot { entries, nearby })
}

fn parse_entry(serialized: &str) -> Option<StoredEntry> {
    match serde_json::from_str::<StoredEntry>(serialized) {
        Ok(stored) if !stored.entry.observation.url.is_empty() => Some(stored),
        Ok(_) => {
            tracing::warn!("Skipping cached entry without a URL");
            None
        }
        Err(e) => {
            tracing::warn!("Could not deserialize cached entry: {}", e);
            None
        }
    }
}

/// Imports observations from the unversioned layout and deletes its keys.
/// Resolutions were stored without metadata there, so every imported entry
/// starts unresolved.
fn migrate_legacy(store: &dyn KeyValueStore) -> Result<Snapshot, StoreError> {
    let legacy = store.get_string_set(LEGACY_ALL_URLS_KEY)?.unwrap_or_default();

    let entries: Vec<StoredEntry> = legacy
        .iter()
        .filter_map(|serialized| match serde_json::from_str::<UrlObservation>(serialized) {
            Ok(observation) if !observation.url.is_empty() => Some(UrlEntry::new(observation)),
            Ok(_) => None,
            Err(e) => {
                tracing::warn!("Could not deserialize legacy entry: {}", e);
                None
            }
        })
        .zip(0..)
        .map(|(entry, seq)| StoredEntry {
            entry,
            inserted: seq,
            touched: seq,
        })
        .collect();

    if !legacy.is_empty() {
        tracing::info!("Migrated {} of {} legacy cache entries", entries.len(), legacy.len());
    }

    store.remove(LEGACY_ALL_URLS_KEY)?;
    store.remove(LEGACY_RESOLVED_URLS_KEY)?;

    Ok(Snapshot {
        entries,
        nearby: BTreeSet::new(),
    })
}

/// Overwrites the persisted entries and nearby set.
pub fn save<I>(store: &dyn KeyValueStore, entries: I, nearby: &HashSet<String>) -> Result<(), StoreError>
where
    I: IntoIterator<Item = StoredEntry>,
{
    let mut serialized = BTreeSet::new();
    for stored in entries {
        match serde_json::to_string(&stored) {
            Ok(json) => {
                serialized.insert(json);
            }
            Err(e) => tracing::warn!("Could not serialize entry {}: {}", stored.entry.url(), e),
        }
    }

    store.put_string_set(ENTRIES_KEY, serialized)?;
    store.put_string_set(NEARBY_KEY, nearby.iter().cloned().collect())
}

/// Removes everything but the version marker.
pub fn wipe(store: &dyn KeyValueStore) -> Result<(), StoreError> {
    store.remove(ENTRIES_KEY)?;
    store.remove(NEARBY_KEY)?;
    store.remove(UPDATED_AT_KEY)
}

pub fn record_update(store: &dyn KeyValueStore, now_millis: i64) -> Result<(), StoreError> {
    store.put_string(UPDATED_AT_KEY, &now_millis.to_string())
}

pub fn last_update(store: &dyn KeyValueStore) -> Result<Option<i64>, StoreError> {
    Ok(store
        .get_string(UPDATED_AT_KEY)?
        .and_then(|value| value.parse().ok()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ResolvedRecord;
    use crate::state::MemoryStore;

    fn resolved_entry(url: &str, title: &str) -> UrlEntry {
        UrlEntry {
            observation: UrlObservation::new(url, 1.0, 100),
            resolved: Some(ResolvedRecord {
                requested_url: url.to_string(),
                resolved_url: url.to_string(),
                icon_url: None,
                title: title.to_string(),
                description: String::new(),
            }),
        }
    }

    #[test]
    fn test_fresh_store_writes_version() {
        let store = MemoryStore::new();
        let snapshot = load(&store).unwrap();
        assert!(snapshot.entries.is_empty());
        assert_eq!(
            store.get_string(VERSION_KEY).unwrap(),
            Some(SCHEMA_VERSION.to_string())
        );
    }

    #[test]
    fn test_save_then_load() {
        let store = MemoryStore::new();
        load(&store).unwrap();

        let entries = vec![
            StoredEntry {
                entry: resolved_entry("https://z.com", "Z"),
                inserted: 1,
                touched: 4,
            },
            StoredEntry {
                entry: UrlEntry::new(UrlObservation::new("https://b.com", -1.0, 200)),
                inserted: 2,
                touched: 2,
            },
            StoredEntry {
                entry: resolved_entry("https://a.com", "A"),
                inserted: 3,
                touched: 3,
            },
        ];
        let nearby = HashSet::from(["https://b.com".to_string()]);
        save(&store, entries.clone(), &nearby).unwrap();

        let snapshot = load(&store).unwrap();
        assert_eq!(snapshot.entries, entries);
        assert!(snapshot.nearby.contains("https://b.com"));
        assert_eq!(snapshot.entries[2].entry.title(), Some("A"));
    }

    #[test]
    fn test_entries_without_sequence_still_load() {
        let store = MemoryStore::new();
        store
            .put_string(VERSION_KEY, &SCHEMA_VERSION.to_string())
            .unwrap();
        let plain = serde_json::to_string(&resolved_entry("https://ok.com", "OK")).unwrap();
        store
            .put_string_set(ENTRIES_KEY, BTreeSet::from([plain]))
            .unwrap();

        let snapshot = load(&store).unwrap();
        assert_eq!(snapshot.entries.len(), 1);
        assert_eq!(snapshot.entries[0].inserted, 0);
        assert_eq!(snapshot.entries[0].entry.title(), Some("OK"));
    }

    #[test]
    fn test_malformed_entries_are_skipped() {
        let store = MemoryStore::new();
        store
            .put_string(VERSION_KEY, &SCHEMA_VERSION.to_string())
            .unwrap();
        let good = serde_json::to_string(&resolved_entry("https://ok.com", "OK")).unwrap();
        store
            .put_string_set(
                ENTRIES_KEY,
                BTreeSet::from([
                    good,
                    "{not json".to_string(),
                    r#"{"distance":1.0}"#.to_string(),
                    r#"{"url":"","scanTimestamp":1}"#.to_string(),
                ]),
            )
            .unwrap();

        let snapshot = load(&store).unwrap();
        assert_eq!(snapshot.entries.len(), 1);
        assert_eq!(snapshot.entries[0].entry.url(), "https://ok.com");
    }

    #[test]
    fn test_mismatched_version_wipes() {
        let store = MemoryStore::new();
        store.put_string(VERSION_KEY, "99").unwrap();
        let good = serde_json::to_string(&resolved_entry("https://ok.com", "OK")).unwrap();
        store
            .put_string_set(ENTRIES_KEY, BTreeSet::from([good]))
            .unwrap();

        let snapshot = load(&store).unwrap();
        assert!(snapshot.entries.is_empty());
        assert!(store.get_string_set(ENTRIES_KEY).unwrap().is_none());
        assert_eq!(
            store.get_string(VERSION_KEY).unwrap(),
            Some(SCHEMA_VERSION.to_string())
        );
    }

    #[test]
    fn test_legacy_migration() {
        let store = MemoryStore::new();
        store
            .put_string_set(
                LEGACY_ALL_URLS_KEY,
                BTreeSet::from([
                    r#"{"url":"https://old.com","distance":3.0,"scanTimestamp":42}"#.to_string(),
                    "garbage".to_string(),
                ]),
            )
            .unwrap();
        store
            .put_string_set(
                LEGACY_RESOLVED_URLS_KEY,
                BTreeSet::from(["https://old.com".to_string()]),
            )
            .unwrap();

        let snapshot = load(&store).unwrap();
        assert_eq!(snapshot.entries.len(), 1);
        assert_eq!(snapshot.entries[0].entry.url(), "https://old.com");
        assert!(!snapshot.entries[0].entry.is_resolved());
        assert!(store.get_string_set(LEGACY_ALL_URLS_KEY).unwrap().is_none());
        assert!(store.get_string_set(LEGACY_RESOLVED_URLS_KEY).unwrap().is_none());
    }

    #[test]
    fn test_update_timestamp() {
        let store = MemoryStore::new();
        assert_eq!(last_update(&store).unwrap(), None);
        record_update(&store, 1234).unwrap();
        assert_eq!(last_update(&store).unwrap(), Some(1234));
    }
}
