use crate::models::{ResolvedRecord, UNKNOWN_DISTANCE, UrlEntry, UrlObservation, compare_distance};
use std::collections::{BTreeSet, HashMap};
use std::time::Duration;

pub const DEFAULT_MAX_CACHE_SIZE: usize = 100;
pub const DEFAULT_MAX_CACHE_AGE: Duration = Duration::from_secs(24 * 60 * 60);

struct Slot {
    entry: UrlEntry,
    /// Sequence number of the first insertion; breaks distance ties.
    inserted: u64,
    /// Sequence number of the latest touch; breaks timestamp ties.
    touched: u64,
}

/// All-time cache of observed URLs, bounded by size and age.
///
/// Entries live in a map keyed by URL. A secondary index ordered by
/// `(scan_timestamp, touched)` yields the eviction candidate in O(log n).
pub struct UrlCache {
    slots: HashMap<String, Slot>,
    by_age: BTreeSet<(i64, u64, String)>,
    next_seq: u64,
    max_size: usize,
    max_age_ms: i64,
}

impl UrlCache {
    pub fn new(max_size: usize, max_age: Duration) -> Self {
        Self {
            slots: HashMap::new(),
            by_age: BTreeSet::new(),
            next_seq: 0,
            max_size,
            max_age_ms: i64::try_from(max_age.as_millis()).unwrap_or(i64::MAX),
        }
    }

    pub fn max_size(&self) -> usize {
        self.max_size
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    pub fn contains(&self, url: &str) -> bool {
        self.slots.contains_key(url)
    }

    pub fn get(&self, url: &str) -> Option<&UrlEntry> {
        self.slots.get(url).map(|slot| &slot.entry)
    }

    pub fn is_resolved(&self, url: &str) -> bool {
        self.get(url).is_some_and(UrlEntry::is_resolved)
    }

    /// Inserts a new entry or merges the observation into the existing one.
    ///
    /// Returns `true` when the URL was not cached before. Non-finite
    /// distances are stored as [`UNKNOWN_DISTANCE`].
    pub fn upsert(&mut self, mut observation: UrlObservation) -> bool {
        if !observation.distance.is_finite() {
            observation.distance = UNKNOWN_DISTANCE;
        }
        let seq = self.next_seq;
        self.next_seq += 1;

        match self.slots.get_mut(&observation.url) {
            Some(slot) => {
                self.by_age.remove(&(
                    slot.entry.observation.scan_timestamp,
                    slot.touched,
                    observation.url.clone(),
                ));
                let current = &mut slot.entry.observation;
                current.distance = observation.distance;
                current.scan_timestamp = observation.scan_timestamp;
                if observation.device_address.is_some() {
                    current.device_address = observation.device_address;
                }
                slot.touched = seq;
                self.by_age
                    .insert((current.scan_timestamp, seq, observation.url));
                false
            }
            None => {
                let url = observation.url.clone();
                self.by_age.insert((observation.scan_timestamp, seq, url.clone()));
                self.slots.insert(
                    url,
                    Slot {
                        entry: UrlEntry::new(observation),
                        inserted: seq,
                        touched: seq,
                    },
                );
                true
            }
        }
    }

    /// Re-inserts an entry read back from storage with the sequence numbers
    /// it was saved with, so distance and eviction ties survive a restart.
    pub fn restore(&mut self, mut entry: UrlEntry, inserted: u64, touched: u64) {
        if !entry.observation.distance.is_finite() {
            entry.observation.distance = UNKNOWN_DISTANCE;
        }
        let url = entry.observation.url.clone();
        self.remove(&url);
        self.next_seq = self.next_seq.max(inserted.max(touched).saturating_add(1));
        self.by_age
            .insert((entry.observation.scan_timestamp, touched, url.clone()));
        self.slots.insert(
            url,
            Slot {
                entry,
                inserted,
                touched,
            },
        );
    }

    /// Attaches a resolution. Returns `false` if the URL is no longer cached.
    pub fn set_resolved(&mut self, url: &str, record: ResolvedRecord) -> bool {
        match self.slots.get_mut(url) {
            Some(slot) => {
                slot.entry.resolved = Some(record);
                true
            }
            None => false,
        }
    }

    pub fn remove(&mut self, url: &str) -> Option<UrlEntry> {
        let slot = self.slots.remove(url)?;
        self.by_age.remove(&(
            slot.entry.observation.scan_timestamp,
            slot.touched,
            url.to_string(),
        ));
        Some(slot.entry)
    }

    pub fn clear(&mut self) {
        self.slots.clear();
        self.by_age.clear();
    }

    /// Evicts the oldest entries while any is past the age bound or the
    /// cache holds more than `max_size` entries. Returns the evicted URLs,
    /// oldest first.
    pub fn collect_garbage(&mut self, now_millis: i64) -> Vec<String> {
        let cutoff = now_millis.saturating_sub(self.max_age_ms);
        let mut evicted = Vec::new();

        while let Some((timestamp, _, _)) = self.by_age.first() {
            if *timestamp >= cutoff && self.slots.len() <= self.max_size {
                break;
            }
            let Some((timestamp, _, url)) = self.by_age.pop_first() else {
                break;
            };
            tracing::debug!(url = %url, scan_timestamp = timestamp, "garbage collecting");
            self.slots.remove(&url);
            evicted.push(url);
        }

        evicted
    }

    pub fn entries(&self) -> impl Iterator<Item = &UrlEntry> {
        self.slots.values().map(|slot| &slot.entry)
    }

    /// Entries with their `(inserted, touched)` sequence numbers.
    pub fn sequenced_entries(&self) -> impl Iterator<Item = (&UrlEntry, u64, u64)> {
        self.slots
            .values()
            .map(|slot| (&slot.entry, slot.inserted, slot.touched))
    }

    /// Entries matching `filter`, sorted by distance (unknown last) and then
    /// by first insertion.
    pub fn sorted_by_distance<F>(&self, filter: F) -> Vec<UrlEntry>
    where
        F: Fn(&UrlEntry) -> bool,
    {
        let mut matching: Vec<&Slot> = self
            .slots
            .values()
            .filter(|slot| filter(&slot.entry))
            .collect();
        matching.sort_by(|a, b| {
            compare_distance(&a.entry.observation, &b.entry.observation)
                .then(a.inserted.cmp(&b.inserted))
        });
        matching.into_iter().map(|slot| slot.entry.clone()).collect()
    }
}

impl Default for UrlCache {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_CACHE_SIZE, DEFAULT_MAX_CACHE_AGE)
    }
}
