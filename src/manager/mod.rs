//! Nearby URL manager.
//!
//! Keeps two views of discovered beacon URLs:
//! - the nearby set, driven by `add_url`/`remove_url`
//! - the all-time cache of every URL seen recently, with its resolution
//!
//! The single notification tracks the intersection of nearby and resolved
//! URLs. The manager is owned by one task; resolution replies come back over
//! a channel and are applied by that task in `process_pending`,
//! `next_resolution` or `settle`.

mod builder;

pub use builder::{CacheSettings, UrlManagerBuilder};

use crate::clock::Clock;
use crate::error::ResolveError;
use crate::features::cache::UrlCache;
use crate::features::notification::{
    NotificationDecision, NotificationHandle, NotificationSink, NotificationSummary,
    NotificationTracker,
};
use crate::models::{ResolvedRecord, UrlEntry, UrlObservation, UrlState};
use crate::resolver::ResolutionService;
use crate::state::KeyValueStore;
use crate::state::snapshot::{self, StoredEntry};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc};

const DISPLAYABLE_CHANNEL_CAPACITY: usize = 64;

/// Reply to one dispatched resolution batch.
struct ResolutionOutcome {
    /// Value of `UrlManager::generation` when the batch was sent.
    generation: u64,
    batch: Vec<String>,
    result: Result<Vec<ResolvedRecord>, ResolveError>,
}

pub struct UrlManager {
    cache: UrlCache,
    nearby: HashSet<String>,
    /// URLs waiting for the next batch, in arrival order.
    pending: Vec<String>,
    /// URLs in dispatched batches still awaiting a reply.
    in_flight: HashSet<String>,
    /// Bumped by `clear_all_urls` so replies dispatched earlier are dropped.
    generation: u64,
    tracker: NotificationTracker,
    active_notification: Option<NotificationHandle>,
    stale_notification_timeout: Duration,
    resolver: Arc<dyn ResolutionService>,
    notifier: Arc<dyn NotificationSink>,
    store: Arc<dyn KeyValueStore>,
    clock: Arc<dyn Clock>,
    outcomes_tx: mpsc::UnboundedSender<ResolutionOutcome>,
    outcomes_rx: mpsc::UnboundedReceiver<ResolutionOutcome>,
    displayable_tx: broadcast::Sender<UrlEntry>,
}

impl UrlManager {
    pub fn builder(
        resolver: Arc<dyn ResolutionService>,
        notifier: Arc<dyn NotificationSink>,
        store: Arc<dyn KeyValueStore>,
    ) -> UrlManagerBuilder {
        UrlManagerBuilder::new(resolver, notifier, store)
    }

    fn from_parts(builder: UrlManagerBuilder) -> Self {
        let (outcomes_tx, outcomes_rx) = mpsc::unbounded_channel();
        let (displayable_tx, _) = broadcast::channel(DISPLAYABLE_CHANNEL_CAPACITY);

        let mut manager = Self {
            cache: UrlCache::new(builder.settings.max_cache_size, builder.settings.max_cache_age),
            nearby: HashSet::new(),
            pending: Vec::new(),
            in_flight: HashSet::new(),
            generation: 0,
            tracker: NotificationTracker::default(),
            active_notification: None,
            stale_notification_timeout: builder.settings.stale_notification_timeout,
            resolver: builder.resolver,
            notifier: builder.notifier,
            store: builder.store,
            clock: builder.clock,
            outcomes_tx,
            outcomes_rx,
            displayable_tx,
        };
        manager.hydrate();
        manager
    }

    fn hydrate(&mut self) {
        match snapshot::load(self.store.as_ref()) {
            Ok(snapshot) => {
                for stored in snapshot.entries {
                    self.cache
                        .restore(stored.entry, stored.inserted, stored.touched);
                }
                self.nearby = snapshot
                    .nearby
                    .into_iter()
                    .filter(|url| self.cache.contains(url))
                    .collect();
                tracing::info!(
                    cached = self.cache.len(),
                    nearby = self.nearby.len(),
                    "Loaded nearby URL cache"
                );
            }
            Err(e) => {
                // The stored copy stays untouched until the next mutation.
                tracing::warn!("Could not load cached URLs, starting empty: {}", e);
                return;
            }
        }
        self.collect_garbage();
        self.persist();
    }

    /// Records a sighting of `observation.url`.
    ///
    /// Resolution of a not-yet-resolved URL is dispatched in the background;
    /// its outcome is applied the next time the owner drains replies.
    ///
    /// # Panics
    ///
    /// Panics if the observation has an empty URL. Must be called from within
    /// a Tokio runtime.
    pub fn add_url(&mut self, observation: UrlObservation) {
        assert!(!observation.url.is_empty(), "observation without a URL");
        tracing::debug!(url = %observation.url, distance = observation.distance, "URL found");

        let url = observation.url.clone();
        self.record_update();
        self.cache.upsert(observation);
        let newly_nearby = self.nearby.insert(url.clone());
        self.collect_garbage();

        // The entry may already be gone if it arrived past the age bound.
        match self.cache.get(&url).map(UrlEntry::is_resolved) {
            Some(true) if newly_nearby => self.announce(&url),
            Some(false) => self.enqueue(url),
            _ => {}
        }

        self.dispatch_pending();
        self.refresh_notification();
        self.persist();
    }

    /// Marks `observation.url` as no longer nearby. Its cache entry is kept.
    ///
    /// # Panics
    ///
    /// Panics if the observation has an empty URL.
    pub fn remove_url(&mut self, observation: &UrlObservation) {
        assert!(!observation.url.is_empty(), "observation without a URL");
        tracing::debug!(url = %observation.url, "URL lost");

        self.record_update();
        self.nearby.remove(&observation.url);
        self.collect_garbage();
        self.refresh_notification();
        self.persist();
    }

    /// Cached URLs sorted by distance, unknown distances last.
    ///
    /// With `nearby_only` unset, every resolved entry is returned whether or
    /// not it is nearby. With it set, every nearby entry is returned,
    /// resolved or not.
    pub fn get_urls(&self, nearby_only: bool) -> Vec<UrlEntry> {
        if nearby_only {
            self.cache
                .sorted_by_distance(|entry| self.nearby.contains(entry.url()))
        } else {
            self.cache.sorted_by_distance(UrlEntry::is_resolved)
        }
    }

    pub fn contains_in_any_cache(&self, url: &str) -> bool {
        self.cache.contains(url)
    }

    pub fn entry(&self, url: &str) -> Option<&UrlEntry> {
        self.cache.get(url)
    }

    pub fn url_state(&self, url: &str) -> UrlState {
        let Some(entry) = self.cache.get(url) else {
            return UrlState::Unseen;
        };
        match (self.nearby.contains(url), entry.is_resolved()) {
            (true, true) => UrlState::NearbyResolved,
            (true, false) => UrlState::NearbyUnresolved,
            (false, true) => UrlState::FarResolved,
            (false, false) => UrlState::FarUnresolved,
        }
    }

    pub fn nearby_urls(&self) -> &HashSet<String> {
        &self.nearby
    }

    pub fn resolved_urls(&self) -> HashSet<String> {
        self.cache
            .entries()
            .filter(|entry| entry.is_resolved())
            .map(|entry| entry.url().to_string())
            .collect()
    }

    pub fn max_cache_size(&self) -> usize {
        self.cache.max_size()
    }

    /// URLs queued or awaiting a resolution reply.
    pub fn pending_resolutions(&self) -> usize {
        self.pending.len() + self.in_flight.len()
    }

    /// Receives each URL as it becomes displayable (nearby and resolved).
    pub fn subscribe(&self) -> broadcast::Receiver<UrlEntry> {
        self.displayable_tx.subscribe()
    }

    pub fn clear_nearby_urls(&mut self) {
        self.nearby.clear();
        self.pending.clear();
        self.clear_notification();
        self.persist();
    }

    /// Forgets every URL. Replies still outstanding are dropped when they
    /// arrive.
    pub fn clear_all_urls(&mut self) {
        self.nearby.clear();
        self.pending.clear();
        self.in_flight.clear();
        self.generation += 1;
        self.clear_notification();
        self.cache.clear();
        if let Err(e) = snapshot::wipe(self.store.as_ref()) {
            tracing::warn!("Could not wipe cached URLs: {}", e);
        }
    }

    /// Withdraws the notification without touching either URL set.
    pub fn clear_notification(&mut self) {
        self.tracker.reset();
        if let Some(handle) = self.active_notification.take() {
            self.notifier.cancel(handle);
        }
    }

    pub fn has_notification(&self) -> bool {
        self.active_notification.is_some()
    }

    pub fn time_since_notification_update(&self) -> Duration {
        let now = self.clock.now_millis();
        let last = match snapshot::last_update(self.store.as_ref()) {
            Ok(last) => last.unwrap_or(0),
            Err(e) => {
                tracing::warn!("Could not read last update time: {}", e);
                0
            }
        };
        Duration::from_millis(u64::try_from(now.saturating_sub(last)).unwrap_or(0))
    }

    /// Clears the notification if nothing changed for longer than the stale
    /// timeout. Returns whether it was cleared.
    pub fn clear_stale_notification(&mut self) -> bool {
        if self.active_notification.is_none()
            || self.time_since_notification_update() <= self.stale_notification_timeout
        {
            return false;
        }
        tracing::info!("Clearing stale nearby notification");
        self.clear_notification();
        true
    }

    /// Applies every resolution reply that has already arrived, without
    /// waiting. Returns how many batches were applied.
    pub fn process_pending(&mut self) -> usize {
        let mut applied = 0;
        while let Ok(outcome) = self.outcomes_rx.try_recv() {
            self.apply_outcome(outcome);
            applied += 1;
        }
        applied
    }

    /// Waits for and applies the next resolution reply. Returns `false` when
    /// nothing is in flight.
    pub async fn next_resolution(&mut self) -> bool {
        self.dispatch_pending();
        if self.in_flight.is_empty() {
            return false;
        }
        match self.outcomes_rx.recv().await {
            Some(outcome) => {
                self.apply_outcome(outcome);
                true
            }
            None => false,
        }
    }

    /// Applies replies until nothing is queued or in flight.
    pub async fn settle(&mut self) {
        while self.next_resolution().await {}
    }

    fn enqueue(&mut self, url: String) {
        if !self.in_flight.contains(&url) && !self.pending.contains(&url) {
            self.pending.push(url);
        }
    }

    /// Sends queued URLs that are still nearby and unresolved as one batch.
    /// Batches already outstanding do not hold it back; a URL is never in
    /// two outstanding batches.
    fn dispatch_pending(&mut self) {
        if self.pending.is_empty() {
            return;
        }

        let batch: Vec<String> = std::mem::take(&mut self.pending)
            .into_iter()
            .filter(|url| {
                self.nearby.contains(url)
                    && !self.in_flight.contains(url)
                    && self.cache.get(url).is_some_and(|entry| !entry.is_resolved())
            })
            .collect();
        if batch.is_empty() {
            return;
        }

        tracing::debug!(count = batch.len(), "Dispatching resolution batch");
        self.in_flight.extend(batch.iter().cloned());

        let request = self.resolver.resolve(batch.clone());
        let tx = self.outcomes_tx.clone();
        let generation = self.generation;
        tokio::spawn(async move {
            let result = request.await;
            let _ = tx.send(ResolutionOutcome {
                generation,
                batch,
                result,
            });
        });
    }

    fn apply_outcome(&mut self, outcome: ResolutionOutcome) {
        if outcome.generation != self.generation {
            tracing::debug!(
                count = outcome.batch.len(),
                "Dropping resolution reply from before the cache was cleared"
            );
            return;
        }
        for url in &outcome.batch {
            self.in_flight.remove(url);
        }

        match outcome.result {
            Ok(records) => {
                for record in records {
                    let Some(url) = outcome
                        .batch
                        .iter()
                        .find(|url| url.eq_ignore_ascii_case(&record.requested_url))
                    else {
                        tracing::debug!("Ignoring result for unrequested URL {}", record.requested_url);
                        continue;
                    };
                    tracing::debug!(url = %url, title = %record.title, "Resolved");
                    if self.cache.set_resolved(url, record) && self.nearby.contains(url) {
                        self.announce(url);
                    }
                }
            }
            Err(e) => {
                tracing::warn!("Resolution of {} URLs failed: {}", outcome.batch.len(), e);
            }
        }

        self.refresh_notification();
        self.persist();
        self.dispatch_pending();
    }

    fn collect_garbage(&mut self) {
        let evicted = self.cache.collect_garbage(self.clock.now_millis());
        if evicted.is_empty() {
            return;
        }
        for url in &evicted {
            self.nearby.remove(url);
        }
        self.pending.retain(|url| !evicted.contains(url));
    }

    fn announce(&self, url: &str) {
        if let Some(entry) = self.cache.get(url) {
            // No receivers is fine.
            let _ = self.displayable_tx.send(entry.clone());
        }
    }

    fn refresh_notification(&mut self) {
        let resolved_nearby: HashSet<String> = self
            .nearby
            .iter()
            .filter(|url| self.cache.is_resolved(url))
            .cloned()
            .collect();

        match self.tracker.evaluate(&resolved_nearby) {
            NotificationDecision::Clear => {
                if let Some(handle) = self.active_notification.take() {
                    self.notifier.cancel(handle);
                }
            }
            NotificationDecision::Post => {
                let displayable = self
                    .cache
                    .sorted_by_distance(|entry| resolved_nearby.contains(entry.url()));
                let primary = displayable.first().and_then(|entry| entry.resolved.as_ref());
                let summary = NotificationSummary {
                    count: displayable.len(),
                    primary_title: primary.map(|r| r.title.clone()).unwrap_or_default(),
                    primary_description: primary.map(|r| r.description.clone()).unwrap_or_default(),
                };

                let handle = self.notifier.post(&summary);
                if let Some(previous) = self.active_notification.replace(handle) {
                    if previous != handle {
                        self.notifier.cancel(previous);
                    }
                }
            }
            NotificationDecision::Unchanged => {}
        }
    }

    fn record_update(&self) {
        if let Err(e) = snapshot::record_update(self.store.as_ref(), self.clock.now_millis()) {
            tracing::warn!("Could not record update time: {}", e);
        }
    }

    fn persist(&self) {
        let entries = self
            .cache
            .sequenced_entries()
            .map(|(entry, inserted, touched)| StoredEntry {
                entry: entry.clone(),
                inserted,
                touched,
            });
        if let Err(e) = snapshot::save(self.store.as_ref(), entries, &self.nearby) {
            tracing::warn!("Could not persist cached URLs: {}", e);
        }
    }
}
