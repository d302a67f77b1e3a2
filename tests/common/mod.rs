#![allow(dead_code)]

use futures::FutureExt;
use futures::future::BoxFuture;
use nearby_urls::{
    CacheSettings, ManualClock, MemoryStore, NotificationHandle, NotificationSink,
    NotificationSummary, ResolutionService, ResolveError, ResolvedRecord, UrlManager,
    UrlObservation,
};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::Semaphore;

pub const NOW: i64 = 1_700_000_000_000;

/// Resolver answering from a fixed table of titles.
#[derive(Default)]
pub struct ScriptedResolver {
    titles: Mutex<HashMap<String, String>>,
    requests: Mutex<Vec<Vec<String>>>,
    failing: AtomicBool,
    gate: Option<Arc<Semaphore>>,
}

impl ScriptedResolver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Holds every reply until `release` is called.
    pub fn gated() -> Self {
        Self {
            gate: Some(Arc::new(Semaphore::new(0))),
            ..Self::default()
        }
    }

    pub fn knows(&self, url: &str, title: &str) {
        self.titles
            .lock()
            .unwrap()
            .insert(url.to_string(), title.to_string());
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub fn release(&self, replies: usize) {
        if let Some(gate) = &self.gate {
            gate.add_permits(replies);
        }
    }

    pub fn requests(&self) -> Vec<Vec<String>> {
        self.requests.lock().unwrap().clone()
    }
}

impl ResolutionService for ScriptedResolver {
    fn resolve(&self, urls: Vec<String>) -> BoxFuture<'static, Result<Vec<ResolvedRecord>, ResolveError>> {
        self.requests.lock().unwrap().push(urls.clone());

        let failing = self.failing.load(Ordering::SeqCst);
        let titles = self.titles.lock().unwrap();
        let records: Vec<ResolvedRecord> = urls
            .iter()
            .filter_map(|url| {
                titles.get(url).map(|title| ResolvedRecord {
                    requested_url: url.clone(),
                    resolved_url: format!("{url}/resolved"),
                    icon_url: None,
                    title: title.clone(),
                    description: format!("About {title}"),
                })
            })
            .collect();
        let gate = self.gate.clone();

        async move {
            if let Some(gate) = gate {
                if let Ok(permit) = gate.acquire_owned().await {
                    permit.forget();
                }
            }
            if failing {
                return Err(ResolveError::Unavailable("scripted failure".to_string()));
            }
            Ok(records)
        }
        .boxed()
    }
}

/// Sink that counts posts and tracks which notifications are still shown.
#[derive(Default)]
pub struct CountingNotifier {
    next_id: AtomicU64,
    posts: Mutex<Vec<NotificationSummary>>,
    active: Mutex<HashSet<NotificationHandle>>,
}

impl CountingNotifier {
    pub fn post_count(&self) -> usize {
        self.posts.lock().unwrap().len()
    }

    pub fn active_count(&self) -> usize {
        self.active.lock().unwrap().len()
    }

    pub fn last_summary(&self) -> Option<NotificationSummary> {
        self.posts.lock().unwrap().last().cloned()
    }
}

impl NotificationSink for CountingNotifier {
    fn post(&self, summary: &NotificationSummary) -> NotificationHandle {
        let handle = NotificationHandle(self.next_id.fetch_add(1, Ordering::SeqCst));
        self.posts.lock().unwrap().push(summary.clone());
        self.active.lock().unwrap().insert(handle);
        handle
    }

    fn cancel(&self, handle: NotificationHandle) {
        self.active.lock().unwrap().remove(&handle);
    }
}

pub struct Harness {
    pub resolver: Arc<ScriptedResolver>,
    pub notifier: Arc<CountingNotifier>,
    pub store: Arc<MemoryStore>,
    pub clock: Arc<ManualClock>,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_resolver(ScriptedResolver::new())
    }

    pub fn with_resolver(resolver: ScriptedResolver) -> Self {
        Self {
            resolver: Arc::new(resolver),
            notifier: Arc::new(CountingNotifier::default()),
            store: Arc::new(MemoryStore::new()),
            clock: Arc::new(ManualClock::new(NOW)),
        }
    }

    pub fn manager(&self) -> UrlManager {
        self.manager_with(CacheSettings::default())
    }

    pub fn manager_with(&self, settings: CacheSettings) -> UrlManager {
        UrlManager::builder(
            self.resolver.clone(),
            self.notifier.clone(),
            self.store.clone(),
        )
        .clock(self.clock.clone())
        .settings(settings)
        .build()
    }
}

pub fn seen(url: &str, distance: f64) -> UrlObservation {
    UrlObservation::new(url, distance, NOW)
}
