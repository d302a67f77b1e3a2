//! Cache of physically nearby beacon URLs, their resolved metadata, and the
//! single notification summarising them.

pub mod clock;
pub mod config;
pub mod error;
pub mod features;
pub mod manager;
pub mod models;
pub mod resolver;
pub mod state;

pub use clock::{Clock, ManualClock, SystemClock};
pub use error::{ResolveError, StoreError};
pub use features::notification::{LogNotifier, NotificationHandle, NotificationSink, NotificationSummary};
pub use manager::{CacheSettings, UrlManager, UrlManagerBuilder};
pub use models::{ResolvedRecord, UrlEntry, UrlObservation, UrlState, UNKNOWN_DISTANCE};
pub use resolver::{HttpResolver, ResolutionService};
pub use state::{KeyValueStore, MemoryStore, SqliteStore};
