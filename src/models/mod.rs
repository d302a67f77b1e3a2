use serde::{Deserialize, Serialize};
use std::cmp::Ordering;

/// Distance reported when the signal strength gives no usable estimate.
pub const UNKNOWN_DISTANCE: f64 = -1.0;

/// A single sighting of a beacon URL.
///
/// Successive sightings of the same `url` are merged into one cache entry:
/// `distance` and `scan_timestamp` always take the latest value, while
/// `device_address` is only replaced when the new sighting carries one.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UrlObservation {
    pub url: String,
    #[serde(default = "unknown_distance")]
    pub distance: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub device_address: Option<String>,
    /// Milliseconds since the Unix epoch.
    pub scan_timestamp: i64,
}

fn unknown_distance() -> f64 {
    UNKNOWN_DISTANCE
}

impl UrlObservation {
    pub fn new(url: impl Into<String>, distance: f64, scan_timestamp: i64) -> Self {
        Self {
            url: url.into(),
            distance,
            device_address: None,
            scan_timestamp,
        }
    }

    pub fn with_device_address(mut self, address: impl Into<String>) -> Self {
        self.device_address = Some(address.into());
        self
    }

    /// Negative and non-finite distances are treated as unknown.
    pub fn has_known_distance(&self) -> bool {
        self.distance.is_finite() && self.distance >= 0.0
    }
}

/// Metadata returned by the resolution service for one requested URL.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResolvedRecord {
    pub requested_url: String,
    pub resolved_url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub icon_url: Option<String>,
    pub title: String,
    #[serde(default)]
    pub description: String,
}

/// Last-known observation of a URL together with its resolution, if any.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UrlEntry {
    #[serde(flatten)]
    pub observation: UrlObservation,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resolved: Option<ResolvedRecord>,
}

impl UrlEntry {
    pub fn new(observation: UrlObservation) -> Self {
        Self {
            observation,
            resolved: None,
        }
    }

    pub fn url(&self) -> &str {
        &self.observation.url
    }

    pub fn is_resolved(&self) -> bool {
        self.resolved.is_some()
    }

    pub fn title(&self) -> Option<&str> {
        self.resolved.as_ref().map(|r| r.title.as_str())
    }
}

/// Where a URL currently sits in its lifecycle.
///
/// Evicted URLs are indistinguishable from never-seen ones and report `Unseen`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UrlState {
    Unseen,
    NearbyUnresolved,
    NearbyResolved,
    FarUnresolved,
    FarResolved,
}

/// Ascending by distance, unknown distances last.
pub fn compare_distance(a: &UrlObservation, b: &UrlObservation) -> Ordering {
    match (a.has_known_distance(), b.has_known_distance()) {
        (true, true) => a.distance.total_cmp(&b.distance),
        (true, false) => Ordering::Less,
        (false, true) => Ordering::Greater,
        (false, false) => Ordering::Equal,
    }
}
