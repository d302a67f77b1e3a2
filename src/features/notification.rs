use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};

/// What the single nearby-URL notification shows.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NotificationSummary {
    pub count: usize,
    pub primary_title: String,
    pub primary_description: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NotificationHandle(pub u64);

/// Presents and withdraws the OS-level notification.
pub trait NotificationSink: Send + Sync {
    fn post(&self, summary: &NotificationSummary) -> NotificationHandle;
    fn cancel(&self, handle: NotificationHandle);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NotificationDecision {
    /// Nothing resolved is nearby any more.
    Clear,
    /// At least one resolved nearby URL has not been shown this session.
    Post,
    Unchanged,
}

/// Tracks which URLs have been announced during the current nearby session.
///
/// The session ends when no resolved URL is nearby; only then is the
/// notified set forgotten.
#[derive(Debug, Default)]
pub struct NotificationTracker {
    notified: HashSet<String>,
}

impl NotificationTracker {
    pub fn evaluate(&mut self, resolved_nearby: &HashSet<String>) -> NotificationDecision {
        if resolved_nearby.is_empty() {
            self.notified.clear();
            return NotificationDecision::Clear;
        }

        if resolved_nearby.iter().any(|url| !self.notified.contains(url)) {
            self.notified = resolved_nearby.clone();
            return NotificationDecision::Post;
        }

        NotificationDecision::Unchanged
    }

    pub fn reset(&mut self) {
        self.notified.clear();
    }

    pub fn is_notified(&self, url: &str) -> bool {
        self.notified.contains(url)
    }
}

/// Sink that only writes the notification to the log.
#[derive(Debug, Default)]
pub struct LogNotifier {
    next_id: AtomicU64,
}

impl NotificationSink for LogNotifier {
    fn post(&self, summary: &NotificationSummary) -> NotificationHandle {
        let handle = NotificationHandle(self.next_id.fetch_add(1, Ordering::SeqCst));
        tracing::info!(
            id = handle.0,
            count = summary.count,
            "Nearby: {} - {}",
            summary.primary_title,
            summary.primary_description
        );
        handle
    }

    fn cancel(&self, handle: NotificationHandle) {
        tracing::info!(id = handle.0, "Nearby notification cleared");
    }
}
