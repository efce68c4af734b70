//! Counters for a streaming session.
//!
//! Updated from the inference loop and read by whoever reports on the
//! session; all counters are lock-free.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Live statistics for the current streaming session.
#[derive(Debug)]
pub struct StreamStats {
    /// Records pulled from the inbound stream
    records_received: AtomicU64,
    /// Records dropped because they did not decode
    records_skipped: AtomicU64,
    /// Windows passed through the classifier
    windows_classified: AtomicU64,
    /// Label changes published downstream
    labels_emitted: AtomicU64,
    /// Session start time
    session_start: DateTime<Utc>,
}

impl StreamStats {
    pub fn new() -> Self {
        Self {
            records_received: AtomicU64::new(0),
            records_skipped: AtomicU64::new(0),
            windows_classified: AtomicU64::new(0),
            labels_emitted: AtomicU64::new(0),
            session_start: Utc::now(),
        }
    }

    pub fn record_received(&self) {
        self.records_received.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_skipped(&self) {
        self.records_skipped.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_window_classified(&self) {
        self.windows_classified.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_label_emitted(&self) {
        self.labels_emitted.fetch_add(1, Ordering::Relaxed);
    }

    /// Point-in-time copy of the counters.
    pub fn snapshot(&self) -> StreamSnapshot {
        StreamSnapshot {
            records_received: self.records_received.load(Ordering::Relaxed),
            records_skipped: self.records_skipped.load(Ordering::Relaxed),
            windows_classified: self.windows_classified.load(Ordering::Relaxed),
            labels_emitted: self.labels_emitted.load(Ordering::Relaxed),
            session_start: self.session_start,
            session_duration_secs: (Utc::now() - self.session_start).num_seconds().max(0) as u64,
        }
    }

    /// Human-readable report, printed on shutdown.
    pub fn summary(&self) -> String {
        let stats = self.snapshot();
        format!(
            "Stream Statistics:\n\
             - Records received: {}\n\
             - Records skipped (undecodable): {}\n\
             - Windows classified: {}\n\
             - Label changes emitted: {}\n\
             - Session duration: {} seconds",
            stats.records_received,
            stats.records_skipped,
            stats.windows_classified,
            stats.labels_emitted,
            stats.session_duration_secs
        )
    }
}

impl Default for StreamStats {
    fn default() -> Self {
        Self::new()
    }
}

/// Serializable view of [`StreamStats`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StreamSnapshot {
    pub records_received: u64,
    pub records_skipped: u64,
    pub windows_classified: u64,
    pub labels_emitted: u64,
    pub session_start: DateTime<Utc>,
    pub session_duration_secs: u64,
}

/// Thread-safe handle to the session statistics.
pub type SharedStreamStats = Arc<StreamStats>;

pub fn create_shared_stats() -> SharedStreamStats {
    Arc::new(StreamStats::new())
}
