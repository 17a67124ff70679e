//! In-memory emotion state: current label, detection log and permission map.
//!
//! All mutation goes through one `RwLock`; readers never observe a
//! half-applied update. The lock is only held for the state change itself.

use chrono::{DateTime, SecondsFormat, SubsecRound, Utc};
use moodwatch_core::EmotionLabel;
use serde::{Serialize, Serializer};
use std::collections::{BTreeMap, VecDeque};
use tokio::sync::RwLock;

/// Per-label "allowed silently" flags.
pub type PermissionMap = BTreeMap<EmotionLabel, bool>;

/// One recorded detection.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LogEntry {
    #[serde(serialize_with = "rfc3339_seconds")]
    pub timestamp: DateTime<Utc>,
    pub emotion: EmotionLabel,
}

fn rfc3339_seconds<S: Serializer>(ts: &DateTime<Utc>, s: S) -> Result<S::Ok, S::Error> {
    s.serialize_str(&ts.to_rfc3339_opts(SecondsFormat::Secs, true))
}

/// Read-only view of the current label and permissions.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Snapshot {
    pub current: EmotionLabel,
    pub allowed: PermissionMap,
}

/// Result of recording a detection.
#[derive(Debug, Clone)]
pub struct Recorded {
    pub entry: LogEntry,
    /// Permission entry for the label at the moment of recording
    /// (`true` when the map has no entry).
    pub permitted: bool,
}

struct State {
    current: EmotionLabel,
    log: VecDeque<LogEntry>,
    allowed: PermissionMap,
    total: u64,
}

pub struct EmotionStore {
    state: RwLock<State>,
    capacity: usize,
}

/// Every classifier label allowed silently.
pub fn default_permissions() -> PermissionMap {
    EmotionLabel::CLASSES.iter().map(|&label| (label, true)).collect()
}

impl EmotionStore {
    /// Create a store that keeps at most `capacity` log entries (minimum 1).
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            state: RwLock::new(State {
                current: EmotionLabel::Neutral,
                log: VecDeque::with_capacity(capacity.min(4096)),
                allowed: default_permissions(),
                total: 0,
            }),
            capacity,
        }
    }

    /// Append a log entry stamped with the current UTC second and make
    /// `label` the current emotion. Evicts the oldest entry when full.
    pub async fn record_detection(&self, label: EmotionLabel) -> Recorded {
        let mut state = self.state.write().await;
        // Stamp under the lock so log order matches timestamp order.
        let entry = LogEntry {
            timestamp: Utc::now().trunc_subsecs(0),
            emotion: label,
        };
        if state.log.len() == self.capacity {
            state.log.pop_front();
        }
        state.log.push_back(entry.clone());
        state.current = label;
        state.total += 1;
        let permitted = state.allowed.get(&label).copied().unwrap_or(true);

        Recorded { entry, permitted }
    }

    /// At most `limit` most recent entries, oldest first.
    pub async fn recent_logs(&self, limit: usize) -> Vec<LogEntry> {
        let state = self.state.read().await;
        let skip = state.log.len().saturating_sub(limit);
        state.log.iter().skip(skip).cloned().collect()
    }

    pub async fn snapshot(&self) -> Snapshot {
        let state = self.state.read().await;
        Snapshot {
            current: state.current,
            allowed: state.allowed.clone(),
        }
    }

    /// Replace the whole permission map (no merge) and return it.
    pub async fn replace_permissions(&self, allowed: PermissionMap) -> PermissionMap {
        let mut state = self.state.write().await;
        state.allowed = allowed;
        state.allowed.clone()
    }

    /// Number of entries currently retained.
    pub async fn len(&self) -> usize {
        self.state.read().await.log.len()
    }

    /// Detections recorded since startup, including evicted ones.
    pub async fn total_recorded(&self) -> u64 {
        self.state.read().await.total
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}
