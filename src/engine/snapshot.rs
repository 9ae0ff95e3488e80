//! Point-in-time views of an event system.
//!
//! Snapshots are plain serializable data. Taking one walks every station
//! and attachment, so [`SnapshotCache`] limits how often a fresh one is
//! built.

use crate::config::station::StationConfig;
use crate::engine::attachment::AttachmentCounters;
use crate::engine::id::{AttachmentId, StationId};
use crate::engine::lock;
use crate::engine::queue::QueueCounters;
use crate::engine::station::StationStatus;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

/// Minimum time between two freshly built snapshots
pub const SNAPSHOT_MIN_INTERVAL: Duration = Duration::from_secs(1);

/// Where every event of the pool currently is
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventCensus {
    /// Pool size
    pub total: usize,
    /// Events in GRAND_CENTRAL's input queue
    pub free: usize,
    /// Events in any other queue
    pub queued: usize,
    /// Events owned by attachments
    pub owned: usize,
    /// Events drained by a conductor and not yet placed downstream
    pub in_transit: usize,
    /// Ids seen in more than one place
    pub conflicts: usize,
}

impl EventCensus {
    /// Every event is accounted for exactly once
    pub fn is_conserved(&self) -> bool {
        self.conflicts == 0 && self.free + self.queued + self.owned + self.in_transit == self.total
    }

    /// Conserved with no conductor holding events
    pub fn is_settled(&self) -> bool {
        self.in_transit == 0 && self.is_conserved()
    }

    /// Events found neither in a queue, with an owner nor with a conductor
    pub fn missing(&self) -> usize {
        self.total
            .saturating_sub(self.free + self.queued + self.owned + self.in_transit)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StationSnapshot {
    pub id: StationId,
    pub name: String,
    pub status: StationStatus,
    pub position: usize,
    pub parallel_position: usize,
    pub config: StationConfig,
    pub input_depth: usize,
    pub output_depth: usize,
    pub input: QueueCounters,
    pub output: QueueCounters,
    pub attachments: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttachmentSnapshot {
    pub id: AttachmentId,
    pub station: StationId,
    pub label: String,
    pub counters: AttachmentCounters,
    /// Events currently owned
    pub owned: usize,
    /// Blocked in a get
    pub waiting: bool,
}

/// Whole-system view
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SystemSnapshot {
    pub taken_at: DateTime<Utc>,
    pub num_events: usize,
    pub event_size: usize,
    pub stations: Vec<StationSnapshot>,
    pub attachments: Vec<AttachmentSnapshot>,
    pub census: EventCensus,
}

impl SystemSnapshot {
    pub fn station(&self, name: &str) -> Option<&StationSnapshot> {
        self.stations.iter().find(|s| s.name == name)
    }

    /// Pretty JSON, for logs and dumps
    pub fn to_json(&self) -> crate::error::Result<String> {
        serde_json::to_string_pretty(self)
            .map_err(|e| crate::error::EngineError::Serialization(e.to_string()))
    }
}

/// Keeps the last snapshot and reuses it inside the rate limit window
#[derive(Debug)]
pub(crate) struct SnapshotCache {
    interval: Duration,
    last: Mutex<Option<(Instant, Arc<SystemSnapshot>)>>,
}

impl SnapshotCache {
    pub(crate) fn new(interval: Duration) -> Self {
        Self {
            interval,
            last: Mutex::new(None),
        }
    }

    /// Return the cached snapshot if it is recent enough, otherwise build
    /// and cache a new one
    pub(crate) fn get_or_take(&self, take: impl FnOnce() -> SystemSnapshot) -> Arc<SystemSnapshot> {
        let mut last = lock(&self.last);
        if let Some((at, snapshot)) = last.as_ref() {
            if at.elapsed() < self.interval {
                return snapshot.clone();
            }
        }

        let snapshot = Arc::new(take());
        *last = Some((Instant::now(), snapshot.clone()));
        snapshot
    }
}

impl Default for SnapshotCache {
    fn default() -> Self {
        Self::new(SNAPSHOT_MIN_INTERVAL)
    }
}
