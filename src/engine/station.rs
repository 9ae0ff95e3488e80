//! Stations: named queue pairs with a status and a set of attachments.
//!
//! A station value holds everything routing needs to know about a stage.
//! Its conductor runs on a separate thread and only keeps an `Arc` to it.
//!
//! # Status
//!
//! ```text
//! UNUSED -> CREATING -> IDLE <-> ACTIVE -> UNUSED
//! ```
//!
//! A non-GC station is ACTIVE while it has at least one attachment.
//! Status changes are made while every transfer lock is held, so a
//! conductor never sees a station change state halfway through a batch.

use crate::config::station::StationConfig;
use crate::engine::id::{AttachmentId, StationId};
use crate::engine::queue::EventQueue;
use crate::engine::select::EventSelector;
use crate::engine::{lock, read, write};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, RwLock};
use std::thread::JoinHandle;

/// Name reserved for station 0
pub const GRAND_CENTRAL: &str = "GRAND_CENTRAL";

/// Lifecycle state of a station
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[repr(u8)]
pub enum StationStatus {
    Unused = 0,
    Creating = 1,
    Idle = 2,
    Active = 3,
}

impl StationStatus {
    fn from_u8(value: u8) -> Self {
        match value {
            1 => StationStatus::Creating,
            2 => StationStatus::Idle,
            3 => StationStatus::Active,
            _ => StationStatus::Unused,
        }
    }
}

impl std::fmt::Display for StationStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StationStatus::Unused => write!(f, "unused"),
            StationStatus::Creating => write!(f, "creating"),
            StationStatus::Idle => write!(f, "idle"),
            StationStatus::Active => write!(f, "active"),
        }
    }
}

/// A routing stage
pub struct Station {
    id: StationId,
    name: String,
    config: RwLock<StationConfig>,
    selector: Option<Arc<dyn EventSelector>>,
    status: AtomicU8,
    input: EventQueue,
    output: EventQueue,
    attachments: Mutex<BTreeSet<AttachmentId>>,
    /// Held by the conductor for a whole drain cycle, and by graph mutation
    transfer: Mutex<()>,
    /// Received the last event of the previous round-robin batch
    was_last: AtomicBool,
    kill: AtomicBool,
    conductor: Mutex<Option<JoinHandle<()>>>,
}

impl Station {
    pub fn new(
        id: StationId,
        name: impl Into<String>,
        config: StationConfig,
        selector: Option<Arc<dyn EventSelector>>,
    ) -> Self {
        Self {
            id,
            name: name.into(),
            config: RwLock::new(config),
            selector,
            status: AtomicU8::new(StationStatus::Creating as u8),
            input: EventQueue::new(),
            output: EventQueue::new(),
            attachments: Mutex::new(BTreeSet::new()),
            transfer: Mutex::new(()),
            was_last: AtomicBool::new(false),
            kill: AtomicBool::new(false),
            conductor: Mutex::new(None),
        }
    }

    pub fn id(&self) -> StationId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_grand_central(&self) -> bool {
        self.id.is_grand_central()
    }

    /// Copy of the current configuration
    pub fn config(&self) -> StationConfig {
        read(&self.config).clone()
    }

    pub(crate) fn update_config(&self, f: impl FnOnce(&mut StationConfig)) {
        f(&mut *write(&self.config));
    }

    pub(crate) fn selector(&self) -> Option<&Arc<dyn EventSelector>> {
        self.selector.as_ref()
    }

    pub fn status(&self) -> StationStatus {
        StationStatus::from_u8(self.status.load(Ordering::Acquire))
    }

    pub(crate) fn set_status(&self, status: StationStatus) {
        self.status.store(status as u8, Ordering::Release);
    }

    pub fn is_active(&self) -> bool {
        self.status() == StationStatus::Active
    }

    pub fn input(&self) -> &EventQueue {
        &self.input
    }

    pub fn output(&self) -> &EventQueue {
        &self.output
    }

    // ==================== Attachments ====================

    pub fn attachment_count(&self) -> usize {
        lock(&self.attachments).len()
    }

    pub fn attachment_ids(&self) -> Vec<AttachmentId> {
        lock(&self.attachments).iter().copied().collect()
    }

    /// Add an attachment, returning the new count
    pub(crate) fn add_attachment(&self, id: AttachmentId) -> usize {
        let mut set = lock(&self.attachments);
        set.insert(id);
        set.len()
    }

    /// Remove an attachment, returning the remaining count
    pub(crate) fn remove_attachment(&self, id: AttachmentId) -> usize {
        let mut set = lock(&self.attachments);
        set.remove(&id);
        set.len()
    }

    // ==================== Routing State ====================

    pub(crate) fn lock_transfer(&self) -> MutexGuard<'_, ()> {
        lock(&self.transfer)
    }

    pub(crate) fn was_last(&self) -> bool {
        self.was_last.load(Ordering::Acquire)
    }

    pub(crate) fn set_was_last(&self, value: bool) {
        self.was_last.store(value, Ordering::Release);
    }

    // ==================== Conductor Thread ====================

    pub(crate) fn kill_flag(&self) -> &AtomicBool {
        &self.kill
    }

    pub(crate) fn set_conductor(&self, handle: JoinHandle<()>) {
        *lock(&self.conductor) = Some(handle);
    }

    /// Ask the conductor to finish and wait for it
    pub(crate) fn stop_conductor(&self) {
        self.kill.store(true, Ordering::Release);
        self.output.notify();
        if let Some(handle) = lock(&self.conductor).take() {
            if handle.join().is_err() {
                tracing::warn!("Conductor thread for station '{}' panicked", self.name);
            }
        }
    }
}

impl std::fmt::Debug for Station {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Station")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("status", &self.status())
            .field("input", &self.input.len())
            .field("output", &self.output.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_station_is_creating() {
        let station = Station::new(StationId(2), "s", StationConfig::default(), None);
        assert_eq!(station.status(), StationStatus::Creating);
        assert!(!station.is_active());
        assert!(!station.is_grand_central());
        assert_eq!(station.name(), "s");
    }

    #[test]
    fn test_status_roundtrip() {
        let station = Station::new(StationId(1), "s", StationConfig::default(), None);
        for status in [
            StationStatus::Idle,
            StationStatus::Active,
            StationStatus::Unused,
            StationStatus::Creating,
        ] {
            station.set_status(status);
            assert_eq!(station.status(), status);
        }
    }

    #[test]
    fn test_attachment_set() {
        let station = Station::new(StationId(1), "s", StationConfig::default(), None);
        assert_eq!(station.add_attachment(AttachmentId(3)), 1);
        assert_eq!(station.add_attachment(AttachmentId(1)), 2);
        assert_eq!(station.attachment_ids(), vec![AttachmentId(1), AttachmentId(3)]);
        assert_eq!(station.remove_attachment(AttachmentId(3)), 1);
        assert_eq!(station.attachment_count(), 1);
    }

    #[test]
    fn test_update_config() {
        let station = Station::new(StationId(1), "s", StationConfig::default(), None);
        station.update_config(|c| c.cue = 42);
        assert_eq!(station.config().cue, 42);
    }

    #[test]
    fn test_stop_without_conductor() {
        let station = Station::new(StationId(1), "s", StationConfig::default(), None);
        station.stop_conductor();
        assert!(station.kill_flag().load(Ordering::Acquire));
    }
}
