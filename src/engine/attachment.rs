//! Attachments: client handles on stations.
//!
//! An attachment is what a client holds while it gets, puts and dumps
//! events. The registry hands out ids and enforces the system cap. When an
//! attachment goes away, any events it still owns are restored according
//! to its station's restore mode (see [`restore_target`]).

use crate::config::station::{BlockMode, RestoreMode};
use crate::engine::id::{smallest_unused, AttachmentId};
use crate::engine::queue::WakeToken;
use crate::engine::station::Station;
use crate::error::{EngineError, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Per-attachment traffic counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttachmentCounters {
    /// Events drawn fresh from the pool
    pub made: u64,
    /// Events taken from the station input
    pub got: u64,
    /// Events put into the station output
    pub put: u64,
    /// Events returned straight to the pool
    pub dumped: u64,
}

/// A client's handle on a station
#[derive(Debug)]
pub struct Attachment {
    id: AttachmentId,
    station: Arc<Station>,
    label: String,
    token: WakeToken,
    made: AtomicU64,
    got: AtomicU64,
    put: AtomicU64,
    dumped: AtomicU64,
}

impl Attachment {
    pub(crate) fn new(id: AttachmentId, station: Arc<Station>, label: impl Into<String>) -> Self {
        Self {
            id,
            station,
            label: label.into(),
            token: WakeToken::new(),
            made: AtomicU64::new(0),
            got: AtomicU64::new(0),
            put: AtomicU64::new(0),
            dumped: AtomicU64::new(0),
        }
    }

    pub fn id(&self) -> AttachmentId {
        self.id
    }

    pub fn station(&self) -> &Arc<Station> {
        &self.station
    }

    /// Free-form client identity
    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn token(&self) -> &WakeToken {
        &self.token
    }

    pub fn counters(&self) -> AttachmentCounters {
        AttachmentCounters {
            made: self.made.load(Ordering::Relaxed),
            got: self.got.load(Ordering::Relaxed),
            put: self.put.load(Ordering::Relaxed),
            dumped: self.dumped.load(Ordering::Relaxed),
        }
    }

    pub(crate) fn count_made(&self, n: usize) {
        self.made.fetch_add(n as u64, Ordering::Relaxed);
    }

    pub(crate) fn count_got(&self, n: usize) {
        self.got.fetch_add(n as u64, Ordering::Relaxed);
    }

    pub(crate) fn count_put(&self, n: usize) {
        self.put.fetch_add(n as u64, Ordering::Relaxed);
    }

    pub(crate) fn count_dumped(&self, n: usize) {
        self.dumped.fetch_add(n as u64, Ordering::Relaxed);
    }
}

/// An open sleep session of one attachment, closed on drop
///
/// Holds the attachment for clients that wait with a series of short timed
/// gets instead of one sleeping get.
#[derive(Debug)]
pub struct SleepSession {
    attachment: Arc<Attachment>,
}

impl SleepSession {
    pub(crate) fn open(attachment: Arc<Attachment>) -> Self {
        attachment.token().begin_sleep_session();
        Self { attachment }
    }

    pub fn attachment(&self) -> AttachmentId {
        self.attachment.id()
    }
}

impl Drop for SleepSession {
    fn drop(&mut self) {
        self.attachment.token().end_sleep_session();
    }
}

/// Table of live attachments
#[derive(Debug)]
pub(crate) struct AttachmentRegistry {
    attachments: BTreeMap<AttachmentId, Arc<Attachment>>,
    max: usize,
}

impl AttachmentRegistry {
    pub(crate) fn new(max: usize) -> Self {
        Self {
            attachments: BTreeMap::new(),
            max,
        }
    }

    /// Create an attachment with the smallest free id
    pub(crate) fn register(
        &mut self,
        station: Arc<Station>,
        label: impl Into<String>,
    ) -> Result<Arc<Attachment>> {
        if self.attachments.len() >= self.max {
            return Err(EngineError::TooMany(format!(
                "system limit of {} attachments reached",
                self.max
            )));
        }

        let id = AttachmentId(smallest_unused(self.attachments.keys().map(|id| id.0)));
        let attachment = Arc::new(Attachment::new(id, station, label));
        self.attachments.insert(id, attachment.clone());
        Ok(attachment)
    }

    pub(crate) fn get(&self, id: AttachmentId) -> Option<&Arc<Attachment>> {
        self.attachments.get(&id)
    }

    pub(crate) fn remove(&mut self, id: AttachmentId) -> Option<Arc<Attachment>> {
        self.attachments.remove(&id)
    }

    pub(crate) fn len(&self) -> usize {
        self.attachments.len()
    }

    pub(crate) fn iter(&self) -> impl Iterator<Item = &Arc<Attachment>> {
        self.attachments.values()
    }
}

/// Where USED events of a departing attachment go
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RestoreTarget {
    /// Back to the pool
    GrandCentral,
    /// The station's own output queue, to be routed on
    OwnOutput,
    /// The front of the station's own input queue
    OwnInput,
    /// The output queue of the slot before the station, to be routed again
    PreviousOutput,
}

/// Pick the restore target for USED events
///
/// `remaining` is the number of attachments left on the station once the
/// departing one is gone. NEW events always go back to the pool and never
/// reach this decision.
pub fn restore_target(
    mode: RestoreMode,
    block: BlockMode,
    is_grand_central: bool,
    remaining: usize,
) -> RestoreTarget {
    if is_grand_central {
        return RestoreTarget::GrandCentral;
    }
    match mode {
        RestoreMode::Gc => RestoreTarget::GrandCentral,
        RestoreMode::Output => RestoreTarget::OwnOutput,
        RestoreMode::Input if remaining == 0 => RestoreTarget::OwnOutput,
        RestoreMode::Input if block == BlockMode::Blocking => RestoreTarget::OwnInput,
        RestoreMode::Input | RestoreMode::Redistribute => RestoreTarget::PreviousOutput,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::station::StationConfig;
    use crate::engine::id::StationId;

    fn station() -> Arc<Station> {
        Arc::new(Station::new(StationId(1), "s1", StationConfig::default(), None))
    }

    #[test]
    fn test_register_smallest_free_id() {
        let mut registry = AttachmentRegistry::new(10);
        let a = registry.register(station(), "a").unwrap();
        let b = registry.register(station(), "b").unwrap();
        assert_eq!((a.id(), b.id()), (AttachmentId(0), AttachmentId(1)));

        registry.remove(AttachmentId(0));
        let c = registry.register(station(), "c").unwrap();
        assert_eq!(c.id(), AttachmentId(0));
        assert_eq!(registry.len(), 2);
        assert_eq!(registry.get(AttachmentId(0)).unwrap().label(), "c");
    }

    #[test]
    fn test_register_cap() {
        let mut registry = AttachmentRegistry::new(1);
        registry.register(station(), "a").unwrap();
        assert!(matches!(
            registry.register(station(), "b"),
            Err(EngineError::TooMany(_))
        ));
    }

    #[test]
    fn test_counters() {
        let attachment = Attachment::new(AttachmentId(3), station(), "x");
        attachment.count_made(4);
        attachment.count_got(2);
        attachment.count_put(5);
        attachment.count_dumped(1);
        assert_eq!(
            attachment.counters(),
            AttachmentCounters {
                made: 4,
                got: 2,
                put: 5,
                dumped: 1
            }
        );
    }

    #[test]
    fn test_sleep_session_closes_on_drop() {
        let attachment = Arc::new(Attachment::new(AttachmentId(3), station(), "client"));
        {
            let session = SleepSession::open(attachment.clone());
            assert_eq!(session.attachment(), AttachmentId(3));
            assert!(attachment.token().in_sleep_session());
        }
        assert!(!attachment.token().in_sleep_session());
    }

    #[test]
    fn test_restore_targets() {
        use BlockMode::*;
        use RestoreMode::*;

        assert_eq!(restore_target(Gc, Blocking, false, 1), RestoreTarget::GrandCentral);
        assert_eq!(restore_target(Output, Blocking, false, 1), RestoreTarget::OwnOutput);
        assert_eq!(restore_target(Input, Blocking, false, 1), RestoreTarget::OwnInput);
        assert_eq!(restore_target(Input, Blocking, false, 0), RestoreTarget::OwnOutput);
        assert_eq!(
            restore_target(Input, NonBlocking, false, 2),
            RestoreTarget::PreviousOutput
        );
        assert_eq!(
            restore_target(Redistribute, Blocking, false, 0),
            RestoreTarget::PreviousOutput
        );
    }

    #[test]
    fn test_grand_central_always_restores_to_pool() {
        for mode in [RestoreMode::Output, RestoreMode::Input, RestoreMode::Redistribute] {
            assert_eq!(
                restore_target(mode, BlockMode::Blocking, true, 1),
                RestoreTarget::GrandCentral
            );
        }
    }
}
