//! Event distribution engine.
//!
//! # Architecture
//!
//! ```text
//!            put                     conductor                     get
//! client ---------> [S1 output] ------------------> [S2 input] ---------> client
//!                                     |                  (next slots ...)
//!                                     +-------------> [GC input] (pool)
//! ```
//!
//! - [`event`]: the fixed pool of events, addressed by [`EventId`]
//! - [`queue`]: priority-ordered queues of event ids with blocking gets
//! - [`station`] / [`graph`]: stations and their ordering, including
//!   parallel groups
//! - `conductor`: one routing thread per station
//! - [`attachment`]: client handles and the restore rules applied on detach
//! - [`system`]: the [`EventSystem`] facade tying it all together
//!
//! # Locking
//!
//! Locks are always taken in this order:
//!
//! 1. station administration
//! 2. attachment table
//! 3. station transfer locks, in graph order
//! 4. the graph
//! 5. a single queue
//! 6. a single event slot
//!
//! A conductor only ever holds its own transfer lock, and never two queue
//! locks at once.

pub mod attachment;
pub(crate) mod conductor;
pub mod event;
pub mod fanout;
pub mod graph;
pub mod id;
pub mod queue;
pub mod select;
pub mod snapshot;
pub mod station;
pub mod system;

pub use attachment::{Attachment, AttachmentCounters, RestoreTarget, SleepSession};
pub use event::{Age, Event, Priority};
pub use graph::{ParallelPosition, Position, StationGraph};
pub use id::{AttachmentId, EventId, Owner, StationId};
pub use queue::{EventQueue, EventRef, QueueCounters, WaitMode, WakeToken};
pub use select::{matches_select, EventSelector, ScriptSelector};
pub use snapshot::{AttachmentSnapshot, EventCensus, StationSnapshot, SystemSnapshot};
pub use station::{Station, StationStatus, GRAND_CENTRAL};
pub use system::EventSystem;

use std::sync::{Mutex, MutexGuard, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

// A panic while holding one of these locks leaves no partial state worth
// refusing to read, so poisoning is ignored.

pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

pub(crate) fn read<T>(rw: &RwLock<T>) -> RwLockReadGuard<'_, T> {
    rw.read().unwrap_or_else(PoisonError::into_inner)
}

pub(crate) fn write<T>(rw: &RwLock<T>) -> RwLockWriteGuard<'_, T> {
    rw.write().unwrap_or_else(PoisonError::into_inner)
}
