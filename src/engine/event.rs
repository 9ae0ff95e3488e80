//! Events and the fixed event pool.
//!
//! The pool is an arena of `num_events` slots addressed by [`EventId`]. Slots
//! are never created or destroyed after startup; an event moves between
//! owners by having its `owner` field rewritten under the slot lock, while
//! queues and attachments only ever hold ids.

use crate::config::station::SELECT_INTS;
use crate::engine::id::{AttachmentId, EventId, Owner};
use crate::error::{EngineError, Result};
use serde::{Deserialize, Serialize};
use std::sync::{Mutex, MutexGuard, PoisonError};

/// Whether an event has been through a station since it left the pool
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Age {
    /// Fresh from the pool and not yet put anywhere
    #[default]
    New,
    /// Put into the pipeline at least once
    Used,
}

/// Queueing class of an event
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Priority {
    High,
    #[default]
    Low,
}

impl std::fmt::Display for Priority {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Priority::High => write!(f, "high"),
            Priority::Low => write!(f, "low"),
        }
    }
}

/// A reusable event buffer and its metadata
#[derive(Debug, Clone)]
pub struct Event {
    id: EventId,
    owner: Owner,
    age: Age,
    priority: Priority,
    group: u32,
    length: usize,
    data: Vec<u8>,
    control: [i32; SELECT_INTS],
}

impl Event {
    fn new(id: EventId, group: u32, size: usize) -> Self {
        Self {
            id,
            owner: Owner::System,
            age: Age::New,
            priority: Priority::Low,
            group,
            length: 0,
            data: vec![0; size],
            control: [0; SELECT_INTS],
        }
    }

    pub fn id(&self) -> EventId {
        self.id
    }

    pub fn owner(&self) -> Owner {
        self.owner
    }

    pub fn age(&self) -> Age {
        self.age
    }

    pub fn priority(&self) -> Priority {
        self.priority
    }

    pub fn set_priority(&mut self, priority: Priority) {
        self.priority = priority;
    }

    /// Group number, starting at 1
    pub fn group(&self) -> u32 {
        self.group
    }

    /// Logical length of the payload in bytes
    pub fn length(&self) -> usize {
        self.length
    }

    /// Set the logical payload length; cannot exceed the buffer capacity
    pub fn set_length(&mut self, length: usize) -> Result<()> {
        if length > self.data.len() {
            return Err(EngineError::Configuration(format!(
                "length {} exceeds event capacity {}",
                length,
                self.data.len()
            )));
        }
        self.length = length;
        Ok(())
    }

    /// Size of the underlying buffer
    pub fn capacity(&self) -> usize {
        self.data.len()
    }

    /// The first `length` bytes of the buffer
    pub fn payload(&self) -> &[u8] {
        &self.data[..self.length]
    }

    /// The whole buffer
    pub fn data_mut(&mut self) -> &mut [u8] {
        &mut self.data
    }

    /// Copy `bytes` into the buffer and set the length to match
    pub fn write(&mut self, bytes: &[u8]) -> Result<()> {
        self.set_length(bytes.len())?;
        self.data[..bytes.len()].copy_from_slice(bytes);
        Ok(())
    }

    pub fn control(&self) -> &[i32; SELECT_INTS] {
        &self.control
    }

    pub fn set_control(&mut self, control: [i32; SELECT_INTS]) {
        self.control = control;
    }

    pub(crate) fn is_owned_by(&self, attachment: AttachmentId) -> bool {
        self.owner == Owner::Attachment(attachment)
    }

    /// Reset metadata for a fresh hand-out, growing the buffer if `size` needs it
    pub(crate) fn init(&mut self, owner: AttachmentId, size: usize) {
        self.owner = Owner::Attachment(owner);
        self.age = Age::New;
        self.priority = Priority::Low;
        self.length = 0;
        self.control = [0; SELECT_INTS];
        if size > self.data.len() {
            self.data.resize(size, 0);
        }
    }

    pub(crate) fn hand_to(&mut self, owner: AttachmentId) {
        self.owner = Owner::Attachment(owner);
    }

    /// Return to system ownership, optionally marking the event used
    pub(crate) fn release(&mut self, mark_used: bool) {
        self.owner = Owner::System;
        if mark_used {
            self.age = Age::Used;
        }
    }
}

/// Fixed arena of events
pub struct EventPool {
    slots: Box<[Mutex<Event>]>,
    event_size: usize,
}

impl EventPool {
    /// Create `Σ groups` events of `event_size` bytes; group numbers start at 1
    pub fn new(groups: &[usize], event_size: usize) -> Self {
        let mut slots = Vec::with_capacity(groups.iter().sum());
        for (index, &count) in groups.iter().enumerate() {
            let group = index as u32 + 1;
            for _ in 0..count {
                let id = EventId(slots.len() as u32);
                slots.push(Mutex::new(Event::new(id, group, event_size)));
            }
        }

        Self {
            slots: slots.into_boxed_slice(),
            event_size,
        }
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Configured size of a pool event
    pub fn event_size(&self) -> usize {
        self.event_size
    }

    /// All event ids in pool order
    pub fn ids(&self) -> impl Iterator<Item = EventId> {
        (0..self.slots.len() as u32).map(EventId)
    }

    /// Lock one slot
    pub(crate) fn lock(&self, id: EventId) -> Result<MutexGuard<'_, Event>> {
        self.slots
            .get(id.index())
            .map(|slot| slot.lock().unwrap_or_else(PoisonError::into_inner))
            .ok_or_else(|| EngineError::NotFound(format!("event {}", id)))
    }
}

impl std::fmt::Debug for EventPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventPool")
            .field("len", &self.len())
            .field("event_size", &self.event_size)
            .finish()
    }
}
