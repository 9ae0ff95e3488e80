//! Priority-aware event queues with blocking gets.
//!
//! Every station owns two [`EventQueue`]s. A queue keeps high-priority
//! events in a prefix ahead of low-priority ones and tracks the prefix
//! length, so a high-priority insert is a single positional insert. FIFO
//! order holds within each class.
//!
//! # Waiting
//!
//! [`EventQueue::get`] takes a [`WaitMode`]. Blocked consumers wait on the
//! queue's condition variable and re-check, under the queue lock, both the
//! data predicate and their [`WakeToken`]. A pending wake wins over
//! available data. Timed waits compute one deadline per call, so spurious
//! wake-ups never extend the budget.
//!
//! A broadcast wake bumps the queue's wake generation. A get compares the
//! generation it started under, so only gets already in progress see it.

use crate::engine::event::Priority;
use crate::engine::id::EventId;
use crate::engine::lock;
use crate::error::{EngineError, Result};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Condvar, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

/// Queue entry: an event id plus the fields routing looks at
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct EventRef {
    pub id: EventId,
    pub priority: Priority,
    pub group: u32,
}

impl EventRef {
    pub fn new(id: EventId, priority: Priority, group: u32) -> Self {
        Self {
            id,
            priority,
            group,
        }
    }

    fn is_high(&self) -> bool {
        self.priority == Priority::High
    }
}

/// How long a get may block
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitMode {
    /// Never block; fail with `Empty` when nothing is available
    Async,
    /// Block up to the given budget; fail with `Timeout` when it runs out
    Timed(Duration),
    /// Block until events arrive or a wake is requested
    Sleep,
}

/// Per-consumer wait state shared between a blocked get and wakers
///
/// Both flags are only changed while holding the lock of the queue the
/// consumer waits on, which makes "am I waiting" and "was I woken" atomic
/// with the queue's data check.
///
/// A consumer that emulates a long sleep with a series of short timed gets
/// opens a sleep session. While it is open, a wake that lands between two
/// gets is kept and fails the next get with `WakeUp`.
#[derive(Debug, Default)]
pub struct WakeToken {
    waiting: AtomicBool,
    wake_requested: AtomicBool,
    sleeping: AtomicBool,
}

impl WakeToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_waiting(&self) -> bool {
        self.waiting.load(Ordering::Acquire)
    }

    pub fn in_sleep_session(&self) -> bool {
        self.sleeping.load(Ordering::Acquire)
    }

    pub fn begin_sleep_session(&self) {
        self.sleeping.store(true, Ordering::Release);
    }

    /// Close the session, dropping any wake it still holds
    pub fn end_sleep_session(&self) {
        self.sleeping.store(false, Ordering::Release);
        self.wake_requested.store(false, Ordering::Release);
    }

    /// Whether a wake request should be recorded right now
    fn accepts_wake(&self) -> bool {
        self.is_waiting() || self.in_sleep_session()
    }
}

/// Queue traffic counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueCounters {
    /// Events put into the queue
    pub events_in: u64,
    /// Events taken out of the queue
    pub events_out: u64,
    /// Events offered to the station for prescaling (input queues)
    pub events_tried: u64,
}

#[derive(Debug, Default)]
struct QueueState {
    events: VecDeque<EventRef>,
    /// Length of the high-priority prefix
    high_count: usize,
    counters: QueueCounters,
    /// Consumers currently blocked in `get`
    waiting: usize,
    /// Bumped by every broadcast wake
    wake_generation: u64,
}

impl QueueState {
    fn insert_high(&mut self, event: EventRef) {
        self.events.insert(self.high_count, event);
        self.high_count += 1;
    }

    fn take_front(&mut self, count: usize) -> Vec<EventRef> {
        let n = count.min(self.events.len());
        let taken: Vec<EventRef> = self.events.drain(..n).collect();
        self.high_count -= taken.iter().filter(|ev| ev.is_high()).count();
        taken
    }

    fn take_group(&mut self, count: usize, group: u32) -> Vec<EventRef> {
        let mut taken = Vec::new();
        let mut kept = VecDeque::with_capacity(self.events.len());
        for ev in self.events.drain(..) {
            if taken.len() < count && ev.group == group {
                taken.push(ev);
            } else {
                kept.push_back(ev);
            }
        }
        self.events = kept;
        self.high_count -= taken.iter().filter(|ev| ev.is_high()).count();
        taken
    }
}

/// Ordered event queue with priority insertion and blocking extraction
#[derive(Debug, Default)]
pub struct EventQueue {
    state: Mutex<QueueState>,
    available: Condvar,
}

impl EventQueue {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, QueueState> {
        lock(&self.state)
    }

    pub fn len(&self) -> usize {
        self.state().events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.state().events.is_empty()
    }

    pub fn counters(&self) -> QueueCounters {
        self.state().counters
    }

    /// Copy of the current contents, front first
    pub fn entries(&self) -> Vec<EventRef> {
        self.state().events.iter().copied().collect()
    }

    /// Number of consumers blocked in `get`
    pub fn waiting(&self) -> usize {
        self.state().waiting
    }

    pub(crate) fn reset_events_in(&self) {
        self.state().counters.events_in = 0;
    }

    /// Add `n` to the tried counter, returning its previous value
    pub(crate) fn record_tried(&self, n: u64) -> u64 {
        let mut state = self.state();
        let before = state.counters.events_tried;
        state.counters.events_tried += n;
        before
    }

    // ==================== Insertion ====================

    /// Append events at the back, queued as low priority whatever their own priority
    pub fn put_low(&self, events: impl IntoIterator<Item = EventRef>) {
        let mut state = self.state();
        let mut n = 0;
        for ev in events {
            state.events.push_back(EventRef {
                priority: Priority::Low,
                ..ev
            });
            n += 1;
        }
        state.counters.events_in += n;
        drop(state);
        self.available.notify_all();
    }

    /// Insert events one by one: high after the existing high prefix, low at the back
    pub fn put(&self, events: &[EventRef]) {
        let mut state = self.state();
        for &ev in events {
            if ev.is_high() {
                state.insert_high(ev);
            } else {
                state.events.push_back(ev);
            }
        }
        state.counters.events_in += events.len() as u64;
        drop(state);
        self.available.notify_all();
    }

    /// Bulk insert of a batch ordered high-then-low
    pub fn put_all(&self, events: Vec<EventRef>) {
        if events.is_empty() {
            return;
        }
        debug_assert!(events.windows(2).all(|w| w[0].is_high() || !w[1].is_high()));
        let mut state = self.state();
        let n = events.len() as u64;
        if events[0].is_high() {
            let (high, low): (Vec<EventRef>, Vec<EventRef>) =
                events.into_iter().partition(EventRef::is_high);
            for ev in high {
                state.insert_high(ev);
            }
            state.events.extend(low);
        } else {
            // A batch starting low holds no high events.
            state.events.extend(events);
        }
        state.counters.events_in += n;
        drop(state);
        self.available.notify_all();
    }

    /// Insert events ahead of the existing content of their class
    ///
    /// High events go to the very front, low events directly after the high
    /// prefix; the given order is kept among the inserted events.
    pub fn put_reverse(&self, events: &[EventRef]) {
        if events.is_empty() {
            return;
        }
        let mut state = self.state();
        let mut high_at = 0;
        let mut low_at = state.high_count;
        for &ev in events {
            if ev.is_high() {
                state.events.insert(high_at, ev);
                high_at += 1;
                low_at += 1;
                state.high_count += 1;
            } else {
                state.events.insert(low_at, ev);
                low_at += 1;
            }
        }
        state.counters.events_in += events.len() as u64;
        drop(state);
        self.available.notify_all();
    }

    // ==================== Extraction ====================

    /// Take up to `count` events from the front
    ///
    /// A zero count returns at once with no events.
    pub fn get(&self, token: &WakeToken, mode: WaitMode, count: usize) -> Result<Vec<EventRef>> {
        if count == 0 {
            return Ok(Vec::new());
        }
        self.wait_for(token, mode, |state| state.take_front(count))
    }

    /// Take up to `count` events of `group`, leaving the others in place
    pub fn get_group(
        &self,
        token: &WakeToken,
        mode: WaitMode,
        count: usize,
        group: u32,
    ) -> Result<Vec<EventRef>> {
        if count == 0 {
            return Ok(Vec::new());
        }
        self.wait_for(token, mode, |state| state.take_group(count, group))
    }

    /// Remove everything without waiting
    pub fn take_all(&self) -> Vec<EventRef> {
        let mut state = self.state();
        let n = state.events.len();
        let taken = state.take_front(n);
        state.counters.events_out += taken.len() as u64;
        taken
    }

    fn wait_for<F>(&self, token: &WakeToken, mode: WaitMode, mut take: F) -> Result<Vec<EventRef>>
    where
        F: FnMut(&mut QueueState) -> Vec<EventRef>,
    {
        let deadline = match mode {
            WaitMode::Timed(budget) => Some(Instant::now() + budget),
            _ => None,
        };

        let mut state = self.state();
        let generation = state.wake_generation;
        if token.in_sleep_session() {
            if token.wake_requested.swap(false, Ordering::AcqRel) {
                return Err(EngineError::WakeUp);
            }
        } else {
            // Outside a sleep session a wake only interrupts a call that is
            // already blocked.
            token.wake_requested.store(false, Ordering::Release);
        }

        loop {
            let taken = take(&mut *state);
            if !taken.is_empty() {
                state.counters.events_out += taken.len() as u64;
                return Ok(taken);
            }

            let remaining = match (mode, deadline) {
                (WaitMode::Async, _) => return Err(EngineError::Empty),
                (_, Some(deadline)) => {
                    let left = deadline.saturating_duration_since(Instant::now());
                    if left.is_zero() {
                        return Err(EngineError::Timeout);
                    }
                    Some(left)
                }
                _ => None,
            };

            state.waiting += 1;
            token.waiting.store(true, Ordering::Release);
            state = match remaining {
                Some(left) => {
                    self.available
                        .wait_timeout(state, left)
                        .unwrap_or_else(PoisonError::into_inner)
                        .0
                }
                None => self
                    .available
                    .wait(state)
                    .unwrap_or_else(PoisonError::into_inner),
            };
            state.waiting -= 1;
            token.waiting.store(false, Ordering::Release);

            let woken = token.wake_requested.swap(false, Ordering::AcqRel)
                || state.wake_generation != generation;
            if woken {
                return Err(EngineError::WakeUp);
            }
        }
    }

    /// Block until the queue is non-empty and drain it, or return `None`
    /// once `kill` is set and the queue is empty
    ///
    /// The batch size is added to `in_transit` before the queue lock is
    /// released.
    pub(crate) fn drain_blocking(
        &self,
        kill: &AtomicBool,
        in_transit: &AtomicUsize,
    ) -> Option<Vec<EventRef>> {
        let mut state = self.state();
        loop {
            if !state.events.is_empty() {
                let n = state.events.len();
                let batch = state.take_front(n);
                state.counters.events_out += batch.len() as u64;
                in_transit.fetch_add(batch.len(), Ordering::AcqRel);
                return Some(batch);
            }
            if kill.load(Ordering::Acquire) {
                return None;
            }
            state = self
                .available
                .wait(state)
                .unwrap_or_else(PoisonError::into_inner);
        }
    }

    // ==================== Wake-ups ====================

    /// Interrupt `token`'s blocked get, if it is blocked or in a sleep session
    pub fn wake_one(&self, token: &WakeToken) {
        let _state = self.state();
        if token.accepts_wake() {
            token.wake_requested.store(true, Ordering::Release);
            self.available.notify_all();
        }
    }

    /// Interrupt every get currently blocked on this queue
    pub fn wake_all(&self) {
        let mut state = self.state();
        state.wake_generation = state.wake_generation.wrapping_add(1);
        if state.waiting > 0 {
            self.available.notify_all();
        }
    }

    /// Wake whoever waits without setting any flag
    pub(crate) fn notify(&self) {
        let _state = self.state();
        self.available.notify_all();
    }
}
