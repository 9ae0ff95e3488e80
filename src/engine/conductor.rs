//! Per-station routing worker.
//!
//! Each station gets a conductor thread that waits for events in the
//! station's output queue and moves them on to the input queues of the
//! stations after it.
//!
//! # Drain Cycle
//!
//! 1. Block until the output queue holds events (or the station is killed)
//! 2. Drain the whole queue into a batch
//! 3. Take the station's transfer lock and snapshot the downstream slots
//! 4. Offer the batch to each downstream slot in turn; whatever a slot
//!    does not take is offered to the next one
//! 5. Return the rest to GRAND_CENTRAL
//!
//! Only one queue lock is held at any time. Errors have nowhere to go and
//! are logged.

use crate::config::station::{BlockMode, SelectMode, StationConfig};
use crate::engine::fanout::{equal_cue, prescale_picks, prescale_quota, round_robin};
use crate::engine::graph::Slot;
use crate::engine::queue::EventRef;
use crate::engine::read;
use crate::engine::select::matches_select;
use crate::engine::station::Station;
use crate::engine::system::Shared;
use crate::error::{EngineError, Result};
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::thread::{self, JoinHandle};

/// Routing worker for one station
pub(crate) struct Conductor {
    station: Arc<Station>,
    shared: Arc<Shared>,
}

impl Conductor {
    pub(crate) fn new(station: Arc<Station>, shared: Arc<Shared>) -> Self {
        Self { station, shared }
    }

    /// Start the conductor on its own thread
    pub(crate) fn spawn(station: Arc<Station>, shared: Arc<Shared>) -> Result<JoinHandle<()>> {
        let name = format!("conductor-{}", station.name());
        let conductor = Self::new(station, shared);
        thread::Builder::new()
            .name(name)
            .spawn(move || conductor.run())
            .map_err(|e| {
                EngineError::Io(e).with_context("Failed to spawn conductor thread")
            })
    }

    /// Main loop; returns once the station is killed and its output is empty
    pub(crate) fn run(self) {
        tracing::debug!("Conductor for '{}' started", self.station.name());

        while let Some(batch) = self
            .station
            .output()
            .drain_blocking(self.station.kill_flag(), &self.shared.in_transit)
        {
            let n = batch.len();
            self.dispatch(batch);
            self.shared.in_transit.fetch_sub(n, Ordering::AcqRel);
        }

        tracing::debug!("Conductor for '{}' stopped", self.station.name());
    }

    /// Route one drained batch downstream
    pub(crate) fn dispatch(&self, batch: Vec<EventRef>) {
        let _transfer = self.station.lock_transfer();

        let (route, grand_central) = {
            let graph = read(&self.shared.graph);
            (
                graph.downstream_of(self.station.id()),
                graph.grand_central().clone(),
            )
        };

        let total = batch.len();
        let mut batch = batch;
        for slot in &route {
            if batch.is_empty() {
                break;
            }
            batch = match slot {
                Slot::Serial(station) if station.is_active() => self.offer(station, batch),
                Slot::Serial(_) => batch,
                Slot::Group(members) => self.offer_group(members, batch),
            };
        }

        if !batch.is_empty() {
            tracing::trace!(
                "'{}': {} of {} events returned to {}",
                self.station.name(),
                batch.len(),
                total,
                grand_central.name()
            );
            grand_central.input().put_low(batch);
        }
    }

    /// Offer a batch to one station, returning what it did not take
    pub(crate) fn offer(&self, station: &Station, batch: Vec<EventRef>) -> Vec<EventRef> {
        let config = station.config();
        let input = station.input();

        let (take, keep): (Vec<EventRef>, Vec<EventRef>) =
            match (config.select_mode, config.block_mode) {
                (SelectMode::Match | SelectMode::User, BlockMode::Blocking) => {
                    let (selected, mut keep): (Vec<EventRef>, Vec<EventRef>) = batch
                        .into_iter()
                        .partition(|ev| self.selects(station, &config, ev));
                    let tried = input.record_tried(selected.len() as u64);
                    let mut take = Vec::with_capacity(selected.len());
                    for (i, ev) in selected.into_iter().enumerate() {
                        if prescale_picks(tried, i as u64, config.prescale) {
                            take.push(ev);
                        } else {
                            keep.push(ev);
                        }
                    }
                    (take, keep)
                }
                (SelectMode::Match | SelectMode::User, BlockMode::NonBlocking) => {
                    let mut room = config.cue.saturating_sub(input.len());
                    let mut take = Vec::new();
                    let mut keep = Vec::new();
                    for ev in batch {
                        if room > 0 && self.selects(station, &config, &ev) {
                            take.push(ev);
                            room -= 1;
                        } else {
                            keep.push(ev);
                        }
                    }
                    (take, keep)
                }
                (_, BlockMode::Blocking) => {
                    let tried = input.record_tried(batch.len() as u64);
                    let quota =
                        prescale_quota(tried, batch.len() as u64, config.prescale) as usize;
                    split_front(batch, quota)
                }
                (_, BlockMode::NonBlocking) => {
                    let room = config.cue.saturating_sub(input.len());
                    split_front(batch, room)
                }
            };

        if !take.is_empty() {
            tracing::trace!(
                "'{}' -> '{}': {} events",
                self.station.name(),
                station.name(),
                take.len()
            );
            input.put_all(take);
        }
        if !keep.is_empty() && config.block_mode == BlockMode::NonBlocking {
            tracing::trace!(
                "'{}' full, passing {} events on",
                station.name(),
                keep.len()
            );
        }
        keep
    }

    /// Offer a batch to a parallel group
    fn offer_group(&self, members: &[Arc<Station>], batch: Vec<EventRef>) -> Vec<EventRef> {
        let active: Vec<bool> = members.iter().map(|s| s.is_active()).collect();
        if !active.iter().any(|&a| a) {
            return batch;
        }

        match members[0].config().select_mode {
            SelectMode::RoundRobin => {
                self.deal_round_robin(members, &active, batch);
                Vec::new()
            }
            SelectMode::EqualCue => {
                self.deal_equal_cue(members, &active, batch);
                Vec::new()
            }
            _ => {
                let mut batch = batch;
                for (station, _) in members.iter().zip(&active).filter(|(_, &a)| a) {
                    batch = self.offer(station, batch);
                    if batch.is_empty() {
                        break;
                    }
                }
                batch
            }
        }
    }

    fn deal_round_robin(&self, members: &[Arc<Station>], active: &[bool], batch: Vec<EventRef>) {
        let was_last = members.iter().position(|s| s.was_last());
        let Some(plan) = round_robin(batch.len(), active, was_last) else {
            return;
        };

        for station in members {
            station.set_was_last(false);
        }
        members[plan.last_served].set_was_last(true);

        for (sibling, indices) in plan.shares {
            let share: Vec<EventRef> = indices.into_iter().map(|i| batch[i]).collect();
            let station = &members[sibling];
            station.input().record_tried(share.len() as u64);
            tracing::trace!(
                "'{}' -> '{}': {} events (round robin)",
                self.station.name(),
                station.name(),
                share.len()
            );
            station.input().put_all(share);
        }
    }

    fn deal_equal_cue(&self, members: &[Arc<Station>], active: &[bool], batch: Vec<EventRef>) {
        let targets: Vec<&Arc<Station>> = members
            .iter()
            .zip(active)
            .filter(|(_, &a)| a)
            .map(|(s, _)| s)
            .collect();
        let depths: Vec<usize> = targets.iter().map(|s| s.input().len()).collect();
        let counts = equal_cue(batch.len(), &depths);

        let mut rest = batch.into_iter();
        for (station, count) in targets.into_iter().zip(counts) {
            if count == 0 {
                continue;
            }
            let share: Vec<EventRef> = rest.by_ref().take(count).collect();
            station.input().record_tried(share.len() as u64);
            tracing::trace!(
                "'{}' -> '{}': {} events (equal cue)",
                self.station.name(),
                station.name(),
                share.len()
            );
            station.input().put_all(share);
        }
    }

    /// Apply a station's match or user predicate to one event
    fn selects(&self, station: &Station, config: &StationConfig, ev: &EventRef) -> bool {
        let event = match self.shared.pool.lock(ev.id) {
            Ok(event) => event,
            Err(e) => {
                tracing::error!("Conductor for '{}': {}", self.station.name(), e);
                return false;
            }
        };

        match config.select_mode {
            SelectMode::Match => matches_select(&config.select, event.control()),
            SelectMode::User => station
                .selector()
                .is_some_and(|selector| selector.select(&config.select, &event)),
            _ => true,
        }
    }
}

fn split_front(mut batch: Vec<EventRef>, count: usize) -> (Vec<EventRef>, Vec<EventRef>) {
    let keep = batch.split_off(count.min(batch.len()));
    (batch, keep)
}
