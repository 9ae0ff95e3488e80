//! Ordering of stations.
//!
//! The graph is a main list of slots. A slot is either a single serial
//! station or a parallel group whose first member is the head. GRAND_CENTRAL
//! always occupies slot 0. Events flow from a station to the slots after its
//! own and finally back to GRAND_CENTRAL.
//!
//! The graph itself is plain data. [`crate::engine::system::EventSystem`]
//! wraps it in a lock and takes every station's transfer lock before
//! swapping in a mutated copy.

use crate::config::station::FlowMode;
use crate::engine::id::{smallest_unused, StationId};
use crate::engine::station::Station;
use crate::error::{EngineError, Result};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Main-list position for a new or moved station
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Position {
    At(usize),
    End,
}

/// Position inside a parallel group
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ParallelPosition {
    At(usize),
    End,
    /// Start a new group at the main-list position
    NewHead,
}

/// One main-list entry
#[derive(Debug, Clone)]
pub enum Slot {
    Serial(Arc<Station>),
    /// Parallel group, head first
    Group(Vec<Arc<Station>>),
}

impl Slot {
    fn for_station(station: Arc<Station>) -> Self {
        match station.config().flow_mode {
            FlowMode::Serial => Slot::Serial(station),
            FlowMode::Parallel => Slot::Group(vec![station]),
        }
    }

    /// The station at the main-list position
    pub fn head(&self) -> &Arc<Station> {
        match self {
            Slot::Serial(station) => station,
            Slot::Group(members) => &members[0],
        }
    }

    pub fn members(&self) -> &[Arc<Station>] {
        match self {
            Slot::Serial(station) => std::slice::from_ref(station),
            Slot::Group(members) => members,
        }
    }

    fn contains(&self, id: StationId) -> bool {
        self.members().iter().any(|s| s.id() == id)
    }
}

/// Main list plus parallel groups
#[derive(Debug, Clone)]
pub struct StationGraph {
    slots: Vec<Slot>,
}

impl StationGraph {
    /// A graph holding only GRAND_CENTRAL
    pub fn new(grand_central: Arc<Station>) -> Self {
        Self {
            slots: vec![Slot::Serial(grand_central)],
        }
    }

    pub fn grand_central(&self) -> &Arc<Station> {
        self.slots[0].head()
    }

    /// Number of main-list slots
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Number of stations including parallel siblings
    pub fn station_count(&self) -> usize {
        self.slots.iter().map(|s| s.members().len()).sum()
    }

    pub fn slots(&self) -> &[Slot] {
        &self.slots
    }

    /// Every station in lock order: main list first, then each group's
    /// non-head members
    pub fn stations(&self) -> Vec<Arc<Station>> {
        let mut all: Vec<Arc<Station>> = self.slots.iter().map(|s| s.head().clone()).collect();
        for slot in &self.slots {
            if let Slot::Group(members) = slot {
                all.extend(members.iter().skip(1).cloned());
            }
        }
        all
    }

    pub fn find(&self, id: StationId) -> Option<Arc<Station>> {
        self.slots
            .iter()
            .flat_map(|s| s.members())
            .find(|s| s.id() == id)
            .cloned()
    }

    pub fn find_by_name(&self, name: &str) -> Option<Arc<Station>> {
        self.slots
            .iter()
            .flat_map(|s| s.members())
            .find(|s| s.name() == name)
            .cloned()
    }

    /// Smallest station id not in use
    pub fn next_id(&self) -> StationId {
        StationId(smallest_unused(
            self.slots.iter().flat_map(|s| s.members()).map(|s| s.id().0),
        ))
    }

    /// Main-list position; group members report their group's position
    pub fn position(&self, id: StationId) -> Option<usize> {
        self.slots.iter().position(|s| s.contains(id))
    }

    /// Index within the parallel group; 0 for serial stations and heads
    pub fn parallel_position(&self, id: StationId) -> Option<usize> {
        self.slots.iter().find_map(|slot| match slot {
            Slot::Serial(station) => (station.id() == id).then_some(0),
            Slot::Group(members) => members.iter().position(|s| s.id() == id),
        })
    }

    /// Slots after the one holding `id`; empty if `id` is not in the graph
    pub fn downstream_of(&self, id: StationId) -> Vec<Slot> {
        match self.position(id) {
            Some(pos) => self.slots[pos + 1..].to_vec(),
            None => Vec::new(),
        }
    }

    /// Head of the slot before the one holding `id`
    pub fn upstream_of(&self, id: StationId) -> Option<Arc<Station>> {
        let pos = self.position(id)?;
        pos.checked_sub(1).map(|p| self.slots[p].head().clone())
    }

    /// Insert a station
    ///
    /// A parallel station landing on an existing group joins it, unless
    /// `parallel` is [`ParallelPosition::NewHead`]. Position 0 belongs to
    /// GRAND_CENTRAL and parallel position 0 to the group head.
    pub fn insert(
        &mut self,
        station: Arc<Station>,
        position: Position,
        parallel: ParallelPosition,
    ) -> Result<()> {
        let position = match position {
            Position::At(0) => {
                return Err(EngineError::Configuration(
                    "position 0 is reserved for GRAND_CENTRAL".into(),
                ))
            }
            Position::At(p) if p < self.slots.len() && self.slots.len() >= 2 => p,
            _ => {
                self.slots.push(Slot::for_station(station));
                return Ok(());
            }
        };

        let config = station.config();
        if config.flow_mode == FlowMode::Parallel && parallel != ParallelPosition::NewHead {
            if let Slot::Group(members) = &mut self.slots[position] {
                if !members[0].config().admits_sibling(&config) {
                    return Err(EngineError::Configuration(format!(
                        "station '{}' is incompatible with parallel group '{}'",
                        station.name(),
                        members[0].name()
                    )));
                }
                match parallel {
                    ParallelPosition::At(0) => {
                        return Err(EngineError::Configuration(
                            "parallel position 0 is reserved for the group head".into(),
                        ))
                    }
                    ParallelPosition::At(p) if p < members.len() => members.insert(p, station),
                    _ => members.push(station),
                }
                return Ok(());
            }
        }

        self.slots.insert(position, Slot::for_station(station));
        Ok(())
    }

    /// Remove a station; removing a group head promotes the next member
    pub fn remove(&mut self, id: StationId) -> Option<Arc<Station>> {
        let pos = self.position(id)?;
        if let Slot::Group(members) = &mut self.slots[pos] {
            let index = members.iter().position(|s| s.id() == id)?;
            let station = members.remove(index);
            if members.is_empty() {
                self.slots.remove(pos);
            }
            return Some(station);
        }
        match self.slots.remove(pos) {
            Slot::Serial(station) => Some(station),
            Slot::Group(_) => None,
        }
    }
}
