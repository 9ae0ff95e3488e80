//! The event system facade.
//!
//! [`EventSystem`] owns the pool, the station graph and the attachment
//! table, and exposes the operations clients use: station administration,
//! attach/detach, and getting, putting and dumping events.
//!
//! Clients never hold references into the pool. Every event-handling call
//! takes an [`AttachmentId`] and works with [`EventId`]s; payload access goes
//! through [`EventSystem::with_event`] and [`EventSystem::with_event_mut`],
//! which check ownership first.
//!
//! # Example
//!
//! ```
//! use event_transit::config::SystemConfig;
//! use event_transit::engine::{EventSystem, StationId, WaitMode};
//!
//! let system = EventSystem::start(SystemConfig::new(10, 64)).unwrap();
//! let gc = system.attach(StationId::GRAND_CENTRAL, "producer").unwrap();
//!
//! let events = system.new_events(gc, WaitMode::Async, 10, 64, None).unwrap();
//! assert_eq!(events.len(), 10);
//! system.dump_events(gc, &events).unwrap();
//! ```

use crate::config::station::{BlockMode, RestoreMode, SelectMode, StationConfig, SELECT_INTS};
use crate::config::SystemConfig;
use crate::engine::attachment::{
    restore_target, Attachment, AttachmentRegistry, RestoreTarget, SleepSession,
};
use crate::engine::conductor::Conductor;
use crate::engine::event::{Age, Event, EventPool, Priority};
use crate::engine::graph::{ParallelPosition, Position, StationGraph};
use crate::engine::id::{AttachmentId, EventId, Owner, StationId};
use crate::engine::queue::{EventRef, WaitMode};
use crate::engine::select::{EventSelector, ScriptSelector};
use crate::engine::snapshot::{
    AttachmentSnapshot, EventCensus, SnapshotCache, StationSnapshot, SystemSnapshot,
};
use crate::engine::station::{Station, StationStatus, GRAND_CENTRAL};
use crate::engine::{lock, read, write};
use crate::error::{EngineError, Result};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, RwLock};

/// State shared with the conductor threads
pub(crate) struct Shared {
    pub(crate) pool: EventPool,
    pub(crate) graph: RwLock<StationGraph>,
    /// Events drained by a conductor and not yet placed
    pub(crate) in_transit: AtomicUsize,
}

impl Shared {
    /// Build the pool and a graph holding only GRAND_CENTRAL
    pub(crate) fn new(config: &SystemConfig) -> Self {
        let grand_central = Arc::new(Station::new(
            StationId::GRAND_CENTRAL,
            GRAND_CENTRAL,
            StationConfig::default(),
            None,
        ));
        grand_central.set_status(StationStatus::Active);

        Self {
            pool: EventPool::new(&config.group_sizes(), config.event_size),
            graph: RwLock::new(StationGraph::new(grand_central)),
            in_transit: AtomicUsize::new(0),
        }
    }

    pub(crate) fn grand_central(&self) -> Arc<Station> {
        read(&self.graph).grand_central().clone()
    }
}

/// A running event system
pub struct EventSystem {
    config: SystemConfig,
    shared: Arc<Shared>,
    /// Serializes station creation, removal, moves, attach and detach
    admin: Mutex<()>,
    attachments: Mutex<AttachmentRegistry>,
    snapshots: SnapshotCache,
    stopped: AtomicBool,
}

impl EventSystem {
    /// Build the pool, stock GRAND_CENTRAL and create the configured stations
    pub fn start(config: SystemConfig) -> Result<Self> {
        config.validate()?;

        let shared = Arc::new(Shared::new(&config));
        let grand_central = shared.grand_central();

        let stock = shared
            .pool
            .ids()
            .map(|id| {
                let event = shared.pool.lock(id)?;
                Ok(EventRef::new(id, event.priority(), event.group()))
            })
            .collect::<Result<Vec<_>>>()?;
        grand_central.input().put_low(stock);
        grand_central.input().reset_events_in();
        grand_central.set_conductor(Conductor::spawn(grand_central.clone(), shared.clone())?);

        let system = Self {
            attachments: Mutex::new(AttachmentRegistry::new(config.attachments_max)),
            admin: Mutex::new(()),
            snapshots: SnapshotCache::default(),
            stopped: AtomicBool::new(false),
            shared,
            config,
        };

        tracing::info!(
            "Event system started: {} events of {} bytes in {} group(s)",
            system.config.num_events,
            system.config.event_size,
            system.config.group_count()
        );

        for spec in system.config.stations.clone() {
            let (position, parallel) = spec.placement();
            system
                .create_station(&spec.name, spec.config.clone(), position, parallel)
                .map_err(|e| e.with_context(format!("Failed to create station '{}'", spec.name)))?;
        }

        Ok(system)
    }

    pub fn config(&self) -> &SystemConfig {
        &self.config
    }

    /// Number of events in the pool
    pub fn num_events(&self) -> usize {
        self.shared.pool.len()
    }

    pub fn grand_central(&self) -> Arc<Station> {
        self.shared.grand_central()
    }

    pub fn station(&self, id: StationId) -> Result<Arc<Station>> {
        read(&self.shared.graph)
            .find(id)
            .ok_or_else(|| EngineError::NotFound(format!("station {}", id)))
    }

    pub fn station_id(&self, name: &str) -> Result<StationId> {
        read(&self.shared.graph)
            .find_by_name(name)
            .map(|s| s.id())
            .ok_or_else(|| EngineError::NotFound(format!("station '{}'", name)))
    }

    /// Every station in graph order
    pub fn stations(&self) -> Vec<Arc<Station>> {
        read(&self.shared.graph).stations()
    }

    pub fn attachment(&self, id: AttachmentId) -> Result<Arc<Attachment>> {
        lock(&self.attachments)
            .get(id)
            .cloned()
            .ok_or_else(|| EngineError::NotFound(format!("attachment {}", id)))
    }

    pub fn attachment_count(&self) -> usize {
        lock(&self.attachments).len()
    }

    // ==================== Graph Mutation ====================

    /// Run `f` with every conductor quiesced
    ///
    /// Caller must hold the admin lock so the station set is stable.
    fn quiesced<T>(&self, f: impl FnOnce() -> T) -> T {
        let stations = read(&self.shared.graph).stations();
        let _transfers: Vec<_> = stations.iter().map(|s| s.lock_transfer()).collect();
        f()
    }

    /// Apply `f` to a copy of the graph with every conductor quiesced and
    /// swap the copy in only if `f` succeeds
    fn mutate_graph<T>(&self, f: impl FnOnce(&mut StationGraph) -> Result<T>) -> Result<T> {
        self.quiesced(|| {
            let mut graph = read(&self.shared.graph).clone();
            let result = f(&mut graph)?;
            *write(&self.shared.graph) = graph;
            Ok(result)
        })
    }

    // ==================== Stations ====================

    /// Create a station, or return the id of an existing station with the
    /// same name and configuration
    pub fn create_station(
        &self,
        name: &str,
        config: StationConfig,
        position: Position,
        parallel: ParallelPosition,
    ) -> Result<StationId> {
        self.create(name, config, position, parallel, None)
    }

    /// Create a station in user select mode with a predicate implemented in Rust
    pub fn create_station_with_selector(
        &self,
        name: &str,
        config: StationConfig,
        position: Position,
        parallel: ParallelPosition,
        selector: Arc<dyn EventSelector>,
    ) -> Result<StationId> {
        self.create(name, config, position, parallel, Some(selector))
    }

    fn create(
        &self,
        name: &str,
        mut config: StationConfig,
        position: Position,
        parallel: ParallelPosition,
        selector: Option<Arc<dyn EventSelector>>,
    ) -> Result<StationId> {
        let _admin = lock(&self.admin);

        config.validate()?;
        config.cue = config.cue.min(self.shared.pool.len());
        if name.is_empty() {
            return Err(EngineError::Configuration("station name is empty".into()));
        }
        if name == GRAND_CENTRAL {
            return Err(EngineError::Configuration(format!(
                "station name '{}' is reserved",
                GRAND_CENTRAL
            )));
        }

        let (existing, count) = {
            let graph = read(&self.shared.graph);
            (graph.find_by_name(name), graph.station_count())
        };
        if let Some(existing) = existing {
            if existing.config() == config {
                return Ok(existing.id());
            }
            return Err(EngineError::Exists(name.to_string()));
        }
        if count >= self.config.stations_max {
            return Err(EngineError::TooMany(format!(
                "system limit of {} stations reached",
                self.config.stations_max
            )));
        }

        let selector = match (config.select_mode, selector, &config.select_script) {
            (SelectMode::User, Some(selector), _) => Some(selector),
            (SelectMode::User, None, Some(source)) => {
                Some(Arc::new(ScriptSelector::compile(source)?) as Arc<dyn EventSelector>)
            }
            (SelectMode::User, None, None) => {
                return Err(EngineError::Configuration(
                    "user select mode needs a selector script or a registered selector".into(),
                ))
            }
            (_, selector, _) => selector,
        };

        let id = read(&self.shared.graph).next_id();
        let station = Arc::new(Station::new(id, name, config, selector));
        self.mutate_graph(|graph| graph.insert(station.clone(), position, parallel))?;

        match Conductor::spawn(station.clone(), self.shared.clone()) {
            Ok(handle) => station.set_conductor(handle),
            Err(e) => {
                self.mutate_graph(|graph| Ok(graph.remove(id)))?;
                return Err(e);
            }
        }
        station.set_status(StationStatus::Idle);

        tracing::info!(
            "Created station '{}' ({}) at position {}",
            name,
            id,
            self.station_position(id).unwrap_or_default()
        );
        Ok(id)
    }

    /// Remove a station that has no attachments
    ///
    /// Events left in its queues go back to GRAND_CENTRAL.
    pub fn remove_station(&self, id: StationId) -> Result<()> {
        let _admin = lock(&self.admin);

        if id.is_grand_central() {
            return Err(EngineError::Configuration(
                "GRAND_CENTRAL cannot be removed".into(),
            ));
        }
        let station = self.station(id)?;
        let count = station.attachment_count();
        if count > 0 {
            return Err(EngineError::HasAttachments { station: id, count });
        }

        self.mutate_graph(|graph| Ok(graph.remove(id)))?;
        station.stop_conductor();
        station.set_status(StationStatus::Unused);

        let mut leftover = station.input().take_all();
        leftover.extend(station.output().take_all());
        if !leftover.is_empty() {
            tracing::debug!(
                "Returning {} events from removed station '{}'",
                leftover.len(),
                station.name()
            );
            self.grand_central().input().put_low(leftover);
        }

        tracing::info!("Removed station '{}' ({})", station.name(), id);
        Ok(())
    }

    /// Move a station; on failure the graph is left unchanged
    pub fn set_station_position(
        &self,
        id: StationId,
        position: Position,
        parallel: ParallelPosition,
    ) -> Result<()> {
        let _admin = lock(&self.admin);

        if id.is_grand_central() {
            return Err(EngineError::Configuration(
                "GRAND_CENTRAL cannot be moved".into(),
            ));
        }
        self.mutate_graph(|graph| {
            let station = graph
                .remove(id)
                .ok_or_else(|| EngineError::NotFound(format!("station {}", id)))?;
            graph.insert(station, position, parallel)
        })?;

        tracing::info!("Moved station {} to {:?}/{:?}", id, position, parallel);
        Ok(())
    }

    /// Main-list position of a station
    pub fn station_position(&self, id: StationId) -> Result<usize> {
        read(&self.shared.graph)
            .position(id)
            .ok_or_else(|| EngineError::NotFound(format!("station {}", id)))
    }

    /// Position within the station's parallel group; 0 for serial stations
    pub fn station_parallel_position(&self, id: StationId) -> Result<usize> {
        read(&self.shared.graph)
            .parallel_position(id)
            .ok_or_else(|| EngineError::NotFound(format!("station {}", id)))
    }

    // ==================== Station Settings ====================

    pub fn set_station_cue(&self, id: StationId, cue: usize) -> Result<()> {
        let cue = cue.min(self.shared.pool.len());
        self.reconfigure(id, |c| c.cue = cue)
    }

    pub fn set_station_prescale(&self, id: StationId, prescale: u32) -> Result<()> {
        self.reconfigure(id, |c| c.prescale = prescale)
    }

    pub fn set_station_block_mode(&self, id: StationId, mode: BlockMode) -> Result<()> {
        self.reconfigure(id, |c| c.block_mode = mode)
    }

    pub fn set_station_restore_mode(&self, id: StationId, mode: RestoreMode) -> Result<()> {
        self.reconfigure(id, |c| c.restore_mode = mode)
    }

    /// Limit the number of attachments, 0 for no limit
    pub fn set_station_user_mode(&self, id: StationId, max_attachments: usize) -> Result<()> {
        self.reconfigure(id, |c| c.user_mode = max_attachments)
    }

    pub fn set_station_select(&self, id: StationId, select: [i32; SELECT_INTS]) -> Result<()> {
        self.reconfigure(id, |c| c.select = select)
    }

    fn reconfigure(&self, id: StationId, change: impl FnOnce(&mut StationConfig)) -> Result<()> {
        let _admin = lock(&self.admin);

        if id.is_grand_central() {
            return Err(EngineError::Configuration(
                "GRAND_CENTRAL cannot be reconfigured".into(),
            ));
        }
        let station = self.station(id)?;
        let mut config = station.config();
        change(&mut config);
        config
            .validate()
            .map_err(|e| e.with_context(format!("Cannot reconfigure station '{}'", station.name())))?;

        {
            let graph = read(&self.shared.graph);
            let siblings = graph
                .position(id)
                .map(|pos| graph.slots()[pos].members().to_vec())
                .unwrap_or_default();
            if siblings
                .iter()
                .filter(|s| s.id() != id)
                .any(|s| !s.config().admits_sibling(&config))
            {
                return Err(EngineError::Configuration(format!(
                    "new settings for '{}' are incompatible with its parallel group",
                    station.name()
                )));
            }
        }

        self.quiesced(|| station.update_config(|c| *c = config));
        tracing::debug!("Reconfigured station '{}'", station.name());
        Ok(())
    }

    // ==================== Attachments ====================

    /// Attach a client to a station
    pub fn attach(&self, station: StationId, label: impl Into<String>) -> Result<AttachmentId> {
        let _admin = lock(&self.admin);
        let station = self.station(station)?;

        let mut registry = lock(&self.attachments);
        if let Some(limit) = station.config().attachment_limit() {
            if station.attachment_count() >= limit {
                return Err(EngineError::TooMany(format!(
                    "station '{}' allows {} attachment(s)",
                    station.name(),
                    limit
                )));
            }
        }
        let attachment = registry.register(station.clone(), label)?;
        let count = station.add_attachment(attachment.id());

        if count == 1 && !station.is_grand_central() {
            self.quiesced(|| station.set_status(StationStatus::Active));
        }
        drop(registry);

        tracing::info!(
            "Attachment {} ('{}') attached to '{}'",
            attachment.id(),
            attachment.label(),
            station.name()
        );
        Ok(attachment.id())
    }

    /// Detach a client, restoring any events it still owns
    pub fn detach(&self, id: AttachmentId) -> Result<()> {
        let _admin = lock(&self.admin);

        let attachment = lock(&self.attachments)
            .remove(id)
            .ok_or_else(|| EngineError::NotFound(format!("attachment {}", id)))?;
        let station = attachment.station().clone();
        let grand_central = self.grand_central();

        station.input().wake_one(attachment.token());
        grand_central.input().wake_one(attachment.token());

        let remaining = station.remove_attachment(id);
        if remaining == 0 && !station.is_grand_central() {
            self.quiesced(|| station.set_status(StationStatus::Idle));
            self.flush_idle_input(&station);
        }

        self.restore(&attachment, remaining)?;

        tracing::info!(
            "Attachment {} ('{}') detached from '{}'",
            id,
            attachment.label(),
            station.name()
        );
        Ok(())
    }

    /// Pass on events left in the input of a station that just went idle
    fn flush_idle_input(&self, station: &Station) {
        let pending = station.input().take_all();
        if pending.is_empty() {
            return;
        }

        tracing::debug!(
            "Station '{}' idle, passing on {} queued events",
            station.name(),
            pending.len()
        );
        let upstream = read(&self.shared.graph).upstream_of(station.id());
        match (station.config().restore_mode, upstream) {
            (RestoreMode::Redistribute, Some(upstream)) => upstream.output().put_reverse(&pending),
            _ => station.output().put(&pending),
        }
    }

    /// Return the events a departing attachment still owns
    fn restore(&self, attachment: &Attachment, remaining: usize) -> Result<()> {
        let mut fresh = Vec::new();
        let mut used = Vec::new();
        for id in self.shared.pool.ids() {
            let mut event = self.shared.pool.lock(id)?;
            if !event.is_owned_by(attachment.id()) {
                continue;
            }
            let entry = EventRef::new(id, event.priority(), event.group());
            match event.age() {
                Age::New => fresh.push(entry),
                Age::Used => used.push(entry),
            }
            event.release(false);
        }
        if fresh.is_empty() && used.is_empty() {
            return Ok(());
        }

        let station = attachment.station();
        let grand_central = self.grand_central();
        tracing::debug!(
            "Restoring {} new and {} used events of attachment {}",
            fresh.len(),
            used.len(),
            attachment.id()
        );
        grand_central.input().put_low(fresh);
        if used.is_empty() {
            return Ok(());
        }

        used.sort_by_key(|entry| entry.priority == Priority::Low);
        let config = station.config();
        match restore_target(
            config.restore_mode,
            config.block_mode,
            station.is_grand_central(),
            remaining,
        ) {
            RestoreTarget::GrandCentral => grand_central.input().put_low(used),
            RestoreTarget::OwnOutput => station.output().put(&used),
            RestoreTarget::OwnInput => station.input().put_reverse(&used),
            RestoreTarget::PreviousOutput => {
                match read(&self.shared.graph).upstream_of(station.id()) {
                    Some(upstream) => upstream.output().put_reverse(&used),
                    None => grand_central.input().put_low(used),
                }
            }
        }
        Ok(())
    }

    // ==================== Events ====================

    /// Draw fresh events from GRAND_CENTRAL, optionally from one group only
    pub fn new_events(
        &self,
        attachment: AttachmentId,
        mode: WaitMode,
        count: usize,
        size: usize,
        group: Option<u32>,
    ) -> Result<Vec<EventId>> {
        let attachment = self.attachment(attachment)?;
        let grand_central = self.grand_central();

        let entries = match group {
            Some(g) => {
                self.check_group(g)?;
                grand_central
                    .input()
                    .get_group(attachment.token(), mode, count, g)?
            }
            None => grand_central.input().get(attachment.token(), mode, count)?,
        };

        let ids = self.hand_over(&attachment, entries, Some(size), &grand_central)?;
        attachment.count_made(ids.len());
        Ok(ids)
    }

    /// Take events from the attachment's station input
    pub fn get_events(
        &self,
        attachment: AttachmentId,
        mode: WaitMode,
        count: usize,
    ) -> Result<Vec<EventId>> {
        let attachment = self.attachment(attachment)?;
        let station = attachment.station().clone();
        let entries = station.input().get(attachment.token(), mode, count)?;

        let ids = self.hand_over(&attachment, entries, None, &station)?;
        attachment.count_got(ids.len());
        Ok(ids)
    }

    /// Take only events of `group` from the attachment's station input
    pub fn get_group_events(
        &self,
        attachment: AttachmentId,
        mode: WaitMode,
        count: usize,
        group: u32,
    ) -> Result<Vec<EventId>> {
        self.check_group(group)?;
        let attachment = self.attachment(attachment)?;
        let station = attachment.station().clone();
        let entries = station
            .input()
            .get_group(attachment.token(), mode, count, group)?;

        let ids = self.hand_over(&attachment, entries, None, &station)?;
        attachment.count_got(ids.len());
        Ok(ids)
    }

    fn check_group(&self, group: u32) -> Result<()> {
        if group == 0 || group as usize > self.config.group_count() {
            return Err(EngineError::Configuration(format!(
                "no event group {} (groups are 1..={})",
                group,
                self.config.group_count()
            )));
        }
        Ok(())
    }

    /// Give events taken from `source`'s input to the attachment
    ///
    /// If the attachment was detached while waiting, the events go back to
    /// the front of the queue they came from.
    fn hand_over(
        &self,
        attachment: &Attachment,
        entries: Vec<EventRef>,
        init_size: Option<usize>,
        source: &Station,
    ) -> Result<Vec<EventId>> {
        let registry = lock(&self.attachments);
        if registry.get(attachment.id()).is_none() {
            drop(registry);
            if source.is_grand_central() {
                source.input().put_low(entries);
            } else {
                source.input().put_reverse(&entries);
            }
            return Err(EngineError::NotFound(format!(
                "attachment {}",
                attachment.id()
            )));
        }

        for entry in &entries {
            let mut event = self.shared.pool.lock(entry.id)?;
            match init_size {
                Some(size) => event.init(attachment.id(), size),
                None => event.hand_to(attachment.id()),
            }
        }
        Ok(entries.iter().map(|e| e.id).collect())
    }

    /// Hand events back to the attachment's station output
    pub fn put_events(&self, attachment: AttachmentId, events: &[EventId]) -> Result<()> {
        let attachment = self.attachment(attachment)?;
        let entries = self.claim(&attachment, events)?;
        attachment.station().output().put(&entries);
        attachment.count_put(entries.len());
        Ok(())
    }

    /// Return events straight to the pool
    pub fn dump_events(&self, attachment: AttachmentId, events: &[EventId]) -> Result<()> {
        let attachment = self.attachment(attachment)?;
        let entries = self.claim(&attachment, events)?;
        let count = entries.len();
        self.grand_central().input().put_low(entries);
        attachment.count_dumped(count);
        Ok(())
    }

    /// Take events back from an attachment, all or nothing
    fn claim(&self, attachment: &Attachment, events: &[EventId]) -> Result<Vec<EventRef>> {
        let mut sorted = events.to_vec();
        sorted.sort_unstable();
        sorted.dedup();
        if sorted.len() != events.len() {
            return Err(EngineError::Configuration(
                "event list contains duplicates".into(),
            ));
        }

        let mut guards = sorted
            .iter()
            .map(|&id| self.shared.pool.lock(id))
            .collect::<Result<Vec<_>>>()?;
        if let Some(event) = guards.iter().find(|ev| !ev.is_owned_by(attachment.id())) {
            return Err(EngineError::NotOwner {
                event: event.id(),
                attachment: attachment.id(),
            });
        }

        let mut by_id = HashMap::with_capacity(guards.len());
        for event in guards.iter_mut() {
            event.release(true);
            by_id.insert(
                event.id(),
                EventRef::new(event.id(), event.priority(), event.group()),
            );
        }
        drop(guards);

        Ok(events.iter().filter_map(|id| by_id.get(id).copied()).collect())
    }

    /// Read an owned event
    ///
    /// `f` runs under the event's lock and must not call back into the system.
    pub fn with_event<R>(
        &self,
        attachment: AttachmentId,
        id: EventId,
        f: impl FnOnce(&Event) -> R,
    ) -> Result<R> {
        let event = self.owned_event(attachment, id)?;
        Ok(f(&event))
    }

    /// Modify an owned event
    ///
    /// `f` runs under the event's lock and must not call back into the system.
    pub fn with_event_mut<R>(
        &self,
        attachment: AttachmentId,
        id: EventId,
        f: impl FnOnce(&mut Event) -> R,
    ) -> Result<R> {
        let mut event = self.owned_event(attachment, id)?;
        Ok(f(&mut event))
    }

    fn owned_event(
        &self,
        attachment: AttachmentId,
        id: EventId,
    ) -> Result<std::sync::MutexGuard<'_, Event>> {
        let event = self.shared.pool.lock(id)?;
        if !event.is_owned_by(attachment) {
            return Err(EngineError::NotOwner { event: id, attachment });
        }
        Ok(event)
    }

    // ==================== Wake-ups ====================

    /// Interrupt a blocked get of one attachment
    pub fn wake_attachment(&self, id: AttachmentId) -> Result<()> {
        let attachment = self.attachment(id)?;
        attachment.station().input().wake_one(attachment.token());
        self.grand_central().input().wake_one(attachment.token());
        Ok(())
    }

    /// Interrupt blocked gets of every attachment of a station
    pub fn wake_all_attachments(&self, station: StationId) -> Result<()> {
        let station = self.station(station)?;
        station.input().wake_all();

        let grand_central = self.grand_central();
        let registry = lock(&self.attachments);
        for attachment in registry.iter().filter(|a| a.station().id() == station.id()) {
            grand_central.input().wake_one(attachment.token());
        }
        Ok(())
    }

    /// Open a sleep session for a client that waits with repeated short
    /// timed gets
    ///
    /// While the returned guard lives, a wake requested between two gets is
    /// kept and fails the next get with `WakeUp`.
    pub fn sleep_session(&self, attachment: AttachmentId) -> Result<SleepSession> {
        Ok(SleepSession::open(self.attachment(attachment)?))
    }

    // ==================== Observation ====================

    /// Count where every event currently is
    ///
    /// Not atomic with respect to running conductors or clients, so the
    /// counts only add up exactly once the system is quiet.
    pub fn census(&self) -> EventCensus {
        let total = self.shared.pool.len();
        let mut seen = vec![0u32; total];
        let mut census = EventCensus {
            total,
            ..EventCensus::default()
        };

        for station in self.stations() {
            let input = station.input().entries();
            if station.is_grand_central() {
                census.free += input.len();
            } else {
                census.queued += input.len();
            }
            let output = station.output().entries();
            census.queued += output.len();
            for entry in input.iter().chain(&output) {
                if let Some(count) = seen.get_mut(entry.id.index()) {
                    *count += 1;
                }
            }
        }

        for id in self.shared.pool.ids() {
            let owned = self
                .shared
                .pool
                .lock(id)
                .map(|ev| ev.owner() != Owner::System)
                .unwrap_or(false);
            if owned {
                census.owned += 1;
                seen[id.index()] += 1;
            }
        }

        census.in_transit = self.shared.in_transit.load(Ordering::Acquire);
        census.conflicts = seen.iter().filter(|&&n| n > 1).count();
        census
    }

    /// Current snapshot; reused if the last one is under a second old
    pub fn snapshot(&self) -> Arc<SystemSnapshot> {
        self.snapshots.get_or_take(|| self.take_snapshot())
    }

    fn take_snapshot(&self) -> SystemSnapshot {
        let attachments: Vec<Arc<Attachment>> = lock(&self.attachments).iter().cloned().collect();

        let mut owned: HashMap<AttachmentId, usize> = HashMap::new();
        for id in self.shared.pool.ids() {
            if let Ok(event) = self.shared.pool.lock(id) {
                if let Some(owner) = event.owner().attachment() {
                    *owned.entry(owner).or_default() += 1;
                }
            }
        }

        let attachments: Vec<AttachmentSnapshot> = attachments
            .iter()
            .map(|a| AttachmentSnapshot {
                id: a.id(),
                station: a.station().id(),
                label: a.label().to_string(),
                counters: a.counters(),
                owned: owned.get(&a.id()).copied().unwrap_or(0),
                waiting: a.token().is_waiting(),
            })
            .collect();

        let stations: Vec<StationSnapshot> = {
            let graph = read(&self.shared.graph);
            graph
                .slots()
                .iter()
                .enumerate()
                .flat_map(|(position, slot)| {
                    slot.members()
                        .iter()
                        .enumerate()
                        .map(move |(parallel_position, station)| {
                            station_snapshot(station, position, parallel_position)
                        })
                })
                .collect()
        };

        SystemSnapshot {
            taken_at: chrono::Utc::now(),
            num_events: self.shared.pool.len(),
            event_size: self.shared.pool.event_size(),
            stations,
            attachments,
            census: self.census(),
        }
    }

    // ==================== Shutdown ====================

    /// Stop every conductor; further routing stops
    pub fn shutdown(&self) {
        if self.stopped.swap(true, Ordering::AcqRel) {
            return;
        }
        for station in self.stations().iter().rev() {
            station.stop_conductor();
        }
        tracing::info!("Event system stopped");
    }

    pub fn is_running(&self) -> bool {
        !self.stopped.load(Ordering::Acquire)
    }
}

fn station_snapshot(station: &Station, position: usize, parallel_position: usize) -> StationSnapshot {
    StationSnapshot {
        id: station.id(),
        name: station.name().to_string(),
        status: station.status(),
        position,
        parallel_position,
        config: station.config(),
        input_depth: station.input().len(),
        output_depth: station.output().len(),
        input: station.input().counters(),
        output: station.output().counters(),
        attachments: station.attachment_count(),
    }
}

impl Drop for EventSystem {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl std::fmt::Debug for EventSystem {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventSystem")
            .field("num_events", &self.shared.pool.len())
            .field("stations", &read(&self.shared.graph).station_count())
            .field("attachments", &self.attachment_count())
            .field("running", &self.is_running())
            .finish()
    }
}
