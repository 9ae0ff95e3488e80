//! # event-transit: In-Process Event Distribution
//!
//! A fixed pool of reusable event buffers circulates through an ordered
//! chain of named stations. Clients attach to a station, take events from
//! its input queue, work on them, and put them back into its output queue.
//! A conductor thread per station forwards output events to the stations
//! after it, and every event finally returns to the pool station,
//! GRAND_CENTRAL.
//!
//! ## Architecture
//!
//! - **Engine**: pool, queues, stations, the station graph, conductors and
//!   attachments, behind the [`engine::EventSystem`] facade
//! - **Selection**: control-word matching or Rhai selector scripts decide
//!   which events a station receives
//! - **Fan-out**: parallel station groups split traffic round-robin or by
//!   equal queue depth
//! - **Monitoring**: a background thread publishes snapshots over
//!   crossbeam channels
//!
//! ## Configuration
//!
//! [`config::SystemConfig`] is loaded from TOML or JSON. Without an explicit
//! path it is looked up under the platform config directory in
//! `event-transit/system.toml`.
//!
//! ## Example
//!
//! ```
//! use event_transit::config::{StationConfig, SystemConfig};
//! use event_transit::engine::{EventSystem, ParallelPosition, Position, StationId, WaitMode};
//!
//! let system = EventSystem::start(SystemConfig::new(16, 128)).unwrap();
//! let filter = system
//!     .create_station("filter", StationConfig::default(), Position::End, ParallelPosition::End)
//!     .unwrap();
//!
//! let producer = system.attach(StationId::GRAND_CENTRAL, "producer").unwrap();
//! let consumer = system.attach(filter, "consumer").unwrap();
//!
//! let events = system.new_events(producer, WaitMode::Async, 4, 128, None).unwrap();
//! system.put_events(producer, &events).unwrap();
//!
//! let mut received = Vec::new();
//! while received.len() < 4 {
//!     let budget = WaitMode::Timed(std::time::Duration::from_secs(1));
//!     received.extend(system.get_events(consumer, budget, 4).unwrap());
//! }
//! system.put_events(consumer, &received).unwrap();
//! ```

pub mod config;
pub mod engine;
pub mod error;
pub mod monitor;

pub use config::{StationConfig, SystemConfig};
pub use engine::EventSystem;
pub use error::{EngineError, Result};
pub use monitor::{Monitor, MonitorBridge};
