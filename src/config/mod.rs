//! Configuration module for event-transit
//!
//! This module handles system configuration:
//! - Pool dimensions (event count, event size, event groups)
//! - System caps (stations, attachments)
//! - Stations created at startup
//!
//! # Config Location
//!
//! When no path is given, the config is looked up in the platform config
//! directory under `event-transit/system.toml`:
//!
//! - **Linux**: `~/.config/event-transit/`
//! - **macOS**: `~/Library/Application Support/event-transit/`
//! - **Windows**: `%APPDATA%\event-transit\`
//!
//! # Formats
//!
//! Files ending in `.json` are read and written as JSON, everything else as TOML.
//!
//! # Example
//!
//! ```toml
//! num_events = 500
//! event_size = 4096
//! groups = [400, 100]
//!
//! [[stations]]
//! name = "filter"
//! select_mode = "match"
//! select = [1, -1, -1, -1, -1, -1]
//!
//! [[stations]]
//! name = "worker"
//! flow_mode = "parallel"
//! select_mode = "round_robin"
//! ```

pub mod station;

pub use station::*;

use crate::engine::graph::{ParallelPosition, Position};
use crate::error::{EngineError, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Application identifier for config directories
pub const APP_ID: &str = "event-transit";

/// Default config filename
pub const CONFIG_FILE: &str = "system.toml";

/// Default number of events in the pool
pub const DEFAULT_NUM_EVENTS: usize = 300;

/// Default size of an event buffer in bytes
pub const DEFAULT_EVENT_SIZE: usize = 1000;

/// Default maximum number of stations, GRAND_CENTRAL included
pub const DEFAULT_STATIONS_MAX: usize = 200;

/// Default maximum number of attachments
pub const DEFAULT_ATTACHMENTS_MAX: usize = 100;

// ==================== Config Directory ====================

/// Get the platform config directory for event-transit
pub fn config_dir() -> Option<PathBuf> {
    dirs_next::config_dir().map(|p| p.join(APP_ID))
}

/// Get the path of the default config file
pub fn default_config_path() -> Option<PathBuf> {
    config_dir().map(|p| p.join(CONFIG_FILE))
}

// ==================== Station Spec ====================

/// A station to create when the system starts
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StationSpec {
    /// Unique station name
    pub name: String,

    /// Main-list position, end of the list when absent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub position: Option<usize>,

    /// Position inside a parallel group, end of the group when absent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parallel_position: Option<usize>,

    /// Start a new parallel group at `position` instead of joining one
    #[serde(default)]
    pub new_group: bool,

    /// Station configuration
    #[serde(flatten)]
    pub config: StationConfig,
}

impl StationSpec {
    pub fn new(name: impl Into<String>, config: StationConfig) -> Self {
        Self {
            name: name.into(),
            position: None,
            parallel_position: None,
            new_group: false,
            config,
        }
    }

    /// Main-list and group placement of this station
    pub fn placement(&self) -> (Position, ParallelPosition) {
        let position = self.position.map_or(Position::End, Position::At);
        let parallel = if self.new_group {
            ParallelPosition::NewHead
        } else {
            self.parallel_position
                .map_or(ParallelPosition::End, ParallelPosition::At)
        };
        (position, parallel)
    }
}

// ==================== System Config ====================

/// Configuration of an event system
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SystemConfig {
    /// Number of events in the pool
    #[serde(default = "default_num_events")]
    pub num_events: usize,

    /// Size of each event buffer in bytes
    #[serde(default = "default_event_size")]
    pub event_size: usize,

    /// Number of events in each group; empty means one group holding every event
    #[serde(default)]
    pub groups: Vec<usize>,

    /// Maximum number of stations, GRAND_CENTRAL included
    #[serde(default = "default_stations_max")]
    pub stations_max: usize,

    /// Maximum number of attachments
    #[serde(default = "default_attachments_max")]
    pub attachments_max: usize,

    /// Stations created at startup, in order
    #[serde(default)]
    pub stations: Vec<StationSpec>,
}

fn default_num_events() -> usize {
    DEFAULT_NUM_EVENTS
}

fn default_event_size() -> usize {
    DEFAULT_EVENT_SIZE
}

fn default_stations_max() -> usize {
    DEFAULT_STATIONS_MAX
}

fn default_attachments_max() -> usize {
    DEFAULT_ATTACHMENTS_MAX
}

impl Default for SystemConfig {
    fn default() -> Self {
        Self {
            num_events: DEFAULT_NUM_EVENTS,
            event_size: DEFAULT_EVENT_SIZE,
            groups: Vec::new(),
            stations_max: DEFAULT_STATIONS_MAX,
            attachments_max: DEFAULT_ATTACHMENTS_MAX,
            stations: Vec::new(),
        }
    }
}

impl SystemConfig {
    /// Create a config with `num_events` events of `event_size` bytes
    pub fn new(num_events: usize, event_size: usize) -> Self {
        Self {
            num_events,
            event_size,
            ..Self::default()
        }
    }

    /// Effective group sizes; a single group of every event when none are set
    pub fn group_sizes(&self) -> Vec<usize> {
        if self.groups.is_empty() {
            vec![self.num_events]
        } else {
            self.groups.clone()
        }
    }

    /// Number of event groups
    pub fn group_count(&self) -> usize {
        self.groups.len().max(1)
    }

    /// Check that the configuration is self-consistent
    pub fn validate(&self) -> Result<()> {
        if self.num_events < 1 {
            return Err(EngineError::Configuration(
                "must have 1 or more events".into(),
            ));
        }
        if self.stations_max < 2 {
            return Err(EngineError::Configuration(
                "must allow at least 2 stations".into(),
            ));
        }
        if self.attachments_max < 1 {
            return Err(EngineError::Configuration(
                "must allow at least one attachment".into(),
            ));
        }
        if self.groups.iter().any(|&n| n < 1) {
            return Err(EngineError::Configuration(
                "each event group must contain at least one event".into(),
            ));
        }
        let grouped: usize = self.group_sizes().iter().sum();
        if grouped != self.num_events {
            return Err(EngineError::Configuration(format!(
                "events in groups ({}) != total event number ({})",
                grouped, self.num_events
            )));
        }
        for spec in &self.stations {
            spec.config.validate().map_err(|e| {
                e.with_context(format!("Invalid config for station '{}'", spec.name))
            })?;
        }
        Ok(())
    }

    /// Load a config file, TOML or JSON by extension
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| {
            EngineError::Config(format!("Failed to read config file {:?}: {}", path, e))
        })?;

        let config: SystemConfig = if is_json(path) {
            serde_json::from_str(&content).map_err(|e| {
                EngineError::Config(format!("Failed to parse config file {:?}: {}", path, e))
            })?
        } else {
            toml::from_str(&content).map_err(|e| {
                EngineError::Config(format!("Failed to parse config file {:?}: {}", path, e))
            })?
        };

        config.validate()?;
        Ok(config)
    }

    /// Load the config at `path`, or the default location, falling back to defaults
    pub fn load_or_default(path: Option<&Path>) -> Self {
        let path = match path.map(Path::to_path_buf).or_else(default_config_path) {
            Some(p) if p.exists() => p,
            _ => return Self::default(),
        };

        Self::load(&path).unwrap_or_else(|e| {
            tracing::warn!("Failed to load config from {:?}, using defaults: {}", path, e);
            Self::default()
        })
    }

    /// Save the config, TOML or JSON by extension
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();

        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).map_err(|e| {
                    EngineError::Config(format!("Failed to create config directory: {}", e))
                })?;
            }
        }

        let content = if is_json(path) {
            serde_json::to_string_pretty(self)
                .map_err(|e| EngineError::Serialization(e.to_string()))?
        } else {
            toml::to_string_pretty(self).map_err(|e| EngineError::Serialization(e.to_string()))?
        };

        std::fs::write(path, content)
            .map_err(|e| EngineError::Config(format!("Failed to write config {:?}: {}", path, e)))
    }
}

fn is_json(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| ext.eq_ignore_ascii_case("json"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = SystemConfig::default();
        assert_eq!(config.num_events, 300);
        assert_eq!(config.event_size, 1000);
        assert_eq!(config.group_sizes(), vec![300]);
        assert_eq!(config.group_count(), 1);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_groups_must_sum_to_total() {
        let mut config = SystemConfig::new(10, 64);
        config.groups = vec![4, 5];
        assert!(config.validate().is_err());

        config.groups = vec![4, 6];
        assert!(config.validate().is_ok());
        assert_eq!(config.group_count(), 2);

        config.groups = vec![0, 10];
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_caps_validated() {
        let mut config = SystemConfig::new(10, 64);
        config.stations_max = 1;
        assert!(config.validate().is_err());

        let mut config = SystemConfig::new(10, 64);
        config.attachments_max = 0;
        assert!(config.validate().is_err());

        assert!(SystemConfig::new(0, 64).validate().is_err());
    }

    #[test]
    fn test_station_spec_placement() {
        let mut spec = StationSpec::new("a", StationConfig::default());
        assert_eq!(spec.placement(), (Position::End, ParallelPosition::End));

        spec.position = Some(2);
        spec.parallel_position = Some(1);
        assert_eq!(spec.placement(), (Position::At(2), ParallelPosition::At(1)));

        spec.new_group = true;
        assert_eq!(spec.placement().1, ParallelPosition::NewHead);
    }

    #[test]
    fn test_parse_toml_with_stations() {
        let text = r#"
            num_events = 20
            event_size = 128
            groups = [15, 5]

            [[stations]]
            name = "filter"
            select_mode = "match"
            select = [1, -1, -1, -1, -1, -1]

            [[stations]]
            name = "worker"
            flow_mode = "parallel"
            select_mode = "round_robin"
        "#;
        let config: SystemConfig = toml::from_str(text).unwrap();
        assert_eq!(config.num_events, 20);
        assert_eq!(config.stations.len(), 2);
        assert_eq!(config.stations[0].config.select_mode, SelectMode::Match);
        assert_eq!(config.stations[0].config.select[0], 1);
        assert_eq!(config.stations[1].config.flow_mode, FlowMode::Parallel);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_invalid_station_in_config() {
        let mut config = SystemConfig::new(10, 64);
        config.stations.push(StationSpec::new(
            "bad",
            StationConfig::new().with_select_mode(SelectMode::RoundRobin),
        ));
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("bad"));
    }
}
