//! Test data builders for creating test objects

use event_transit::config::{
    BlockMode, FlowMode, RestoreMode, SelectMode, StationConfig, StationSpec, SystemConfig,
    SELECT_WILDCARD,
};
use event_transit::engine::{EventSystem, ParallelPosition, Position, StationId};

/// Builder for creating test station configurations
pub struct StationBuilder {
    name: String,
    config: StationConfig,
    position: Position,
    parallel: ParallelPosition,
}

impl StationBuilder {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            config: StationConfig::default(),
            position: Position::End,
            parallel: ParallelPosition::End,
        }
    }

    pub fn parallel(mut self) -> Self {
        self.config.flow_mode = FlowMode::Parallel;
        self
    }

    pub fn round_robin(self) -> Self {
        self.select_mode(SelectMode::RoundRobin).parallel()
    }

    pub fn equal_cue(self) -> Self {
        self.select_mode(SelectMode::EqualCue).parallel()
    }

    pub fn select_mode(mut self, mode: SelectMode) -> Self {
        self.config.select_mode = mode;
        self
    }

    pub fn non_blocking(mut self, cue: usize) -> Self {
        self.config.block_mode = BlockMode::NonBlocking;
        self.config.cue = cue;
        self
    }

    pub fn prescale(mut self, prescale: u32) -> Self {
        self.config.prescale = prescale;
        self
    }

    pub fn restore(mut self, mode: RestoreMode) -> Self {
        self.config.restore_mode = mode;
        self
    }

    pub fn user_mode(mut self, max_attachments: usize) -> Self {
        self.config.user_mode = max_attachments;
        self
    }

    /// Match events whose first control word equals `value`
    pub fn match_word(mut self, value: i32) -> Self {
        self.config.select_mode = SelectMode::Match;
        self.config.select = [SELECT_WILDCARD; 6];
        self.config.select[0] = value;
        self
    }

    pub fn script(mut self, source: &str) -> Self {
        self.config.select_mode = SelectMode::User;
        self.config.select_script = Some(source.to_string());
        self
    }

    pub fn at(mut self, position: usize) -> Self {
        self.position = Position::At(position);
        self
    }

    pub fn sibling_at(mut self, parallel: usize) -> Self {
        self.parallel = ParallelPosition::At(parallel);
        self
    }

    pub fn config(&self) -> StationConfig {
        self.config.clone()
    }

    pub fn spec(self) -> StationSpec {
        let mut spec = StationSpec::new(self.name, self.config);
        if let Position::At(p) = self.position {
            spec.position = Some(p);
        }
        match self.parallel {
            ParallelPosition::At(p) => spec.parallel_position = Some(p),
            ParallelPosition::NewHead => spec.new_group = true,
            ParallelPosition::End => {}
        }
        spec
    }

    /// Create the station in `system`
    pub fn create(self, system: &EventSystem) -> StationId {
        system
            .create_station(&self.name, self.config, self.position, self.parallel)
            .expect("station creation")
    }
}

/// Builder for creating test system configurations
pub struct SystemBuilder {
    config: SystemConfig,
}

impl SystemBuilder {
    pub fn new(num_events: usize) -> Self {
        Self {
            config: SystemConfig::new(num_events, 64),
        }
    }

    pub fn event_size(mut self, size: usize) -> Self {
        self.config.event_size = size;
        self
    }

    pub fn groups(mut self, groups: &[usize]) -> Self {
        self.config.groups = groups.to_vec();
        self
    }

    pub fn stations_max(mut self, max: usize) -> Self {
        self.config.stations_max = max;
        self
    }

    pub fn attachments_max(mut self, max: usize) -> Self {
        self.config.attachments_max = max;
        self
    }

    pub fn station(mut self, station: StationBuilder) -> Self {
        self.config.stations.push(station.spec());
        self
    }

    pub fn build(self) -> SystemConfig {
        self.config
    }

    pub fn start(self) -> EventSystem {
        EventSystem::start(self.config).expect("system start")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_station_builder() {
        let config = StationBuilder::new("s").round_robin().config();
        assert_eq!(config.flow_mode, FlowMode::Parallel);
        assert_eq!(config.select_mode, SelectMode::RoundRobin);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_system_builder() {
        let config = SystemBuilder::new(10)
            .groups(&[6, 4])
            .station(StationBuilder::new("a"))
            .build();
        assert_eq!(config.group_count(), 2);
        assert_eq!(config.stations.len(), 1);
        assert!(config.validate().is_ok());
    }
}
