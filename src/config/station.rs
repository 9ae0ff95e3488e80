//! Station configuration
//!
//! A [`StationConfig`] describes how a station takes part in routing: where it
//! sits in the flow (serial or in a parallel group), whether upstream
//! conductors must wait for it, which events it selects, how many it keeps,
//! and where a departing attachment's events go.
//!
//! # Modes
//!
//! - [`FlowMode`] - serial stage or member of a parallel group
//! - [`BlockMode`] - blocking stations see every selected event, non-blocking ones
//!   keep at most `cue` events and let the rest pass
//! - [`SelectMode`] - all events, built-in control-word matching, a user
//!   predicate, or one of the two fan-out policies for parallel groups
//! - [`RestoreMode`] - destination of a detaching attachment's used events

use crate::error::{EngineError, Result};
use serde::{Deserialize, Serialize};

/// Number of integer words used for event selection
pub const SELECT_INTS: usize = 6;

/// Select word value meaning "ignore this position"
pub const SELECT_WILDCARD: i32 = -1;

/// Default input capacity of a non-blocking station
pub const DEFAULT_CUE: usize = 10;

/// Default prescale of a blocking station
pub const DEFAULT_PRESCALE: u32 = 1;

/// Position of a station in the event flow
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum FlowMode {
    /// A single stage in the main list
    #[default]
    Serial,
    /// One of several sibling stages sharing a main-list position
    Parallel,
}

impl std::fmt::Display for FlowMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FlowMode::Serial => write!(f, "serial"),
            FlowMode::Parallel => write!(f, "parallel"),
        }
    }
}

/// Whether upstream conductors must hand this station every selected event
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum BlockMode {
    #[default]
    Blocking,
    NonBlocking,
}

impl std::fmt::Display for BlockMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BlockMode::Blocking => write!(f, "blocking"),
            BlockMode::NonBlocking => write!(f, "non-blocking"),
        }
    }
}

/// Event selection policy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum SelectMode {
    /// Every event
    #[default]
    All,
    /// Built-in match of select words against event control words
    Match,
    /// User-supplied predicate (Rhai script or registered selector)
    User,
    /// Spread each batch evenly over the active members of a parallel group
    RoundRobin,
    /// Fill the shallowest input queues of a parallel group first
    EqualCue,
}

impl SelectMode {
    /// True for the policies that distribute over a whole parallel group
    pub fn is_fan_out(self) -> bool {
        matches!(self, SelectMode::RoundRobin | SelectMode::EqualCue)
    }
}

impl std::fmt::Display for SelectMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SelectMode::All => write!(f, "all"),
            SelectMode::Match => write!(f, "match"),
            SelectMode::User => write!(f, "user"),
            SelectMode::RoundRobin => write!(f, "round-robin"),
            SelectMode::EqualCue => write!(f, "equal-cue"),
        }
    }
}

/// Where a detaching attachment's used events are restored to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum RestoreMode {
    /// Back to the pool
    Gc,
    /// Into the station's output queue, as if put
    #[default]
    Output,
    /// Back into the station's input queue
    Input,
    /// Into the previous station's output queue so fan-out runs again
    Redistribute,
}

impl std::fmt::Display for RestoreMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RestoreMode::Gc => write!(f, "grand central"),
            RestoreMode::Output => write!(f, "output"),
            RestoreMode::Input => write!(f, "input"),
            RestoreMode::Redistribute => write!(f, "redistribute"),
        }
    }
}

/// Configuration of a single station
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StationConfig {
    pub flow_mode: FlowMode,
    pub block_mode: BlockMode,
    pub select_mode: SelectMode,
    pub restore_mode: RestoreMode,

    /// Maximum number of attachments, 0 for no limit
    pub user_mode: usize,

    /// Forward one of every `prescale` selected events (blocking stations)
    pub prescale: u32,

    /// Input capacity of a non-blocking station
    pub cue: usize,

    /// Words compared against event control words in match mode
    pub select: [i32; SELECT_INTS],

    /// Rhai expression used as the predicate in user mode
    #[serde(skip_serializing_if = "Option::is_none")]
    pub select_script: Option<String>,
}

impl Default for StationConfig {
    fn default() -> Self {
        Self {
            flow_mode: FlowMode::Serial,
            block_mode: BlockMode::Blocking,
            select_mode: SelectMode::All,
            restore_mode: RestoreMode::Output,
            user_mode: 0,
            prescale: DEFAULT_PRESCALE,
            cue: DEFAULT_CUE,
            select: [SELECT_WILDCARD; SELECT_INTS],
            select_script: None,
        }
    }
}

impl StationConfig {
    /// Create a default (serial, blocking, select-all) configuration
    pub fn new() -> Self {
        Self::default()
    }

    /// A parallel station using the given fan-out policy
    pub fn fan_out(select_mode: SelectMode) -> Self {
        Self {
            flow_mode: FlowMode::Parallel,
            select_mode,
            ..Self::default()
        }
    }

    pub fn with_flow_mode(mut self, mode: FlowMode) -> Self {
        self.flow_mode = mode;
        self
    }

    pub fn with_block_mode(mut self, mode: BlockMode) -> Self {
        self.block_mode = mode;
        self
    }

    pub fn with_select_mode(mut self, mode: SelectMode) -> Self {
        self.select_mode = mode;
        self
    }

    pub fn with_restore_mode(mut self, mode: RestoreMode) -> Self {
        self.restore_mode = mode;
        self
    }

    pub fn with_user_mode(mut self, max_attachments: usize) -> Self {
        self.user_mode = max_attachments;
        self
    }

    pub fn with_prescale(mut self, prescale: u32) -> Self {
        self.prescale = prescale;
        self
    }

    pub fn with_cue(mut self, cue: usize) -> Self {
        self.cue = cue;
        self
    }

    pub fn with_select(mut self, select: [i32; SELECT_INTS]) -> Self {
        self.select = select;
        self
    }

    pub fn with_select_script(mut self, script: impl Into<String>) -> Self {
        self.select_script = Some(script.into());
        self
    }

    /// Maximum attachments allowed, `None` when unlimited
    pub fn attachment_limit(&self) -> Option<usize> {
        (self.user_mode > 0).then_some(self.user_mode)
    }

    /// Check that the configuration is self-consistent
    pub fn validate(&self) -> Result<()> {
        if self.cue < 1 {
            return Err(EngineError::Configuration("cue must be at least 1".into()));
        }
        if self.prescale < 1 {
            return Err(EngineError::Configuration(
                "prescale must be at least 1".into(),
            ));
        }

        if self.select_mode.is_fan_out()
            && (self.flow_mode == FlowMode::Serial
                || self.block_mode == BlockMode::NonBlocking
                || self.restore_mode == RestoreMode::Input
                || self.prescale != 1)
        {
            return Err(EngineError::Configuration(format!(
                "{} stations must be parallel, blocking, prescale 1 and not restore to input",
                self.select_mode
            )));
        }

        if self.restore_mode == RestoreMode::Redistribute && self.flow_mode != FlowMode::Parallel
        {
            return Err(EngineError::Configuration(
                "redistribute restore mode requires a parallel station".into(),
            ));
        }

        Ok(())
    }

    /// Whether a station with config `other` may join a parallel group headed
    /// by a station with this config
    pub fn admits_sibling(&self, other: &StationConfig) -> bool {
        if self.flow_mode != FlowMode::Parallel || other.flow_mode != FlowMode::Parallel {
            return false;
        }

        if self.select_mode.is_fan_out() {
            other.select_mode == self.select_mode
                && other.block_mode == self.block_mode
                && other.prescale == self.prescale
        } else {
            !other.select_mode.is_fan_out()
        }
    }
}
