//! Error handling for the event-transit engine
//!
//! This module defines the engine error type and a Result alias used
//! throughout the crate. Every public operation reports failure
//! synchronously through [`EngineError`]; the per-station conductors have
//! no caller and only log.

use crate::engine::id::{AttachmentId, EventId, StationId};
use thiserror::Error;

/// Main error type for event-transit operations
#[derive(Error, Debug)]
pub enum EngineError {
    /// A station, attachment or event does not exist
    #[error("Not found: {0}")]
    NotFound(String),

    /// A station or attachment cap has been reached
    #[error("Too many: {0}")]
    TooMany(String),

    /// Invalid or conflicting station or system setup
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// A station with the same name but a different configuration exists
    #[error("Station '{0}' already exists with a different configuration")]
    Exists(String),

    /// Station still has attachments and cannot be removed
    #[error("Station {station} still has {count} attachment(s)")]
    HasAttachments { station: StationId, count: usize },

    /// Event handed back by an attachment that does not own it
    #[error("Event {event} is not owned by attachment {attachment}")]
    NotOwner {
        event: EventId,
        attachment: AttachmentId,
    },

    /// An asynchronous get found nothing to return
    #[error("No events available")]
    Empty,

    /// A timed get ran out of budget
    #[error("Timed out waiting for events")]
    Timeout,

    /// A blocked get was interrupted by an explicit wake
    #[error("Woken up while waiting for events")]
    WakeUp,

    /// Reserved for operations that cannot proceed right now
    #[error("Busy: {0}")]
    Busy(String),

    /// Errors related to selector scripts
    #[error("Script error: {0}")]
    Script(String),

    /// Errors related to configuration files
    #[error("Config file error: {0}")]
    Config(String),

    /// IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization errors
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Generic errors with context
    #[error("{context}: {source}")]
    WithContext {
        context: String,
        #[source]
        source: Box<EngineError>,
    },
}

impl EngineError {
    /// Add context to an error
    pub fn with_context(self, context: impl Into<String>) -> Self {
        EngineError::WithContext {
            context: context.into(),
            source: Box::new(self),
        }
    }

    /// Create a script error from a Rhai error
    pub fn from_rhai_error(err: Box<rhai::EvalAltResult>) -> Self {
        EngineError::Script(err.to_string())
    }

    /// The innermost error, with any context layers removed
    pub fn root(&self) -> &EngineError {
        match self {
            EngineError::WithContext { source, .. } => source.root(),
            other => other,
        }
    }

    /// True for the three outcomes a waiting get can end with instead of events
    pub fn is_wait_outcome(&self) -> bool {
        matches!(
            self.root(),
            EngineError::Empty | EngineError::Timeout | EngineError::WakeUp
        )
    }
}

/// Result type alias for event-transit operations
pub type Result<T> = std::result::Result<T, EngineError>;

/// Extension trait for adding context to Results
pub trait ResultExt<T> {
    /// Add context to an error result
    fn context(self, context: impl Into<String>) -> Result<T>;

    /// Add context lazily to an error result
    fn with_context<F>(self, f: F) -> Result<T>
    where
        F: FnOnce() -> String;
}

impl<T> ResultExt<T> for Result<T> {
    fn context(self, context: impl Into<String>) -> Result<T> {
        self.map_err(|e| e.with_context(context))
    }

    fn with_context<F>(self, f: F) -> Result<T>
    where
        F: FnOnce() -> String,
    {
        self.map_err(|e| e.with_context(f()))
    }
}

impl<T> ResultExt<T> for std::result::Result<T, Box<rhai::EvalAltResult>> {
    fn context(self, context: impl Into<String>) -> Result<T> {
        self.map_err(|e| EngineError::from_rhai_error(e).with_context(context))
    }

    fn with_context<F>(self, f: F) -> Result<T>
    where
        F: FnOnce() -> String,
    {
        self.map_err(|e| EngineError::from_rhai_error(e).with_context(f()))
    }
}
