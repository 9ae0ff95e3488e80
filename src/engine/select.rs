//! Event selection predicates.
//!
//! Stations in `match` mode use the built-in [`matches_select`] test; stations
//! in `user` mode delegate to an [`EventSelector`]. A selector is either
//! registered from Rust or compiled from a Rhai expression with
//! [`ScriptSelector`].
//!
//! ## Script Interface
//!
//! The expression sees:
//! - `control` - Array of the event's six control words
//! - `select` - Array of the station's six select words
//! - `group` - Event group number
//! - `priority` - `"high"` or `"low"`
//! - `length` - Payload length in bytes
//!
//! and must evaluate to a bool, e.g. `control[0] == 7 && length > 0`.

use crate::config::station::{SELECT_INTS, SELECT_WILDCARD};
use crate::engine::event::Event;
use crate::error::{EngineError, Result, ResultExt};
use rhai::{Array, Dynamic, Engine, Scope, AST};

/// Predicate deciding whether a station takes an event
#[cfg_attr(test, mockall::automock)]
pub trait EventSelector: Send + Sync {
    /// True if the station with these select words should receive `event`
    fn select(&self, select: &[i32; SELECT_INTS], event: &Event) -> bool;
}

/// Built-in match: OR over the select words that are not wildcards.
///
/// Even positions test equality with the control word, odd positions test
/// for any common bit.
pub fn matches_select(select: &[i32; SELECT_INTS], control: &[i32; SELECT_INTS]) -> bool {
    select
        .iter()
        .zip(control.iter())
        .enumerate()
        .any(|(i, (&sel, &ctl))| {
            sel != SELECT_WILDCARD && if i % 2 == 0 { sel == ctl } else { sel & ctl != 0 }
        })
}

/// Selector backed by a compiled Rhai expression
pub struct ScriptSelector {
    engine: Engine,
    ast: AST,
    source: String,
}

impl ScriptSelector {
    /// Compile a selector script
    pub fn compile(source: &str) -> Result<Self> {
        let mut engine = Engine::new();
        engine.set_max_expr_depths(64, 64);
        engine.set_max_call_levels(32);
        engine.set_max_operations(10_000);
        engine.set_max_array_size(1_000);

        let ast = engine
            .compile(source)
            .map_err(|e| EngineError::Script(format!("Compile error: {}", e)))?;

        Ok(Self {
            engine,
            ast,
            source: source.to_string(),
        })
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    /// Evaluate the script against an event
    pub fn evaluate(&self, select: &[i32; SELECT_INTS], event: &Event) -> Result<bool> {
        let mut scope = Scope::new();
        scope.push("control", to_array(event.control()));
        scope.push("select", to_array(select));
        scope.push("group", event.group() as i64);
        scope.push("priority", event.priority().to_string());
        scope.push("length", event.length() as i64);

        self.engine
            .eval_ast_with_scope::<bool>(&mut scope, &self.ast)
            .with_context(|| format!("Selector script failed on event {}", event.id()))
    }
}

impl EventSelector for ScriptSelector {
    fn select(&self, select: &[i32; SELECT_INTS], event: &Event) -> bool {
        self.evaluate(select, event).unwrap_or_else(|e| {
            tracing::warn!("{}", e);
            false
        })
    }
}

impl std::fmt::Debug for ScriptSelector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScriptSelector")
            .field("source", &self.source)
            .finish()
    }
}

fn to_array(words: &[i32; SELECT_INTS]) -> Array {
    words.iter().map(|&w| Dynamic::from(w as i64)).collect()
}
