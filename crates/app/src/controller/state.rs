//! Shared telemetry cells read and written across request handlers and the
//! capture loop.
//!
//! Each cell has its own lock and the lock is only held to clone or replace
//! the value, never across a hardware call.

use std::{
    fmt,
    sync::{Arc, Mutex},
};

use drive::MotionCommand;

/// A single value behind its own lock.
pub(crate) struct TelemetryCell<T> {
    value: Mutex<T>,
}

impl<T: Clone> TelemetryCell<T> {
    pub(crate) fn new(initial: T) -> Self {
        Self {
            value: Mutex::new(initial),
        }
    }

    pub(crate) fn get(&self) -> T {
        match self.value.lock() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    pub(crate) fn set(&self, value: T) {
        match self.value.lock() {
            Ok(mut guard) => *guard = value,
            Err(poisoned) => *poisoned.into_inner() = value,
        }
    }
}

/// Last command string accepted by the intake endpoint, verbatim, and what it
/// resolved to.
#[derive(Clone, Debug, PartialEq, Eq)]
pub(crate) struct CommandRecord {
    pub(crate) raw: String,
    pub(crate) command: MotionCommand,
}

impl Default for CommandRecord {
    fn default() -> Self {
        Self {
            raw: String::new(),
            command: MotionCommand::Idle,
        }
    }
}

/// Output of the most recent classification.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub(crate) enum Classification {
    #[default]
    None,
    Crop(String),
}

impl Classification {
    pub(crate) fn crop(&self) -> Option<&str> {
        match self {
            Classification::None => None,
            Classification::Crop(label) => Some(label),
        }
    }
}

impl fmt::Display for Classification {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Classification::None => f.write_str("none"),
            Classification::Crop(label) => f.write_str(label),
        }
    }
}

/// The two telemetry cells, shared by `Arc` for the life of the process.
#[derive(Clone)]
pub(crate) struct SharedTelemetry {
    pub(crate) command: Arc<TelemetryCell<CommandRecord>>,
    pub(crate) classification: Arc<TelemetryCell<Classification>>,
}

impl SharedTelemetry {
    pub(crate) fn new() -> Self {
        Self {
            command: Arc::new(TelemetryCell::new(CommandRecord::default())),
            classification: Arc::new(TelemetryCell::new(Classification::None)),
        }
    }
}
