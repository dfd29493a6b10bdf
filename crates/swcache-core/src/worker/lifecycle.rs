//! Worker lifecycle states and transitions.

use std::fmt;
use std::sync::Mutex;

use super::WorkerError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum WorkerState {
    #[default]
    Uninstalled,
    /// Precache in progress
    Installing,
    /// Precache complete, waiting for activate
    Installed,
    /// Purging stale stores
    Activating,
    /// Controlling requests
    Active,
    /// Install or activation failed, or a newer version took over. Terminal.
    Redundant,
}

impl fmt::Display for WorkerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Uninstalled => "uninstalled",
            Self::Installing => "installing",
            Self::Installed => "installed",
            Self::Activating => "activating",
            Self::Active => "active",
            Self::Redundant => "redundant",
        };
        f.write_str(name)
    }
}

pub(crate) fn is_valid_transition(from: WorkerState, to: WorkerState) -> bool {
    use WorkerState::*;

    matches!(
        (from, to),
        (Uninstalled, Installing)
            | (Installing, Installed)
            | (Installing, Redundant)
            | (Installed, Activating)
            | (Activating, Active)
            | (Activating, Redundant)
            | (Active, Redundant)
    )
}

/// Current state behind a mutex. The value is `Copy`, so a poisoned lock
/// still holds a usable state and is recovered rather than propagated.
#[derive(Debug, Default)]
pub(crate) struct StateCell(Mutex<WorkerState>);

impl StateCell {
    pub(crate) fn get(&self) -> WorkerState {
        *self.0.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Check-and-set in one critical section so two concurrent `on_install`
    /// calls cannot both leave `Uninstalled`.
    pub(crate) fn transition(&self, to: WorkerState) -> Result<WorkerState, WorkerError> {
        let mut state = self.0.lock().unwrap_or_else(|e| e.into_inner());
        let from = *state;
        if !is_valid_transition(from, to) {
            return Err(WorkerError::InvalidState { from, to });
        }
        *state = to;
        Ok(from)
    }

    /// Jump straight to a state rebuilt from storage. Only allowed before the
    /// worker has done anything.
    pub(crate) fn restore(&self, to: WorkerState) -> Result<(), WorkerError> {
        let mut state = self.0.lock().unwrap_or_else(|e| e.into_inner());
        if *state != WorkerState::Uninstalled {
            return Err(WorkerError::InvalidState { from: *state, to });
        }
        *state = to;
        Ok(())
    }
}
