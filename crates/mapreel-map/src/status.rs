//! Lifecycle state of the map instance and its legal transitions.

use std::fmt;

use mapreel_core::error::MapreelError;

/// Lifecycle of the map owned by a synchronizer.
///
/// `Uninitialized → Initializing → Idle ⇄ UpdatingStyle`, and any
/// non-terminal state may fail into the terminal `Error`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MapStatus {
    Uninitialized,
    Initializing,
    Idle,
    UpdatingStyle,
    Error,
}

/// Triggers for status transitions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusEvent {
    BeginInit,
    InitComplete,
    BeginStyleUpdate,
    StyleUpdateComplete,
    Fail,
}

impl MapStatus {
    /// A map operation is in flight; new sync requests are dropped.
    pub fn is_busy(&self) -> bool {
        matches!(self, MapStatus::Initializing | MapStatus::UpdatingStyle)
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, MapStatus::Error)
    }

    /// Apply `event`, rejecting edges that are not part of the lifecycle.
    pub fn transition(self, event: StatusEvent) -> Result<MapStatus, MapreelError> {
        use MapStatus::*;
        use StatusEvent::*;
        let next = match (self, event) {
            (Uninitialized, BeginInit) => Initializing,
            (Initializing, InitComplete) => Idle,
            (Idle, BeginStyleUpdate) => UpdatingStyle,
            (UpdatingStyle, StyleUpdateComplete) => Idle,
            (Uninitialized | Initializing | Idle | UpdatingStyle, Fail) => Error,
            (from, event) => {
                return Err(MapreelError::IllegalTransition {
                    from: from.to_string(),
                    to: format!("{:?}", event),
                })
            }
        };
        Ok(next)
    }
}

impl fmt::Display for MapStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            MapStatus::Uninitialized => "uninitialized",
            MapStatus::Initializing => "initializing",
            MapStatus::Idle => "idle",
            MapStatus::UpdatingStyle => "updating_style",
            MapStatus::Error => "error",
        };
        f.write_str(s)
    }
}
