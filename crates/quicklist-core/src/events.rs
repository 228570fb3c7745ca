use serde::Serialize;
use uuid::Uuid;

use crate::config::Settings;
use crate::engine::SessionState;
use crate::models::{ContainerId, MutationKind};

/// Notifications for the presentation layer.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum CoreEvent {
    SessionStateChanged {
        session_id: Uuid,
        state: SessionState,
    },
    MutationApplied {
        session_id: Uuid,
        container_id: ContainerId,
        kind: MutationKind,
    },
    MutationFailed {
        session_id: Uuid,
        container_id: ContainerId,
        kind: MutationKind,
        error: String,
    },
    /// Settings changed outside this process and were picked up.
    SettingsReloaded(Settings),
}

/// What the page tells the core about navigation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PageEvent {
    /// A profile for `handle` is now visible.
    SubjectDiscovered { handle: String },
    /// The page navigated; any open session is abandoned.
    RouteChanged,
}
