use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

pub type ContainerId = String;
pub type SubjectId = String;

/// Ordered so diffs and logs are deterministic.
pub type ContainerIdSet = BTreeSet<ContainerId>;

/// A remote user, as discovered on the page.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Subject {
    handle: String,
    identifier: Option<SubjectId>,
}

impl Subject {
    /// Handles are case-insensitive; the canonical form is lowercase
    /// without a leading `@`.
    pub fn new(handle: &str) -> Self {
        Self {
            handle: normalize_handle(handle),
            identifier: None,
        }
    }

    /// A subject whose identifier is already known to the caller.
    pub fn with_identifier(handle: &str, identifier: impl Into<SubjectId>) -> Self {
        Self {
            handle: normalize_handle(handle),
            identifier: Some(identifier.into()),
        }
    }

    pub fn handle(&self) -> &str {
        &self.handle
    }

    pub fn identifier(&self) -> Option<&str> {
        self.identifier.as_deref()
    }

    pub(crate) fn set_identifier(&mut self, identifier: SubjectId) {
        // Identifiers are immutable once resolved
        if self.identifier.is_none() {
            self.identifier = Some(identifier);
        }
    }
}

pub fn normalize_handle(handle: &str) -> String {
    handle.trim().trim_start_matches('@').to_lowercase()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Visibility {
    Private,
    Public,
}

/// A list owned by the viewer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Container {
    pub id: ContainerId,
    pub name: String,
    pub visibility: Visibility,
}

impl Container {
    /// Only private lists are offered for membership management.
    pub fn is_manageable(&self) -> bool {
        self.visibility == Visibility::Private
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MutationKind {
    Add,
    Remove,
}
