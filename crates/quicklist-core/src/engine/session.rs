//! Per-subject management session: local edit state plus commit bookkeeping.

use serde::Serialize;
use uuid::Uuid;

use crate::models::{Container, ContainerId, ContainerIdSet, MutationKind, Subject};
use crate::store::SnapshotOrigin;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum SessionState {
    Idle,
    FetchingContainers,
    FetchingMembership,
    AwaitingUserInput,
    Saving,
    Done,
    PartiallyFailed,
}

impl SessionState {
    /// States in which the target set may be edited and committed.
    pub fn is_editable(&self) -> bool {
        matches!(
            self,
            Self::AwaitingUserInput | Self::Done | Self::PartiallyFailed
        )
    }
}

/// One subject's memberships being edited against the viewer's lists.
///
/// `initial_set` only ever advances on a confirmed remote success, so a
/// second commit in the same session diffs against what actually happened.
#[derive(Debug, Clone)]
pub struct ManagementSession {
    pub(crate) id: Uuid,
    pub(crate) subject: Subject,
    pub(crate) containers: Vec<Container>,
    pub(crate) initial_set: ContainerIdSet,
    pub(crate) target_set: ContainerIdSet,
    pub(crate) origin: SnapshotOrigin,
    pub(crate) state: SessionState,
}

impl ManagementSession {
    pub(crate) fn new(subject: Subject) -> Self {
        Self {
            id: Uuid::new_v4(),
            subject,
            containers: Vec::new(),
            initial_set: ContainerIdSet::new(),
            target_set: ContainerIdSet::new(),
            origin: SnapshotOrigin::Skipped,
            state: SessionState::Idle,
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn subject(&self) -> &Subject {
        &self.subject
    }

    /// Manageable lists, most recently used first.
    pub fn containers(&self) -> &[Container] {
        &self.containers
    }

    pub fn initial_set(&self) -> &ContainerIdSet {
        &self.initial_set
    }

    pub fn target_set(&self) -> &ContainerIdSet {
        &self.target_set
    }

    pub fn origin(&self) -> SnapshotOrigin {
        self.origin
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn is_selected(&self, container_id: &str) -> bool {
        self.target_set.contains(container_id)
    }

    /// Flip one list in the target set. Returns the new selection, or `None`
    /// when the list is unknown or the session is not editable.
    pub fn toggle(&mut self, container_id: &str) -> Option<bool> {
        let selected = !self.is_selected(container_id);
        self.set_selected(container_id, selected).then_some(selected)
    }

    pub fn select(&mut self, container_id: &str) -> bool {
        self.set_selected(container_id, true)
    }

    pub fn deselect(&mut self, container_id: &str) -> bool {
        self.set_selected(container_id, false)
    }

    /// Replace the target set wholesale. Unknown ids are dropped.
    pub fn set_target<I>(&mut self, ids: I) -> bool
    where
        I: IntoIterator,
        I::Item: Into<ContainerId>,
    {
        if !self.state.is_editable() {
            return false;
        }
        let known: ContainerIdSet = ids
            .into_iter()
            .map(Into::into)
            .filter(|id| self.knows(id))
            .collect();
        self.target_set = known;
        self.state = SessionState::AwaitingUserInput;
        true
    }

    /// `(to_add, to_remove)` for the current edit.
    pub fn diff(&self) -> (Vec<ContainerId>, Vec<ContainerId>) {
        let to_add = self
            .target_set
            .difference(&self.initial_set)
            .cloned()
            .collect();
        let to_remove = self
            .initial_set
            .difference(&self.target_set)
            .cloned()
            .collect();
        (to_add, to_remove)
    }

    pub fn has_changes(&self) -> bool {
        self.initial_set != self.target_set
    }

    fn knows(&self, container_id: &str) -> bool {
        self.containers.iter().any(|c| c.id == container_id)
    }

    fn set_selected(&mut self, container_id: &str, selected: bool) -> bool {
        if !self.state.is_editable() || !self.knows(container_id) {
            return false;
        }
        if selected {
            self.target_set.insert(container_id.to_string());
        } else {
            self.target_set.remove(container_id);
        }
        self.state = SessionState::AwaitingUserInput;
        true
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MutationFailure {
    pub container_id: ContainerId,
    pub kind: MutationKind,
    pub error: String,
}

/// Final count of one commit.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CommitTally {
    pub added: usize,
    pub removed: usize,
    pub failed_adds: usize,
    pub failed_removes: usize,
    pub failures: Vec<MutationFailure>,
}

impl CommitTally {
    pub fn failed(&self) -> usize {
        self.failed_adds + self.failed_removes
    }

    pub fn succeeded(&self) -> usize {
        self.added + self.removed
    }

    pub(crate) fn record_success(&mut self, kind: MutationKind) {
        match kind {
            MutationKind::Add => self.added += 1,
            MutationKind::Remove => self.removed += 1,
        }
    }

    pub(crate) fn record_failure(&mut self, container_id: &str, kind: MutationKind, error: String) {
        match kind {
            MutationKind::Add => self.failed_adds += 1,
            MutationKind::Remove => self.failed_removes += 1,
        }
        self.failures.push(MutationFailure {
            container_id: container_id.to_string(),
            kind,
            error,
        });
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "camelCase")]
pub enum CommitOutcome {
    /// Target equals initial; nothing was sent.
    NoChanges,
    /// The session was not in an editable state.
    NotEditable { state: SessionState },
    Finished(CommitTally),
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Visibility;

    fn session(initial: &[&str]) -> ManagementSession {
        let mut session = ManagementSession::new(Subject::new("ferris"));
        session.containers = ["1", "2", "3", "4"]
            .iter()
            .map(|id| Container {
                id: id.to_string(),
                name: format!("List {}", id),
                visibility: Visibility::Private,
            })
            .collect();
        session.initial_set = initial.iter().map(|s| s.to_string()).collect();
        session.target_set = session.initial_set.clone();
        session.state = SessionState::AwaitingUserInput;
        session
    }

    #[test]
    fn test_diff_is_minimal() {
        let mut session = session(&["1", "2", "3"]);
        session.set_target(["2", "3", "4"]);

        let (to_add, to_remove) = session.diff();
        assert_eq!(to_add, vec!["4".to_string()]);
        assert_eq!(to_remove, vec!["1".to_string()]);
    }

    #[test]
    fn test_toggle_round_trip_has_no_changes() {
        let mut session = session(&["1"]);
        assert_eq!(session.toggle("2"), Some(true));
        assert!(session.has_changes());
        assert_eq!(session.toggle("2"), Some(false));
        assert!(!session.has_changes());
    }

    #[test]
    fn test_unknown_lists_are_ignored() {
        let mut session = session(&[]);
        assert_eq!(session.toggle("99"), None);
        session.set_target(["1", "99"]);
        assert_eq!(session.target_set().len(), 1);
    }

    #[test]
    fn test_edits_rejected_while_saving() {
        let mut session = session(&[]);
        session.state = SessionState::Saving;
        assert!(!session.select("1"));
        assert!(session.target_set().is_empty());
    }

    #[test]
    fn test_editing_after_done_reopens_input() {
        let mut session = session(&[]);
        session.state = SessionState::Done;
        assert!(session.select("1"));
        assert_eq!(session.state(), SessionState::AwaitingUserInput);
    }

    #[test]
    fn test_tally_counts() {
        let mut tally = CommitTally::default();
        tally.record_success(MutationKind::Add);
        tally.record_failure("2", MutationKind::Add, "boom".into());
        tally.record_failure("3", MutationKind::Remove, "boom".into());
        assert_eq!(tally.succeeded(), 1);
        assert_eq!(tally.failed(), 2);
        assert_eq!(tally.failures[1].kind, MutationKind::Remove);
    }
}
