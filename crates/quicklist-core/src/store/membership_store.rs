//! Authoritative membership snapshots, gated by the rate limiter.
//!
//! A snapshot costs one remote round trip no matter how many lists the viewer
//! owns, and one slot of the lookup quota. Successful snapshots also refresh
//! the persisted fallback cache.

use std::sync::Arc;

use serde::Serialize;

use crate::credentials::CredentialAccessor;
use crate::error::RemoteError;
use crate::models::ContainerIdSet;
use crate::rate_limiter::RateLimiter;
use crate::remote::RemoteService;
use crate::sequencer::RequestSequencer;
use crate::store::membership_cache::MembershipCache;

/// Outcome of asking for a subject's current memberships.
#[derive(Debug)]
pub enum Snapshot {
    /// Fresh from the remote.
    Fetched(ContainerIdSet),
    /// Quick mode: the caller asked not to check.
    Skipped,
    /// The lookup quota is exhausted; memberships are unknown.
    RateLimited,
    /// The fetch was attempted (or could not be) and failed.
    Unavailable(RemoteError),
}

/// Why a session's initial set looks the way it does.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum SnapshotOrigin {
    Fetched,
    Skipped,
    RateLimited,
    Unavailable,
}

impl Snapshot {
    /// The set to start editing from. Everything but a real fetch starts
    /// empty.
    pub fn initial_set(&self) -> ContainerIdSet {
        match self {
            Self::Fetched(set) => set.clone(),
            _ => ContainerIdSet::new(),
        }
    }

    pub fn origin(&self) -> SnapshotOrigin {
        match self {
            Self::Fetched(_) => SnapshotOrigin::Fetched,
            Self::Skipped => SnapshotOrigin::Skipped,
            Self::RateLimited => SnapshotOrigin::RateLimited,
            Self::Unavailable(_) => SnapshotOrigin::Unavailable,
        }
    }

    /// True only for a confirmed answer from the remote.
    pub fn is_authoritative(&self) -> bool {
        matches!(self, Self::Fetched(_))
    }
}

pub struct MembershipStore {
    cache: MembershipCache,
    limiter: Arc<RateLimiter>,
    sequencer: Arc<RequestSequencer>,
    remote: Arc<dyn RemoteService>,
    credentials: Arc<dyn CredentialAccessor>,
}

impl MembershipStore {
    pub fn new(
        cache: MembershipCache,
        limiter: Arc<RateLimiter>,
        sequencer: Arc<RequestSequencer>,
        remote: Arc<dyn RemoteService>,
        credentials: Arc<dyn CredentialAccessor>,
    ) -> Self {
        Self {
            cache,
            limiter,
            sequencer,
            remote,
            credentials,
        }
    }

    /// Current memberships of `subject_id` among the viewer's lists.
    ///
    /// With `skip` set nothing is fetched and no quota is spent. Credentials
    /// are checked before the quota, so a signed-out viewer never burns a slot.
    pub async fn get_snapshot(&self, subject_id: &str, skip: bool) -> Snapshot {
        if skip {
            tracing::debug!(subject_id, "membership check skipped");
            return Snapshot::Skipped;
        }

        let Some(token) = self.credentials.anti_forgery_token() else {
            return Snapshot::Unavailable(RemoteError::MissingToken);
        };
        let Some(viewer_id) = self.credentials.viewer_id() else {
            return Snapshot::Unavailable(RemoteError::MissingViewer);
        };

        if !self.limiter.try_consume() {
            let status = self.limiter.status();
            tracing::info!(
                subject_id,
                used = status.used,
                limit = status.limit,
                "membership lookup rate limited, falling back to quick mode"
            );
            return Snapshot::RateLimited;
        }

        let remote = self.remote.clone();
        let subject = subject_id.to_string();
        let result = self
            .sequencer
            .enqueue(move || async move {
                remote
                    .membership_snapshot(&token, &viewer_id, &subject)
                    .await
            })
            .await;

        match result {
            Ok(flags) => {
                let lists: ContainerIdSet = flags
                    .into_iter()
                    .filter_map(|(id, is_member)| is_member.then_some(id))
                    .collect();
                tracing::debug!(subject_id, count = lists.len(), "membership snapshot fetched");
                self.cache.put(subject_id, &lists);
                Snapshot::Fetched(lists)
            }
            Err(e) => {
                tracing::warn!(subject_id, "membership snapshot failed: {}", e);
                Snapshot::Unavailable(e)
            }
        }
    }

    /// Fallback display aid; never used to decide writes.
    pub fn cached_memberships(&self, subject_id: &str) -> Option<ContainerIdSet> {
        self.cache.get(subject_id)
    }

    pub fn record_add(&self, container_id: &str, subject_id: &str) {
        self.cache.record_add(container_id, subject_id);
    }

    pub fn record_remove(&self, container_id: &str, subject_id: &str) {
        self.cache.record_remove(container_id, subject_id);
    }

    pub fn cache(&self) -> &MembershipCache {
        &self.cache
    }
}
