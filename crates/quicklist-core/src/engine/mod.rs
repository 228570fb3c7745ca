//! Reconciliation engine: owns the caches, the limiter and the request queue
//! for one page context, and drives management sessions through them.

mod session;

pub use session::{
    CommitOutcome, CommitTally, ManagementSession, MutationFailure, SessionState,
};

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::{mpsc, watch};
use uuid::Uuid;

use crate::clock::{SharedClock, SystemClock};
use crate::config::{CoreConfig, Settings, SettingsStore};
use crate::constants::MEMBERSHIP_CACHE_TTL;
use crate::credentials::CredentialAccessor;
use crate::error::{RemoteError, SessionError};
use crate::events::{CoreEvent, PageEvent};
use crate::lookup::LookupCache;
use crate::models::{Container, ContainerId, ContainerIdSet, MutationKind, Subject, SubjectId};
use crate::rate_limiter::{RateLimitStatus, RateLimiter};
use crate::remote::RemoteService;
use crate::sequencer::RequestSequencer;
use crate::store::{
    FileKvStore, KvStore, MembershipCache, MembershipStore, SnapshotOrigin, StoreError,
};

pub struct Engine {
    remote: Arc<dyn RemoteService>,
    credentials: Arc<dyn CredentialAccessor>,
    settings: watch::Receiver<Settings>,
    limiter: Arc<RateLimiter>,
    sequencer: Arc<RequestSequencer>,
    lookup: LookupCache,
    memberships: MembershipStore,
    /// Viewer's lists, fetched once and kept until cleared.
    containers: tokio::sync::Mutex<Option<Vec<Container>>>,
    active_session: Mutex<Option<Uuid>>,
    events: Option<mpsc::UnboundedSender<CoreEvent>>,
}

impl Engine {
    pub fn new(
        remote: Arc<dyn RemoteService>,
        credentials: Arc<dyn CredentialAccessor>,
        kv: Arc<dyn KvStore>,
        clock: SharedClock,
        settings: watch::Receiver<Settings>,
    ) -> Self {
        let limiter = Arc::new(RateLimiter::persistent(
            settings.clone(),
            kv.clone(),
            clock.clone(),
        ));
        let sequencer = Arc::new(RequestSequencer::new(settings.clone()));
        let lookup = LookupCache::new(remote.clone(), credentials.clone(), sequencer.clone());
        let memberships = MembershipStore::new(
            MembershipCache::new(kv, clock, MEMBERSHIP_CACHE_TTL),
            limiter.clone(),
            sequencer.clone(),
            remote.clone(),
            credentials.clone(),
        );

        Self {
            remote,
            credentials,
            settings,
            limiter,
            sequencer,
            lookup,
            memberships,
            containers: tokio::sync::Mutex::new(None),
            active_session: Mutex::new(None),
            events: None,
        }
    }

    /// Engine with the on-disk cache under `config.cache_dir()` and the wall clock.
    pub fn open(
        config: &CoreConfig,
        settings: &SettingsStore,
        remote: Arc<dyn RemoteService>,
        credentials: Arc<dyn CredentialAccessor>,
    ) -> Result<Self, StoreError> {
        let kv = FileKvStore::open(config.cache_dir())?;
        Ok(Self::new(
            remote,
            credentials,
            Arc::new(kv),
            Arc::new(SystemClock),
            settings.subscribe(),
        ))
    }

    pub fn with_events(mut self, events: mpsc::UnboundedSender<CoreEvent>) -> Self {
        self.events = Some(events);
        self
    }

    fn emit(&self, event: CoreEvent) {
        if let Some(tx) = &self.events {
            // Receiver gone just means nobody is rendering
            let _ = tx.send(event);
        }
    }

    fn transition(&self, session: &mut ManagementSession, state: SessionState) {
        tracing::debug!(session = %session.id, from = ?session.state, to = ?state, "session state");
        session.state = state;
        self.emit(CoreEvent::SessionStateChanged {
            session_id: session.id,
            state,
        });
    }

    pub fn settings(&self) -> Settings {
        self.settings.borrow().clone()
    }

    /// Handle the external "settings changed" notification.
    pub fn reload_settings(&self, store: &SettingsStore) -> bool {
        let changed = store.reload();
        if changed {
            self.emit(CoreEvent::SettingsReloaded(store.current()));
        }
        changed
    }

    pub fn rate_limit_status(&self) -> RateLimitStatus {
        self.limiter.status()
    }

    pub fn queue_len(&self) -> usize {
        self.sequencer.queue_len()
    }

    pub async fn resolve(&self, handle: &str) -> Option<SubjectId> {
        self.lookup.resolve(handle).await
    }

    pub fn handle_page_event(&self, event: PageEvent) {
        match event {
            PageEvent::SubjectDiscovered { handle } => {
                tracing::debug!(handle = %handle, "subject discovered");
                self.lookup.prewarm(&handle);
            }
            PageEvent::RouteChanged => {
                if let Some(id) = self.active_session.lock().take() {
                    tracing::info!(session = %id, "route changed, abandoning session");
                }
            }
        }
    }

    /// The session currently shown, if the page has not navigated away.
    pub fn active_session(&self) -> Option<Uuid> {
        *self.active_session.lock()
    }

    /// Manageable lists, most recently used first. The remote is asked once;
    /// later calls reuse the result until [`Engine::clear_container_cache`].
    pub async fn containers(&self) -> Result<Vec<Container>, RemoteError> {
        let mut cached = self.containers.lock().await;
        if cached.is_none() {
            let token = self
                .credentials
                .anti_forgery_token()
                .ok_or(RemoteError::MissingToken)?;
            let remote = self.remote.clone();
            let fetched: Vec<Container> = self
                .sequencer
                .enqueue(move || async move { remote.list_containers(&token).await })
                .await?
                .into_iter()
                .filter(Container::is_manageable)
                .collect();
            tracing::info!(count = fetched.len(), "fetched manageable lists");
            *cached = Some(fetched);
        }
        let mut containers = cached.clone().unwrap_or_default();
        drop(cached);
        self.memberships.cache().sort_by_recency(&mut containers);
        Ok(containers)
    }

    pub async fn clear_container_cache(&self) {
        *self.containers.lock().await = None;
    }

    /// Open a session for `subject`: load lists, resolve the identifier and
    /// take the membership snapshot (unless quick mode is on).
    ///
    /// A snapshot that could not be taken leaves the initial set empty;
    /// [`ManagementSession::origin`] says why.
    pub async fn open_session(&self, subject: Subject) -> Result<ManagementSession, SessionError> {
        let skip = self.settings.borrow().skip_membership_check;
        self.open_session_with(subject, skip).await
    }

    /// [`Engine::open_session`] with quick mode chosen by the caller instead
    /// of the settings.
    pub async fn open_session_with(
        &self,
        subject: Subject,
        skip: bool,
    ) -> Result<ManagementSession, SessionError> {
        if self.credentials.anti_forgery_token().is_none() {
            return Err(SessionError::MissingToken);
        }

        let mut session = ManagementSession::new(subject);
        *self.active_session.lock() = Some(session.id);

        if let Err(e) = self.load_session(&mut session, skip).await {
            {
                let mut active = self.active_session.lock();
                if *active == Some(session.id) {
                    *active = None;
                }
            }
            tracing::warn!(session = %session.id, "session failed to open: {}", e);
            return Err(e);
        }

        session.target_set = session.initial_set.clone();
        self.transition(&mut session, SessionState::AwaitingUserInput);
        tracing::info!(
            session = %session.id,
            subject = session.subject.handle(),
            lists = session.containers.len(),
            members_of = session.initial_set.len(),
            origin = ?session.origin,
            "session ready"
        );
        Ok(session)
    }

    async fn load_session(
        &self,
        session: &mut ManagementSession,
        skip: bool,
    ) -> Result<(), SessionError> {
        self.transition(session, SessionState::FetchingContainers);
        session.containers = self.containers().await.map_err(|e| {
            if e.is_auth() {
                SessionError::MissingToken
            } else {
                SessionError::Containers(e)
            }
        })?;

        if !skip {
            let id = self.identify(&mut session.subject).await?;
            self.transition(session, SessionState::FetchingMembership);
            let snapshot = self.memberships.get_snapshot(&id, false).await;
            session.origin = snapshot.origin();
            session.initial_set = restrict(snapshot.initial_set(), &session.containers);
        } else {
            tracing::debug!(session = %session.id, "quick mode, starting from an empty set");
            session.origin = SnapshotOrigin::Skipped;
        }
        Ok(())
    }

    async fn identify(&self, subject: &mut Subject) -> Result<SubjectId, SessionError> {
        if let Some(id) = subject.identifier() {
            return Ok(id.to_string());
        }
        let id = self
            .lookup
            .resolve(subject.handle())
            .await
            .ok_or_else(|| SessionError::SubjectNotFound(subject.handle().to_string()))?;
        subject.set_identifier(id.clone());
        Ok(id)
    }

    /// Apply the session's edit: every add, then every remove, one at a time.
    ///
    /// A failed item does not stop the rest. "Already a member" and "not a
    /// member" count as success. The initial set and the persisted cache only
    /// move on confirmed success.
    pub async fn commit(&self, session: &mut ManagementSession) -> CommitOutcome {
        if !session.state.is_editable() {
            return CommitOutcome::NotEditable {
                state: session.state,
            };
        }
        let (to_add, to_remove) = session.diff();
        if to_add.is_empty() && to_remove.is_empty() {
            return CommitOutcome::NoChanges;
        }

        self.transition(session, SessionState::Saving);
        let mut tally = CommitTally::default();

        let subject_id = match self.identify(&mut session.subject).await {
            Ok(id) => Some(id),
            Err(e) => {
                tracing::warn!(session = %session.id, "cannot commit: {}", e);
                let message = e.to_string();
                for id in &to_add {
                    tally.record_failure(id, MutationKind::Add, message.clone());
                }
                for id in &to_remove {
                    tally.record_failure(id, MutationKind::Remove, message.clone());
                }
                None
            }
        };

        if let Some(subject_id) = subject_id {
            let work = to_add
                .into_iter()
                .map(|id| (id, MutationKind::Add))
                .chain(to_remove.into_iter().map(|id| (id, MutationKind::Remove)));
            for (container_id, kind) in work {
                self.apply_one(session, &subject_id, container_id, kind, &mut tally)
                    .await;
            }
        }

        let final_state = if tally.failed() == 0 {
            SessionState::Done
        } else {
            SessionState::PartiallyFailed
        };
        self.transition(session, final_state);
        tracing::info!(
            session = %session.id,
            added = tally.added,
            removed = tally.removed,
            failed = tally.failed(),
            "commit finished"
        );
        CommitOutcome::Finished(tally)
    }

    async fn apply_one(
        &self,
        session: &mut ManagementSession,
        subject_id: &str,
        container_id: ContainerId,
        kind: MutationKind,
        tally: &mut CommitTally,
    ) {
        let result = match self.mutate(kind, &container_id, subject_id).await {
            Err(e) if e.is_already_in_desired_state() => {
                tracing::debug!(container = %container_id, ?kind, "remote already in desired state");
                Ok(())
            }
            other => other,
        };

        match result {
            Ok(()) => {
                match kind {
                    MutationKind::Add => {
                        session.initial_set.insert(container_id.clone());
                        self.memberships.record_add(&container_id, subject_id);
                    }
                    MutationKind::Remove => {
                        session.initial_set.remove(&container_id);
                        self.memberships.record_remove(&container_id, subject_id);
                    }
                }
                tally.record_success(kind);
                self.emit(CoreEvent::MutationApplied {
                    session_id: session.id,
                    container_id,
                    kind,
                });
            }
            Err(e) => {
                tracing::warn!(container = %container_id, ?kind, "mutation failed: {}", e);
                let message = e.to_string();
                tally.record_failure(&container_id, kind, message.clone());
                self.emit(CoreEvent::MutationFailed {
                    session_id: session.id,
                    container_id,
                    kind,
                    error: message,
                });
            }
        }
    }

    async fn mutate(
        &self,
        kind: MutationKind,
        container_id: &str,
        subject_id: &str,
    ) -> Result<(), RemoteError> {
        let token = self
            .credentials
            .anti_forgery_token()
            .ok_or(RemoteError::MissingToken)?;
        let remote = self.remote.clone();
        let container = container_id.to_string();
        let subject = subject_id.to_string();
        self.sequencer
            .enqueue(move || async move {
                match kind {
                    MutationKind::Add => remote.add_member(&token, &container, &subject).await,
                    MutationKind::Remove => {
                        remote.remove_member(&token, &container, &subject).await
                    }
                }
            })
            .await
    }

    /// Delete one of the viewer's lists and forget it locally.
    pub async fn delete_container(&self, container_id: &str) -> Result<(), RemoteError> {
        let token = self
            .credentials
            .anti_forgery_token()
            .ok_or(RemoteError::MissingToken)?;
        let remote = self.remote.clone();
        let target = container_id.to_string();
        self.sequencer
            .enqueue(move || async move { remote.delete_container(&token, &target).await })
            .await?;

        if let Some(containers) = self.containers.lock().await.as_mut() {
            containers.retain(|c| c.id != container_id);
        }
        self.memberships.cache().forget_container(container_id);
        tracing::info!(container = container_id, "list deleted");
        Ok(())
    }

    /// Fallback display aid for a subject; never used to decide writes.
    pub fn cached_memberships(&self, subject_id: &str) -> Option<ContainerIdSet> {
        self.memberships.cached_memberships(subject_id)
    }

    /// Last-touched time (unix ms) of each list used through this engine.
    pub fn list_activity(&self) -> HashMap<ContainerId, u64> {
        self.memberships.cache().activity()
    }

    pub fn cached_subject_count(&self) -> usize {
        self.memberships.cache().cached_subject_count()
    }

    /// Drop the persisted memberships and recency plus the in-memory list cache.
    pub async fn clear_cache(&self) {
        self.memberships.cache().clear();
        self.clear_container_cache().await;
    }
}

/// Memberships in lists the viewer cannot manage are not shown or diffed.
fn restrict(set: ContainerIdSet, containers: &[Container]) -> ContainerIdSet {
    set.into_iter()
        .filter(|id| containers.iter().any(|c| &c.id == id))
        .collect()
}
