//! Handle -> identifier resolution with single-flight deduplication.
//!
//! Resolutions run on a spawned task, so a caller that stops waiting does not
//! cancel the lookup for everyone else who joined it.

use std::collections::HashMap;
use std::sync::Arc;

use futures::future::{BoxFuture, Shared};
use futures::FutureExt;
use parking_lot::Mutex;

use crate::credentials::CredentialAccessor;
use crate::error::RemoteError;
use crate::models::{normalize_handle, SubjectId};
use crate::remote::RemoteService;
use crate::sequencer::RequestSequencer;

type PendingLookup = Shared<BoxFuture<'static, Option<SubjectId>>>;

#[derive(Default)]
struct LookupState {
    /// Permanent for the life of this cache.
    resolved: HashMap<String, SubjectId>,
    in_flight: HashMap<String, PendingLookup>,
}

enum Lookup {
    Ready(Option<SubjectId>),
    Pending(PendingLookup),
}

pub struct LookupCache {
    state: Arc<Mutex<LookupState>>,
    remote: Arc<dyn RemoteService>,
    credentials: Arc<dyn CredentialAccessor>,
    sequencer: Arc<RequestSequencer>,
}

impl LookupCache {
    pub fn new(
        remote: Arc<dyn RemoteService>,
        credentials: Arc<dyn CredentialAccessor>,
        sequencer: Arc<RequestSequencer>,
    ) -> Self {
        Self {
            state: Arc::default(),
            remote,
            credentials,
            sequencer,
        }
    }

    /// Identifier for `handle`, or `None` when it cannot be resolved right now.
    ///
    /// Concurrent calls for the same handle share one remote request and see
    /// the same outcome. Failures are not remembered.
    pub async fn resolve(&self, handle: &str) -> Option<SubjectId> {
        match self.begin(handle) {
            Lookup::Ready(result) => result,
            Lookup::Pending(pending) => pending.await,
        }
    }

    /// Start resolving `handle` in the background without waiting.
    pub fn prewarm(&self, handle: &str) {
        let _ = self.begin(handle);
    }

    /// Already-resolved identifier, without touching the network.
    pub fn cached(&self, handle: &str) -> Option<SubjectId> {
        self.state
            .lock()
            .resolved
            .get(&normalize_handle(handle))
            .cloned()
    }

    /// Record an identifier learned some other way (e.g. from the page).
    pub fn remember(&self, handle: &str, identifier: impl Into<SubjectId>) {
        self.state
            .lock()
            .resolved
            .insert(normalize_handle(handle), identifier.into());
    }

    pub fn in_flight_count(&self) -> usize {
        self.state.lock().in_flight.len()
    }

    fn begin(&self, handle: &str) -> Lookup {
        let handle = normalize_handle(handle);
        if handle.is_empty() {
            return Lookup::Ready(None);
        }

        let mut state = self.state.lock();
        if let Some(id) = state.resolved.get(&handle) {
            return Lookup::Ready(Some(id.clone()));
        }
        if let Some(pending) = state.in_flight.get(&handle) {
            tracing::debug!(handle = %handle, "joining in-flight resolution");
            return Lookup::Pending(pending.clone());
        }

        let Some(token) = self.credentials.anti_forgery_token() else {
            tracing::warn!(handle = %handle, "cannot resolve without an anti-forgery token");
            return Lookup::Ready(None);
        };

        let pending = self.spawn_resolution(handle.clone(), token);
        state.in_flight.insert(handle, pending.clone());
        Lookup::Pending(pending)
    }

    /// The spawned task clears the in-flight marker itself. It cannot get
    /// there before the caller inserts it, because the caller holds the
    /// state lock until then.
    fn spawn_resolution(&self, handle: String, token: String) -> PendingLookup {
        let remote = self.remote.clone();
        let target = handle.clone();
        let call = self
            .sequencer
            .enqueue(move || async move { remote.resolve_handle(&token, &target).await });

        let state = self.state.clone();
        let task = tokio::spawn(async move {
            let outcome = call.await;
            let mut state = state.lock();
            state.in_flight.remove(&handle);
            match outcome {
                Ok(id) => {
                    tracing::debug!(handle = %handle, id = %id, "handle resolved");
                    state.resolved.insert(handle, id.clone());
                    Some(id)
                }
                Err(RemoteError::NotFound) => {
                    tracing::info!(handle = %handle, "no such user");
                    None
                }
                Err(e) => {
                    tracing::warn!(handle = %handle, "handle resolution failed: {}", e);
                    None
                }
            }
        });

        task.map(|joined| joined.unwrap_or(None)).boxed().shared()
    }
}
