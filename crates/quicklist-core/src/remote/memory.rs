//! In-memory model of the remote social graph.
//!
//! Behaves like the real service (idempotent-error responses included) and
//! records every call it receives. Used for offline runs and as the test
//! double throughout the crate.

use std::collections::{HashMap, HashSet, VecDeque};
use std::time::Duration;

use futures::future::BoxFuture;
use futures::FutureExt;
use parking_lot::Mutex;

use crate::error::RemoteError;
use crate::models::{normalize_handle, Container, ContainerId, SubjectId, Visibility};
use crate::remote::RemoteService;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RemoteCall {
    ResolveHandle(String),
    ListContainers,
    MembershipSnapshot { subject_id: String },
    AddMember { container_id: String, subject_id: String },
    RemoveMember { container_id: String, subject_id: String },
    DeleteContainer(String),
}

/// Which call a scripted failure applies to.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum FaultKey {
    Resolve(String),
    ListContainers,
    Snapshot,
    Add(String),
    Remove(String),
    Delete(String),
}

#[derive(Default)]
struct Graph {
    users: HashMap<String, SubjectId>,
    lists: Vec<Container>,
    members: HashMap<ContainerId, HashSet<SubjectId>>,
    calls: Vec<RemoteCall>,
    faults: HashMap<FaultKey, VecDeque<RemoteError>>,
}

#[derive(Default)]
pub struct InMemoryRemote {
    graph: Mutex<Graph>,
    latency: Option<Duration>,
}

impl InMemoryRemote {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every call sleeps this long before answering.
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = Some(latency);
        self
    }

    pub fn add_user(&self, handle: &str, id: &str) {
        self.graph
            .lock()
            .users
            .insert(normalize_handle(handle), id.to_string());
    }

    pub fn add_list(&self, id: &str, name: &str, visibility: Visibility) {
        let mut graph = self.graph.lock();
        graph.lists.push(Container {
            id: id.to_string(),
            name: name.to_string(),
            visibility,
        });
        graph.members.entry(id.to_string()).or_default();
    }

    /// Put `subject_id` on a list without going through the call log.
    pub fn seed_member(&self, container_id: &str, subject_id: &str) {
        self.graph
            .lock()
            .members
            .entry(container_id.to_string())
            .or_default()
            .insert(subject_id.to_string());
    }

    pub fn is_member(&self, container_id: &str, subject_id: &str) -> bool {
        self.graph
            .lock()
            .members
            .get(container_id)
            .is_some_and(|m| m.contains(subject_id))
    }

    /// The next matching call fails with `error` instead of running.
    pub fn fail_next(&self, key: FaultKey, error: RemoteError) {
        self.graph
            .lock()
            .faults
            .entry(key)
            .or_default()
            .push_back(error);
    }

    pub fn calls(&self) -> Vec<RemoteCall> {
        self.graph.lock().calls.clone()
    }

    pub fn count_calls(&self, matches: impl Fn(&RemoteCall) -> bool) -> usize {
        self.graph.lock().calls.iter().filter(|c| matches(c)).count()
    }

    async fn pause(&self) {
        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        }
    }

    /// Log the call, then hand back a scripted failure if one is queued.
    fn begin(&self, call: RemoteCall, key: FaultKey) -> Result<(), RemoteError> {
        let mut graph = self.graph.lock();
        graph.calls.push(call);
        match graph.faults.get_mut(&key).and_then(VecDeque::pop_front) {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }
}

impl RemoteService for InMemoryRemote {
    fn resolve_handle<'a>(
        &'a self,
        _token: &'a str,
        handle: &'a str,
    ) -> BoxFuture<'a, Result<SubjectId, RemoteError>> {
        async move {
            let handle = normalize_handle(handle);
            self.begin(
                RemoteCall::ResolveHandle(handle.clone()),
                FaultKey::Resolve(handle.clone()),
            )?;
            self.pause().await;
            self.graph
                .lock()
                .users
                .get(&handle)
                .cloned()
                .ok_or(RemoteError::NotFound)
        }
        .boxed()
    }

    fn list_containers<'a>(
        &'a self,
        _token: &'a str,
    ) -> BoxFuture<'a, Result<Vec<Container>, RemoteError>> {
        async move {
            self.begin(RemoteCall::ListContainers, FaultKey::ListContainers)?;
            self.pause().await;
            Ok(self.graph.lock().lists.clone())
        }
        .boxed()
    }

    fn membership_snapshot<'a>(
        &'a self,
        _token: &'a str,
        _viewer_id: &'a str,
        subject_id: &'a str,
    ) -> BoxFuture<'a, Result<HashMap<ContainerId, bool>, RemoteError>> {
        async move {
            self.begin(
                RemoteCall::MembershipSnapshot {
                    subject_id: subject_id.to_string(),
                },
                FaultKey::Snapshot,
            )?;
            self.pause().await;
            let graph = self.graph.lock();
            Ok(graph
                .lists
                .iter()
                .map(|list| {
                    let is_member = graph
                        .members
                        .get(&list.id)
                        .is_some_and(|m| m.contains(subject_id));
                    (list.id.clone(), is_member)
                })
                .collect())
        }
        .boxed()
    }

    fn add_member<'a>(
        &'a self,
        _token: &'a str,
        container_id: &'a str,
        subject_id: &'a str,
    ) -> BoxFuture<'a, Result<(), RemoteError>> {
        async move {
            self.begin(
                RemoteCall::AddMember {
                    container_id: container_id.to_string(),
                    subject_id: subject_id.to_string(),
                },
                FaultKey::Add(container_id.to_string()),
            )?;
            self.pause().await;
            let mut graph = self.graph.lock();
            let members = graph
                .members
                .get_mut(container_id)
                .ok_or(RemoteError::NotFound)?;
            if members.insert(subject_id.to_string()) {
                Ok(())
            } else {
                Err(RemoteError::AlreadyMember)
            }
        }
        .boxed()
    }

    fn remove_member<'a>(
        &'a self,
        _token: &'a str,
        container_id: &'a str,
        subject_id: &'a str,
    ) -> BoxFuture<'a, Result<(), RemoteError>> {
        async move {
            self.begin(
                RemoteCall::RemoveMember {
                    container_id: container_id.to_string(),
                    subject_id: subject_id.to_string(),
                },
                FaultKey::Remove(container_id.to_string()),
            )?;
            self.pause().await;
            let mut graph = self.graph.lock();
            let members = graph
                .members
                .get_mut(container_id)
                .ok_or(RemoteError::NotFound)?;
            if members.remove(subject_id) {
                Ok(())
            } else {
                Err(RemoteError::NotMember)
            }
        }
        .boxed()
    }

    fn delete_container<'a>(
        &'a self,
        _token: &'a str,
        container_id: &'a str,
    ) -> BoxFuture<'a, Result<(), RemoteError>> {
        async move {
            self.begin(
                RemoteCall::DeleteContainer(container_id.to_string()),
                FaultKey::Delete(container_id.to_string()),
            )?;
            self.pause().await;
            let mut graph = self.graph.lock();
            let before = graph.lists.len();
            graph.lists.retain(|l| l.id != container_id);
            graph.members.remove(container_id);
            if graph.lists.len() == before {
                Err(RemoteError::NotFound)
            } else {
                Ok(())
            }
        }
        .boxed()
    }
}
