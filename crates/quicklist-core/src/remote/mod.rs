//! Capability interface to the remote social graph.
//!
//! The core only depends on [`RemoteService`]. Every call receives the
//! anti-forgery token explicitly; the core checks that one exists before it
//! issues anything.

pub mod graphql;
pub mod memory;
pub mod parse;

use std::collections::HashMap;

use futures::future::BoxFuture;

use crate::error::RemoteError;
use crate::models::{Container, ContainerId, SubjectId};

pub use graphql::{GraphqlRemote, Host, QueryIds};
pub use memory::{InMemoryRemote, RemoteCall};

pub trait RemoteService: Send + Sync {
    /// Handle -> stable identifier. `NotFound` when no such user exists.
    fn resolve_handle<'a>(
        &'a self,
        token: &'a str,
        handle: &'a str,
    ) -> BoxFuture<'a, Result<SubjectId, RemoteError>>;

    /// Every list the viewer owns, private or not.
    fn list_containers<'a>(&'a self, token: &'a str)
        -> BoxFuture<'a, Result<Vec<Container>, RemoteError>>;

    /// Membership flag of `subject_id` for every list owned by `viewer_id`,
    /// in a single round trip.
    fn membership_snapshot<'a>(
        &'a self,
        token: &'a str,
        viewer_id: &'a str,
        subject_id: &'a str,
    ) -> BoxFuture<'a, Result<HashMap<ContainerId, bool>, RemoteError>>;

    /// `AlreadyMember` when the subject is already on the list.
    fn add_member<'a>(
        &'a self,
        token: &'a str,
        container_id: &'a str,
        subject_id: &'a str,
    ) -> BoxFuture<'a, Result<(), RemoteError>>;

    /// `NotMember` when the subject is not on the list.
    fn remove_member<'a>(
        &'a self,
        token: &'a str,
        container_id: &'a str,
        subject_id: &'a str,
    ) -> BoxFuture<'a, Result<(), RemoteError>>;

    fn delete_container<'a>(
        &'a self,
        token: &'a str,
        container_id: &'a str,
    ) -> BoxFuture<'a, Result<(), RemoteError>>;
}
