//! Response decoding for the GraphQL endpoints.
//!
//! Timelines arrive as a list of instructions; the one of type
//! `TimelineAddEntries` carries entries that hold a list either directly
//! (`content.itemContent.list`) or inside a module (`content.items[]`).

use std::collections::HashMap;

use serde_json::Value;

use crate::error::RemoteError;
use crate::models::{Container, ContainerId, MutationKind, SubjectId, Visibility};

const ADD_ENTRIES: &str = "TimelineAddEntries";

/// First message of a GraphQL `errors` array, if present.
pub fn first_error(body: &Value) -> Option<String> {
    let errors = body.get("errors")?.as_array()?;
    let first = errors.first()?;
    Some(
        first
            .get("message")
            .and_then(Value::as_str)
            .unwrap_or("unknown error")
            .to_string(),
    )
}

fn has_data(body: &Value) -> bool {
    body.get("data").is_some_and(|d| d.is_object())
}

/// `data.user.result.rest_id`. A body with only `errors` is an API failure;
/// `NotFound` means the lookup answered but had no such user.
pub fn parse_user_id(body: &Value) -> Result<SubjectId, RemoteError> {
    if !has_data(body) {
        if let Some(message) = first_error(body) {
            return Err(RemoteError::Api(message));
        }
    }

    body.pointer("/data/user/result/rest_id")
        .and_then(Value::as_str)
        .filter(|id| !id.is_empty())
        .map(str::to_string)
        .ok_or(RemoteError::NotFound)
}

/// Every list object found in the `TimelineAddEntries` instructions.
fn timeline_lists<'a>(instructions: &'a [Value]) -> impl Iterator<Item = &'a Value> + 'a {
    instructions
        .iter()
        .filter(|inst| inst.get("type").and_then(Value::as_str) == Some(ADD_ENTRIES))
        .filter_map(|inst| inst.get("entries").and_then(Value::as_array))
        .flatten()
        .flat_map(|entry| {
            let content = entry.get("content");
            let direct = content.and_then(|c| c.pointer("/itemContent/list"));
            let module = content
                .and_then(|c| c.get("items"))
                .and_then(Value::as_array)
                .into_iter()
                .flatten()
                .filter_map(|item| item.pointer("/item/itemContent/list"));
            direct.into_iter().chain(module)
        })
}

fn instructions_at<'a>(body: &'a Value, pointer: &str) -> &'a [Value] {
    body.pointer(pointer)
        .and_then(Value::as_array)
        .map(Vec::as_slice)
        .unwrap_or(&[])
}

/// Lists from the lists-management timeline. Entries without an id or a
/// name are skipped.
pub fn parse_lists(body: &Value) -> Result<Vec<Container>, RemoteError> {
    if !has_data(body) {
        if let Some(message) = first_error(body) {
            return Err(RemoteError::Api(message));
        }
    }

    let instructions = instructions_at(
        body,
        "/data/viewer/list_management_timeline/timeline/instructions",
    );

    let containers = timeline_lists(instructions)
        .filter_map(|list| {
            let id = list.get("id_str").and_then(Value::as_str)?;
            let name = list.get("name").and_then(Value::as_str)?;
            let visibility = match list.get("mode").and_then(Value::as_str) {
                Some("Private") => Visibility::Private,
                _ => Visibility::Public,
            };
            Some(Container {
                id: id.to_string(),
                name: name.to_string(),
                visibility,
            })
        })
        .collect();

    Ok(containers)
}

/// Per-list `is_member` flags from the ownerships timeline.
pub fn parse_membership(body: &Value) -> Result<HashMap<ContainerId, bool>, RemoteError> {
    if let Some(message) = first_error(body) {
        return Err(RemoteError::Api(message));
    }

    let instructions = instructions_at(body, "/data/user/result/timeline/timeline/instructions");

    Ok(timeline_lists(instructions)
        .filter_map(|list| {
            let id = list.get("id_str").and_then(Value::as_str)?;
            let is_member = list.get("is_member").and_then(Value::as_bool) == Some(true);
            Some((id.to_string(), is_member))
        })
        .collect())
}

/// A mutation succeeded iff a `data` object came back. Errors that say the
/// subject is already (or not) on the list map to the idempotent variants.
pub fn parse_mutation(body: &Value, kind: MutationKind) -> Result<(), RemoteError> {
    if has_data(body) {
        return Ok(());
    }
    let message = first_error(body).unwrap_or_else(|| "response carried no data".to_string());
    let lower = message.to_lowercase();

    match kind {
        MutationKind::Add if lower.contains("already") => Err(RemoteError::AlreadyMember),
        MutationKind::Remove
            if lower.contains("not a member") || lower.contains("isn't a member") =>
        {
            Err(RemoteError::NotMember)
        }
        _ => Err(RemoteError::Api(message)),
    }
}
