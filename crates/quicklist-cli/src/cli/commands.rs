use anyhow::{bail, Context, Result};
use chrono::{DateTime, Utc};
use quicklist_core::credentials::CredentialAccessor;
use quicklist_core::{CommitOutcome, Preset, RateLimitStatus, Subject};
use serde_json::{json, Value};

use super::app::App;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SettingsAction {
    Show,
    Preset(Preset),
    SkipCheck(bool),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CliCommand {
    Settings(SettingsAction),
    ClearCache,
    Lists,
    Resolve {
        handle: String,
    },
    Status,
    Manage {
        handle: String,
        add: Vec<String>,
        remove: Vec<String>,
        quick: bool,
    },
    DeleteList {
        id: String,
    },
}

/// Run one command and return what should be printed.
pub async fn run_command(app: &App, command: CliCommand) -> Result<Value> {
    match command {
        CliCommand::Settings(action) => settings(app, action),
        CliCommand::ClearCache => {
            app.engine.clear_cache().await;
            Ok(json!({ "cleared": true }))
        }
        CliCommand::Lists => lists(app).await,
        CliCommand::Resolve { handle } => {
            let subject = Subject::new(&handle);
            let id = app.engine.resolve(subject.handle()).await;
            Ok(json!({ "handle": subject.handle(), "id": id }))
        }
        CliCommand::Status => Ok(status(app)),
        CliCommand::Manage {
            handle,
            add,
            remove,
            quick,
        } => manage(app, &handle, &add, &remove, quick).await,
        CliCommand::DeleteList { id } => {
            app.engine
                .delete_container(&id)
                .await
                .with_context(|| format!("Failed to delete list {}", id))?;
            Ok(json!({ "deleted": id }))
        }
    }
}

fn settings(app: &App, action: SettingsAction) -> Result<Value> {
    let settings = match action {
        SettingsAction::Show => app.settings.current(),
        SettingsAction::Preset(preset) => app.settings.apply_preset(preset)?,
        SettingsAction::SkipCheck(skip) => app.settings.set_skip_membership_check(skip)?,
    };
    Ok(json!({
        "label": settings.preset.label(),
        "settings": settings,
    }))
}

async fn lists(app: &App) -> Result<Value> {
    let containers = app
        .engine
        .containers()
        .await
        .context("Failed to load lists")?;
    let activity = app.engine.list_activity();

    let rows: Vec<Value> = containers
        .iter()
        .map(|c| {
            let last_used = activity.get(&c.id).copied().and_then(format_unix_ms);
            json!({ "id": c.id, "name": c.name, "lastUsed": last_used })
        })
        .collect();
    Ok(Value::Array(rows))
}

fn status(app: &App) -> Value {
    let limit = app.engine.rate_limit_status();
    let settings = app.settings.current();
    json!({
        "signedIn": app.credentials.anti_forgery_token().is_some(),
        "viewerId": app.credentials.viewer_id(),
        "offline": app.offline,
        "dataDir": app.config.data_dir.display().to_string(),
        "preset": settings.preset.label(),
        "quickMode": settings.skip_membership_check,
        "cachedUsers": app.engine.cached_subject_count(),
        "rateLimit": rate_limit_json(&limit),
    })
}

fn rate_limit_json(status: &RateLimitStatus) -> Value {
    let resets_at = status.resets_in.and_then(|wait| {
        let wait = chrono::Duration::from_std(wait).ok()?;
        Some((Utc::now() + wait).to_rfc3339())
    });
    json!({
        "used": status.used,
        "limit": status.limit,
        "remaining": status.remaining,
        "nearLimit": status.is_near_limit(),
        "resetsAt": resets_at,
    })
}

async fn manage(
    app: &App,
    handle: &str,
    add: &[String],
    remove: &[String],
    quick: bool,
) -> Result<Value> {
    let skip = quick || app.settings.current().skip_membership_check;
    let mut session = app
        .engine
        .open_session_with(Subject::new(handle), skip)
        .await?;

    for id in add {
        if !session.select(id) {
            bail!("No private list with id {}", id);
        }
    }
    for id in remove {
        if !session.deselect(id) {
            bail!("No private list with id {}", id);
        }
    }

    let initial = session.initial_set().clone();
    let outcome = app.engine.commit(&mut session).await;
    if let CommitOutcome::Finished(tally) = &outcome {
        if tally.failed() > 0 {
            tracing::warn!(failed = tally.failed(), "some changes were not applied");
        }
    }

    Ok(json!({
        "subject": session.subject().handle(),
        "subjectId": session.subject().identifier(),
        "origin": session.origin(),
        "before": initial,
        "after": session.initial_set(),
        "state": session.state(),
        "result": outcome,
        "rateLimit": rate_limit_json(&app.engine.rate_limit_status()),
    }))
}

fn format_unix_ms(ms: u64) -> Option<String> {
    let ms = i64::try_from(ms).ok()?;
    DateTime::<Utc>::from_timestamp_millis(ms).map(|t| t.to_rfc3339())
}
