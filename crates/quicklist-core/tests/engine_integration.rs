//! End-to-end behaviour of the engine against the in-memory remote.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use quicklist_core::clock::ManualClock;
use quicklist_core::constants::keys;
use quicklist_core::rate_limiter::RateLimiter;
use quicklist_core::remote::memory::FaultKey;
use quicklist_core::remote::RemoteCall;
use quicklist_core::sequencer::RequestSequencer;
use quicklist_core::store::{KvStore, MemoryKvStore};
use quicklist_core::{
    CommitOutcome, CookieCredentials, CoreEvent, Engine, InMemoryRemote, PageEvent, RemoteError,
    RemoteService, SessionError, SessionState, Settings, SettingsStore, SnapshotOrigin, Subject,
    Visibility,
};
use tokio::sync::mpsc;
use tokio::time::Instant;

const COOKIE: &str = "ct0=csrf; twid=u%3D1";
const DAY_MS: u64 = 24 * 60 * 60 * 1000;

struct Harness {
    settings: SettingsStore,
    remote: Arc<InMemoryRemote>,
    kv: Arc<MemoryKvStore>,
    clock: Arc<ManualClock>,
    engine: Engine,
}

fn harness_with(settings: Settings, remote: InMemoryRemote, cookie: &str) -> Harness {
    let settings = SettingsStore::in_memory(settings);
    let remote = Arc::new(remote);
    remote.add_user("ferris", "100");
    for id in ["1", "2", "3", "4"] {
        remote.add_list(id, &format!("List {}", id), Visibility::Private);
    }
    remote.add_list("9", "Public", Visibility::Public);

    let kv = Arc::new(MemoryKvStore::new());
    let clock = Arc::new(ManualClock::new(1_700_000_000_000));
    let engine = Engine::new(
        remote.clone(),
        Arc::new(CookieCredentials::from_header(cookie)),
        kv.clone(),
        clock.clone(),
        settings.subscribe(),
    );
    Harness {
        settings,
        remote,
        kv,
        clock,
        engine,
    }
}

fn harness() -> Harness {
    harness_with(Settings::custom(0, 20, 60_000), InMemoryRemote::new(), COOKIE)
}

fn ids(items: &[&str]) -> std::collections::BTreeSet<String> {
    items.iter().map(|s| s.to_string()).collect()
}

fn mutation_calls(remote: &InMemoryRemote) -> Vec<RemoteCall> {
    remote
        .calls()
        .into_iter()
        .filter(|c| matches!(c, RemoteCall::AddMember { .. } | RemoteCall::RemoveMember { .. }))
        .collect()
}

#[tokio::test(start_paused = true)]
async fn test_concurrent_resolves_collapse_into_one_call() {
    let h = harness_with(
        Settings::custom(0, 20, 60_000),
        InMemoryRemote::new().with_latency(Duration::from_millis(200)),
        COOKIE,
    );

    let (a, b, c, d) = tokio::join!(
        h.engine.resolve("ferris"),
        h.engine.resolve("Ferris"),
        h.engine.resolve("@ferris"),
        h.engine.resolve("FERRIS"),
    );

    for result in [a, b, c, d] {
        assert_eq!(result.as_deref(), Some("100"));
    }
    assert_eq!(
        h.remote
            .count_calls(|c| matches!(c, RemoteCall::ResolveHandle(_))),
        1
    );
}

#[tokio::test(start_paused = true)]
async fn test_sequencer_runs_in_order_with_delay_between() {
    let settings = SettingsStore::in_memory(Settings::custom(100, 10, 60_000));
    let sequencer = RequestSequencer::new(settings.subscribe());
    let spans: Arc<Mutex<Vec<(&'static str, Instant, Instant)>>> = Arc::default();
    let start = Instant::now();

    let pending: Vec<_> = ["A", "B", "C"]
        .into_iter()
        .map(|name| {
            let spans = spans.clone();
            sequencer.enqueue(move || async move {
                let began = Instant::now();
                tokio::time::sleep(Duration::from_millis(10)).await;
                spans.lock().push((name, began, Instant::now()));
                Ok::<_, RemoteError>(name)
            })
        })
        .collect();

    let results = futures::future::join_all(pending).await;
    assert_eq!(
        results.into_iter().map(Result::unwrap).collect::<Vec<_>>(),
        vec!["A", "B", "C"]
    );

    let spans = spans.lock();
    let order: Vec<_> = spans.iter().map(|(name, _, _)| *name).collect();
    assert_eq!(order, vec!["A", "B", "C"]);
    for pair in spans.windows(2) {
        let (_, _, prev_end) = pair[0];
        let (_, next_start, _) = pair[1];
        assert!(next_start - prev_end >= Duration::from_millis(100));
    }
    assert!(start.elapsed() >= Duration::from_millis(200));
}

#[tokio::test(start_paused = true)]
async fn test_rate_limit_window_slides() {
    let settings = SettingsStore::in_memory(Settings::custom(0, 3, 1000));
    let limiter = RateLimiter::new(settings.subscribe());

    let mut answers = Vec::new();
    for _ in 0..4 {
        let allowed = limiter.can_consume();
        if allowed {
            limiter.consume();
        }
        answers.push(allowed);
        tokio::time::advance(Duration::from_millis(100)).await;
    }
    assert_eq!(answers, vec![true, true, true, false]);

    // 1001ms after the first consume
    tokio::time::advance(Duration::from_millis(601)).await;
    assert!(limiter.can_consume());
}

#[tokio::test]
async fn test_commit_issues_only_the_minimal_diff() {
    let h = harness();
    for id in ["1", "2", "3"] {
        h.remote.seed_member(id, "100");
    }

    let mut session = h.engine.open_session(Subject::new("ferris")).await.unwrap();
    assert_eq!(session.origin(), SnapshotOrigin::Fetched);
    assert_eq!(*session.initial_set(), ids(&["1", "2", "3"]));

    session.set_target(["2", "3", "4"]);
    let outcome = h.engine.commit(&mut session).await;

    let CommitOutcome::Finished(tally) = outcome else {
        panic!("expected a finished commit, got {:?}", outcome);
    };
    assert_eq!((tally.added, tally.removed, tally.failed()), (1, 1, 0));
    assert_eq!(
        mutation_calls(&h.remote),
        vec![
            RemoteCall::AddMember {
                container_id: "4".into(),
                subject_id: "100".into()
            },
            RemoteCall::RemoveMember {
                container_id: "1".into(),
                subject_id: "100".into()
            },
        ]
    );
    assert_eq!(session.state(), SessionState::Done);
    assert_eq!(*session.initial_set(), ids(&["2", "3", "4"]));

    // Nothing left to do
    assert_eq!(h.engine.commit(&mut session).await, CommitOutcome::NoChanges);
}

#[tokio::test]
async fn test_already_member_counts_as_success() {
    let h = harness_with(
        Settings::custom(0, 20, 60_000).with_skip_membership_check(true),
        InMemoryRemote::new(),
        COOKIE,
    );
    h.remote.seed_member("2", "100");

    let mut session = h.engine.open_session(Subject::new("ferris")).await.unwrap();
    assert!(session.initial_set().is_empty());
    session.select("2");

    let CommitOutcome::Finished(tally) = h.engine.commit(&mut session).await else {
        panic!("expected a finished commit");
    };
    assert_eq!(tally.added, 1);
    assert_eq!(tally.failed(), 0);
    assert_eq!(session.state(), SessionState::Done);
}

#[tokio::test]
async fn test_one_failure_does_not_stop_the_rest() {
    let h = harness();
    h.remote.fail_next(
        FaultKey::Add("1".into()),
        RemoteError::Http {
            status: 503,
            body: "unavailable".into(),
        },
    );

    let mut session = h.engine.open_session(Subject::new("ferris")).await.unwrap();
    session.set_target(["1", "2"]);

    let CommitOutcome::Finished(tally) = h.engine.commit(&mut session).await else {
        panic!("expected a finished commit");
    };
    assert_eq!(tally.added, 1);
    assert_eq!(tally.failed(), 1);
    assert_eq!(tally.failures[0].container_id, "1");
    assert_eq!(session.state(), SessionState::PartiallyFailed);

    assert!(!h.remote.is_member("1", "100"));
    assert!(h.remote.is_member("2", "100"));
    assert_eq!(h.engine.cached_memberships("100"), Some(ids(&["2"])));
    assert_eq!(*session.initial_set(), ids(&["2"]));

    // Retrying only sends what is still missing
    let CommitOutcome::Finished(retry) = h.engine.commit(&mut session).await else {
        panic!("expected a finished commit");
    };
    assert_eq!((retry.added, retry.failed()), (1, 0));
    assert_eq!(
        h.remote
            .count_calls(|c| matches!(c, RemoteCall::AddMember { container_id, .. } if container_id == "2")),
        1
    );
}

#[tokio::test]
async fn test_quick_mode_spends_no_budget() {
    let h = harness_with(
        Settings::custom(0, 20, 60_000).with_skip_membership_check(true),
        InMemoryRemote::new(),
        COOKIE,
    );
    h.remote.seed_member("1", "100");

    let session = h.engine.open_session(Subject::new("ferris")).await.unwrap();
    assert_eq!(session.origin(), SnapshotOrigin::Skipped);
    assert!(session.initial_set().is_empty());
    assert_eq!(h.engine.rate_limit_status().used, 0);
    assert_eq!(
        h.remote
            .count_calls(|c| matches!(c, RemoteCall::MembershipSnapshot { .. })),
        0
    );
}

#[tokio::test]
async fn test_exhausted_quota_degrades_to_empty_set() {
    let h = harness_with(Settings::custom(0, 1, 60_000), InMemoryRemote::new(), COOKIE);
    h.remote.seed_member("1", "100");

    let first = h.engine.open_session(Subject::new("ferris")).await.unwrap();
    assert_eq!(first.origin(), SnapshotOrigin::Fetched);

    let second = h.engine.open_session(Subject::new("ferris")).await.unwrap();
    assert_eq!(second.origin(), SnapshotOrigin::RateLimited);
    assert!(second.initial_set().is_empty());
    assert!(h.engine.rate_limit_status().is_near_limit());
}

#[tokio::test]
async fn test_cached_membership_expires_and_is_evicted() {
    let h = harness();
    let mut session = h.engine.open_session(Subject::new("ferris")).await.unwrap();
    session.select("3");
    h.engine.commit(&mut session).await;
    assert_eq!(h.engine.cached_memberships("100"), Some(ids(&["3"])));

    h.clock.advance(Duration::from_millis(DAY_MS + 1));
    assert_eq!(h.engine.cached_memberships("100"), None);

    let raw = h.kv.get(keys::MEMBERSHIPS).unwrap_or_default();
    assert!(!raw.contains("\"100\""));
    assert_eq!(h.engine.cached_subject_count(), 0);
}

#[tokio::test]
async fn test_lists_are_private_and_ordered_by_recent_use() {
    let h = harness();
    let mut session = h.engine.open_session(Subject::new("ferris")).await.unwrap();
    let initial: Vec<_> = session.containers().iter().map(|c| c.id.clone()).collect();
    assert_eq!(initial, vec!["1", "2", "3", "4"]);

    session.select("3");
    h.engine.commit(&mut session).await;
    h.clock.advance(Duration::from_secs(5));
    session.select("2");
    h.engine.commit(&mut session).await;

    let ordered: Vec<_> = h
        .engine
        .containers()
        .await
        .unwrap()
        .into_iter()
        .map(|c| c.id)
        .collect();
    assert_eq!(ordered, vec!["2", "3", "1", "4"]);
    assert_eq!(
        h.remote
            .count_calls(|c| matches!(c, RemoteCall::ListContainers)),
        1
    );
}

#[tokio::test]
async fn test_missing_token_blocks_session_without_remote_calls() {
    let h = harness_with(Settings::default(), InMemoryRemote::new(), "twid=u%3D1");
    let result = h.engine.open_session(Subject::new("ferris")).await;
    assert!(matches!(result, Err(SessionError::MissingToken)));
    assert!(h.remote.calls().is_empty());
}

#[tokio::test]
async fn test_unknown_subject_fails_to_open() {
    let h = harness();
    let result = h.engine.open_session(Subject::new("nobody")).await;
    assert!(matches!(result, Err(SessionError::SubjectNotFound(handle)) if handle == "nobody"));
}

#[tokio::test]
async fn test_events_follow_the_session() {
    let (tx, mut rx) = mpsc::unbounded_channel();
    let mut h = harness();
    h.engine = h.engine.with_events(tx);

    let mut session = h.engine.open_session(Subject::new("ferris")).await.unwrap();
    session.select("1");
    h.engine.commit(&mut session).await;

    let mut states = Vec::new();
    let mut applied = 0;
    while let Ok(event) = rx.try_recv() {
        match event {
            CoreEvent::SessionStateChanged { state, .. } => states.push(state),
            CoreEvent::MutationApplied { .. } => applied += 1,
            _ => {}
        }
    }
    assert_eq!(
        states,
        vec![
            SessionState::FetchingContainers,
            SessionState::FetchingMembership,
            SessionState::AwaitingUserInput,
            SessionState::Saving,
            SessionState::Done,
        ]
    );
    assert_eq!(applied, 1);
}

#[tokio::test(start_paused = true)]
async fn test_route_change_abandons_session_but_commit_still_lands() {
    let h = harness_with(
        Settings::custom(0, 20, 60_000),
        InMemoryRemote::new().with_latency(Duration::from_millis(200)),
        COOKIE,
    );
    let mut session = h.engine.open_session(Subject::new("ferris")).await.unwrap();
    assert_eq!(h.engine.active_session(), Some(session.id()));

    session.select("4");
    let navigate = async {
        // The add has been sent but the remote has not answered yet
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(mutation_calls(&h.remote).len(), 1);
        assert!(!h.remote.is_member("4", "100"));
        h.engine.handle_page_event(PageEvent::RouteChanged);
    };
    let (outcome, ()) = tokio::join!(h.engine.commit(&mut session), navigate);

    assert_eq!(h.engine.active_session(), None);
    let CommitOutcome::Finished(tally) = outcome else {
        panic!("expected a finished commit, got {:?}", outcome);
    };
    assert_eq!((tally.added, tally.failed()), (1, 0));
    assert!(h.remote.is_member("4", "100"));
    assert_eq!(h.engine.cached_memberships("100"), Some(ids(&["4"])));
    let raw = h.kv.get(keys::MEMBERSHIPS).unwrap_or_default();
    assert!(raw.contains("\"4\""));
}

#[tokio::test]
async fn test_failed_open_leaves_no_active_session() {
    let h = harness();
    h.remote.fail_next(
        FaultKey::ListContainers,
        RemoteError::Http {
            status: 500,
            body: "oops".into(),
        },
    );
    let result = h.engine.open_session(Subject::new("ferris")).await;
    assert!(matches!(result, Err(SessionError::Containers(_))));
    assert_eq!(h.engine.active_session(), None);

    let result = h.engine.open_session(Subject::new("nobody")).await;
    assert!(matches!(result, Err(SessionError::SubjectNotFound(_))));
    assert_eq!(h.engine.active_session(), None);
}

#[tokio::test]
async fn test_not_member_on_remove_counts_as_success() {
    let h = harness();
    h.remote.seed_member("2", "100");
    let mut session = h.engine.open_session(Subject::new("ferris")).await.unwrap();
    assert_eq!(*session.initial_set(), ids(&["2"]));

    // Someone else took the subject off the list after the snapshot
    h.remote.remove_member("csrf", "2", "100").await.unwrap();

    session.deselect("2");
    let CommitOutcome::Finished(tally) = h.engine.commit(&mut session).await else {
        panic!("expected a finished commit");
    };
    assert_eq!((tally.removed, tally.failed()), (1, 0));
    assert_eq!(session.state(), SessionState::Done);
    assert!(session.initial_set().is_empty());
    assert_eq!(h.engine.cached_memberships("100"), Some(ids(&[])));
}

#[tokio::test(start_paused = true)]
async fn test_discovered_subject_is_resolved_ahead_of_time() {
    let h = harness_with(
        Settings::custom(0, 20, 60_000),
        InMemoryRemote::new().with_latency(Duration::from_millis(200)),
        COOKIE,
    );
    h.engine.handle_page_event(PageEvent::SubjectDiscovered {
        handle: "@Ferris".into(),
    });
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(
        h.remote
            .count_calls(|c| matches!(c, RemoteCall::ResolveHandle(_))),
        1
    );

    let session = h.engine.open_session(Subject::new("ferris")).await.unwrap();
    assert_eq!(session.subject().identifier(), Some("100"));
    assert_eq!(
        h.remote
            .count_calls(|c| matches!(c, RemoteCall::ResolveHandle(_))),
        1
    );
}

#[tokio::test]
async fn test_reload_settings_announces_external_change() {
    let dir = tempfile::tempdir().unwrap();
    let settings = SettingsStore::open(dir.path()).unwrap();
    let remote = Arc::new(InMemoryRemote::new());
    let (tx, mut rx) = mpsc::unbounded_channel();
    let engine = Engine::new(
        remote,
        Arc::new(CookieCredentials::from_header(COOKIE)),
        Arc::new(MemoryKvStore::new()),
        Arc::new(ManualClock::new(0)),
        settings.subscribe(),
    )
    .with_events(tx);

    // Nothing on disk changed yet
    assert!(!engine.reload_settings(&settings));

    let other = SettingsStore::open(dir.path()).unwrap();
    other.set_skip_membership_check(true).unwrap();

    assert!(engine.reload_settings(&settings));
    assert!(engine.settings().skip_membership_check);
    match rx.try_recv() {
        Ok(CoreEvent::SettingsReloaded(reloaded)) => assert!(reloaded.skip_membership_check),
        other => panic!("expected a settings event, got {:?}", other),
    }
    assert!(!engine.reload_settings(&settings));
}

#[tokio::test]
async fn test_settings_change_reaches_running_engine() {
    let h = harness();
    assert!(!h.engine.settings().skip_membership_check);
    h.settings.set_skip_membership_check(true).unwrap();

    let session = h.engine.open_session(Subject::new("ferris")).await.unwrap();
    assert_eq!(session.origin(), SnapshotOrigin::Skipped);
}

#[tokio::test]
async fn test_delete_list_forgets_it() {
    let h = harness();
    let mut session = h.engine.open_session(Subject::new("ferris")).await.unwrap();
    session.select("1");
    h.engine.commit(&mut session).await;

    h.engine.delete_container("1").await.unwrap();
    let remaining: Vec<_> = h
        .engine
        .containers()
        .await
        .unwrap()
        .into_iter()
        .map(|c| c.id)
        .collect();
    assert_eq!(remaining, vec!["2", "3", "4"]);
    assert_eq!(h.engine.cached_memberships("100"), Some(ids(&[])));
}

#[tokio::test]
async fn test_clear_cache_refetches_lists() {
    let h = harness();
    h.engine.containers().await.unwrap();
    h.engine.clear_cache().await;
    h.engine.containers().await.unwrap();
    assert_eq!(
        h.remote
            .count_calls(|c| matches!(c, RemoteCall::ListContainers)),
        2
    );
    assert!(!h.kv.contains(keys::LIST_ACTIVITY));
}
