//! End-to-end coordinator tests over the in-memory transport.

use std::time::Duration;

use canopy::{ConnectionState, Selection, UiEvent};
use canopy_protocol::{LoadingPhase, SessionId};
use serde_json::{Value, json};
use tokio::time::{sleep, timeout};

mod common;
use common::{
    Harness, StaticSource, loading, project, projects_updated, session, settle, updated_at,
    with_source,
};

fn progress_events(events: &[UiEvent]) -> Vec<Option<LoadingPhase>> {
    events
        .iter()
        .filter_map(|e| match e {
            UiEvent::ProgressChanged(p) => Some(p.as_ref().map(|p| p.phase)),
            _ => None,
        })
        .collect()
}

/// Project list fetched on mount, then refreshed on demand.
#[tokio::test(start_paused = true)]
async fn test_refresh_on_mount_and_on_demand() {
    let source = StaticSource::new(json!([project("projectX", vec![session("S", "T1")])]));
    let (harness, _peer) = Harness::start_connected(with_source(&source));
    settle().await;

    assert_eq!(source.fetches(), 1);
    let view = harness.view().await;
    assert_eq!(updated_at(&view, "projectX", "S").as_deref(), Some("T1"));

    source.set(json!([project("projectX", vec![session("T", "T5")])]));
    harness.handle.refresh();
    settle().await;

    assert_eq!(source.fetches(), 2);
    let view = harness.view().await;
    assert_eq!(updated_at(&view, "projectX", "T").as_deref(), Some("T5"));
}

/// A refresh replaces the list even while the selected session is protected,
/// and a vanished session is deselected.
#[tokio::test(start_paused = true)]
async fn test_refresh_bypasses_protection_and_revalidates() {
    let source = StaticSource::new(json!([project("projectX", vec![session("S", "T1")])]));
    let (harness, _peer) = Harness::start_connected(with_source(&source));
    settle().await;

    harness
        .handle
        .select_session("projectX", SessionId::real("S"));
    harness.handle.user_sent_message(SessionId::real("S"));
    source.set(json!([project("projectX", vec![session("Q", "T2")])]));
    harness.handle.refresh();
    settle().await;

    let view = harness.view().await;
    assert_eq!(updated_at(&view, "projectX", "Q").as_deref(), Some("T2"));
    assert_eq!(view.selection, Selection::project_only("projectX"));
}

#[tokio::test(start_paused = true)]
async fn test_failed_refresh_keeps_previous_list() {
    let source = StaticSource::failing();
    let (harness, peer) = Harness::start_connected(with_source(&source));
    settle().await;

    peer.push_json(&projects_updated(
        vec![project("projectX", vec![session("S", "T1")])],
        None,
    ));
    settle().await;
    harness.handle.refresh();
    settle().await;

    assert_eq!(source.fetches(), 2);
    let view = harness.view().await;
    assert_eq!(updated_at(&view, "projectX", "S").as_deref(), Some("T1"));
}

/// A protected session's update is discarded until the conversation settles.
#[tokio::test(start_paused = true)]
async fn test_protected_session_update_discarded_until_settled() {
    let (harness, peer) = Harness::start_connected(None);
    settle().await;

    peer.push_json(&projects_updated(
        vec![project("projectX", vec![session("S", "T1")])],
        None,
    ));
    settle().await;
    harness
        .handle
        .select_session("projectX", SessionId::real("S"));
    harness.handle.user_sent_message(SessionId::real("S"));
    settle().await;

    peer.push_json(&projects_updated(
        vec![project("projectX", vec![session("S", "T2")])],
        None,
    ));
    settle().await;
    let view = harness.view().await;
    assert_eq!(updated_at(&view, "projectX", "S").as_deref(), Some("T1"));
    assert_eq!(
        view.selection,
        Selection::new("projectX", SessionId::real("S"))
    );

    peer.push_json(&json!({"type": "response_complete", "sessionId": "S"}));
    settle().await;
    peer.push_json(&projects_updated(
        vec![project("projectX", vec![session("S", "T2")])],
        None,
    ));
    settle().await;

    let view = harness.view().await;
    assert!(view.active.is_empty());
    assert_eq!(updated_at(&view, "projectX", "S").as_deref(), Some("T2"));
}

/// Additive changes get through while protected.
#[tokio::test(start_paused = true)]
async fn test_protected_additive_update_applies() {
    let (harness, peer) = Harness::start_connected(None);
    settle().await;

    peer.push_json(&projects_updated(
        vec![project("projectX", vec![session("S", "T1")])],
        None,
    ));
    settle().await;
    harness
        .handle
        .select_session("projectX", SessionId::real("S"));
    harness.handle.user_sent_message(SessionId::real("S"));
    settle().await;

    peer.push_json(&projects_updated(
        vec![
            project("projectX", vec![session("S", "T1"), session("T", "T9")]),
            project("projectY", vec![]),
        ],
        None,
    ));
    settle().await;

    let view = harness.view().await;
    assert_eq!(view.projects.len(), 2);
    assert_eq!(updated_at(&view, "projectX", "T").as_deref(), Some("T9"));
}

/// A conversation started under a placeholder guards the pipeline until the
/// backend assigns a real id and the response completes.
#[tokio::test(start_paused = true)]
async fn test_placeholder_session_lifecycle() {
    let (mut harness, peer) = Harness::start_connected(None);
    settle().await;

    peer.push_json(&projects_updated(
        vec![project("projectX", vec![session("S", "T1")])],
        None,
    ));
    settle().await;
    harness
        .handle
        .select_session("projectX", SessionId::real("S"));
    let placeholder = SessionId::temporary();
    harness.handle.user_sent_message(placeholder.clone());
    settle().await;

    // Placeholder in flight: S's change is held back.
    peer.push_json(&projects_updated(
        vec![project("projectX", vec![session("S", "T2")])],
        None,
    ));
    settle().await;
    let view = harness.view().await;
    assert_eq!(updated_at(&view, "projectX", "S").as_deref(), Some("T1"));
    assert!(view.active.contains(&placeholder));

    peer.push_json(&json!({"type": "session_created", "sessionId": "abc-999"}));
    peer.push_json(&json!({
        "type": "session_status",
        "sessionId": "abc-999",
        "isProcessing": true
    }));
    settle().await;
    let view = harness.view().await;
    assert!(!view.active.contains(&placeholder));
    assert!(view.active.contains(&SessionId::real("abc-999")));
    assert!(view.processing.contains(&SessionId::real("abc-999")));

    peer.push_json(&json!({"type": "response_complete", "sessionId": "abc-999"}));
    settle().await;
    peer.push_json(&projects_updated(
        vec![project("projectX", vec![session("S", "T2")])],
        None,
    ));
    settle().await;

    let view = harness.view().await;
    assert!(view.active.is_empty());
    assert!(view.processing.is_empty());
    assert_eq!(updated_at(&view, "projectX", "S").as_deref(), Some("T2"));

    let processing: Vec<_> = harness
        .drain()
        .into_iter()
        .filter(|e| matches!(e, UiEvent::ProcessingChanged { .. }))
        .collect();
    assert_eq!(
        processing,
        vec![
            UiEvent::ProcessingChanged {
                session_id: SessionId::real("abc-999"),
                processing: true,
            },
            UiEvent::ProcessingChanged {
                session_id: SessionId::real("abc-999"),
                processing: false,
            },
        ]
    );
}

/// Another tool rewrote the selected session's file.
#[tokio::test(start_paused = true)]
async fn test_external_change_signalled_for_selected_session() {
    let (mut harness, peer) = Harness::start_connected(None);
    settle().await;

    peer.push_json(&projects_updated(
        vec![project("myproj", vec![session("S123", "T1")])],
        None,
    ));
    settle().await;
    harness
        .handle
        .select_session("myproj", SessionId::real("S123"));
    settle().await;
    harness.drain();

    peer.push_json(&projects_updated(
        vec![project("myproj", vec![session("S123", "T2")])],
        Some("myproj/S123.jsonl"),
    ));
    peer.push_json(&projects_updated(
        vec![project("myproj", vec![session("S123", "T2")])],
        Some("myproj/OTHER.jsonl"),
    ));
    settle().await;

    let external: Vec<_> = harness
        .drain()
        .into_iter()
        .filter(|e| matches!(e, UiEvent::ExternalChange { .. }))
        .collect();
    assert_eq!(
        external,
        vec![UiEvent::ExternalChange {
            session_id: "S123".to_string(),
            generation: 1,
        }]
    );
    assert_eq!(harness.view().await.external_changes, 1);
}

/// Completion hides the indicator 500 ms later.
#[tokio::test(start_paused = true)]
async fn test_progress_cleared_after_complete() {
    let (mut harness, peer) = Harness::start_connected(None);
    settle().await;
    harness.drain();

    peer.push_json(&loading("start"));
    peer.push_json(&loading("complete"));
    settle().await;
    assert!(harness.view().await.progress.is_some());

    sleep(Duration::from_millis(480)).await;
    assert!(harness.view().await.progress.is_some());

    sleep(Duration::from_millis(20)).await;
    assert!(harness.view().await.progress.is_none());
    assert_eq!(
        progress_events(&harness.drain()),
        vec![
            Some(LoadingPhase::Start),
            Some(LoadingPhase::Complete),
            None
        ]
    );
}

/// A new scan starting inside the window keeps the indicator up.
#[tokio::test(start_paused = true)]
async fn test_progress_clear_cancelled_by_new_scan() {
    let (mut harness, peer) = Harness::start_connected(None);
    settle().await;
    harness.drain();

    peer.push_json(&loading("complete"));
    settle().await;
    sleep(Duration::from_millis(200)).await;
    peer.push_json(&loading("start"));
    settle().await;

    sleep(Duration::from_secs(2)).await;
    let view = harness.view().await;
    assert_eq!(
        view.progress.map(|p| p.phase),
        Some(LoadingPhase::Start)
    );
    assert!(!progress_events(&harness.drain()).contains(&None));
}

/// Reconnecting asks about the selected session again.
#[tokio::test(start_paused = true)]
async fn test_status_query_after_reconnect() {
    let (harness, mut first) = Harness::start_connected(None);
    settle().await;

    harness
        .handle
        .select_session("projectX", SessionId::real("S1"));
    let query = json!({"type": "check_session_status", "sessionId": "S1"});
    let sent: Value = serde_json::from_str(&first.recv().await.unwrap()).unwrap();
    assert_eq!(sent, query);

    let mut second = harness.server.accept_next();
    first.close();
    settle().await;
    assert_eq!(harness.view().await.connection, ConnectionState::Disconnected);

    sleep(Duration::from_millis(3000)).await;
    assert_eq!(harness.view().await.connection, ConnectionState::Connected);
    let sent: Value = serde_json::from_str(&second.recv().await.unwrap()).unwrap();
    assert_eq!(sent, query);
    assert_eq!(harness.server.attempts().len(), 2);
}

/// Nothing sent while disconnected shows up after connecting.
#[tokio::test(start_paused = true)]
async fn test_send_while_disconnected_is_dropped() {
    let harness = Harness::start(None);
    settle().await;
    assert_eq!(harness.view().await.connection, ConnectionState::Disconnected);

    harness
        .handle
        .send(&json!({"type": "ping"}))
        .unwrap();
    settle().await;

    let mut peer = harness.server.accept_next();
    sleep(Duration::from_millis(3000)).await;
    assert_eq!(harness.view().await.connection, ConnectionState::Connected);

    assert!(
        timeout(Duration::from_millis(100), peer.recv())
            .await
            .is_err()
    );

    harness.handle.abort_session("S1").unwrap();
    let sent: Value = serde_json::from_str(&peer.recv().await.unwrap()).unwrap();
    assert_eq!(sent, json!({"type": "abort_session", "sessionId": "S1"}));
}

/// Garbage on the wire is skipped; the connection stays up.
#[tokio::test(start_paused = true)]
async fn test_malformed_frames_do_not_close_channel() {
    let (harness, peer) = Harness::start_connected(None);
    settle().await;

    peer.push("not json");
    peer.push(r#"{"type": "projects_updated", "projects": "nope"}"#);
    peer.push(r#"{"type": "something_new", "payload": 1}"#);
    peer.push_json(&projects_updated(
        vec![project("projectX", vec![session("S", "T1")])],
        None,
    ));
    settle().await;

    let view = harness.view().await;
    assert_eq!(view.connection, ConnectionState::Connected);
    assert_eq!(updated_at(&view, "projectX", "S").as_deref(), Some("T1"));
    assert_eq!(harness.server.attempts().len(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_shutdown_stops_reconnecting() {
    let harness = Harness::start(None);
    settle().await;
    assert_eq!(harness.server.attempts().len(), 1);

    harness.handle.shutdown();
    harness.task.await.unwrap();

    let _peer = harness.server.accept_next();
    sleep(Duration::from_secs(30)).await;
    assert_eq!(harness.server.attempts().len(), 1);
    assert!(harness.handle.view().await.is_none());
}

/// A burst the coordinator has not read yet does not hold up shutdown.
#[tokio::test(start_paused = true)]
async fn test_shutdown_with_pending_burst() {
    let (harness, peer) = Harness::start_connected(None);
    settle().await;

    for i in 0..600 {
        assert!(peer.push_json(&loading(if i % 2 == 0 { "start" } else { "progress" })));
    }
    harness.handle.shutdown();

    let stopped = timeout(Duration::from_secs(60), harness.task).await;
    assert!(stopped.is_ok(), "coordinator did not stop");
    assert!(harness.handle.view().await.is_none());
}
