//! End-to-end lifecycle tests against real PTYs through the session manager.

mod common;

use common::{create_manager, drain_events, next_event, spawn_sh, wait_for_stopped, TIMEOUT};
use spawnd::broker::Subscription;
use spawnd::manager::{SessionError, SessionEvent, SpawnRequest};
use spawnd::session::{SessionId, SessionStatus};
use std::collections::HashMap;
use std::time::Duration;

/// Collect output per session until `done` returns true or the timeout hits.
async fn collect_until(
    sub: &mut Subscription,
    done: impl Fn(&HashMap<SessionId, Vec<u8>>) -> bool,
) -> HashMap<SessionId, Vec<u8>> {
    let mut seen: HashMap<SessionId, Vec<u8>> = HashMap::new();
    let _ = tokio::time::timeout(TIMEOUT, async {
        while let Some(chunk) = sub.recv().await {
            seen.entry(chunk.session_id)
                .or_default()
                .extend_from_slice(&chunk.data);
            if done(&seen) {
                break;
            }
        }
    })
    .await;
    seen
}

fn contains(haystack: &[u8], needle: &str) -> bool {
    String::from_utf8_lossy(haystack).contains(needle)
}

#[tokio::test]
async fn natural_exit_records_output_and_notifies_once() {
    let manager = create_manager();
    let mut sub = manager.subscribe();
    let mut events = manager.subscribe_events();

    let id = spawn_sh(&manager, "proj", "printf 'hello\\n'; exit 0");

    let exited = next_event(&mut events, |e| matches!(e, SessionEvent::Exited { .. })).await;
    assert_eq!(
        exited,
        SessionEvent::Exited {
            session_id: id.clone(),
            exit_code: Some(0),
        }
    );

    let mut delivered = Vec::new();
    while let Some(chunk) = sub.try_recv() {
        assert_eq!(chunk.session_id, id);
        delivered.extend_from_slice(&chunk.data);
    }
    assert!(contains(&delivered, "hello"), "got {:?}", String::from_utf8_lossy(&delivered));

    let (status, scrollback) = manager.status(&id).unwrap();
    assert_eq!(status, SessionStatus::Stopped);
    assert_eq!(scrollback, delivered);

    // No second exit notification arrives.
    tokio::time::sleep(Duration::from_millis(200)).await;
    for event in drain_events(&mut events) {
        assert!(!matches!(event, SessionEvent::Exited { .. }), "duplicate: {event:?}");
    }
}

#[tokio::test]
async fn scrollback_equals_concatenated_chunks() {
    let manager = create_manager();
    let mut sub = manager.subscribe();
    let mut events = manager.subscribe_events();

    let id = spawn_sh(&manager, "proj", "i=0; while [ $i -lt 200 ]; do echo line-$i; i=$((i+1)); done");
    next_event(&mut events, |e| matches!(e, SessionEvent::Exited { .. })).await;

    let mut delivered = Vec::new();
    while let Some(chunk) = sub.try_recv() {
        delivered.extend_from_slice(&chunk.data);
    }
    let scrollback = manager.scrollback(&id).unwrap();
    assert!(contains(&scrollback, "line-199"));
    assert_eq!(scrollback, delivered);
}

#[tokio::test]
async fn kill_before_exit_removes_without_exit_notification() {
    let manager = create_manager();
    let mut events = manager.subscribe_events();

    let id = spawn_sh(&manager, "proj", "sleep 30");
    manager.kill(&id);

    assert!(matches!(manager.status(&id), Err(SessionError::NotFound(_))));
    assert!(!manager.contains(&id));

    // Second kill is a silent no-op.
    manager.kill(&id);

    tokio::time::sleep(Duration::from_millis(500)).await;
    let mut killed = 0;
    for event in drain_events(&mut events) {
        match event {
            SessionEvent::Exited { session_id, .. } if session_id == id => {
                panic!("exit notification for killed session")
            }
            SessionEvent::Killed { session_id } if session_id == id => killed += 1,
            _ => {}
        }
    }
    assert_eq!(killed, 1);
}

#[tokio::test]
async fn write_to_unknown_session_creates_nothing() {
    let manager = create_manager();
    let ghost = SessionId::from("never-spawned");

    assert!(matches!(manager.write(&ghost, b"ls\n"), Err(SessionError::NotFound(_))));
    assert!(matches!(manager.resize(&ghost, 100, 40), Err(SessionError::NotFound(_))));
    assert!(manager.is_empty());
}

#[tokio::test]
async fn concurrent_sessions_keep_per_session_order() {
    let manager = create_manager();
    let mut sub = manager.subscribe();

    let a = spawn_sh(&manager, "proj", "printf A1; sleep 0.1; printf A2");
    let b = spawn_sh(&manager, "proj", "printf B1; sleep 0.1; printf B2");

    let seen = collect_until(&mut sub, |seen| {
        seen.get(&a).is_some_and(|d| contains(d, "A2"))
            && seen.get(&b).is_some_and(|d| contains(d, "B2"))
    })
    .await;

    let a_out = String::from_utf8_lossy(&seen[&a]).into_owned();
    let b_out = String::from_utf8_lossy(&seen[&b]).into_owned();
    assert!(a_out.find("A1").unwrap() < a_out.find("A2").unwrap(), "{a_out:?}");
    assert!(b_out.find("B1").unwrap() < b_out.find("B2").unwrap(), "{b_out:?}");
    assert!(!a_out.contains('B') && !b_out.contains('A'));
}

#[tokio::test]
async fn missing_command_fails_without_registering() {
    let manager = create_manager();
    let mut events = manager.subscribe_events();

    let result = manager.spawn(SpawnRequest::new(
        "proj",
        std::env::temp_dir(),
        "/no/such/binary-for-spawnd",
        vec![],
    ));

    assert!(matches!(result, Err(SessionError::Spawn(_))));
    assert!(manager.is_empty());
    assert!(events.try_recv().is_none());
}

#[tokio::test]
async fn input_reaches_the_process() {
    let manager = create_manager();
    let id = spawn_sh(&manager, "proj", "read line; echo got:$line");

    manager.write(&id, b"ping\n").unwrap();
    let scrollback = wait_for_stopped(&manager, &id).await;
    assert!(contains(&scrollback, "got:ping"), "{:?}", String::from_utf8_lossy(&scrollback));
}

#[tokio::test]
async fn resize_is_visible_to_the_child() {
    let manager = create_manager();
    let id = spawn_sh(&manager, "proj", "read _; stty size");

    manager.resize(&id, 100, 40).unwrap();
    manager.write(&id, b"\n").unwrap();

    let scrollback = wait_for_stopped(&manager, &id).await;
    assert!(contains(&scrollback, "40 100"), "{:?}", String::from_utf8_lossy(&scrollback));
    let info = manager.info(&id).unwrap();
    assert_eq!((info.cols, info.rows), (100, 40));
}

#[tokio::test]
async fn respawned_shell_survives_old_reader_shutdown() {
    let manager = spawnd::manager::SessionManager::new(spawnd::manager::ManagerConfig {
        shell: Some("/bin/sh".into()),
        ..Default::default()
    });
    let id = SessionId::from("pane-1");

    manager.spawn_shell(id.clone(), std::env::temp_dir()).unwrap();
    // Keep the first shell's pty open past the kill.
    manager
        .write(&id, b"trap '' HUP; while true; do sleep 1; done\n")
        .unwrap();
    tokio::time::sleep(Duration::from_millis(300)).await;
    manager.kill(&id);

    manager.spawn_shell(id.clone(), std::env::temp_dir()).unwrap();
    tokio::time::sleep(Duration::from_secs(2)).await;

    assert_eq!(manager.info(&id).unwrap().status, SessionStatus::Running);
    manager.write(&id, b"echo alive-$((6*7))\n").unwrap();
    common::wait_for_scrollback(&manager, &id, "alive-42").await;
    let scrollback = String::from_utf8_lossy(&manager.scrollback(&id).unwrap()).into_owned();
    assert!(!scrollback.contains("trap"), "old output leaked: {scrollback:?}");
    manager.kill(&id);
}
