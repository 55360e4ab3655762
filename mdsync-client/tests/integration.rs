//! Integration tests for end-to-end WebSocket sessions.
//!
//! These tests start a real in-process hub and connect real sessions,
//! verifying the full pipeline: socket, router, coalescer, presence.

use futures_util::{SinkExt, StreamExt};
use mdsync_client::{
    ConnectionState, ConnectionStatus, Message, MessageType, Session, SessionConfig, SessionEvent,
};
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tokio::net::TcpListener;
use tokio::sync::{broadcast, mpsc};
use tokio::time::{timeout, Duration};
use tokio_tungstenite::tungstenite::Message as WsMessage;

const WAIT: Duration = Duration::from_secs(5);

/// Shared document hub: keeps the latest content and carets, fans every
/// frame out to every connected client (sender included).
#[derive(Default)]
struct HubState {
    document: Mutex<String>,
    cursors: Mutex<HashMap<String, Message>>,
}

fn render(content: &str) -> String {
    format!("<p>{content}</p>")
}

async fn serve(listener: TcpListener, state: Arc<HubState>) {
    let (fanout, _) = broadcast::channel::<String>(256);
    while let Ok((stream, _)) = listener.accept().await {
        let state = Arc::clone(&state);
        let fanout = fanout.clone();
        tokio::spawn(async move {
            let Ok(ws) = tokio_tungstenite::accept_async(stream).await else {
                return;
            };
            let (mut writer, mut reader) = ws.split();
            let mut peers = fanout.subscribe();

            let content = state.document.lock().unwrap().clone();
            let mut greeting = vec![Message::init(&content, Some(render(&content)))];
            greeting.extend(state.cursors.lock().unwrap().values().cloned());
            for message in greeting {
                let frame = message.encode().unwrap();
                if writer.send(WsMessage::Text(frame.into())).await.is_err() {
                    return;
                }
            }

            let mut user_id = None;
            loop {
                tokio::select! {
                    frame = reader.next() => {
                        let Some(Ok(WsMessage::Text(text))) = frame else { break };
                        let Ok(mut message) = Message::decode(&text) else { continue };
                        match message.kind {
                            MessageType::Update => {
                                let content = message.content.clone().unwrap_or_default();
                                message.rendered_html = Some(render(&content));
                                *state.document.lock().unwrap() = content;
                            }
                            MessageType::Cursor => {
                                if let Some(id) = &message.user_id {
                                    user_id = Some(id.clone());
                                    state.cursors.lock().unwrap().insert(id.clone(), message.clone());
                                }
                            }
                            _ => {}
                        }
                        let _ = fanout.send(message.encode().unwrap());
                    }
                    frame = peers.recv() => {
                        let Ok(frame) = frame else { break };
                        if writer.send(WsMessage::Text(frame.into())).await.is_err() {
                            break;
                        }
                    }
                }
            }

            if let Some(id) = user_id {
                state.cursors.lock().unwrap().remove(&id);
                let _ = fanout.send(Message::cursor_disconnect(id).encode().unwrap());
            }
        });
    }
}

/// Start a hub on a free port, return its URL and state.
async fn start_hub(initial: &str) -> (String, Arc<HubState>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let url = format!("ws://{}/ws", listener.local_addr().unwrap());
    let state = Arc::new(HubState::default());
    *state.document.lock().unwrap() = initial.to_owned();
    tokio::spawn(serve(listener, Arc::clone(&state)));
    (url, state)
}

fn config(url: &str, user: &str) -> SessionConfig {
    SessionConfig::new(url)
        .with_user_id(user)
        .with_edit_window(Duration::from_millis(50))
        .with_reconnect_delay(Duration::from_millis(100))
}

async fn join(url: &str, user: &str) -> (Session, mpsc::Receiver<SessionEvent>) {
    let mut session = Session::start(config(url, user));
    let events = session.take_events().unwrap();
    session.connect().unwrap();
    wait_connected(&session).await;
    (session, events)
}

async fn wait_connected(session: &Session) {
    let mut status = session.watch_status();
    timeout(WAIT, status.wait_for(|s| s.is_connected))
        .await
        .expect("session did not connect")
        .unwrap();
}

async fn wait_for_event(
    events: &mut mpsc::Receiver<SessionEvent>,
    mut matches: impl FnMut(&SessionEvent) -> bool,
) -> SessionEvent {
    timeout(WAIT, async {
        loop {
            let event = events.recv().await.expect("event stream closed");
            if matches(&event) {
                return event;
            }
        }
    })
    .await
    .expect("expected event did not arrive")
}

#[tokio::test]
async fn test_session_receives_init() {
    let (url, _) = start_hub("# Shared notes").await;
    let (session, mut events) = join(&url, "alice").await;

    wait_for_event(&mut events, |e| {
        *e == SessionEvent::DocumentReplaced {
            content: "# Shared notes".into(),
        }
    })
    .await;
    wait_for_event(&mut events, |e| matches!(e, SessionEvent::PreviewUpdated { .. })).await;

    let snapshot = session.snapshot().await.unwrap();
    assert_eq!(snapshot.content, "# Shared notes");
    assert_eq!(snapshot.rendered_html.as_deref(), Some("<p># Shared notes</p>"));
    assert_eq!(snapshot.status, ConnectionStatus::connected());
}

#[tokio::test]
async fn test_edit_reaches_other_session() {
    let (url, hub) = start_hub("").await;
    let (alice, _alice_events) = join(&url, "alice").await;
    let (_bob, mut bob_events) = join(&url, "bob").await;

    alice.edit("h", 1).unwrap();
    alice.edit("hello from alice", 16).unwrap();

    wait_for_event(&mut bob_events, |e| {
        *e == SessionEvent::DocumentReplaced {
            content: "hello from alice".into(),
        }
    })
    .await;
    assert_eq!(*hub.document.lock().unwrap(), "hello from alice");

    // The coalesced flush is followed by alice's caret.
    let moved = wait_for_event(&mut bob_events, |e| {
        matches!(e, SessionEvent::CursorMoved { user_id, .. } if user_id == "alice")
    })
    .await;
    assert_eq!(
        moved,
        SessionEvent::CursorMoved {
            user_id: "alice".into(),
            position: 16
        }
    );
}

#[tokio::test]
async fn test_own_cursor_not_tracked() {
    let (url, _) = start_hub("").await;
    let (alice, mut alice_events) = join(&url, "alice").await;
    let (bob, _bob_events) = join(&url, "bob").await;

    alice.edit("abc", 3).unwrap();
    bob.edit("abc", 1).unwrap();
    bob.move_caret(2).unwrap();

    wait_for_event(&mut alice_events, |e| {
        matches!(e, SessionEvent::CursorMoved { user_id, position: 2 } if user_id == "bob")
    })
    .await;

    let snapshot = alice.snapshot().await.unwrap();
    let ids: Vec<_> = snapshot.cursors.iter().map(|c| c.user_id.as_str()).collect();
    assert_eq!(ids, vec!["bob"]);
}

#[tokio::test]
async fn test_late_joiner_sees_existing_cursors() {
    let (url, _) = start_hub("first line\nsecond").await;
    let (alice, mut alice_events) = join(&url, "alice").await;
    wait_for_event(&mut alice_events, |e| matches!(e, SessionEvent::DocumentReplaced { .. })).await;
    alice.move_caret(13).unwrap();

    // Wait until the hub has recorded alice's caret.
    tokio::time::sleep(Duration::from_millis(100)).await;

    let (bob, mut bob_events) = join(&url, "bob").await;
    wait_for_event(&mut bob_events, |e| {
        matches!(e, SessionEvent::CursorMoved { user_id, .. } if user_id == "alice")
    })
    .await;

    let snapshot = bob.snapshot().await.unwrap();
    let overlay = snapshot.overlay(&Default::default());
    assert_eq!(overlay.len(), 1);
    assert_eq!((overlay[0].position.line, overlay[0].position.column), (1, 2));
}

#[tokio::test]
async fn test_cursor_left_when_peer_shuts_down() {
    let (url, _) = start_hub("").await;
    let (alice, _alice_events) = join(&url, "alice").await;
    let (bob, mut bob_events) = join(&url, "bob").await;

    alice.edit("x", 1).unwrap();
    wait_for_event(&mut bob_events, |e| {
        matches!(e, SessionEvent::CursorMoved { user_id, .. } if user_id == "alice")
    })
    .await;

    alice.shutdown().await;
    wait_for_event(&mut bob_events, |e| {
        *e == SessionEvent::CursorLeft {
            user_id: "alice".into(),
        }
    })
    .await;
    assert!(bob.snapshot().await.unwrap().cursors.is_empty());
}

#[tokio::test]
async fn test_reconnects_once_hub_starts() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let url = format!("ws://{addr}/ws");
    let session = Session::start(config(&url, "alice"));
    let mut status = session.watch_status();
    session.connect().unwrap();

    timeout(WAIT, status.wait_for(|s| s.state == ConnectionState::Error))
        .await
        .expect("refused connect should surface as error")
        .unwrap();
    assert_eq!(session.status().status_text, "Error - reconnecting...");

    let listener = TcpListener::bind(addr).await.unwrap();
    tokio::spawn(serve(listener, Arc::new(HubState::default())));
    wait_connected(&session).await;
}

#[tokio::test]
async fn test_silent_server_times_out_and_retries() {
    // Accepts TCP but never answers the WebSocket upgrade.
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let url = format!("ws://{}/ws", listener.local_addr().unwrap());
    let accepted = Arc::new(AtomicUsize::new(0));
    let held = Arc::clone(&accepted);
    tokio::spawn(async move {
        let mut streams = Vec::new();
        while let Ok((stream, _)) = listener.accept().await {
            held.fetch_add(1, Ordering::SeqCst);
            streams.push(stream);
        }
    });

    let settings = config(&url, "alice").with_handshake_timeout(Duration::from_millis(200));
    let session = Session::start(settings);
    let mut status = session.watch_status();
    session.connect().unwrap();

    timeout(WAIT, status.wait_for(|s| s.state == ConnectionState::Error))
        .await
        .expect("stalled handshake should surface as error")
        .unwrap();
    assert_eq!(session.status().status_text, "Error - reconnecting...");

    timeout(WAIT, async {
        while accepted.load(Ordering::SeqCst) < 2 {
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    })
    .await
    .expect("no reconnect after the handshake timed out");
}

#[tokio::test]
async fn test_manual_disconnect_stays_down() {
    let (url, _) = start_hub("").await;
    let (session, _events) = join(&url, "alice").await;

    session.disconnect().unwrap();
    tokio::time::sleep(Duration::from_millis(300)).await;

    let snapshot = session.snapshot().await.unwrap();
    assert_eq!(snapshot.status, ConnectionStatus::stopped());
    assert_eq!(snapshot.status.status_text, "Disconnected");

    // Frames sent while stopped are dropped without error.
    session.send(Message::update("lost")).unwrap();
    session.connect().unwrap();
    wait_connected(&session).await;
}
