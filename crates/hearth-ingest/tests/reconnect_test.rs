//! Reconnection behavior against a scripted fake hub.
//!
//! The fake hub speaks the real handshake (auth_required → auth → auth_ok →
//! subscribe_events → result) over a local websocket, then follows a
//! per-connection script: drop after one event, or keep streaming.

use futures_util::{SinkExt, StreamExt};
use hearth_ingest::hub::{HubClient, HubConfig};
use hearth_ingest::Error;
use serde_json::{json, Value};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{WebSocketStream, accept_async};

fn hub_config(url: String) -> HubConfig {
    HubConfig {
        url,
        access_token: "test-token".to_string(),
        auth_failure_limit: 2,
        connect_timeout: Duration::from_secs(5),
        backoff_base: Duration::from_millis(50),
        backoff_max: Duration::from_millis(500),
        // Long ping interval: these tests exercise reconnection, not keepalive.
        ping_interval: Duration::from_secs(60),
        pong_timeout: Duration::from_secs(10),
    }
}

async fn next_json(ws: &mut WebSocketStream<TcpStream>) -> Value {
    loop {
        match ws.next().await {
            Some(Ok(Message::Text(text))) => {
                return serde_json::from_str(text.as_str()).unwrap();
            }
            Some(Ok(Message::Ping(payload))) => {
                ws.send(Message::Pong(payload)).await.unwrap();
            }
            Some(Ok(_)) => {}
            other => panic!("connection ended unexpectedly: {other:?}"),
        }
    }
}

/// Run the handshake from the server side, asserting the client presents
/// its token and subscribes. Returns the subscription id.
async fn serve_handshake(ws: &mut WebSocketStream<TcpStream>) -> u64 {
    ws.send(Message::text(json!({"type": "auth_required"}).to_string()))
        .await
        .unwrap();

    let auth = next_json(ws).await;
    assert_eq!(auth["type"], "auth");
    assert_eq!(auth["access_token"], "test-token");
    ws.send(Message::text(json!({"type": "auth_ok"}).to_string()))
        .await
        .unwrap();

    let subscribe = next_json(ws).await;
    assert_eq!(subscribe["type"], "subscribe_events");
    assert_eq!(subscribe["event_type"], "state_changed");
    let sub_id = subscribe["id"].as_u64().unwrap();
    ws.send(Message::text(
        json!({"type": "result", "id": sub_id, "success": true}).to_string(),
    ))
    .await
    .unwrap();

    sub_id
}

fn event_frame(sub_id: u64, entity_id: &str, state: &str) -> String {
    json!({
        "id": sub_id,
        "type": "event",
        "event": {
            "event_type": "state_changed",
            "data": {
                "entity_id": entity_id,
                "new_state": {
                    "entity_id": entity_id,
                    "state": state,
                    "attributes": {},
                    "last_changed": "2025-06-01T10:00:00+00:00",
                    "last_updated": "2025-06-01T10:00:00+00:00"
                }
            },
            "time_fired": "2025-06-01T10:00:00+00:00"
        }
    })
    .to_string()
}

#[tokio::test]
async fn test_drop_after_subscribe_reconnects_and_resubscribes() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let subscribes = Arc::new(AtomicUsize::new(0));

    // Fake hub: first connection drops right after one event, second keeps
    // the stream open. Events are only sent after a completed handshake, so
    // receiving the second event proves the client re-subscribed first.
    let server_subscribes = Arc::clone(&subscribes);
    tokio::spawn(async move {
        // Connection 1: handshake, one event, abrupt drop
        let (stream, _) = listener.accept().await.unwrap();
        let mut ws = accept_async(stream).await.unwrap();
        let sub_id = serve_handshake(&mut ws).await;
        server_subscribes.fetch_add(1, Ordering::SeqCst);
        ws.send(Message::text(event_frame(sub_id, "sensor.a", "1")))
            .await
            .unwrap();
        drop(ws);

        // Connection 2: handshake again, then keep streaming
        let (stream, _) = listener.accept().await.unwrap();
        let mut ws = accept_async(stream).await.unwrap();
        let sub_id = serve_handshake(&mut ws).await;
        server_subscribes.fetch_add(1, Ordering::SeqCst);
        ws.send(Message::text(event_frame(sub_id, "sensor.a", "2")))
            .await
            .unwrap();

        // Stay alive until the client closes the subscription
        while let Some(Ok(msg)) = ws.next().await {
            if let Message::Text(text) = msg
                && let Ok(value) = serde_json::from_str::<Value>(text.as_str())
                && value["type"] == "ping"
            {
                let pong = json!({"type": "pong", "id": value["id"]}).to_string();
                let _ = ws.send(Message::text(pong)).await;
            }
        }
    });

    let hub = Arc::new(HubClient::new(hub_config(format!("ws://{addr}"))));
    let (raw_tx, mut raw_rx) = mpsc::channel(16);
    let hub_task = tokio::spawn({
        let hub = Arc::clone(&hub);
        async move { hub.run(raw_tx).await }
    });

    // First event arrives over the initial connection
    let first = tokio::time::timeout(Duration::from_secs(5), raw_rx.recv())
        .await
        .expect("timed out waiting for first event")
        .unwrap();
    assert_eq!(
        first.data.new_state.as_ref().unwrap().state,
        Some(json!("1"))
    );

    // The second event only exists on the other side of a full reconnect:
    // within one backoff interval the client must re-connect, re-auth, and
    // re-subscribe before the fake hub will send it.
    let second = tokio::time::timeout(Duration::from_secs(5), raw_rx.recv())
        .await
        .expect("timed out waiting for post-reconnect event")
        .unwrap();
    assert_eq!(
        second.data.new_state.as_ref().unwrap().state,
        Some(json!("2"))
    );

    assert_eq!(subscribes.load(Ordering::SeqCst), 2);
    assert!(hub.stats().snapshot().reconnects >= 1);

    hub.stop();
    let result = tokio::time::timeout(Duration::from_secs(5), hub_task)
        .await
        .expect("hub did not stop within grace")
        .unwrap();
    assert!(result.is_ok());
}

#[tokio::test]
async fn test_repeated_auth_rejection_is_fatal() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        loop {
            let (stream, _) = listener.accept().await.unwrap();
            let mut ws = accept_async(stream).await.unwrap();
            ws.send(Message::text(json!({"type": "auth_required"}).to_string()))
                .await
                .unwrap();
            let auth = next_json(&mut ws).await;
            assert_eq!(auth["type"], "auth");
            ws.send(Message::text(
                json!({"type": "auth_invalid", "message": "invalid token"}).to_string(),
            ))
            .await
            .unwrap();
        }
    });

    let hub = Arc::new(HubClient::new(hub_config(format!("ws://{addr}"))));
    let (raw_tx, _raw_rx) = mpsc::channel(16);

    let result = tokio::time::timeout(Duration::from_secs(10), {
        let hub = Arc::clone(&hub);
        async move { hub.run(raw_tx).await }
    })
    .await
    .expect("fatal auth failure should not retry forever");

    match result {
        Err(Error::AuthFailed { attempts }) => assert_eq!(attempts, 2),
        other => panic!("expected AuthFailed, got {other:?}"),
    }
    assert_eq!(hub.stats().snapshot().auth_failures, 2);
}
