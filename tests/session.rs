//! Integration tests against an in-process mock gateway
//!
//! Each test runs a scripted websocket server on a loopback listener and
//! drives one HassClient through it.

use futures_util::{SinkExt, StreamExt};
use serde_json::{json, Value};
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio_tungstenite::{accept_async, tungstenite::Message, WebSocketStream};

use hass_client::{ClientConfig, EventFilter, HassClient, HassError, ReconnectOptions, SessionState};

type ServerWs = WebSocketStream<TcpStream>;

const TOKEN: &str = "test-token";

async fn send_json(ws: &mut ServerWs, value: Value) {
    ws.send(Message::text(value.to_string())).await.unwrap();
}

async fn recv_json(ws: &mut ServerWs) -> Value {
    loop {
        match ws.next().await.expect("client hung up").unwrap() {
            Message::Text(data) => return serde_json::from_str(data.as_str()).unwrap(),
            Message::Close(_) => panic!("client closed while a frame was expected"),
            _ => continue,
        }
    }
}

/// Run the auth_required/auth/auth_ok exchange from the server side
async fn auth_handshake(stream: TcpStream) -> ServerWs {
    let mut ws = accept_async(stream).await.unwrap();
    send_json(&mut ws, json!({"type": "auth_required", "ha_version": "2024.6.1"})).await;
    let auth = recv_json(&mut ws).await;
    assert_eq!(auth["type"], "auth");
    assert_eq!(auth["access_token"], TOKEN);
    send_json(&mut ws, json!({"type": "auth_ok", "ha_version": "2024.6.1"})).await;
    ws
}

async fn listener() -> (TcpListener, u16) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    (listener, port)
}

fn test_config(port: u16) -> ClientConfig {
    ClientConfig::new("127.0.0.1", port, TOKEN)
        .with_call_timeout(Duration::from_secs(5))
        .with_keepalive(None)
}

fn fast_reconnect() -> ReconnectOptions {
    ReconnectOptions {
        initial_delay: Duration::from_millis(50),
        max_delay: Duration::from_millis(200),
        jitter: Duration::ZERO,
    }
}

async fn wait_until_connected(client: &HassClient) {
    tokio::time::timeout(Duration::from_secs(3), async {
        while !client.is_connected() {
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    })
    .await
    .expect("client did not reconnect in time");
}

fn event_frame(id: u64, event_type: &str, entity_id: &str) -> Value {
    json!({
        "id": id,
        "type": "event",
        "event": {
            "event_type": event_type,
            "data": { "entity_id": entity_id },
            "origin": "LOCAL",
            "time_fired": "2024-06-01T10:00:00+00:00",
            "context": { "id": "01J0CTX", "parent_id": null, "user_id": null }
        }
    })
}

#[tokio::test]
async fn call_resolves_with_the_matching_result() {
    let (listener, port) = listener().await;

    let server = tokio::spawn(async move {
        let (stream, _) = listener.accept().await.unwrap();
        let mut ws = auth_handshake(stream).await;

        let request = recv_json(&mut ws).await;
        assert_eq!(request["type"], "get_states");
        let id = request["id"].as_u64().unwrap();
        send_json(
            &mut ws,
            json!({"id": id, "type": "result", "success": true,
                   "result": [{"entity_id": "light.kitchen", "state": "on"}]}),
        )
        .await;

        let ping = recv_json(&mut ws).await;
        assert_eq!(ping["type"], "ping");
        let ping_id = ping["id"].as_u64().unwrap();
        assert!(ping_id > id, "sequences must increase monotonically");
        send_json(&mut ws, json!({"id": ping_id, "type": "pong"})).await;
    });

    let client = HassClient::new(test_config(port));
    client.connect().await.unwrap();
    assert_eq!(client.state(), SessionState::Connected);

    let states = client.call("get_states", Value::Null).await.unwrap();
    assert_eq!(states[0]["entity_id"], "light.kitchen");

    client.ping().await.unwrap();
    server.await.unwrap();
}

#[tokio::test]
async fn concurrent_calls_each_receive_their_own_result() {
    let (listener, port) = listener().await;

    let server = tokio::spawn(async move {
        let (stream, _) = listener.accept().await.unwrap();
        let mut ws = auth_handshake(stream).await;

        // collect three requests, answer them out of order
        let mut ids = Vec::new();
        for _ in 0..3 {
            let request = recv_json(&mut ws).await;
            ids.push(request["id"].as_u64().unwrap());
        }
        for id in ids.iter().rev() {
            send_json(
                &mut ws,
                json!({"id": id, "type": "result", "success": true, "result": {"echo": id}}),
            )
            .await;
        }
        ids
    });

    let client = HassClient::new(test_config(port));
    client.connect().await.unwrap();

    let (r1, r2, r3) = tokio::join!(
        client.call("get_config", Value::Null),
        client.call("get_config", Value::Null),
        client.call("get_config", Value::Null),
    );
    let echoes = [
        r1.unwrap()["echo"].as_u64().unwrap(),
        r2.unwrap()["echo"].as_u64().unwrap(),
        r3.unwrap()["echo"].as_u64().unwrap(),
    ];
    // every caller got exactly one resolution and the ids are pairwise distinct
    assert!(echoes[0] != echoes[1] && echoes[1] != echoes[2] && echoes[0] != echoes[2]);
    server.await.unwrap();
}

#[tokio::test]
async fn rejected_credentials_surface_an_authentication_error() {
    let (listener, port) = listener().await;

    tokio::spawn(async move {
        let (stream, _) = listener.accept().await.unwrap();
        let mut ws = accept_async(stream).await.unwrap();
        send_json(&mut ws, json!({"type": "auth_required", "ha_version": "2024.6.1"})).await;
        let _auth = recv_json(&mut ws).await;
        send_json(&mut ws, json!({"type": "auth_invalid", "message": "Invalid access token"})).await;

        // no reconnection may follow an authentication failure
        let second = tokio::time::timeout(Duration::from_millis(500), listener.accept()).await;
        assert!(second.is_err(), "client reconnected after auth_invalid");
    });

    let config = test_config(port).with_reconnect(fast_reconnect());
    let client = HassClient::new(config);
    match client.connect().await {
        Err(HassError::AuthenticationFailed(message)) => {
            assert_eq!(message, "Invalid access token");
        }
        other => panic!("expected AuthenticationFailed, got {:?}", other),
    }
    assert_eq!(client.state(), SessionState::Disconnected);

    tokio::time::sleep(Duration::from_millis(600)).await;
}

#[tokio::test]
async fn unexpected_close_fails_pending_calls_and_reconnects() {
    let (listener, port) = listener().await;

    let server = tokio::spawn(async move {
        let (stream, _) = listener.accept().await.unwrap();
        let mut ws = auth_handshake(stream).await;

        // two commands arrive and never get a result
        let _first = recv_json(&mut ws).await;
        let _second = recv_json(&mut ws).await;
        drop(ws);

        // the client comes back with backoff
        let (stream, _) = listener.accept().await.unwrap();
        let _ws = auth_handshake(stream).await;
        tokio::time::sleep(Duration::from_millis(200)).await;
    });

    let config = test_config(port).with_reconnect(fast_reconnect());
    let client = HassClient::new(config);
    client.connect().await.unwrap();

    let (r1, r2) = tokio::join!(
        client.call("get_states", Value::Null),
        client.call("get_states", Value::Null),
    );
    assert!(matches!(r1, Err(HassError::ConnectionClosed)), "got {:?}", r1);
    assert!(matches!(r2, Err(HassError::ConnectionClosed)), "got {:?}", r2);

    wait_until_connected(&client).await;
    server.await.unwrap();
}

#[tokio::test]
async fn subscription_receives_only_matching_event_types() {
    let (listener, port) = listener().await;

    let server = tokio::spawn(async move {
        let (stream, _) = listener.accept().await.unwrap();
        let mut ws = auth_handshake(stream).await;

        let subscribe = recv_json(&mut ws).await;
        assert_eq!(subscribe["type"], "subscribe_events");
        assert_eq!(subscribe["event_type"], "state_changed");
        let sub_id = subscribe["id"].as_u64().unwrap();
        send_json(&mut ws, json!({"id": sub_id, "type": "result", "success": true, "result": null}))
            .await;

        send_json(&mut ws, event_frame(sub_id, "state_changed", "light.kitchen")).await;
        send_json(&mut ws, event_frame(sub_id, "zone_entered", "zone.home")).await;
        send_json(&mut ws, event_frame(sub_id, "state_changed", "switch.garage")).await;
        tokio::time::sleep(Duration::from_millis(300)).await;
    });

    let client = HassClient::new(test_config(port));
    client.connect().await.unwrap();

    let (events_tx, mut events_rx) = mpsc::unbounded_channel();
    client
        .subscribe_event("state_changed", move |event| {
            events_tx.send(event).unwrap();
        })
        .await
        .unwrap();

    let first = tokio::time::timeout(Duration::from_secs(2), events_rx.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(first.event.event_type, "state_changed");
    assert_eq!(first.event.data.entity_id.as_deref(), Some("light.kitchen"));

    let second = tokio::time::timeout(Duration::from_secs(2), events_rx.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(second.event.event_type, "state_changed");
    assert_eq!(second.event.data.entity_id.as_deref(), Some("switch.garage"));

    // the zone_entered event was filtered out, nothing else is delivered
    let extra = tokio::time::timeout(Duration::from_millis(200), events_rx.recv()).await;
    assert!(extra.is_err());
    server.await.unwrap();
}

#[tokio::test]
async fn zero_timeout_resolves_with_a_timeout_error() {
    let (listener, port) = listener().await;

    tokio::spawn(async move {
        let (stream, _) = listener.accept().await.unwrap();
        let mut ws = auth_handshake(stream).await;
        // swallow the command and never answer
        let _request = recv_json(&mut ws).await;
        tokio::time::sleep(Duration::from_secs(5)).await;
    });

    let client = HassClient::new(test_config(port));
    client.connect().await.unwrap();

    let outcome = client
        .call_with_timeout("get_states", Value::Null, Duration::ZERO)
        .await;
    assert!(matches!(outcome, Err(HassError::Timeout)), "got {:?}", outcome);
}

#[tokio::test]
async fn unsubscribe_twice_is_a_noop() {
    let (listener, port) = listener().await;

    let server = tokio::spawn(async move {
        let (stream, _) = listener.accept().await.unwrap();
        let mut ws = auth_handshake(stream).await;

        let subscribe = recv_json(&mut ws).await;
        let sub_id = subscribe["id"].as_u64().unwrap();
        send_json(&mut ws, json!({"id": sub_id, "type": "result", "success": true, "result": null}))
            .await;

        let unsubscribe = recv_json(&mut ws).await;
        assert_eq!(unsubscribe["type"], "unsubscribe_events");
        assert_eq!(unsubscribe["subscription"].as_u64().unwrap(), sub_id);
        let id = unsubscribe["id"].as_u64().unwrap();
        send_json(&mut ws, json!({"id": id, "type": "result", "success": true, "result": null}))
            .await;

        // a second unsubscribe_events frame would panic the recv below,
        // give the client a moment to (wrongly) send one
        let extra = tokio::time::timeout(Duration::from_millis(200), ws.next()).await;
        assert!(extra.is_err(), "client sent a frame for an already removed handle");
    });

    let client = HassClient::new(test_config(port));
    client.connect().await.unwrap();

    let handle = client.subscribe_event("state_changed", |_| {}).await.unwrap();
    client.unsubscribe(handle).await.unwrap();
    client.unsubscribe(handle).await.unwrap();
    server.await.unwrap();
}

#[tokio::test]
async fn subscriptions_are_replayed_after_a_reconnect() {
    let (listener, port) = listener().await;

    let server = tokio::spawn(async move {
        let (stream, _) = listener.accept().await.unwrap();
        let mut ws = auth_handshake(stream).await;

        let subscribe = recv_json(&mut ws).await;
        let first_id = subscribe["id"].as_u64().unwrap();
        send_json(
            &mut ws,
            json!({"id": first_id, "type": "result", "success": true, "result": null}),
        )
        .await;
        drop(ws);

        // second connection: the client replays the subscription on its own
        let (stream, _) = listener.accept().await.unwrap();
        let mut ws = auth_handshake(stream).await;
        let replay = recv_json(&mut ws).await;
        assert_eq!(replay["type"], "subscribe_events");
        assert_eq!(replay["event_type"], "state_changed");
        let new_id = replay["id"].as_u64().unwrap();
        assert!(new_id > first_id, "a fresh wire id is assigned on replay");
        send_json(&mut ws, json!({"id": new_id, "type": "result", "success": true, "result": null}))
            .await;

        send_json(&mut ws, event_frame(new_id, "state_changed", "light.kitchen")).await;
        tokio::time::sleep(Duration::from_millis(300)).await;
    });

    let config = test_config(port).with_reconnect(fast_reconnect());
    let client = HassClient::new(config);
    client.connect().await.unwrap();

    let (events_tx, mut events_rx) = mpsc::unbounded_channel();
    client
        .subscribe(EventFilter::for_event_type("state_changed"), move |event| {
            events_tx.send(event).unwrap();
        })
        .await
        .unwrap();

    // the old connection drops, the callback must keep firing afterwards
    let event = tokio::time::timeout(Duration::from_secs(3), events_rx.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(event.event.data.entity_id.as_deref(), Some("light.kitchen"));
    server.await.unwrap();
}

#[tokio::test]
async fn close_cancels_pending_calls_and_stops_reconnection() {
    let (listener, port) = listener().await;

    tokio::spawn(async move {
        let (stream, _) = listener.accept().await.unwrap();
        let mut ws = auth_handshake(stream).await;
        let _request = recv_json(&mut ws).await;
        // hold the socket open, the client closes from its side
        tokio::time::sleep(Duration::from_secs(2)).await;
        drop(ws);

        let second = tokio::time::timeout(Duration::from_millis(500), listener.accept()).await;
        assert!(second.is_err(), "client reconnected after an explicit close");
    });

    let config = test_config(port).with_reconnect(fast_reconnect());
    let client = HassClient::new(config);
    client.connect().await.unwrap();

    let pending = client.call("get_states", Value::Null);
    let closer = async {
        tokio::time::sleep(Duration::from_millis(100)).await;
        client.close();
    };
    let (outcome, ()) = tokio::join!(pending, closer);
    assert!(matches!(outcome, Err(HassError::Cancelled)), "got {:?}", outcome);
}

#[tokio::test]
async fn missed_pong_fails_pending_calls_and_triggers_a_reconnect() {
    let (listener, port) = listener().await;

    tokio::spawn(async move {
        // first connection goes silent after the handshake: nothing is
        // read and no pong ever comes back
        let (stream, _) = listener.accept().await.unwrap();
        let silent = auth_handshake(stream).await;

        let (stream, _) = listener.accept().await.unwrap();
        let mut ws = auth_handshake(stream).await;
        drop(silent);

        // keep the fresh connection healthy by answering its pings
        loop {
            let frame = match tokio::time::timeout(Duration::from_secs(1), ws.next()).await {
                Ok(Some(Ok(Message::Text(data)))) => {
                    serde_json::from_str::<Value>(data.as_str()).unwrap()
                }
                _ => return,
            };
            if frame["type"] == "ping" {
                let id = frame["id"].as_u64().unwrap();
                send_json(&mut ws, json!({"id": id, "type": "pong"})).await;
            }
        }
    });

    let mut config = test_config(port).with_reconnect(fast_reconnect());
    config.keepalive_interval = Some(Duration::from_millis(150));
    config.keepalive_timeout = Duration::from_millis(150);
    let client = HassClient::new(config);
    client.connect().await.unwrap();

    // the gateway answers nothing: the keepalive declares the connection
    // dead well before the 5 second call deadline
    let outcome = client.call("get_states", Value::Null).await;
    assert!(matches!(outcome, Err(HassError::ConnectionClosed)), "got {:?}", outcome);

    wait_until_connected(&client).await;
    client.ping().await.unwrap();
}

#[tokio::test]
async fn session_can_connect_again_after_an_explicit_close() {
    let (listener, port) = listener().await;

    tokio::spawn(async move {
        loop {
            let (stream, _) = listener.accept().await.unwrap();
            let mut ws = auth_handshake(stream).await;
            // hold the connection until the client shuts it down
            while let Some(Ok(frame)) = ws.next().await {
                if matches!(frame, Message::Close(_)) {
                    break;
                }
            }
        }
    });

    let client = HassClient::new(test_config(port));
    // closing before the first connect must leave the session usable
    client.close();
    assert_eq!(client.state(), SessionState::Disconnected);

    client.connect().await.unwrap();
    assert!(client.is_connected());

    client.close();
    assert_eq!(client.state(), SessionState::Disconnected);

    client.connect().await.unwrap();
    assert!(client.is_connected());
}

#[tokio::test]
async fn manual_connect_during_backoff_keeps_a_single_connection() {
    let (listener, port) = listener().await;

    let server = tokio::spawn(async move {
        let (stream, _) = listener.accept().await.unwrap();
        let ws = auth_handshake(stream).await;
        drop(ws);

        let (stream, _) = listener.accept().await.unwrap();
        let mut ws = auth_handshake(stream).await;
        let request = recv_json(&mut ws).await;
        let id = request["id"].as_u64().unwrap();
        send_json(&mut ws, json!({"id": id, "type": "result", "success": true, "result": null}))
            .await;

        // the automatic retry was taken over by the manual connect, no
        // second live socket may appear
        let extra = tokio::time::timeout(Duration::from_millis(400), listener.accept()).await;
        assert!(extra.is_err(), "a duplicate connection was opened");
    });

    let config = test_config(port).with_reconnect(ReconnectOptions {
        initial_delay: Duration::from_millis(150),
        max_delay: Duration::from_millis(300),
        jitter: Duration::ZERO,
    });
    let client = HassClient::new(config);
    client.connect().await.unwrap();

    // wait until the drop is noticed and the retry timer is ticking
    tokio::time::timeout(Duration::from_secs(3), async {
        while client.is_connected() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("the dropped connection went unnoticed");

    client.connect().await.unwrap();
    let value = client.call("get_states", Value::Null).await.unwrap();
    assert_eq!(value, Value::Null);
    server.await.unwrap();
}

#[tokio::test]
async fn reserved_payload_keys_do_not_override_the_envelope() {
    let (listener, port) = listener().await;

    let server = tokio::spawn(async move {
        let (stream, _) = listener.accept().await.unwrap();
        let mut ws = auth_handshake(stream).await;

        let request = recv_json(&mut ws).await;
        assert_eq!(request["type"], "get_states");
        let id = request["id"].as_u64().unwrap();
        assert_ne!(id, 999_999, "the payload replaced the allocated sequence");
        assert_eq!(request["entity_id"], "light.kitchen");
        send_json(&mut ws, json!({"id": id, "type": "result", "success": true, "result": 1}))
            .await;

        // stay up while the client checks the call outcome
        let _ = tokio::time::timeout(Duration::from_millis(300), ws.next()).await;
    });

    let client = HassClient::new(test_config(port));
    client.connect().await.unwrap();

    let payload = json!({"id": 999_999, "type": "bogus", "entity_id": "light.kitchen"});
    let value = client.call("get_states", payload).await.unwrap();
    assert_eq!(value, json!(1));
    server.await.unwrap();
}

#[tokio::test]
async fn malformed_frames_are_skipped_without_killing_the_session() {
    let (listener, port) = listener().await;

    let server = tokio::spawn(async move {
        let (stream, _) = listener.accept().await.unwrap();
        let mut ws = auth_handshake(stream).await;

        ws.send(Message::text("this is not json")).await.unwrap();
        send_json(&mut ws, json!({"type": "totally_unknown", "id": 1})).await;

        let request = recv_json(&mut ws).await;
        let id = request["id"].as_u64().unwrap();
        send_json(&mut ws, json!({"id": id, "type": "result", "success": true, "result": 7}))
            .await;

        // stay up until the client has confirmed the session survived
        let ping = recv_json(&mut ws).await;
        assert_eq!(ping["type"], "ping");
        let ping_id = ping["id"].as_u64().unwrap();
        send_json(&mut ws, json!({"id": ping_id, "type": "pong"})).await;
    });

    let client = HassClient::new(test_config(port));
    client.connect().await.unwrap();
    tokio::time::sleep(Duration::from_millis(100)).await;

    let value = client.call("get_states", Value::Null).await.unwrap();
    assert_eq!(value, json!(7));
    assert!(client.is_connected());
    client.ping().await.unwrap();
    server.await.unwrap();
}
