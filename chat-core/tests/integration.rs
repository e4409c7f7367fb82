//! End-to-end scenarios driven against a real in-process TCP listener and
//! a temporary SQLite file, standing in for a client speaking the wire
//! protocol over the socket.

use std::time::Duration;

use serde_json::{json, Value};
use tokio::net::TcpStream;
use tokio::sync::watch;

use chat_core::codec;
use chat_core::listener;
use chat_core::state::AppState;
use chat_db::Store;

async fn spawn_server() -> (std::net::SocketAddr, watch::Sender<bool>) {
    let db_path = std::env::temp_dir().join(format!(
        "chat-core-integration-{}-{}.db",
        std::process::id(),
        std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap()
            .as_nanos()
    ));
    let store = Store::open(&db_path).await.unwrap();
    let state = AppState::new(store);

    let tcp_listener = listener::bind("127.0.0.1", 0).await.unwrap();
    let addr = tcp_listener.local_addr().unwrap();

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(listener::run(tcp_listener, None, state, shutdown_rx));

    (addr, shutdown_tx)
}

async fn send(stream: &mut TcpStream, value: Value) {
    codec::write_frame(stream, &value).await.unwrap();
}

async fn recv(stream: &mut TcpStream) -> Value {
    let payload = codec::read_frame(stream).await.unwrap().unwrap();
    serde_json::from_slice(&payload).unwrap()
}

async fn recv_timeout(stream: &mut TcpStream) -> Option<Value> {
    tokio::time::timeout(Duration::from_millis(200), recv(stream))
        .await
        .ok()
}

/// Reads frames until the stream goes quiet for a beat. Used instead of
/// asserting a fixed frame count/order, since the exact count a peer
/// receives around a join or login depends on how many other members are
/// already present in the channel — `user_joined`/`status_change` are
/// fanned out to every *other* member, never back to the originator.
async fn drain(stream: &mut TcpStream) -> Vec<Value> {
    let mut out = Vec::new();
    while let Some(value) = recv_timeout(stream).await {
        out.push(value);
    }
    out
}

fn none_matching(frames: &[Value], predicate: impl Fn(&Value) -> bool) {
    assert!(
        !frames.iter().any(|f| predicate(f)),
        "unexpected frame among {frames:?}"
    );
}

fn find_one<'a>(frames: &'a [Value], predicate: impl Fn(&Value) -> bool) -> &'a Value {
    frames
        .iter()
        .find(|f| predicate(f))
        .unwrap_or_else(|| panic!("expected frame not found among {frames:?}"))
}

async fn register(stream: &mut TcpStream, username: &str, password: &str) -> Value {
    send(
        stream,
        json!({"type": "auth_register", "username": username, "password": password}),
    )
    .await;
    recv(stream).await
}

#[tokio::test]
async fn e1_register_then_chat_joins_default_channel() {
    let (addr, _shutdown) = spawn_server().await;
    let mut alice = TcpStream::connect(addr).await.unwrap();

    let auth_result = register(&mut alice, "alice", "secret1").await;
    assert_eq!(auth_result["type"], "auth_result");
    assert_eq!(auth_result["success"], true);
    assert_eq!(auth_result["username"], "alice");
    assert!(auth_result["token"].is_string());

    let channel_info = recv(&mut alice).await;
    assert_eq!(channel_info["type"], "channel_info");
    let names: Vec<&str> = channel_info["channels"]
        .as_array()
        .unwrap()
        .iter()
        .map(|c| c["name"].as_str().unwrap())
        .collect();
    assert!(names.contains(&"general"));

    let joined = recv(&mut alice).await;
    assert_eq!(joined["type"], "channel_joined");
    assert_eq!(joined["channel"], "general");
    assert_eq!(joined["history"].as_array().unwrap().len(), 0);
    let users = joined["users"].as_array().unwrap();
    assert_eq!(users.len(), 1);
    assert_eq!(users[0]["username"], "alice");
    assert_eq!(users[0]["status"], "online");
}

#[tokio::test]
async fn e2_duplicate_register_is_case_insensitively_rejected() {
    let (addr, _shutdown) = spawn_server().await;

    let mut bob = TcpStream::connect(addr).await.unwrap();
    let first = register(&mut bob, "bob", "secret1").await;
    assert_eq!(first["success"], true);

    let mut bob2 = TcpStream::connect(addr).await.unwrap();
    let second = register(&mut bob2, "BOB", "whatever1").await;
    assert_eq!(second["type"], "auth_result");
    assert_eq!(second["success"], false);
    assert_eq!(second["error"], "Username already taken.");
}

#[tokio::test]
async fn e3_cross_channel_fan_out_isolation() {
    let (addr, _shutdown) = spawn_server().await;

    let mut alice = TcpStream::connect(addr).await.unwrap();
    register(&mut alice, "alice", "secret1").await;
    drain(&mut alice).await;

    let mut bob = TcpStream::connect(addr).await.unwrap();
    register(&mut bob, "bob", "secret1").await;
    // bob's own join/login never echoes user_joined or status_change
    // about himself back onto his own connection.
    let bob_own_frames = drain(&mut bob).await;
    none_matching(&bob_own_frames, |f| {
        f["type"] == "user_joined" && f["username"] == "bob"
    });
    none_matching(&bob_own_frames, |f| {
        f["type"] == "status_change" && f["username"] == "bob"
    });
    // alice sees bob's arrival into general
    let alice_saw_bob = drain(&mut alice).await;
    find_one(&alice_saw_bob, |f| {
        f["type"] == "user_joined" && f["username"] == "bob"
    });

    let mut carol = TcpStream::connect(addr).await.unwrap();
    register(&mut carol, "carol", "secret1").await;
    drain(&mut carol).await; // carol lands in general first
    // both alice and bob see carol's arrival; drain it so it doesn't
    // interfere with the later assertions
    drain(&mut alice).await;
    drain(&mut bob).await;

    send(
        &mut carol,
        json!({"type": "channel_create", "name": "random", "description": "off-topic"}),
    )
    .await;
    let created = drain(&mut carol).await;
    find_one(&created, |f| {
        f["type"] == "channel_created" && f["channel"]["name"] == "random"
    });
    drain(&mut alice).await; // alice also sees channel_created (global broadcast)
    drain(&mut bob).await;

    send(&mut carol, json!({"type": "channel_join", "channel": "random"})).await;
    let carol_switch = drain(&mut carol).await;
    find_one(&carol_switch, |f| f["type"] == "channel_joined" && f["channel"] == "random");
    // alice/bob see carol leaving general
    drain(&mut alice).await;
    drain(&mut bob).await;

    send(&mut alice, json!({"type": "message", "content": "hi"})).await;

    let bob_frames = drain(&mut bob).await;
    let bob_msg = find_one(&bob_frames, |f| f["type"] == "message");
    assert_eq!(bob_msg["sender"], "alice");
    assert_eq!(bob_msg["content"], "hi");

    assert!(recv_timeout(&mut carol).await.is_none());
}

#[tokio::test]
async fn e4_rate_limit_blocks_after_burst() {
    let (addr, _shutdown) = spawn_server().await;
    let mut alice = TcpStream::connect(addr).await.unwrap();
    register(&mut alice, "alice", "secret1").await;
    drain(&mut alice).await;

    for _ in 0..5 {
        send(&mut alice, json!({"type": "message", "content": "hi"})).await;
        let echoed = recv(&mut alice).await;
        assert_eq!(echoed["type"], "message");
    }

    send(&mut alice, json!({"type": "message", "content": "one too many"})).await;
    let err = recv(&mut alice).await;
    assert_eq!(err["type"], "error");
    assert_eq!(err["code"], "rate_limited");
}

#[tokio::test]
async fn e5_private_message_is_not_broadcast_or_stored() {
    let (addr, _shutdown) = spawn_server().await;

    let mut alice = TcpStream::connect(addr).await.unwrap();
    register(&mut alice, "alice", "secret1").await;
    drain(&mut alice).await;

    let mut bob = TcpStream::connect(addr).await.unwrap();
    register(&mut bob, "bob", "secret1").await;
    drain(&mut bob).await;
    drain(&mut alice).await; // alice sees bob's arrival

    let mut carol = TcpStream::connect(addr).await.unwrap();
    register(&mut carol, "carol", "secret1").await;
    drain(&mut carol).await;
    drain(&mut alice).await; // alice sees carol's arrival
    drain(&mut bob).await; // bob sees carol's arrival

    send(
        &mut alice,
        json!({"type": "private_message", "to": "bob", "content": "psst"}),
    )
    .await;

    let bob_frames = drain(&mut bob).await;
    let bob_side = find_one(&bob_frames, |f| f["type"] == "private_message");
    assert_eq!(bob_side["from"], "alice");
    assert!(bob_side.get("to").is_none());
    assert_eq!(bob_side["content"], "psst");

    let alice_frames = drain(&mut alice).await;
    let alice_side = find_one(&alice_frames, |f| f["type"] == "private_message");
    assert_eq!(alice_side["from"], "alice");
    assert_eq!(alice_side["to"], "bob");

    assert!(recv_timeout(&mut carol).await.is_none());
}

#[tokio::test]
async fn e6_disconnect_announces_leave_and_offline() {
    let (addr, _shutdown) = spawn_server().await;

    let mut alice = TcpStream::connect(addr).await.unwrap();
    register(&mut alice, "alice", "secret1").await;
    drain(&mut alice).await;

    let mut bob = TcpStream::connect(addr).await.unwrap();
    register(&mut bob, "bob", "secret1").await;
    drain(&mut bob).await;
    drain(&mut alice).await; // alice sees bob's arrival

    drop(alice);

    let bob_frames = drain(&mut bob).await;
    let left = find_one(&bob_frames, |f| f["type"] == "user_left");
    assert_eq!(left["channel"], "general");
    assert_eq!(left["username"], "alice");

    let offline = find_one(&bob_frames, |f| f["type"] == "status_change");
    assert_eq!(offline["username"], "alice");
    assert_eq!(offline["status"], "offline");
}
