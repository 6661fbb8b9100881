//! End-to-end calls between two in-process systems over real sockets.

mod common;

use std::sync::Arc;
use std::time::Duration;

use common::{decode, encode, spawn_person};
use hypha::{
    ActorId, ActorSystem, ActorSystemError, ConnectionEvent, NodeId, ServerAddress, SystemConfig,
};
use tokio::sync::mpsc;

/// Start a server system, connect a client system to it, and wait for the
/// handshake. Returns both systems and the server's node id.
async fn connected_pair() -> (Arc<ActorSystem>, Arc<ActorSystem>, NodeId) {
    let server = ActorSystem::new(SystemConfig::default());
    let bound = server
        .run_server(ServerAddress::insecure("127.0.0.1", 0))
        .await
        .unwrap();

    let client = ActorSystem::new(SystemConfig::default());
    let (event_tx, mut event_rx) = mpsc::unbounded_channel();
    client.connect_client_with_monitor(
        ServerAddress::insecure("127.0.0.1", bound.port()),
        Some(Arc::new(move |event| {
            let _ = event_tx.send(event);
        })),
    );

    let server_node = loop {
        match tokio::time::timeout(Duration::from_secs(5), event_rx.recv())
            .await
            .expect("client connects within 5s")
            .expect("monitor stream open")
        {
            ConnectionEvent::Connected(node) => break node,
            _ => continue,
        }
    };
    assert_eq!(server_node, server.node_id());

    (server, client, server_node)
}

#[tokio::test]
async fn test_remote_add_one_round_trip() {
    let (server, client, server_node) = connected_pair().await;
    spawn_person(&server, "Alice", Some(ActorId::new("alice")));

    let reply = client
        .remote_call(
            &ActorId::new("alice").with_node(server_node),
            "addOne",
            Vec::new(),
            vec![encode(&42i64)],
        )
        .await
        .unwrap();
    let result: i64 = decode(&reply).unwrap();
    assert_eq!(result, 43);

    client.shutdown_gracefully().await;
    server.shutdown_gracefully().await;
}

#[tokio::test]
async fn test_concurrent_calls_correlate_replies() {
    let (server, client, server_node) = connected_pair().await;
    spawn_person(&server, "Alice", Some(ActorId::new("alice")));
    let alice = ActorId::new("alice").with_node(server_node);

    let mut calls = Vec::new();
    for n in 0..24i64 {
        let client = client.clone();
        let alice = alice.clone();
        calls.push(tokio::spawn(async move {
            let reply = client
                .remote_call(&alice, "addOne", Vec::new(), vec![encode(&n)])
                .await
                .unwrap();
            (n, decode::<i64>(&reply).unwrap())
        }));
    }
    for call in calls {
        let (n, result) = call.await.unwrap();
        assert_eq!(result, n + 1);
    }

    client.shutdown_gracefully().await;
    server.shutdown_gracefully().await;
}

#[tokio::test]
async fn test_actor_failure_yields_empty_reply_and_decode_error() {
    let (server, client, server_node) = connected_pair().await;
    spawn_person(&server, "Alice", Some(ActorId::new("alice")));

    // The error detail stays on the server; the caller only sees bytes
    // that fail to decode as the expected type.
    let reply = client
        .remote_call(
            &ActorId::new("alice").with_node(server_node),
            "boom",
            Vec::new(),
            Vec::new(),
        )
        .await
        .unwrap();
    assert!(reply.is_empty());
    let err = decode::<String>(&reply).unwrap_err();
    assert!(matches!(err, ActorSystemError::DecodingError { .. }));

    client.shutdown_gracefully().await;
    server.shutdown_gracefully().await;
}

#[tokio::test]
async fn test_node_info_is_scoped_to_the_calling_connection() {
    let (server, client, server_node) = connected_pair().await;
    spawn_person(&server, "Alice", Some(ActorId::new("alice")));
    let alice = ActorId::new("alice").with_node(server_node);

    client
        .remote_call_void(&alice, "remember", Vec::new(), vec![encode(&"blue")])
        .await
        .unwrap();
    let reply = client
        .remote_call(&alice, "recall", Vec::new(), Vec::new())
        .await
        .unwrap();
    let recalled: Option<String> = decode(&reply).unwrap();
    assert_eq!(recalled.as_deref(), Some("blue"));

    client.shutdown_gracefully().await;
    server.shutdown_gracefully().await;
}

#[tokio::test]
async fn test_unknown_recipient_is_dropped_not_answered() {
    let (server, client, server_node) = connected_pair().await;

    // No actor registered: the server drops the call, so the caller's own
    // cancellation (here a timeout) is what surfaces it.
    let ghost_id = ActorId::new("ghost").with_node(server_node);
    let call = client.remote_call(
        &ghost_id,
        "addOne",
        Vec::new(),
        vec![encode(&1i64)],
    );
    let outcome = tokio::time::timeout(Duration::from_millis(500), call).await;
    assert!(outcome.is_err(), "expected the call to never complete");

    client.shutdown_gracefully().await;
    server.shutdown_gracefully().await;
}
