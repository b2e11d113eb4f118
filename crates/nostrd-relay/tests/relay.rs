// Copyright (c) 2022-2023 Yuki Kishimoto
// Copyright (c) 2023-2025 Rust Nostr Developers
// Distributed under the MIT software license

//! Socket-level relay tests

use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use nostrd_protocol::{
    ClientMessage, Event, EventBuilder, Filter, Keys, Kind, RelayMessage, SubscriptionId, Tag,
    Timestamp,
};
use nostrd_relay::{Config, NodeSupervisor};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

type Client = WebSocketStream<MaybeTlsStream<TcpStream>>;

const RECV_TIMEOUT: Duration = Duration::from_secs(5);

async fn start_node() -> NodeSupervisor {
    let mut config = Config::default();
    config.ws_addr = "127.0.0.1:0".parse().unwrap();
    NodeSupervisor::start(config).await.unwrap()
}

/// Connect and consume the AUTH greeting, returning the challenge
async fn connect(node: &NodeSupervisor) -> (Client, String) {
    let (client, ..) = connect_async(node.url()).await.unwrap();
    let mut client = client;
    match recv(&mut client).await {
        RelayMessage::Auth { challenge } => (client, challenge),
        other => panic!("expected AUTH greeting, got {other:?}"),
    }
}

async fn send(client: &mut Client, msg: ClientMessage) {
    client.send(Message::Text(msg.as_json())).await.unwrap();
}

async fn recv(client: &mut Client) -> RelayMessage {
    loop {
        let msg = timeout(RECV_TIMEOUT, client.next())
            .await
            .expect("timed out waiting for relay message")
            .expect("connection closed")
            .expect("websocket error");
        if let Message::Text(json) = msg {
            return RelayMessage::from_json(json).unwrap();
        }
    }
}

/// Publish an event and return the OK status and message
async fn publish(client: &mut Client, event: Event) -> (bool, String) {
    let id = event.id;
    send(client, ClientMessage::event(event)).await;
    loop {
        if let RelayMessage::Ok {
            event_id,
            status,
            message,
        } = recv(client).await
        {
            if event_id == id {
                return (status, message);
            }
        }
    }
}

/// Open a subscription and collect the historical replay up to EOSE
async fn subscribe(client: &mut Client, sub: &str, filters: Vec<Filter>) -> Vec<Event> {
    send(
        client,
        ClientMessage::req(SubscriptionId::new(sub), filters),
    )
    .await;
    let mut replay = Vec::new();
    loop {
        match recv(client).await {
            RelayMessage::Event { event, .. } => replay.push(*event),
            RelayMessage::EndOfStoredEvents(id) if id.as_str() == sub => return replay,
            RelayMessage::Closed { message, .. } => panic!("subscription closed: {message}"),
            _ => {}
        }
    }
}

#[tokio::test]
async fn test_req_then_live_event() {
    let node = start_node().await;
    let keys = Keys::generate();

    let (mut reader, ..) = connect(&node).await;
    let replay = subscribe(
        &mut reader,
        "s1",
        vec![Filter::new().kind(Kind::TEXT_NOTE).author(keys.public_key())],
    )
    .await;
    assert!(replay.is_empty());

    let (mut writer, ..) = connect(&node).await;
    let event = EventBuilder::text_note("hi")
        .sign_with_keys(&keys)
        .unwrap();
    let (accepted, message) = publish(&mut writer, event.clone()).await;
    assert!(accepted, "{message}");

    // The first connection receives the event live
    match recv(&mut reader).await {
        RelayMessage::Event {
            subscription_id,
            event: got,
        } => {
            assert_eq!(subscription_id.as_str(), "s1");
            assert_eq!(got.id, event.id);
            assert_eq!(got.content, "hi");
        }
        other => panic!("expected EVENT, got {other:?}"),
    }

    node.shutdown();
    node.join().await;
}

#[tokio::test]
async fn test_duplicate_submission() {
    let node = start_node().await;
    let keys = Keys::generate();
    let (mut client, ..) = connect(&node).await;

    let event = EventBuilder::text_note("once")
        .sign_with_keys(&keys)
        .unwrap();

    let (accepted, message) = publish(&mut client, event.clone()).await;
    assert!(accepted);
    assert!(message.is_empty());

    let (accepted, message) = publish(&mut client, event).await;
    assert!(accepted);
    assert!(message.starts_with("duplicate:"), "{message}");
}

#[tokio::test]
async fn test_replaceable_overwrite() {
    let node = start_node().await;
    let keys = Keys::generate();
    let (mut client, ..) = connect(&node).await;

    let old = EventBuilder::new(Kind::METADATA, r#"{"name":"old"}"#)
        .custom_created_at(Timestamp::now() - 100)
        .sign_with_keys(&keys)
        .unwrap();
    let new = EventBuilder::new(Kind::METADATA, r#"{"name":"new"}"#)
        .custom_created_at(Timestamp::now())
        .sign_with_keys(&keys)
        .unwrap();

    assert!(publish(&mut client, old).await.0);
    assert!(publish(&mut client, new.clone()).await.0);

    let replay = subscribe(
        &mut client,
        "meta",
        vec![Filter::new().kind(Kind::METADATA).author(keys.public_key())],
    )
    .await;
    assert_eq!(replay.len(), 1);
    assert_eq!(replay[0].id, new.id);
    assert_eq!(replay[0].content, r#"{"name":"new"}"#);
}

#[tokio::test]
async fn test_addressable_keeps_newest_per_identifier() {
    let node = start_node().await;
    let keys = Keys::generate();
    let (mut client, ..) = connect(&node).await;

    let newer = EventBuilder::new(Kind::from_u16(30_000), "current")
        .tag(Tag::identifier("x"))
        .custom_created_at(Timestamp::now())
        .sign_with_keys(&keys)
        .unwrap();
    let older = EventBuilder::new(Kind::from_u16(30_000), "stale")
        .tag(Tag::identifier("x"))
        .custom_created_at(Timestamp::now() - 500)
        .sign_with_keys(&keys)
        .unwrap();

    assert!(publish(&mut client, newer.clone()).await.0);
    let (accepted, ..) = publish(&mut client, older).await;
    assert!(!accepted);

    let replay = subscribe(
        &mut client,
        "addr",
        vec![Filter::new()
            .kind(Kind::from_u16(30_000))
            .author(keys.public_key())
            .identifier("x")],
    )
    .await;
    assert_eq!(replay.len(), 1);
    assert_eq!(replay[0].id, newer.id);
}

#[tokio::test]
async fn test_deletion_requires_authorship() {
    let node = start_node().await;
    let keys_a = Keys::generate();
    let keys_b = Keys::generate();
    let (mut client, ..) = connect(&node).await;

    let event = EventBuilder::text_note("please stay")
        .sign_with_keys(&keys_a)
        .unwrap();
    assert!(publish(&mut client, event.clone()).await.0);

    // B's deletion of A's event is stored but ineffective
    let request = EventBuilder::new(Kind::EVENT_DELETION, "")
        .tag(Tag::event(event.id))
        .sign_with_keys(&keys_b)
        .unwrap();
    assert!(publish(&mut client, request).await.0);

    let replay = subscribe(&mut client, "q", vec![Filter::new().id(event.id)]).await;
    assert_eq!(replay.len(), 1);

    // A's own deletion works
    let request = EventBuilder::new(Kind::EVENT_DELETION, "")
        .tag(Tag::event(event.id))
        .sign_with_keys(&keys_a)
        .unwrap();
    assert!(publish(&mut client, request).await.0);

    let replay = subscribe(&mut client, "q2", vec![Filter::new().id(event.id)]).await;
    assert!(replay.is_empty());
}

#[tokio::test]
async fn test_protected_event_requires_auth() {
    let node = start_node().await;
    let keys = Keys::generate();
    let (mut client, challenge) = connect(&node).await;

    let protected = EventBuilder::text_note("for my eyes only")
        .tag(Tag::protected())
        .sign_with_keys(&keys)
        .unwrap();

    let (accepted, message) = publish(&mut client, protected.clone()).await;
    assert!(!accepted);
    assert!(message.starts_with("auth-required:"), "{message}");

    // Authenticate against the connection challenge
    let auth = EventBuilder::auth(challenge, Config::default().public_url)
        .sign_with_keys(&keys)
        .unwrap();
    send(&mut client, ClientMessage::auth(auth.clone())).await;
    loop {
        if let RelayMessage::Ok {
            event_id, status, ..
        } = recv(&mut client).await
        {
            if event_id == auth.id {
                assert!(status);
                break;
            }
        }
    }

    let (accepted, message) = publish(&mut client, protected).await;
    assert!(accepted, "{message}");
}

#[tokio::test]
async fn test_expired_auth_event_rejected() {
    let node = start_node().await;
    let keys = Keys::generate();
    let (mut client, challenge) = connect(&node).await;

    // A NIP42 envelope goes through the same validation as any event
    let auth = EventBuilder::auth(challenge, Config::default().public_url)
        .tag(Tag::expiration(Timestamp::now() - 60))
        .sign_with_keys(&keys)
        .unwrap();
    send(&mut client, ClientMessage::auth(auth.clone())).await;

    match recv(&mut client).await {
        RelayMessage::Ok {
            event_id,
            status,
            message,
        } => {
            assert_eq!(event_id, auth.id);
            assert!(!status);
            assert!(message.starts_with("invalid:"), "{message}");
        }
        other => panic!("expected OK, got {other:?}"),
    }

    // The session did not authenticate: protected events stay gated
    let protected = EventBuilder::text_note("still gated")
        .tag(Tag::protected())
        .sign_with_keys(&keys)
        .unwrap();
    let (accepted, message) = publish(&mut client, protected).await;
    assert!(!accepted);
    assert!(message.starts_with("auth-required:"), "{message}");
}

#[tokio::test]
async fn test_vanish_purges_author_and_gift_wraps() {
    let node = start_node().await;
    let keys_a = Keys::generate();
    let keys_b = Keys::generate();
    let (mut client, ..) = connect(&node).await;

    for i in 0..3 {
        let event = EventBuilder::text_note(format!("note {i}"))
            .sign_with_keys(&keys_a)
            .unwrap();
        assert!(publish(&mut client, event).await.0);
    }

    let gift_wrap = EventBuilder::new(Kind::GIFT_WRAP, "sealed")
        .tag(Tag::public_key(keys_a.public_key()))
        .sign_with_keys(&keys_b)
        .unwrap();
    assert!(publish(&mut client, gift_wrap).await.0);

    let vanish = EventBuilder::new(Kind::from_u16(62), "goodbye")
        .tag(Tag::relay("ALL_RELAYS"))
        .sign_with_keys(&keys_a)
        .unwrap();
    assert!(publish(&mut client, vanish).await.0);

    let replay = subscribe(
        &mut client,
        "gone",
        vec![Filter::new().author(keys_a.public_key())],
    )
    .await;
    assert!(replay.is_empty());

    let replay = subscribe(
        &mut client,
        "wraps",
        vec![Filter::new().kind(Kind::GIFT_WRAP)],
    )
    .await;
    assert!(replay.is_empty());

    // The author stays vanished
    let late = EventBuilder::text_note("I'm back")
        .sign_with_keys(&keys_a)
        .unwrap();
    let (accepted, message) = publish(&mut client, late).await;
    assert!(!accepted);
    assert!(message.starts_with("blocked:"), "{message}");
}

#[tokio::test]
async fn test_count() {
    let node = start_node().await;
    let keys = Keys::generate();
    let (mut client, ..) = connect(&node).await;

    for i in 0..2 {
        let event = EventBuilder::text_note(format!("note {i}"))
            .sign_with_keys(&keys)
            .unwrap();
        assert!(publish(&mut client, event).await.0);
    }

    send(
        &mut client,
        ClientMessage::count(
            SubscriptionId::new("c1"),
            vec![Filter::new().author(keys.public_key())],
        ),
    )
    .await;

    match recv(&mut client).await {
        RelayMessage::Count {
            subscription_id,
            count,
        } => {
            assert_eq!(subscription_id.as_str(), "c1");
            assert_eq!(count, 2);
        }
        other => panic!("expected COUNT, got {other:?}"),
    }
}

#[tokio::test]
async fn test_invalid_signature_rejected() {
    let node = start_node().await;
    let keys_a = Keys::generate();
    let keys_b = Keys::generate();
    let (mut client, ..) = connect(&node).await;

    // Event signed by B claiming A's pubkey
    let mut event = EventBuilder::text_note("forged")
        .sign_with_keys(&keys_b)
        .unwrap();
    event.pubkey = keys_a.public_key();

    let (accepted, message) = publish(&mut client, event).await;
    assert!(!accepted);
    assert!(message.starts_with("invalid:"), "{message}");
}

#[tokio::test]
async fn test_unknown_command_notice() {
    let node = start_node().await;
    let (mut client, ..) = connect(&node).await;

    client
        .send(Message::Text(r#"["PUBLISH",{}]"#.to_string()))
        .await
        .unwrap();

    match recv(&mut client).await {
        RelayMessage::Notice(message) => assert_eq!(message, "unknown command"),
        other => panic!("expected NOTICE, got {other:?}"),
    }
}

#[tokio::test]
async fn test_nip11_document() {
    let node = start_node().await;

    let mut stream = TcpStream::connect(node.local_addr()).await.unwrap();
    stream
        .write_all(
            format!(
                "GET / HTTP/1.1\r\nHost: {}\r\nAccept: application/nostr+json\r\nConnection: close\r\n\r\n",
                node.local_addr()
            )
            .as_bytes(),
        )
        .await
        .unwrap();

    let mut response = String::new();
    stream.read_to_string(&mut response).await.unwrap();

    assert!(response.starts_with("HTTP/1.1 200"));
    assert!(response.contains("application/nostr+json"));
    assert!(response.contains("supported_nips"));
    assert!(response.contains("max_subscriptions"));
}

#[tokio::test]
async fn test_subscription_limit() {
    let node = start_node().await;
    let (mut client, ..) = connect(&node).await;
    let max = Config::default().max_subscriptions;

    for i in 0..max {
        let _ = subscribe(&mut client, &format!("s{i}"), vec![Filter::new()]).await;
    }

    // One over the ceiling: rejected, nothing evicted
    send(
        &mut client,
        ClientMessage::req(SubscriptionId::new("one-too-many"), vec![Filter::new()]),
    )
    .await;
    match recv(&mut client).await {
        RelayMessage::Closed {
            subscription_id,
            message,
        } => {
            assert_eq!(subscription_id.as_str(), "one-too-many");
            assert!(message.starts_with("rate-limited:"), "{message}");
        }
        other => panic!("expected CLOSED, got {other:?}"),
    }
}
