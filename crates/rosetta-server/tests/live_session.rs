//! Drives a running server over real WebSocket connections.

use futures_util::{SinkExt, StreamExt};
use rosetta_core::{Entry, EntryMapping};
use rosetta_server::{
    ClientMessage, PermissionLevel, RosettaServer, ServerMessage, ServerSettings, TreeEvent,
};
use rosetta_tree::{MappingEdit, MappingTree, SnapshotEntry, StaticIndex, Translator};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

type Client = WebSocketStream<MaybeTlsStream<TcpStream>>;

async fn start(
    settings: ServerSettings,
    tree: MappingTree,
) -> (SocketAddr, rosetta_server::HubHandle) {
    let settings = ServerSettings {
        bind: "127.0.0.1:0".into(),
        ..settings
    };
    let server = RosettaServer::bind(settings, tree, Arc::new(StaticIndex::empty()))
        .await
        .unwrap();
    let addr = server.local_addr().unwrap();
    let handle = server.handle();
    tokio::spawn(server.run());
    (addr, handle)
}

async fn send(client: &mut Client, message: &ClientMessage) {
    let json = serde_json::to_string(message).unwrap();
    client.send(Message::Text(json)).await.unwrap();
}

async fn recv(client: &mut Client) -> ServerMessage {
    loop {
        let frame = tokio::time::timeout(Duration::from_secs(5), client.next())
            .await
            .expect("timed out waiting for the server")
            .expect("connection closed")
            .unwrap();
        if let Message::Text(text) = frame {
            return serde_json::from_str(&text).unwrap();
        }
    }
}

/// Reads until a message matching `pick` arrives.
async fn recv_until<T>(client: &mut Client, pick: impl Fn(&ServerMessage) -> Option<T>) -> T {
    loop {
        let msg = recv(client).await;
        if let Some(found) = pick(&msg) {
            return found;
        }
    }
}

async fn login(addr: SocketAddr, identity: &str) -> (Client, u64) {
    let (mut client, _) = connect_async(format!("ws://{}", addr)).await.unwrap();
    send(
        &mut client,
        &ClientMessage::Login {
            identity: identity.into(),
            password: String::new(),
            protocol_version: 0,
            checksum: None,
        },
    )
    .await;

    let version = match recv(&mut client).await {
        ServerMessage::SessionAccepted {
            version,
            permission,
            ..
        } => {
            assert_eq!(permission, PermissionLevel::Editor);
            version
        }
        other => panic!("expected SessionAccepted, got {:?}", other),
    };
    (client, version)
}

#[tokio::test]
async fn test_edit_reaches_every_client() {
    let class = Entry::class("a").unwrap();
    let field = class.field("b", "I").unwrap();
    let tree = MappingTree::from_snapshot(vec![SnapshotEntry::new(
        class.clone(),
        EntryMapping::named("net/Counter"),
    )])
    .unwrap();

    let (addr, handle) = start(ServerSettings::default(), tree).await;
    let mut feed = handle.subscribe();

    let (mut ada, version) = login(addr, "ada").await;
    let mappings = recv_until(&mut ada, |m| match m {
        ServerMessage::SyncMappings { mappings, .. } => Some(mappings.clone()),
        _ => None,
    })
    .await;
    assert_eq!(mappings.len(), 1);

    let (mut bob, _) = login(addr, "bob").await;

    send(
        &mut ada,
        &ClientMessage::EditRequest {
            entry: field.clone(),
            base_version: version,
            edit: MappingEdit::set(EntryMapping::named("count")),
        },
    )
    .await;

    let accepted = recv_until(&mut ada, |m| match m {
        ServerMessage::EditAccepted { version, .. } => Some(*version),
        ServerMessage::ChangeBroadcast(_) => panic!("broadcast arrived before acknowledgement"),
        _ => None,
    })
    .await;
    assert_eq!(accepted, 1);

    let change = recv_until(&mut bob, |m| match m {
        ServerMessage::ChangeBroadcast(change) => Some(change.clone()),
        _ => None,
    })
    .await;
    assert_eq!(change.target, field);
    assert_eq!(change.version, 1);

    match feed.recv().await.unwrap() {
        TreeEvent::Changed(change) => assert_eq!(change.version, 1),
        other => panic!("expected change, got {:?}", other),
    }

    let tree = handle.tree();
    let tree = tree.read().await;
    assert_eq!(Translator::new(&tree).translate(&field), "net/Counter.count");
}

#[tokio::test]
async fn test_bad_frames_are_nakked() {
    let (addr, _handle) = start(ServerSettings::default(), MappingTree::new()).await;
    let (mut client, _) = login(addr, "ada").await;

    client
        .send(Message::Text("{\"type\":\"Nonsense\"}".into()))
        .await
        .unwrap();
    recv_until(&mut client, |m| match m {
        ServerMessage::Nak { .. } => Some(()),
        _ => None,
    })
    .await;

    // The connection survives a nak.
    send(&mut client, &ClientMessage::Heartbeat).await;
    let version = recv_until(&mut client, |m| match m {
        ServerMessage::HeartbeatAck { version } => Some(*version),
        _ => None,
    })
    .await;
    assert_eq!(version, 0);
}

#[tokio::test]
async fn test_wrong_password_closes_connection() {
    let settings = ServerSettings {
        password: "secret".into(),
        ..ServerSettings::default()
    };
    let (addr, _handle) = start(settings, MappingTree::new()).await;

    let (mut client, _) = connect_async(format!("ws://{}", addr)).await.unwrap();
    send(
        &mut client,
        &ClientMessage::Login {
            identity: "ada".into(),
            password: "guess".into(),
            protocol_version: 0,
            checksum: None,
        },
    )
    .await;

    assert!(matches!(
        recv(&mut client).await,
        ServerMessage::SessionRejected { .. }
    ));

    // Only close (or nothing) follows a rejection.
    loop {
        match tokio::time::timeout(Duration::from_secs(5), client.next()).await {
            Ok(Some(Ok(Message::Close(_)))) | Ok(None) | Ok(Some(Err(_))) => break,
            Ok(Some(Ok(Message::Text(text)))) => panic!("unexpected frame {}", text),
            Ok(Some(Ok(_))) => continue,
            Err(_) => panic!("connection was not closed"),
        }
    }
}

#[tokio::test]
async fn test_oversized_frames() {
    let settings = ServerSettings {
        max_frame_bytes: 4096,
        ..ServerSettings::default()
    };
    let (addr, _handle) = start(settings, MappingTree::new()).await;
    let (mut client, _) = login(addr, "ada").await;

    // Just over the limit: rejected by the codec, the connection stays up.
    client.send(Message::Text("x".repeat(5_000))).await.unwrap();
    let reason = recv_until(&mut client, |m| match m {
        ServerMessage::Nak { reason } => Some(reason.clone()),
        _ => None,
    })
    .await;
    assert!(reason.contains("4096"), "{}", reason);

    send(&mut client, &ClientMessage::Heartbeat).await;
    recv_until(&mut client, |m| match m {
        ServerMessage::HeartbeatAck { .. } => Some(()),
        _ => None,
    })
    .await;

    // Far over the limit: the transport refuses to buffer it.
    // The server may drop the socket before the write completes.
    let _ = client.send(Message::Text("x".repeat(64 * 1024))).await;
    loop {
        match tokio::time::timeout(Duration::from_secs(5), client.next()).await {
            Ok(Some(Ok(Message::Close(_)))) | Ok(None) | Ok(Some(Err(_))) => break,
            Ok(Some(Ok(_))) => continue,
            Err(_) => panic!("connection was not closed"),
        }
    }
}
