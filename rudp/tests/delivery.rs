mod utils;

use async_trait::async_trait;
use rudp::{Client, Connection, ConnectionConfig, Handler, SendError, Server};
use rudp::{MAX_DATA_PER_CHUNK, WINDOW_SIZE};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use utils::*;

/// Rebroadcasts every reliable message to all connected clients
struct Relay {
    recorder: Arc<RecordingHandler>,
}

#[async_trait]
impl Handler for Relay {
    async fn on_connect(&self, connection: Connection) {
        self.recorder.on_connect(connection).await
    }

    async fn on_disconnect(&self, peer: SocketAddr) {
        self.recorder.on_disconnect(peer).await
    }

    async fn on_receive(&self, connection: Connection, payload: Vec<u8>) {
        self.recorder.on_receive(connection.clone(), payload.clone()).await;

        let server = connection.server().expect("accepted connections know their server");
        server.broadcast_reliable(&payload).await.unwrap();
    }
}

#[tokio::test(flavor = "multi_thread")]
async fn test_unreliable_delivery() {
    setup();

    let (server_handler, mut server_events) = RecordingHandler::new();
    let server = Server::bind(loopback(), server_handler, ConnectionConfig::default())
        .await
        .unwrap();
    let server_addr = server.local_addr().unwrap();

    let (client_handler, mut client_events) = RecordingHandler::new();
    let client = Client::connect(server_addr, client_handler, client_config())
        .await
        .unwrap();
    let client_addr = client.local_addr().unwrap();

    assert_eq!(server_events.next().await, Event::Connected(client_addr));
    assert_eq!(client_events.next().await, Event::Connected(server_addr));

    client.send_unreliable(b"hello").await.unwrap();
    assert_eq!(
        server_events.next().await,
        Event::Received(client_addr, b"hello".to_vec())
    );

    server.send_unreliable(client_addr, b"world").await.unwrap();
    assert_eq!(
        client_events.next().await,
        Event::Received(server_addr, b"world".to_vec())
    );
}

#[tokio::test(flavor = "multi_thread")]
async fn test_chunked_message_larger_than_window() {
    setup();

    let (server_handler, mut server_events) = RecordingHandler::new();
    let server = Server::bind(loopback(), server_handler, ConnectionConfig::default())
        .await
        .unwrap();
    let server_addr = server.local_addr().unwrap();

    let (client_handler, mut client_events) = RecordingHandler::new();
    let client = Client::connect(server_addr, client_handler, client_config())
        .await
        .unwrap();
    let client_addr = client.local_addr().unwrap();

    let payload = (0..100_000).map(|i| (i % 251) as u8).collect::<Vec<u8>>();
    assert!(payload.len() > WINDOW_SIZE * MAX_DATA_PER_CHUNK);

    client.send_reliable(&payload).await.unwrap();
    client.send_reliable(b"after").await.unwrap();

    assert_eq!(server_events.next_received().await, (client_addr, payload.clone()));
    assert_eq!(
        server_events.next_received().await,
        (client_addr, b"after".to_vec())
    );

    server.send_reliable(client_addr, &payload).await.unwrap();
    assert_eq!(client_events.next_received().await, (server_addr, payload));
}

#[tokio::test(flavor = "multi_thread")]
async fn test_many_reliable_messages_in_order() {
    setup();

    let (server_handler, mut server_events) = RecordingHandler::new();
    let server = Server::bind(loopback(), server_handler, ConnectionConfig::default())
        .await
        .unwrap();

    let (client_handler, _client_events) = RecordingHandler::new();
    let client = Client::connect(server.local_addr().unwrap(), client_handler, client_config())
        .await
        .unwrap();

    // Several times the window, the overflow is queued
    let count = WINDOW_SIZE * 4;

    for n in 0..count {
        client.send_reliable(n.to_string().as_bytes()).await.unwrap();
    }

    for n in 0..count {
        assert_eq!(
            server_events.next_received().await.1,
            n.to_string().into_bytes()
        );
    }
}

#[tokio::test(flavor = "multi_thread")]
async fn test_broadcast_to_multiple_clients() {
    setup();

    let (server_handler, mut server_events) = RecordingHandler::new();
    let server = Server::bind(loopback(), server_handler, ConnectionConfig::default())
        .await
        .unwrap();
    let server_addr = server.local_addr().unwrap();

    let mut clients = vec![];

    for _ in 0..3 {
        let (handler, events) = RecordingHandler::new();
        let client = Client::connect(server_addr, handler, client_config())
            .await
            .unwrap();

        clients.push((client, events));
    }

    for _ in 0..3 {
        assert!(matches!(server_events.next().await, Event::Connected(_)));
    }

    assert_eq!(server.connection_count(), 3);

    server.broadcast_reliable(b"reliable news").await.unwrap();
    server.broadcast_unreliable(b"unreliable news").await.unwrap();

    for (_, events) in clients.iter_mut() {
        let mut received = vec![];

        while received.len() < 2 {
            received.push(events.next_received().await.1);
        }

        received.sort();
        assert_eq!(
            received,
            vec![b"reliable news".to_vec(), b"unreliable news".to_vec()]
        );
    }

    let (leaving, _) = clients.remove(0);
    let leaving_addr = leaving.local_addr().unwrap();
    leaving.disconnect().await.unwrap();

    assert_eq!(server_events.next_disconnected().await, leaving_addr);
    assert!(eventually(|| server.connection_count() == 2).await);
    assert_eq!(
        server.send_reliable(leaving_addr, b"gone").await,
        Err(SendError::NotConnected)
    );

    for (client, _) in clients.iter() {
        assert!(server.connections().contains(&client.local_addr().unwrap()));
    }
}

#[tokio::test(flavor = "multi_thread")]
async fn test_server_disconnects_single_client() {
    setup();

    let (server_handler, mut server_events) = RecordingHandler::new();
    let server = Server::bind(loopback(), server_handler, ConnectionConfig::default())
        .await
        .unwrap();
    let server_addr = server.local_addr().unwrap();

    let (client_handler, mut client_events) = RecordingHandler::new();
    let client = Client::connect(server_addr, client_handler, client_config())
        .await
        .unwrap();
    let client_addr = client.local_addr().unwrap();

    assert_eq!(server_events.next().await, Event::Connected(client_addr));

    server.disconnect(client_addr).await.unwrap();

    assert_eq!(client_events.next_disconnected().await, server_addr);
    assert_eq!(server_events.next_disconnected().await, client_addr);
    assert_eq!(client.is_open(), false);
    assert_eq!(
        client_events.next_within(Duration::from_millis(100)).await,
        None
    );
}

#[tokio::test(flavor = "multi_thread")]
async fn test_broadcast_from_server_callback() {
    setup();

    let (recorder, mut server_events) = RecordingHandler::new();
    let server = Server::bind(loopback(), Arc::new(Relay { recorder }), ConnectionConfig::default())
        .await
        .unwrap();
    let server_addr = server.local_addr().unwrap();

    let (handler, mut sender_events) = RecordingHandler::new();
    let sender = Client::connect(server_addr, handler, client_config())
        .await
        .unwrap();

    let (handler, mut listener_events) = RecordingHandler::new();
    let _listener = Client::connect(server_addr, handler, client_config())
        .await
        .unwrap();

    for _ in 0..2 {
        assert!(matches!(server_events.next().await, Event::Connected(_)));
    }

    assert_eq!(sender.connection().server().is_none(), true);
    assert_eq!(server.handle().connection_count(), 2);

    sender.send_reliable(b"to everyone").await.unwrap();

    assert_eq!(
        sender_events.next_received().await,
        (server_addr, b"to everyone".to_vec())
    );
    assert_eq!(
        listener_events.next_received().await,
        (server_addr, b"to everyone".to_vec())
    );
}
