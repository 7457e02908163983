//! Chaos Tests for Registry and Connection Resilience
//!
//! These tests hammer the registry and connections from many tasks on a
//! multi-threaded runtime:
//! - Concurrent admission against the ceiling
//! - Concurrent replacement of a single id
//! - Close racing frame delivery and reconnect timers
//! - Run completion racing end of stream

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinSet;

use relay_core::{
    ConnectionRegistry, ConnectionState, InProcessTransport, RegistryConfig, RegistryError,
    RunStream, RunStreamEvent, StreamConnection, StreamEvent, StreamOptions, TransportError,
};

fn registry(max_connections: usize) -> (ConnectionRegistry, relay_core::OpenRequests) {
    let (transport, requests) = InProcessTransport::new_pair();
    let registry = ConnectionRegistry::new(
        RegistryConfig::default().with_max_connections(max_connections),
        Arc::new(transport),
    );
    (registry, requests)
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn chaos_concurrent_admission_never_overshoots() {
    let (registry, _requests) = registry(50);
    let mut tasks = JoinSet::new();

    for i in 0..200 {
        let registry = registry.clone();
        tasks.spawn(async move {
            registry
                .create_connection(format!("stream-{i}"), format!("mem://{i}"), None)
                .map(|(conn, _events)| conn)
        });
    }

    let mut admitted = 0;
    let mut refused = 0;
    while let Some(result) = tasks.join_next().await {
        match result.unwrap() {
            Ok(_) => admitted += 1,
            Err(RegistryError::CapacityReached { max }) => {
                assert_eq!(max, 50);
                refused += 1;
            }
        }
    }

    assert_eq!(admitted, 50);
    assert_eq!(refused, 150);
    assert_eq!(registry.connection_count(), 50);

    registry.close_all();
    assert_eq!(registry.connection_count(), 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn chaos_concurrent_replacement_keeps_one_live() {
    let (registry, _requests) = registry(10);
    let mut tasks = JoinSet::new();

    for i in 0..100 {
        let registry = registry.clone();
        tasks.spawn(async move {
            let (conn, _events) = registry
                .create_connection("hot-id", format!("mem://{i}"), None)
                .unwrap();
            conn
        });
    }

    let mut connections = Vec::new();
    while let Some(result) = tasks.join_next().await {
        connections.push(result.unwrap());
    }

    assert_eq!(registry.connection_ids(), vec!["hot-id".to_string()]);

    let live: Vec<&StreamConnection> = connections.iter().filter(|c| !c.is_closed()).collect();
    assert_eq!(live.len(), 1);
    assert_eq!(registry.get_connection("hot-id").unwrap().id(), live[0].id());

    let ids: HashSet<_> = connections.iter().map(StreamConnection::id).collect();
    assert_eq!(ids.len(), 100);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn chaos_close_races_frames() {
    for _ in 0..20 {
        let (transport, mut requests) = InProcessTransport::new_pair();
        let (conn, mut events) =
            StreamConnection::new("mem://x", StreamOptions::default(), Arc::new(transport));
        conn.connect();

        let session = requests.next().await.unwrap().accept();
        let sender = tokio::spawn(async move {
            let mut sent = 0;
            while session.send_data(format!("{{\"n\":{sent}}}")).await {
                sent += 1;
                if sent == 10_000 {
                    break;
                }
            }
        });

        tokio::time::sleep(Duration::from_millis(1)).await;
        conn.close();
        sender.await.unwrap();

        let mut saw_closed = false;
        while let Some(event) = events.recv().await {
            assert!(!saw_closed, "event after Closed: {event:?}");
            saw_closed = event == StreamEvent::Closed;
        }
        assert!(saw_closed);
        assert_eq!(conn.state(), ConnectionState::Closed);
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn chaos_flapping_server_with_close() {
    let (transport, mut requests) = InProcessTransport::new_pair();
    let options = StreamOptions::new()
        .with_max_reconnect_attempts(1_000)
        .with_reconnect_interval(Duration::from_millis(1))
        .with_max_reconnect_interval(Duration::from_millis(2));
    let (conn, _events) = StreamConnection::new("mem://flap", options, Arc::new(transport));
    conn.connect();

    // Alternate refusals and short-lived sessions
    for round in 0..50 {
        let pending = requests.next().await.unwrap();
        if round % 2 == 0 {
            pending.refuse(TransportError::ConnectionFailed("flap".to_string()));
        } else {
            pending.accept().end();
        }
    }

    conn.close();
    tokio::time::sleep(Duration::from_millis(50)).await;

    // Drain anything issued before close; nothing arrives afterwards
    while requests.try_next().is_some() {}
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(requests.try_next().is_none());
    assert_eq!(conn.state(), ConnectionState::Closed);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn chaos_complete_then_end_never_reconnects() {
    for round in 0..200 {
        let (transport, mut requests) = InProcessTransport::new_pair();
        let options = StreamOptions::new().with_reconnect_interval(Duration::ZERO);
        let (stream, mut events) = RunStream::new(
            format!("run-{round}"),
            "mem://runs",
            options,
            Arc::new(transport),
        );
        stream.connect();

        let session = requests.next().await.unwrap().accept();
        session.send_data(r#"{"type":"complete","run":{}}"#).await;
        session.end();

        let mut after_complete = Vec::new();
        let mut completed = false;
        while let Some(event) = events.recv().await {
            if completed {
                after_complete.push(event);
            } else {
                completed = matches!(event, RunStreamEvent::Complete(_));
            }
        }

        assert!(completed);
        assert_eq!(
            after_complete,
            vec![
                RunStreamEvent::StateChanged(ConnectionState::Disconnected),
                RunStreamEvent::StateChanged(ConnectionState::Closed),
                RunStreamEvent::Closed,
            ]
        );

        tokio::time::sleep(Duration::from_millis(5)).await;
        assert!(requests.try_next().is_none(), "reopened after complete in round {round}");
        assert_eq!(stream.connection().stats().reconnect_attempts, 0);
    }
}
