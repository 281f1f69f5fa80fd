//! Integration tests for the in-process transport
//!
//! Exercises ordering, request tagging and isolation across several
//! endpoints on one network.

use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tomodomo::adapters::outbound::MemoryNetwork;
use tomodomo::{PeerId, Transport, TransportError};

#[tokio::test]
async fn test_endpoints_get_distinct_ids() {
    let network = MemoryNetwork::new();
    let endpoints: Vec<_> = (0..5).map(|_| network.endpoint()).collect();
    for endpoint in &endpoints {
        endpoint.open();
    }

    let ids = futures::future::join_all(endpoints.iter().map(|e| e.wait_ready())).await;
    let mut ids: Vec<PeerId> = ids.into_iter().map(|r| r.unwrap()).collect();
    ids.sort();
    ids.dedup();
    assert_eq!(ids.len(), 5);
    assert_eq!(network.len(), 5);
}

#[tokio::test]
async fn test_per_link_order_is_preserved_across_senders() {
    let network = MemoryNetwork::new();
    let sink = network.endpoint_with_id(PeerId::new("sink"));
    let seen = Arc::new(Mutex::new(Vec::new()));
    let s = seen.clone();
    sink.register_handler(
        "n:",
        Arc::new(move |from: &PeerId, body: &str| {
            s.lock().push((from.to_string(), body.parse::<u32>().unwrap_or(u32::MAX)));
            None
        }),
    );
    sink.open();

    let senders: Vec<_> = ["x", "y", "z"]
        .iter()
        .map(|id| {
            let endpoint = network.endpoint_with_id(PeerId::new(*id));
            endpoint.open();
            endpoint
        })
        .collect();

    for i in 0..50 {
        for sender in &senders {
            sender.send(&PeerId::new("sink"), format!("n:{}", i));
        }
    }
    tokio::time::sleep(Duration::from_millis(20)).await;

    let seen = seen.lock();
    assert_eq!(seen.len(), 150);
    for id in ["x", "y", "z"] {
        let from_one: Vec<u32> = seen.iter().filter(|(f, _)| f == id).map(|(_, n)| *n).collect();
        assert_eq!(from_one, (0..50).collect::<Vec<_>>());
    }
}

#[tokio::test]
async fn test_concurrent_requests_are_matched_by_tag() {
    let network = MemoryNetwork::new();
    let server = network.endpoint_with_id(PeerId::new("server"));
    server.register_handler(
        "echo ",
        Arc::new(|_: &PeerId, body: &str| Some(body.to_uppercase())),
    );
    server.open();

    let client = network.endpoint_with_id(PeerId::new("client"));
    client.open();

    let target = PeerId::new("server");
    let requests = (0..10).map(|i| client.request(&target, format!("echo word{}", i)));
    let replies = futures::future::join_all(requests).await;

    for (i, reply) in replies.into_iter().enumerate() {
        assert_eq!(reply.unwrap(), format!("WORD{}", i));
    }
}

#[tokio::test(start_paused = true)]
async fn test_request_to_unknown_peer_times_out() {
    let network = MemoryNetwork::with_request_timeout(Duration::from_secs(2));
    let client = network.endpoint_with_id(PeerId::new("client"));
    client.open();

    let err = client
        .request(&PeerId::new("ghost"), "hello".to_string())
        .await
        .unwrap_err();
    assert_eq!(
        err,
        TransportError::DeadlineExceeded {
            peer: PeerId::new("ghost"),
            after: Duration::from_secs(2),
        }
    );
}

#[tokio::test]
async fn test_restored_peer_receives_again() {
    let network = MemoryNetwork::new();
    let a = network.endpoint_with_id(PeerId::new("a"));
    let b = network.endpoint_with_id(PeerId::new("b"));
    let count = Arc::new(Mutex::new(0usize));
    let c = count.clone();
    b.register_handler(
        "tick",
        Arc::new(move |_: &PeerId, _: &str| {
            *c.lock() += 1;
            None
        }),
    );
    a.open();
    b.open();

    network.isolate(&PeerId::new("b"));
    a.send(&PeerId::new("b"), "tick".to_string());
    tokio::time::sleep(Duration::from_millis(10)).await;
    assert_eq!(*count.lock(), 0);

    network.restore(&PeerId::new("b"));
    a.send(&PeerId::new("b"), "tick".to_string());
    tokio::time::sleep(Duration::from_millis(10)).await;
    assert_eq!(*count.lock(), 1);
}
