//! End-to-end scenarios over real loopback UDP, grounded on the original
//! ns-3 suite's join/converge/fail shapes (`spec.md` §8(b), (e), (f)).

use std::net::{Ipv4Addr, SocketAddrV4};
use std::time::Duration;

use chordnet::ChordEngine;
use corelib::{Identifier, NodeConfig};

fn config(port: u16, bootstrap_port: u16) -> NodeConfig {
    NodeConfig {
        m: 32,
        local_ip: Ipv4Addr::LOCALHOST,
        chord_port: port,
        app_port: port + 1,
        object_port: port + 2,
        bootstrap: SocketAddrV4::new(Ipv4Addr::LOCALHOST, bootstrap_port),
        ..Default::default()
    }
}

/// Processes every datagram already in flight, stopping once `budget`
/// passes with nothing left to read.
async fn drain(engine: &mut ChordEngine, budget: Duration) {
    loop {
        match tokio::time::timeout(budget, engine.recv_datagram_and_dispatch()).await {
            Ok(Ok(())) => continue,
            Ok(Err(_)) | Err(_) => break,
        }
    }
}

async fn run_rounds(a: &mut ChordEngine, b: &mut ChordEngine, rounds: u32) {
    let tick = Duration::from_millis(20);
    for _ in 0..rounds {
        drain(a, tick).await;
        drain(b, tick).await;
        a.stabilize_tick().await.unwrap();
        b.stabilize_tick().await.unwrap();
        a.heartbeat_tick().await.unwrap();
        b.heartbeat_tick().await.unwrap();
        drain(a, tick).await;
        drain(b, tick).await;
    }
}

#[tokio::test]
async fn two_node_ring_converges_bidirectionally() {
    let mut a = ChordEngine::bind(config(19700, 19700)).await.unwrap();
    let mut b = ChordEngine::bind(config(19710, 19700)).await.unwrap();

    let a_id = Identifier::from_le_bytes(vec![0, 0, 0, 0]);
    let b_id = Identifier::from_le_bytes(vec![128, 0, 0, 0]);

    a.insert_vnode("A".into(), a_id.clone()).await.unwrap();
    b.insert_vnode("B".into(), b_id.clone()).await.unwrap();

    run_rounds(&mut a, &mut b, 20).await;

    let a_info = a.vnode_info("A").expect("A still present");
    let b_info = b.vnode_info("B").expect("B still present");

    assert_eq!(a_info.successor_id, b_id);
    assert_eq!(a_info.predecessor_id, b_id);
    assert_eq!(b_info.successor_id, a_id);
    assert_eq!(b_info.predecessor_id, a_id);
    assert!(a_info.routable);
    assert!(b_info.routable);
}

#[tokio::test]
async fn lookup_of_a_key_routes_to_the_owning_node() {
    let mut a = ChordEngine::bind(config(19720, 19720)).await.unwrap();
    let mut b = ChordEngine::bind(config(19730, 19720)).await.unwrap();

    let a_id = Identifier::from_le_bytes(vec![0, 0, 0, 0]);
    let b_id = Identifier::from_le_bytes(vec![128, 0, 0, 0]);

    a.insert_vnode("A".into(), a_id.clone()).await.unwrap();
    b.insert_vnode("B".into(), b_id.clone()).await.unwrap();

    run_rounds(&mut a, &mut b, 20).await;

    let mut a_events = a.subscribe();
    // A key just past B on the ring: B should resolve it locally and reply
    // directly, without A needing to forward again.
    let key = Identifier::from_le_bytes(vec![200, 0, 0, 0]);
    a.lookup(key.clone(), corelib::Originator::Application).await.unwrap();

    let tick = Duration::from_millis(20);
    drain(&mut b, tick).await;
    drain(&mut a, tick).await;

    let event = tokio::time::timeout(Duration::from_millis(200), a_events.recv()).await.expect("an event arrived").unwrap();
    match event {
        chordnet::Event::LookupSuccess { key: resolved_key, app_port, .. } => {
            assert_eq!(resolved_key, key);
            assert_eq!(app_port, b.config().app_port);
        }
        other => panic!("unexpected event: {other:?}"),
    }
}

#[tokio::test]
async fn lookup_fails_when_no_peer_is_reachable() {
    let mut a = ChordEngine::bind(config(19740, 19740)).await.unwrap();
    let a_id = Identifier::from_le_bytes(vec![0, 0, 0, 0]);
    a.insert_vnode("A".into(), a_id).await.unwrap();

    let mut a_events = a.subscribe();
    // A bootstrap-alone node owns the whole ring, so any key resolves
    // locally; the failure path is exercised instead by looking up while
    // there is no local VNode to route through at all.
    a.remove_vnode("A").await.unwrap();
    let key = Identifier::from_le_bytes(vec![1, 0, 0, 0]);
    a.lookup(key.clone(), corelib::Originator::Application).await.unwrap();

    let event = tokio::time::timeout(Duration::from_millis(200), a_events.recv()).await.expect("an event arrived").unwrap();
    match event {
        chordnet::Event::LookupFailure { key: failed_key } => assert_eq!(failed_key, key),
        other => panic!("unexpected event: {other:?}"),
    }
}
