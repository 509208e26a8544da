//! Integration test for the TCP transport over loopback.

use std::net::SocketAddr;
use std::thread;
use std::time::{Duration, Instant};

use tether_core::components::{register_components, Position};
use tether_core::{ComponentRegistry, InstanceId, PeerToken, Store, Tick};
use tether_networking::protocol::{encode_single, Op, OpReader};
use tether_networking::{
    PeerState, ReplicationConfig, Replicator, SyncApp, TcpTransport, Transport, TransportConfig,
    TransportEvent,
};

const WAIT: Duration = Duration::from_secs(5);

fn config(listen: bool) -> TransportConfig {
    TransportConfig {
        listen_addr: listen.then(|| SocketAddr::from(([127, 0, 0, 1], 0))),
        heartbeat_interval: Duration::from_millis(50),
        dead_peer_timeout: Duration::from_secs(2),
        reconnect_initial: Duration::from_millis(20),
        reconnect_max: Duration::from_millis(200),
        ..TransportConfig::default()
    }
}

/// Polls until an event matches or the wait runs out.
fn wait_for<F>(transport: &mut TcpTransport, mut matches: F) -> Option<TransportEvent>
where
    F: FnMut(&TransportEvent) -> bool,
{
    let deadline = Instant::now() + WAIT;
    while Instant::now() < deadline {
        while let Some(event) = transport.poll_event() {
            if matches(&event) {
                return Some(event);
            }
        }
        thread::sleep(Duration::from_millis(5));
    }
    None
}

fn connected_token(transport: &mut TcpTransport) -> PeerToken {
    match wait_for(transport, |event| matches!(event, TransportEvent::Connected { .. })) {
        Some(TransportEvent::Connected { peer, .. }) => peer,
        other => panic!("expected Connected, got {other:?}"),
    }
}

fn ack_in(body: &[u8]) -> Option<Tick> {
    match OpReader::new(body).next_op() {
        Ok(Some(Op::Ack { tick })) => Some(tick),
        _ => None,
    }
}

#[test]
fn test_loopback_frames_and_disconnect() {
    let mut listener = TcpTransport::start(config(true), InstanceId(1)).unwrap();
    let addr = listener.local_addr().unwrap();
    let mut dialer = TcpTransport::start(config(false), InstanceId(2)).unwrap();

    let token = dialer.connect(addr).unwrap();
    assert_eq!(connected_token(&mut dialer), token);
    let accepted = connected_token(&mut listener);

    let frame = encode_single(&Op::Ack { tick: Tick(42) }, 64).unwrap();
    dialer.send(token, frame);
    let body = match wait_for(&mut listener, |event| matches!(event, TransportEvent::Frame { .. })) {
        Some(TransportEvent::Frame { peer, body }) => {
            assert_eq!(peer, accepted);
            body
        }
        other => panic!("expected Frame, got {other:?}"),
    };
    assert_eq!(ack_in(&body), Some(Tick(42)));

    let reply = encode_single(&Op::Ack { tick: Tick(7) }, 64).unwrap();
    listener.send(accepted, reply);
    let reply = wait_for(&mut dialer, |event| matches!(event, TransportEvent::Frame { .. }));
    assert!(matches!(
        reply,
        Some(TransportEvent::Frame { ref body, .. }) if ack_in(body) == Some(Tick(7))
    ));
    assert_eq!(listener.stats().frames_received, 1);
    assert_eq!(dialer.connected_peers(), vec![token]);

    dialer.disconnect(token);
    assert!(wait_for(&mut listener, |event| {
        matches!(event, TransportEvent::Disconnected { peer, .. } if *peer == accepted)
    })
    .is_some());
    assert!(wait_for(&mut dialer, |event| {
        matches!(event, TransportEvent::Disconnected { peer, .. } if *peer == token)
    })
    .is_some());
}

#[test]
fn test_self_connection_rejected() {
    let mut transport = TcpTransport::start(config(true), InstanceId(5)).unwrap();
    let addr = transport.local_addr().unwrap();
    let token = transport.connect(addr).unwrap();

    let rejected = wait_for(&mut transport, |event| {
        matches!(event, TransportEvent::Rejected { peer, .. } if *peer == token)
    });
    assert!(rejected.is_some());
}

#[test]
fn test_replicators_sync_over_tcp() {
    let make = |transport: TcpTransport| {
        let mut registry = ComponentRegistry::new();
        register_components(&mut registry).unwrap();
        let store = Store::with_instance(transport.local_instance());
        let replicator = Replicator::new(transport, registry, ReplicationConfig::default());
        SyncApp::new(store, replicator, 100)
    };
    let mut robot = make(TcpTransport::start(config(true), InstanceId(1)).unwrap());
    let addr = robot.replicator().transport().local_addr().unwrap();
    let mut console = make(TcpTransport::start(config(false), InstanceId(2)).unwrap());

    let vehicle = robot.store_mut().spawn_replicated();
    robot
        .store_mut()
        .insert(vehicle, Position::new(1.0, 2.0, 3.0))
        .unwrap();
    let net_id = robot.store().net_id(vehicle).unwrap();
    let token = console.replicator_mut().connect(addr).unwrap();

    let deadline = Instant::now() + WAIT;
    let mut mirror = None;
    while mirror.is_none() && Instant::now() < deadline {
        robot.tick();
        console.tick();
        mirror = console.replicator().mirror_of(token, net_id);
        thread::sleep(Duration::from_millis(5));
    }

    let mirror = mirror.expect("mirror over tcp");
    assert_eq!(
        console.store().get::<Position>(mirror),
        Some(&Position::new(1.0, 2.0, 3.0))
    );
    assert_eq!(console.replicator().peer_state(token), Some(PeerState::Synced));
}
