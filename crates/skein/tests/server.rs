use skein::net::{
    ObjectHandle, PeerHandle, PeerId, PeerStats, ScriptedHost, SendType, ServerTransport,
    TransportConfig, initialize_system,
};
use skein::ByteBuffer;

fn server(max_peers: usize) -> ServerTransport<ScriptedHost> {
    initialize_system();
    ServerTransport::with_host(ScriptedHost::new(max_peers), TransportConfig::default()).unwrap()
}

/// Injects `count` connections and returns their ids in arrival order.
fn connect_peers(server: &mut ServerTransport<ScriptedHost>, count: usize) -> Vec<PeerId> {
    for _ in 0..count {
        server.host_mut().unwrap().inject_connect(0).unwrap();
    }
    server.update(0.05);

    std::iter::from_fn(|| server.get_network_event())
        .filter(|e| e.is_connect())
        .map(|e| e.peer.unwrap())
        .collect()
}

fn handle_of(server: &ServerTransport<ScriptedHost>, id: PeerId) -> PeerHandle {
    server.peer(id).and_then(|p| p.handle()).unwrap()
}

fn payload(byte: u8) -> ByteBuffer {
    let mut buffer = ByteBuffer::new();
    buffer.write::<u8>(byte);
    buffer
}

#[test]
fn test_connect_creates_peer() {
    let mut server = server(4);
    let ids = connect_peers(&mut server, 2);

    assert_eq!(ids.len(), 2);
    assert_ne!(ids[0], ids[1]);
    assert_eq!(server.peer_count(), 2);
    assert!(server.peers().all(|p| p.handle().is_some() && !p.has_object()));
}

#[test]
fn test_broadcast_skips_sender_and_unattached_peers() {
    let mut server = server(4);
    let ids = connect_peers(&mut server, 3);
    let (a, b, c) = (ids[0], ids[1], ids[2]);

    server.peer_mut(a).unwrap().object = Some(ObjectHandle(1));
    server.peer_mut(b).unwrap().object = Some(ObjectHandle(2));

    server.broadcast_packet(&payload(9), Some(a), SendType::Reliable, 0);

    let sent = server.host_mut().unwrap().take_sent();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].peer, handle_of(&server, b));
    assert_eq!(sent[0].packet, vec![9]);
    assert_ne!(sent[0].peer, handle_of(&server, c));

    server.broadcast_packet(&payload(1), None, SendType::Unsequenced, 1);
    let sent = server.host_mut().unwrap().take_sent();
    assert_eq!(sent.len(), 2);
    assert!(sent.iter().all(|s| s.channel == 1));
}

#[test]
fn test_full_server_rejects_connections() {
    let mut server = server(0);
    assert_eq!(server.max_peers(), 0);
    assert_eq!(server.host_mut().unwrap().inject_connect(0), None);

    server.update(0.05);
    assert!(server.get_network_event().is_none());
    assert_eq!(server.peer_count(), 0);
}

#[test]
fn test_packets_name_their_peer() {
    let mut server = server(4);
    let ids = connect_peers(&mut server, 2);
    let second = handle_of(&server, ids[1]);

    server
        .host_mut()
        .unwrap()
        .inject_packet(second, 1, vec![4, 0, 0, 0]);
    server.update(0.05);

    let event = server.get_network_event().unwrap();
    assert_eq!(event.peer, Some(ids[1]));
    let mut buffer = event.into_buffer().unwrap();
    assert_eq!(buffer.read::<u32>(), u32::from_ne_bytes([4, 0, 0, 0]));
}

#[test]
fn test_disconnected_peer_stays_until_deleted() {
    let mut server = server(4);
    let id = connect_peers(&mut server, 1)[0];
    let handle = handle_of(&server, id);

    let stats = PeerStats {
        round_trip_time: 30,
        packets_sent: 5,
        packets_lost: 1,
    };
    server.host_mut().unwrap().set_stats(handle, stats);
    server.update(0.05);
    assert_eq!(server.peer(id).unwrap().stats(), stats);

    server.host_mut().unwrap().inject_disconnect(handle, 7);
    server.update(0.05);

    let event = server.get_network_event().unwrap();
    assert!(event.is_disconnect());
    assert_eq!(event.data, 7);
    assert_eq!(event.peer, Some(id));

    let peer = server.peer(id).unwrap();
    assert_eq!(peer.handle(), None);
    assert_eq!(peer.stats(), stats);

    let deleted = server.delete_peer(id).unwrap();
    assert_eq!(deleted.id(), id);
    assert!(server.peer(id).is_none());
    assert!(server.delete_peer(id).is_none());
}

#[test]
fn test_stale_ids_resolve_to_nothing() {
    let mut server = server(4);
    let ids = connect_peers(&mut server, 2);
    let handle = handle_of(&server, ids[0]);

    // A packet still queued behind the lag when the peers are dropped.
    server.set_fake_lag(1.0);
    server.host_mut().unwrap().inject_packet(handle, 0, vec![1]);
    server.update(0.05);

    assert_eq!(server.clear_peers(), 2);
    assert_eq!(server.peer_count(), 0);

    server.update(1.0);
    let event = server.get_network_event().unwrap();
    assert_eq!(event.peer, Some(ids[0]));
    assert!(server.peer(ids[0]).is_none());

    server.send_packet(&payload(1), ids[0], SendType::Reliable, 0);
    server.disconnect_peer(ids[0], 0);
    let host = server.host_mut().unwrap();
    assert!(host.sent().is_empty());
    assert!(host.disconnect_requests().is_empty());
}

#[test]
fn test_ids_are_not_reused() {
    let mut server = server(4);
    let first = connect_peers(&mut server, 1)[0];
    server.delete_peer(first);

    let second = connect_peers(&mut server, 1)[0];
    assert_ne!(first, second);
}

#[test]
fn test_disconnect_requests() {
    let mut server = server(4);
    let ids = connect_peers(&mut server, 3);

    let second = handle_of(&server, ids[1]);
    server.disconnect_peer(ids[1], 11);
    assert_eq!(
        server.host_mut().unwrap().disconnect_requests(),
        &[(second, 11)]
    );

    server.disconnect_all(12);
    let requests = server.host_mut().unwrap().disconnect_requests().to_vec();
    assert_eq!(requests.len(), 4);
    assert!(requests[1..].iter().all(|&(_, data)| data == 12));
}

#[test]
fn test_send_to_peer() {
    let mut server = server(4);
    let ids = connect_peers(&mut server, 2);

    server.send_packet(&payload(3), ids[0], SendType::Unsequenced, 1);

    let sent = server.host_mut().unwrap().take_sent();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].peer, handle_of(&server, ids[0]));
    assert_eq!(sent[0].send_type, SendType::Unsequenced);
    assert_eq!(sent[0].channel, 1);
}
