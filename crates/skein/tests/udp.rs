use std::net::Ipv4Addr;
use std::thread;
use std::time::{Duration, Instant};

use skein::net::{
    ClientState, ClientTransport, Host, HostConfig, HostError, LossSimulation, NetworkAddress,
    NetworkEvent, PeerId, SendType, ServerTransport, TransportConfig, initialize_system,
};
use skein::{ByteBuffer, RelayMessage};

const FRAME_TIME: f64 = 0.001;

struct Harness {
    server: ServerTransport,
    client: ClientTransport,
    server_events: Vec<NetworkEvent>,
    client_events: Vec<NetworkEvent>,
    timeout: Duration,
}

impl Harness {
    fn new(max_peers: usize) -> Self {
        Self::with_configs(max_peers, TransportConfig::default(), TransportConfig::default())
    }

    fn with_configs(max_peers: usize, server: TransportConfig, client: TransportConfig) -> Self {
        initialize_system();
        let server = ServerTransport::bind(max_peers, 0, server).unwrap();
        assert!(server.has_connection());
        let client = ClientTransport::new(client).unwrap();

        Self {
            server,
            client,
            server_events: Vec::new(),
            client_events: Vec::new(),
            timeout: Duration::from_secs(3),
        }
    }

    fn connect(&mut self) {
        let port = self.server.listen_port();
        self.client.connect("127.0.0.1", port).unwrap();
        assert_eq!(self.client.state(), ClientState::Connecting);
    }

    fn tick(&mut self) {
        self.server.update(FRAME_TIME);
        self.client.update(FRAME_TIME);
        while let Some(event) = self.server.get_network_event() {
            self.server_events.push(event);
        }
        while let Some(event) = self.client.get_network_event() {
            self.client_events.push(event);
        }
    }

    fn run_until(&mut self, done: impl Fn(&Harness) -> bool) -> bool {
        let start = Instant::now();
        while start.elapsed() < self.timeout {
            self.tick();
            if done(self) {
                return true;
            }
            thread::sleep(Duration::from_millis(1));
        }
        false
    }

    fn establish(&mut self) -> PeerId {
        self.connect();
        assert!(self.run_until(|h| {
            h.client.is_connected() && h.server_events.iter().any(NetworkEvent::is_connect)
        }));

        let connect = self.server_events.remove(0);
        assert!(connect.is_connect());
        self.client_events.clear();
        connect.peer.unwrap()
    }

    fn server_packets(&self) -> Vec<&NetworkEvent> {
        self.server_events.iter().filter(|e| e.is_packet()).collect()
    }

    fn client_packets(&self) -> Vec<&NetworkEvent> {
        self.client_events.iter().filter(|e| e.is_packet()).collect()
    }
}

fn counter(value: u32) -> ByteBuffer {
    let mut buffer = ByteBuffer::new();
    buffer.write::<u32>(value);
    buffer
}

#[test]
fn test_handshake() {
    let mut harness = Harness::new(4);
    let peer = harness.establish();

    assert_eq!(harness.server.peer_count(), 1);
    assert!(harness.server.peer(peer).unwrap().handle().is_some());
    assert!(harness.client.peer().handle().is_some());
}

#[test]
fn test_reliable_packets_arrive_in_order() {
    let mut harness = Harness::new(4);
    let peer = harness.establish();

    for i in 0..50 {
        harness
            .client
            .send_packet(&counter(i), SendType::Reliable, 0);
    }
    assert!(harness.run_until(|h| h.server_packets().len() == 50));

    let values: Vec<u32> = harness
        .server_packets()
        .into_iter()
        .map(|e| {
            assert_eq!(e.peer, Some(peer));
            let mut buffer = e.buffer().unwrap().clone();
            buffer.read::<u32>()
        })
        .collect();
    assert_eq!(values, (0..50).collect::<Vec<_>>());

    harness
        .server
        .send_packet(&counter(99), peer, SendType::Reliable, 1);
    assert!(harness.run_until(|h| !h.client_packets().is_empty()));
    let mut reply = harness.client_events.pop().unwrap().into_buffer().unwrap();
    assert_eq!(reply.read::<u32>(), 99);
}

#[test]
fn test_reliable_delivery_over_lossy_link() {
    let lossy = TransportConfig {
        host: HostConfig {
            simulation: LossSimulation {
                enabled: true,
                loss_percent: 20.0,
                duplicate_percent: 10.0,
                min_latency_ms: 0,
                max_latency_ms: 20,
            },
            ..Default::default()
        },
        ..Default::default()
    };
    let mut harness = Harness::with_configs(4, lossy.clone(), lossy);
    harness.timeout = Duration::from_secs(20);
    harness.establish();

    for i in 0..100 {
        harness
            .client
            .send_packet(&counter(i), SendType::Reliable, 0);
    }
    assert!(harness.run_until(|h| h.server_packets().len() >= 100));

    // Late duplicates must not surface as packets.
    let settle = Instant::now();
    while settle.elapsed() < Duration::from_millis(200) {
        harness.tick();
        thread::sleep(Duration::from_millis(1));
    }

    let values: Vec<u32> = harness
        .server_packets()
        .into_iter()
        .map(|e| e.buffer().unwrap().clone().read::<u32>())
        .collect();
    assert_eq!(values, (0..100).collect::<Vec<_>>());

    let dropped = harness.client.transport().host().unwrap().simulator().dropped()
        + harness.server.transport().host().unwrap().simulator().dropped();
    assert!(dropped > 0);
    assert!(harness.client.packets_lost() > 0);
}

#[test]
fn test_client_adopts_server_channel_count() {
    let narrow = TransportConfig {
        channel_count: 1,
        ..Default::default()
    };
    let mut harness = Harness::with_configs(4, narrow, TransportConfig::default());
    harness.establish();

    let handle = harness.client.peer().handle().unwrap();
    let host = harness.client.host_mut().unwrap();
    assert!(matches!(
        host.send(handle, 1, &[1], SendType::Reliable),
        Err(HostError::InvalidChannel {
            channel: 1,
            count: 1
        })
    ));

    harness
        .client
        .send_packet(&counter(3), SendType::Reliable, 0);
    assert!(harness.run_until(|h| h.server_packets().len() == 1));
}

#[test]
fn test_unsequenced_packets_arrive() {
    let mut harness = Harness::new(4);
    harness.establish();

    harness
        .client
        .send_packet(&counter(5), SendType::Unsequenced, 1);
    assert!(harness.run_until(|h| h.server_packets().len() == 1));
}

#[test]
fn test_graceful_disconnect() {
    let mut harness = Harness::new(4);
    let peer = harness.establish();

    harness.client.disconnect(false, 42);
    assert_eq!(harness.client.state(), ClientState::Disconnecting);

    assert!(harness.run_until(|h| {
        h.client.is_disconnected() && h.server_events.iter().any(NetworkEvent::is_disconnect)
    }));

    let event = harness
        .server_events
        .iter()
        .find(|e| e.is_disconnect())
        .unwrap();
    assert_eq!(event.data, 42);
    assert_eq!(event.peer, Some(peer));

    let client_event = harness.client_events.last().unwrap();
    assert!(client_event.is_disconnect());
    assert_eq!(client_event.data, 42);

    // Kept for its statistics until the application deletes it.
    assert!(harness.server.peer(peer).unwrap().handle().is_none());
    assert!(harness.server.delete_peer(peer).is_some());
}

#[test]
fn test_server_disconnects_client() {
    let mut harness = Harness::new(4);
    let peer = harness.establish();

    harness.server.disconnect_peer(peer, 3);
    assert!(harness.run_until(|h| h.client.is_disconnected()));

    let event = harness.client_events.last().unwrap();
    assert!(event.is_disconnect());
    assert_eq!(event.data, 3);
}

#[test]
fn test_full_server_refuses() {
    let mut harness = Harness::new(0);
    harness.connect();

    assert!(harness.run_until(|h| h.client.is_disconnected()));
    assert!(harness.client_events.last().unwrap().is_disconnect());
    assert!(harness.server_events.is_empty());
    assert_eq!(harness.server.peer_count(), 0);
    assert!(harness.client.can_connect());
}

#[test]
fn test_reconnect_after_disconnect() {
    let mut harness = Harness::new(4);
    let first = harness.establish();

    harness.client.disconnect(false, 0);
    assert!(harness.run_until(|h| h.client.is_disconnected()));
    harness.server_events.clear();

    let second = harness.establish();
    assert_ne!(first, second);
}

#[test]
fn test_traffic_is_counted() {
    let mut harness = Harness::new(4);
    harness.establish();

    harness.client.update(1.0);
    harness.server.update(1.0);
    assert!(harness.client.transport().sent_speed() > 0.0);
    assert!(harness.client.transport().receive_speed() > 0.0);
    assert!(harness.server.transport().sent_speed() > 0.0);
    assert!(harness.server.transport().receive_speed() > 0.0);
}

#[test]
fn test_client_reports_stats() {
    let mut harness = Harness::new(4);
    harness.establish();

    for i in 0..3 {
        harness
            .client
            .send_packet(&counter(i), SendType::Reliable, 0);
    }
    assert!(harness.run_until(|h| h.server_packets().len() == 3));
    assert_eq!(harness.client.packets_sent(), 3);
    assert!(harness.client.rtt() > 0);
}

#[test]
fn test_discovery_over_ping_sockets() {
    let mut harness = Harness::new(4);
    harness.server.create_ping_socket(0).unwrap();
    let ping_port = harness.server.transport().ping_addr().unwrap().port();

    let target = NetworkAddress::new(u32::from(Ipv4Addr::LOCALHOST), ping_port);
    harness
        .client
        .transport()
        .send_ping_packet(&RelayMessage::Discover.encode(), target);

    let start = Instant::now();
    let (mut request, from) = loop {
        if let Some(ping) = harness.server.transport_mut().check_pings() {
            break ping;
        }
        assert!(start.elapsed() < Duration::from_secs(3), "no ping arrived");
        thread::sleep(Duration::from_millis(1));
    };
    assert_eq!(RelayMessage::decode(&mut request), Ok(RelayMessage::Discover));

    let announce = RelayMessage::Announce {
        port: harness.server.listen_port(),
        players: 0,
        name: "test".to_string(),
    };
    harness
        .server
        .transport()
        .send_ping_packet(&announce.encode(), from);

    let start = Instant::now();
    let mut reply = loop {
        if let Some((buffer, _)) = harness.client.transport_mut().check_pings() {
            break buffer;
        }
        assert!(start.elapsed() < Duration::from_secs(3), "no reply arrived");
        thread::sleep(Duration::from_millis(1));
    };
    assert_eq!(RelayMessage::decode(&mut reply), Ok(announce));
}
