//! End-to-end tests for Server and Client over loopback
//!
//! Handlers forward every callback into a channel; tests await the events
//! with a timeout.

use simple_networking::io::{
    Client, ClientHandler, ClientId, ClientInfo, ClientOptions, FailedOperation, Protocol, Server,
    ServerHandler, ServerOptions,
};
use simple_networking::protocol::Packet;
use simple_networking::NetError;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::net::{TcpStream, UdpSocket};
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tokio_test::assert_ok;

const WAIT: Duration = Duration::from_secs(5);
const QUIET: Duration = Duration::from_millis(300);
const TICK: Duration = Duration::from_millis(5);

#[derive(Debug, Clone, PartialEq)]
enum ServerEvent {
    Connected(ClientId),
    Disconnected(ClientId, Protocol),
    Data(ClientId, Vec<u8>),
    Unidentified(SocketAddr, Vec<u8>),
    Failed(Option<ClientId>, FailedOperation),
    Full,
}

struct ServerRecorder {
    events: UnboundedSender<ServerEvent>,
    admit: Arc<AtomicBool>,
    echo_tcp: bool,
}

impl ServerHandler for ServerRecorder {
    fn on_data(&mut self, server: &Server, id: ClientId, packet: Packet) {
        if self.echo_tcp {
            let _ = server.send_tcp(id, packet.clone());
        }
        let _ = self.events.send(ServerEvent::Data(id, packet.as_slice().to_vec()));
    }

    fn on_unidentified_udp_data(&mut self, _server: &Server, from: SocketAddr, packet: Packet) {
        let _ = self
            .events
            .send(ServerEvent::Unidentified(from, packet.as_slice().to_vec()));
    }

    fn accept_client(&mut self, _server: &Server, _info: &ClientInfo) -> bool {
        self.admit.load(Ordering::SeqCst)
    }

    fn on_client_connected(&mut self, _server: &Server, info: &ClientInfo) {
        let _ = self.events.send(ServerEvent::Connected(info.id));
    }

    fn on_client_disconnected(&mut self, _server: &Server, info: &ClientInfo, protocol: Protocol) {
        let _ = self.events.send(ServerEvent::Disconnected(info.id, protocol));
    }

    fn on_network_operation_failed(
        &mut self,
        _server: &Server,
        info: Option<&ClientInfo>,
        operation: FailedOperation,
        _error: &NetError,
    ) {
        let _ = self
            .events
            .send(ServerEvent::Failed(info.map(|i| i.id), operation));
    }

    fn on_server_full(&mut self, _server: &Server) {
        let _ = self.events.send(ServerEvent::Full);
    }
}

#[derive(Debug, Clone, PartialEq)]
enum ClientEvent {
    Connected(Protocol),
    Disconnected(Protocol),
    Data(Vec<u8>),
    Failed(FailedOperation),
}

struct ClientRecorder(UnboundedSender<ClientEvent>);

impl ClientHandler for ClientRecorder {
    fn on_data(&mut self, _client: &Client, packet: Packet) {
        let _ = self.0.send(ClientEvent::Data(packet.as_slice().to_vec()));
    }

    fn on_connected(&mut self, _client: &Client, protocol: Protocol) {
        let _ = self.0.send(ClientEvent::Connected(protocol));
    }

    fn on_disconnected(&mut self, _client: &Client, protocol: Protocol) {
        let _ = self.0.send(ClientEvent::Disconnected(protocol));
    }

    fn on_network_operation_failed(
        &mut self,
        _client: &Client,
        operation: FailedOperation,
        _error: &NetError,
    ) {
        let _ = self.0.send(ClientEvent::Failed(operation));
    }
}

struct TestServer {
    server: Server,
    events: UnboundedReceiver<ServerEvent>,
    admit: Arc<AtomicBool>,
}

fn localhost() -> IpAddr {
    IpAddr::V4(Ipv4Addr::LOCALHOST)
}

async fn start_server(options: ServerOptions, echo_tcp: bool) -> TestServer {
    let (tx, events) = mpsc::unbounded_channel();
    let admit = Arc::new(AtomicBool::new(true));
    let handler = ServerRecorder {
        events: tx,
        admit: admit.clone(),
        echo_tcp,
    };
    let options = options.with_address(localhost()).with_refresh_interval(TICK);
    let server = Server::new(options, handler).unwrap();
    server.listen().await.unwrap();
    TestServer {
        server,
        events,
        admit,
    }
}

fn client_for(server: &Server, protocol: Protocol) -> (Client, UnboundedReceiver<ClientEvent>) {
    let port = server
        .local_tcp_addr()
        .or_else(|| server.local_udp_addr())
        .unwrap()
        .port();
    let options = ClientOptions::new(localhost(), port)
        .with_protocol(protocol)
        .with_refresh_interval(TICK);
    let (tx, rx) = mpsc::unbounded_channel();
    (Client::new(options, ClientRecorder(tx)).unwrap(), rx)
}

async fn next<T>(rx: &mut UnboundedReceiver<T>) -> T {
    tokio::time::timeout(WAIT, rx.recv())
        .await
        .expect("timed out waiting for event")
        .expect("event channel closed")
}

async fn assert_quiet<T: std::fmt::Debug>(rx: &mut UnboundedReceiver<T>) {
    if let Ok(Some(event)) = tokio::time::timeout(QUIET, rx.recv()).await {
        panic!("unexpected event: {event:?}");
    }
}

fn text_packet(text: &str) -> Packet {
    let mut packet = Packet::new();
    packet.write(text);
    packet
}

fn read_text(bytes: Vec<u8>) -> String {
    Packet::from(bytes).read::<String>().unwrap()
}

#[tokio::test]
async fn test_tcp_round_trip() {
    let mut ts = start_server(ServerOptions::new(0).with_protocol(Protocol::Tcp), true).await;
    let (client, mut client_events) = client_for(&ts.server, Protocol::Tcp);

    assert_ok!(client.connect().await);
    assert_eq!(next(&mut client_events).await, ClientEvent::Connected(Protocol::Tcp));
    assert_eq!(next(&mut ts.events).await, ServerEvent::Connected(1));

    client.send_tcp(text_packet("hello")).unwrap();

    let ServerEvent::Data(id, payload) = next(&mut ts.events).await else {
        panic!("expected data");
    };
    assert_eq!(id, 1);
    assert_eq!(read_text(payload), "hello");

    let ClientEvent::Data(echo) = next(&mut client_events).await else {
        panic!("expected echo");
    };
    assert_eq!(read_text(echo), "hello");

    client.close();
    ts.server.stop();
}

#[tokio::test]
async fn test_many_frames_arrive_in_order() {
    let mut ts = start_server(ServerOptions::new(0).with_protocol(Protocol::Tcp), false).await;
    let (client, _client_events) = client_for(&ts.server, Protocol::Tcp);

    client.connect().await.unwrap();
    assert_eq!(next(&mut ts.events).await, ServerEvent::Connected(1));

    for i in 0..200u32 {
        let mut packet = Packet::new();
        packet.write(i).write(vec![0xAB; 300]);
        client.send_tcp(packet).unwrap();
    }

    for expected in 0..200u32 {
        let ServerEvent::Data(_, payload) = next(&mut ts.events).await else {
            panic!("expected data");
        };
        let mut packet = Packet::from(payload);
        assert_eq!(packet.read::<u32>().unwrap(), expected);
        assert_eq!(packet.unread_length(), 300);
    }

    client.close();
    ts.server.stop();
}

#[tokio::test]
async fn test_udp_round_trip_with_identity() {
    let mut ts = start_server(ServerOptions::new(0), false).await;
    let (client, mut client_events) = client_for(&ts.server, Protocol::Both);

    client.connect().await.unwrap();
    assert_eq!(next(&mut client_events).await, ClientEvent::Connected(Protocol::Tcp));
    assert_eq!(next(&mut client_events).await, ClientEvent::Connected(Protocol::Udp));
    let ServerEvent::Connected(id) = next(&mut ts.events).await else {
        panic!("expected connection");
    };
    client.set_id(id);

    client.send_udp(text_packet("ping"), true).unwrap();
    let ServerEvent::Data(from, payload) = next(&mut ts.events).await else {
        panic!("expected datagram");
    };
    assert_eq!(from, id);
    assert_eq!(read_text(payload), "ping");

    let info = ts.server.get_client_info(id).unwrap();
    assert!(info.has_active_udp_connection);
    assert_eq!(
        info.udp_endpoint.map(|e| e.port()),
        client.local_udp_addr().map(|e| e.port())
    );

    ts.server.send_udp(id, text_packet("pong")).unwrap();
    let ClientEvent::Data(reply) = next(&mut client_events).await else {
        panic!("expected datagram reply");
    };
    assert_eq!(read_text(reply), "pong");

    client.close();
    ts.server.stop();
}

#[tokio::test]
async fn test_datagram_from_other_endpoint_is_rejected() {
    let mut ts = start_server(ServerOptions::new(0), false).await;
    let (client, _client_events) = client_for(&ts.server, Protocol::Tcp);
    client.connect().await.unwrap();
    let ServerEvent::Connected(id) = next(&mut ts.events).await else {
        panic!("expected connection");
    };

    let server_udp = ts.server.local_udp_addr().unwrap();
    let datagram = |text: &str| {
        let mut packet = text_packet(text);
        packet.write_length().unwrap();
        packet.insert_front(id);
        packet.into_bytes()
    };

    let e1 = UdpSocket::bind("127.0.0.1:0").await.unwrap();
    let e2 = UdpSocket::bind("127.0.0.1:0").await.unwrap();

    e1.send_to(&datagram("first"), server_udp).await.unwrap();
    let ServerEvent::Data(_, payload) = next(&mut ts.events).await else {
        panic!("expected datagram from bound endpoint");
    };
    assert_eq!(read_text(payload), "first");

    e2.send_to(&datagram("spoofed"), server_udp).await.unwrap();
    assert_quiet(&mut ts.events).await;

    e1.send_to(&datagram("second"), server_udp).await.unwrap();
    let ServerEvent::Data(_, payload) = next(&mut ts.events).await else {
        panic!("expected datagram from bound endpoint");
    };
    assert_eq!(read_text(payload), "second");
    assert_eq!(
        ts.server.get_client_info(id).unwrap().udp_endpoint,
        Some(e1.local_addr().unwrap())
    );

    client.close();
    ts.server.stop();
}

#[tokio::test]
async fn test_datagrams_for_unknown_or_runt_are_dropped() {
    let mut ts = start_server(ServerOptions::new(0), false).await;
    let server_udp = ts.server.local_udp_addr().unwrap();
    let socket = UdpSocket::bind("127.0.0.1:0").await.unwrap();

    socket.send_to(&[1, 2], server_udp).await.unwrap();
    socket
        .send_to(&[9, 0, 0, 0, 1, 0, 0, 0, 7], server_udp)
        .await
        .unwrap();
    assert_quiet(&mut ts.events).await;

    ts.server.stop();
}

#[tokio::test]
async fn test_server_full() {
    let mut ts = start_server(
        ServerOptions::new(0)
            .with_protocol(Protocol::Tcp)
            .with_max_clients(1),
        false,
    )
    .await;

    let (first, _first_events) = client_for(&ts.server, Protocol::Tcp);
    first.connect().await.unwrap();
    assert_eq!(next(&mut ts.events).await, ServerEvent::Connected(1));

    let (second, mut second_events) = client_for(&ts.server, Protocol::Tcp);
    second.connect().await.unwrap();
    assert_eq!(next(&mut ts.events).await, ServerEvent::Full);

    assert_eq!(next(&mut second_events).await, ClientEvent::Connected(Protocol::Tcp));
    assert_eq!(
        next(&mut second_events).await,
        ClientEvent::Disconnected(Protocol::Both)
    );
    assert_eq!(ts.server.client_count(), 1);

    first.close();
    second.close();
    ts.server.stop();
}

#[tokio::test]
async fn test_admission_refusal_releases_identity() {
    let mut ts = start_server(
        ServerOptions::new(0)
            .with_protocol(Protocol::Tcp)
            .with_max_clients(1),
        false,
    )
    .await;
    ts.admit.store(false, Ordering::SeqCst);

    let (refused, mut refused_events) = client_for(&ts.server, Protocol::Tcp);
    refused.connect().await.unwrap();
    assert_eq!(next(&mut refused_events).await, ClientEvent::Connected(Protocol::Tcp));
    assert_eq!(
        next(&mut refused_events).await,
        ClientEvent::Disconnected(Protocol::Both)
    );
    assert_eq!(ts.server.client_count(), 0);

    ts.admit.store(true, Ordering::SeqCst);
    let (accepted, _accepted_events) = client_for(&ts.server, Protocol::Tcp);
    accepted.connect().await.unwrap();
    assert_eq!(next(&mut ts.events).await, ServerEvent::Connected(1));

    refused.close();
    accepted.close();
    ts.server.stop();
}

#[tokio::test]
async fn test_broadcast_skips_excluded_client() {
    let mut ts = start_server(ServerOptions::new(0).with_protocol(Protocol::Tcp), false).await;

    let (a, mut a_events) = client_for(&ts.server, Protocol::Tcp);
    a.connect().await.unwrap();
    assert_eq!(next(&mut a_events).await, ClientEvent::Connected(Protocol::Tcp));
    let ServerEvent::Connected(a_id) = next(&mut ts.events).await else {
        panic!("expected connection");
    };

    let (b, mut b_events) = client_for(&ts.server, Protocol::Tcp);
    b.connect().await.unwrap();
    assert_eq!(next(&mut b_events).await, ClientEvent::Connected(Protocol::Tcp));
    let ServerEvent::Connected(b_id) = next(&mut ts.events).await else {
        panic!("expected connection");
    };
    assert_ne!(a_id, b_id);
    assert_eq!(ts.server.client_ids(), vec![1, 2]);

    ts.server
        .send_tcp_to_all(text_packet("news"), Some(a_id))
        .unwrap();
    let ClientEvent::Data(payload) = next(&mut b_events).await else {
        panic!("expected broadcast");
    };
    assert_eq!(read_text(payload), "news");
    assert_quiet(&mut a_events).await;

    ts.server.send_tcp_to_all(text_packet("all"), None).unwrap();
    assert!(matches!(next(&mut a_events).await, ClientEvent::Data(_)));
    assert!(matches!(next(&mut b_events).await, ClientEvent::Data(_)));

    a.close();
    b.close();
    ts.server.stop();
}

#[tokio::test]
async fn test_server_disconnect_is_idempotent() {
    let mut ts = start_server(ServerOptions::new(0).with_protocol(Protocol::Tcp), false).await;
    let (client, mut client_events) = client_for(&ts.server, Protocol::Tcp);
    client.connect().await.unwrap();
    assert_eq!(next(&mut client_events).await, ClientEvent::Connected(Protocol::Tcp));
    assert_eq!(next(&mut ts.events).await, ServerEvent::Connected(1));

    assert!(ts.server.disconnect_client(1, Protocol::Both));
    assert!(!ts.server.disconnect_client(1, Protocol::Both));

    assert_eq!(
        next(&mut ts.events).await,
        ServerEvent::Disconnected(1, Protocol::Both)
    );
    assert_quiet(&mut ts.events).await;
    assert_eq!(ts.server.client_count(), 0);

    assert_eq!(
        next(&mut client_events).await,
        ClientEvent::Disconnected(Protocol::Both)
    );
    assert!(!client.is_connected());

    client.close();
    ts.server.stop();
}

#[tokio::test]
async fn test_client_disconnect_notifies_once() {
    let mut ts = start_server(ServerOptions::new(0), false).await;
    let (client, mut client_events) = client_for(&ts.server, Protocol::Both);
    client.connect().await.unwrap();
    assert_eq!(next(&mut client_events).await, ClientEvent::Connected(Protocol::Tcp));
    assert_eq!(next(&mut client_events).await, ClientEvent::Connected(Protocol::Udp));
    assert_eq!(next(&mut ts.events).await, ServerEvent::Connected(1));

    assert!(client.disconnect());
    assert!(!client.disconnect());
    assert_eq!(
        next(&mut client_events).await,
        ClientEvent::Disconnected(Protocol::Both)
    );
    assert_quiet(&mut client_events).await;

    assert_eq!(
        next(&mut ts.events).await,
        ServerEvent::Disconnected(1, Protocol::Both)
    );

    client.close();
    ts.server.stop();
}

#[tokio::test]
async fn test_udp_only_disconnect_keeps_session() {
    let mut ts = start_server(ServerOptions::new(0), false).await;
    let (client, _client_events) = client_for(&ts.server, Protocol::Both);
    client.connect().await.unwrap();
    let ServerEvent::Connected(id) = next(&mut ts.events).await else {
        panic!("expected connection");
    };
    client.set_id(id);

    client.send_udp(text_packet("bind"), true).unwrap();
    assert!(matches!(next(&mut ts.events).await, ServerEvent::Data(..)));

    assert!(ts.server.disconnect_client(id, Protocol::Udp));
    assert_eq!(
        next(&mut ts.events).await,
        ServerEvent::Disconnected(id, Protocol::Udp)
    );
    let info = ts.server.get_client_info(id).unwrap();
    assert!(info.has_active_tcp_connection);
    assert!(!info.has_active_udp_connection);
    assert!(matches!(
        ts.server.send_udp(id, Packet::new()),
        Err(NetError::NotConnected)
    ));

    client.close();
    ts.server.stop();
}

#[tokio::test]
async fn test_invalid_frame_length_drops_connection() {
    let mut ts = start_server(ServerOptions::new(0).with_protocol(Protocol::Tcp), false).await;
    let addr = ts.server.local_tcp_addr().unwrap();

    let mut raw = TcpStream::connect(addr).await.unwrap();
    assert_eq!(next(&mut ts.events).await, ServerEvent::Connected(1));

    raw.write_all(&(-5i32).to_le_bytes()).await.unwrap();
    assert_eq!(
        next(&mut ts.events).await,
        ServerEvent::Failed(Some(1), FailedOperation::ReceiveDataTcp)
    );
    assert_eq!(
        next(&mut ts.events).await,
        ServerEvent::Disconnected(1, Protocol::Both)
    );
    assert_eq!(ts.server.client_count(), 0);

    ts.server.stop();
}

#[tokio::test]
async fn test_read_timeout_without_disconnect_keeps_session() {
    let mut ts = start_server(
        ServerOptions::new(0)
            .with_protocol(Protocol::Tcp)
            .with_disconnect_client_on_error(false)
            .with_receive_timeout(Duration::from_millis(100)),
        false,
    )
    .await;
    let addr = ts.server.local_tcp_addr().unwrap();

    let mut raw = TcpStream::connect(addr).await.unwrap();
    assert_eq!(next(&mut ts.events).await, ServerEvent::Connected(1));

    // Idle peer: the read times out and is reported, the session stays
    assert_eq!(
        next(&mut ts.events).await,
        ServerEvent::Failed(Some(1), FailedOperation::ReceiveDataTcp)
    );
    assert_eq!(ts.server.client_count(), 1);
    assert!(ts.server.get_client_info(1).unwrap().has_active_tcp_connection);

    raw.write_all(&[2, 0, 0, 0, b'o', b'k']).await.unwrap();
    loop {
        match next(&mut ts.events).await {
            ServerEvent::Failed(Some(1), FailedOperation::ReceiveDataTcp) => continue,
            event => {
                assert_eq!(event, ServerEvent::Data(1, b"ok".to_vec()));
                break;
            }
        }
    }
    assert_eq!(ts.server.client_count(), 1);

    ts.server.stop();
}

#[tokio::test]
async fn test_client_read_timeout_without_disconnect_keeps_connection() {
    let mut ts = start_server(
        ServerOptions::new(0)
            .with_protocol(Protocol::Tcp)
            .with_send_timeout(Duration::from_secs(1)),
        false,
    )
    .await;
    let port = ts.server.local_tcp_addr().unwrap().port();

    let options = ClientOptions::new(localhost(), port)
        .with_protocol(Protocol::Tcp)
        .with_refresh_interval(TICK)
        .with_disconnect_on_error(false)
        .with_receive_timeout(Duration::from_millis(100))
        .with_send_timeout(Duration::from_secs(1));
    let (tx, mut client_events) = mpsc::unbounded_channel();
    let client = Client::new(options, ClientRecorder(tx)).unwrap();

    client.connect().await.unwrap();
    assert_eq!(next(&mut client_events).await, ClientEvent::Connected(Protocol::Tcp));
    assert_eq!(next(&mut ts.events).await, ServerEvent::Connected(1));

    assert_eq!(
        next(&mut client_events).await,
        ClientEvent::Failed(FailedOperation::ReceiveDataTcp)
    );
    assert!(client.is_tcp_connected());

    ts.server.send_tcp(1, text_packet("still here")).unwrap();
    loop {
        match next(&mut client_events).await {
            ClientEvent::Failed(FailedOperation::ReceiveDataTcp) => continue,
            ClientEvent::Data(payload) => {
                assert_eq!(read_text(payload), "still here");
                break;
            }
            event => panic!("unexpected event: {event:?}"),
        }
    }
    assert!(client.is_tcp_connected());

    client.close();
    ts.server.stop();
}

#[tokio::test]
async fn test_identity_only_datagram_binds_without_data() {
    let mut ts = start_server(ServerOptions::new(0), false).await;
    let (client, _client_events) = client_for(&ts.server, Protocol::Tcp);
    client.connect().await.unwrap();
    let ServerEvent::Connected(id) = next(&mut ts.events).await else {
        panic!("expected connection");
    };

    let server_udp = ts.server.local_udp_addr().unwrap();
    let e1 = UdpSocket::bind("127.0.0.1:0").await.unwrap();
    e1.send_to(&id.to_le_bytes(), server_udp).await.unwrap();
    assert_quiet(&mut ts.events).await;

    let info = ts.server.get_client_info(id).unwrap();
    assert_eq!(info.udp_endpoint, Some(e1.local_addr().unwrap()));
    assert!(info.has_active_udp_connection);

    client.close();
    ts.server.stop();
}

#[tokio::test]
async fn test_datagram_from_other_ip_never_binds() {
    let mut ts = start_server(ServerOptions::new(0), false).await;
    let (client, _client_events) = client_for(&ts.server, Protocol::Tcp);
    client.connect().await.unwrap();
    let ServerEvent::Connected(id) = next(&mut ts.events).await else {
        panic!("expected connection");
    };

    let server_udp = ts.server.local_udp_addr().unwrap();
    let datagram = {
        let mut packet = text_packet("claimed");
        packet.write_length().unwrap();
        packet.insert_front(id);
        packet.into_bytes()
    };

    // The stream peer is 127.0.0.1; 127.0.0.2 is another loopback address
    let stranger = UdpSocket::bind("127.0.0.2:0").await.unwrap();
    stranger.send_to(&datagram, server_udp).await.unwrap();
    assert_quiet(&mut ts.events).await;
    assert_eq!(ts.server.get_client_info(id).unwrap().udp_endpoint, None);

    let owner = UdpSocket::bind("127.0.0.1:0").await.unwrap();
    owner.send_to(&datagram, server_udp).await.unwrap();
    let ServerEvent::Data(from, payload) = next(&mut ts.events).await else {
        panic!("expected datagram from the client's address");
    };
    assert_eq!(from, id);
    assert_eq!(read_text(payload), "claimed");
    assert_eq!(
        ts.server.get_client_info(id).unwrap().udp_endpoint,
        Some(owner.local_addr().unwrap())
    );

    client.close();
    ts.server.stop();
}

#[tokio::test]
async fn test_unidentified_datagrams() {
    let mut ts = start_server(
        ServerOptions::new(0)
            .with_protocol(Protocol::Udp)
            .with_require_client_id_in_udp_data(false),
        false,
    )
    .await;
    assert!(ts.server.local_tcp_addr().is_none());
    let server_udp = ts.server.local_udp_addr().unwrap();

    let socket = UdpSocket::bind("127.0.0.1:0").await.unwrap();
    socket.send_to(&[1, 2, 3], server_udp).await.unwrap();

    let ServerEvent::Unidentified(from, data) = next(&mut ts.events).await else {
        panic!("expected unidentified datagram");
    };
    assert_eq!(from, socket.local_addr().unwrap());
    assert_eq!(data, vec![1, 2, 3]);

    let mut reply = Packet::new();
    reply.write(42u8);
    ts.server.send_udp_to(from, reply).unwrap();

    let mut buf = [0u8; 16];
    let n = tokio::time::timeout(WAIT, socket.recv(&mut buf))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(&buf[..n], &[1, 0, 0, 0, 42]);

    assert!(matches!(
        ts.server.send_tcp(1, Packet::new()),
        Err(NetError::InvalidProtocol(_))
    ));

    ts.server.stop();
}

#[tokio::test]
async fn test_client_data_attachment() {
    let mut ts = start_server(ServerOptions::new(0).with_protocol(Protocol::Tcp), false).await;
    let (client, _client_events) = client_for(&ts.server, Protocol::Tcp);
    client.connect().await.unwrap();
    assert_eq!(next(&mut ts.events).await, ServerEvent::Connected(1));

    assert!(ts.server.set_client_data(1, String::from("alice")));
    let info = ts.server.get_client_info(1).unwrap();
    assert_eq!(info.data::<String>().map(String::as_str), Some("alice"));
    assert_eq!(info.id, 1);

    client.close();
    ts.server.stop();
}

#[tokio::test]
async fn test_stop_suppresses_notifications() {
    let mut ts = start_server(ServerOptions::new(0).with_protocol(Protocol::Tcp), false).await;
    let (client, mut client_events) = client_for(&ts.server, Protocol::Tcp);
    client.connect().await.unwrap();
    assert_eq!(next(&mut client_events).await, ClientEvent::Connected(Protocol::Tcp));
    assert_eq!(next(&mut ts.events).await, ServerEvent::Connected(1));

    ts.server.stop();
    assert!(!ts.server.is_listening());
    assert_eq!(ts.server.client_count(), 0);

    // The handler is dropped with the dispatch thread, closing the channel
    let closed = tokio::time::timeout(WAIT, ts.events.recv()).await.unwrap();
    assert_eq!(closed, None);

    assert_eq!(
        next(&mut client_events).await,
        ClientEvent::Disconnected(Protocol::Both)
    );
    client.close();
}

#[test]
fn test_invalid_options_are_rejected() {
    let (tx, _rx) = mpsc::unbounded_channel();
    let err = Client::new(ClientOptions::new(localhost(), 0), ClientRecorder(tx)).unwrap_err();
    assert!(matches!(err, NetError::InvalidOptions(_)));

    let (tx, _rx) = mpsc::unbounded_channel();
    let handler = ServerRecorder {
        events: tx,
        admit: Arc::new(AtomicBool::new(true)),
        echo_tcp: false,
    };
    let err = Server::new(ServerOptions::new(0).with_protocol(Protocol::Udp), handler).unwrap_err();
    assert!(matches!(err, NetError::InvalidOptions(_)));
}
