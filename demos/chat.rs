//! Minimal chat relay over TCP with UDP presence pings
//!
//! Starts a server and two clients in one process. Each client learns its id
//! from a welcome packet, announces itself over UDP and sends one chat line
//! that the server relays to everyone else.
//!
//! ```bash
//! RUST_LOG=simple_networking=debug cargo run --example chat
//! ```

use simple_networking::io::{
    Client, ClientHandler, ClientId, ClientInfo, ClientOptions, Server, ServerHandler,
    ServerOptions,
};
use simple_networking::logging::init_logging;
use simple_networking::protocol::Packet;
use std::net::{IpAddr, Ipv4Addr};
use std::time::Duration;
use tracing::{info, Level};

const WELCOME: i16 = 1;
const CHAT: i16 = 2;
const PRESENCE: i16 = 3;

struct Relay;

impl ServerHandler for Relay {
    fn on_client_connected(&mut self, server: &Server, info: &ClientInfo) {
        let mut welcome = Packet::with_id(WELCOME);
        welcome.write(info.id);
        let _ = server.send_tcp(info.id, welcome);
    }

    fn on_data(&mut self, server: &Server, id: ClientId, mut packet: Packet) {
        match packet.read::<i16>() {
            Ok(CHAT) => {
                let Ok(line) = packet.read::<String>() else {
                    return;
                };
                info!(client_id = id, %line, "Relaying chat line");
                let mut relay = Packet::with_id(CHAT);
                relay.write(id).write(line);
                let _ = server.send_tcp_to_all(relay, Some(id));
            }
            Ok(PRESENCE) => info!(client_id = id, "Presence ping"),
            _ => {}
        }
    }

    fn on_client_disconnected(
        &mut self,
        _server: &Server,
        info: &ClientInfo,
        protocol: simple_networking::Protocol,
    ) {
        info!(client_id = info.id, %protocol, "Client left");
    }
}

struct Member {
    name: &'static str,
}

impl ClientHandler for Member {
    fn on_data(&mut self, client: &Client, mut packet: Packet) {
        match packet.read::<i16>() {
            Ok(WELCOME) => {
                if let Ok(id) = packet.read::<u32>() {
                    client.set_id(id);
                    let _ = client.send_udp(Packet::with_id(PRESENCE), true);

                    let mut line = Packet::with_id(CHAT);
                    line.write(format!("hello from {}", self.name));
                    let _ = client.send_tcp(line);
                }
            }
            Ok(CHAT) => {
                let from = packet.read::<u32>().unwrap_or_default();
                let line = packet.read::<String>().unwrap_or_default();
                info!(member = self.name, from, %line, "Chat received");
            }
            _ => {}
        }
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    init_logging(Level::INFO);

    let server = Server::new(
        ServerOptions::new(0).with_address(IpAddr::V4(Ipv4Addr::LOCALHOST)),
        Relay,
    )?;
    server.listen().await?;
    let port = server.local_tcp_addr().map(|addr| addr.port()).unwrap_or_default();

    let mut members = Vec::new();
    for name in ["alice", "bob"] {
        let options = ClientOptions::new(IpAddr::V4(Ipv4Addr::LOCALHOST), port);
        let client = Client::new(options, Member { name })?;
        client.connect().await?;
        members.push(client);
    }

    tokio::time::sleep(Duration::from_secs(1)).await;

    for member in &members {
        member.close();
    }
    server.stop();
    Ok(())
}
