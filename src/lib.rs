//! Client/server messaging over TCP and UDP
//!
//! This library connects one server with many clients over a reliable stream
//! transport (TCP) and an unreliable datagram transport (UDP), carrying
//! application-defined binary messages built with [`Packet`].
//!
//! # Features
//!
//! - **Length-prefixed framing** - Every message is `[i32 LE length][payload]`
//! - **Stream reassembly** - Frames split or coalesced by TCP are restored exactly
//! - **Fixed identities** - Each client receives a small positive id from a bounded pool
//! - **Datagram correlation** - UDP traffic is tied to a client's stream session and
//!   protected against endpoint impersonation
//! - **Single-threaded callbacks** - All handler methods run on one dispatch thread,
//!   in order, with `&mut self`
//!
//! # Quick Start
//!
//! **Server:**
//! ```no_run
//! use simple_networking::io::{ClientId, ClientInfo, Server, ServerHandler, ServerOptions};
//! use simple_networking::protocol::Packet;
//!
//! struct Chat;
//!
//! impl ServerHandler for Chat {
//!     fn on_client_connected(&mut self, server: &Server, info: &ClientInfo) {
//!         let mut welcome = Packet::with_id(1);
//!         welcome.write(info.id);
//!         let _ = server.send_tcp(info.id, welcome);
//!     }
//!
//!     fn on_data(&mut self, server: &Server, id: ClientId, packet: Packet) {
//!         let _ = server.send_tcp_to_all(packet, Some(id));
//!     }
//! }
//!
//! # #[tokio::main]
//! # async fn main() -> simple_networking::Result<()> {
//! let server = Server::new(ServerOptions::new(7777), Chat)?;
//! server.listen().await?;
//! # Ok(())
//! # }
//! ```
//!
//! **Client:**
//! ```no_run
//! use simple_networking::io::{Client, ClientHandler, ClientOptions};
//! use simple_networking::protocol::Packet;
//!
//! struct Player;
//!
//! impl ClientHandler for Player {
//!     fn on_data(&mut self, client: &Client, mut packet: Packet) {
//!         if packet.read::<i16>().ok() == Some(1) {
//!             if let Ok(id) = packet.read::<u32>() {
//!                 client.set_id(id);
//!             }
//!         }
//!     }
//! }
//!
//! # #[tokio::main]
//! # async fn main() -> simple_networking::Result<()> {
//! let client = Client::new(ClientOptions::new("127.0.0.1".parse().unwrap(), 7777), Player)?;
//! client.connect().await?;
//!
//! let mut position = Packet::new();
//! position.write(1.5f32).write(-3.0f32);
//! client.send_udp(position, true)?;
//! # Ok(())
//! # }
//! ```
//!
//! # Architecture
//!
//! ## Module Structure
//!
//! - **`protocol`** - Wire format
//!   - `Packet` - Byte buffer with typed little-endian reads and writes
//!   - `StreamReassembler` - Frame extraction from a TCP byte stream
//!
//! - **`io`** - Network I/O layer
//!   - `Server` / `Client` - Façades owning sockets, sessions and the dispatch thread
//!   - `ServerHandler` / `ClientHandler` - Application callbacks
//!   - `IdentityPool` - Lock-free client identity allocator
//!   - `DispatchQueue` - Serialized callback execution
//!   - `resolver` - Host name lookup for building options
//!
//! - **`logging`** - Optional `tracing-subscriber` bootstrap
//!
//! - **`error`** - Error handling
//!   - `NetError` - Unified error type for all operations
//!   - `Result<T>` - Type alias for `Result<T, NetError>`
//!
//! # Runtime
//!
//! `listen`, `connect`, `connect_tcp` and `connect_udp` must be awaited inside
//! a tokio runtime. Every other method is synchronous and may be called from
//! handler code. Call [`Server::stop`](io::Server::stop) or
//! [`Client::close`](io::Client::close) to release sockets and the dispatch
//! thread deterministically.

pub mod error;
pub mod io;
pub mod logging;
pub mod protocol;

// Re-export commonly used types
pub use error::{NetError, Result};
pub use io::{Client, ClientHandler, ClientOptions, Protocol, Server, ServerHandler, ServerOptions};
pub use protocol::Packet;
