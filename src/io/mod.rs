//! Network I/O: client and server over TCP and UDP
//!
//! Sockets are driven by tokio tasks; every event reaches the application
//! through a [`ServerHandler`] or [`ClientHandler`] running on the owner's
//! dispatch thread.

pub mod client;
pub(crate) mod common;
pub mod dispatch;
pub mod handler;
pub mod identity;
pub mod options;
pub mod resolver;
pub mod server;
pub(crate) mod stream;

pub use client::Client;
pub use common::MAX_UDP_DATAGRAM_SIZE;
pub use dispatch::{DispatchQueue, DispatchStats};
pub use handler::{ClientHandler, FailedOperation, ServerHandler};
pub use identity::{ClientId, IdentityPool};
pub use options::{ClientOptions, Protocol, ServerOptions};
pub use server::{ClientInfo, Server};
pub use stream::SessionState;
