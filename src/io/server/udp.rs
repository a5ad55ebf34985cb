//! Server datagram transport
//!
//! All clients share one UDP socket. In identity mode every datagram starts
//! with the sender's [`ClientId`]; the first datagram for an identity must
//! come from the same IP as the client's stream connection and binds its full
//! source endpoint. After that only the bound endpoint is accepted.

use crate::error::NetError;
use crate::io::common::{decode_datagram_payload, is_runt, MAX_UDP_DATAGRAM_SIZE};
use crate::io::handler::FailedOperation;
use crate::io::identity::ClientId;
use crate::io::options::Protocol;
use crate::io::server::ServerShared;
use crate::protocol::Packet;
use bytes::Bytes;
use parking_lot::Mutex;
use std::net::SocketAddr;
use std::sync::{Arc, Weak};
use tokio::net::UdpSocket;
use tokio::sync::mpsc;
use tracing::{debug, info, trace, warn};

/// Outcome of checking a datagram source against a session's binding
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Admission {
    /// First datagram from the stream peer's IP; the endpoint is now bound
    Bound,
    /// Datagram from the bound endpoint
    Accepted,
    /// Unbound, and the source IP differs from the stream peer's
    AddressMismatch,
    /// Bound, and the source is a different endpoint
    Spoofed,
}

/// Datagram endpoint learned for one session
#[derive(Debug, Default)]
pub(crate) struct DatagramBinding {
    endpoint: Mutex<Option<SocketAddr>>,
}

impl DatagramBinding {
    pub fn new() -> Self {
        Self::default()
    }

    /// Check `source` and bind it if this is the first valid datagram
    pub fn admit(&self, source: SocketAddr, stream_peer: SocketAddr) -> Admission {
        let mut endpoint = self.endpoint.lock();
        match *endpoint {
            Some(bound) if bound == source => Admission::Accepted,
            Some(_) => Admission::Spoofed,
            None if source.ip().to_canonical() == stream_peer.ip().to_canonical() => {
                *endpoint = Some(source);
                Admission::Bound
            }
            None => Admission::AddressMismatch,
        }
    }

    pub fn endpoint(&self) -> Option<SocketAddr> {
        *self.endpoint.lock()
    }

    /// Forget the bound endpoint
    ///
    /// # Returns
    /// `true` if an endpoint was bound
    pub fn clear(&self) -> bool {
        self.endpoint.lock().take().is_some()
    }
}

/// Datagram queued for the send task
#[derive(Debug)]
pub(crate) struct Outgoing {
    pub data: Bytes,
    pub target: SocketAddr,
    pub client: Option<ClientId>,
}

/// Receive datagrams until the socket fails or the server is gone
pub(super) async fn receive_loop(socket: Arc<UdpSocket>, server: Weak<ServerShared>) {
    let mut buf = vec![0u8; MAX_UDP_DATAGRAM_SIZE + 1];
    loop {
        let received = socket.recv_from(&mut buf).await;
        let Some(shared) = server.upgrade() else {
            return;
        };

        match received {
            Ok((n, source)) => handle_datagram(&shared, &buf[..n], source),
            Err(e) => {
                // Per-datagram errors (e.g. ICMP unreachable) do not close the shared socket
                warn!(error = %e, "Datagram receive failed");
                let error = NetError::from(e);
                shared.dispatch(move |handler, server| {
                    handler.on_network_operation_failed(
                        server,
                        None,
                        FailedOperation::ReceiveDataUdp,
                        &error,
                    )
                });
            }
        }
    }
}

/// Send queued datagrams
pub(super) async fn send_loop(
    socket: Arc<UdpSocket>,
    mut outgoing: mpsc::UnboundedReceiver<Outgoing>,
    server: Weak<ServerShared>,
) {
    while let Some(datagram) = outgoing.recv().await {
        match socket.send_to(&datagram.data, datagram.target).await {
            Ok(n) => trace!(target_addr = %datagram.target, bytes = n, "Datagram sent"),
            Err(e) => {
                warn!(target_addr = %datagram.target, error = %e, "Datagram send failed");
                let Some(shared) = server.upgrade() else {
                    return;
                };
                let client = datagram.client.and_then(|id| shared.session(id));
                let info = client.as_ref().map(|c| c.info());
                let error = NetError::from(e);
                shared.dispatch(move |handler, server| {
                    handler.on_network_operation_failed(
                        server,
                        info.as_ref(),
                        FailedOperation::SendDataUdp,
                        &error,
                    )
                });
                if shared.options.disconnect_client_on_error {
                    if let Some(client) = client {
                        shared.teardown(&client, Protocol::Udp, true);
                    }
                }
            }
        }
    }
}

fn handle_datagram(shared: &Arc<ServerShared>, data: &[u8], source: SocketAddr) {
    if !shared.options.require_client_id_in_udp_data {
        let packet = Packet::from_bytes(data);
        shared.dispatch(move |handler, server| {
            handler.on_unidentified_udp_data(server, source, packet)
        });
        return;
    }

    if is_runt(data) {
        warn!(source = %source, bytes = data.len(), "Datagram too short, dropped");
        return;
    }

    let mut datagram = Packet::from_bytes(data);
    let Ok(id) = datagram.read::<ClientId>() else {
        return;
    };
    let Some(client) = shared.session(id) else {
        debug!(client_id = id, source = %source, "Datagram for unknown client, dropped");
        return;
    };

    match client.udp.admit(source, client.tcp.peer()) {
        Admission::Accepted => {}
        Admission::Bound => {
            info!(client_id = id, endpoint = %source, "Datagram endpoint bound");
        }
        Admission::AddressMismatch => {
            warn!(
                client_id = id,
                source = %source,
                expected_ip = %client.tcp.peer().ip(),
                "Datagram source does not match the client's address, possible impersonation"
            );
            return;
        }
        Admission::Spoofed => {
            warn!(
                client_id = id,
                source = %source,
                "Datagram from an endpoint other than the bound one, possible impersonation"
            );
            return;
        }
    }

    if datagram.unread_length() == 0 {
        return;
    }

    match decode_datagram_payload(&mut datagram) {
        Ok(payload) => {
            shared.dispatch(move |handler, server| handler.on_data(server, id, payload));
        }
        Err(e) => {
            warn!(client_id = id, source = %source, error = %e, "Malformed datagram, dropped");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn addr(s: &str) -> SocketAddr {
        s.parse().unwrap()
    }

    #[test]
    fn test_first_datagram_binds_matching_ip() {
        let binding = DatagramBinding::new();
        let peer = addr("10.0.0.5:4000");

        assert_eq!(binding.admit(addr("10.0.0.5:5000"), peer), Admission::Bound);
        assert_eq!(binding.endpoint(), Some(addr("10.0.0.5:5000")));
    }

    #[test]
    fn test_mismatched_ip_never_binds() {
        let binding = DatagramBinding::new();
        let peer = addr("10.0.0.5:4000");

        assert_eq!(
            binding.admit(addr("10.0.0.6:5000"), peer),
            Admission::AddressMismatch
        );
        assert_eq!(binding.endpoint(), None);
    }

    #[test]
    fn test_bound_endpoint_rejects_other_sources() {
        let binding = DatagramBinding::new();
        let peer = addr("10.0.0.5:4000");
        let e1 = addr("10.0.0.5:5000");
        let e2 = addr("10.0.0.5:5001");

        binding.admit(e1, peer);
        assert_eq!(binding.admit(e2, peer), Admission::Spoofed);
        assert_eq!(binding.admit(e1, peer), Admission::Accepted);
        assert_eq!(binding.endpoint(), Some(e1));
    }

    #[test]
    fn test_ipv4_mapped_peer_matches() {
        let binding = DatagramBinding::new();
        let peer = addr("[::ffff:192.168.1.20]:4000");

        assert_eq!(
            binding.admit(addr("192.168.1.20:6000"), peer),
            Admission::Bound
        );
    }

    #[test]
    fn test_clear_allows_rebinding() {
        let binding = DatagramBinding::new();
        let peer = addr("127.0.0.1:4000");

        binding.admit(addr("127.0.0.1:5000"), peer);
        assert!(binding.clear());
        assert!(!binding.clear());
        assert_eq!(
            binding.admit(addr("127.0.0.1:5001"), peer),
            Admission::Bound
        );
    }
}
