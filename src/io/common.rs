//! Frame helpers shared by the client and server transports
//!
//! Outgoing packets are turned into wire bytes here, and incoming datagram
//! bodies are checked and stripped of their length prefix.

use crate::error::{NetError, Result};
use crate::io::identity::ClientId;
use crate::protocol::{Packet, LENGTH_PREFIX_SIZE};
use bytes::Bytes;
use tracing::{debug, trace};

/// Largest payload a single UDP datagram can carry over IPv4
pub const MAX_UDP_DATAGRAM_SIZE: usize = 65507;

/// Prefix a packet with its length for the stream transport
///
/// # Examples
/// ```ignore
/// let mut packet = Packet::new();
/// packet.write(7u8);
/// assert_eq!(&encode_frame(packet)?[..], &[1, 0, 0, 0, 7]);
/// ```
pub(crate) fn encode_frame(mut packet: Packet) -> Result<Bytes> {
    packet.write_length()?;
    let data = packet.into_bytes();

    trace!(size = data.len(), "Frame encoded");
    Ok(data)
}

/// Build a datagram: `[id]` when given, then `[length][payload]`
///
/// # Errors
///
/// - [`NetError::DatagramTooLarge`] - The result does not fit one datagram
pub(crate) fn encode_datagram(mut packet: Packet, id: Option<ClientId>) -> Result<Bytes> {
    packet.write_length()?;
    if let Some(id) = id {
        packet.insert_front(id);
    }

    if packet.len() > MAX_UDP_DATAGRAM_SIZE {
        debug!(
            size = packet.len(),
            max = MAX_UDP_DATAGRAM_SIZE,
            "Datagram rejected before send"
        );
        return Err(NetError::DatagramTooLarge {
            size: packet.len(),
            max: MAX_UDP_DATAGRAM_SIZE,
        });
    }

    trace!(size = packet.len(), with_id = id.is_some(), "Datagram encoded");
    Ok(packet.into_bytes())
}

/// Read `[length][payload]` at the cursor and return the payload
///
/// Bytes after the declared payload are ignored.
///
/// # Errors
///
/// - [`NetError::Truncated`] - Missing prefix or short payload
/// - [`NetError::InvalidFrameLength`] - Length prefix `<= 0`
pub(crate) fn decode_datagram_payload(datagram: &mut Packet) -> Result<Packet> {
    let length = datagram.read::<i32>()?;
    if length <= 0 {
        return Err(NetError::InvalidFrameLength(length));
    }
    let payload = datagram.read_bytes(length as usize)?;
    Ok(Packet::from(payload))
}

/// Whether `datagram` is too short to hold even a length prefix
pub(crate) fn is_runt(datagram: &[u8]) -> bool {
    datagram.len() < LENGTH_PREFIX_SIZE
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_frame_prefixes_length() {
        let mut packet = Packet::new();
        packet.write(7u8).write(8u8);

        let wire = encode_frame(packet).unwrap();
        assert_eq!(&wire[..], &[2, 0, 0, 0, 7, 8]);
    }

    #[test]
    fn test_encode_datagram_with_id() {
        let mut packet = Packet::new();
        packet.write(9u8);

        let wire = encode_datagram(packet, Some(3)).unwrap();
        assert_eq!(&wire[..], &[3, 0, 0, 0, 1, 0, 0, 0, 9]);
    }

    #[test]
    fn test_encode_datagram_without_id() {
        let mut packet = Packet::new();
        packet.write(9u8);

        let wire = encode_datagram(packet, None).unwrap();
        assert_eq!(&wire[..], &[1, 0, 0, 0, 9]);
    }

    #[test]
    fn test_oversized_datagram_rejected() {
        let mut packet = Packet::new();
        packet.write(vec![0u8; MAX_UDP_DATAGRAM_SIZE]);

        let err = encode_datagram(packet, None).unwrap_err();
        assert!(matches!(
            err,
            NetError::DatagramTooLarge {
                size,
                max: MAX_UDP_DATAGRAM_SIZE,
            } if size == MAX_UDP_DATAGRAM_SIZE + 4
        ));
    }

    #[test]
    fn test_decode_datagram_payload() {
        let mut packet = Packet::from_bytes(&[2, 0, 0, 0, b'o', b'k', 0xff]);
        let payload = decode_datagram_payload(&mut packet).unwrap();
        assert_eq!(payload.as_slice(), b"ok");
    }

    #[test]
    fn test_decode_datagram_rejects_bad_lengths() {
        let mut zero = Packet::from_bytes(&[0, 0, 0, 0, 1]);
        assert!(matches!(
            decode_datagram_payload(&mut zero),
            Err(NetError::InvalidFrameLength(0))
        ));

        let mut short = Packet::from_bytes(&[5, 0, 0, 0, 1]);
        assert!(matches!(
            decode_datagram_payload(&mut short),
            Err(NetError::Truncated { .. })
        ));

        assert!(is_runt(&[1, 2, 3]));
        assert!(!is_runt(&[1, 2, 3, 4]));
    }
}
