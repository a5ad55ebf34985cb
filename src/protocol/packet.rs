//! Growable packet buffer with a sequential read cursor
//!
//! A [`Packet`] is the unit handed to and received from the network layer.
//! Values are appended with [`Packet::write`] and decoded in the same order
//! with [`Packet::read`]. All fixed-width values are little-endian; strings are
//! a 4-byte length followed by UTF-8 bytes.
//!
//! # Example
//!
//! ```
//! use simple_networking::protocol::Packet;
//!
//! let mut packet = Packet::new();
//! packet.write(7u32).write("hello").write(true);
//!
//! let mut received = Packet::from_bytes(packet.as_slice());
//! assert_eq!(received.read::<u32>()?, 7);
//! assert_eq!(received.read::<String>()?, "hello");
//! assert!(received.read::<bool>()?);
//! # Ok::<(), simple_networking::NetError>(())
//! ```

use crate::error::{NetError, Result};
use bytes::{Buf, BufMut, Bytes, BytesMut};

/// Size in bytes of the length prefix that starts every frame
pub const LENGTH_PREFIX_SIZE: usize = 4;

/// Value that can be appended to a [`Packet`]
pub trait Encode {
    /// Append the wire encoding of `self` to `buf`
    fn encode(&self, buf: &mut BytesMut);
}

/// Value that can be decoded from the front of a byte slice
pub trait Decode: Sized {
    /// Decode a value from the start of `src`
    ///
    /// # Returns
    /// The value and the number of bytes it occupied
    fn decode(src: &[u8]) -> Result<(Self, usize)>;
}

fn ensure(src: &[u8], needed: usize) -> Result<()> {
    if src.len() < needed {
        return Err(NetError::Truncated {
            needed,
            available: src.len(),
        });
    }
    Ok(())
}

macro_rules! impl_fixed_width {
    ($($ty:ty => $put:ident, $get:ident;)*) => {
        $(
            impl Encode for $ty {
                fn encode(&self, buf: &mut BytesMut) {
                    buf.$put(*self);
                }
            }

            impl Decode for $ty {
                fn decode(src: &[u8]) -> Result<(Self, usize)> {
                    const SIZE: usize = std::mem::size_of::<$ty>();
                    ensure(src, SIZE)?;
                    let mut cursor = src;
                    Ok((cursor.$get(), SIZE))
                }
            }
        )*
    };
}

impl_fixed_width! {
    i16 => put_i16_le, get_i16_le;
    u16 => put_u16_le, get_u16_le;
    i32 => put_i32_le, get_i32_le;
    u32 => put_u32_le, get_u32_le;
    i64 => put_i64_le, get_i64_le;
    u64 => put_u64_le, get_u64_le;
    f32 => put_f32_le, get_f32_le;
    f64 => put_f64_le, get_f64_le;
}

impl Encode for u8 {
    fn encode(&self, buf: &mut BytesMut) {
        buf.put_u8(*self);
    }
}

impl Decode for u8 {
    fn decode(src: &[u8]) -> Result<(Self, usize)> {
        ensure(src, 1)?;
        Ok((src[0], 1))
    }
}

impl Encode for bool {
    fn encode(&self, buf: &mut BytesMut) {
        buf.put_u8(u8::from(*self));
    }
}

impl Decode for bool {
    fn decode(src: &[u8]) -> Result<(Self, usize)> {
        ensure(src, 1)?;
        Ok((src[0] != 0, 1))
    }
}

impl Encode for str {
    fn encode(&self, buf: &mut BytesMut) {
        // Strings longer than i32::MAX cannot be framed anyway; write_length rejects them.
        buf.put_i32_le(self.len() as i32);
        buf.put_slice(self.as_bytes());
    }
}

impl Encode for String {
    fn encode(&self, buf: &mut BytesMut) {
        self.as_str().encode(buf);
    }
}

impl Decode for String {
    fn decode(src: &[u8]) -> Result<(Self, usize)> {
        let (len, prefix) = i32::decode(src)?;
        if len < 0 {
            return Err(NetError::InvalidStringLength(len));
        }
        let len = len as usize;
        ensure(&src[prefix..], len)?;
        let value = String::from_utf8(src[prefix..prefix + len].to_vec())?;
        Ok((value, prefix + len))
    }
}

/// Raw bytes, appended without a length prefix
impl Encode for [u8] {
    fn encode(&self, buf: &mut BytesMut) {
        buf.put_slice(self);
    }
}

impl Encode for Vec<u8> {
    fn encode(&self, buf: &mut BytesMut) {
        buf.put_slice(self);
    }
}

impl<T: Encode + ?Sized> Encode for &T {
    fn encode(&self, buf: &mut BytesMut) {
        (**self).encode(buf);
    }
}

/// Byte buffer with an append-only write end and a sequential read cursor
///
/// Invariant: the read cursor never moves past the end of the buffer. Reads
/// that would need more bytes than remain fail with
/// [`NetError::Truncated`] and leave the cursor where it was.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Packet {
    buf: BytesMut,
    read_pos: usize,
}

impl Packet {
    /// Create an empty packet
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a packet that starts with a 16-bit message id
    ///
    /// Convenient for applications that dispatch on a leading id.
    pub fn with_id(id: i16) -> Self {
        let mut packet = Self::new();
        packet.write(id);
        packet
    }

    /// Create a packet holding a copy of `data`, ready to be read
    pub fn from_bytes(data: &[u8]) -> Self {
        let mut packet = Self::new();
        packet.set_bytes(data);
        packet
    }

    /// Append raw bytes without a length prefix
    pub fn set_bytes(&mut self, data: &[u8]) {
        self.buf.extend_from_slice(data);
    }

    /// Append a value
    ///
    /// Returns `&mut Self` so writes can be chained.
    pub fn write<T: Encode>(&mut self, value: T) -> &mut Self {
        value.encode(&mut self.buf);
        self
    }

    /// Prepend the encoding of a value to the buffer
    ///
    /// Unlike [`write`](Self::write), this inserts at the front. It is used
    /// for the length prefix and for the sender identity of datagrams.
    pub fn insert_front<T: Encode>(&mut self, value: T) {
        let mut front = BytesMut::new();
        value.encode(&mut front);
        front.extend_from_slice(&self.buf);
        self.buf = front;
    }

    /// Prepend the current length as a 4-byte integer
    ///
    /// Every frame on the wire begins with its own length, not counting the
    /// prefix itself.
    ///
    /// # Errors
    ///
    /// - [`NetError::FrameTooLarge`] - The content does not fit in an `i32`
    pub fn write_length(&mut self) -> Result<()> {
        let len = i32::try_from(self.buf.len()).map_err(|_| NetError::FrameTooLarge {
            size: self.buf.len(),
            max: i32::MAX as usize,
        })?;
        self.insert_front(len);
        Ok(())
    }

    /// Decode the next value and advance the read cursor
    ///
    /// # Errors
    ///
    /// - [`NetError::Truncated`] - Fewer bytes remain than the value needs
    /// - [`NetError::InvalidStringLength`] - Negative string length prefix
    /// - [`NetError::Utf8`] - String bytes are not valid UTF-8
    pub fn read<T: Decode>(&mut self) -> Result<T> {
        let (value, size) = T::decode(self.unread())?;
        self.read_pos += size;
        Ok(value)
    }

    /// Decode the next value without advancing the read cursor
    pub fn peek<T: Decode>(&self) -> Result<T> {
        T::decode(self.unread()).map(|(value, _)| value)
    }

    /// Read exactly `len` raw bytes and advance the cursor
    pub fn read_bytes(&mut self, len: usize) -> Result<Bytes> {
        let unread = self.unread();
        ensure(unread, len)?;
        let bytes = Bytes::copy_from_slice(&unread[..len]);
        self.read_pos += len;
        Ok(bytes)
    }

    /// Move the read cursor back by `count` bytes (clamped at the start)
    pub fn rewind(&mut self, count: usize) {
        self.read_pos = self.read_pos.saturating_sub(count);
    }

    /// Clear all content and reset the read cursor
    pub fn reset(&mut self) {
        self.buf.clear();
        self.read_pos = 0;
    }

    /// Drop bytes that have already been read
    pub fn discard_read(&mut self) {
        self.buf.advance(self.read_pos);
        self.read_pos = 0;
    }

    /// Total length of the content in bytes
    pub fn len(&self) -> usize {
        self.buf.len()
    }

    /// Whether the packet holds no bytes
    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    /// Number of bytes after the read cursor
    pub fn unread_length(&self) -> usize {
        self.buf.len() - self.read_pos
    }

    /// Current read cursor position
    pub fn read_position(&self) -> usize {
        self.read_pos
    }

    /// The whole content
    pub fn as_slice(&self) -> &[u8] {
        &self.buf
    }

    /// The bytes after the read cursor
    pub fn unread(&self) -> &[u8] {
        &self.buf[self.read_pos..]
    }

    /// Consume the packet and return its whole content
    pub fn into_bytes(self) -> Bytes {
        self.buf.freeze()
    }
}

impl From<Bytes> for Packet {
    fn from(bytes: Bytes) -> Self {
        Packet {
            buf: BytesMut::from(&bytes[..]),
            read_pos: 0,
        }
    }
}

impl From<Vec<u8>> for Packet {
    fn from(data: Vec<u8>) -> Self {
        Packet {
            buf: BytesMut::from(&data[..]),
            read_pos: 0,
        }
    }
}
