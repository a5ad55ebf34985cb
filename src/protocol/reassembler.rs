//! Reassembly of length-prefixed frames from a TCP byte stream
//!
//! TCP has no message boundaries: one read may contain several frames, the
//! tail of one frame and the head of the next, or only part of a length
//! prefix. [`StreamReassembler`] keeps the unconsumed bytes between reads and
//! hands out a [`Packet`] only once its frame is complete.

use crate::error::{NetError, Result};
use crate::protocol::packet::{Packet, LENGTH_PREFIX_SIZE};
use tracing::{debug, trace, warn};

/// Default upper bound for a single frame (16 MiB)
pub const DEFAULT_MAX_FRAME_LENGTH: usize = 16 * 1024 * 1024;

/// Turns raw stream reads into complete frames
///
/// # Examples
///
/// ```
/// use simple_networking::protocol::{Packet, StreamReassembler};
///
/// let mut frame = Packet::new();
/// frame.write("hi");
/// frame.write_length()?;
/// let wire = frame.as_slice();
///
/// let mut reassembler = StreamReassembler::new();
/// let mut frames = Vec::new();
///
/// reassembler.push(&wire[..5], |p| frames.push(p))?;
/// assert!(frames.is_empty());
///
/// reassembler.push(&wire[5..], |p| frames.push(p))?;
/// assert_eq!(frames.len(), 1);
/// assert_eq!(frames[0].read::<String>()?, "hi");
/// # Ok::<(), simple_networking::NetError>(())
/// ```
#[derive(Debug)]
pub struct StreamReassembler {
    pending: Packet,
    max_frame_length: usize,
}

impl StreamReassembler {
    /// Create a reassembler with the default maximum frame length
    pub fn new() -> Self {
        Self::with_max_frame_length(DEFAULT_MAX_FRAME_LENGTH)
    }

    /// Create a reassembler that rejects frames longer than `max_frame_length`
    pub fn with_max_frame_length(max_frame_length: usize) -> Self {
        StreamReassembler {
            pending: Packet::new(),
            max_frame_length,
        }
    }

    /// Feed one raw read and emit every frame it completes
    ///
    /// `on_frame` is called once per complete frame, in stream order. Bytes
    /// that do not yet form a complete frame are kept for the next call.
    ///
    /// A zero or negative length prefix, or one above the maximum frame
    /// length, is a framing error: frames already extracted from this read are
    /// still emitted, the buffered bytes are discarded and the error is
    /// returned. The stream cannot be resynchronized afterwards, so the caller
    /// must drop the connection.
    ///
    /// # Returns
    /// Number of frames emitted
    ///
    /// # Errors
    ///
    /// - [`NetError::InvalidFrameLength`] - Length prefix `<= 0`
    /// - [`NetError::FrameTooLarge`] - Length prefix above the maximum
    pub fn push<F>(&mut self, data: &[u8], mut on_frame: F) -> Result<usize>
    where
        F: FnMut(Packet),
    {
        self.pending.discard_read();
        self.pending.set_bytes(data);

        let mut emitted = 0;
        loop {
            if self.pending.unread_length() < LENGTH_PREFIX_SIZE {
                break;
            }

            let length = self.pending.peek::<i32>()?;
            if length <= 0 {
                warn!(length, "Invalid frame length, discarding buffered stream data");
                self.pending.reset();
                return Err(NetError::InvalidFrameLength(length));
            }

            let length = length as usize;
            if length > self.max_frame_length {
                warn!(
                    length,
                    max = self.max_frame_length,
                    "Frame exceeds maximum length, discarding buffered stream data"
                );
                self.pending.reset();
                return Err(NetError::FrameTooLarge {
                    size: length,
                    max: self.max_frame_length,
                });
            }

            self.pending.read::<i32>()?;
            if self.pending.unread_length() < length {
                self.pending.rewind(LENGTH_PREFIX_SIZE);
                trace!(
                    needed = length,
                    buffered = self.pending.unread_length() - LENGTH_PREFIX_SIZE,
                    "Partial frame, waiting for more data"
                );
                break;
            }

            let frame = self.pending.read_bytes(length)?;
            debug!(length, "Frame reassembled");
            on_frame(Packet::from(frame));
            emitted += 1;
        }

        Ok(emitted)
    }

    /// Number of buffered bytes not yet emitted as a frame
    pub fn buffered(&self) -> usize {
        self.pending.unread_length()
    }

    /// Discard all buffered bytes
    pub fn clear(&mut self) {
        self.pending.reset();
    }
}

impl Default for StreamReassembler {
    fn default() -> Self {
        Self::new()
    }
}
