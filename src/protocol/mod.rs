//! Wire protocol: packet buffer and stream framing
//!
//! Every frame on the wire is `[i32 LE length][payload]`. Datagrams sent with
//! the client identity are `[u32 LE id][i32 LE length][payload]`.

pub mod packet;
pub mod reassembler;

// Re-export commonly used types
pub use packet::{Decode, Encode, Packet, LENGTH_PREFIX_SIZE};
pub use reassembler::{StreamReassembler, DEFAULT_MAX_FRAME_LENGTH};
