//! Authenticated, multiplexed transport
//!
//! Two layers:
//!
//! - [`SecretConnection`]: a mutual-authentication handshake over any async
//!   byte stream, followed by length-prefixed ChaCha20-Poly1305 frames with
//!   per-direction counter nonces.
//! - [`Mux`]: channel multiplexing on top of a secret connection, with
//!   bounded, prioritised per-channel send queues.

pub mod mux;
pub mod secret;

pub use mux::{InboundFrame, Mux, MuxEvent};
pub use secret::{SecretConnection, SecretReader, SecretWriter};

/// Hard cap on a single transport frame (ciphertext).
///
/// Large enough for the biggest multiplexed message (mempool, 2 MiB) plus
/// the channel byte and AEAD tag.
pub const MAX_FRAME_SIZE: usize = 4 * 1024 * 1024;

/// Static description of one multiplexed channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChannelDescriptor {
    pub id: u8,
    /// Higher drains first.
    pub priority: u8,
    pub send_queue_capacity: usize,
    pub recv_message_capacity: usize,
}

impl ChannelDescriptor {
    pub fn new(id: u8, priority: u8, send_queue_capacity: usize, recv_message_capacity: usize) -> Self {
        Self { id, priority, send_queue_capacity, recv_message_capacity }
    }
}
