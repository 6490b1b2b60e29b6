//! The frame-codec seam.
//!
//! Marshalling messages to and from the D-Bus binary frame format is not
//! implemented here; a codec is injected through
//! [`SocketOptions`](crate::socket::SocketOptions). This keeps the crate
//! usable with any marshaller that can satisfy the two-method contract
//! below.

use bytes::BytesMut;

use crate::error::CodecError;
use crate::message::{Message, ReceivedMessage, Serial};

/// Converts between messages and the binary frame format.
pub trait MessageCodec: Send + Sync + 'static {
    /// Marshal an outbound message under the serial the socket assigned.
    fn encode(&self, message: &Message, serial: Serial) -> Result<Vec<u8>, CodecError>;

    /// Unmarshal one message from the front of `buf`, consuming its bytes.
    ///
    /// Returns `Ok(None)` when `buf` does not yet hold a complete frame;
    /// the socket will read more and call again. Bytes of an incomplete
    /// frame must be left in place.
    fn decode(&self, buf: &mut BytesMut) -> Result<Option<ReceivedMessage>, CodecError>;
}
