//! The socket boundary.
//!
//! [`BusSocket`] is the narrow contract the client dispatcher consumes:
//! send a message and learn its serial, receive the next decoded message,
//! close. [`Socket`] is the production implementation over a transport
//! stream, an authenticator list, and an injected frame codec.
//!
//! The send side owns serial assignment and runs under one mutex; the
//! `on_serial` hook fires inside that critical section, before any bytes
//! reach the wire. Callers use the hook to publish the serial (for reply
//! correlation) with a happens-before edge to the reply ever arriving.

use std::sync::Arc;

use bytes::BytesMut;
use tokio::io::{AsyncReadExt, AsyncWriteExt, ReadHalf, WriteHalf};
use tokio::sync::Mutex;
use tracing::trace;

use crate::auth::{default_authenticators, Authenticator};
use crate::error::SocketError;
use crate::message::{Message, ReceivedMessage, Serial, SerialCounter};
use crate::transport::{default_transports, Address, BoxedStream, Transport};
use crate::wire::MessageCodec;
use crate::BoxFuture;

/// Hook invoked with the serial assigned to an outgoing message.
pub type SerialHook<'a> = Box<dyn FnOnce(Serial) + Send + 'a>;

/// The contract between the client dispatcher and its socket.
pub trait BusSocket: Send + Sync {
    /// Assign a serial, invoke `on_serial` with it synchronously (before
    /// any bytes are written), then marshal and send the message.
    fn send<'a>(
        &'a self,
        message: Message,
        on_serial: SerialHook<'a>,
    ) -> BoxFuture<'a, Result<Serial, SocketError>>;

    /// Receive the next message. Only one reader may call this at a time;
    /// the client's receive loop is that reader.
    fn receive(&self) -> BoxFuture<'_, Result<ReceivedMessage, SocketError>>;

    /// Shut the socket down. Idempotent.
    fn close(&self) -> BoxFuture<'_, ()>;
}

/// How to open sockets: transports to try, authenticators to run, and the
/// frame codec to speak once authenticated.
#[derive(Clone)]
pub struct SocketOptions {
    pub transports: Vec<Arc<dyn Transport>>,
    pub authenticators: Vec<Arc<dyn Authenticator>>,
    pub codec: Arc<dyn MessageCodec>,
}

impl SocketOptions {
    /// Default transports and authenticators around the given codec.
    pub fn new(codec: Arc<dyn MessageCodec>) -> SocketOptions {
        SocketOptions {
            transports: default_transports(),
            authenticators: default_authenticators(),
            codec,
        }
    }
}

struct SendHalf {
    io: WriteHalf<BoxedStream>,
    serials: SerialCounter,
}

struct RecvHalf {
    io: ReadHalf<BoxedStream>,
    buf: BytesMut,
}

/// A connected, authenticated socket speaking framed messages.
pub struct Socket {
    writer: Mutex<SendHalf>,
    reader: Mutex<RecvHalf>,
    codec: Arc<dyn MessageCodec>,
}

impl Socket {
    /// Wrap an already-authenticated stream.
    pub fn new(stream: BoxedStream, codec: Arc<dyn MessageCodec>) -> Socket {
        let (read, write) = tokio::io::split(stream);
        Socket {
            writer: Mutex::new(SendHalf {
                io: write,
                serials: SerialCounter::new(),
            }),
            reader: Mutex::new(RecvHalf {
                io: read,
                buf: BytesMut::with_capacity(4096),
            }),
            codec,
        }
    }

    /// Connect to `address`: pick the transport matching the address
    /// method, send the initial NUL credential byte, and run the
    /// authenticator list in order.
    pub async fn open_with(
        options: &SocketOptions,
        address: &Address,
    ) -> Result<Socket, SocketError> {
        let transport = options
            .transports
            .iter()
            .find(|t| t.method() == address.method())
            .ok_or_else(|| {
                SocketError::new(format!(
                    "no transport for address method {:?}",
                    address.method()
                ))
            })?;
        let mut stream = transport.open(address).await?;

        stream.write_all(&[0]).await?;
        let mut authenticated = false;
        for authenticator in &options.authenticators {
            if authenticator.authenticate(&mut stream).await? {
                authenticated = true;
                break;
            }
        }
        if !authenticated {
            return Err(SocketError::new(
                "authentication rejected for every configured mechanism",
            ));
        }
        Ok(Socket::new(stream, options.codec.clone()))
    }
}

impl BusSocket for Socket {
    fn send<'a>(
        &'a self,
        message: Message,
        on_serial: SerialHook<'a>,
    ) -> BoxFuture<'a, Result<Serial, SocketError>> {
        Box::pin(async move {
            let mut guard = self.writer.lock().await;
            let SendHalf { io, serials } = &mut *guard;
            let serial = serials.next();
            let encoded = self
                .codec
                .encode(&message, serial)
                .map_err(|e| SocketError::new(format!("encoding message: {e}")))?;
            // the hook must observe the serial before any byte can produce
            // a reply
            on_serial(serial);
            io.write_all(&encoded).await?;
            io.flush().await?;
            trace!(serial = serial.raw(), "message sent");
            Ok(serial)
        })
    }

    fn receive(&self) -> BoxFuture<'_, Result<ReceivedMessage, SocketError>> {
        Box::pin(async move {
            let mut guard = self.reader.lock().await;
            let RecvHalf { io, buf } = &mut *guard;
            loop {
                if let Some(message) = self
                    .codec
                    .decode(buf)
                    .map_err(|e| SocketError::new(format!("decoding message: {e}")))?
                {
                    trace!(serial = message.serial().raw(), "message received");
                    return Ok(message);
                }
                let n = io.read_buf(buf).await?;
                if n == 0 {
                    return Err(SocketError::new("connection closed by peer"));
                }
            }
        })
    }

    fn close(&self) -> BoxFuture<'_, ()> {
        Box::pin(async move {
            let mut half = self.writer.lock().await;
            let _ = half.io.shutdown().await;
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use minibus_types::{MemberName, ObjectPath};

    use crate::error::CodecError;
    use crate::message::MethodCall;

    /// A toy codec: 4-byte little-endian length prefix around
    /// `serial:member`, decoded back into a method call. Enough to
    /// exercise the socket's framing loop.
    struct LineCodec;

    impl MessageCodec for LineCodec {
        fn encode(&self, message: &Message, serial: Serial) -> Result<Vec<u8>, CodecError> {
            let Message::MethodCall(call) = message else {
                return Err(CodecError::new("toy codec only does method calls"));
            };
            let body = format!("{}:{}", serial.raw(), call.member);
            let mut out = (body.len() as u32).to_le_bytes().to_vec();
            out.extend_from_slice(body.as_bytes());
            Ok(out)
        }

        fn decode(&self, buf: &mut BytesMut) -> Result<Option<ReceivedMessage>, CodecError> {
            if buf.len() < 4 {
                return Ok(None);
            }
            let len = u32::from_le_bytes([buf[0], buf[1], buf[2], buf[3]]) as usize;
            if buf.len() < 4 + len {
                return Ok(None);
            }
            let _ = buf.split_to(4);
            let body = buf.split_to(len);
            let text = std::str::from_utf8(&body)
                .map_err(|_| CodecError::new("frame is not UTF-8"))?;
            let (serial, member) = text
                .split_once(':')
                .ok_or_else(|| CodecError::new("malformed frame"))?;
            let serial = serial
                .parse::<u32>()
                .map_err(|_| CodecError::new("malformed serial"))?;
            let call = MethodCall::new(
                ObjectPath::from_static("/"),
                MemberName::new(member).map_err(|e| CodecError::new(e.to_string()))?,
            );
            Ok(Some(ReceivedMessage::MethodCall(
                Serial::from_raw(serial),
                call,
            )))
        }
    }

    fn call(member: &str) -> Message {
        Message::MethodCall(MethodCall::new(
            ObjectPath::from_static("/"),
            MemberName::new(member).unwrap(),
        ))
    }

    #[tokio::test]
    async fn send_assigns_serials_and_fires_hook_first() {
        let (near, far) = tokio::io::duplex(4096);
        let socket = Socket::new(Box::new(near), Arc::new(LineCodec));
        let peer = Socket::new(Box::new(far), Arc::new(LineCodec));

        let mut hooked = None;
        let serial = socket
            .send(call("First"), Box::new(|s| hooked = Some(s)))
            .await
            .unwrap();
        assert_eq!(hooked, Some(serial));
        assert_eq!(serial.raw(), 1);

        let serial = socket.send(call("Second"), Box::new(|_| {})).await.unwrap();
        assert_eq!(serial.raw(), 2);

        // the peer sees both frames, in order, with the sender's serials
        let first = peer.receive().await.unwrap();
        let ReceivedMessage::MethodCall(serial, call) = first else {
            panic!("expected a method call");
        };
        assert_eq!(serial.raw(), 1);
        assert_eq!(call.member.as_str(), "First");

        let second = peer.receive().await.unwrap();
        assert_eq!(second.serial().raw(), 2);
    }

    #[tokio::test]
    async fn receive_reports_peer_close() {
        let (near, far) = tokio::io::duplex(64);
        let socket = Socket::new(Box::new(near), Arc::new(LineCodec));
        drop(far);

        let err = socket.receive().await.unwrap_err();
        assert!(err.to_string().contains("closed"));
    }
}
