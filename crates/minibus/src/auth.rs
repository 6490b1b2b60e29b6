//! SASL client authentication.
//!
//! After a transport connects (and the socket has sent the initial NUL
//! credential byte), the configured authenticators run in order until one
//! succeeds. The exchange is the line-oriented SASL profile: the client
//! sends `AUTH <mechanism> [hex-data]`, the server answers `OK <guid>` or
//! `REJECTED …`, and the client finishes with `BEGIN`.

use std::sync::Arc;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tracing::{debug, trace};

use crate::error::SocketError;
use crate::transport::BoxedStream;
use crate::BoxFuture;

/// Longest server line we are willing to buffer during authentication.
const MAX_LINE_LEN: usize = 8192;

/// One SASL mechanism, run against a freshly connected stream.
pub trait Authenticator: Send + Sync {
    /// Attempt to authenticate. `Ok(true)` means the stream is ready for
    /// framed messages; `Ok(false)` means the server rejected this
    /// mechanism and the next one may try.
    fn authenticate<'a>(
        &'a self,
        stream: &'a mut BoxedStream,
    ) -> BoxFuture<'a, Result<bool, SocketError>>;
}

/// Read one `\r\n`-terminated line.
///
/// Reads a byte at a time so nothing past the line is consumed; the
/// exchange is a handful of short lines per connection.
async fn read_line(stream: &mut BoxedStream) -> Result<String, SocketError> {
    let mut line = Vec::new();
    let mut byte = [0u8; 1];
    loop {
        let n = stream.read(&mut byte).await?;
        if n == 0 {
            return Err(SocketError::new("connection closed during authentication"));
        }
        if byte[0] == b'\n' && line.last() == Some(&b'\r') {
            line.pop();
            let text = String::from_utf8(line)
                .map_err(|e| SocketError::with_source("authentication line is not UTF-8", e))?;
            trace!(line = %text, "auth <-");
            return Ok(text);
        }
        if line.len() >= MAX_LINE_LEN {
            return Err(SocketError::new("authentication line too long"));
        }
        line.push(byte[0]);
    }
}

async fn send_line(stream: &mut BoxedStream, line: &str) -> Result<(), SocketError> {
    trace!(line, "auth ->");
    stream.write_all(line.as_bytes()).await?;
    stream.write_all(b"\r\n").await?;
    stream.flush().await?;
    Ok(())
}

/// Run one `AUTH` round for a mechanism, completing with `BEGIN` on `OK`.
async fn run_mechanism(
    stream: &mut BoxedStream,
    command: &str,
) -> Result<bool, SocketError> {
    send_line(stream, command).await?;
    let response = read_line(stream).await?;
    if response.starts_with("OK") {
        send_line(stream, "BEGIN").await?;
        debug!("authenticated");
        Ok(true)
    } else if response.starts_with("REJECTED") {
        debug!(response = %response, "mechanism rejected");
        Ok(false)
    } else {
        Err(SocketError::new(format!(
            "unexpected authentication response: {response:?}"
        )))
    }
}

fn hex(bytes: &[u8]) -> String {
    let mut out = String::with_capacity(bytes.len() * 2);
    for byte in bytes {
        out.push_str(&format!("{byte:02x}"));
    }
    out
}

/// `EXTERNAL`: identity is the credential the kernel attached to the
/// socket; the initial response is the hex-encoded decimal uid.
#[cfg(unix)]
pub struct External;

#[cfg(unix)]
impl Authenticator for External {
    fn authenticate<'a>(
        &'a self,
        stream: &'a mut BoxedStream,
    ) -> BoxFuture<'a, Result<bool, SocketError>> {
        Box::pin(async move {
            // SAFETY: getuid has no preconditions and cannot fail
            #[allow(unsafe_code)]
            let uid = unsafe { libc::getuid() };
            let command = format!("AUTH EXTERNAL {}", hex(uid.to_string().as_bytes()));
            run_mechanism(stream, &command).await
        })
    }
}

/// `ANONYMOUS`: no identity claimed.
pub struct Anonymous;

impl Authenticator for Anonymous {
    fn authenticate<'a>(
        &'a self,
        stream: &'a mut BoxedStream,
    ) -> BoxFuture<'a, Result<bool, SocketError>> {
        Box::pin(async move { run_mechanism(stream, "AUTH ANONYMOUS").await })
    }
}

/// The mechanisms tried by default, in order.
pub fn default_authenticators() -> Vec<Arc<dyn Authenticator>> {
    let mut authenticators: Vec<Arc<dyn Authenticator>> = Vec::new();
    #[cfg(unix)]
    authenticators.push(Arc::new(External));
    authenticators.push(Arc::new(Anonymous));
    authenticators
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::duplex;

    fn boxed<S: crate::transport::TransportStream + 'static>(s: S) -> BoxedStream {
        Box::new(s)
    }

    #[tokio::test]
    async fn anonymous_accepted() {
        let (client, mut server) = duplex(1024);
        let mut client = boxed(client);

        let server_task = tokio::spawn(async move {
            let mut buf = vec![0u8; 64];
            let n = server.read(&mut buf).await.unwrap();
            assert_eq!(&buf[..n], b"AUTH ANONYMOUS\r\n");
            server
                .write_all(b"OK 1234deadbeef\r\n")
                .await
                .unwrap();
            let n = server.read(&mut buf).await.unwrap();
            assert_eq!(&buf[..n], b"BEGIN\r\n");
        });

        let accepted = Anonymous.authenticate(&mut client).await.unwrap();
        assert!(accepted);
        server_task.await.unwrap();
    }

    #[tokio::test]
    async fn rejection_is_not_an_error() {
        let (client, mut server) = duplex(1024);
        let mut client = boxed(client);

        tokio::spawn(async move {
            let mut buf = vec![0u8; 64];
            let _ = server.read(&mut buf).await.unwrap();
            server
                .write_all(b"REJECTED EXTERNAL\r\n")
                .await
                .unwrap();
            // hold the stream open so the client is not racing a close
            let _ = server.read(&mut buf).await;
        });

        let accepted = Anonymous.authenticate(&mut client).await.unwrap();
        assert!(!accepted);
    }

    #[tokio::test]
    async fn garbage_response_is_an_error() {
        let (client, mut server) = duplex(1024);
        let mut client = boxed(client);

        tokio::spawn(async move {
            let mut buf = vec![0u8; 64];
            let _ = server.read(&mut buf).await.unwrap();
            server.write_all(b"EHLO\r\n").await.unwrap();
            let _ = server.read(&mut buf).await;
        });

        assert!(Anonymous.authenticate(&mut client).await.is_err());
    }

    #[test]
    fn hex_encoding() {
        assert_eq!(hex(b"1000"), "31303030");
        assert_eq!(hex(b""), "");
    }
}
