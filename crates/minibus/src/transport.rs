//! Stream transports underneath the socket.
//!
//! A [`Transport`] turns an [`Address`] into a raw byte stream. Everything
//! above (authentication, framing, dispatch) is transport-agnostic: any
//! `AsyncRead + AsyncWrite` stream works.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;
#[cfg(unix)]
use tokio::net::UnixStream;

use crate::error::SocketError;
use crate::BoxFuture;

/// A bus endpoint address: a connection method plus its parameters, e.g.
/// `unix:path=/run/user/1000/bus`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Address {
    method: String,
    parameters: BTreeMap<String, String>,
}

impl Address {
    /// Create an address with the given method and no parameters.
    pub fn new(method: impl Into<String>) -> Address {
        Address {
            method: method.into(),
            parameters: BTreeMap::new(),
        }
    }

    /// Add a parameter.
    pub fn with_parameter(
        mut self,
        key: impl Into<String>,
        value: impl Into<String>,
    ) -> Address {
        self.parameters.insert(key.into(), value.into());
        self
    }

    /// Split a `method:key=value,…` address string.
    ///
    /// This is a minimal splitter: percent-escapes and address lists are
    /// not interpreted.
    pub fn parse(text: &str) -> Option<Address> {
        let (method, rest) = text.split_once(':')?;
        if method.is_empty() {
            return None;
        }
        let mut parameters = BTreeMap::new();
        if !rest.is_empty() {
            for pair in rest.split(',') {
                let (key, value) = pair.split_once('=')?;
                parameters.insert(key.to_owned(), value.to_owned());
            }
        }
        Some(Address {
            method: method.to_owned(),
            parameters,
        })
    }

    /// The address of the session bus, from `DBUS_SESSION_BUS_ADDRESS`.
    pub fn session() -> Option<Address> {
        let text = std::env::var("DBUS_SESSION_BUS_ADDRESS").ok()?;
        Address::parse(&text)
    }

    /// The address of the system bus: `DBUS_SYSTEM_BUS_ADDRESS` if set,
    /// otherwise the well-known socket path.
    pub fn system() -> Address {
        std::env::var("DBUS_SYSTEM_BUS_ADDRESS")
            .ok()
            .and_then(|text| Address::parse(&text))
            .unwrap_or_else(|| {
                Address::new("unix").with_parameter("path", "/var/run/dbus/system_bus_socket")
            })
    }

    /// The connection method, e.g. `"unix"`.
    pub fn method(&self) -> &str {
        &self.method
    }

    /// Look up a parameter.
    pub fn parameter(&self, key: &str) -> Option<&str> {
        self.parameters.get(key).map(String::as_str)
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:", self.method)?;
        for (i, (key, value)) in self.parameters.iter().enumerate() {
            if i > 0 {
                f.write_str(",")?;
            }
            write!(f, "{key}={value}")?;
        }
        Ok(())
    }
}

/// A raw byte stream a transport produced.
pub trait TransportStream: AsyncRead + AsyncWrite + Send + Unpin {}

impl<S: AsyncRead + AsyncWrite + Send + Unpin> TransportStream for S {}

/// A boxed stream, so transports of different concrete types can share a
/// socket.
pub type BoxedStream = Box<dyn TransportStream>;

/// Opens a byte stream to an address of one particular method.
pub trait Transport: Send + Sync {
    /// The address method this transport serves.
    fn method(&self) -> &str;

    /// Open a stream to the given address.
    fn open<'a>(&'a self, address: &'a Address) -> BoxFuture<'a, Result<BoxedStream, SocketError>>;
}

/// Unix domain socket transport (`unix:path=…`).
#[cfg(unix)]
pub struct UnixTransport;

#[cfg(unix)]
impl Transport for UnixTransport {
    fn method(&self) -> &str {
        "unix"
    }

    fn open<'a>(&'a self, address: &'a Address) -> BoxFuture<'a, Result<BoxedStream, SocketError>> {
        Box::pin(async move {
            let path = address
                .parameter("path")
                .ok_or_else(|| SocketError::new("unix address has no path parameter"))?;
            let stream = UnixStream::connect(path)
                .await
                .map_err(|e| SocketError::with_source(format!("connecting to {path}"), e))?;
            Ok(Box::new(stream) as BoxedStream)
        })
    }
}

/// TCP transport (`tcp:host=…,port=…`).
pub struct TcpTransport;

impl Transport for TcpTransport {
    fn method(&self) -> &str {
        "tcp"
    }

    fn open<'a>(&'a self, address: &'a Address) -> BoxFuture<'a, Result<BoxedStream, SocketError>> {
        Box::pin(async move {
            let host = address
                .parameter("host")
                .ok_or_else(|| SocketError::new("tcp address has no host parameter"))?;
            let port: u16 = address
                .parameter("port")
                .and_then(|p| p.parse().ok())
                .ok_or_else(|| SocketError::new("tcp address has no usable port parameter"))?;
            let stream = TcpStream::connect((host, port))
                .await
                .map_err(|e| SocketError::with_source(format!("connecting to {host}:{port}"), e))?;
            Ok(Box::new(stream) as BoxedStream)
        })
    }
}

/// The transports tried by default, in order.
pub fn default_transports() -> Vec<Arc<dyn Transport>> {
    let mut transports: Vec<Arc<dyn Transport>> = Vec::new();
    #[cfg(unix)]
    transports.push(Arc::new(UnixTransport));
    transports.push(Arc::new(TcpTransport));
    transports
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_unix_address() {
        let addr = Address::parse("unix:path=/run/user/1000/bus").unwrap();
        assert_eq!(addr.method(), "unix");
        assert_eq!(addr.parameter("path"), Some("/run/user/1000/bus"));
        assert_eq!(addr.parameter("missing"), None);
    }

    #[test]
    fn parse_multi_parameter_address() {
        let addr = Address::parse("tcp:host=localhost,port=12345").unwrap();
        assert_eq!(addr.method(), "tcp");
        assert_eq!(addr.parameter("host"), Some("localhost"));
        assert_eq!(addr.parameter("port"), Some("12345"));
    }

    #[test]
    fn parse_rejects_malformed() {
        assert!(Address::parse("").is_none());
        assert!(Address::parse("nocolon").is_none());
        assert!(Address::parse(":path=/x").is_none());
        assert!(Address::parse("unix:noequals").is_none());
    }

    #[test]
    fn display_roundtrip() {
        let text = "tcp:host=localhost,port=12345";
        let addr = Address::parse(text).unwrap();
        assert_eq!(addr.to_string(), text);
        assert_eq!(Address::parse(&addr.to_string()), Some(addr));
    }
}
