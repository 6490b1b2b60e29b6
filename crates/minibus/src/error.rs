//! Error types for the client and its socket boundary.

use std::fmt;

use crate::message::{MethodError, Serial};

/// A connection-level failure: the socket could not be opened, a send or
/// receive failed, or the connection went away under a pending call.
#[derive(Debug, Clone)]
pub struct ClientError {
    message: String,
    serial: Option<Serial>,
}

impl ClientError {
    /// Create a new error with the given message.
    pub fn new(message: impl Into<String>) -> ClientError {
        ClientError {
            message: message.into(),
            serial: None,
        }
    }

    /// Attach the serial of the call this error stranded.
    pub fn with_serial(mut self, serial: Serial) -> ClientError {
        self.serial = Some(serial);
        self
    }

    /// The error message.
    pub fn message(&self) -> &str {
        &self.message
    }

    /// The serial of the stranded call, when the error tore one down.
    pub fn serial(&self) -> Option<Serial> {
        self.serial
    }
}

impl fmt::Display for ClientError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message)?;
        if let Some(serial) = self.serial {
            write!(f, " (serial {serial})")?;
        }
        Ok(())
    }
}

impl std::error::Error for ClientError {}

/// Why a method call did not return: either the connection failed
/// ([`ClientError`]) or the remote peer replied with a D-Bus error
/// ([`MethodError`]).
#[derive(Debug, Clone)]
pub enum CallError {
    Client(ClientError),
    Method(MethodError),
}

impl fmt::Display for CallError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CallError::Client(e) => write!(f, "client error: {e}"),
            CallError::Method(e) => write!(f, "method error: {e}"),
        }
    }
}

impl std::error::Error for CallError {}

impl From<ClientError> for CallError {
    fn from(e: ClientError) -> CallError {
        CallError::Client(e)
    }
}

impl From<MethodError> for CallError {
    fn from(e: MethodError) -> CallError {
        CallError::Method(e)
    }
}

/// A failure at the socket boundary.
#[derive(Debug)]
pub struct SocketError {
    message: String,
    source: Option<Box<dyn std::error::Error + Send + Sync + 'static>>,
}

impl SocketError {
    /// Create a new error with the given message.
    pub fn new(message: impl Into<String>) -> SocketError {
        SocketError {
            message: message.into(),
            source: None,
        }
    }

    /// Create a new error wrapping a source error.
    pub fn with_source(
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> SocketError {
        SocketError {
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }

    /// The error message.
    pub fn message(&self) -> &str {
        &self.message
    }
}

impl fmt::Display for SocketError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message)?;
        if let Some(source) = &self.source {
            write!(f, ": {source}")?;
        }
        Ok(())
    }
}

impl std::error::Error for SocketError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.source.as_ref().map(|e| e.as_ref() as _)
    }
}

impl From<std::io::Error> for SocketError {
    fn from(e: std::io::Error) -> SocketError {
        SocketError::with_source("io error", e)
    }
}

/// A failure in the frame codec.
#[derive(Debug, Clone)]
pub struct CodecError {
    message: String,
}

impl CodecError {
    /// Create a new error with the given message.
    pub fn new(message: impl Into<String>) -> CodecError {
        CodecError {
            message: message.into(),
        }
    }

    /// The error message.
    pub fn message(&self) -> &str {
        &self.message
    }
}

impl fmt::Display for CodecError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message)
    }
}

impl std::error::Error for CodecError {}

#[cfg(test)]
mod tests {
    use super::*;
    use minibus_types::ErrorName;

    #[test]
    fn client_error_display() {
        let e = ClientError::new("connection closed during call");
        assert_eq!(e.to_string(), "connection closed during call");

        let e = e.with_serial(Serial::from_raw(7));
        assert_eq!(e.to_string(), "connection closed during call (serial 7)");
        assert_eq!(e.serial(), Some(Serial::from_raw(7)));
    }

    #[test]
    fn call_error_wraps_both_kinds() {
        let client: CallError = ClientError::new("send failed").into();
        assert!(matches!(client, CallError::Client(_)));

        let method: CallError = MethodError::new(
            ErrorName::from_static("org.example.Error"),
            Serial::from_raw(3),
        )
        .into();
        assert!(matches!(method, CallError::Method(_)));
    }

    #[test]
    fn socket_error_chains_source() {
        use std::error::Error;
        let io = std::io::Error::new(std::io::ErrorKind::BrokenPipe, "pipe");
        let e = SocketError::with_source("send failed", io);
        assert!(e.source().is_some());
        assert!(e.to_string().contains("send failed"));
    }
}
