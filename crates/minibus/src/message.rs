//! Bus message records.
//!
//! Four message kinds cross the wire: method calls, method returns, method
//! errors, and signals. Outbound messages ([`Message`]) carry no serial —
//! the socket assigns one at send time. Inbound messages
//! ([`ReceivedMessage`]) pair each record with the serial the peer put on
//! it.

use std::fmt;
use std::sync::atomic::{AtomicU32, Ordering};

use bitflags::bitflags;

use minibus_types::{
    BusName, ErrorName, InterfaceName, IsVariant, MemberName, ObjectPath, Variant,
};

/// A per-connection 32-bit wrapping counter value used to correlate method
/// calls with their replies. Never zero.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Serial(u32);

impl Serial {
    /// Wrap a raw wire value. Intended for codec implementations and
    /// tests; the client itself only uses serials minted by the socket.
    pub fn from_raw(raw: u32) -> Serial {
        Serial(raw)
    }

    /// The raw wire value.
    pub fn raw(self) -> u32 {
        self.0
    }
}

impl fmt::Display for Serial {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Allocates serials: a wrapping counter that skips zero.
pub struct SerialCounter {
    next: AtomicU32,
}

impl SerialCounter {
    /// Create a counter starting at 1.
    pub fn new() -> SerialCounter {
        SerialCounter {
            next: AtomicU32::new(1),
        }
    }

    /// Allocate the next serial.
    pub fn next(&self) -> Serial {
        loop {
            let raw = self.next.fetch_add(1, Ordering::Relaxed);
            if raw != 0 {
                return Serial(raw);
            }
        }
    }
}

impl Default for SerialCounter {
    fn default() -> SerialCounter {
        SerialCounter::new()
    }
}

bitflags! {
    /// Header flags of a message.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct MessageFlags: u8 {
        /// The caller does not want a reply; no reply slot is allocated.
        const NO_REPLY_EXPECTED = 0x1;
        /// Do not launch an owner for the destination name.
        const NO_AUTO_START = 0x2;
    }
}

/// A request to invoke a method on a remote object.
#[derive(Debug, Clone, PartialEq)]
pub struct MethodCall {
    pub path: ObjectPath,
    pub interface: Option<InterfaceName>,
    pub member: MemberName,
    pub sender: Option<BusName>,
    pub destination: Option<BusName>,
    pub flags: MessageFlags,
    pub body: Vec<Variant>,
}

impl MethodCall {
    /// Create a call to `member` on the object at `path`, with no
    /// interface, no addressing, no flags, and an empty body.
    pub fn new(path: ObjectPath, member: MemberName) -> MethodCall {
        MethodCall {
            path,
            interface: None,
            member,
            sender: None,
            destination: None,
            flags: MessageFlags::empty(),
            body: Vec::new(),
        }
    }

    pub fn with_interface(mut self, interface: InterfaceName) -> MethodCall {
        self.interface = Some(interface);
        self
    }

    pub fn with_destination(mut self, destination: BusName) -> MethodCall {
        self.destination = Some(destination);
        self
    }

    pub fn with_sender(mut self, sender: BusName) -> MethodCall {
        self.sender = Some(sender);
        self
    }

    pub fn with_flags(mut self, flags: MessageFlags) -> MethodCall {
        self.flags = flags;
        self
    }

    pub fn with_body(mut self, body: Vec<Variant>) -> MethodCall {
        self.body = body;
        self
    }
}

/// A successful reply to a method call.
#[derive(Debug, Clone, PartialEq)]
pub struct MethodReturn {
    pub reply_serial: Serial,
    pub sender: Option<BusName>,
    pub destination: Option<BusName>,
    pub body: Vec<Variant>,
}

impl MethodReturn {
    /// Create a reply to the call with the given serial.
    pub fn new(reply_serial: Serial) -> MethodReturn {
        MethodReturn {
            reply_serial,
            sender: None,
            destination: None,
            body: Vec::new(),
        }
    }

    pub fn with_destination(mut self, destination: BusName) -> MethodReturn {
        self.destination = Some(destination);
        self
    }

    pub fn with_body(mut self, body: Vec<Variant>) -> MethodReturn {
        self.body = body;
        self
    }
}

/// A D-Bus-level method failure: an error name plus a variant payload.
///
/// This is both a wire record and the error type surfaced to callers of
/// `call` when the remote peer reports failure.
#[derive(Debug, Clone, PartialEq)]
pub struct MethodError {
    pub name: ErrorName,
    pub reply_serial: Serial,
    pub sender: Option<BusName>,
    pub destination: Option<BusName>,
    pub body: Vec<Variant>,
}

impl MethodError {
    /// Create an error reply to the call with the given serial.
    pub fn new(name: ErrorName, reply_serial: Serial) -> MethodError {
        MethodError {
            name,
            reply_serial,
            sender: None,
            destination: None,
            body: Vec::new(),
        }
    }

    pub fn with_destination(mut self, destination: BusName) -> MethodError {
        self.destination = Some(destination);
        self
    }

    pub fn with_body(mut self, body: Vec<Variant>) -> MethodError {
        self.body = body;
        self
    }

    /// The human-readable message: the first string in the body, if any.
    pub fn message(&self) -> Option<String> {
        self.body.first().and_then(String::from_variant)
    }
}

impl fmt::Display for MethodError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.message() {
            Some(message) => write!(f, "{}: {message}", self.name),
            None => write!(f, "{}", self.name),
        }
    }
}

impl std::error::Error for MethodError {}

/// A broadcast emitted by an object.
#[derive(Debug, Clone, PartialEq)]
pub struct Signal {
    pub path: ObjectPath,
    pub interface: InterfaceName,
    pub member: MemberName,
    pub sender: Option<BusName>,
    pub destination: Option<BusName>,
    pub body: Vec<Variant>,
}

impl Signal {
    /// Create a signal with an empty body and no addressing.
    pub fn new(path: ObjectPath, interface: InterfaceName, member: MemberName) -> Signal {
        Signal {
            path,
            interface,
            member,
            sender: None,
            destination: None,
            body: Vec::new(),
        }
    }

    pub fn with_sender(mut self, sender: BusName) -> Signal {
        self.sender = Some(sender);
        self
    }

    pub fn with_destination(mut self, destination: BusName) -> Signal {
        self.destination = Some(destination);
        self
    }

    pub fn with_body(mut self, body: Vec<Variant>) -> Signal {
        self.body = body;
        self
    }
}

/// An outbound message. The serial is assigned by the socket at send time.
#[derive(Debug, Clone, PartialEq)]
pub enum Message {
    MethodCall(MethodCall),
    MethodReturn(MethodReturn),
    Error(MethodError),
    Signal(Signal),
}

/// A decoded inbound message, each kind carrying the serial the sender
/// assigned to it.
#[derive(Debug, Clone, PartialEq)]
pub enum ReceivedMessage {
    MethodCall(Serial, MethodCall),
    MethodReturn(Serial, MethodReturn),
    Error(Serial, MethodError),
    Signal(Serial, Signal),
}

impl ReceivedMessage {
    /// The serial of the message itself (not a reply serial).
    pub fn serial(&self) -> Serial {
        match self {
            ReceivedMessage::MethodCall(serial, _)
            | ReceivedMessage::MethodReturn(serial, _)
            | ReceivedMessage::Error(serial, _)
            | ReceivedMessage::Signal(serial, _) => *serial,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn serial_counter_starts_at_one() {
        let counter = SerialCounter::new();
        assert_eq!(counter.next().raw(), 1);
        assert_eq!(counter.next().raw(), 2);
    }

    #[test]
    fn serial_counter_wraps_past_zero() {
        let counter = SerialCounter {
            next: AtomicU32::new(u32::MAX),
        };
        assert_eq!(counter.next().raw(), u32::MAX);
        // the wrapped value 0 is skipped
        assert_eq!(counter.next().raw(), 1);
    }

    #[test]
    fn method_error_message_extraction() {
        let name = ErrorName::from_static("org.example.Error.Failed");
        let err = MethodError::new(name.clone(), Serial::from_raw(5));
        assert_eq!(err.message(), None);

        let err = err.with_body(vec![Variant::from("it broke")]);
        assert_eq!(err.message(), Some("it broke".into()));
        assert_eq!(err.to_string(), "org.example.Error.Failed: it broke");

        // a non-string first element is not a message
        let err = MethodError::new(name, Serial::from_raw(6))
            .with_body(vec![7u32.to_variant()]);
        assert_eq!(err.message(), None);
    }

    #[test]
    fn received_message_serial() {
        let signal = Signal::new(
            ObjectPath::from_static("/"),
            InterfaceName::from_static("org.example.Iface"),
            MemberName::from_static("Ping"),
        );
        let received = ReceivedMessage::Signal(Serial::from_raw(9), signal);
        assert_eq!(received.serial().raw(), 9);
    }
}
