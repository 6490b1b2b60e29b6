//! A D-Bus client.
//!
//! This crate speaks to an existing bus daemon over a single connection
//! and multiplexes that connection three ways: request/response method
//! calls, match-filtered signal delivery, and server-side method export
//! with built-in introspection. The type algebra lives in
//! [`minibus_types`], re-exported here as [`types`].
//!
//! Two things stay outside this crate, behind narrow seams:
//!
//! - marshalling to the binary frame format — inject a [`MessageCodec`]
//!   through [`SocketOptions`]
//! - anything that is not a client: this is not a bus daemon
//!
//! # Architecture
//!
//! ```text
//!   Client ── call ──► pending: Serial → oneshot slot ◄── MethodReturn/Error
//!     │                                                        ▲
//!     ├─ listen ──► signal handlers (match-filtered)  ◄── Signal
//!     ├─ export ──► objects: path → iface → member    ◄── MethodCall
//!     │                                                        ▲
//!     └─ owns ───► Socket (send mutex + serial hook)  ── receive loop
//! ```
//!
//! The receive loop is the only reader; each inbound message is handed to
//! a fresh task. The reply slot for a call is installed inside the
//! socket's serial hook, before any bytes leave the machine, so a reply
//! can never beat its own slot into the pending table.
//!
//! File-descriptor passing (signature code `h`) is not supported.

#![deny(unsafe_code)]

use std::future::Future;
use std::pin::Pin;

pub mod auth;
pub mod client;
pub mod error;
pub mod introspect;
pub mod message;
pub mod rules;
pub mod socket;
pub mod transport;
pub mod wire;

pub use minibus_types as types;

pub use client::{
    method, signal, Client, ClientOptions, Member, MethodHandler, ReleaseNameReply, Reply,
    RequestNameFlags, RequestNameReply, SignalCallback,
};
pub use error::{CallError, ClientError, CodecError, SocketError};
pub use message::{
    Message, MessageFlags, MethodCall, MethodError, MethodReturn, ReceivedMessage, Serial,
    SerialCounter, Signal,
};
pub use rules::MatchRule;
pub use socket::{BusSocket, SerialHook, Socket, SocketOptions};
pub use transport::{Address, Transport};
pub use wire::MessageCodec;

/// A boxed future, the shape trait objects in this crate return.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;
