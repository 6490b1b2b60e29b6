//! The connection dispatcher.
//!
//! A [`Client`] owns one socket and multiplexes it three ways:
//!
//! - outgoing method calls are correlated to replies by serial through a
//!   pending table of oneshot slots
//! - incoming signals fan out to a list of match-filtered handlers
//! - incoming method calls dispatch to exported objects (with built-in
//!   introspection), or come back as `UnknownMethod` errors
//!
//! Only the receive loop reads from the socket. Every received message is
//! handed off on a freshly spawned task so a slow handler never blocks
//! the reader. The reply slot for a call is installed inside the socket's
//! serial hook, which runs before any bytes leave the machine — a reply
//! can therefore never race its own slot.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{debug, trace, warn};

use minibus_types::{
    BusName, ErrorName, InterfaceName, IsVariant, MemberName, ObjectPath, Signature, Variant,
};

use crate::error::{CallError, ClientError};
use crate::introspect;
use crate::message::{
    Message, MessageFlags, MethodCall, MethodError, MethodReturn, ReceivedMessage, Serial, Signal,
};
use crate::rules::MatchRule;
use crate::socket::{BusSocket, Socket, SocketOptions};
use crate::transport::Address;

fn bus_name() -> BusName {
    BusName::from_static("org.freedesktop.DBus")
}

fn bus_path() -> ObjectPath {
    ObjectPath::from_static("/org/freedesktop/DBus")
}

fn bus_interface() -> InterfaceName {
    InterfaceName::from_static("org.freedesktop.DBus")
}

fn introspectable_interface() -> InterfaceName {
    InterfaceName::from_static("org.freedesktop.DBus.Introspectable")
}

fn root_path() -> ObjectPath {
    ObjectPath::from_static("/")
}

fn error_unknown_method() -> ErrorName {
    ErrorName::from_static("org.freedesktop.DBus.Error.UnknownMethod")
}

fn error_failed() -> ErrorName {
    ErrorName::from_static("org.freedesktop.DBus.Error.Failed")
}

/// The reply an exported method handler produces: a return value list, or
/// an error name with its payload.
#[derive(Debug, Clone)]
pub enum Reply {
    Return(Vec<Variant>),
    Error(ErrorName, Vec<Variant>),
}

/// An exported method handler.
pub type MethodHandler =
    Arc<dyn Fn(MethodCall) -> Pin<Box<dyn Future<Output = Reply> + Send>> + Send + Sync>;

/// A signal callback registered with [`Client::listen`].
pub type SignalCallback = Arc<dyn Fn(&Signal) + Send + Sync>;

/// A member to export under a path.
#[derive(Clone)]
pub enum Member {
    /// A callable method.
    Method {
        interface: InterfaceName,
        member: MemberName,
        in_sig: Signature,
        out_sig: Signature,
        handler: MethodHandler,
    },
    /// A signal declaration, for introspection only.
    Signal {
        interface: InterfaceName,
        member: MemberName,
        signature: Signature,
    },
}

/// Build a [`Member::Method`] from an async closure.
pub fn method<F, Fut>(
    interface: InterfaceName,
    member: MemberName,
    in_sig: Signature,
    out_sig: Signature,
    handler: F,
) -> Member
where
    F: Fn(MethodCall) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Reply> + Send + 'static,
{
    Member::Method {
        interface,
        member,
        in_sig,
        out_sig,
        handler: Arc::new(move |call| Box::pin(handler(call))),
    }
}

/// Build a [`Member::Signal`] declaration.
pub fn signal(interface: InterfaceName, member: MemberName, signature: Signature) -> Member {
    Member::Signal {
        interface,
        member,
        signature,
    }
}

bitflags::bitflags! {
    /// Flags for [`Client::request_name`].
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct RequestNameFlags: u32 {
        const ALLOW_REPLACEMENT = 0x1;
        const REPLACE_EXISTING = 0x2;
        const DO_NOT_QUEUE = 0x4;
    }
}

/// The daemon's answer to `RequestName`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestNameReply {
    PrimaryOwner,
    InQueue,
    Exists,
    AlreadyOwner,
}

impl RequestNameReply {
    fn from_code(code: u32) -> Option<RequestNameReply> {
        match code {
            1 => Some(RequestNameReply::PrimaryOwner),
            2 => Some(RequestNameReply::InQueue),
            3 => Some(RequestNameReply::Exists),
            4 => Some(RequestNameReply::AlreadyOwner),
            _ => None,
        }
    }
}

/// The daemon's answer to `ReleaseName`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReleaseNameReply {
    Released,
    NonExistent,
    NotOwner,
}

impl ReleaseNameReply {
    fn from_code(code: u32) -> Option<ReleaseNameReply> {
        match code {
            1 => Some(ReleaseNameReply::Released),
            2 => Some(ReleaseNameReply::NonExistent),
            3 => Some(ReleaseNameReply::NotOwner),
            _ => None,
        }
    }
}

/// Options for [`Client::connect_with`].
#[derive(Clone)]
pub struct ClientOptions {
    /// Transports, authenticators, and the frame codec.
    pub socket: SocketOptions,
    /// Bound on the connect phase (socket open through the `Hello`
    /// reply). In-flight calls are never timed out.
    pub timeout: Option<Duration>,
    /// Reserved. Stored but not acted on by the attach logic.
    pub reconnect: bool,
}

impl ClientOptions {
    /// Default options around the given socket options.
    pub fn new(socket: SocketOptions) -> ClientOptions {
        ClientOptions {
            socket,
            timeout: None,
            reconnect: true,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ConnectionState {
    Connecting,
    HelloPending,
    Ready,
    Closed,
}

type ReplySlot = oneshot::Sender<Result<MethodReturn, CallError>>;

enum MemberInfo {
    Method {
        in_sig: Signature,
        out_sig: Signature,
        handler: MethodHandler,
    },
    Signal(Signature),
}

type InterfaceMembers = HashMap<MemberName, MemberInfo>;
type ObjectMembers = HashMap<InterfaceName, InterfaceMembers>;

#[derive(Clone)]
struct SignalHandler {
    rule: MatchRule,
    callback: SignalCallback,
}

struct ClientInner {
    socket: Arc<dyn BusSocket>,
    state: Mutex<ConnectionState>,
    pending: Mutex<HashMap<Serial, ReplySlot>>,
    handlers: Mutex<Vec<SignalHandler>>,
    objects: Mutex<HashMap<ObjectPath, ObjectMembers>>,
    receiver: Mutex<Option<JoinHandle<()>>>,
    unique_name: Mutex<Option<BusName>>,
}

/// A handle to one bus connection. Cloning is cheap and every clone talks
/// to the same connection.
#[derive(Clone)]
pub struct Client {
    inner: Arc<ClientInner>,
}

impl Client {
    /// Connect to `address` with default client options.
    pub async fn connect(
        address: &Address,
        socket_options: SocketOptions,
    ) -> Result<Client, ClientError> {
        Client::connect_with(address, ClientOptions::new(socket_options)).await
    }

    /// Connect to the session bus (`DBUS_SESSION_BUS_ADDRESS`).
    pub async fn connect_session(options: ClientOptions) -> Result<Client, ClientError> {
        let address = Address::session().ok_or_else(|| {
            ClientError::new("DBUS_SESSION_BUS_ADDRESS is not set or not parseable")
        })?;
        Client::connect_with(&address, options).await
    }

    /// Connect to the system bus.
    pub async fn connect_system(options: ClientOptions) -> Result<Client, ClientError> {
        Client::connect_with(&Address::system(), options).await
    }

    /// Open a socket to `address` and attach. `options.timeout`, if set,
    /// bounds the whole connect phase.
    pub async fn connect_with(
        address: &Address,
        options: ClientOptions,
    ) -> Result<Client, ClientError> {
        let connect = async {
            let socket = Socket::open_with(&options.socket, address)
                .await
                .map_err(|e| ClientError::new(format!("failed to open socket: {e}")))?;
            Client::attach(Arc::new(socket)).await
        };
        match options.timeout {
            Some(limit) => tokio::time::timeout(limit, connect)
                .await
                .map_err(|_| ClientError::new("connect timed out"))?,
            None => connect.await,
        }
    }

    /// Attach to an already-open socket: start the receive loop, export
    /// the root introspection object, and issue `Hello`.
    ///
    /// This is the seam for plugging in a non-standard socket (tests use
    /// an in-memory one).
    pub async fn attach(socket: Arc<dyn BusSocket>) -> Result<Client, ClientError> {
        let inner = Arc::new(ClientInner {
            socket,
            state: Mutex::new(ConnectionState::Connecting),
            pending: Mutex::new(HashMap::new()),
            handlers: Mutex::new(Vec::new()),
            objects: Mutex::new(HashMap::new()),
            receiver: Mutex::new(None),
            unique_name: Mutex::new(None),
        });
        let client = Client {
            inner: inner.clone(),
        };

        let loop_inner = inner.clone();
        let handle = tokio::spawn(receive_loop(loop_inner));
        *inner.receiver.lock() = Some(handle);

        inner.objects.lock().insert(root_path(), HashMap::new());

        *inner.state.lock() = ConnectionState::HelloPending;
        let hello = MethodCall::new(bus_path(), MemberName::from_static("Hello"))
            .with_interface(bus_interface())
            .with_destination(bus_name());
        match client.call(hello).await {
            Ok(reply) => {
                let name = reply.body.first().and_then(BusName::from_variant);
                debug!(unique_name = ?name, "connected");
                *inner.unique_name.lock() = name;
                *inner.state.lock() = ConnectionState::Ready;
                Ok(client)
            }
            Err(e) => {
                inner.teardown().await;
                Err(ClientError::new(format!("Hello failed: {e}")))
            }
        }
    }

    /// The unique connection name the daemon assigned, once `Hello` has
    /// completed.
    pub fn unique_name(&self) -> Option<BusName> {
        self.inner.unique_name.lock().clone()
    }

    async fn send_with(
        &self,
        message: Message,
        on_serial: crate::socket::SerialHook<'_>,
    ) -> Result<Serial, ClientError> {
        if *self.inner.state.lock() == ConnectionState::Closed {
            return Err(ClientError::new("client is disconnected"));
        }
        self.inner
            .socket
            .send(message, on_serial)
            .await
            .map_err(|e| ClientError::new(format!("send failed: {e}")))
    }

    /// Send a message without allocating a reply slot.
    pub async fn send(&self, message: Message) -> Result<Serial, ClientError> {
        self.send_with(message, Box::new(|_| {})).await
    }

    /// Call a method and wait for its reply.
    ///
    /// The reply slot is installed under the same critical section that
    /// assigns the serial, so the reply cannot be dispatched before the
    /// slot exists. When this returns, the serial is no longer pending.
    pub async fn call(&self, mut message: MethodCall) -> Result<MethodReturn, CallError> {
        message.flags.remove(MessageFlags::NO_REPLY_EXPECTED);

        let (tx, rx) = oneshot::channel();
        let mut slot = Some(tx);
        let inner = &self.inner;
        let serial = self
            .send_with(
                Message::MethodCall(message),
                Box::new(move |serial| {
                    if let Some(tx) = slot.take() {
                        inner.pending.lock().insert(serial, tx);
                    }
                }),
            )
            .await?;

        // a disconnect racing the send may have drained the table before
        // the slot landed; fail the orphan instead of waiting forever
        if *self.inner.state.lock() == ConnectionState::Closed {
            if let Some(tx) = self.inner.pending.lock().remove(&serial) {
                let _ = tx.send(Err(CallError::Client(
                    ClientError::new("connection closed during call").with_serial(serial),
                )));
            }
        }

        match rx.await {
            Ok(outcome) => outcome,
            // slot dropped without completion: the connection went away
            Err(_) => Err(CallError::Client(ClientError::new(
                "connection closed during call",
            ))),
        }
    }

    /// Call a method with `NO_REPLY_EXPECTED` set; no slot is allocated
    /// and no reply will come.
    pub async fn call_no_reply(&self, mut message: MethodCall) -> Result<(), ClientError> {
        message.flags.insert(MessageFlags::NO_REPLY_EXPECTED);
        self.send(Message::MethodCall(message)).await.map(|_| ())
    }

    /// Emit a signal. Fire and forget.
    pub async fn emit(&self, signal: Signal) -> Result<(), ClientError> {
        self.send(Message::Signal(signal)).await.map(|_| ())
    }

    /// Register a signal handler, then ask the daemon to route matching
    /// signals here with `AddMatch`.
    pub async fn listen<F>(&self, rule: MatchRule, callback: F) -> Result<(), CallError>
    where
        F: Fn(&Signal) + Send + Sync + 'static,
    {
        self.inner.handlers.lock().push(SignalHandler {
            rule: rule.clone(),
            callback: Arc::new(callback),
        });
        let add_match = MethodCall::new(bus_path(), MemberName::from_static("AddMatch"))
            .with_interface(bus_interface())
            .with_destination(bus_name())
            .with_body(vec![Variant::from(rule.to_string())]);
        self.call(add_match).await.map(|_| ())
    }

    /// Export members under a path. Repeated exports merge at the member
    /// level; a member exported twice is replaced.
    pub fn export(&self, path: ObjectPath, members: Vec<Member>) {
        let mut objects = self.inner.objects.lock();
        let object = objects.entry(path).or_default();
        for member in members {
            match member {
                Member::Method {
                    interface,
                    member,
                    in_sig,
                    out_sig,
                    handler,
                } => {
                    object.entry(interface).or_default().insert(
                        member,
                        MemberInfo::Method {
                            in_sig,
                            out_sig,
                            handler,
                        },
                    );
                }
                Member::Signal {
                    interface,
                    member,
                    signature,
                } => {
                    object
                        .entry(interface)
                        .or_default()
                        .insert(member, MemberInfo::Signal(signature));
                }
            }
        }
    }

    /// Remove everything exported under a path.
    pub fn unexport(&self, path: &ObjectPath) {
        self.inner.objects.lock().remove(path);
    }

    /// Ask the daemon for ownership of a well-known name.
    pub async fn request_name(
        &self,
        name: BusName,
        flags: RequestNameFlags,
    ) -> Result<RequestNameReply, CallError> {
        let call = MethodCall::new(bus_path(), MemberName::from_static("RequestName"))
            .with_interface(bus_interface())
            .with_destination(bus_name())
            .with_body(vec![name.to_variant(), flags.bits().to_variant()]);
        let reply = self.call(call).await?;
        reply
            .body
            .first()
            .and_then(u32::from_variant)
            .and_then(RequestNameReply::from_code)
            .ok_or_else(|| CallError::Client(ClientError::new("malformed RequestName reply")))
    }

    /// Release a well-known name.
    pub async fn release_name(&self, name: BusName) -> Result<ReleaseNameReply, CallError> {
        let call = MethodCall::new(bus_path(), MemberName::from_static("ReleaseName"))
            .with_interface(bus_interface())
            .with_destination(bus_name())
            .with_body(vec![name.to_variant()]);
        let reply = self.call(call).await?;
        reply
            .body
            .first()
            .and_then(u32::from_variant)
            .and_then(ReleaseNameReply::from_code)
            .ok_or_else(|| CallError::Client(ClientError::new("malformed ReleaseName reply")))
    }

    /// Tear the connection down: cancel the receive loop, fail every
    /// pending call, clear handlers and exports, close the socket.
    /// Idempotent.
    pub async fn disconnect(&self) {
        self.inner.teardown().await;
    }
}

impl ClientInner {
    async fn teardown(&self) {
        {
            let mut state = self.state.lock();
            if *state == ConnectionState::Closed {
                return;
            }
            *state = ConnectionState::Closed;
        }

        let drained: Vec<(Serial, ReplySlot)> = self.pending.lock().drain().collect();
        for (serial, slot) in drained {
            let _ = slot.send(Err(CallError::Client(
                ClientError::new("connection closed during call").with_serial(serial),
            )));
        }
        self.handlers.lock().clear();
        self.objects.lock().clear();

        self.socket.close().await;

        // last, so a teardown running on the receive task itself still
        // finishes the work above
        if let Some(handle) = self.receiver.lock().take() {
            handle.abort();
        }
        debug!("disconnected");
    }
}

/// The sole reader of the socket. Hands every message to a fresh task.
async fn receive_loop(inner: Arc<ClientInner>) {
    loop {
        match inner.socket.receive().await {
            Ok(received) => {
                trace!(serial = received.serial().raw(), "dispatching");
                let inner = inner.clone();
                tokio::spawn(dispatch(inner, received));
            }
            Err(e) => {
                let closed = *inner.state.lock() == ConnectionState::Closed;
                if !closed {
                    warn!(error = %e, "receive failed; tearing down");
                    inner.teardown().await;
                }
                return;
            }
        }
    }
}

async fn dispatch(inner: Arc<ClientInner>, received: ReceivedMessage) {
    match received {
        ReceivedMessage::MethodReturn(_, reply) => {
            let slot = inner.pending.lock().remove(&reply.reply_serial);
            match slot {
                Some(tx) => {
                    let _ = tx.send(Ok(reply));
                }
                None => trace!(
                    reply_serial = reply.reply_serial.raw(),
                    "reply for unknown serial dropped"
                ),
            }
        }
        ReceivedMessage::Error(_, error) => {
            let slot = inner.pending.lock().remove(&error.reply_serial);
            match slot {
                Some(tx) => {
                    let _ = tx.send(Err(CallError::Method(error)));
                }
                None => trace!(
                    reply_serial = error.reply_serial.raw(),
                    "error for unknown serial dropped"
                ),
            }
        }
        ReceivedMessage::Signal(_, signal) => {
            let handlers: Vec<SignalHandler> = inner.handlers.lock().clone();
            for handler in handlers {
                if handler.rule.matches(&signal) {
                    (handler.callback)(&signal);
                }
            }
        }
        ReceivedMessage::MethodCall(serial, call) => {
            dispatch_method_call(inner, serial, call).await;
        }
    }
}

enum Lookup {
    Method(MethodHandler),
    Introspect(String),
    NotFound,
}

async fn dispatch_method_call(inner: Arc<ClientInner>, serial: Serial, call: MethodCall) {
    let reply_expected = !call.flags.contains(MessageFlags::NO_REPLY_EXPECTED);
    let reply_to = call.sender.clone();

    let reply = match find_member(&inner, &call) {
        Lookup::Method(handler) => run_handler(handler, call).await,
        Lookup::Introspect(xml) => Reply::Return(vec![Variant::from(xml)]),
        Lookup::NotFound => Reply::Error(error_unknown_method(), Vec::new()),
    };

    if !reply_expected {
        return;
    }
    let message = match reply {
        Reply::Return(body) => {
            let mut reply = MethodReturn::new(serial).with_body(body);
            reply.destination = reply_to;
            Message::MethodReturn(reply)
        }
        Reply::Error(name, body) => {
            let mut reply = MethodError::new(name, serial).with_body(body);
            reply.destination = reply_to;
            Message::Error(reply)
        }
    };
    if *inner.state.lock() == ConnectionState::Closed {
        return;
    }
    if let Err(e) = inner.socket.send(message, Box::new(|_| {})).await {
        warn!(error = %e, "failed to send reply");
    }
}

fn find_member(inner: &ClientInner, call: &MethodCall) -> Lookup {
    let objects = inner.objects.lock();
    if let Some(interface) = &call.interface {
        let info = objects
            .get(&call.path)
            .and_then(|object| object.get(interface))
            .and_then(|members| members.get(&call.member));
        if let Some(MemberInfo::Method { handler, .. }) = info {
            return Lookup::Method(handler.clone());
        }

        // built-in introspection for any registered path; the root always
        // answers, registered or not
        if *interface == introspectable_interface()
            && call.member.as_str() == "Introspect"
            && (call.path == root_path() || objects.contains_key(&call.path))
        {
            if let Some(xml) = introspect_path(&objects, &call.path) {
                return Lookup::Introspect(xml);
            }
        }
    }
    Lookup::NotFound
}

/// Run a handler on its own task so a panic inside it becomes an error
/// reply instead of taking the dispatch task down.
async fn run_handler(handler: MethodHandler, call: MethodCall) -> Reply {
    let future = handler(call);
    match tokio::spawn(future).await {
        Ok(reply) => reply,
        Err(join_error) => {
            let text = if join_error.is_panic() {
                panic_text(join_error.into_panic())
            } else {
                "method handler was cancelled".to_owned()
            };
            warn!(error = %text, "method handler failed");
            Reply::Error(error_failed(), vec![Variant::from(text)])
        }
    }
}

fn panic_text(payload: Box<dyn std::any::Any + Send>) -> String {
    if let Some(text) = payload.downcast_ref::<&str>() {
        (*text).to_owned()
    } else if let Some(text) = payload.downcast_ref::<String>() {
        text.clone()
    } else {
        "method handler panicked".to_owned()
    }
}

/// Build the introspection document for a path out of the live registry.
fn introspect_path(
    objects: &HashMap<ObjectPath, ObjectMembers>,
    path: &ObjectPath,
) -> Option<String> {
    let mut object = introspect::Object::new(path.clone());
    if let Some(members) = objects.get(path) {
        object.interfaces = build_interfaces(members);
    }
    if *path == root_path() {
        for child in objects.keys() {
            if *child != root_path() {
                object.children.push(introspect::Object::new(child.clone()));
            }
        }
        object
            .children
            .sort_by(|a, b| a.path.as_str().cmp(b.path.as_str()));
    }
    introspect::to_xml(&object)
}

fn build_interfaces(members: &ObjectMembers) -> Vec<introspect::Interface> {
    let mut interfaces: Vec<introspect::Interface> = members
        .iter()
        .map(|(name, members)| {
            let mut interface = introspect::Interface::new(name.clone());
            for (member, info) in members {
                match info {
                    MemberInfo::Method { in_sig, out_sig, .. } => {
                        interface.methods.push(introspect::Method {
                            name: member.clone(),
                            args: introspect::method_args(in_sig, out_sig),
                        });
                    }
                    MemberInfo::Signal(signature) => {
                        interface.signals.push(introspect::Signal {
                            name: member.clone(),
                            args: introspect::signal_args(signature),
                        });
                    }
                }
            }
            interface.methods.sort_by(|a, b| a.name.cmp(&b.name));
            interface.signals.sort_by(|a, b| a.name.cmp(&b.name));
            interface
        })
        .collect();
    interfaces.sort_by(|a, b| a.name.cmp(&b.name));
    interfaces
}
