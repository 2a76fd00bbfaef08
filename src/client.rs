use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use bytes::Bytes;
use thiserror::Error;
use tokio::sync::{mpsc, watch};
use tracing::{debug, trace};

use crate::codec::{self, ProtocolError, StompItem};
use crate::frame::{Command, Frame};
use crate::heartbeat;
use crate::subscription::{AckHandle, Delivery, MessageCallback, Registry, Subscription};
use crate::transport::{
    TcpTransport, Transport, TransportConfig, TransportError, TransportEvent, TransportSink,
};

/// Protocol versions offered in the CONNECT frame.
pub const ACCEPT_VERSIONS: &str = "1.0,1.1,1.2";

/// Errors returned by [`Client`] operations.
#[derive(Error, Debug)]
pub enum ClientError {
    /// `connect` did not observe the transport open before the deadline.
    /// The transport is left running; the caller may retry.
    #[error("connection to {0} timed out")]
    ConnectionTimeout(String),
    /// Failure in the underlying transport.
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),
    /// Malformed frame on the wire.
    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),
    /// ack/nack/unsubscribe referenced a subscription id that is not
    /// registered on this connection.
    #[error("unknown subscription '{0}'")]
    UnknownSubscription(String),
}

/// Connection parameters for [`Client::connect`].
#[derive(Clone, Debug)]
pub struct ConnectOptions {
    /// Optional `login` header for CONNECT.
    pub login: Option<String>,
    /// Optional `passcode` header for CONNECT.
    pub passcode: Option<String>,
    /// `host` header; defaults to the connection url.
    pub host: Option<String>,
    /// Extra CONNECT headers. Protocol-mandated keys (`host`,
    /// `accept-version`, `heart-beat`) are always engine-owned.
    pub headers: Vec<(String, String)>,
    /// Extra transport handshake headers (e.g. for a WebSocket upgrade
    /// request). Forwarded to the transport, never placed on the CONNECT
    /// frame; plain TCP ignores them.
    pub transport_headers: Vec<(String, String)>,
    /// How long `connect` waits for the transport to open, in
    /// milliseconds. `0` waits indefinitely.
    pub timeout_ms: u64,
    /// Heartbeat interval offered in the `heart-beat` header, in
    /// milliseconds (guarantee and request, symmetric).
    pub heartbeat_ms: u64,
    /// TLS verification policy forwarded to the transport.
    pub verify_tls: bool,
}

impl Default for ConnectOptions {
    fn default() -> Self {
        Self {
            login: None,
            passcode: None,
            host: None,
            headers: Vec::new(),
            transport_headers: Vec::new(),
            timeout_ms: 0,
            heartbeat_ms: 0,
            verify_tls: true,
        }
    }
}

impl ConnectOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn login(mut self, login: impl Into<String>) -> Self {
        self.login = Some(login.into());
        self
    }

    pub fn passcode(mut self, passcode: impl Into<String>) -> Self {
        self.passcode = Some(passcode.into());
        self
    }

    pub fn host(mut self, host: impl Into<String>) -> Self {
        self.host = Some(host.into());
        self
    }

    pub fn header(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((key.into(), value.into()));
        self
    }

    pub fn transport_header(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.transport_headers.push((key.into(), value.into()));
        self
    }

    pub fn timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.timeout_ms = timeout_ms;
        self
    }

    pub fn heartbeat_ms(mut self, heartbeat_ms: u64) -> Self {
        self.heartbeat_ms = heartbeat_ms;
        self
    }

    pub fn verify_tls(mut self, verify_tls: bool) -> Self {
        self.verify_tls = verify_tls;
        self
    }
}

/// Lifecycle callbacks, all optional.
///
/// Every callback runs on the connection's dispatch task; blocking there
/// stalls all further inbound handling. A panicking callback unwinds the
/// dispatch task and stops dispatch for this connection (failures are not
/// isolated).
#[derive(Clone, Default)]
pub struct Callbacks {
    pub(crate) on_connect: Option<Arc<dyn Fn(Frame) + Send + Sync>>,
    pub(crate) on_error: Option<Arc<dyn Fn(Frame) + Send + Sync>>,
    pub(crate) on_heartbeat: Option<Arc<dyn Fn() + Send + Sync>>,
}

impl Callbacks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Invoked with the CONNECTED frame once the broker accepts the
    /// session.
    pub fn on_connect(mut self, f: impl Fn(Frame) + Send + Sync + 'static) -> Self {
        self.on_connect = Some(Arc::new(f));
        self
    }

    /// Invoked with every broker ERROR frame. Without a registered
    /// callback, ERROR frames are dropped at the API boundary.
    pub fn on_error(mut self, f: impl Fn(Frame) + Send + Sync + 'static) -> Self {
        self.on_error = Some(Arc::new(f));
        self
    }

    /// Invoked for every protocol-level heartbeat (bare LF) received.
    pub fn on_heartbeat(mut self, f: impl Fn() + Send + Sync + 'static) -> Self {
        self.on_heartbeat = Some(Arc::new(f));
        self
    }
}

struct Shared {
    url: String,
    sink: Arc<dyn TransportSink>,
    registry: Mutex<Registry>,
    /// True only after a CONNECTED frame; false again on transport close.
    connected: AtomicBool,
    /// Set by `disconnect` so the resulting close notification does not
    /// re-trigger teardown.
    closing: AtomicBool,
}

/// A single STOMP connection.
///
/// Owns the transport, drives the CONNECT handshake, and routes inbound
/// frames to the registered callbacks from one background dispatch task.
/// Cloning yields another handle to the same connection. Operations other
/// than [`Client::connect`] hand off synchronously to the transport's send
/// primitive.
#[derive(Clone)]
pub struct Client {
    shared: Arc<Shared>,
}

impl Client {
    /// Connect over an arbitrary [`Transport`].
    ///
    /// Starts the transport, spawns the dispatch task, and waits until the
    /// transport signals liveness (open, error, or close all count: the
    /// wait is a liveness gate, not a protocol gate). A `timeout_ms` of 0
    /// waits indefinitely; otherwise expiry fails with
    /// [`ClientError::ConnectionTimeout`]. Once live, the CONNECT frame is
    /// transmitted; this method does not wait for the CONNECTED reply,
    /// which is delivered through [`Callbacks::on_connect`].
    pub async fn connect(
        transport: Box<dyn Transport>,
        url: &str,
        options: ConnectOptions,
        callbacks: Callbacks,
    ) -> Result<Client, ClientError> {
        let config = TransportConfig {
            verify_tls: options.verify_tls,
            headers: options.transport_headers.clone(),
        };
        let (sink, events) = transport.start(url, &config);

        let shared = Arc::new(Shared {
            url: url.to_string(),
            sink,
            registry: Mutex::new(Registry::new()),
            connected: AtomicBool::new(false),
            closing: AtomicBool::new(false),
        });

        let (opened_tx, mut opened_rx) = watch::channel(false);
        tokio::spawn(dispatch(shared.clone(), events, callbacks, opened_tx));

        let opened = async {
            loop {
                if *opened_rx.borrow_and_update() {
                    break;
                }
                if opened_rx.changed().await.is_err() {
                    break;
                }
            }
        };
        if options.timeout_ms > 0 {
            tokio::time::timeout(Duration::from_millis(options.timeout_ms), opened)
                .await
                .map_err(|_| ClientError::ConnectionTimeout(url.to_string()))?;
        } else {
            opened.await;
        }

        let client = Client { shared };

        let mut frame = Frame::new(Command::Connect);
        for (k, v) in &options.headers {
            frame = frame.header(k.clone(), v.clone());
        }
        frame = frame
            .set_header("host", options.host.as_deref().unwrap_or(url))
            .set_header("accept-version", ACCEPT_VERSIONS)
            .set_header("heart-beat", heartbeat::heart_beat_header(options.heartbeat_ms));
        if let Some(login) = &options.login {
            frame = frame.set_header("login", login.clone());
        }
        if let Some(passcode) = &options.passcode {
            frame = frame.set_header("passcode", passcode.clone());
        }
        client.transmit(frame)?;

        Ok(client)
    }

    /// Connect over plain TCP. Convenience wrapper around
    /// [`Client::connect`] with [`TcpTransport`].
    pub async fn connect_tcp(
        addr: &str,
        options: ConnectOptions,
        callbacks: Callbacks,
    ) -> Result<Client, ClientError> {
        Self::connect(Box::new(TcpTransport::new()), addr, options, callbacks).await
    }

    /// Whether a CONNECTED frame has been received and the transport has
    /// not closed since.
    pub fn is_connected(&self) -> bool {
        self.shared.connected.load(Ordering::SeqCst)
    }

    /// The url this client was connected to.
    pub fn url(&self) -> &str {
        &self.shared.url
    }

    fn transmit(&self, frame: Frame) -> Result<(), ClientError> {
        trace!("sending {} frame", frame.command);
        let bytes = codec::marshal(&frame);
        self.shared.sink.send(bytes)?;
        Ok(())
    }

    /// Send a message to a destination. Fire-and-forget: no delivery
    /// confirmation is awaited.
    pub fn send(
        &self,
        destination: &str,
        headers: Vec<(String, String)>,
        body: impl Into<Vec<u8>>,
    ) -> Result<(), ClientError> {
        let mut frame = Frame::new(Command::Send).set_body(body);
        for (k, v) in headers {
            frame = frame.header(k, v);
        }
        frame = frame.set_header("destination", destination);
        self.transmit(frame)
    }

    /// Subscribe to a destination. The callback fires once per MESSAGE
    /// frame routed to this subscription, with an [`AckHandle`] attached.
    pub fn subscribe(
        &self,
        destination: &str,
        callback: impl Fn(Delivery) + Send + Sync + 'static,
    ) -> Result<Subscription, ClientError> {
        self.subscribe_with_headers(destination, callback, Vec::new())
    }

    /// Subscribe with extra SUBSCRIBE headers. A caller-supplied `id`
    /// header is used as the subscription id; otherwise the registry mints
    /// one (`sub-0`, `sub-1`, ...).
    pub fn subscribe_with_headers(
        &self,
        destination: &str,
        callback: impl Fn(Delivery) + Send + Sync + 'static,
        headers: Vec<(String, String)>,
    ) -> Result<Subscription, ClientError> {
        let callback: MessageCallback = Arc::new(callback);
        let id = {
            let mut registry = self.shared.registry.lock().expect("registry poisoned");
            let id = headers
                .iter()
                .find(|(k, _)| k == "id")
                .map(|(_, v)| v.clone())
                .unwrap_or_else(|| registry.mint_id());
            registry.insert(id.clone(), destination.to_string(), callback);
            id
        };

        let mut frame = Frame::new(Command::Subscribe);
        for (k, v) in headers {
            frame = frame.header(k, v);
        }
        frame = frame
            .set_header("destination", destination)
            .set_header("id", id.clone());
        if let Err(e) = self.transmit(frame) {
            // Roll back: a registration the broker never saw must not
            // linger for disconnect to unsubscribe.
            self.shared
                .registry
                .lock()
                .expect("registry poisoned")
                .remove(&id);
            return Err(e);
        }

        Ok(Subscription::new(id, destination.to_string(), self.clone()))
    }

    /// Remove a subscription and send UNSUBSCRIBE.
    ///
    /// An id with no registration fails with
    /// [`ClientError::UnknownSubscription`] and sends nothing.
    pub fn unsubscribe(&self, id: &str) -> Result<(), ClientError> {
        let removed = self
            .shared
            .registry
            .lock()
            .expect("registry poisoned")
            .remove(id);
        match removed {
            Some(entry) => {
                debug!("unsubscribing '{}' from {}", id, entry.destination);
                self.transmit(Frame::new(Command::Unsubscribe).header("id", id))
            }
            None => Err(ClientError::UnknownSubscription(id.to_string())),
        }
    }

    /// Acknowledge a delivered message.
    ///
    /// The engine owns the `message-id` and `subscription` headers; they
    /// override caller-supplied duplicates.
    pub fn ack(
        &self,
        message_id: &str,
        subscription_id: &str,
        headers: Vec<(String, String)>,
    ) -> Result<(), ClientError> {
        self.acknowledge(Command::Ack, message_id, subscription_id, headers)
    }

    /// Negatively acknowledge a delivered message.
    pub fn nack(
        &self,
        message_id: &str,
        subscription_id: &str,
        headers: Vec<(String, String)>,
    ) -> Result<(), ClientError> {
        self.acknowledge(Command::Nack, message_id, subscription_id, headers)
    }

    fn acknowledge(
        &self,
        command: Command,
        message_id: &str,
        subscription_id: &str,
        headers: Vec<(String, String)>,
    ) -> Result<(), ClientError> {
        let known = self
            .shared
            .registry
            .lock()
            .expect("registry poisoned")
            .contains(subscription_id);
        if !known {
            return Err(ClientError::UnknownSubscription(subscription_id.to_string()));
        }
        let mut frame = Frame::new(command);
        for (k, v) in headers {
            frame = frame.header(k, v);
        }
        frame = frame
            .set_header("message-id", message_id)
            .set_header("subscription", subscription_id);
        self.transmit(frame)
    }

    /// Gracefully tear down the connection.
    ///
    /// Unsubscribes every active subscription, sends DISCONNECT, closes
    /// the transport, and resets the connected flag. Idempotent, and safe
    /// to call on a connection that never fully connected; transmit
    /// failures during teardown are logged rather than returned.
    pub fn disconnect(&self) {
        self.disconnect_with(Vec::new(), None)
    }

    /// [`Client::disconnect`] with extra DISCONNECT headers and an
    /// optional completion callback, invoked after teardown.
    pub fn disconnect_with(
        &self,
        headers: Vec<(String, String)>,
        on_disconnect: Option<Box<dyn FnOnce() + Send>>,
    ) {
        self.shared.closing.store(true, Ordering::SeqCst);

        // Snapshot: unsubscribe mutates the registry.
        let ids = self
            .shared
            .registry
            .lock()
            .expect("registry poisoned")
            .ids();
        for id in ids {
            if let Err(e) = self.unsubscribe(&id) {
                debug!("unsubscribe of '{}' during disconnect failed: {}", id, e);
            }
        }

        let mut frame = Frame::new(Command::Disconnect);
        for (k, v) in headers {
            frame = frame.header(k, v);
        }
        if let Err(e) = self.transmit(frame) {
            debug!("DISCONNECT transmit failed: {}", e);
        }

        self.shared.sink.close();
        self.shared.connected.store(false, Ordering::SeqCst);

        if let Some(f) = on_disconnect {
            f();
        }
    }
}

/// Acknowledge the message behind `handle`. Free-function mirror of
/// [`Client::ack`] for use with a [`Delivery`]'s handle.
pub fn ack(
    client: &Client,
    handle: &AckHandle,
    headers: Vec<(String, String)>,
) -> Result<(), ClientError> {
    client.ack(&handle.message_id, &handle.subscription_id, headers)
}

/// Negatively acknowledge the message behind `handle`.
pub fn nack(
    client: &Client,
    handle: &AckHandle,
    headers: Vec<(String, String)>,
) -> Result<(), ClientError> {
    client.nack(&handle.message_id, &handle.subscription_id, headers)
}

/// Per-connection dispatch loop. Runs on its own task for the lifetime of
/// the transport; every inbound event is handled here, strictly
/// sequentially.
async fn dispatch(
    shared: Arc<Shared>,
    mut events: mpsc::Receiver<TransportEvent>,
    callbacks: Callbacks,
    opened: watch::Sender<bool>,
) {
    while let Some(event) = events.recv().await {
        match event {
            TransportEvent::Open => {
                let _ = opened.send(true);
            }
            TransportEvent::Message(bytes) => {
                handle_message(&shared, &callbacks, &bytes);
            }
            TransportEvent::Ping(_) => {
                // Transport-level keepalive: answer immediately with a pong.
                let _ = shared.sink.send(Bytes::from_static(heartbeat::HEARTBEAT));
            }
            TransportEvent::Pong(_) => {
                trace!("transport pong");
            }
            TransportEvent::Error(e) => {
                // Unblock a pending connect; the connection may or may not
                // still be usable.
                let _ = opened.send(true);
                if !shared.closing.load(Ordering::SeqCst) {
                    debug!("transport error: {}", e);
                }
            }
            TransportEvent::Closed { code, reason } => {
                let _ = opened.send(true);
                shared.connected.store(false, Ordering::SeqCst);
                if !shared.closing.load(Ordering::SeqCst) {
                    debug!(
                        "lost connection to {} (code {:?}): {}",
                        shared.url, code, reason
                    );
                }
            }
        }
    }
}

fn handle_message(shared: &Arc<Shared>, callbacks: &Callbacks, bytes: &[u8]) {
    let item = match codec::unmarshal(bytes) {
        Ok(item) => item,
        Err(e) => {
            debug!("discarding malformed frame: {}", e);
            return;
        }
    };
    let frame = match item {
        StompItem::Heartbeat => {
            if let Some(cb) = &callbacks.on_heartbeat {
                cb();
            }
            return;
        }
        StompItem::Frame(frame) => frame,
    };

    match frame.command {
        Command::Connected => {
            shared.connected.store(true, Ordering::SeqCst);
            if let Some(hb) = frame.get_header("heart-beat") {
                let (sx, sy) = heartbeat::parse_heartbeat_header(hb);
                debug!("connected to {} (server heart-beat {},{})", shared.url, sx, sy);
            } else {
                debug!("connected to {}", shared.url);
            }
            if let Some(cb) = &callbacks.on_connect {
                cb(frame);
            }
        }
        Command::Message => {
            let subscription_id = frame.get_header("subscription").map(str::to_string);
            // Clone the callback out so the registry lock is not held
            // while application code runs.
            let callback = subscription_id.as_ref().and_then(|id| {
                shared
                    .registry
                    .lock()
                    .expect("registry poisoned")
                    .callback(id)
            });
            match (subscription_id, callback) {
                (Some(id), Some(callback)) => {
                    let message_id = frame
                        .get_header("message-id")
                        .unwrap_or_default()
                        .to_string();
                    let handle = AckHandle {
                        message_id,
                        subscription_id: id,
                    };
                    callback(Delivery { frame, ack: handle });
                }
                _ => debug!("unhandled MESSAGE frame: {}", frame),
            }
        }
        Command::Receipt => {
            // Reserved for future receipt correlation.
        }
        Command::Error => {
            if let Some(cb) = &callbacks.on_error {
                cb(frame);
            }
        }
        other => debug!("unhandled {} frame", other),
    }
}
