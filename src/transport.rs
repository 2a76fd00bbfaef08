use std::io;
use std::sync::Arc;

use bytes::{Buf, Bytes, BytesMut};
use futures::StreamExt;
use thiserror::Error;
use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_util::codec::{Decoder, FramedRead};
use tracing::debug;

/// Errors surfaced by a transport's send/receive paths.
#[derive(Error, Debug)]
pub enum TransportError {
    /// I/O-level error
    #[error("io error: {0}")]
    Io(#[from] io::Error),
    /// The transport has been closed; no further sends are possible.
    #[error("transport closed")]
    Closed,
}

/// Configuration handed to a transport when it starts.
#[derive(Debug, Clone)]
pub struct TransportConfig {
    /// TLS certificate/hostname verification policy. Opaque to the engine;
    /// TLS-capable transports honor it, plain-TCP ignores it.
    pub verify_tls: bool,
    /// Extra handshake headers (e.g. for a WebSocket upgrade request).
    pub headers: Vec<(String, String)>,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            verify_tls: true,
            headers: Vec::new(),
        }
    }
}

/// Notifications emitted by a transport on its event stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    /// The underlying channel is open and writable.
    Open,
    /// One complete STOMP frame or heartbeat.
    Message(Bytes),
    /// Transport-level ping control frame (lower layer than STOMP
    /// heartbeats).
    Ping(Bytes),
    /// Transport-level pong control frame.
    Pong(Bytes),
    /// A transport failure; the channel may or may not still be usable.
    Error(String),
    /// The channel is closed. Terminal.
    Closed {
        code: Option<u16>,
        reason: String,
    },
}

/// Outbound half of a transport.
///
/// `send` hands bytes off synchronously and must be safe to call
/// concurrently with the transport's receive path; implementations own
/// that thread-safety (typically via an unbounded channel into a writer
/// task).
pub trait TransportSink: Send + Sync {
    /// Queue bytes for transmission.
    fn send(&self, data: Bytes) -> Result<(), TransportError>;
    /// Ask the transport to shut down. Idempotent.
    fn close(&self);
}

/// An asynchronous duplex channel carrying complete STOMP messages.
///
/// `start` kicks off the transport's background I/O immediately and
/// returns the outbound sink plus the inbound event stream; the open
/// notification (or a connect failure) arrives as an event. The only
/// framing guarantee required is that each [`TransportEvent::Message`]
/// carries one complete STOMP frame or heartbeat.
pub trait Transport: Send + 'static {
    fn start(
        self: Box<Self>,
        url: &str,
        config: &TransportConfig,
    ) -> (Arc<dyn TransportSink>, mpsc::Receiver<TransportEvent>);
}

/// Splits a raw byte stream into complete STOMP messages.
///
/// A leading LF is a heartbeat; anything else runs through the
/// frame-terminating NUL. Emits raw [`Bytes`] (terminator included) and
/// leaves parsing to the engine's codec.
pub struct FrameSplitter {
    _priv: (),
}

impl FrameSplitter {
    pub fn new() -> Self {
        Self { _priv: () }
    }
}

impl Default for FrameSplitter {
    fn default() -> Self {
        Self::new()
    }
}

impl Decoder for FrameSplitter {
    type Item = Bytes;
    type Error = io::Error;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        match src.chunk().first() {
            None => Ok(None),
            Some(&b'\n') => Ok(Some(src.split_to(1).freeze())),
            Some(_) => match src.chunk().iter().position(|&b| b == 0) {
                Some(nul) => Ok(Some(src.split_to(nul + 1).freeze())),
                None => Ok(None),
            },
        }
    }
}

enum SinkCmd {
    Data(Bytes),
    Close,
}

struct TcpSink {
    tx: mpsc::UnboundedSender<SinkCmd>,
}

impl TransportSink for TcpSink {
    fn send(&self, data: Bytes) -> Result<(), TransportError> {
        self.tx
            .send(SinkCmd::Data(data))
            .map_err(|_| TransportError::Closed)
    }

    fn close(&self) {
        let _ = self.tx.send(SinkCmd::Close);
    }
}

/// Plain-TCP transport.
///
/// Connects with `tokio::net::TcpStream`, splits the inbound byte stream
/// with [`FrameSplitter`], and drains an unbounded writer channel so
/// `send` never blocks the caller. TCP has no ping/pong control frames, so
/// those events are never emitted, and `verify_tls` is ignored.
pub struct TcpTransport;

impl TcpTransport {
    pub fn new() -> Self {
        Self
    }
}

impl Default for TcpTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl Transport for TcpTransport {
    fn start(
        self: Box<Self>,
        url: &str,
        _config: &TransportConfig,
    ) -> (Arc<dyn TransportSink>, mpsc::Receiver<TransportEvent>) {
        let (event_tx, event_rx) = mpsc::channel(64);
        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
        let addr = url.to_string();
        tokio::spawn(run_tcp(addr, event_tx, cmd_rx));
        (Arc::new(TcpSink { tx: cmd_tx }), event_rx)
    }
}

async fn run_tcp(
    addr: String,
    event_tx: mpsc::Sender<TransportEvent>,
    mut cmd_rx: mpsc::UnboundedReceiver<SinkCmd>,
) {
    let stream = match TcpStream::connect(&addr).await {
        Ok(stream) => stream,
        Err(e) => {
            debug!("tcp connect to {} failed: {}", addr, e);
            let _ = event_tx.send(TransportEvent::Error(e.to_string())).await;
            let _ = event_tx
                .send(TransportEvent::Closed {
                    code: None,
                    reason: "connect failed".to_string(),
                })
                .await;
            return;
        }
    };

    let _ = event_tx.send(TransportEvent::Open).await;

    let (read_half, mut write_half) = stream.into_split();
    let mut messages = FramedRead::new(read_half, FrameSplitter::new());

    loop {
        tokio::select! {
            cmd = cmd_rx.recv() => match cmd {
                Some(SinkCmd::Data(data)) => {
                    if let Err(e) = write_half.write_all(&data).await {
                        let _ = event_tx.send(TransportEvent::Error(e.to_string())).await;
                        break;
                    }
                }
                Some(SinkCmd::Close) | None => break,
            },
            item = messages.next() => match item {
                Some(Ok(msg)) => {
                    if event_tx.send(TransportEvent::Message(msg)).await.is_err() {
                        break;
                    }
                }
                Some(Err(e)) => {
                    let _ = event_tx.send(TransportEvent::Error(e.to_string())).await;
                    break;
                }
                None => break,
            },
        }
    }

    let _ = write_half.shutdown().await;
    let _ = event_tx
        .send(TransportEvent::Closed {
            code: None,
            reason: "connection closed".to_string(),
        })
        .await;
}
