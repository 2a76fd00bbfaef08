//! Shared test helpers: a scripted in-memory transport implementing the
//! transport adapter contract, plus frame-capture utilities.
#![allow(dead_code)]

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use bytes::Bytes;
use tokio::sync::mpsc;

use rhodium_stomp::{
    Callbacks, Client, ConnectOptions, Frame, StompItem, Transport, TransportConfig,
    TransportError, TransportEvent, TransportSink, unmarshal,
};

/// Test-side controls for a [`MockTransport`]: inject inbound events,
/// observe outbound bytes, inspect the config the transport was started
/// with, and check whether the sink was closed.
pub struct MockHandle {
    pub events: mpsc::Sender<TransportEvent>,
    pub sent: mpsc::UnboundedReceiver<Bytes>,
    pub config: Arc<Mutex<Option<TransportConfig>>>,
    pub closed: Arc<AtomicBool>,
}

pub struct MockTransport {
    event_rx: mpsc::Receiver<TransportEvent>,
    sent_tx: mpsc::UnboundedSender<Bytes>,
    config: Arc<Mutex<Option<TransportConfig>>>,
    closed: Arc<AtomicBool>,
}

struct MockSink {
    sent_tx: mpsc::UnboundedSender<Bytes>,
    closed: Arc<AtomicBool>,
}

impl TransportSink for MockSink {
    fn send(&self, data: Bytes) -> Result<(), TransportError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(TransportError::Closed);
        }
        self.sent_tx.send(data).map_err(|_| TransportError::Closed)
    }

    fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }
}

impl Transport for MockTransport {
    fn start(
        self: Box<Self>,
        _url: &str,
        config: &TransportConfig,
    ) -> (Arc<dyn TransportSink>, mpsc::Receiver<TransportEvent>) {
        *self.config.lock().unwrap() = Some(config.clone());
        (
            Arc::new(MockSink {
                sent_tx: self.sent_tx,
                closed: self.closed,
            }),
            self.event_rx,
        )
    }
}

pub fn mock_transport() -> (MockTransport, MockHandle) {
    let (event_tx, event_rx) = mpsc::channel(32);
    let (sent_tx, sent_rx) = mpsc::unbounded_channel();
    let config = Arc::new(Mutex::new(None));
    let closed = Arc::new(AtomicBool::new(false));
    (
        MockTransport {
            event_rx,
            sent_tx,
            config: config.clone(),
            closed: closed.clone(),
        },
        MockHandle {
            events: event_tx,
            sent: sent_rx,
            config,
            closed,
        },
    )
}

/// Unmarshal captured outbound bytes, asserting they form a frame.
pub fn sent_frame(bytes: &Bytes) -> Frame {
    match unmarshal(bytes).expect("captured bytes did not unmarshal") {
        StompItem::Frame(f) => f,
        StompItem::Heartbeat => panic!("expected a frame, captured a heartbeat"),
    }
}

pub const TEST_URL: &str = "stomp.test:61613";

/// Connect a client over a mock transport that opens immediately, with the
/// CONNECT frame already drained from the capture channel.
pub async fn open_client(options: ConnectOptions, callbacks: Callbacks) -> (Client, MockHandle) {
    let (transport, mut handle) = mock_transport();
    handle
        .events
        .send(TransportEvent::Open)
        .await
        .expect("event channel closed");
    let client = Client::connect(
        Box::new(transport),
        TEST_URL,
        options.timeout_ms(2_000),
        callbacks,
    )
    .await
    .expect("connect failed");
    let connect = handle.sent.recv().await.expect("no CONNECT captured");
    assert_eq!(sent_frame(&connect).command, rhodium_stomp::Command::Connect);
    (client, handle)
}
