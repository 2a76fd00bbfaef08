pub mod client;
pub mod codec;
pub mod frame;
pub mod heartbeat;
pub mod subscription;
pub mod transport;

pub use client::{ACCEPT_VERSIONS, Callbacks, Client, ClientError, ConnectOptions, ack, nack};
pub use codec::{ProtocolError, StompItem, marshal, unmarshal};
pub use frame::{Command, Frame};
pub use heartbeat::{heart_beat_header, is_heartbeat, parse_heartbeat_header};
pub use subscription::{AckHandle, Delivery, Subscription};
pub use transport::{
    FrameSplitter, TcpTransport, Transport, TransportConfig, TransportError, TransportEvent,
    TransportSink,
};
