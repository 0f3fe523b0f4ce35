//! Serial link to the microcontroller
//!
//! The link is a byte stream with independent read and write halves.
//! [`LinkConnector`] owns the connection lifecycle, runs the read task that
//! feeds [`FrameParser`], and reports connection events and decoded packets
//! to a [`ConnectorListener`].
//!
//! Device references:
//! - A character device path, e.g. `/dev/rfcomm0` for a Bluetooth serial
//!   port bound with `rfcomm bind`
//! - `tcp://host:port` for bench simulators and serial-to-TCP bridges

pub mod connector;
pub mod frame;
pub mod serial;

pub use connector::{ConnectionState, LinkConnector};
pub use frame::{FrameParser, Packet, PacketType};

use crate::error::LinkError;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::mpsc;

/// Read half of an open link
pub type LinkReader = Box<dyn AsyncRead + Send + Unpin>;

/// Write half of an open link
pub type LinkWriter = Box<dyn AsyncWrite + Send + Unpin>;

/// Identifies the device to connect to
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeviceRef {
    /// Character device (Bluetooth RFCOMM, USB serial)
    Serial(PathBuf),
    /// TCP endpoint, `host:port`
    Tcp(String),
}

impl DeviceRef {
    /// Parse a device reference from config or CLI input
    pub fn parse(input: &str) -> Result<Self, LinkError> {
        let input = input.trim();
        if let Some(addr) = input.strip_prefix("tcp://") {
            if addr.is_empty() || !addr.contains(':') {
                return Err(LinkError::InvalidDevice(input.to_string()));
            }
            return Ok(DeviceRef::Tcp(addr.to_string()));
        }
        if input.is_empty() {
            return Err(LinkError::InvalidDevice(input.to_string()));
        }
        Ok(DeviceRef::Serial(PathBuf::from(input)))
    }
}

impl std::fmt::Display for DeviceRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DeviceRef::Serial(path) => write!(f, "{}", path.display()),
            DeviceRef::Tcp(addr) => write!(f, "tcp://{}", addr),
        }
    }
}

/// Trait for link transports
#[async_trait::async_trait]
pub trait Transport: Send + Sync {
    /// Open the device and return independent read and write halves.
    /// Closing the link is dropping both halves.
    async fn open(&self, device: &DeviceRef) -> Result<(LinkReader, LinkWriter), LinkError>;

    /// Human-readable name for logging
    fn name(&self) -> &'static str;
}

/// Transport backed by the operating system: serial ports and TCP
#[derive(Debug, Clone, Copy)]
pub struct SystemTransport {
    baud_rate: u32,
}

impl SystemTransport {
    /// Serial ports are opened raw 8N1 at `baud_rate`
    pub fn new(baud_rate: u32) -> Self {
        Self { baud_rate }
    }

    pub fn baud_rate(&self) -> u32 {
        self.baud_rate
    }
}

impl Default for SystemTransport {
    fn default() -> Self {
        Self::new(serial::DEFAULT_BAUD_RATE)
    }
}

#[async_trait::async_trait]
impl Transport for SystemTransport {
    async fn open(&self, device: &DeviceRef) -> Result<(LinkReader, LinkWriter), LinkError> {
        let connect_failed = |e: std::io::Error| LinkError::ConnectFailed {
            device: device.to_string(),
            reason: e.to_string(),
        };

        match device {
            DeviceRef::Serial(path) => serial::open(path, self.baud_rate).await,
            DeviceRef::Tcp(addr) => {
                let stream = tokio::net::TcpStream::connect(addr)
                    .await
                    .map_err(connect_failed)?;
                stream.set_nodelay(true).map_err(connect_failed)?;
                let (reader, writer) = stream.into_split();
                Ok((Box::new(reader), Box::new(writer)))
            }
        }
    }

    fn name(&self) -> &'static str {
        "system"
    }
}

/// Receives connection events and decoded packets.
///
/// Callbacks run on the connector's read task (or on the task calling
/// `connect`/`send`/`disconnect` for lifecycle events) and must return
/// quickly without blocking.
pub trait ConnectorListener: Send + Sync {
    /// The link reached the connected state
    fn on_connect(&self, device: &DeviceRef);

    /// The link left the connected state; fires once per connection
    fn on_disconnect(&self, device: &DeviceRef);

    /// A packet arrived from the device
    fn on_reaction(&self, packet_type: PacketType, payload: &str);
}

/// Connector callbacks as values, for consumers running their own loop
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinkEvent {
    Connected(DeviceRef),
    Disconnected(DeviceRef),
    Reaction(Packet),
}

/// Listener that forwards every callback into a channel
pub struct ChannelListener {
    tx: mpsc::UnboundedSender<LinkEvent>,
}

impl ChannelListener {
    /// Create a listener and the receiver its events arrive on
    pub fn new() -> (Arc<Self>, mpsc::UnboundedReceiver<LinkEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Arc::new(Self { tx }), rx)
    }

    fn forward(&self, event: LinkEvent) {
        if self.tx.send(event).is_err() {
            tracing::trace!("Link event receiver dropped");
        }
    }
}

impl ConnectorListener for ChannelListener {
    fn on_connect(&self, device: &DeviceRef) {
        self.forward(LinkEvent::Connected(device.clone()));
    }

    fn on_disconnect(&self, device: &DeviceRef) {
        self.forward(LinkEvent::Disconnected(device.clone()));
    }

    fn on_reaction(&self, packet_type: PacketType, payload: &str) {
        self.forward(LinkEvent::Reaction(Packet::new(packet_type, payload)));
    }
}
