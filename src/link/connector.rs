//! Connection lifecycle for the serial link
//!
//! ```text
//! Disconnected ──connect()──▶ Connecting ──open ok──▶ Connected
//!      ▲                          │                      │
//!      └──────── open failed ─────┘                      │
//!      └──── device closed / write failed / disconnect() ┘
//! ```
//!
//! Every Connected → Disconnected transition fires `on_disconnect` exactly
//! once, no matter how many of the read task, a failed write and an explicit
//! `disconnect()` race to report it. State transitions and listener
//! callbacks are serialized through one delivery lock, so once a transition
//! to Disconnected is committed no further callback for that connection can
//! fire.

use super::frame::{self, FrameParser, PacketType};
use super::{ConnectorListener, DeviceRef, LinkReader, LinkWriter, Transport};
use crate::error::LinkError;
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::task::JoinHandle;

/// Read buffer size for the transport read task
const READ_CHUNK: usize = 256;

/// Connection lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConnectionState::Disconnected => write!(f, "disconnected"),
            ConnectionState::Connecting => write!(f, "connecting"),
            ConnectionState::Connected => write!(f, "connected"),
        }
    }
}

/// Lifecycle bookkeeping guarded by one mutex
struct Link {
    state: ConnectionState,
    device: Option<DeviceRef>,
    /// Incremented for every connection attempt; stale tasks compare against it
    session: u64,
}

/// State shared between the connector and its read task
struct Shared {
    link: Mutex<Link>,
    /// Held while committing a transition and firing its callback
    delivery: Mutex<()>,
    listener: Arc<dyn ConnectorListener>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl Shared {
    fn is_live(&self, session: u64) -> bool {
        let link = lock(&self.link);
        link.session == session && link.state == ConnectionState::Connected
    }

    /// Fire a reaction callback if the connection is still live
    fn deliver_reaction(&self, session: u64, packet_type: PacketType, payload: &str) -> bool {
        let _delivery = lock(&self.delivery);
        if !self.is_live(session) {
            return false;
        }
        self.listener.on_reaction(packet_type, payload);
        true
    }

    /// Connecting → Connected, firing `on_connect`
    fn mark_connected(&self, session: u64, device: &DeviceRef) -> bool {
        let _delivery = lock(&self.delivery);
        {
            let mut link = lock(&self.link);
            if link.session != session || link.state != ConnectionState::Connecting {
                return false;
            }
            link.state = ConnectionState::Connected;
        }
        tracing::info!("Connected to {}", device);
        self.listener.on_connect(device);
        true
    }

    /// Connected → Disconnected, firing `on_disconnect`.
    /// Returns false if another path already made this transition.
    fn mark_disconnected(&self, session: u64) -> bool {
        let _delivery = lock(&self.delivery);
        let device = {
            let mut link = lock(&self.link);
            if link.session != session || link.state != ConnectionState::Connected {
                return false;
            }
            link.state = ConnectionState::Disconnected;
            link.device.take()
        };
        if let Some(device) = device {
            tracing::info!("Disconnected from {}", device);
            self.listener.on_disconnect(&device);
        }
        true
    }

    /// Abandon an attempt that is still in Connecting
    fn cancel_connecting(&self, session: u64) -> bool {
        let mut link = lock(&self.link);
        if link.session != session || link.state != ConnectionState::Connecting {
            return false;
        }
        link.state = ConnectionState::Disconnected;
        link.device = None;
        true
    }
}

/// Write half of the current connection, tagged with its session
type WriterSlot = tokio::sync::Mutex<Option<(u64, LinkWriter)>>;

/// Owns the link to one device at a time
pub struct LinkConnector {
    transport: Arc<dyn Transport>,
    shared: Arc<Shared>,
    writer: Arc<WriterSlot>,
    reader_task: Mutex<Option<(u64, JoinHandle<()>)>>,
}

impl LinkConnector {
    /// Create a disconnected connector
    pub fn new(transport: Arc<dyn Transport>, listener: Arc<dyn ConnectorListener>) -> Self {
        Self {
            transport,
            shared: Arc::new(Shared {
                link: Mutex::new(Link {
                    state: ConnectionState::Disconnected,
                    device: None,
                    session: 0,
                }),
                delivery: Mutex::new(()),
                listener,
            }),
            writer: Arc::new(tokio::sync::Mutex::new(None)),
            reader_task: Mutex::new(None),
        }
    }

    /// Current lifecycle state
    pub fn state(&self) -> ConnectionState {
        lock(&self.shared.link).state
    }

    /// Check if the link is up
    pub fn is_connected(&self) -> bool {
        self.state() == ConnectionState::Connected
    }

    /// Device of the current (or pending) connection
    pub fn device(&self) -> Option<DeviceRef> {
        lock(&self.shared.link).device.clone()
    }

    /// Connect to a device.
    ///
    /// Rejected with [`LinkError::AlreadyConnected`] unless disconnected.
    /// A failed open returns the error and leaves the connector
    /// disconnected without firing `on_disconnect`.
    pub async fn connect(&self, device: DeviceRef) -> Result<(), LinkError> {
        let session = {
            let mut link = lock(&self.shared.link);
            if link.state != ConnectionState::Disconnected {
                let current = link
                    .device
                    .as_ref()
                    .map(|d| d.to_string())
                    .unwrap_or_else(|| device.to_string());
                tracing::warn!("Connect to {} rejected: link is {}", device, link.state);
                return Err(LinkError::AlreadyConnected(current));
            }
            link.state = ConnectionState::Connecting;
            link.device = Some(device.clone());
            link.session += 1;
            link.session
        };

        tracing::info!("Connecting to {} via {} transport", device, self.transport.name());

        let (reader, writer) = match self.transport.open(&device).await {
            Ok(halves) => halves,
            Err(e) => {
                tracing::warn!("Connection to {} failed: {}", device, e);
                self.shared.cancel_connecting(session);
                return Err(e);
            }
        };

        // Held until the read task is registered, so disconnect() and send()
        // see either no connection or a complete one
        let mut slot = self.writer.lock().await;

        if !self.shared.mark_connected(session, &device) {
            // disconnect() ran while the device was opening; a newer
            // connection may own the slot already
            return Err(LinkError::ConnectFailed {
                device: device.to_string(),
                reason: "connection cancelled".to_string(),
            });
        }
        *slot = Some((session, writer));

        let task = tokio::spawn(read_loop(
            self.shared.clone(),
            self.writer.clone(),
            reader,
            session,
        ));
        if let Some((_, previous)) = lock(&self.reader_task).replace((session, task)) {
            previous.abort();
        }

        Ok(())
    }

    /// Close the link. A no-op when already disconnected.
    ///
    /// Once this returns, no callback for the closed connection fires.
    pub async fn disconnect(&self) -> Result<(), LinkError> {
        let (state, session) = {
            let link = lock(&self.shared.link);
            (link.state, link.session)
        };

        match state {
            ConnectionState::Disconnected => {
                tracing::debug!("Disconnect requested while already disconnected");
                return Ok(());
            }
            ConnectionState::Connecting => {
                tracing::info!("Cancelling pending connection");
                self.shared.cancel_connecting(session);
            }
            ConnectionState::Connected => {
                self.shared.mark_disconnected(session);
            }
        }

        self.clear_writer(session).await;
        self.stop_reader(session).await;
        Ok(())
    }

    /// Encode a command and write it to the device.
    ///
    /// Fails with [`LinkError::NotConnected`] unless connected. A failed
    /// write closes the link and fires `on_disconnect`.
    pub async fn send(&self, command: &str) -> Result<(), LinkError> {
        let session = {
            let link = lock(&self.shared.link);
            if link.state != ConnectionState::Connected {
                tracing::warn!("Cannot send {:?}: link is {}", command, link.state);
                return Err(LinkError::NotConnected);
            }
            link.session
        };

        let bytes = frame::encode(PacketType::Command, command)?;

        let mut slot = self.writer.lock().await;
        let writer = match slot.as_mut() {
            Some((owner, writer)) if *owner == session => writer,
            _ => return Err(LinkError::NotConnected),
        };

        let result = async {
            writer.write_all(&bytes).await?;
            writer.flush().await
        }
        .await;

        match result {
            Ok(()) => {
                tracing::debug!("Sent command {:?} ({} bytes)", command, bytes.len());
                Ok(())
            }
            Err(e) => {
                tracing::warn!("Write failed, closing link: {}", e);
                slot.take();
                drop(slot);
                if self.shared.mark_disconnected(session) {
                    self.stop_reader(session).await;
                }
                Err(LinkError::WriteFailed(e.to_string()))
            }
        }
    }

    /// Abort the read task of `session` and wait for it to finish
    async fn stop_reader(&self, session: u64) {
        let task = {
            let mut slot = lock(&self.reader_task);
            match slot.take() {
                Some((owner, task)) if owner == session => Some(task),
                other => {
                    *slot = other;
                    None
                }
            }
        };

        if let Some(task) = task {
            task.abort();
            let _ = task.await;
        }
    }

    async fn clear_writer(&self, session: u64) {
        let mut slot = self.writer.lock().await;
        if matches!(slot.as_ref(), Some((owner, _)) if *owner == session) {
            if let Some((_, mut writer)) = slot.take() {
                let _ = writer.shutdown().await;
            }
        }
    }
}

impl Drop for LinkConnector {
    fn drop(&mut self) {
        if let Some((_, task)) = lock(&self.reader_task).take() {
            task.abort();
        }
    }
}

/// Pull bytes from the device until it closes, delivering decoded packets
async fn read_loop(
    shared: Arc<Shared>,
    writer: Arc<WriterSlot>,
    mut reader: LinkReader,
    session: u64,
) {
    let mut parser = FrameParser::new();
    let mut buf = [0u8; READ_CHUNK];

    loop {
        match reader.read(&mut buf).await {
            Ok(0) => {
                tracing::info!("Link closed by device");
                break;
            }
            Ok(n) => {
                tracing::trace!("Read {} bytes from link", n);
                for packet in parser.feed(&buf[..n]) {
                    tracing::debug!("Reaction: {} {:?}", packet.packet_type, packet.payload);
                    if !shared.deliver_reaction(session, packet.packet_type, &packet.payload) {
                        return;
                    }
                }
            }
            Err(e) => {
                tracing::warn!("Link read failed: {}", e);
                break;
            }
        }
    }

    if shared.mark_disconnected(session) {
        let mut slot = writer.lock().await;
        if matches!(slot.as_ref(), Some((owner, _)) if *owner == session) {
            slot.take();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::link::{ChannelListener, LinkEvent, Packet};
    use std::path::PathBuf;
    use std::pin::Pin;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::task::{Context, Poll};
    use std::time::Duration;
    use tokio::io::{AsyncWrite, DuplexStream};
    use tokio::sync::{mpsc, Notify};

    /// In-memory transport; the device side of each connection is handed
    /// to the test through a channel
    struct DuplexTransport {
        peers: mpsc::UnboundedSender<DuplexStream>,
    }

    #[async_trait::async_trait]
    impl Transport for DuplexTransport {
        async fn open(&self, _device: &DeviceRef) -> Result<(LinkReader, LinkWriter), LinkError> {
            let (ours, theirs) = tokio::io::duplex(1024);
            let _ = self.peers.send(theirs);
            let (reader, writer) = tokio::io::split(ours);
            Ok((Box::new(reader), Box::new(writer)))
        }

        fn name(&self) -> &'static str {
            "duplex"
        }
    }

    struct RefusingTransport;

    #[async_trait::async_trait]
    impl Transport for RefusingTransport {
        async fn open(&self, device: &DeviceRef) -> Result<(LinkReader, LinkWriter), LinkError> {
            Err(LinkError::ConnectFailed {
                device: device.to_string(),
                reason: "connection refused".to_string(),
            })
        }

        fn name(&self) -> &'static str {
            "refusing"
        }
    }

    struct BrokenWriter;

    impl AsyncWrite for BrokenWriter {
        fn poll_write(
            self: Pin<&mut Self>,
            _cx: &mut Context<'_>,
            _buf: &[u8],
        ) -> Poll<std::io::Result<usize>> {
            Poll::Ready(Err(std::io::ErrorKind::BrokenPipe.into()))
        }

        fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
            Poll::Ready(Ok(()))
        }

        fn poll_shutdown(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
            Poll::Ready(Ok(()))
        }
    }

    /// Reads never complete, writes always fail
    struct BrokenWriteTransport;

    #[async_trait::async_trait]
    impl Transport for BrokenWriteTransport {
        async fn open(&self, _device: &DeviceRef) -> Result<(LinkReader, LinkWriter), LinkError> {
            let (ours, theirs) = tokio::io::duplex(64);
            std::mem::forget(theirs);
            let (reader, _) = tokio::io::split(ours);
            Ok((Box::new(reader), Box::new(BrokenWriter)))
        }

        fn name(&self) -> &'static str {
            "broken-write"
        }
    }

    /// The first open waits for `release`; later opens complete at once
    struct GatedTransport {
        release: Arc<Notify>,
        opens: AtomicUsize,
        peers: mpsc::UnboundedSender<DuplexStream>,
    }

    #[async_trait::async_trait]
    impl Transport for GatedTransport {
        async fn open(&self, _device: &DeviceRef) -> Result<(LinkReader, LinkWriter), LinkError> {
            if self.opens.fetch_add(1, Ordering::SeqCst) == 0 {
                self.release.notified().await;
            }
            let (ours, theirs) = tokio::io::duplex(1024);
            let _ = self.peers.send(theirs);
            let (reader, writer) = tokio::io::split(ours);
            Ok((Box::new(reader), Box::new(writer)))
        }

        fn name(&self) -> &'static str {
            "gated"
        }
    }

    fn device() -> DeviceRef {
        DeviceRef::Serial(PathBuf::from("/dev/rfcomm0"))
    }

    fn gated_connector() -> (
        Arc<LinkConnector>,
        Arc<Notify>,
        mpsc::UnboundedReceiver<DuplexStream>,
        mpsc::UnboundedReceiver<LinkEvent>,
    ) {
        let (peers_tx, peers_rx) = mpsc::unbounded_channel();
        let (listener, events) = ChannelListener::new();
        let release = Arc::new(Notify::new());
        let transport = GatedTransport {
            release: release.clone(),
            opens: AtomicUsize::new(0),
            peers: peers_tx,
        };
        let connector = Arc::new(LinkConnector::new(Arc::new(transport), listener));
        (connector, release, peers_rx, events)
    }

    /// Start a connect in the background and wait until it is opening
    async fn spawn_pending_connect(
        connector: &Arc<LinkConnector>,
    ) -> JoinHandle<Result<(), LinkError>> {
        let pending = tokio::spawn({
            let connector = connector.clone();
            async move { connector.connect(device()).await }
        });
        let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
        while connector.state() != ConnectionState::Connecting {
            assert!(tokio::time::Instant::now() < deadline, "connect never started");
            tokio::time::sleep(Duration::from_millis(1)).await;
        }
        pending
    }

    fn duplex_connector() -> (
        LinkConnector,
        mpsc::UnboundedReceiver<DuplexStream>,
        mpsc::UnboundedReceiver<LinkEvent>,
    ) {
        let (peers_tx, peers_rx) = mpsc::unbounded_channel();
        let (listener, events) = ChannelListener::new();
        let connector = LinkConnector::new(Arc::new(DuplexTransport { peers: peers_tx }), listener);
        (connector, peers_rx, events)
    }

    async fn next_event(events: &mut mpsc::UnboundedReceiver<LinkEvent>) -> LinkEvent {
        tokio::time::timeout(Duration::from_secs(2), events.recv())
            .await
            .expect("timed out waiting for link event")
            .expect("event channel closed")
    }

    async fn assert_quiet(events: &mut mpsc::UnboundedReceiver<LinkEvent>) {
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(events.try_recv().is_err(), "unexpected extra link event");
    }

    #[tokio::test]
    async fn test_connect_fires_on_connect() {
        let (connector, _peers, mut events) = duplex_connector();
        assert_eq!(connector.state(), ConnectionState::Disconnected);

        connector.connect(device()).await.unwrap();

        assert_eq!(connector.state(), ConnectionState::Connected);
        assert_eq!(connector.device(), Some(device()));
        assert_eq!(next_event(&mut events).await, LinkEvent::Connected(device()));
    }

    #[tokio::test]
    async fn test_connect_twice_rejected() {
        let (connector, _peers, mut events) = duplex_connector();
        connector.connect(device()).await.unwrap();
        next_event(&mut events).await;

        let result = connector.connect(device()).await;
        assert!(matches!(result, Err(LinkError::AlreadyConnected(_))));
        assert!(connector.is_connected());
        assert_quiet(&mut events).await;
    }

    #[tokio::test]
    async fn test_failed_open_returns_to_disconnected() {
        let (listener, mut events) = ChannelListener::new();
        let connector = LinkConnector::new(Arc::new(RefusingTransport), listener);

        let result = connector.connect(device()).await;
        assert!(matches!(result, Err(LinkError::ConnectFailed { .. })));
        assert_eq!(connector.state(), ConnectionState::Disconnected);
        assert_eq!(connector.device(), None);
        assert_quiet(&mut events).await;
    }

    #[tokio::test]
    async fn test_send_while_disconnected_rejected() {
        let (connector, _peers, _events) = duplex_connector();
        let result = connector.send("LIGHT_ON").await;
        assert!(matches!(result, Err(LinkError::NotConnected)));
    }

    #[tokio::test]
    async fn test_send_writes_command_frame() {
        let (connector, mut peers, _events) = duplex_connector();
        connector.connect(device()).await.unwrap();
        let mut peer = peers.recv().await.unwrap();

        connector.send("LIGHT_ON").await.unwrap();

        let expected = frame::encode(PacketType::Command, "LIGHT_ON").unwrap();
        let mut received = vec![0u8; expected.len()];
        peer.read_exact(&mut received).await.unwrap();
        assert_eq!(received, expected);

        let packets: Vec<Packet> = FrameParser::new().feed(&received).collect();
        assert_eq!(packets, vec![Packet::new(PacketType::Command, "LIGHT_ON")]);
    }

    #[tokio::test]
    async fn test_send_oversized_command_rejected() {
        let (connector, _peers, _events) = duplex_connector();
        connector.connect(device()).await.unwrap();

        let result = connector.send(&"x".repeat(300)).await;
        assert!(matches!(result, Err(LinkError::Encode(_))));
        assert!(connector.is_connected());
    }

    #[tokio::test]
    async fn test_reactions_delivered_in_order() {
        let (connector, mut peers, mut events) = duplex_connector();
        connector.connect(device()).await.unwrap();
        let mut peer = peers.recv().await.unwrap();
        next_event(&mut events).await;

        let mut bytes = frame::encode(PacketType::ActivityDetected, "").unwrap();
        bytes.extend(frame::encode(PacketType::Acknowledge, "LIGHT_ON").unwrap());
        // Fragmented across writes
        peer.write_all(&bytes[..4]).await.unwrap();
        peer.flush().await.unwrap();
        peer.write_all(&bytes[4..]).await.unwrap();

        assert_eq!(
            next_event(&mut events).await,
            LinkEvent::Reaction(Packet::new(PacketType::ActivityDetected, ""))
        );
        assert_eq!(
            next_event(&mut events).await,
            LinkEvent::Reaction(Packet::new(PacketType::Acknowledge, "LIGHT_ON"))
        );
    }

    #[tokio::test]
    async fn test_device_close_fires_single_disconnect() {
        let (connector, mut peers, mut events) = duplex_connector();
        connector.connect(device()).await.unwrap();
        let peer = peers.recv().await.unwrap();
        next_event(&mut events).await;

        drop(peer);

        assert_eq!(next_event(&mut events).await, LinkEvent::Disconnected(device()));
        assert_eq!(connector.state(), ConnectionState::Disconnected);

        // Explicit disconnect afterwards is a no-op
        connector.disconnect().await.unwrap();
        assert_quiet(&mut events).await;
        assert!(matches!(
            connector.send("LIGHT_ON").await,
            Err(LinkError::NotConnected)
        ));
    }

    #[tokio::test]
    async fn test_explicit_disconnect_fires_single_disconnect() {
        let (connector, mut peers, mut events) = duplex_connector();
        connector.connect(device()).await.unwrap();
        let mut peer = peers.recv().await.unwrap();
        next_event(&mut events).await;

        connector.disconnect().await.unwrap();
        assert_eq!(next_event(&mut events).await, LinkEvent::Disconnected(device()));

        connector.disconnect().await.unwrap();
        // Device-side close after teardown must not produce a second event
        let _ = peer.write_all(&frame::encode(PacketType::Acknowledge, "late").unwrap()).await;
        drop(peer);
        assert_quiet(&mut events).await;
    }

    #[tokio::test]
    async fn test_write_failure_disconnects() {
        let (listener, mut events) = ChannelListener::new();
        let connector = LinkConnector::new(Arc::new(BrokenWriteTransport), listener);
        connector.connect(device()).await.unwrap();
        next_event(&mut events).await;

        let result = connector.send("LIGHT_ON").await;
        assert!(matches!(result, Err(LinkError::WriteFailed(_))));
        assert_eq!(connector.state(), ConnectionState::Disconnected);
        assert_eq!(next_event(&mut events).await, LinkEvent::Disconnected(device()));

        connector.disconnect().await.unwrap();
        assert_quiet(&mut events).await;
    }

    #[tokio::test]
    async fn test_reconnect_after_disconnect() {
        let (connector, mut peers, mut events) = duplex_connector();
        connector.connect(device()).await.unwrap();
        connector.disconnect().await.unwrap();
        let _ = peers.recv().await;

        let other = DeviceRef::Tcp("127.0.0.1:7000".to_string());
        connector.connect(other.clone()).await.unwrap();
        let mut peer = peers.recv().await.unwrap();

        assert_eq!(next_event(&mut events).await, LinkEvent::Connected(device()));
        assert_eq!(next_event(&mut events).await, LinkEvent::Disconnected(device()));
        assert_eq!(next_event(&mut events).await, LinkEvent::Connected(other));

        connector.send("LIGHT_OFF").await.unwrap();
        let expected = frame::encode(PacketType::Command, "LIGHT_OFF").unwrap();
        let mut received = vec![0u8; expected.len()];
        peer.read_exact(&mut received).await.unwrap();
        assert_eq!(received, expected);
    }

    #[tokio::test]
    async fn test_connect_while_connecting_rejected() {
        let (connector, release, _peers, mut events) = gated_connector();
        let pending = spawn_pending_connect(&connector).await;

        let other = DeviceRef::Tcp("127.0.0.1:7000".to_string());
        let result = connector.connect(other).await;
        assert!(matches!(result, Err(LinkError::AlreadyConnected(_))));
        assert_eq!(connector.state(), ConnectionState::Connecting);
        assert_eq!(connector.device(), Some(device()));

        release.notify_one();
        pending.await.unwrap().unwrap();
        assert!(connector.is_connected());
        assert_eq!(next_event(&mut events).await, LinkEvent::Connected(device()));
        assert_quiet(&mut events).await;
    }

    #[tokio::test]
    async fn test_cancelled_connect_leaves_new_connection_intact() {
        let (connector, release, mut peers, mut events) = gated_connector();
        let pending = spawn_pending_connect(&connector).await;

        connector.disconnect().await.unwrap();
        assert_eq!(connector.state(), ConnectionState::Disconnected);

        let other = DeviceRef::Tcp("127.0.0.1:7000".to_string());
        connector.connect(other.clone()).await.unwrap();
        let mut peer = peers.recv().await.unwrap();

        // The cancelled attempt finishes opening only now
        release.notify_one();
        let first = pending.await.unwrap();
        assert!(matches!(first, Err(LinkError::ConnectFailed { .. })));

        assert!(connector.is_connected());
        assert_eq!(connector.device(), Some(other.clone()));
        connector.send("LIGHT_ON").await.unwrap();

        let expected = frame::encode(PacketType::Command, "LIGHT_ON").unwrap();
        let mut received = vec![0u8; expected.len()];
        tokio::time::timeout(Duration::from_secs(2), peer.read_exact(&mut received))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(received, expected);

        // Only the surviving connection was ever reported
        assert_eq!(next_event(&mut events).await, LinkEvent::Connected(other));
        assert_quiet(&mut events).await;
    }
}
