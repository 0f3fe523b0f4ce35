//! Daemon module - main event loop orchestration
//!
//! Connects the serial link and the recognizer: link events drive when
//! recognition runs, filtered speech becomes commands on the link.
//!
//! ```text
//! LinkConnector ──LinkEvent──────────┐
//!                                    ▼
//!                                 Bridge ──send(command)──▶ LinkConnector
//!                                    ▲
//! RecognitionSource ─▶ FilterChain ──┘ RecognitionEvent
//! ```
//!
//! Recognition sessions start when the link comes up and whenever the
//! device reports activity, and stop when the link drops.

use crate::config::Config;
use crate::error::{IronmanError, Result};
use crate::filter::{FilterChain, FilteredListener};
use crate::link::{self, DeviceRef, LinkConnector, LinkEvent, PacketType, SystemTransport, Transport};
use crate::recognition::{self, LevelRange, RecognitionEvent, RecognitionSource, SubprocessEngine};
use crate::state::{normalize_level, AppStatus, StatusFlags};
use std::path::{Path, PathBuf};
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;
use tokio::signal::unix::{signal, SignalKind};
use tokio::time::Sleep;

/// Write state to file for external integrations (e.g., Waybar)
fn write_state_file(path: &Path, state: &str) {
    if let Some(parent) = path.parent() {
        if let Err(e) = std::fs::create_dir_all(parent) {
            tracing::warn!("Failed to create state file directory: {}", e);
            return;
        }
    }

    if let Err(e) = std::fs::write(path, state) {
        tracing::warn!("Failed to write state file: {}", e);
    } else {
        tracing::trace!("State file updated: {}", state);
    }
}

/// Remove state file on shutdown
fn cleanup_state_file(path: &Path) {
    if path.exists() {
        if let Err(e) = std::fs::remove_file(path) {
            tracing::warn!("Failed to remove state file: {}", e);
        }
    }
}

/// Reacts to link and recognition events.
///
/// Holds the connected/listening flags the [`AppStatus`] is derived from
/// and publishes every status change.
pub struct Bridge {
    connector: Arc<LinkConnector>,
    recognition: Option<Arc<RecognitionSource>>,
    flags: StatusFlags,
    published: Option<AppStatus>,
    auto_restart: bool,
    range: LevelRange,
    state_file_path: Option<PathBuf>,
}

impl Bridge {
    pub fn new(
        connector: Arc<LinkConnector>,
        recognition: Option<Arc<RecognitionSource>>,
        range: LevelRange,
    ) -> Self {
        Self {
            connector,
            recognition,
            flags: StatusFlags::default(),
            published: None,
            auto_restart: false,
            range,
            state_file_path: None,
        }
    }

    /// Start a new session whenever one ends while connected
    pub fn with_auto_restart(mut self, auto_restart: bool) -> Self {
        self.auto_restart = auto_restart;
        self
    }

    /// Write every status change to `path`
    pub fn with_state_file(mut self, path: Option<PathBuf>) -> Self {
        self.state_file_path = path;
        self
    }

    pub fn status(&self) -> AppStatus {
        self.flags.status()
    }

    pub fn connector(&self) -> &Arc<LinkConnector> {
        &self.connector
    }

    fn publish(&mut self) {
        let status = self.status();
        if self.published == Some(status) {
            return;
        }
        self.published = Some(status);
        tracing::info!("Status: {}", status);
        if let Some(ref path) = self.state_file_path {
            write_state_file(path, status.as_str());
        }
    }

    fn start_listening(&self) {
        if let Some(ref source) = self.recognition {
            source.start();
        }
    }

    async fn stop_listening(&self) {
        if let Some(ref source) = self.recognition {
            source.stop().await;
        }
    }

    pub async fn handle_link_event(&mut self, event: LinkEvent) {
        match event {
            LinkEvent::Connected(device) => {
                tracing::debug!("Link up: {}", device);
                self.flags.connected = true;
                self.publish();
                self.start_listening();
            }
            LinkEvent::Disconnected(device) => {
                tracing::debug!("Link down: {}", device);
                self.flags.connected = false;
                self.publish();
                self.stop_listening().await;
            }
            LinkEvent::Reaction(packet) => match packet.packet_type {
                PacketType::ActivityDetected => {
                    tracing::debug!("Device reported activity");
                    if self.flags.connected {
                        self.start_listening();
                    }
                }
                PacketType::Acknowledge => {
                    tracing::info!("Device acknowledged {:?}", packet.payload);
                }
                PacketType::Error => {
                    tracing::warn!("Device rejected command: {:?}", packet.payload);
                }
                PacketType::Command => {
                    tracing::debug!("Ignoring command frame from device: {:?}", packet.payload);
                }
            },
        }
    }

    pub async fn handle_recognition_event(&mut self, event: RecognitionEvent) {
        match event {
            RecognitionEvent::Started => {
                self.flags.listening = true;
                self.publish();
            }
            RecognitionEvent::Stopped => {
                self.flags.listening = false;
                self.publish();
                if self.auto_restart && self.flags.connected {
                    self.start_listening();
                }
            }
            RecognitionEvent::SoundChanged(level) => {
                tracing::trace!("Level {} ({})", normalize_level(level, &self.range), level);
            }
            RecognitionEvent::SpeechRecognized(commands) => {
                let Some(command) = commands.first() else {
                    return;
                };
                tracing::info!("Sending {}", command);
                if let Err(e) = self.connector.send(command).await {
                    tracing::warn!("Failed to send {}: {}", command, e);
                }
            }
        }
    }

    /// Tear down recognition and the link
    pub async fn shutdown(&mut self) {
        self.stop_listening().await;
        if let Err(e) = self.connector.disconnect().await {
            tracing::warn!("Disconnect failed: {}", e);
        }
        if let Some(ref path) = self.state_file_path {
            cleanup_state_file(path);
        }
    }
}

/// Create the recognition source, or None if no recognizer is configured
fn create_recognition(
    config: &Config,
    chain: FilterChain,
    listener: Arc<recognition::ChannelListener>,
    range: LevelRange,
) -> Result<Option<Arc<RecognitionSource>>> {
    let Some(ref command) = config.recognition.command else {
        tracing::warn!("No recognizer configured; only device events will be handled");
        return Ok(None);
    };

    let engine = SubprocessEngine::new(command.clone(), config.recognition.args.clone())?;
    tracing::info!("Recognizer: {}", engine.command_line());

    let filtered = Arc::new(FilteredListener::new(chain, listener));
    Ok(Some(Arc::new(RecognitionSource::new(
        Arc::new(engine),
        filtered,
        range,
    ))))
}

/// Main daemon that owns the link and the recognizer
pub struct Daemon {
    config: Config,
    device: DeviceRef,
}

impl Daemon {
    /// Create a new daemon with the given configuration
    pub fn new(config: Config) -> Result<Self> {
        let device = DeviceRef::parse(&config.link.device)?;
        Ok(Self { config, device })
    }

    /// Run the daemon main loop
    pub async fn run(&mut self) -> Result<()> {
        tracing::info!("Starting ironman daemon");

        let mut sigterm = signal(SignalKind::terminate())
            .map_err(|e| IronmanError::Config(format!("Failed to set up SIGTERM handler: {}", e)))?;

        let range = self.config.recognition.level_range()?;
        let chain = FilterChain::from_config(&self.config)?;
        tracing::info!(
            "Wake word {:?}, {} command(s)",
            self.config.speech.signal,
            self.config.commands.len()
        );

        let (link_listener, mut link_rx) = link::ChannelListener::new();
        let (speech_listener, mut speech_rx) = recognition::ChannelListener::new();

        let transport = SystemTransport::new(self.config.link.baud_rate);
        let connector = Arc::new(LinkConnector::new(Arc::new(transport), link_listener));
        let recognition = create_recognition(&self.config, chain, speech_listener, range)?;

        let state_file_path = self.config.resolve_state_file();
        if let Some(ref path) = state_file_path {
            tracing::info!("State file: {:?}", path);
        }

        let mut bridge = Bridge::new(connector.clone(), recognition, range)
            .with_auto_restart(self.config.recognition.auto_restart)
            .with_state_file(state_file_path);

        let reconnect_delay = match self.config.link.reconnect_secs {
            0 => None,
            secs => Some(Duration::from_secs(secs)),
        };

        bridge.publish();
        let mut reconnect: Option<Pin<Box<Sleep>>> = None;
        if let Err(e) = connector.connect(self.device.clone()).await {
            match reconnect_delay {
                Some(delay) => {
                    tracing::warn!("{}", e);
                    reconnect = Some(Box::pin(tokio::time::sleep(delay)));
                }
                None => {
                    bridge.shutdown().await;
                    return Err(e.into());
                }
            }
        }

        let result = loop {
            tokio::select! {
                Some(event) = link_rx.recv() => {
                    let dropped = matches!(event, LinkEvent::Disconnected(_));
                    bridge.handle_link_event(event).await;
                    if dropped {
                        match reconnect_delay {
                            Some(delay) => {
                                tracing::info!("Reconnecting in {}s", delay.as_secs());
                                reconnect = Some(Box::pin(tokio::time::sleep(delay)));
                            }
                            None => {
                                tracing::info!("Link lost, shutting down...");
                                break Ok(());
                            }
                        }
                    }
                }

                Some(event) = speech_rx.recv() => {
                    bridge.handle_recognition_event(event).await;
                }

                _ = async {
                    match reconnect.as_mut() {
                        Some(sleep) => sleep.await,
                        None => std::future::pending().await,
                    }
                } => {
                    reconnect = None;
                    if let Err(e) = connector.connect(self.device.clone()).await {
                        tracing::warn!("{}", e);
                        if let Some(delay) = reconnect_delay {
                            reconnect = Some(Box::pin(tokio::time::sleep(delay)));
                        }
                    }
                }

                // Handle graceful shutdown (SIGINT from Ctrl+C)
                _ = tokio::signal::ctrl_c() => {
                    tracing::info!("Received SIGINT, shutting down...");
                    break Ok(());
                }

                // Handle graceful shutdown (SIGTERM from systemctl stop)
                _ = sigterm.recv() => {
                    tracing::info!("Received SIGTERM, shutting down...");
                    break Ok(());
                }
            }
        };

        bridge.shutdown().await;
        tracing::info!("Daemon stopped");

        result
    }
}

/// Connect, send one command, and wait briefly for the device's answer
pub async fn send_once(
    transport: Arc<dyn Transport>,
    device: DeviceRef,
    command: &str,
    wait: Duration,
) -> Result<Option<link::Packet>> {
    let (listener, mut events) = link::ChannelListener::new();
    let connector = LinkConnector::new(transport, listener);

    connector.connect(device).await?;
    connector.send(command).await?;

    let reply = tokio::time::timeout(wait, async {
        while let Some(event) = events.recv().await {
            match event {
                LinkEvent::Reaction(packet)
                    if matches!(packet.packet_type, PacketType::Acknowledge | PacketType::Error) =>
                {
                    return Some(packet);
                }
                LinkEvent::Disconnected(_) => return None,
                _ => {}
            }
        }
        None
    })
    .await
    .unwrap_or(None);

    connector.disconnect().await?;
    Ok(reply)
}
