//! Ironman: voice commands for a microcontroller over a serial link
//!
//! This library provides the core functionality for:
//! - Framing typed packets over a lossy serial byte stream, with resync
//! - Managing the link lifecycle (connect, read task, send, disconnect)
//! - Running short recognition sessions through an external recognizer
//! - Filtering recognized speech by wake word and command phrases
//!
//! # Architecture
//!
//! ```text
//!                            ┌─────────────────────────────────────┐
//!                            │          Daemon (Bridge)            │
//!                            │   status = f(connected, listening)  │
//!                            └─────────────────────────────────────┘
//!                              ▲         │              ▲
//!                   LinkEvent  │         │ send(cmd)    │ RecognitionEvent
//!                              │         ▼              │
//!                   ┌──────────────────────┐   ┌──────────────────┐
//!                   │    LinkConnector     │   │   FilterChain    │
//!                   │ read task, writer    │   │ signal → command │
//!                   └──────────────────────┘   └──────────────────┘
//!                         ▲           │                 ▲
//!                  Packet │           │ frame           │ candidates
//!                   ┌─────────────┐   │        ┌───────────────────┐
//!                   │ FrameParser │   │        │ RecognitionSource │
//!                   └─────────────┘   │        │ (subprocess)      │
//!                         ▲           ▼        └───────────────────┘
//!                   ┌──────────────────────┐
//!                   │ Transport            │
//!                   │ /dev/rfcomm0, tcp:// │
//!                   └──────────────────────┘
//! ```

pub mod cli;
pub mod config;
pub mod daemon;
pub mod error;
pub mod filter;
pub mod link;
pub mod recognition;
pub mod state;

pub use cli::{Cli, Commands};
pub use config::Config;
pub use daemon::{Bridge, Daemon};
pub use error::{IronmanError, Result};
pub use state::AppStatus;
