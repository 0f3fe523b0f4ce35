//! Error types for ironman
//!
//! Uses thiserror for ergonomic error definitions with clear messages
//! that guide users toward fixing common issues.

use thiserror::Error;

/// Top-level error type for the ironman application
#[derive(Error, Debug)]
pub enum IronmanError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Link error: {0}")]
    Link(#[from] LinkError),

    #[error("Framing error: {0}")]
    Frame(#[from] FrameError),

    #[error("Recognition error: {0}")]
    Recognition(#[from] RecognitionError),

    #[error("Filter error: {0}")]
    Filter(#[from] FilterError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors related to the serial link and its connection lifecycle
#[derive(Error, Debug)]
pub enum LinkError {
    #[error("Already connected (or connecting) to '{0}'. Disconnect first.")]
    AlreadyConnected(String),

    #[error("Not connected. Pair and connect to a device before sending.")]
    NotConnected,

    #[error("Cannot open device '{device}': {reason}\n  For Bluetooth serial, bind it first: sudo rfcomm bind 0 <MAC>")]
    ConnectFailed { device: String, reason: String },

    #[error("Write to device failed: {0}")]
    WriteFailed(String),

    #[error("Invalid device reference: '{0}'. Use a device path (/dev/rfcomm0) or tcp://host:port")]
    InvalidDevice(String),

    #[error("Cannot encode command: {0}")]
    Encode(#[from] FrameError),
}

/// Errors produced when building an outbound frame
#[derive(Error, Debug, PartialEq, Eq)]
pub enum FrameError {
    #[error("Payload is {0} bytes, frames carry at most 255")]
    PayloadTooLarge(usize),
}

/// Errors related to the speech recognition engine
#[derive(Error, Debug)]
pub enum RecognitionError {
    #[error("No recognizer command configured. Set [recognition] command in config.toml")]
    NotConfigured,

    #[error("Failed to launch recognizer '{command}': {reason}")]
    SpawnFailed { command: String, reason: String },

    #[error("Recognizer session failed: {0}")]
    SessionFailed(String),

    #[error("Invalid level range: min {min} must be below max {max}")]
    InvalidRange { min: f32, max: f32 },
}

/// Errors raised while building the speech filter chain
#[derive(Error, Debug, PartialEq, Eq)]
pub enum FilterError {
    #[error("Signal token is empty. Set [speech] signal in config.toml")]
    EmptySignal,

    #[error("Command pattern has an empty canonical name")]
    EmptyCanonical,

    #[error("Command '{0}' has no usable variants")]
    NoVariants(String),

    #[error("Cannot compile pattern for '{phrase}': {reason}")]
    InvalidPattern { phrase: String, reason: String },
}

/// Result type alias using IronmanError
pub type Result<T> = std::result::Result<T, IronmanError>;
