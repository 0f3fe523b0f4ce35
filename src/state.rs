//! Application status for the daemon
//!
//! The status is derived from two facts owned by different components:
//! whether the link is up and whether a recognition session is running.
//!
//! ```text
//! connected  listening   status
//!   false      any       Disconnected
//!   true       false     Standby
//!   true       true      Listening
//! ```

use crate::recognition::LevelRange;

/// What the bridge is doing, as shown to the user
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppStatus {
    /// No link to the device
    Disconnected,
    /// Linked, waiting for activity
    Standby,
    /// Linked and listening for a command
    Listening,
}

impl AppStatus {
    /// Derive the status. Listening without a link reads as Disconnected.
    pub fn from_flags(connected: bool, listening: bool) -> Self {
        match (connected, listening) {
            (false, _) => AppStatus::Disconnected,
            (true, false) => AppStatus::Standby,
            (true, true) => AppStatus::Listening,
        }
    }

    /// Name written to the state file
    pub fn as_str(self) -> &'static str {
        match self {
            AppStatus::Disconnected => "disconnected",
            AppStatus::Standby => "standby",
            AppStatus::Listening => "listening",
        }
    }
}

impl std::fmt::Display for AppStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AppStatus::Disconnected => write!(f, "Disconnected"),
            AppStatus::Standby => write!(f, "Standby"),
            AppStatus::Listening => write!(f, "Listening"),
        }
    }
}

/// The two inputs the status is computed from
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StatusFlags {
    pub connected: bool,
    pub listening: bool,
}

impl StatusFlags {
    pub fn status(&self) -> AppStatus {
        AppStatus::from_flags(self.connected, self.listening)
    }
}

/// Scale a level into a non-negative integer for meters:
/// `(level + |min|) * 100`, so the default range maps onto 0..=1212.
pub fn normalize_level(level: f32, range: &LevelRange) -> u32 {
    let scaled = (range.clamp(level) + range.min.abs()) * 100.0;
    scaled.max(0.0).round() as u32
}
