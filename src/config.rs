//! Configuration loading and types for ironman
//!
//! Configuration is loaded in layers:
//! 1. Built-in defaults
//! 2. Config file (~/.config/ironman/config.toml)
//! 3. Environment variables (IRONMAN_*)
//! 4. CLI arguments (highest priority)

use crate::error::IronmanError;
use crate::recognition::LevelRange;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Default configuration file content
pub const DEFAULT_CONFIG: &str = r#"# Ironman Configuration
#
# Location: ~/.config/ironman/config.toml
# All settings can be overridden via CLI flags

# State file for status bars and scripts.
# Use "auto" for the default location ($XDG_RUNTIME_DIR/ironman/state),
# a custom path, or "disabled" to turn off. The daemon writes the status
# ("disconnected", "standby", "listening") whenever it changes.
state_file = "auto"

[link]
# Serial device of the microcontroller.
# Bluetooth modules show up after `sudo rfcomm bind 0 <MAC>` as /dev/rfcomm0.
# Use tcp://host:port for a simulator or a serial-to-TCP bridge.
device = "/dev/rfcomm0"

# Serial baud rate (ignored for tcp://). Ports are opened raw, 8N1.
# HC-05/HC-06 modules default to 9600.
baud_rate = 9600

# Seconds to wait before reconnecting after the link drops (0 = exit instead)
reconnect_secs = 5

[speech]
# Wake word that must be spoken before a command
signal = "computer"

# Where the wake word may appear: "prefix" or "anywhere"
signal_position = "prefix"

# Match the wake word and command phrases case-sensitively
case_sensitive = false

# How phrases are matched:
#   "exact"    - the whole remainder must be the phrase
#   "contains" - the phrase may appear anywhere, as whole words
match_mode = "exact"

# Commands sent to the device, first match wins
[[commands]]
canonical = "LIGHT_ON"
variants = ["turn on the light", "lights on", "light on"]

[[commands]]
canonical = "LIGHT_OFF"
variants = ["turn off the light", "lights off", "light off"]

[recognition]
# Recognizer run once per listening session. It must print JSON lines:
#   {"level": 3.2}                  signal level while listening
#   {"results": ["best", "second"]} hypotheses when the utterance ends
# command = "ironman-recognizer"
# args = ["--language", "en"]

# Range of the levels the recognizer reports
min_level = -2.12
max_level = 10.0

# Start a new session as soon as one ends (while connected).
# When false, sessions start on connect and when the device reports activity.
auto_restart = false
"#;

/// Where the signal token must appear in recognized text
#[derive(Debug, Clone, Copy, Deserialize, Serialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum SignalPosition {
    /// Text must start with the token (default)
    #[default]
    Prefix,
    /// Token may appear anywhere
    Anywhere,
}

/// How command phrases are compared with recognized text
#[derive(Debug, Clone, Copy, Deserialize, Serialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum MatchMode {
    /// Whole text equals a phrase, ignoring extra whitespace (default)
    #[default]
    Exact,
    /// Phrase appears within the text as whole words
    Contains,
}

/// Root configuration structure
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub link: LinkConfig,

    #[serde(default)]
    pub speech: SpeechConfig,

    /// Command table, in match priority order
    #[serde(default = "default_commands")]
    pub commands: Vec<CommandConfig>,

    #[serde(default)]
    pub recognition: RecognitionConfig,

    /// Optional path to a state file for external integrations.
    /// "auto" resolves to $XDG_RUNTIME_DIR/ironman/state.
    #[serde(default)]
    pub state_file: Option<String>,
}

/// Serial link configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LinkConfig {
    /// Device path or tcp://host:port
    #[serde(default = "default_device")]
    pub device: String,

    /// Serial baud rate; the port is always 8N1 without flow control
    #[serde(default = "default_baud_rate")]
    pub baud_rate: u32,

    /// Delay before reconnecting after the link drops; 0 exits instead
    #[serde(default = "default_reconnect_secs")]
    pub reconnect_secs: u64,
}

impl Default for LinkConfig {
    fn default() -> Self {
        Self {
            device: default_device(),
            baud_rate: default_baud_rate(),
            reconnect_secs: default_reconnect_secs(),
        }
    }
}

/// Wake word and phrase matching
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SpeechConfig {
    #[serde(default = "default_signal")]
    pub signal: String,

    #[serde(default)]
    pub signal_position: SignalPosition,

    #[serde(default)]
    pub case_sensitive: bool,

    #[serde(default)]
    pub match_mode: MatchMode,
}

impl Default for SpeechConfig {
    fn default() -> Self {
        Self {
            signal: default_signal(),
            signal_position: SignalPosition::default(),
            case_sensitive: false,
            match_mode: MatchMode::default(),
        }
    }
}

/// One canonical command and the phrases that trigger it
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
pub struct CommandConfig {
    pub canonical: String,
    pub variants: Vec<String>,
}

/// Recognizer process and level range
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RecognitionConfig {
    /// Recognizer executable; recognition is disabled when unset
    #[serde(default)]
    pub command: Option<String>,

    #[serde(default)]
    pub args: Vec<String>,

    #[serde(default = "default_min_level")]
    pub min_level: f32,

    #[serde(default = "default_max_level")]
    pub max_level: f32,

    #[serde(default)]
    pub auto_restart: bool,
}

impl Default for RecognitionConfig {
    fn default() -> Self {
        Self {
            command: None,
            args: vec![],
            min_level: default_min_level(),
            max_level: default_max_level(),
            auto_restart: false,
        }
    }
}

impl RecognitionConfig {
    /// Validated level range
    pub fn level_range(&self) -> Result<LevelRange, IronmanError> {
        Ok(LevelRange::new(self.min_level, self.max_level)?)
    }
}

fn default_device() -> String {
    "/dev/rfcomm0".to_string()
}

fn default_baud_rate() -> u32 {
    crate::link::serial::DEFAULT_BAUD_RATE
}

fn default_reconnect_secs() -> u64 {
    5
}

fn default_signal() -> String {
    "computer".to_string()
}

fn default_min_level() -> f32 {
    LevelRange::default().min
}

fn default_max_level() -> f32 {
    LevelRange::default().max
}

fn default_commands() -> Vec<CommandConfig> {
    let command = |canonical: &str, variants: &[&str]| CommandConfig {
        canonical: canonical.to_string(),
        variants: variants.iter().map(|v| v.to_string()).collect(),
    };
    vec![
        command("LIGHT_ON", &["turn on the light", "lights on", "light on"]),
        command("LIGHT_OFF", &["turn off the light", "lights off", "light off"]),
    ]
}

impl Default for Config {
    fn default() -> Self {
        Self {
            link: LinkConfig::default(),
            speech: SpeechConfig::default(),
            commands: default_commands(),
            recognition: RecognitionConfig::default(),
            state_file: Some("auto".to_string()),
        }
    }
}

impl Config {
    /// Get the default config file path
    pub fn default_path() -> Option<PathBuf> {
        Self::config_dir().map(|dir| dir.join("config.toml"))
    }

    /// Get the config directory path
    pub fn config_dir() -> Option<PathBuf> {
        directories::ProjectDirs::from("", "", "ironman")
            .map(|dirs| dirs.config_dir().to_path_buf())
    }

    /// Get the runtime directory for ephemeral files
    pub fn runtime_dir() -> PathBuf {
        std::env::var("XDG_RUNTIME_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|_| std::env::temp_dir())
            .join("ironman")
    }

    /// Resolve the state file path.
    /// Returns None if unset or explicitly disabled.
    pub fn resolve_state_file(&self) -> Option<PathBuf> {
        self.state_file
            .as_ref()
            .and_then(|path| match path.to_lowercase().as_str() {
                "disabled" | "none" | "off" | "false" => None,
                "auto" => Some(Self::runtime_dir().join("state")),
                _ => Some(PathBuf::from(path)),
            })
    }
}

/// Load configuration from file, with defaults for missing values
pub fn load_config(path: Option<&Path>) -> Result<Config, IronmanError> {
    let mut config = Config::default();

    let config_path = path.map(PathBuf::from).or_else(Config::default_path);

    if let Some(ref path) = config_path {
        if path.exists() {
            tracing::debug!("Loading config from {:?}", path);
            let contents = std::fs::read_to_string(path)
                .map_err(|e| IronmanError::Config(format!("Failed to read config: {}", e)))?;

            config = toml::from_str(&contents)
                .map_err(|e| IronmanError::Config(format!("Invalid config: {}", e)))?;
        } else {
            tracing::debug!("Config file not found at {:?}, using defaults", path);
        }
    }

    apply_env(&mut config, |key| std::env::var(key).ok());

    Ok(config)
}

/// Override config values from IRONMAN_* variables
fn apply_env(config: &mut Config, var: impl Fn(&str) -> Option<String>) {
    if let Some(device) = var("IRONMAN_DEVICE") {
        config.link.device = device;
    }
    if let Some(signal) = var("IRONMAN_SIGNAL") {
        config.speech.signal = signal;
    }
}

/// Save configuration to file
pub fn save_config(config: &Config, path: &Path) -> Result<(), IronmanError> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .map_err(|e| IronmanError::Config(format!("Failed to create config dir: {}", e)))?;
    }

    let contents = toml::to_string_pretty(config)
        .map_err(|e| IronmanError::Config(format!("Failed to serialize config: {}", e)))?;

    std::fs::write(path, contents)
        .map_err(|e| IronmanError::Config(format!("Failed to write config: {}", e)))?;

    Ok(())
}

/// Write the commented default config unless a file already exists.
/// Returns true if a file was written.
pub fn write_default_config(path: &Path) -> Result<bool, IronmanError> {
    if path.exists() {
        return Ok(false);
    }
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .map_err(|e| IronmanError::Config(format!("Failed to create config dir: {}", e)))?;
    }
    std::fs::write(path, DEFAULT_CONFIG)
        .map_err(|e| IronmanError::Config(format!("Failed to write config: {}", e)))?;
    Ok(true)
}
