// Command-line interface definitions for ironman

use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "ironman")]
#[command(author, version, about = "Voice commands for a microcontroller over a serial link")]
#[command(long_about = "
Ironman listens for spoken commands and sends them to a microcontroller
over a serial link (Bluetooth RFCOMM, USB serial, or TCP).

Say the wake word followed by a command, e.g. \"computer, turn on the light\".
The phrase is matched against the configured command table and the
canonical command (LIGHT_ON) is sent to the device.

SETUP:
  1. Bind the Bluetooth module: sudo rfcomm bind 0 <MAC>
  2. Run: ironman setup (writes a default config)
  3. Set [recognition] command in the config to your recognizer
  4. Run: ironman (to start the daemon)
")]
pub struct Cli {
    /// Path to config file
    #[arg(short, long, value_name = "FILE")]
    pub config: Option<std::path::PathBuf>,

    /// Increase verbosity (-v = debug, -vv = trace)
    #[arg(short, long, action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Quiet mode (errors only)
    #[arg(short, long)]
    pub quiet: bool,

    /// Override device (e.g., /dev/rfcomm0, tcp://127.0.0.1:7000)
    #[arg(long, value_name = "DEVICE")]
    pub device: Option<String>,

    /// Override wake word
    #[arg(long, value_name = "WORD")]
    pub signal: Option<String>,

    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run as daemon (default if no command specified)
    Daemon,

    /// Send one command to the device and print its reply
    Send {
        /// Canonical command, e.g. LIGHT_ON
        command: String,

        /// Seconds to wait for the device to acknowledge
        #[arg(long, default_value_t = 2)]
        wait: u64,
    },

    /// Run text through the wake word and command filters
    Filter {
        /// Recognized text, e.g. computer turn on the light
        #[arg(required = true)]
        text: Vec<String>,
    },

    /// Show current configuration
    Config,

    /// Write a default config file if none exists
    Setup,
}
