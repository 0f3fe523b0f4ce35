//! Ironman - voice commands for a microcontroller over a serial link
//!
//! Run with `ironman` or `ironman daemon` to start the daemon.
//! Use `ironman setup` to write a default config.
//! Use `ironman send <COMMAND>` to test the link without speaking.

use clap::Parser;
use ironman::cli::{Cli, Commands};
use ironman::config::{self, Config};
use ironman::daemon::{self, Daemon};
use ironman::filter::FilterChain;
use ironman::link::{DeviceRef, PacketType, SystemTransport};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    let log_level = if cli.quiet {
        "error"
    } else {
        match cli.verbose {
            0 => "info",
            1 => "debug",
            _ => "trace",
        }
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(format!("ironman={},warn", log_level))),
        )
        .with_target(false)
        .init();

    // Load configuration
    let mut config = config::load_config(cli.config.as_deref())?;

    // Apply CLI overrides
    if let Some(device) = cli.device {
        config.link.device = device;
    }
    if let Some(signal) = cli.signal {
        config.speech.signal = signal;
    }

    match cli.command.unwrap_or(Commands::Daemon) {
        Commands::Daemon => {
            let mut daemon = Daemon::new(config)?;
            daemon.run().await?;
        }

        Commands::Send { command, wait } => {
            run_send(&config, &command, Duration::from_secs(wait)).await?;
        }

        Commands::Filter { text } => {
            run_filter(&config, &text.join(" "))?;
        }

        Commands::Config => {
            show_config(&config, cli.config.as_deref());
        }

        Commands::Setup => {
            run_setup(cli.config)?;
        }
    }

    Ok(())
}

/// Send one command and report the device's answer
async fn run_send(config: &Config, command: &str, wait: Duration) -> anyhow::Result<()> {
    let device = DeviceRef::parse(&config.link.device)?;
    println!("Sending {} to {}", command, device);

    let transport = Arc::new(SystemTransport::new(config.link.baud_rate));
    match daemon::send_once(transport, device, command, wait).await? {
        Some(reply) if reply.packet_type == PacketType::Acknowledge => {
            println!("Acknowledged: {}", reply.payload);
        }
        Some(reply) => {
            anyhow::bail!("Device rejected {}: {}", command, reply.payload);
        }
        None => {
            println!("No reply within {}s", wait.as_secs());
        }
    }
    Ok(())
}

/// Print the command a phrase would trigger
fn run_filter(config: &Config, text: &str) -> anyhow::Result<()> {
    let chain = FilterChain::from_config(config)?;
    match chain.apply(text) {
        Some(command) => println!("{}", command),
        None => println!("(no command)"),
    }
    Ok(())
}

/// Write the default config file
fn run_setup(path: Option<PathBuf>) -> anyhow::Result<()> {
    let path = path
        .or_else(Config::default_path)
        .ok_or_else(|| anyhow::anyhow!("Cannot determine config directory"))?;

    if config::write_default_config(&path)? {
        println!("Wrote default config to {:?}", path);
    } else {
        println!("Config already exists at {:?}", path);
    }
    println!("Set [recognition] command to your recognizer, then run: ironman");
    Ok(())
}

/// Show current configuration
fn show_config(config: &Config, path: Option<&std::path::Path>) {
    println!("Current Configuration\n");
    println!("=====================\n");

    println!("[link]");
    println!("  device = {:?}", config.link.device);
    println!("  baud_rate = {}", config.link.baud_rate);
    println!("  reconnect_secs = {}", config.link.reconnect_secs);

    println!("\n[speech]");
    println!("  signal = {:?}", config.speech.signal);
    println!("  signal_position = {:?}", config.speech.signal_position);
    println!("  case_sensitive = {}", config.speech.case_sensitive);
    println!("  match_mode = {:?}", config.speech.match_mode);

    println!("\n[commands]");
    for command in &config.commands {
        println!("  {} <- {:?}", command.canonical, command.variants);
    }

    println!("\n[recognition]");
    match config.recognition.command {
        Some(ref command) => println!("  command = {:?}", command),
        None => println!("  command = (not set)"),
    }
    if !config.recognition.args.is_empty() {
        println!("  args = {:?}", config.recognition.args);
    }
    println!(
        "  level range = [{}, {}]",
        config.recognition.min_level, config.recognition.max_level
    );
    println!("  auto_restart = {}", config.recognition.auto_restart);

    if let Some(ref state_file) = config.state_file {
        println!("\n[integration]");
        println!("  state_file = {:?}", state_file);
        if let Some(resolved) = config.resolve_state_file() {
            println!("  (resolves to: {:?})", resolved);
        }
    }

    println!("\n---");
    let path = path
        .map(PathBuf::from)
        .or_else(Config::default_path)
        .unwrap_or_else(|| PathBuf::from("(not found)"));
    println!("Config file: {:?}", path);
}
