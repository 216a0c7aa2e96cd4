//! devlink-cli - Command-line interface for devlink devices
//!
//! One-shot property and system commands over the control channel, plus a
//! UDP relay for reaching a device behind another host.

mod commands;
mod proxy;

use clap::{Parser, Subcommand};
use colored::Colorize;
use devlink_client::{ChannelConfig, CommandChannel, DeviceAgent, TransportConfig};
use devlink_protocol::{PropertyId, DEFAULT_FRAME_MAX_BYTES};
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "devlink-cli")]
#[command(about = "Command-line interface for devlink devices")]
#[command(version)]
struct Cli {
    /// Local address to bind the control socket to
    #[arg(short, long, default_value = "0.0.0.0:0", env = "DEVLINK_LOCAL")]
    local: SocketAddr,

    /// Device control address
    #[arg(short, long, default_value = "192.168.181.2:30000", env = "DEVLINK_TARGET")]
    target: SocketAddr,

    /// Per-call timeout in milliseconds
    #[arg(long, default_value_t = 1000)]
    timeout_ms: u64,

    /// Largest datagram to send, header included
    #[arg(long, default_value_t = DEFAULT_FRAME_MAX_BYTES)]
    frame_max_bytes: usize,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show device status, media source, stream target and versions
    Status,

    /// List known property names
    Props,

    /// Read a property
    Get {
        /// Property name or id (e.g. temperature, 0x0003)
        prop: PropertyId,

        /// Request arguments JSON (or @file.json)
        #[arg(short, long)]
        args: Option<String>,
    },

    /// Write a property
    Set {
        /// Property name or id
        prop: PropertyId,

        /// Value JSON (or @file.json)
        value: String,
    },

    /// Resume the device
    Play,

    /// Pause the device
    Pause,

    /// Switch the device application to another version
    SwitchVersion {
        /// Version string
        version: String,
    },

    /// Reboot the device
    Reboot,

    /// Relay datagrams: client -> front port -> back port -> target
    Proxy {
        /// Front-end port clients talk to
        front_port: u16,

        /// Back-end port used to reach the target
        back_port: u16,

        /// Address the back end forwards to
        target: SocketAddr,

        /// Front-end bind address
        #[arg(long, default_value = "0.0.0.0")]
        front_ip: IpAddr,

        /// Back-end bind address
        #[arg(long, default_value = "0.0.0.0")]
        back_ip: IpAddr,

        /// Log every relayed datagram
        #[arg(short, long)]
        verbose: bool,
    },
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let default_level = match &cli.command {
        Commands::Proxy { verbose: true, .. } => "info",
        _ => "warn",
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .init();

    match cli.command {
        Commands::Props => {
            println!("{}", commands::list_properties());
        }
        Commands::Proxy {
            front_port,
            back_port,
            target,
            front_ip,
            back_ip,
            verbose,
        } => {
            let front = SocketAddr::new(front_ip, front_port);
            let back = SocketAddr::new(back_ip, back_port);
            if let Err(e) = proxy::run(front, back, target, verbose) {
                eprintln!("{}: {}", "Proxy failed".red(), e);
                std::process::exit(1);
            }
        }
        cmd => {
            tracing::debug!(local = %cli.local, target = %cli.target, "opening control channel");
            let channel_config = ChannelConfig::new()
                .with_frame_max_bytes(cli.frame_max_bytes)
                .with_call_timeout(Duration::from_millis(cli.timeout_ms));
            let channel = CommandChannel::bind(
                TransportConfig::new(cli.local).with_target(cli.target),
                channel_config,
            )
            .map_err(|e| {
                eprintln!("{}: {}", "Bind failed".red(), e);
                e
            })?;
            let agent = DeviceAgent::new(Arc::new(channel));

            match commands::execute(&agent, cmd) {
                Ok(output) => println!("{}", output),
                Err(e) => {
                    eprintln!("{}: {}", "Error".red(), e);
                    std::process::exit(1);
                }
            }
        }
    }

    Ok(())
}
