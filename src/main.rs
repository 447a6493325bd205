//! Binary entrypoint for the MeshCore bot CLI.
//!
//! Commands:
//! - `start [--port <path>] [--channel <name>]... [--echo]` - run a session until Ctrl-C
//! - `init` - create a starter `config.toml`
//! - `send <content> [--port <path>] [--channel <name> | --channel-index <n> | --to <key>]`
//! - `probe --port <path> [-b <baud>] [--timeout <s>]` - query the radio and print a summary
//!
//! See the library crate docs for module-level details: `meshcore_bot::`.
use anyhow::{anyhow, Result};
use clap::{Parser, Subcommand};
use log::{error, info, warn};
use std::time::Duration;

use meshcore_bot::config::Config;
use meshcore_bot::meshcore::protocol::parse_key_prefix;
use meshcore_bot::meshcore::{MessageKind, ProtocolSession, SessionConfig};

#[derive(Parser)]
#[command(name = "meshcore-bot")]
#[command(about = "Text bot host for MeshCore companion radios")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Configuration file path (can be used before or after subcommand)
    #[arg(short, long, default_value = "config.toml", global = true)]
    config: String,

    /// Verbose logging (-v, -vv for more; may appear before or after subcommand)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,
}

#[derive(Subcommand)]
enum Commands {
    /// Connect to the radio and dispatch incoming messages until interrupted
    Start {
        /// Companion radio serial port (e.g., /dev/ttyUSB0); overrides the config
        #[arg(short, long)]
        port: Option<String>,

        /// Only handle messages from this channel (repeatable); overrides the config
        #[arg(long = "channel")]
        channels: Vec<String>,

        /// Answer "ping" with "pong" on the channel it arrived on
        #[arg(long)]
        echo: bool,
    },
    /// Write a default configuration file
    Init,
    /// Send one message and exit
    Send {
        /// Text to send
        content: String,

        /// Companion radio serial port; overrides the config
        #[arg(short, long)]
        port: Option<String>,

        /// Channel name (allocated a local index)
        #[arg(long, conflicts_with_all = ["channel_index", "to"])]
        channel: Option<String>,

        /// Raw radio channel slot
        #[arg(long, conflicts_with = "to")]
        channel_index: Option<u8>,

        /// Contact public-key prefix (12 hex digits) for a direct message
        #[arg(long)]
        to: Option<String>,
    },
    /// Query the radio's device info and print it as JSON
    Probe {
        /// Device serial port
        #[arg(short, long)]
        port: String,
        /// Baud rate
        #[arg(short = 'b', long, default_value_t = 115200)]
        baud: u32,
        /// Seconds to wait before giving up
        #[arg(short, long, default_value_t = 5)]
        timeout: u64,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let pre_config = match cli.command {
        Commands::Init => None,
        _ => Config::load(&cli.config).await.ok(),
    };
    init_logging(&pre_config, cli.verbose);

    match cli.command {
        Commands::Start {
            port,
            channels,
            echo,
        } => {
            let mut config = load_or_default(pre_config, &cli.config);
            if port.is_some() {
                config.meshcore.port = port;
            }
            if !channels.is_empty() {
                config.meshcore.channel_filter = channels;
            }
            config.validate()?;
            info!("Starting meshcore-bot v{}", env!("CARGO_PKG_VERSION"));

            let mut session = open_session(&config).await?;
            session.register(MessageKind::Text, move |msg, session| {
                info!(
                    "[{}] {}: {}",
                    msg.channel_name.as_deref().unwrap_or("-"),
                    msg.sender,
                    msg.content
                );
                if echo && msg.content.trim().eq_ignore_ascii_case("ping") {
                    if let Err(e) = session.reply(msg, "pong") {
                        warn!("Echo reply failed: {}", e);
                    }
                }
            });
            session.register(MessageKind::Direct, |msg, _session| {
                info!("[direct] {}: {}", msg.sender, msg.content);
            });
            session.start().await?;

            let mut ticker = tokio::time::interval(Duration::from_secs(1));
            loop {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => {
                        info!("Interrupt received, shutting down");
                        break;
                    }
                    _ = ticker.tick() => {
                        if session.is_lost() {
                            error!("Radio connection lost");
                            break;
                        }
                    }
                }
            }
            let lost = session.is_lost();
            let snapshot = session.handle().metrics();
            session.stop().await;
            info!("Session counters: {}", serde_json::to_string(&snapshot)?);
            if lost {
                std::process::exit(1);
            }
        }
        Commands::Init => {
            info!("Initializing new configuration");
            Config::create_default(&cli.config).await?;
            info!("Configuration file created at {}", cli.config);
        }
        Commands::Send {
            content,
            port,
            channel,
            channel_index,
            to,
        } => {
            let mut config = load_or_default(pre_config, &cli.config);
            if port.is_some() {
                config.meshcore.port = port;
            }
            config.validate()?;
            let key = match to.as_deref() {
                Some(hex) => Some(
                    parse_key_prefix(hex)
                        .ok_or_else(|| anyhow!("--to expects 12 hex digits, got '{}'", hex))?,
                ),
                None => None,
            };

            let mut session = open_session(&config).await?;
            session.start().await?;
            let handle = session.handle();
            let result = match key {
                Some(key) => handle.send_direct(&key, &content),
                None => {
                    let channel = channel.or_else(|| config.meshcore.default_channel.clone());
                    handle.send(&content, MessageKind::Text, channel.as_deref(), channel_index)
                }
            };
            // Give the radio a moment to acknowledge before the port closes.
            tokio::time::sleep(Duration::from_millis(500)).await;
            session.stop().await;
            result?;
        }
        Commands::Probe {
            port,
            baud,
            timeout,
        } => {
            #[cfg(not(feature = "serial"))]
            {
                let _ = (port, baud, timeout);
                error!("Probe requires the 'serial' feature");
                std::process::exit(2);
            }
            #[cfg(feature = "serial")]
            {
                use meshcore_bot::meshcore::{open_serial, probe_device};
                let mut device = open_serial(&port, baud).await?;
                info!("Probing {} @ {} baud", port, baud);
                let info = probe_device(&mut device, Duration::from_secs(timeout)).await?;
                let status_ok = info.is_some();
                if !status_ok {
                    warn!("No device info received. Is the radio running companion (USB) firmware?");
                }
                let payload = serde_json::json!({
                    "status": if status_ok { "ok" } else { "no_response" },
                    "port": port,
                    "baud": baud,
                    "device": info,
                    "timeout_seconds": timeout,
                });
                println!("{}", payload);
                std::process::exit(if status_ok { 0 } else { 1 });
            }
        }
    }

    Ok(())
}

fn load_or_default(pre_config: Option<Config>, path: &str) -> Config {
    pre_config.unwrap_or_else(|| {
        warn!("No usable config at {}; using defaults (simulation unless --port is given)", path);
        Config {
            meshcore: Default::default(),
            logging: Default::default(),
        }
    })
}

async fn open_session(config: &Config) -> Result<ProtocolSession> {
    let session_config: SessionConfig = config.meshcore.session_config();
    match config.meshcore.port.as_deref() {
        #[cfg(feature = "serial")]
        Some(port) => Ok(
            ProtocolSession::open_serial(port, config.meshcore.baud_rate, session_config).await?,
        ),
        #[cfg(not(feature = "serial"))]
        Some(port) => Err(anyhow!(
            "Port {} given but serial support is not compiled in (enable the 'serial' feature)",
            port
        )),
        None => Ok(ProtocolSession::simulated(session_config)?),
    }
}

fn init_logging(config: &Option<Config>, verbosity: u8) {
    use std::io::Write;
    let mut builder = env_logger::Builder::new();
    // CLI verbosity wins over the configured level
    let base_level = match verbosity {
        0 => config
            .as_ref()
            .and_then(|c| c.logging.level.parse().ok())
            .unwrap_or(log::LevelFilter::Info),
        1 => log::LevelFilter::Debug,
        _ => log::LevelFilter::Trace,
    };
    builder.filter_level(base_level);
    let log_file = config.as_ref().and_then(|c| c.logging.file.clone());
    let opened = log_file.as_ref().and_then(|file| {
        std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(file)
            .ok()
    });
    if let Some(f) = opened {
        let write_mutex = std::sync::Arc::new(std::sync::Mutex::new(f));
        // Mirror to the console only when someone is watching it
        let is_tty = atty::is(atty::Stream::Stdout);

        builder.format(move |fmt, record| {
            let ts = chrono::Utc::now().format("%Y-%m-%dT%H:%M:%SZ");
            let line = format!("{} [{}] {}", ts, record.level(), record.args());

            if let Ok(mut guard) = write_mutex.lock() {
                let _ = writeln!(guard, "{}", line);
            }

            if is_tty {
                writeln!(fmt, "{}", line)
            } else {
                Ok(())
            }
        });
    } else {
        builder.format(|fmt, record| {
            let ts = chrono::Utc::now().format("%Y-%m-%dT%H:%M:%SZ");
            writeln!(fmt, "{} [{}] {}", ts, record.level(), record.args())
        });
    }
    let _ = builder.try_init();
}
