//! # meshcore-bot - Text Bot Host for MeshCore Companion Radios
//!
//! A MeshCore companion radio exposes the mesh over a USB/UART serial link using a small
//! length-prefixed binary protocol. This crate speaks that protocol from the host side so
//! that bots (weather, alerts, echo) can receive channel and direct text and answer it.
//!
//! ## Features
//!
//! - **Frame Codec**: `<`/`>` marker + 16-bit little-endian length framing with resync on garbage.
//! - **Queue Draining**: Answers "message waiting" pushes with sync-next-message until the radio reports an empty queue.
//! - **Channel Table**: Stable name to slot mapping for up to seven named channels.
//! - **Handler Routing**: One callback per message kind, with an optional channel filter.
//! - **Simulation Mode**: Runs without a radio; JSON lines on the link are dispatched as messages.
//! - **Async Design**: Tokio background listener with a bounded, graceful shutdown.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use meshcore_bot::config::Config;
//! use meshcore_bot::meshcore::{MessageKind, ProtocolSession};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = Config::load("config.toml").await?;
//!     let mut session = ProtocolSession::open_serial(
//!         "/dev/ttyUSB0",
//!         config.meshcore.baud_rate,
//!         config.meshcore.session_config(),
//!     )
//!     .await?;
//!     session.register(MessageKind::Text, |msg, _session| {
//!         println!("{}: {}", msg.sender, msg.content);
//!     });
//!     session.start().await?;
//!     tokio::signal::ctrl_c().await?;
//!     session.stop().await;
//!     Ok(())
//! }
//! ```
//!
//! ## Module Organization
//!
//! - [`meshcore`] - Companion protocol: framing, session, listener, routing
//! - [`config`] - Configuration management and validation
//! - [`validation`] - Name validation and line sanitisation
//! - [`logutil`] - Log-safe rendering of radio text and bytes
//! - [`metrics`] - Per-session link counters

pub mod config;
pub mod logutil;
pub mod meshcore;
pub mod metrics;
pub mod validation;
