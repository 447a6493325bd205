//! # MeshCore Companion Radio Protocol
//!
//! Host side of the MeshCore companion serial protocol: frame codec, response dispatch,
//! channel-index bookkeeping and a background listener that keeps the radio's message
//! queue drained.
//!
//! ## Wire format
//!
//! ```text
//! host -> radio   '<' len_lo len_hi payload...
//! radio -> host   '>' len_lo len_hi payload...
//! ```
//!
//! `payload[0]` is a command code (host to radio) or a response/push code (radio to
//! host). The radio does not forward received mesh text on its own: it announces waiting
//! traffic and the host pulls it one message at a time with a sync-next-message command,
//! repeating until the queue-empty response arrives.
//!
//! ## Usage
//!
//! ```rust,no_run
//! use meshcore_bot::meshcore::{MessageKind, MockTransport, ProtocolSession, SessionConfig};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let (transport, _radio) = MockTransport::pair();
//!     let mut session = ProtocolSession::new(Box::new(transport), SessionConfig::default())?;
//!     session.register(MessageKind::Text, |msg, session| {
//!         if msg.content == "ping" {
//!             let _ = session.reply(msg, "pong");
//!         }
//!     });
//!     session.start().await?;
//!     session.stop().await;
//!     Ok(())
//! }
//! ```
//!
//! ## Simulation
//!
//! A session built with [`ProtocolSession::simulated`] has no transport: sends are only
//! logged. A transport that carries newline-terminated JSON objects instead of frames is
//! also accepted, which is how a bridge or a test script can inject messages.

pub mod channels;
pub mod errors;
pub mod framer;
mod listener;
pub mod message;
pub mod probe;
pub mod protocol;
pub mod router;
pub mod session;
pub mod transport;

pub use channels::ChannelTable;
pub use errors::{MeshCoreError, Result};
pub use listener::{TransportMode, FRAME_STALE_TIMEOUT};
pub use message::{InboundMessage, MessageKind};
pub use probe::probe_device;
pub use protocol::DeviceInfo;
pub use router::{Handler, MessageRouter};
pub use session::{ProtocolSession, SessionConfig, SessionHandle, SessionPhase, SessionState};
#[cfg(feature = "serial")]
pub use transport::open_serial;
pub use transport::{MockRadio, MockTransport, Transport};
