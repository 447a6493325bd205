use thiserror::Error;

use super::framer::FrameError;

/// Errors surfaced by the companion-radio session.
#[derive(Debug, Error)]
pub enum MeshCoreError {
    /// Wrapper around transport IO failures. Fatal to the current session.
    #[error("transport error: {0}")]
    Transport(#[from] std::io::Error),

    /// Failure opening the serial device.
    #[cfg(feature = "serial")]
    #[error("serial error: {0}")]
    Serial(#[from] serialport::Error),

    /// Outbound payload could not be framed.
    #[error("framing error: {0}")]
    Frame(#[from] FrameError),

    /// All named channel slots (1..=7) are taken.
    #[error("channel limit exceeded: cannot assign '{name}', all {limit} named channels in use")]
    ChannelLimitExceeded { name: String, limit: usize },

    /// Channel name rejected before any IO.
    #[error("invalid channel name: {0}")]
    InvalidChannelName(String),

    /// Baud rate not supported by the companion firmware.
    #[error("invalid baud rate: {0}")]
    InvalidBaudRate(u32),

    /// Session identifier rejected before any IO.
    #[error("invalid node name: {0}")]
    InvalidNodeName(String),

    /// The send path was asked for a message kind it cannot put on a channel.
    #[error("cannot send {0} message on a channel")]
    UnsupportedKind(String),

    /// Operation attempted in the wrong session phase.
    #[error("session is {0}")]
    InvalidPhase(&'static str),

    /// Transport lost or session stopped.
    #[error("session closed")]
    SessionClosed,
}

pub type Result<T> = std::result::Result<T, MeshCoreError>;
