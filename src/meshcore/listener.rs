//! Background reader: turns transport bytes into dispatched frames or simulation lines.
//!
//! The link carries either binary frames (`>` + u16 LE length + payload) or, for
//! simulation and bridging, newline-terminated JSON. The mode is decided per buffer
//! head, so a stray line between frames does not wedge the decoder.
use bytes::{Buf, BytesMut};
use log::{debug, error, info, trace, warn};
use std::time::{Duration, Instant};
use tokio::sync::oneshot;
use tokio::time::MissedTickBehavior;

use super::errors::Result;
use super::framer::{self, DecodeError, FRAME_FROM_RADIO};
use super::message::SimulatedMessage;
use super::session::SessionHandle;
use crate::logutil::{hex_snippet, truncate_for_log};
use crate::validation::{decode_html_entities, is_json_candidate, strip_non_printable};

/// A partial frame that stops growing for this long is given up on.
pub const FRAME_STALE_TIMEOUT: Duration = Duration::from_secs(2);
/// An unterminated line is flushed after the link has been quiet this long.
pub const LINE_IDLE_TIMEOUT: Duration = Duration::from_millis(200);
pub const MAX_LINE_LEN: usize = 1024;
const READ_CHUNK: usize = 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportMode {
    Binary,
    Line,
}

impl TransportMode {
    /// Frames always start with the radio marker; anything else is line text.
    pub fn detect(first: u8) -> Self {
        if first == FRAME_FROM_RADIO {
            TransportMode::Binary
        } else {
            TransportMode::Line
        }
    }
}

pub(crate) struct Listener {
    session: SessionHandle,
    rx_buf: BytesMut,
    poll_interval: Duration,
    /// When the buffer head last stopped making progress.
    stalled_since: Option<Instant>,
    /// Set after a bad frame: skip to the next marker or line break.
    resyncing: bool,
}

impl Listener {
    pub(crate) fn new(session: SessionHandle, poll_interval: Duration) -> Self {
        Self {
            session,
            rx_buf: BytesMut::with_capacity(READ_CHUNK),
            poll_interval,
            stalled_since: None,
            resyncing: false,
        }
    }

    pub(crate) async fn run(mut self, ready: oneshot::Sender<Instant>) {
        let started = Instant::now();
        self.session.shared.mark_listener_started(started);
        let _ = ready.send(started);
        info!("Listener loop started");

        let mut ticker = tokio::time::interval(self.poll_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        while self.session.is_running() {
            ticker.tick().await;
            if let Err(e) = self.poll_once() {
                if self.session.is_running() {
                    error!("Listener error: {}", e);
                    self.session.shared.mark_lost();
                }
                break;
            }
        }
        info!("Listener loop exited");
    }

    fn poll_once(&mut self) -> Result<()> {
        match self.session.shared.read_available(READ_CHUNK)? {
            Some(bytes) => {
                trace!("RX {} bytes: {}", bytes.len(), hex_snippet(&bytes, 48));
                self.rx_buf.extend_from_slice(&bytes);
                self.stalled_since = None;
                self.process(false)
            }
            None => self.process(true),
        }
    }

    /// Consume everything complete in the buffer. `idle` is set when the last read
    /// returned nothing, which is when stale partial input may be given up on.
    fn process(&mut self, idle: bool) -> Result<()> {
        loop {
            if self.resyncing && !self.skip_to_boundary() {
                return Ok(());
            }
            let Some(&first) = self.rx_buf.first() else {
                self.stalled_since = None;
                return Ok(());
            };
            match TransportMode::detect(first) {
                TransportMode::Binary => match framer::decode(&self.rx_buf) {
                    Ok((payload, used)) => {
                        self.rx_buf.advance(used);
                        self.stalled_since = None;
                        self.session.handle_payload(&payload)?;
                    }
                    Err(DecodeError::Incomplete) => {
                        if !self.stalled(idle, FRAME_STALE_TIMEOUT) {
                            return Ok(());
                        }
                        warn!(
                            "Discarding stale partial frame ({} bytes buffered)",
                            self.rx_buf.len()
                        );
                        self.discard_marker();
                    }
                    Err(e) => {
                        debug!("Resyncing after bad frame header: {}", e);
                        self.discard_marker();
                    }
                },
                TransportMode::Line => {
                    let newline = self.rx_buf.iter().position(|&b| b == b'\n');
                    // Unterminated text ends where the next frame starts: for JSON, only
                    // once the object is closed
                    let marker = if first == b'{' {
                        frame_after_json(&self.rx_buf)
                    } else {
                        self.rx_buf.iter().position(|&b| b == FRAME_FROM_RADIO)
                    };
                    let line = if let Some(pos) =
                        newline.filter(|&n| marker.map_or(true, |m| n < m))
                    {
                        self.rx_buf.split_to(pos + 1)
                    } else if let Some(pos) = marker {
                        self.rx_buf.split_to(pos)
                    } else if self.rx_buf.len() >= MAX_LINE_LEN {
                        self.rx_buf.split_to(MAX_LINE_LEN)
                    } else if self.stalled(idle, LINE_IDLE_TIMEOUT) {
                        self.rx_buf.split()
                    } else {
                        return Ok(());
                    };
                    self.stalled_since = None;
                    self.handle_line(&line);
                }
            }
        }
    }

    fn discard_marker(&mut self) {
        self.session.shared_metrics().inc_frames_discarded();
        self.rx_buf.advance(1);
        self.resyncing = true;
    }

    /// Drop bytes up to the next frame marker or past the next newline.
    /// Returns false when the whole buffer was noise.
    fn skip_to_boundary(&mut self) -> bool {
        match self
            .rx_buf
            .iter()
            .position(|&b| b == FRAME_FROM_RADIO || b == b'\n')
        {
            Some(pos) => {
                let skip = if self.rx_buf[pos] == b'\n' { pos + 1 } else { pos };
                if skip > 0 {
                    trace!("Skipped {} bytes while resyncing", skip);
                }
                self.rx_buf.advance(skip);
                self.resyncing = false;
                true
            }
            None => {
                if !self.rx_buf.is_empty() {
                    trace!("Skipped {} bytes while resyncing", self.rx_buf.len());
                    self.rx_buf.clear();
                }
                false
            }
        }
    }

    /// Start or check the stall clock for the current buffer head.
    fn stalled(&mut self, idle: bool, limit: Duration) -> bool {
        let since = *self.stalled_since.get_or_insert_with(Instant::now);
        if idle && since.elapsed() >= limit {
            self.stalled_since = None;
            true
        } else {
            false
        }
    }

    fn handle_line(&self, raw: &[u8]) {
        let text = String::from_utf8_lossy(raw);
        let cleaned = strip_non_printable(&decode_html_entities(&text));
        let cleaned = cleaned.trim();
        if cleaned.is_empty() {
            return;
        }
        if !is_json_candidate(cleaned) {
            trace!("Ignoring {}-byte non-JSON line", raw.len());
            self.session.shared_metrics().inc_lines_discarded();
            return;
        }
        match serde_json::from_str::<SimulatedMessage>(cleaned) {
            Ok(sim) => {
                let msg = self.session.inbound_from_simulated(sim);
                info!(
                    "RX line {} ch={:?} {}: {}",
                    msg.kind,
                    msg.channel_name,
                    msg.sender,
                    truncate_for_log(&msg.content, 120)
                );
                self.session.deliver(msg);
            }
            Err(e) => {
                warn!("Malformed JSON line ({}): {}", e, truncate_for_log(cleaned, 80));
                self.session.shared_metrics().inc_lines_discarded();
            }
        }
    }
}

/// Index just past the `}` closing the object that opens `buf`.
fn json_object_end(buf: &[u8]) -> Option<usize> {
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;
    for (i, &b) in buf.iter().enumerate() {
        if in_string {
            match b {
                _ if escaped => escaped = false,
                b'\\' => escaped = true,
                b'"' => in_string = false,
                _ => {}
            }
            continue;
        }
        match b {
            b'"' => in_string = true,
            b'{' => depth += 1,
            b'}' => {
                depth = depth.checked_sub(1)?;
                if depth == 0 {
                    return Some(i + 1);
                }
            }
            _ => {}
        }
    }
    None
}

/// Position of a frame marker that follows a complete JSON object, blanks aside.
fn frame_after_json(buf: &[u8]) -> Option<usize> {
    let end = json_object_end(buf)?;
    let gap = buf[end..]
        .iter()
        .position(|&b| !matches!(b, b' ' | b'\t' | b'\r'))?;
    (buf[end + gap] == FRAME_FROM_RADIO).then_some(end + gap)
}
