//! Test utilities & fixtures.
//! Builds sessions over a scripted radio and the frames such a radio emits.
#![allow(dead_code)] // each test binary uses a different subset

use std::sync::{Arc, Mutex};
use std::time::Duration;

use meshcore_bot::meshcore::framer::encode_from_radio;
use meshcore_bot::meshcore::{
    InboundMessage, MessageKind, MockRadio, MockTransport, ProtocolSession, SessionConfig,
};

/// Host frame asking for the next queued message.
pub const DRAIN: [u8; 4] = [b'<', 0x01, 0x00, 0x0A];

pub fn fast_config() -> SessionConfig {
    SessionConfig {
        settle_delay: Duration::ZERO,
        poll_interval: Duration::from_millis(5),
        ..SessionConfig::default()
    }
}

/// Session over a mock radio, not yet started.
pub fn session_with(config: SessionConfig) -> (ProtocolSession, MockRadio) {
    let (transport, radio) = MockTransport::pair();
    let session = ProtocolSession::new(Box::new(transport), config).expect("session");
    (session, radio)
}

/// Started session with the handshake writes already cleared.
pub async fn started_session() -> (ProtocolSession, MockRadio) {
    let (mut session, radio) = session_with(fast_config());
    session.start().await.expect("start");
    radio.clear_writes();
    (session, radio)
}

/// Poll `cond` until it holds or two seconds pass.
pub async fn wait_until(cond: impl Fn() -> bool) -> bool {
    for _ in 0..400 {
        if cond() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    cond()
}

/// Let the listener run a few polls.
pub async fn settle() {
    tokio::time::sleep(Duration::from_millis(60)).await;
}

/// Handler that records every message it sees.
pub fn recorder(session: &ProtocolSession, kind: MessageKind) -> Arc<Mutex<Vec<InboundMessage>>> {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = seen.clone();
    session.register(kind, move |msg, _session| {
        sink.lock().unwrap().push(msg.clone());
    });
    seen
}

pub fn count(seen: &Arc<Mutex<Vec<InboundMessage>>>) -> usize {
    seen.lock().unwrap().len()
}

/// Radio frame for a legacy (0x08) channel message.
pub fn channel_frame(idx: u8, ts: u32, text: &str) -> Vec<u8> {
    let mut p = vec![0x08, idx, 0xFF, 0x00];
    p.extend_from_slice(&ts.to_le_bytes());
    p.extend_from_slice(text.as_bytes());
    encode_from_radio(&p)
}

/// Radio frame for an extended (0x11) channel message.
pub fn channel_frame_extended(idx: u8, ts: u32, text: &str) -> Vec<u8> {
    let mut p = vec![0x11, 0x28, 0x00, 0x00, idx, 0x02, 0x00];
    p.extend_from_slice(&ts.to_le_bytes());
    p.extend_from_slice(text.as_bytes());
    encode_from_radio(&p)
}

/// Radio frame for a legacy (0x07) direct message.
pub fn direct_frame(key: [u8; 6], ts: u32, text: &str) -> Vec<u8> {
    let mut p = vec![0x07];
    p.extend_from_slice(&key);
    p.extend_from_slice(&[0x00, 0x00]);
    p.extend_from_slice(&ts.to_le_bytes());
    p.extend_from_slice(text.as_bytes());
    encode_from_radio(&p)
}

pub fn code_frame(code: u8) -> Vec<u8> {
    encode_from_radio(&[code])
}

/// Radio answer to the session-init command, carrying the node name at byte 56.
pub fn self_info_frame(name: &str) -> Vec<u8> {
    let mut p = vec![0u8; 56];
    p[0] = 0x05;
    p[1] = 0x01;
    p.extend_from_slice(name.as_bytes());
    encode_from_radio(&p)
}
