//! One-shot device query used to check a port before running a session on it.
use bytes::{Buf, BytesMut};
use log::{debug, trace};
use std::time::Duration;
use tokio::time::Instant;

use super::errors::Result;
use super::framer::{self, DecodeError, FRAME_FROM_RADIO};
use super::protocol::{self, DeviceInfo, ResponseCode};
use super::transport::Transport;

const PROBE_POLL: Duration = Duration::from_millis(20);

/// Send a device query and wait up to `timeout` for the device-info answer.
///
/// Anything else the radio sends meanwhile is skipped. `Ok(None)` means the port
/// is open but nothing that looked like a companion radio answered.
pub async fn probe_device(
    transport: &mut dyn Transport,
    timeout: Duration,
) -> Result<Option<DeviceInfo>> {
    let frame = framer::encode(&protocol::device_query())?;
    transport.write_all(&frame)?;
    transport.flush()?;

    let deadline = Instant::now() + timeout;
    let mut buf = BytesMut::new();
    let mut chunk = [0u8; 256];
    while Instant::now() < deadline {
        let available = transport.bytes_available()?;
        if available > 0 {
            let want = available.min(chunk.len());
            let n = transport.read(&mut chunk[..want])?;
            buf.extend_from_slice(&chunk[..n]);
        }
        while let Some(pos) = buf.iter().position(|&b| b == FRAME_FROM_RADIO) {
            buf.advance(pos);
            match framer::decode(&buf) {
                Ok((payload, used)) => {
                    buf.advance(used);
                    let code = payload.first().copied().unwrap_or_default();
                    if ResponseCode::from(code) == ResponseCode::DeviceInfo {
                        if let Some(info) = protocol::parse_device_info(&payload) {
                            return Ok(Some(info));
                        }
                    }
                    trace!("Probe skipped frame code 0x{:02x}", code);
                }
                Err(DecodeError::Incomplete) => break,
                Err(e) => {
                    debug!("Probe resync: {}", e);
                    buf.advance(1);
                }
            }
        }
        if !buf.first().is_some_and(|&b| b == FRAME_FROM_RADIO) {
            buf.clear();
        }
        tokio::time::sleep(PROBE_POLL).await;
    }
    Ok(None)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::meshcore::transport::MockTransport;

    fn device_info_payload() -> Vec<u8> {
        let mut p = vec![0x0D, 9, 50, 0, 0, 0, 0];
        let mut date = b"19 Feb 2026".to_vec();
        date.resize(12, 0);
        p.extend_from_slice(&date);
        let mut maker = b"Heltec V3".to_vec();
        maker.resize(40, 0);
        p.extend_from_slice(&maker);
        let mut ver = b"v1.13.0".to_vec();
        ver.resize(21, 0);
        p.extend_from_slice(&ver);
        p
    }

    #[tokio::test]
    async fn finds_device_info_behind_noise() {
        let (mut transport, radio) = MockTransport::pair();
        radio.feed(b"boot log line\r\n");
        radio.feed(&framer::encode_from_radio(&[0x0A]));
        radio.feed(&framer::encode_from_radio(&device_info_payload()));

        let info = probe_device(&mut transport, Duration::from_millis(500))
            .await
            .unwrap()
            .expect("device info");
        assert_eq!(info.fw_ver_code, 9);
        assert_eq!(info.manufacturer.as_deref(), Some("Heltec V3"));
        assert_eq!(info.fw_version.as_deref(), Some("v1.13.0"));
        assert_eq!(radio.writes(), vec![vec![b'<', 0x02, 0x00, 0x16, 0x09]]);
    }

    #[tokio::test]
    async fn silent_port_times_out() {
        let (mut transport, _radio) = MockTransport::pair();
        let info = probe_device(&mut transport, Duration::from_millis(60))
            .await
            .unwrap();
        assert!(info.is_none());
    }
}
