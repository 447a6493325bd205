//! Length‑prefixed frame codec for the MeshCore companion serial link.
//!
//! Every binary unit on the wire is:
//!
//!   `<marker><len_lo><len_hi><payload bytes>`
//!
//! The radio prefixes its frames with `'>'` and expects host frames to start with `'<'`.
//! Decoding never trusts an out-of-range length: the caller drops only the marker byte
//! and rescans, because a corrupt length would otherwise swallow valid frames behind it.
use thiserror::Error;

/// Marker of frames emitted by the radio (radio -> host).
pub const FRAME_FROM_RADIO: u8 = b'>';
/// Marker of frames written by the host (host -> radio).
pub const FRAME_TO_RADIO: u8 = b'<';
/// Marker + 2 length bytes.
pub const HEADER_LEN: usize = 3;
/// Largest payload accepted from the radio.
pub const MAX_FRAME_SIZE: usize = 300;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum FrameError {
    #[error("payload of {0} bytes does not fit a 16-bit length prefix")]
    PayloadTooLarge(usize),
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum DecodeError {
    /// Not enough bytes buffered yet; retry once more input arrives.
    #[error("incomplete frame")]
    Incomplete,
    /// Declared length is zero or above [`MAX_FRAME_SIZE`].
    #[error("frame length {0} out of range")]
    OutOfRange(usize),
    /// First byte is not the radio frame marker.
    #[error("unexpected marker byte 0x{0:02x}")]
    BadMarker(u8),
}

/// Wrap a payload in a host -> radio frame.
pub fn encode(payload: &[u8]) -> Result<Vec<u8>, FrameError> {
    let len = u16::try_from(payload.len()).map_err(|_| FrameError::PayloadTooLarge(payload.len()))?;
    let mut out = Vec::with_capacity(HEADER_LEN + payload.len());
    out.push(FRAME_TO_RADIO);
    out.extend_from_slice(&len.to_le_bytes());
    out.extend_from_slice(payload);
    Ok(out)
}

/// Decode one radio frame from the front of `buf`.
///
/// On success returns the payload and the total number of bytes the frame occupied
/// (header included) so the caller can advance its buffer.
pub fn decode(buf: &[u8]) -> Result<(Vec<u8>, usize), DecodeError> {
    let Some(&marker) = buf.first() else {
        return Err(DecodeError::Incomplete);
    };
    if marker != FRAME_FROM_RADIO {
        return Err(DecodeError::BadMarker(marker));
    }
    if buf.len() < HEADER_LEN {
        return Err(DecodeError::Incomplete);
    }
    let declared = u16::from_le_bytes([buf[1], buf[2]]) as usize;
    if declared == 0 || declared > MAX_FRAME_SIZE {
        return Err(DecodeError::OutOfRange(declared));
    }
    let total = HEADER_LEN + declared;
    if buf.len() < total {
        return Err(DecodeError::Incomplete);
    }
    Ok((buf[HEADER_LEN..total].to_vec(), total))
}

/// Build a radio -> host frame. Used by simulators and tests that play the radio side.
pub fn encode_from_radio(payload: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(HEADER_LEN + payload.len());
    out.push(FRAME_FROM_RADIO);
    out.extend_from_slice(&(payload.len() as u16).to_le_bytes());
    out.extend_from_slice(payload);
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encode_prefixes_marker_and_le_length() {
        let frame = encode(&[0x0A]).unwrap();
        assert_eq!(frame, vec![b'<', 0x01, 0x00, 0x0A]);

        let big = vec![0x55u8; 0x0123];
        let frame = encode(&big).unwrap();
        assert_eq!(&frame[..3], &[b'<', 0x23, 0x01]);
        assert_eq!(frame.len(), 3 + 0x0123);
    }

    #[test]
    fn encode_rejects_oversized_payload() {
        let huge = vec![0u8; 65_536];
        assert_eq!(encode(&huge), Err(FrameError::PayloadTooLarge(65_536)));
        assert!(encode(&vec![0u8; 65_535]).is_ok());
    }

    #[test]
    fn decode_returns_payload_and_consumed_len() {
        let mut wire = encode_from_radio(b"\x08hello");
        wire.extend_from_slice(b"trailing");
        let (payload, used) = decode(&wire).unwrap();
        assert_eq!(payload, b"\x08hello");
        assert_eq!(used, 9);
    }

    #[test]
    fn round_trip_through_radio_marker() {
        for len in [1usize, 2, 172, MAX_FRAME_SIZE] {
            let payload: Vec<u8> = (0..len).map(|i| (i % 251) as u8).collect();
            let mut frame = encode(&payload).unwrap();
            frame[0] = FRAME_FROM_RADIO;
            let (decoded, used) = decode(&frame).unwrap();
            assert_eq!(decoded, payload);
            assert_eq!(used, frame.len());
        }
    }

    #[test]
    fn short_reads_are_incomplete_not_truncated() {
        let frame = encode_from_radio(b"\x08abcdef");
        for cut in 0..frame.len() {
            assert_eq!(decode(&frame[..cut]), Err(DecodeError::Incomplete), "cut={cut}");
        }
    }

    #[test]
    fn zero_and_oversize_lengths_are_out_of_range() {
        assert_eq!(decode(&[b'>', 0x00, 0x00, 0x0A]), Err(DecodeError::OutOfRange(0)));
        // 301 = 0x012D; the bytes after the header must not be treated as payload
        let mut wire = vec![b'>', 0x2D, 0x01];
        wire.extend_from_slice(&[0xAA; 301]);
        assert_eq!(decode(&wire), Err(DecodeError::OutOfRange(301)));
    }

    #[test]
    fn foreign_marker_is_reported() {
        assert_eq!(decode(b"{\"a\":1}"), Err(DecodeError::BadMarker(b'{')));
    }
}
