//! MeshCore companion-radio command and response codes.
//!
//! Payload layouts for received text (offsets are derived from the widths below, never
//! hard-coded):
//!
//! ```text
//! channel, legacy   : code | ch_idx | path_len | txt_type | ts(4) | text
//! channel, extended : code | snr | reserved(2) | ch_idx | path_len | txt_type | ts(4) | text
//! direct, legacy    : code | key_prefix(6) | path_len | txt_type | ts(4) | text
//! direct, extended  : code | snr | reserved(2) | key_prefix(6) | path_len | txt_type | ts(4) | text
//! ```

/// Host -> radio command codes.
pub mod cmd {
    pub const APP_START: u8 = 0x01;
    pub const SEND_TXT_MSG: u8 = 0x02;
    pub const SEND_CHANNEL_TXT_MSG: u8 = 0x03;
    pub const SET_DEVICE_TIME: u8 = 0x06;
    /// Reply to the radio's device-time request.
    pub const CURR_TIME: u8 = 0x09;
    pub const SYNC_NEXT_MESSAGE: u8 = 0x0A;
    pub const DEVICE_QUERY: u8 = 0x16;
}

pub const APP_PROTOCOL_VERSION: u8 = 0x03;
pub const FIRMWARE_VER: u8 = 9;
pub const TXT_TYPE_PLAIN: u8 = 0;
/// Session identifiers longer than this are cut at a char boundary.
pub const MAX_APP_NAME_LEN: usize = 32;
/// Sender used when channel text carries no `"name: "` prefix.
pub const UNKNOWN_SENDER: &str = "unknown";

const CODE_LEN: usize = 1;
const LINK_QUALITY_LEN: usize = 3; // snr(1) + reserved(2)
const CHANNEL_IDX_LEN: usize = 1;
pub const KEY_PREFIX_LEN: usize = 6;
const PATH_LEN_LEN: usize = 1;
const TXT_TYPE_LEN: usize = 1;
const TIMESTAMP_LEN: usize = 4;
const APP_START_RESERVED_LEN: usize = 6;
/// The node name in a self-info reply starts here and runs to the end of the payload.
pub const SELF_INFO_NAME_OFFSET: usize = 56;

/// Whether a text response carries the link-quality prefix.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Layout {
    Legacy,
    Extended,
}

impl Layout {
    const fn prefix_len(self) -> usize {
        match self {
            Layout::Legacy => 0,
            Layout::Extended => LINK_QUALITY_LEN,
        }
    }
}

/// Every code the radio may put in `payload[0]`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseCode {
    Keepalive,
    SessionInitEcho,
    DeviceTimeRequest,
    /// Answer to the session-init command; shares code 0x05 with the time request.
    SelfInfo,
    Sent,
    DirectMessage(Layout),
    ChannelMessage(Layout),
    /// Inline channel message pushed without a drain request (legacy layout).
    ChannelMessagePush,
    CurrentTime,
    QueueEmpty,
    DeviceInfo,
    MessageAck,
    MessageWaiting,
    Unknown(u8),
}

impl From<u8> for ResponseCode {
    fn from(code: u8) -> Self {
        match code {
            0x00 => ResponseCode::Keepalive,
            0x01 => ResponseCode::SessionInitEcho,
            0x05 => ResponseCode::DeviceTimeRequest,
            0x06 => ResponseCode::Sent,
            0x07 => ResponseCode::DirectMessage(Layout::Legacy),
            0x08 => ResponseCode::ChannelMessage(Layout::Legacy),
            0x09 => ResponseCode::CurrentTime,
            0x0A => ResponseCode::QueueEmpty,
            0x0D => ResponseCode::DeviceInfo,
            0x10 => ResponseCode::DirectMessage(Layout::Extended),
            0x11 => ResponseCode::ChannelMessage(Layout::Extended),
            0x82 => ResponseCode::MessageAck,
            0x83 => ResponseCode::MessageWaiting,
            0x88 => ResponseCode::ChannelMessagePush,
            other => ResponseCode::Unknown(other),
        }
    }
}

impl ResponseCode {
    /// Classify a whole payload. Code 0x05 is a self-info reply when it is long enough to
    /// carry the node name, otherwise a device-time request.
    pub fn of(payload: &[u8]) -> Option<Self> {
        let &code = payload.first()?;
        Some(match Self::from(code) {
            ResponseCode::DeviceTimeRequest if payload.len() >= SELF_INFO_NAME_OFFSET => {
                ResponseCode::SelfInfo
            }
            other => other,
        })
    }
}

/// Where a received text came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Origin {
    Channel(u8),
    Contact([u8; KEY_PREFIX_LEN]),
}

/// Fields extracted from a text response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReceivedText {
    pub origin: Origin,
    /// Raw SNR byte (quarter dB) for extended layouts.
    pub snr: Option<i8>,
    pub sender_timestamp: u32,
    pub text: String,
}

struct FieldOffsets {
    origin: usize,
    timestamp: usize,
    text: usize,
}

const fn field_offsets(layout: Layout, origin_len: usize) -> FieldOffsets {
    let origin = CODE_LEN + layout.prefix_len();
    let path_len = origin + origin_len;
    let txt_type = path_len + PATH_LEN_LEN;
    let timestamp = txt_type + TXT_TYPE_LEN;
    FieldOffsets {
        origin,
        timestamp,
        text: timestamp + TIMESTAMP_LEN,
    }
}

/// Offset of the first text byte in a channel message.
pub const fn channel_text_offset(layout: Layout) -> usize {
    field_offsets(layout, CHANNEL_IDX_LEN).text
}

/// Offset of the first text byte in a direct message.
pub const fn direct_text_offset(layout: Layout) -> usize {
    field_offsets(layout, KEY_PREFIX_LEN).text
}

fn read_common(payload: &[u8], layout: Layout, offsets: &FieldOffsets) -> Option<(Option<i8>, u32, String)> {
    if payload.len() < offsets.text {
        return None;
    }
    let snr = match layout {
        Layout::Legacy => None,
        Layout::Extended => Some(payload[CODE_LEN] as i8),
    };
    let ts_bytes: [u8; TIMESTAMP_LEN] = payload[offsets.timestamp..offsets.text].try_into().ok()?;
    let text = String::from_utf8_lossy(&payload[offsets.text..])
        .trim_end_matches('\0')
        .to_string();
    Some((snr, u32::from_le_bytes(ts_bytes), text))
}

/// Parse a channel text response. `None` when the payload is shorter than the layout.
pub fn parse_channel_message(payload: &[u8], layout: Layout) -> Option<ReceivedText> {
    let offsets = field_offsets(layout, CHANNEL_IDX_LEN);
    let (snr, sender_timestamp, text) = read_common(payload, layout, &offsets)?;
    Some(ReceivedText {
        origin: Origin::Channel(payload[offsets.origin]),
        snr,
        sender_timestamp,
        text,
    })
}

/// Parse a direct text response. `None` when the payload is shorter than the layout.
pub fn parse_direct_message(payload: &[u8], layout: Layout) -> Option<ReceivedText> {
    let offsets = field_offsets(layout, KEY_PREFIX_LEN);
    let (snr, sender_timestamp, text) = read_common(payload, layout, &offsets)?;
    let key: [u8; KEY_PREFIX_LEN] = payload[offsets.origin..offsets.origin + KEY_PREFIX_LEN]
        .try_into()
        .ok()?;
    Some(ReceivedText {
        origin: Origin::Contact(key),
        snr,
        sender_timestamp,
        text,
    })
}

/// Split `"<sender>: <text>"` at the first separator.
pub fn split_sender(text: &str) -> (String, String) {
    match text.find(": ") {
        Some(pos) if pos > 0 => (text[..pos].to_string(), text[pos + 2..].to_string()),
        _ => (UNKNOWN_SENDER.to_string(), text.to_string()),
    }
}

pub fn key_prefix_hex(key: &[u8]) -> String {
    key.iter().map(|b| format!("{:02x}", b)).collect()
}

/// Parse a hex public-key prefix (12 hex digits) as accepted by the send path.
pub fn parse_key_prefix(hex: &str) -> Option<[u8; KEY_PREFIX_LEN]> {
    let hex = hex.trim();
    if hex.len() != KEY_PREFIX_LEN * 2 || !hex.is_ascii() {
        return None;
    }
    let mut out = [0u8; KEY_PREFIX_LEN];
    for (i, slot) in out.iter_mut().enumerate() {
        *slot = u8::from_str_radix(&hex[i * 2..i * 2 + 2], 16).ok()?;
    }
    Some(out)
}

/// Firmware details reported in response to a device query.
#[derive(Debug, Clone, Default, PartialEq, Eq, serde::Serialize)]
pub struct DeviceInfo {
    pub fw_ver_code: u8,
    pub max_contacts: u16,
    pub build_date: Option<String>,
    pub manufacturer: Option<String>,
    pub fw_version: Option<String>,
}

const DEVICE_INFO_FULL_LEN: usize = 80;

fn fixed_str(bytes: &[u8]) -> String {
    String::from_utf8_lossy(bytes).trim_end_matches('\0').to_string()
}

pub fn parse_device_info(payload: &[u8]) -> Option<DeviceInfo> {
    if payload.len() < 3 {
        return None;
    }
    let mut info = DeviceInfo {
        fw_ver_code: payload[1],
        max_contacts: payload[2] as u16 * 2,
        ..Default::default()
    };
    if payload.len() >= DEVICE_INFO_FULL_LEN {
        info.build_date = Some(fixed_str(&payload[7..19]));
        info.manufacturer = Some(fixed_str(&payload[19..59]));
        info.fw_version = Some(fixed_str(&payload[59..79]));
    }
    Some(info)
}

/// Node name carried by a self-info reply, NUL padding removed.
pub fn parse_self_info(payload: &[u8]) -> Option<String> {
    payload.get(SELF_INFO_NAME_OFFSET..).map(fixed_str)
}

pub fn unix_now() -> u32 {
    chrono::Utc::now().timestamp().clamp(0, u32::MAX as i64) as u32
}

// ---------- Command payload builders ----------

/// Session-initialisation command: protocol version, reserved bytes, app name.
pub fn app_start(node_name: &str) -> Vec<u8> {
    let mut cut = node_name.len().min(MAX_APP_NAME_LEN);
    while !node_name.is_char_boundary(cut) {
        cut -= 1;
    }
    let mut out = Vec::with_capacity(2 + APP_START_RESERVED_LEN + cut);
    out.push(cmd::APP_START);
    out.push(APP_PROTOCOL_VERSION);
    out.extend_from_slice(&[0u8; APP_START_RESERVED_LEN]);
    out.extend_from_slice(&node_name.as_bytes()[..cut]);
    out
}

pub fn device_query() -> Vec<u8> {
    vec![cmd::DEVICE_QUERY, FIRMWARE_VER]
}

pub fn sync_next_message() -> Vec<u8> {
    vec![cmd::SYNC_NEXT_MESSAGE]
}

pub fn device_time_reply(now: u32) -> Vec<u8> {
    let mut out = vec![cmd::CURR_TIME];
    out.extend_from_slice(&now.to_le_bytes());
    out
}

pub fn set_device_time(now: u32) -> Vec<u8> {
    let mut out = vec![cmd::SET_DEVICE_TIME];
    out.extend_from_slice(&now.to_le_bytes());
    out
}

pub fn channel_text(channel_index: u8, timestamp: u32, text: &str) -> Vec<u8> {
    let mut out = Vec::with_capacity(3 + TIMESTAMP_LEN + text.len());
    out.push(cmd::SEND_CHANNEL_TXT_MSG);
    out.push(TXT_TYPE_PLAIN);
    out.push(channel_index);
    out.extend_from_slice(&timestamp.to_le_bytes());
    out.extend_from_slice(text.as_bytes());
    out
}

pub fn direct_text(key: &[u8; KEY_PREFIX_LEN], timestamp: u32, text: &str) -> Vec<u8> {
    let mut out = Vec::with_capacity(3 + TIMESTAMP_LEN + KEY_PREFIX_LEN + text.len());
    out.push(cmd::SEND_TXT_MSG);
    out.push(TXT_TYPE_PLAIN);
    out.push(0); // attempt
    out.extend_from_slice(&timestamp.to_le_bytes());
    out.extend_from_slice(key);
    out.extend_from_slice(text.as_bytes());
    out
}
