//! Douyu STT (serialized text transport) codec.
//!
//! Records are `key@=value` pairs separated by `/`, with `@` escaped as
//! `@A` and `/` as `@S`. On the wire each record rides in a binary frame:
//!
//! ```text
//! | length (u32 LE) | length (u32 LE) | B1 02 00 00 | payload | 00 |
//! ```
//!
//! where length = payload + 9 (second length field + magic + NUL).

use bytes::{BufMut, Bytes, BytesMut};
use rustc_hash::FxHashMap;

/// Client → server frame magic.
const CLIENT_MAGIC: [u8; 4] = [0xb1, 0x02, 0x00, 0x00];

/// Bytes the length field covers beyond the payload.
const FRAME_OVERHEAD: u32 = 9;

/// Escape `@` as `@A` and `/` as `@S`.
pub fn escape(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '@' => out.push_str("@A"),
            '/' => out.push_str("@S"),
            _ => out.push(c),
        }
    }
    out
}

/// Reverse [`escape`].
pub fn unescape(s: &str) -> String {
    s.replace("@S", "/").replace("@A", "@")
}

/// Decode one STT record into its key/value pairs.
pub fn decode_record(record: &str) -> FxHashMap<String, String> {
    let mut map = FxHashMap::default();
    for field in record.split('/') {
        if field.is_empty() {
            continue;
        }
        if let Some((key, value)) = field.split_once("@=") {
            map.insert(unescape(key), unescape(value));
        }
    }
    map
}

/// Wrap an STT record in the binary frame the server expects.
pub fn frame(payload: &str) -> Bytes {
    let payload = payload.as_bytes();
    let length = payload.len() as u32 + FRAME_OVERHEAD;

    let mut buf = BytesMut::with_capacity(payload.len() + 13);
    buf.put_u32_le(length);
    buf.put_u32_le(length);
    buf.put_slice(&CLIENT_MAGIC);
    buf.put_slice(payload);
    buf.put_u8(0x00);
    buf.freeze()
}

/// Login request for a room.
pub fn login_record(room_id: &str) -> String {
    format!("type@=loginreq/roomid@={}/", escape(room_id))
}

/// Join the given danmu group of a room.
pub fn join_group_record(room_id: &str, group_id: i32) -> String {
    format!("type@=joingroup/rid@={}/gid@={}/", escape(room_id), group_id)
}

/// Keepalive carrying the current unix timestamp.
pub fn keepalive_record(tick: i64) -> String {
    format!("type@=keeplive/tick@={tick}/")
}

/// All `chatmsg` sub-records found in a decoded text buffer. A record runs
/// from its `type@=chatmsg/` marker through its `el` terminator field (or
/// the end of the buffer).
pub fn chat_records(text: &str) -> Vec<&str> {
    const START: &str = "type@=chatmsg/";
    const END: &str = "/el@=";

    let mut records = Vec::new();
    let mut rest = text;
    while let Some(pos) = rest.find(START) {
        let tail = &rest[pos..];
        let end = tail
            .find(END)
            .map(|i| i + END.len())
            .or_else(|| tail.find('\0'))
            .unwrap_or(tail.len());
        records.push(&tail[..end]);
        rest = &tail[end..];
    }
    records
}
