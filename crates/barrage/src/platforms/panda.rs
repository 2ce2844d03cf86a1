//! Panda platform: length-prefixed binary protocol.
//!
//! The chat socket speaks 4-byte-tagged binary frames. The handshake carries
//! a newline-separated `key:value` block negotiated over two sequential HTTP
//! calls; inbound data frames wrap a JSON payload.

use async_trait::async_trait;
use bytes::{BufMut, Bytes, BytesMut};
use chrono::Utc;
use regex::Regex;
use std::sync::LazyLock;
use std::time::Duration;

use crate::client::Platform;
use crate::error::{BarrageError, Result};
use crate::http::HttpClient;
use crate::message::Message;
use crate::room::Room;

pub static URL_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(?:https?://)?(?:www\.)?panda\.tv/(\w+)").unwrap());

const SITE: &str = "panda";

const STATUS_URL: &str = "http://www.panda.tv/api_room";
const CHATROOM_URL: &str = "http://www.panda.tv/ajax_chatroom";
const CHATINFO_URL: &str = "http://api.homer.panda.tv/chatroom/getinfo";

/// Outbound handshake frame tag.
const HANDSHAKE_HEADER: [u8; 4] = [0x00, 0x06, 0x00, 0x02];
/// Keepalive marker, also appended to the handshake frame.
const KEEPALIVE: [u8; 4] = [0x00, 0x06, 0x00, 0x00];
/// Inbound data frame tag.
const DATA_PREFIX: [u8; 4] = [0x00, 0x06, 0x00, 0x03];

/// Offset of the u32-BE payload length field in an inbound data frame.
const LEN_OFFSET: usize = 11;
/// The JSON payload begins this many bytes past the length field.
const PAYLOAD_SKIP: usize = 16;

const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(120);

/// Session parameters negotiated by `prepare`.
#[derive(Debug, Clone)]
pub struct PandaParams {
    /// `<rid>@<appid>`
    pub user: String,
    /// Constant capability flag.
    pub cap: u32,
    /// Session TTL in seconds.
    pub ttl: u32,
    pub ts: i64,
    pub sign: String,
    pub auth_type: String,
    /// Candidate chat server addresses (`host:port`).
    pub addrs: Vec<String>,
}

/// Build the handshake frame: header + u16-BE length + `key:value` block +
/// keepalive marker.
pub fn handshake_frame(params: &PandaParams) -> Bytes {
    let body = format!(
        "u:{}\nk:{}\nt:{}\nts:{}\nsign:{}\nauthtype:{}",
        params.user, params.cap, params.ttl, params.ts, params.sign, params.auth_type
    );

    let mut buf = BytesMut::with_capacity(body.len() + 10);
    buf.put_slice(&HANDSHAKE_HEADER);
    buf.put_u16(body.len() as u16);
    buf.put_slice(body.as_bytes());
    buf.put_slice(&KEEPALIVE);
    buf.freeze()
}

/// Extract the JSON payload of an inbound data frame, if the buffer holds
/// a complete one.
fn frame_payload(data: &[u8]) -> Option<&[u8]> {
    if !data.starts_with(&DATA_PREFIX) || data.len() < LEN_OFFSET + 4 {
        return None;
    }
    let len =
        u32::from_be_bytes([data[11], data[12], data[13], data[14]]) as usize;
    let start = LEN_OFFSET + 4 + PAYLOAD_SKIP;
    let end = LEN_OFFSET + 4 + len;
    if len <= PAYLOAD_SKIP || end > data.len() {
        return None;
    }
    Some(&data[start..end])
}

/// Normalize one decoded JSON payload. `type == "1"` is chat; everything
/// else is carried raw.
fn normalize(room_id: &str, payload: &[u8]) -> Message {
    if let Ok(value) = serde_json::from_slice::<serde_json::Value>(payload) {
        if value["type"].as_str() == Some("1") {
            if let (Some(name), Some(text)) = (
                value["data"]["from"]["nickName"].as_str(),
                value["data"]["content"].as_str(),
            ) {
                return Message::chat(SITE, room_id, name, text);
            }
        }
    }
    Message::other(SITE, room_id, String::from_utf8_lossy(payload))
}

#[derive(Debug, Default)]
pub struct Panda;

impl Panda {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Platform for Panda {
    type Params = PandaParams;

    fn name(&self) -> &'static str {
        SITE
    }

    fn supports_url(&self, url: &str) -> bool {
        URL_REGEX.is_match(url)
    }

    fn room_id(&self, url: &str) -> Option<String> {
        URL_REGEX
            .captures(url)
            .and_then(|caps| caps.get(1))
            .map(|m| m.as_str().to_string())
    }

    async fn online(&self, http: &HttpClient, url: &str) -> Result<bool> {
        let room_id = self
            .room_id(url)
            .ok_or_else(|| BarrageError::bad_room(url))?;
        let value = http
            .get_json(
                STATUS_URL,
                &[
                    ("roomid", room_id),
                    ("_", Utc::now().timestamp().to_string()),
                    ("pub_key", String::new()),
                ],
            )
            .await?;
        Ok(value["data"]["videoinfo"]["status"].as_str() == Some("2"))
    }

    async fn prepare(&self, http: &HttpClient, room: &Room<PandaParams>) -> Result<String> {
        let room_id = room.id();

        let value = http
            .get_json(
                CHATROOM_URL,
                &[
                    ("roomid", room_id.clone()),
                    ("_", Utc::now().timestamp().to_string()),
                ],
            )
            .await?;
        let data = &value["data"];
        let rid = data["rid"]
            .as_i64()
            .ok_or_else(|| BarrageError::bad_room(format!("unknown panda room {room_id}")))?;

        let value = http
            .get_json(
                CHATINFO_URL,
                &[
                    ("roomid", room_id.clone()),
                    ("rid", rid.to_string()),
                    ("retry", "0".to_string()),
                    ("sign", data["sign"].as_str().unwrap_or_default().to_string()),
                    ("ts", data["ts"].as_i64().unwrap_or_default().to_string()),
                    ("_", Utc::now().timestamp().to_string()),
                ],
            )
            .await?;
        let data = &value["data"];

        let appid = data["appid"]
            .as_str()
            .ok_or_else(|| BarrageError::negotiation("chatroom info missing appid"))?;
        let addrs: Vec<String> = data["chat_addr_list"]
            .as_array()
            .map(|list| {
                list.iter()
                    .filter_map(|v| v.as_str().map(str::to_string))
                    .collect()
            })
            .unwrap_or_default();
        let addr = addrs
            .first()
            .cloned()
            .ok_or_else(|| BarrageError::negotiation("empty chat_addr_list"))?;

        room.set_params(PandaParams {
            user: format!("{}@{}", data["rid"].as_i64().unwrap_or(rid), appid),
            cap: 1,
            ttl: 300,
            ts: data["ts"].as_i64().unwrap_or_default(),
            sign: data["sign"].as_str().unwrap_or_default().to_string(),
            auth_type: data["authType"].as_str().unwrap_or_default().to_string(),
            addrs,
        });

        Ok(addr)
    }

    fn handshake_frames(&self, room: &Room<PandaParams>) -> Vec<Bytes> {
        room.with_params(|params| match params {
            Some(params) => vec![handshake_frame(params)],
            None => vec![],
        })
    }

    fn heartbeat_interval(&self) -> Option<Duration> {
        Some(HEARTBEAT_INTERVAL)
    }

    fn heartbeat_frame(&self) -> Bytes {
        Bytes::from_static(&KEEPALIVE)
    }

    fn encode_frame(&self, payload: &[u8]) -> Bytes {
        // Application payloads are written as-is on this platform.
        Bytes::copy_from_slice(payload)
    }

    fn decode(&self, room_id: &str, data: &[u8]) -> Vec<Message> {
        match frame_payload(data) {
            Some(payload) => vec![normalize(room_id, payload)],
            None => vec![],
        }
    }
}
