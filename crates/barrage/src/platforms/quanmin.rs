//! Quanmin platform: length-prefixed JSON protocol.
//!
//! The chat server address is discovered through a route endpoint returning
//! an obfuscated 16-byte blob; the handshake is a length-prefixed JSON body
//! whose byte layout the server checks verbatim. Inbound data is a stream of
//! JSON objects scanned for chat records.

use async_trait::async_trait;
use bytes::{BufMut, Bytes, BytesMut};
use chrono::Utc;
use regex::Regex;
use std::sync::LazyLock;

use crate::client::Platform;
use crate::error::{BarrageError, Result};
use crate::http::HttpClient;
use crate::message::Message;
use crate::room::Room;

pub static URL_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(?:https?://)?(?:www\.)?quanmin\.tv/(\w+)").unwrap());

/// Chat records end in `"cid":1`; everything else in the stream is noise.
static CHAT_RECORD_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"\{"ver".*?"cid":1\}"#).unwrap());

const SITE: &str = "quanmin";

const ROUTE_URL: &str = "http://www.quanmin.tv/site/route";
const ROOM_INFO_URL: &str = "http://www.quanmin.tv/json/rooms";

/// Chat servers all listen on this port.
const CHAT_PORT: u16 = 9098;

/// Each 32-bit word of the route blob is XORed with this constant.
const ROUTE_MASK: u32 = 172;

/// Session parameters for one connection.
#[derive(Debug, Clone)]
pub struct QuanminParams {
    /// Numeric room uid used in the handshake.
    pub uid: u64,
}

/// Recover the chat server IPv4 address from the route endpoint's 16-byte
/// blob: four u32-BE words, each XOR [`ROUTE_MASK`], give the octets in
/// order.
pub fn decode_route(blob: &[u8]) -> Result<String> {
    if blob.len() < 16 {
        return Err(BarrageError::negotiation(format!(
            "route blob too short: {} bytes",
            blob.len()
        )));
    }

    let mut octets = [0u32; 4];
    for (i, octet) in octets.iter_mut().enumerate() {
        let word = u32::from_be_bytes([
            blob[i * 4],
            blob[i * 4 + 1],
            blob[i * 4 + 2],
            blob[i * 4 + 3],
        ]);
        *octet = word ^ ROUTE_MASK;
    }

    Ok(format!(
        "{}.{}.{}.{}",
        octets[0], octets[1], octets[2], octets[3]
    ))
}

/// Build the handshake frame: u32-BE length + JSON body + newline. The body
/// layout (including whitespace) is exactly what the server expects.
pub fn handshake_frame(uid: u64) -> Bytes {
    let body = format!(
        "{{\n   \"os\" : 135,\n   \"pid\" : 10003,\n   \"rid\" : \"{uid}\",\n   \"timestamp\" : 78,\n   \"ver\" : 147\n}}"
    );

    let mut buf = BytesMut::with_capacity(body.len() + 5);
    buf.put_u32(body.len() as u32);
    buf.put_slice(body.as_bytes());
    buf.put_u8(0x0a);
    buf.freeze()
}

/// Normalize one matched chat record. The record's `chat.json` field is
/// itself a JSON document carrying the sender and text.
fn normalize(room_id: &str, record: &str) -> Option<Message> {
    let value: serde_json::Value = serde_json::from_str(record).ok()?;

    let chat = value["chat"]["json"]
        .as_str()
        .and_then(|inner| serde_json::from_str::<serde_json::Value>(inner).ok());

    if let Some(chat) = chat {
        if let (Some(sender), Some(text)) = (chat["user"]["nick"].as_str(), chat["text"].as_str()) {
            return Some(Message::chat(SITE, room_id, sender, text));
        }
    }

    Some(Message::other(SITE, room_id, record))
}

#[derive(Debug, Default)]
pub struct Quanmin;

impl Quanmin {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Platform for Quanmin {
    type Params = QuanminParams;

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

    async fn online(&self, _http: &HttpClient, _url: &str) -> Result<bool> {
        // No public status endpoint.
        Ok(true)
    }

    async fn prepare(&self, http: &HttpClient, room: &Room<QuanminParams>) -> Result<String> {
        let now = Utc::now().timestamp();

        let blob = http
            .get(ROUTE_URL, &[("time", now.to_string())])
            .await?;
        let ip = decode_route(&blob)?;

        let segment = room.id();
        let uid = match segment.parse::<u64>() {
            Ok(uid) => uid,
            Err(_) => {
                // Vanity name: one extra lookup against the room info endpoint.
                let value = http
                    .get_json(
                        &format!("{ROOM_INFO_URL}/{segment}/info.json"),
                        &[("t", (now / 50).to_string())],
                    )
                    .await?;
                value["uid"].as_u64().ok_or_else(|| {
                    BarrageError::bad_room(format!("unknown quanmin room {segment}"))
                })?
            }
        };

        room.set_id(uid.to_string());
        room.set_params(QuanminParams { uid });

        Ok(format!("{ip}:{CHAT_PORT}"))
    }

    fn handshake_frames(&self, room: &Room<QuanminParams>) -> Vec<Bytes> {
        room.with_params(|params| match params {
            Some(params) => vec![handshake_frame(params.uid)],
            None => vec![],
        })
    }

    fn encode_frame(&self, payload: &[u8]) -> Bytes {
        // Application payloads are written as-is on this platform.
        Bytes::copy_from_slice(payload)
    }

    fn decode(&self, room_id: &str, data: &[u8]) -> Vec<Message> {
        let text = String::from_utf8_lossy(data);
        CHAT_RECORD_REGEX
            .find_iter(&text)
            .filter_map(|m| normalize(room_id, m.as_str()))
            .collect()
    }
}
