//! Douyu platform: delimited text records over a framed TCP stream.
//!
//! Control records (login, join group, keepalive) and chat payloads all use
//! the STT text format defined in [`stt`]. The chat endpoint address is
//! fixed; room ids are resolved and verified through the public room API.

pub mod stt;

use async_trait::async_trait;
use bytes::Bytes;
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
    LazyLock::new(|| Regex::new(r"^(?:https?://)?(?:www\.)?douyu\.com/(\w+)").unwrap());

const SITE: &str = "douyu";

/// Chat endpoint (plain TCP).
const CHAT_ADDR: &str = "openbarrage.douyutv.com:8601";
/// Public room status/info endpoint.
const ROOM_API: &str = "http://open.douyucdn.cn/api/RoomApi/room";

/// Main danmu group.
const DEFAULT_GROUP_ID: i32 = -9999;

const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(30);

/// Session parameters for one connection.
#[derive(Debug, Clone)]
pub struct DouyuParams {
    /// Canonical numeric room id resolved via the room API.
    pub room_id: String,
}

#[derive(Debug, Default)]
pub struct Douyu;

impl Douyu {
    pub fn new() -> Self {
        Self
    }

    async fn room_info(&self, http: &HttpClient, room_id: &str) -> Result<serde_json::Value> {
        let value = http
            .get_json(&format!("{ROOM_API}/{room_id}"), &[])
            .await?;
        if value["error"].as_i64() != Some(0) {
            return Err(BarrageError::bad_room(format!("unknown douyu room {room_id}")));
        }
        Ok(value)
    }
}

#[async_trait]
impl Platform for Douyu {
    type Params = DouyuParams;

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
        let value = self.room_info(http, &room_id).await?;
        Ok(value["data"]["room_status"].as_str() == Some("1"))
    }

    async fn prepare(&self, http: &HttpClient, room: &Room<DouyuParams>) -> Result<String> {
        let value = self.room_info(http, &room.id()).await?;
        let data = &value["data"];

        if data["room_status"].as_str() != Some("1") {
            return Err(BarrageError::negotiation(format!(
                "douyu room {} is not live",
                room.id()
            )));
        }

        // Vanity URLs resolve to a numeric id here.
        if let Some(resolved) = data["room_id"].as_str() {
            room.set_id(resolved);
        }
        room.set_params(DouyuParams { room_id: room.id() });

        Ok(CHAT_ADDR.to_string())
    }

    fn handshake_frames(&self, room: &Room<DouyuParams>) -> Vec<Bytes> {
        let room_id = room.id();
        vec![
            stt::frame(&stt::login_record(&room_id)),
            stt::frame(&stt::join_group_record(&room_id, DEFAULT_GROUP_ID)),
            stt::frame(&stt::keepalive_record(Utc::now().timestamp())),
        ]
    }

    fn heartbeat_interval(&self) -> Option<Duration> {
        Some(HEARTBEAT_INTERVAL)
    }

    fn heartbeat_frame(&self) -> Bytes {
        stt::frame(&stt::keepalive_record(Utc::now().timestamp()))
    }

    fn encode_frame(&self, payload: &[u8]) -> Bytes {
        stt::frame(&String::from_utf8_lossy(payload))
    }

    fn decode(&self, room_id: &str, data: &[u8]) -> Vec<Message> {
        let text = String::from_utf8_lossy(data);
        let mut messages = Vec::new();

        for record in stt::chat_records(&text) {
            let fields = stt::decode_record(record);
            if let (Some(sender), Some(body)) = (fields.get("nn"), fields.get("txt")) {
                messages.push(Message::chat(SITE, room_id, sender, body));
            }
        }

        if messages.is_empty() {
            vec![Message::other(SITE, room_id, text.into_owned())]
        } else {
            messages
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_url_matching() {
        let douyu = Douyu::new();
        assert!(douyu.supports_url("https://www.douyu.com/793400"));
        assert!(douyu.supports_url("http://douyu.com/793400"));
        assert!(!douyu.supports_url("https://www.panda.tv/793400"));
        assert!(!douyu.supports_url("https://douyu.com/"));
        assert_eq!(
            douyu.room_id("https://www.douyu.com/793400"),
            Some("793400".to_string())
        );
    }

    #[test]
    fn test_decode_chat_record() {
        let messages = Douyu::new().decode("793400", b"type@=chatmsg/nn@=bob/txt@=hello/el@=");
        assert_eq!(messages, vec![Message::chat(SITE, "793400", "bob", "hello")]);
    }

    #[test]
    fn test_decode_without_chatmsg_yields_other() {
        let raw = b"type@=keeplive/tick@=1490000000/";
        let messages = Douyu::new().decode("793400", raw);
        assert_eq!(messages.len(), 1);
        match &messages[0] {
            Message::Other { payload, .. } => {
                assert_eq!(payload, "type@=keeplive/tick@=1490000000/")
            }
            _ => unreachable!(),
        }
    }

    #[test]
    fn test_decode_multiple_chat_records() {
        let raw = b"type@=chatmsg/nn@=a/txt@=x/el@=type@=chatmsg/nn@=b/txt@=y/el@=";
        let messages = Douyu::new().decode("1", raw);
        assert_eq!(
            messages,
            vec![
                Message::chat(SITE, "1", "a", "x"),
                Message::chat(SITE, "1", "b", "y"),
            ]
        );
    }

    #[test]
    fn test_decode_unescapes_text() {
        let raw = b"type@=chatmsg/nn@=bob/txt@=a@Sb@Ac/el@=";
        let messages = Douyu::new().decode("1", raw);
        assert_eq!(messages, vec![Message::chat(SITE, "1", "bob", "a/b@c")]);
    }

    #[test]
    fn test_handshake_frames_order() {
        let room: Room<DouyuParams> = Room::new("https://www.douyu.com/793400", "793400");
        let frames = Douyu::new().handshake_frames(&room);
        assert_eq!(frames.len(), 3);

        // Payload sits between the 12-byte header and the trailing NUL.
        let payload = |frame: &Bytes| {
            String::from_utf8_lossy(&frame[12..frame.len() - 1]).into_owned()
        };
        assert_eq!(payload(&frames[0]), "type@=loginreq/roomid@=793400/");
        assert_eq!(
            payload(&frames[1]),
            "type@=joingroup/rid@=793400/gid@=-9999/"
        );
        assert!(payload(&frames[2]).starts_with("type@=keeplive/tick@="));
    }

    #[test]
    fn test_heartbeat_cadence() {
        assert_eq!(
            Douyu::new().heartbeat_interval(),
            Some(Duration::from_secs(30))
        );
    }
}
