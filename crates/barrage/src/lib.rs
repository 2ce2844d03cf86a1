//! Barrage: live chat ("barrage"/danmu) collection library.
//!
//! Connects to the text-chat streams of several live-streaming platforms,
//! each with its own wire protocol, normalizes every inbound record into a
//! unified [`Message`] and delivers it to a caller-supplied [`Sink`].
//!
//! ## Core Types
//!
//! - [`Message`] - A normalized chat line or raw "other" record
//! - [`Platform`] - Trait for platform-specific wire protocols
//! - [`PlatformClient`] - Generic per-platform driver owning a set of rooms
//! - [`Registry`] - Routes room URLs to clients and supervises their run loops
//! - [`Room`] / [`RoomKey`] - One subscribed chat source and its dedup identity
//!
//! ## Platforms
//!
//! - [`platforms::Panda`] - length-prefixed binary frames
//! - [`platforms::Douyu`] - delimited text (STT) records
//! - [`platforms::Quanmin`] - length-prefixed JSON
//!
//! ## Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use barrage::{HttpClient, Message, Registry};
//!
//! # async fn demo() -> barrage::Result<()> {
//! let sink = Arc::new(|msg: Message| {
//!     if let Message::Chat { sender, text, .. } = msg {
//!         println!("{sender}: {text}");
//!     }
//! });
//! let registry = Registry::with_defaults(HttpClient::new(), sink);
//! registry.add("https://www.douyu.com/793400")?;
//! registry.run().await;
//! # Ok(())
//! # }
//! ```

pub mod client;
pub mod error;
pub mod http;
pub mod message;
pub mod platforms;
pub mod registry;
pub mod room;

pub use client::{ChatClient, Platform, PlatformClient};
pub use error::{BarrageError, Result};
pub use http::HttpClient;
pub use message::{Message, Sink};
pub use registry::Registry;
pub use room::{Room, RoomKey, RoomState, RoomStore, canonicalize_url, trailing_segment};
