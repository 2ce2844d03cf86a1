//! Generic platform client.
//!
//! The protocol seam is split in two, the same way the generic provider in
//! this crate's lineage is: a [`Platform`] trait carrying everything that is
//! platform-specific (negotiation, framing, decoding, heartbeat cadence) and
//! a generic [`PlatformClient`] that owns the room store and drives the
//! Prepare → Connect → Stream lifecycle for every room, one worker task per
//! room. The registry talks to clients through the object-safe
//! [`ChatClient`] trait.

use async_trait::async_trait;
use bytes::Bytes;
use std::io;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::AsyncReadExt;
use tokio::net::TcpStream;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::{BarrageError, Result};
use crate::http::HttpClient;
use crate::message::{Message, Sink};
use crate::room::{BoxedReader, Room, RoomKey, RoomState, RoomStore, canonicalize_url};

/// Interval between room-store rescans in a client's run loop, so rooms
/// added after `run` has started are still picked up.
const RESCAN_INTERVAL: Duration = Duration::from_secs(60);

/// Receive buffer size for a room connection.
const RECV_BUFFER_SIZE: usize = 4096;

/// Everything one platform's wire protocol defines.
///
/// `Params` is the platform's handshake-parameter type, written into the
/// room by [`Platform::prepare`] and immutable for the life of a connection.
#[async_trait]
pub trait Platform: Send + Sync + 'static {
    type Params: Send + Sync + 'static;

    /// Platform identifier (e.g. "douyu").
    fn name(&self) -> &'static str;

    /// Whether this platform owns the URL. Matching is anchored on the
    /// platform's domain, so no two platforms accept the same URL.
    fn supports_url(&self, url: &str) -> bool;

    /// Room id as written in the URL, if the URL is supported.
    fn room_id(&self, url: &str) -> Option<String>;

    /// Best-effort status probe against the platform's public HTTP status
    /// endpoint. Transport or parse failures surface as errors; the client
    /// fails them closed.
    async fn online(&self, http: &HttpClient, url: &str) -> Result<bool>;

    /// Out-of-band negotiation required before opening the socket. Writes
    /// the handshake parameters into the room and returns the socket
    /// address of the chat endpoint.
    async fn prepare(&self, http: &HttpClient, room: &Room<Self::Params>) -> Result<String>;

    /// Frames to send right after the transport opens.
    fn handshake_frames(&self, room: &Room<Self::Params>) -> Vec<Bytes>;

    /// Keepalive period, if the platform needs a heartbeat task.
    fn heartbeat_interval(&self) -> Option<Duration> {
        None
    }

    /// The keepalive frame sent on each heartbeat tick.
    fn heartbeat_frame(&self) -> Bytes {
        Bytes::new()
    }

    /// Frame an application payload for `push_msg`.
    fn encode_frame(&self, payload: &[u8]) -> Bytes;

    /// Decode an inbound buffer into normalized messages. Malformed records
    /// are dropped locally, never escalated.
    fn decode(&self, room_id: &str, data: &[u8]) -> Vec<Message>;
}

/// Object-safe surface the registry holds for each platform client.
#[async_trait]
pub trait ChatClient: Send + Sync {
    fn name(&self) -> &str;

    fn supports_url(&self, url: &str) -> bool;

    /// Register a room. Idempotent: a duplicate key is silently ignored.
    fn add(&self, url: &str) -> Result<()>;

    /// Deregister a room. No-op if absent. Does not forcibly terminate an
    /// in-flight worker.
    fn remove(&self, url: &str);

    fn has(&self, key: &RoomKey) -> bool;

    fn room_count(&self) -> usize;

    /// Best-effort liveness probe; fails closed.
    async fn online(&self, url: &str) -> bool;

    /// Supervise this client's rooms until cancelled: spawn the heartbeat
    /// scheduler if the platform has one, then launch one worker per
    /// unclaimed room on every rescan.
    async fn run(&self, cancel: CancellationToken, sink: Sink);
}

/// Generic driver for one platform: owns the room store and runs the
/// per-room lifecycle in the platform's wire protocol.
pub struct PlatformClient<P: Platform> {
    platform: Arc<P>,
    http: HttpClient,
    rooms: Arc<RoomStore<P::Params>>,
}

impl<P: Platform> PlatformClient<P> {
    pub fn new(platform: P, http: HttpClient) -> Self {
        Self {
            platform: Arc::new(platform),
            http,
            rooms: Arc::new(RoomStore::new()),
        }
    }

    /// The owned room store (shared with worker and heartbeat tasks).
    pub fn rooms(&self) -> &RoomStore<P::Params> {
        &self.rooms
    }

    /// Frame and write a payload on a registered room's connection.
    pub async fn push_msg(&self, url: &str, payload: &[u8]) -> Result<()> {
        let key = RoomKey::from_url(url);
        let room = self
            .rooms
            .get(&key)
            .ok_or_else(|| BarrageError::bad_room(url))?;
        room.send(&self.platform.encode_frame(payload)).await
    }

    /// One heartbeat pass: send the keepalive frame to every alive room.
    /// A send failure ends only the affected room's stream; its worker
    /// performs the teardown and the next rescan relaunches it.
    pub async fn heartbeat_tick(&self) {
        Self::heartbeat_rooms(&self.platform, &self.rooms).await;
    }

    async fn heartbeat_rooms(platform: &P, rooms: &RoomStore<P::Params>) {
        let frame = platform.heartbeat_frame();
        for (_, room) in rooms.entries() {
            if !room.is_alive() {
                continue;
            }
            if let Err(e) = room.send(&frame).await {
                warn!(
                    platform = platform.name(),
                    room = %room.id(),
                    "heartbeat failed: {e}; ending room stream"
                );
                room.deactivate();
            } else {
                debug!(platform = platform.name(), room = %room.id(), "heartbeat sent");
            }
        }
    }

    async fn heartbeat_loop(
        platform: Arc<P>,
        rooms: Arc<RoomStore<P::Params>>,
        period: Duration,
        cancel: CancellationToken,
    ) {
        let mut ticker = tokio::time::interval(period);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        // interval fires immediately; consume the first tick.
        ticker.tick().await;
        loop {
            tokio::select! {
                _ = cancel.cancelled() => return,
                _ = ticker.tick() => {}
            }
            Self::heartbeat_rooms(&platform, &rooms).await;
        }
    }

    /// Full room lifecycle: Prepare → Connect → handshake → Stream.
    async fn stream_room(
        platform: &P,
        http: &HttpClient,
        room: &Room<P::Params>,
        cancel: CancellationToken,
        sink: Sink,
    ) -> Result<()> {
        let addr = platform.prepare(http, room).await?;

        let stream = TcpStream::connect(&addr).await?;
        let (reader, writer) = stream.into_split();
        room.install_writer(Box::new(writer)).await;
        room.set_state(RoomState::Connected);

        for frame in platform.handshake_frames(room) {
            room.send(&frame).await?;
        }
        room.set_state(RoomState::Streaming);
        info!(platform = platform.name(), room = %room.id(), url = room.url(), "streaming");

        Self::pull(platform, room, Box::new(reader), cancel, sink).await
    }

    /// Blocking receive loop. Frames are processed strictly in arrival
    /// order; terminates only on transport error, closure or cancellation.
    async fn pull(
        platform: &P,
        room: &Room<P::Params>,
        mut reader: BoxedReader,
        cancel: CancellationToken,
        sink: Sink,
    ) -> Result<()> {
        let mut buf = vec![0u8; RECV_BUFFER_SIZE];
        loop {
            tokio::select! {
                _ = cancel.cancelled() => return Ok(()),
                read = reader.read(&mut buf) => {
                    let n = read?;
                    if n == 0 {
                        return Err(io::Error::new(
                            io::ErrorKind::UnexpectedEof,
                            "connection closed by server",
                        )
                        .into());
                    }
                    for message in platform.decode(&room.id(), &buf[..n]) {
                        sink(message);
                    }
                }
            }
        }
    }

    async fn worker(
        platform: Arc<P>,
        http: HttpClient,
        rooms: Arc<RoomStore<P::Params>>,
        key: RoomKey,
        room: Arc<Room<P::Params>>,
        cancel: CancellationToken,
        sink: Sink,
    ) {
        let conn_cancel = cancel.child_token();
        let generation = room.begin_connection(conn_cancel.clone());
        let result = Self::stream_room(&platform, &http, &room, conn_cancel, sink).await;
        if !room.end_connection(generation).await {
            // Superseded; the successor worker owns the room now.
            return;
        }

        match result {
            Ok(()) => {
                debug!(platform = platform.name(), room = %room.id(), "room worker stopped");
            }
            Err(e) if e.is_recoverable() => {
                warn!(
                    platform = platform.name(),
                    room = %room.id(),
                    "room stream ended: {e}; retrying on next rescan"
                );
            }
            Err(e) => {
                warn!(
                    platform = platform.name(),
                    room = %room.id(),
                    "room stream failed: {e}; deregistering"
                );
                rooms.remove(&key);
            }
        }
    }
}

#[async_trait]
impl<P: Platform> ChatClient for PlatformClient<P> {
    fn name(&self) -> &str {
        self.platform.name()
    }

    fn supports_url(&self, url: &str) -> bool {
        self.platform.supports_url(url)
    }

    fn add(&self, url: &str) -> Result<()> {
        let url = canonicalize_url(url).to_string();
        let key = RoomKey::from_url(&url);
        let id = self
            .platform
            .room_id(&url)
            .ok_or_else(|| BarrageError::bad_room(url.clone()))?;

        let room = Arc::new(Room::new(url.clone(), id));
        if self.rooms.insert_if_absent(key, room) {
            info!(platform = self.name(), url = %url, "room registered");
        } else {
            debug!(platform = self.name(), url = %url, "duplicate add ignored");
        }
        Ok(())
    }

    fn remove(&self, url: &str) {
        let key = RoomKey::from_url(url);
        if self.rooms.remove(&key).is_some() {
            info!(platform = self.name(), url, "room deregistered");
        } else {
            debug!(platform = self.name(), url, "remove of unknown room ignored");
        }
    }

    fn has(&self, key: &RoomKey) -> bool {
        self.rooms.contains(key)
    }

    fn room_count(&self) -> usize {
        self.rooms.len()
    }

    async fn online(&self, url: &str) -> bool {
        match self.platform.online(&self.http, url).await {
            Ok(live) => live,
            Err(e) => {
                debug!(platform = self.name(), url, "online probe failed closed: {e}");
                false
            }
        }
    }

    async fn run(&self, cancel: CancellationToken, sink: Sink) {
        info!(platform = self.name(), "client run loop started");

        let heartbeat = self.platform.heartbeat_interval().map(|period| {
            tokio::spawn(Self::heartbeat_loop(
                self.platform.clone(),
                self.rooms.clone(),
                period,
                cancel.clone(),
            ))
        });

        loop {
            for (key, room) in self.rooms.entries() {
                if room.try_claim() {
                    tokio::spawn(Self::worker(
                        self.platform.clone(),
                        self.http.clone(),
                        self.rooms.clone(),
                        key,
                        room,
                        cancel.child_token(),
                        sink.clone(),
                    ));
                }
            }

            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = tokio::time::sleep(RESCAN_INTERVAL) => {}
            }
        }

        if let Some(task) = heartbeat {
            let _ = task.await;
        }
        info!(platform = self.name(), "client run loop stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;

    /// Minimal platform for exercising the generic client without a
    /// network: one frame per line, every line is a chat message.
    struct LinePlatform;

    #[async_trait]
    impl Platform for LinePlatform {
        type Params = ();

        fn name(&self) -> &'static str {
            "line"
        }

        fn supports_url(&self, url: &str) -> bool {
            url.contains("line.test")
        }

        fn room_id(&self, url: &str) -> Option<String> {
            Some(crate::room::trailing_segment(url).to_string())
        }

        async fn online(&self, _http: &HttpClient, _url: &str) -> Result<bool> {
            Ok(true)
        }

        async fn prepare(&self, _http: &HttpClient, room: &Room<()>) -> Result<String> {
            room.set_params(());
            Ok("127.0.0.1:0".to_string())
        }

        fn handshake_frames(&self, _room: &Room<()>) -> Vec<Bytes> {
            vec![]
        }

        fn heartbeat_interval(&self) -> Option<Duration> {
            Some(Duration::from_secs(1))
        }

        fn heartbeat_frame(&self) -> Bytes {
            Bytes::from_static(b"ping\n")
        }

        fn encode_frame(&self, payload: &[u8]) -> Bytes {
            Bytes::copy_from_slice(payload)
        }

        fn decode(&self, room_id: &str, data: &[u8]) -> Vec<Message> {
            String::from_utf8_lossy(data)
                .lines()
                .filter(|l| !l.is_empty())
                .map(|l| Message::chat("line", room_id, "someone", l))
                .collect()
        }
    }

    fn collecting_sink() -> (Sink, Arc<Mutex<Vec<Message>>>) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink_seen = seen.clone();
        let sink: Sink = Arc::new(move |msg| sink_seen.lock().push(msg));
        (sink, seen)
    }

    #[test]
    fn test_add_is_idempotent() {
        let client = PlatformClient::new(LinePlatform, HttpClient::new());
        client.add("http://line.test/42").unwrap();
        client.add("http://line.test/42/").unwrap();
        assert_eq!(client.room_count(), 1);
    }

    #[test]
    fn test_remove_is_noop_when_absent() {
        let client = PlatformClient::new(LinePlatform, HttpClient::new());
        client.remove("http://line.test/42");
        assert_eq!(client.room_count(), 0);

        client.add("http://line.test/42").unwrap();
        client.remove(" http://line.test/42/ ");
        assert_eq!(client.room_count(), 0);
    }

    #[tokio::test]
    async fn test_pull_delivers_messages_then_ends_on_eof() {
        let (sink, seen) = collecting_sink();
        let room: Arc<Room<()>> = Arc::new(Room::new("http://line.test/7", "7"));
        room.set_state(RoomState::Streaming);

        let (mut tx, rx) = tokio::io::duplex(256);
        let cancel = CancellationToken::new();
        let pull = tokio::spawn(async move {
            PlatformClient::<LinePlatform>::pull(
                &LinePlatform,
                &room,
                Box::new(rx),
                cancel,
                sink,
            )
            .await
        });

        use tokio::io::AsyncWriteExt;
        tx.write_all(b"hello\nworld\n").await.unwrap();
        drop(tx); // EOF

        let result = pull.await.unwrap();
        assert!(matches!(result, Err(BarrageError::Transport(_))));

        let seen = seen.lock();
        assert_eq!(seen.len(), 2);
        assert_eq!(seen[0], Message::chat("line", "7", "someone", "hello"));
        assert_eq!(seen[1], Message::chat("line", "7", "someone", "world"));
    }

    #[tokio::test]
    async fn test_heartbeat_failure_cancels_only_affected_room() {
        let client = PlatformClient::new(LinePlatform, HttpClient::new());
        client.add("http://line.test/1").unwrap();
        client.add("http://line.test/2").unwrap();

        let broken = client.rooms().get(&RoomKey::from_url("http://line.test/1")).unwrap();
        let healthy = client.rooms().get(&RoomKey::from_url("http://line.test/2")).unwrap();

        // Broken room: writer whose peer is gone.
        let broken_cancel = CancellationToken::new();
        broken.begin_connection(broken_cancel.clone());
        let (tx, rx) = tokio::io::duplex(16);
        drop(rx);
        broken.install_writer(Box::new(tx)).await;
        broken.set_state(RoomState::Streaming);

        // Healthy room: peer kept open.
        let healthy_cancel = CancellationToken::new();
        healthy.begin_connection(healthy_cancel.clone());
        let (tx, _rx_keepalive) = tokio::io::duplex(64);
        healthy.install_writer(Box::new(tx)).await;
        healthy.set_state(RoomState::Streaming);

        client.heartbeat_tick().await;

        assert!(broken_cancel.is_cancelled());
        assert!(!healthy_cancel.is_cancelled());
        assert!(healthy.is_alive());
        // Both rooms stay registered; only the broken stream was ended.
        assert_eq!(client.room_count(), 2);
    }

    #[tokio::test]
    async fn test_heartbeat_failure_ends_the_stream_before_reclaim() {
        let client = PlatformClient::new(LinePlatform, HttpClient::new());
        client.add("http://line.test/1").unwrap();
        let room = client.rooms().get(&RoomKey::from_url("http://line.test/1")).unwrap();

        // Simulate the worker: a live pull loop on one pipe, a writer whose
        // peer is gone on another.
        let conn_cancel = CancellationToken::new();
        let generation = room.begin_connection(conn_cancel.clone());
        let (tx, rx) = tokio::io::duplex(16);
        drop(rx);
        room.install_writer(Box::new(tx)).await;
        room.set_state(RoomState::Streaming);

        let (sink, _seen) = collecting_sink();
        let (_chat_tx, chat_rx) = tokio::io::duplex(64);
        let pull_room = room.clone();
        let pull = tokio::spawn(async move {
            PlatformClient::<LinePlatform>::pull(
                &LinePlatform,
                &pull_room,
                Box::new(chat_rx),
                conn_cancel,
                sink,
            )
            .await
        });

        client.heartbeat_tick().await;

        // The pull loop actually ends instead of streaming on.
        assert!(pull.await.unwrap().is_ok());

        // Until the worker's teardown runs, the room is not reclaimable,
        // so a rescan cannot spawn a second worker alongside the first.
        assert!(room.is_alive());
        assert!(!room.try_claim());

        assert!(room.end_connection(generation).await);
        assert_eq!(room.state(), RoomState::Ended);
        assert!(room.try_claim());
    }

    #[tokio::test]
    async fn test_push_msg_requires_registered_room() {
        let client = PlatformClient::new(LinePlatform, HttpClient::new());
        let err = client.push_msg("http://line.test/9", b"hi").await.unwrap_err();
        assert!(matches!(err, BarrageError::BadRoom(_)));
    }

    /// Platform whose negotiation always fails, either fatally or not.
    struct FailingPlatform {
        fatal: bool,
    }

    #[async_trait]
    impl Platform for FailingPlatform {
        type Params = ();

        fn name(&self) -> &'static str {
            "failing"
        }

        fn supports_url(&self, url: &str) -> bool {
            url.contains("line.test")
        }

        fn room_id(&self, url: &str) -> Option<String> {
            Some(crate::room::trailing_segment(url).to_string())
        }

        async fn online(&self, _http: &HttpClient, _url: &str) -> Result<bool> {
            Ok(false)
        }

        async fn prepare(&self, _http: &HttpClient, _room: &Room<()>) -> Result<String> {
            if self.fatal {
                Err(BarrageError::bad_room("no such room"))
            } else {
                Err(BarrageError::negotiation("token endpoint unavailable"))
            }
        }

        fn handshake_frames(&self, _room: &Room<()>) -> Vec<Bytes> {
            vec![]
        }

        fn encode_frame(&self, payload: &[u8]) -> Bytes {
            Bytes::copy_from_slice(payload)
        }

        fn decode(&self, _room_id: &str, _data: &[u8]) -> Vec<Message> {
            vec![]
        }
    }

    async fn run_failing_worker(fatal: bool) -> (PlatformClient<FailingPlatform>, RoomKey) {
        let client = PlatformClient::new(FailingPlatform { fatal }, HttpClient::new());
        client.add("http://line.test/9").unwrap();
        let key = RoomKey::from_url("http://line.test/9");
        let room = client.rooms.get(&key).unwrap();
        assert!(room.try_claim());

        let (sink, _seen) = collecting_sink();
        PlatformClient::<FailingPlatform>::worker(
            client.platform.clone(),
            client.http.clone(),
            client.rooms.clone(),
            key.clone(),
            room,
            CancellationToken::new(),
            sink,
        )
        .await;
        (client, key)
    }

    #[tokio::test]
    async fn test_fatal_prepare_error_deregisters_room() {
        let (client, key) = run_failing_worker(true).await;
        assert!(!client.rooms.contains(&key));
        assert_eq!(client.room_count(), 0);
    }

    #[tokio::test]
    async fn test_recoverable_prepare_error_leaves_room_for_rescan() {
        let (client, key) = run_failing_worker(false).await;
        let room = client.rooms.get(&key).expect("room stays registered");
        assert_eq!(room.state(), RoomState::Ended);
        // The next rescan can relaunch it.
        assert!(room.try_claim());
    }

    #[tokio::test]
    async fn test_pull_stops_on_cancellation() {
        let (sink, _seen) = collecting_sink();
        let room: Arc<Room<()>> = Arc::new(Room::new("http://line.test/7", "7"));

        let (_tx, rx) = tokio::io::duplex(64);
        let cancel = CancellationToken::new();
        let pull_cancel = cancel.clone();
        let pull = tokio::spawn(async move {
            PlatformClient::<LinePlatform>::pull(
                &LinePlatform,
                &room,
                Box::new(rx),
                pull_cancel,
                sink,
            )
            .await
        });

        cancel.cancel();
        let result = pull.await.unwrap();
        assert!(result.is_ok());
    }
}
