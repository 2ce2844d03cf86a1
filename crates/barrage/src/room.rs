//! Rooms, room keys and the per-client room store.
//!
//! A [`Room`] is one subscribed live-chat source, identified process-wide by
//! the [`RoomKey`] of its canonical URL. Each room is exclusively owned by
//! its platform client; the read half of its connection is exclusively owned
//! by the room's worker task, while the boxed write half lives on the room
//! so the heartbeat scheduler and `push_msg` can reach it.

use md5::{Digest, Md5};
use parking_lot::RwLock;
use rustc_hash::FxHashMap;
use std::fmt;
use std::io;
use std::sync::Arc;
use std::sync::atomic::{AtomicU8, AtomicU64, Ordering};
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;

use crate::error::Result;

/// Write half of a room connection.
pub type BoxedWriter = Box<dyn AsyncWrite + Send + Unpin>;
/// Read half of a room connection.
pub type BoxedReader = Box<dyn AsyncRead + Send + Unpin>;

/// Canonical form of a room URL: surrounding whitespace and trailing
/// slashes removed.
pub fn canonicalize_url(url: &str) -> &str {
    url.trim().trim_end_matches('/')
}

/// Last path segment of a room URL, conventionally the platform room id.
pub fn trailing_segment(url: &str) -> &str {
    canonicalize_url(url).rsplit('/').next().unwrap_or_default()
}

/// Dedup identity of a room: hex MD5 digest of the canonical URL.
///
/// URLs that canonicalize identically always produce the same key, and at
/// most one active room per key exists across all platform clients.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RoomKey(String);

impl RoomKey {
    /// Compute the key for a room URL.
    pub fn from_url(url: &str) -> Self {
        let digest = Md5::digest(canonicalize_url(url).as_bytes());
        Self(hex::encode(digest))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RoomKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Lifecycle of a room within its client.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum RoomState {
    /// Added, no worker claimed it yet.
    Registered = 0,
    /// A worker is running the out-of-band negotiation.
    Preparing = 1,
    /// Transport open, handshake in flight.
    Connected = 2,
    /// Handshake done, inbound frames flowing.
    Streaming = 3,
    /// The worker ended (transport error, closure or cancellation).
    Ended = 4,
}

impl RoomState {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => Self::Registered,
            1 => Self::Preparing,
            2 => Self::Connected,
            3 => Self::Streaming,
            _ => Self::Ended,
        }
    }
}

/// One subscribed live-chat source.
///
/// `P` is the platform's handshake-parameter type, so connections stay
/// statically typed per platform.
pub struct Room<P> {
    url: String,
    id: RwLock<String>,
    state: AtomicU8,
    generation: AtomicU64,
    conn_cancel: RwLock<Option<CancellationToken>>,
    params: RwLock<Option<P>>,
    writer: Mutex<Option<BoxedWriter>>,
}

impl<P> Room<P> {
    /// Create a room in the `Registered` state.
    pub fn new(url: impl Into<String>, id: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            id: RwLock::new(id.into()),
            state: AtomicU8::new(RoomState::Registered as u8),
            generation: AtomicU64::new(0),
            conn_cancel: RwLock::new(None),
            params: RwLock::new(None),
            writer: Mutex::new(None),
        }
    }

    /// The room's canonical URL.
    pub fn url(&self) -> &str {
        &self.url
    }

    /// The platform room id. May be rewritten by `prepare` when the URL
    /// segment is a vanity name that resolves to a numeric id.
    pub fn id(&self) -> String {
        self.id.read().clone()
    }

    /// Replace the platform room id.
    pub fn set_id(&self, id: impl Into<String>) {
        *self.id.write() = id.into();
    }

    pub fn state(&self) -> RoomState {
        RoomState::from_u8(self.state.load(Ordering::SeqCst))
    }

    pub fn set_state(&self, state: RoomState) {
        self.state.store(state as u8, Ordering::SeqCst);
    }

    /// Whether the room currently has a live connection.
    pub fn is_alive(&self) -> bool {
        matches!(self.state(), RoomState::Connected | RoomState::Streaming)
    }

    /// Atomically claim the room for a new worker. Succeeds only from the
    /// `Registered` or `Ended` states, so the periodic rescan never spawns
    /// two workers for one room.
    pub fn try_claim(&self) -> bool {
        for from in [RoomState::Registered, RoomState::Ended] {
            if self
                .state
                .compare_exchange(
                    from as u8,
                    RoomState::Preparing as u8,
                    Ordering::SeqCst,
                    Ordering::SeqCst,
                )
                .is_ok()
            {
                return true;
            }
        }
        false
    }

    /// Register a freshly claimed worker's connection: store its
    /// cancellation token and return the connection's generation. Only the
    /// worker holding the current generation may tear the room down.
    pub fn begin_connection(&self, cancel: CancellationToken) -> u64 {
        *self.conn_cancel.write() = Some(cancel);
        self.generation.fetch_add(1, Ordering::SeqCst) + 1
    }

    /// Tear down after the worker's stream ends. A superseded worker (its
    /// generation is no longer current) must not clobber its successor's
    /// connection; returns whether the teardown was applied.
    pub async fn end_connection(&self, generation: u64) -> bool {
        if self.generation.load(Ordering::SeqCst) != generation {
            return false;
        }
        self.clear_writer().await;
        *self.conn_cancel.write() = None;
        self.set_state(RoomState::Ended);
        true
    }

    /// Cancel the current connection's pull loop, ending the room's stream.
    /// The room becomes reclaimable only once its worker finishes teardown.
    pub fn deactivate(&self) {
        if let Some(cancel) = self.conn_cancel.read().as_ref() {
            cancel.cancel();
        }
    }

    /// Store the handshake parameters produced by `prepare`. Immutable for
    /// the life of the connection.
    pub fn set_params(&self, params: P) {
        *self.params.write() = Some(params);
    }

    /// Read the handshake parameters under the lock.
    pub fn with_params<R>(&self, f: impl FnOnce(Option<&P>) -> R) -> R {
        let guard = self.params.read();
        f(guard.as_ref())
    }

    /// Install the write half of a freshly opened connection.
    pub async fn install_writer(&self, writer: BoxedWriter) {
        *self.writer.lock().await = Some(writer);
    }

    /// Drop the write half, if any.
    pub async fn clear_writer(&self) {
        *self.writer.lock().await = None;
    }

    /// Write a fully framed buffer on the room's connection.
    pub async fn send(&self, frame: &[u8]) -> Result<()> {
        let mut guard = self.writer.lock().await;
        match guard.as_mut() {
            Some(writer) => {
                writer.write_all(frame).await?;
                writer.flush().await?;
                Ok(())
            }
            None => Err(io::Error::new(io::ErrorKind::NotConnected, "room has no connection").into()),
        }
    }
}

impl<P> fmt::Debug for Room<P> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Room")
            .field("url", &self.url)
            .field("id", &*self.id.read())
            .field("state", &self.state())
            .finish()
    }
}

/// RoomKey → Room mapping owned by one platform client.
///
/// Rescans and lookups take the read lock; add/remove take the write lock.
pub struct RoomStore<P> {
    rooms: RwLock<FxHashMap<RoomKey, Arc<Room<P>>>>,
}

impl<P> RoomStore<P> {
    pub fn new() -> Self {
        Self {
            rooms: RwLock::new(FxHashMap::default()),
        }
    }

    /// Insert the room if the key is absent. Returns false on duplicate.
    pub fn insert_if_absent(&self, key: RoomKey, room: Arc<Room<P>>) -> bool {
        let mut rooms = self.rooms.write();
        if rooms.contains_key(&key) {
            return false;
        }
        rooms.insert(key, room);
        true
    }

    pub fn remove(&self, key: &RoomKey) -> Option<Arc<Room<P>>> {
        self.rooms.write().remove(key)
    }

    pub fn contains(&self, key: &RoomKey) -> bool {
        self.rooms.read().contains_key(key)
    }

    pub fn get(&self, key: &RoomKey) -> Option<Arc<Room<P>>> {
        self.rooms.read().get(key).cloned()
    }

    /// Snapshot of all entries, so callers iterate without holding the lock.
    pub fn entries(&self) -> Vec<(RoomKey, Arc<Room<P>>)> {
        self.rooms
            .read()
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.rooms.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.rooms.read().is_empty()
    }
}

impl<P> Default for RoomStore<P> {
    fn default() -> Self {
        Self::new()
    }
}
