//! Room registry: routes room URLs to platform clients and supervises
//! their run loops.
//!
//! The registry is an explicitly constructed, explicitly owned value; there
//! is no process-wide singleton. Classification is by anchored domain match,
//! so a URL belongs to at most one client; dedup is by [`RoomKey`] across
//! every registered client.

use futures::future::join_all;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::client::{ChatClient, PlatformClient};
use crate::error::{BarrageError, Result};
use crate::http::HttpClient;
use crate::message::Sink;
use crate::platforms::{Douyu, Panda, Quanmin};
use crate::room::RoomKey;

/// Registry of platform clients.
pub struct Registry {
    clients: Vec<Arc<dyn ChatClient>>,
    sink: Sink,
    cancel: CancellationToken,
}

impl Registry {
    /// Create an empty registry delivering messages to `sink`.
    pub fn new(sink: Sink) -> Self {
        Self {
            clients: Vec::new(),
            sink,
            cancel: CancellationToken::new(),
        }
    }

    /// Create a registry with the built-in platform clients.
    pub fn with_defaults(http: HttpClient, sink: Sink) -> Self {
        let mut registry = Self::new(sink);
        registry.register(Arc::new(PlatformClient::new(Panda::new(), http.clone())));
        registry.register(Arc::new(PlatformClient::new(Douyu::new(), http.clone())));
        registry.register(Arc::new(PlatformClient::new(Quanmin::new(), http)));
        registry
    }

    /// Register a platform client.
    pub fn register(&mut self, client: Arc<dyn ChatClient>) {
        self.clients.push(client);
    }

    /// Names of all registered platforms.
    pub fn platforms(&self) -> Vec<&str> {
        self.clients.iter().map(|c| c.name()).collect()
    }

    /// The client whose platform owns the URL.
    pub fn client_for(&self, url: &str) -> Option<Arc<dyn ChatClient>> {
        self.clients.iter().find(|c| c.supports_url(url)).cloned()
    }

    /// Total rooms across all clients.
    pub fn room_count(&self) -> usize {
        self.clients.iter().map(|c| c.room_count()).sum()
    }

    /// Register a room URL with its owning platform client.
    ///
    /// Idempotent: if any client already holds the URL's key, this is a
    /// silent no-op. An URL no client accepts is an error, fatal to this
    /// call only. Safe to call concurrently with [`Registry::run`].
    pub fn add(&self, url: &str) -> Result<()> {
        let key = RoomKey::from_url(url);
        if self.clients.iter().any(|c| c.has(&key)) {
            debug!(url, "room already registered");
            return Ok(());
        }

        let client = self
            .client_for(url)
            .ok_or_else(|| BarrageError::UnsupportedUrl(url.to_string()))?;
        client.add(url)
    }

    /// Deregister a room URL. No-op if no client holds it.
    pub fn remove(&self, url: &str) {
        let key = RoomKey::from_url(url);
        for client in &self.clients {
            if client.has(&key) {
                client.remove(url);
                return;
            }
        }
        debug!(url, "remove of unregistered url ignored");
    }

    /// Best-effort liveness probe for a room URL; fails closed.
    pub async fn online(&self, url: &str) -> bool {
        match self.client_for(url) {
            Some(client) => client.online(url).await,
            None => false,
        }
    }

    /// Token cancelled by [`Registry::shutdown`].
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Stop every client run loop and its workers.
    pub fn shutdown(&self) {
        self.cancel.cancel();
    }

    /// Start one supervising task per client and block until all of them
    /// complete (i.e. until [`Registry::shutdown`] is called).
    pub async fn run(&self) {
        info!(platforms = ?self.platforms(), "registry started");

        let tasks: Vec<_> = self
            .clients
            .iter()
            .cloned()
            .map(|client| {
                let cancel = self.cancel.child_token();
                let sink = self.sink.clone();
                tokio::spawn(async move { client.run(cancel, sink).await })
            })
            .collect();

        for result in join_all(tasks).await {
            if let Err(e) = result {
                debug!("client supervisor task failed: {e}");
            }
        }
        info!("registry stopped");
    }
}
