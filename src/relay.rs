//! EventRelay - pushes a fresh snapshot to a live client on every daemon change
//!
//! Each WebSocket client gets its own [`WatchSession`]: a dedicated idle
//! subscription plus the client transport. The session waits on both at once,
//! so a client that disconnects while the daemon is quiet is noticed right
//! away instead of at the next change.
//!
//! ```text
//! Opening -> Priming -> Streaming -> Closed
//! ```
//!
//! Any error is fatal to its own session only. There is no reconnection; the
//! client reconnects if it wants more updates.

use async_trait::async_trait;
use axum::extract::ws::{Message, WebSocket};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::adapters::mpd::IdleWatcher;
use crate::aggregator::Snapshot;
use crate::error::{DaemonResult, RelayError};

// =============================================================================
// Seams
// =============================================================================

/// Produces the state pushed to clients.
#[async_trait]
pub trait SnapshotSource: Send + Sync {
    async fn snapshot(&self) -> DaemonResult<Snapshot>;
}

/// Daemon change notifications for one session.
#[async_trait]
pub trait ChangeFeed: Send {
    /// Wait for the next change; returns the changed subsystem names.
    async fn next_change(&mut self) -> DaemonResult<Vec<String>>;

    /// Give up the subscription.
    async fn release(self);
}

/// The receiving end of a session.
#[async_trait]
pub trait RelayClient: Send {
    async fn push(&mut self, text: String) -> Result<(), RelayError>;

    /// Resolves once the client has gone away. Must be cancel-safe.
    async fn closed(&mut self);

    async fn release(self);
}

#[async_trait]
impl ChangeFeed for IdleWatcher {
    async fn next_change(&mut self) -> DaemonResult<Vec<String>> {
        IdleWatcher::next_change(self).await
    }

    async fn release(self) {
        self.close().await;
    }
}

/// WebSocket transport for a session
pub struct WsClient {
    socket: WebSocket,
}

impl WsClient {
    pub fn new(socket: WebSocket) -> Self {
        Self { socket }
    }
}

#[async_trait]
impl RelayClient for WsClient {
    async fn push(&mut self, text: String) -> Result<(), RelayError> {
        self.socket
            .send(Message::Text(text.into()))
            .await
            .map_err(|_| RelayError::ClientGone)
    }

    async fn closed(&mut self) {
        // Inbound messages carry no meaning; only the end of the stream matters
        loop {
            match self.socket.recv().await {
                Some(Ok(Message::Close(_))) | Some(Err(_)) | None => return,
                Some(Ok(_)) => continue,
            }
        }
    }

    async fn release(mut self) {
        let _ = self.socket.send(Message::Close(None)).await;
    }
}

// =============================================================================
// Session
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Opening,
    Priming,
    Streaming,
    Closed,
}

/// Why a session ended
#[derive(Debug)]
pub enum CloseReason {
    ClientClosed,
    Shutdown,
    Failed(RelayError),
}

impl From<RelayError> for CloseReason {
    fn from(e: RelayError) -> Self {
        match e {
            RelayError::ClientGone => CloseReason::ClientClosed,
            other => CloseReason::Failed(other),
        }
    }
}

/// One live client paired with its own change subscription.
pub struct WatchSession<F, C> {
    feed: F,
    client: C,
    state: SessionState,
    pushes: u64,
}

impl<F: ChangeFeed, C: RelayClient> WatchSession<F, C> {
    pub fn new(feed: F, client: C) -> Self {
        Self {
            feed,
            client,
            state: SessionState::Opening,
            pushes: 0,
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn is_live(&self) -> bool {
        self.state != SessionState::Closed
    }

    async fn close(self) -> u64 {
        let WatchSession {
            feed,
            client,
            pushes,
            ..
        } = self;
        feed.release().await;
        client.release().await;
        pushes
    }
}

// =============================================================================
// Relay
// =============================================================================

/// Runs sessions against a shared snapshot source.
#[derive(Clone)]
pub struct EventRelay<S> {
    source: S,
    shutdown: CancellationToken,
}

impl<S: SnapshotSource> EventRelay<S> {
    pub fn new(source: S, shutdown: CancellationToken) -> Self {
        Self { source, shutdown }
    }

    /// Drive one session until the client leaves, the server shuts down, or
    /// something fails. Both ends are released before returning.
    pub async fn run<F, C>(&self, mut session: WatchSession<F, C>) -> CloseReason
    where
        F: ChangeFeed,
        C: RelayClient,
    {
        session.state = SessionState::Priming;
        let reason = match self.push_snapshot(&mut session.client).await {
            Ok(()) => {
                session.pushes += 1;
                session.state = SessionState::Streaming;
                self.stream(&mut session).await
            }
            Err(e) => CloseReason::from(e),
        };
        session.state = SessionState::Closed;

        let pushes = session.close().await;
        match &reason {
            CloseReason::Failed(e) => warn!(pushes, "Live session failed: {}", e),
            other => info!(pushes, ?other, "Live session closed"),
        }
        reason
    }

    async fn stream<F, C>(&self, session: &mut WatchSession<F, C>) -> CloseReason
    where
        F: ChangeFeed,
        C: RelayClient,
    {
        loop {
            tokio::select! {
                biased;

                _ = self.shutdown.cancelled() => return CloseReason::Shutdown,
                _ = session.client.closed() => return CloseReason::ClientClosed,
                change = session.feed.next_change() => {
                    let subsystems = match change {
                        Ok(subsystems) => subsystems,
                        Err(e) => return CloseReason::Failed(e.into()),
                    };
                    debug!(?subsystems, "Daemon state changed");
                    if let Err(e) = self.push_snapshot(&mut session.client).await {
                        return e.into();
                    }
                    session.pushes += 1;
                }
            }
        }
    }

    async fn push_snapshot<C: RelayClient>(&self, client: &mut C) -> Result<(), RelayError> {
        let snapshot = self.source.snapshot().await?;
        let text = serde_json::to_string(&snapshot)?;
        client.push(text).await
    }
}
