//! StatusAggregator - composes player state into one snapshot

use async_trait::async_trait;
use serde::Serialize;
use tracing::debug;

use crate::adapters::mpd::MpdClient;
use crate::error::{DaemonError, DaemonResult, ProtocolError};
use crate::protocol::Attrs;
use crate::relay::SnapshotSource;

const STATE_KEY: &str = "state";

/// Full player state at one instant. Built fresh per request; never cached.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Snapshot {
    #[serde(rename = "Status")]
    pub status: Attrs,
    /// Present exactly when playback is active (playing or paused)
    #[serde(rename = "CurrentSong")]
    pub current_track: Option<Attrs>,
    #[serde(rename = "Playlist")]
    pub queue: Vec<Attrs>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NowPlaying {
    #[serde(rename = "CurrentSong")]
    pub current_track: Option<Attrs>,
}

/// True when the status reports `play` or `pause`.
pub fn playback_active(status: &Attrs) -> bool {
    matches!(
        status.get(STATE_KEY).map(String::as_str),
        Some("play") | Some("pause")
    )
}

/// Builds [`Snapshot`] values, one daemon connection per call.
#[derive(Debug, Clone)]
pub struct StatusAggregator {
    client: MpdClient,
}

impl StatusAggregator {
    pub fn new(client: MpdClient) -> Self {
        Self { client }
    }

    /// Status, the current track when active, and the whole queue.
    ///
    /// Any failing step fails the whole snapshot.
    pub async fn snapshot(&self) -> DaemonResult<Snapshot> {
        let snapshot = self
            .client
            .with_connection(|conn| {
                Box::pin(async move {
                    let status = conn.status().await?;
                    let current_track = if playback_active(&status) {
                        Some(require_track(conn.current_song().await?)?)
                    } else {
                        None
                    };
                    let queue = conn.queue().await?;
                    Ok(Snapshot {
                        status,
                        current_track,
                        queue,
                    })
                })
            })
            .await?;

        debug!(
            state = snapshot.status.get(STATE_KEY).map(String::as_str).unwrap_or("?"),
            queue_len = snapshot.queue.len(),
            "Snapshot built"
        );
        Ok(snapshot)
    }

    /// Only the current track, skipping the queue.
    pub async fn now_playing(&self) -> DaemonResult<NowPlaying> {
        self.client
            .with_connection(|conn| {
                Box::pin(async move {
                    let status = conn.status().await?;
                    let current_track = if playback_active(&status) {
                        Some(require_track(conn.current_song().await?)?)
                    } else {
                        None
                    };
                    Ok(NowPlaying { current_track })
                })
            })
            .await
    }
}

/// An active player must report a current song.
fn require_track(track: Attrs) -> DaemonResult<Attrs> {
    if track.is_empty() {
        return Err(DaemonError::from(ProtocolError::EmptyResult(
            "currentsong".to_string(),
        )));
    }
    Ok(track)
}

#[async_trait]
impl SnapshotSource for StatusAggregator {
    async fn snapshot(&self) -> DaemonResult<Snapshot> {
        StatusAggregator::snapshot(self).await
    }
}
