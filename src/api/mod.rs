//! HTTP API handlers
//!
//! Every request opens its own daemon connection through
//! [`MpdClient::with_connection`]; nothing is cached or shared between
//! requests. Errors come back as a bare status code and are logged here.

use std::str::FromStr;
use std::time::Duration;

use axum::{
    extract::{ws::WebSocketUpgrade, Form, Path, Query, State},
    http::{header, HeaderValue, Method, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tower_http::{
    cors::{AllowOrigin, CorsLayer},
    timeout::TimeoutLayer,
    trace::TraceLayer,
};
use tracing::{debug, error, info, warn};

use crate::adapters::mpd::MpdClient;
use crate::aggregator::{NowPlaying, Snapshot, StatusAggregator};
use crate::config::HttpConfig;
use crate::error::{DaemonError, ProtocolError};
use crate::protocol::catalog::{distinct_albums, AlbumSummary};
use crate::protocol::Attrs;
use crate::relay::{EventRelay, WatchSession, WsClient};

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub mpd: MpdClient,
    pub aggregator: StatusAggregator,
    /// Cancelled on server shutdown; ends every live session
    pub shutdown: CancellationToken,
}

impl AppState {
    pub fn new(mpd: MpdClient, shutdown: CancellationToken) -> Self {
        Self {
            aggregator: StatusAggregator::new(mpd.clone()),
            mpd,
            shutdown,
        }
    }
}

// =============================================================================
// Router
// =============================================================================

/// Build the full HTTP surface.
pub fn router(state: AppState, http: &HttpConfig) -> Router {
    // Request/response routes are bounded by the request timeout
    let api_routes = Router::new()
        .route("/dashboard", get(dashboard_handler))
        .route("/now-playing", get(now_playing_handler))
        // Playback
        .route("/player/{action}", post(player_action_handler))
        .route("/volume/{vol}", post(volume_handler))
        // Library
        .route("/list/albums", get(list_albums_handler))
        .route("/list/{tag}", get(list_tag_handler))
        .route("/find/albums", get(find_albums_handler))
        .route("/find/songs", get(find_songs_handler))
        // Stored playlists and queue
        .route("/playlists", get(playlists_handler))
        .route("/playlist/load/{name}", post(load_playlist_handler))
        .route("/playlist/save", post(save_playlist_handler))
        .route("/playlist/clear", post(clear_playlist_handler))
        .route("/playlist/add", post(add_location_handler))
        .route("/playlist/play/{pos}", post(play_position_handler))
        .route("/playlist/delete/{pos}", post(delete_position_handler))
        .layer(TimeoutLayer::new(Duration::from_secs(
            http.request_timeout_secs,
        )));

    // The live feed stays open indefinitely, so it sits outside the timeout
    Router::new()
        .route("/ws", get(ws_handler))
        .merge(api_routes)
        // Middleware
        .layer(cors_layer(&http.allowed_origins))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

fn cors_layer(origins: &[String]) -> CorsLayer {
    let origins: Vec<HeaderValue> = origins
        .iter()
        .filter_map(|origin| match HeaderValue::from_str(origin) {
            Ok(value) => Some(value),
            Err(_) => {
                warn!("Ignoring invalid CORS origin {:?}", origin);
                None
            }
        })
        .collect();

    CorsLayer::new()
        .allow_origin(AllowOrigin::list(origins))
        .allow_methods([Method::GET, Method::POST])
        .allow_headers([header::CONTENT_TYPE])
        .allow_credentials(true)
}

// =============================================================================
// Errors
// =============================================================================

/// Failure of one API request. Rendered as a status code with an empty body.
#[derive(Debug)]
pub enum ApiError {
    /// The daemon could not be reached, or answered unexpectedly
    Daemon(DaemonError),
    /// The daemon answered, and the answer was "nothing matches"
    NotFound(String),
}

impl From<DaemonError> for ApiError {
    fn from(e: DaemonError) -> Self {
        ApiError::Daemon(e)
    }
}

impl From<ProtocolError> for ApiError {
    fn from(e: ProtocolError) -> Self {
        ApiError::Daemon(DaemonError::Protocol(e))
    }
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            // Only raised locally, before anything reaches the daemon
            ApiError::Daemon(DaemonError::Protocol(ProtocolError::InvalidCommand(_))) => {
                StatusCode::BAD_REQUEST
            }
            ApiError::Daemon(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl std::fmt::Display for ApiError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ApiError::Daemon(e) => write!(f, "{}", e),
            ApiError::NotFound(what) => write!(f, "no match for {}", what),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            error!("Request failed: {}", self);
        } else {
            debug!("Request rejected ({}): {}", status, self);
        }
        status.into_response()
    }
}

type ApiResult<T> = Result<T, ApiError>;

/// `{"status": "OK"}` acknowledgement for control routes
#[derive(Debug, Serialize)]
pub struct OkResponse {
    pub status: &'static str,
}

fn ok() -> Json<OkResponse> {
    Json(OkResponse { status: "OK" })
}

// =============================================================================
// Player state
// =============================================================================

/// GET /dashboard - status, current song and queue
pub async fn dashboard_handler(State(state): State<AppState>) -> ApiResult<Json<Snapshot>> {
    Ok(Json(state.aggregator.snapshot().await?))
}

/// GET /now-playing
pub async fn now_playing_handler(State(state): State<AppState>) -> ApiResult<Json<NowPlaying>> {
    Ok(Json(state.aggregator.now_playing().await?))
}

/// GET /ws - live snapshot feed
///
/// The idle subscription is opened before upgrading, so an unreachable daemon
/// fails the handshake with 500 instead of producing an empty socket.
pub async fn ws_handler(
    State(state): State<AppState>,
    ws: WebSocketUpgrade,
) -> ApiResult<Response> {
    let watcher = state.mpd.watch(&[]).await?;
    let relay = EventRelay::new(state.aggregator.clone(), state.shutdown.clone());

    Ok(ws
        .on_failed_upgrade(|e| warn!("WebSocket upgrade failed: {}", e))
        .on_upgrade(move |socket| async move {
            info!("Live session opened");
            let session = WatchSession::new(watcher, WsClient::new(socket));
            relay.run(session).await;
        }))
}

// =============================================================================
// Playback control
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlayerAction {
    Play,
    /// Toggles between play and pause
    Pause,
    Stop,
    Next,
    Previous,
}

impl FromStr for PlayerAction {
    type Err = ProtocolError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "play" => Ok(PlayerAction::Play),
            "pause" => Ok(PlayerAction::Pause),
            "stop" => Ok(PlayerAction::Stop),
            "next" => Ok(PlayerAction::Next),
            "previous" => Ok(PlayerAction::Previous),
            other => Err(ProtocolError::InvalidCommand(format!(
                "unknown player action {:?}",
                other
            ))),
        }
    }
}

/// POST /player/{action}
pub async fn player_action_handler(
    State(state): State<AppState>,
    Path(action): Path<String>,
) -> ApiResult<Json<OkResponse>> {
    let action: PlayerAction = action.parse()?;

    state
        .mpd
        .with_connection(move |conn| {
            Box::pin(async move {
                match action {
                    PlayerAction::Play => conn.play(None).await,
                    PlayerAction::Pause => {
                        let status = conn.status().await?;
                        match status.get("state").map(String::as_str) {
                            Some("pause") => conn.pause(false).await,
                            Some("play") => conn.pause(true).await,
                            _ => Ok(()),
                        }
                    }
                    PlayerAction::Stop => conn.stop().await,
                    PlayerAction::Next => conn.next().await,
                    PlayerAction::Previous => conn.previous().await,
                }
            })
        })
        .await?;

    debug!(?action, "Player action applied");
    Ok(ok())
}

/// Clamp a requested volume into 0..=100.
pub fn clamp_volume(volume: i64) -> u8 {
    volume.clamp(0, 100) as u8
}

/// POST /volume/{vol}
pub async fn volume_handler(
    State(state): State<AppState>,
    Path(volume): Path<i64>,
) -> ApiResult<Json<OkResponse>> {
    let volume = clamp_volume(volume);
    state
        .mpd
        .with_connection(move |conn| Box::pin(async move { conn.set_volume(volume).await }))
        .await?;
    Ok(ok())
}

// =============================================================================
// Library browsing
// =============================================================================

#[derive(Debug, Serialize)]
pub struct AlbumsResponse {
    #[serde(rename = "Albums")]
    pub albums: Vec<AlbumSummary>,
}

#[derive(Debug, Serialize)]
pub struct ListResponse {
    #[serde(rename = "List")]
    pub list: Vec<String>,
}

/// GET /list/albums
pub async fn list_albums_handler(State(state): State<AppState>) -> ApiResult<Json<AlbumsResponse>> {
    let albums = state
        .mpd
        .with_connection(|conn| Box::pin(async move { conn.list_albums().await }))
        .await?;
    Ok(Json(AlbumsResponse { albums }))
}

fn valid_tag(tag: &str) -> bool {
    !tag.is_empty() && tag.chars().all(|c| c.is_ascii_alphanumeric() || c == '_')
}

/// GET /list/{tag} - distinct values of one tag
pub async fn list_tag_handler(
    State(state): State<AppState>,
    Path(tag): Path<String>,
) -> ApiResult<Json<ListResponse>> {
    if !valid_tag(&tag) {
        return Err(ProtocolError::InvalidCommand(format!("bad tag {:?}", tag)).into());
    }
    let list = state
        .mpd
        .with_connection(move |conn| Box::pin(async move { conn.list(&tag).await }))
        .await?;
    Ok(Json(ListResponse { list }))
}

/// Turn optional query fields into `find` criteria, skipping blanks.
fn criteria(pairs: &[(&str, &Option<String>)]) -> Vec<(String, String)> {
    pairs
        .iter()
        .filter_map(|(tag, value)| match value {
            Some(v) if !v.is_empty() => Some((tag.to_string(), v.clone())),
            _ => None,
        })
        .collect()
}

#[derive(Debug, Deserialize)]
pub struct FindAlbumsQuery {
    pub artist: Option<String>,
    pub genre: Option<String>,
}

/// GET /find/albums?artist=&genre=
pub async fn find_albums_handler(
    State(state): State<AppState>,
    Query(query): Query<FindAlbumsQuery>,
) -> ApiResult<Json<AlbumsResponse>> {
    let criteria = criteria(&[("artist", &query.artist), ("genre", &query.genre)]);
    let songs = state
        .mpd
        .with_connection(move |conn| Box::pin(async move { conn.find(&criteria).await }))
        .await?;
    Ok(Json(AlbumsResponse {
        albums: distinct_albums(&songs),
    }))
}

#[derive(Debug, Deserialize)]
pub struct FindSongsQuery {
    pub album: Option<String>,
    pub albumartist: Option<String>,
}

/// One album with its tracks
#[derive(Debug, Serialize)]
pub struct AlbumDetail {
    #[serde(rename = "Title")]
    pub title: String,
    #[serde(rename = "Artist")]
    pub artist: String,
    /// Library directory of the album (first two path segments)
    #[serde(rename = "Dir")]
    pub dir: String,
    #[serde(rename = "Songs")]
    pub songs: Vec<Attrs>,
}

impl AlbumDetail {
    /// Describe an album by its first track. `None` for an empty track list.
    pub fn from_songs(songs: Vec<Attrs>) -> Option<Self> {
        let first = songs.first()?;
        let field = |key: &str| first.get(key).cloned().unwrap_or_default();

        let artist = match first.get("AlbumArtist") {
            Some(a) if !a.is_empty() => a.clone(),
            _ => field("Artist"),
        };
        let title = field("Album");
        let file = field("file");
        let dir = file.split('/').take(2).collect::<Vec<_>>().join("/");

        Some(Self {
            title,
            artist,
            dir,
            songs,
        })
    }
}

/// GET /find/songs?album=&albumartist=
pub async fn find_songs_handler(
    State(state): State<AppState>,
    Query(query): Query<FindSongsQuery>,
) -> ApiResult<Json<AlbumDetail>> {
    let criteria = criteria(&[("album", &query.album), ("albumartist", &query.albumartist)]);
    let songs = state
        .mpd
        .with_connection(move |conn| Box::pin(async move { conn.find(&criteria).await }))
        .await?;

    match AlbumDetail::from_songs(songs) {
        Some(detail) => Ok(Json(detail)),
        None => Err(ApiError::NotFound(format!(
            "album {:?}",
            query.album.unwrap_or_default()
        ))),
    }
}

// =============================================================================
// Stored playlists and queue
// =============================================================================

#[derive(Debug, Serialize)]
pub struct StoredPlaylist {
    #[serde(rename = "Name")]
    pub name: String,
    #[serde(rename = "Songs")]
    pub songs: Vec<Attrs>,
}

#[derive(Debug, Serialize)]
pub struct PlaylistsResponse {
    #[serde(rename = "Playlists")]
    pub playlists: Vec<StoredPlaylist>,
}

/// GET /playlists - every stored playlist with its songs
pub async fn playlists_handler(
    State(state): State<AppState>,
) -> ApiResult<Json<PlaylistsResponse>> {
    let playlists = state
        .mpd
        .with_connection(|conn| {
            Box::pin(async move {
                let mut playlists = Vec::new();
                for entry in conn.list_playlists().await? {
                    let name = entry.get("playlist").cloned().unwrap_or_default();
                    let songs = conn.playlist_contents(&name).await?;
                    playlists.push(StoredPlaylist { name, songs });
                }
                Ok(playlists)
            })
        })
        .await?;
    Ok(Json(PlaylistsResponse { playlists }))
}

/// POST /playlist/load/{name} - append a stored playlist to the queue
pub async fn load_playlist_handler(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> ApiResult<Json<OkResponse>> {
    state
        .mpd
        .with_connection(move |conn| Box::pin(async move { conn.load_playlist(&name).await }))
        .await?;
    Ok(ok())
}

#[derive(Debug, Deserialize)]
pub struct SavePlaylistRequest {
    #[serde(rename = "Name")]
    pub name: String,
}

/// POST /playlist/save - store the queue under a name
pub async fn save_playlist_handler(
    State(state): State<AppState>,
    Json(req): Json<SavePlaylistRequest>,
) -> ApiResult<Json<OkResponse>> {
    if req.name.trim().is_empty() {
        return Err(ProtocolError::InvalidCommand("playlist name is empty".into()).into());
    }
    let name = req.name;
    state
        .mpd
        .with_connection(move |conn| Box::pin(async move { conn.save_playlist(&name).await }))
        .await?;
    Ok(ok())
}

/// POST /playlist/clear
pub async fn clear_playlist_handler(State(state): State<AppState>) -> ApiResult<Json<OkResponse>> {
    state
        .mpd
        .with_connection(|conn| Box::pin(async move { conn.clear().await }))
        .await?;
    Ok(ok())
}

#[derive(Debug, Deserialize)]
pub struct AddLocationForm {
    pub loc: String,
}

/// POST /playlist/add - form field `loc`, a song or directory URI
pub async fn add_location_handler(
    State(state): State<AppState>,
    Form(form): Form<AddLocationForm>,
) -> ApiResult<Json<OkResponse>> {
    let uri = form.loc;
    state
        .mpd
        .with_connection(move |conn| Box::pin(async move { conn.add(&uri).await }))
        .await?;
    Ok(ok())
}

/// POST /playlist/play/{pos}
pub async fn play_position_handler(
    State(state): State<AppState>,
    Path(position): Path<u32>,
) -> ApiResult<Json<OkResponse>> {
    state
        .mpd
        .with_connection(move |conn| Box::pin(async move { conn.play(Some(position)).await }))
        .await?;
    Ok(ok())
}

/// POST /playlist/delete/{pos}
pub async fn delete_position_handler(
    State(state): State<AppState>,
    Path(position): Path<u32>,
) -> ApiResult<Json<OkResponse>> {
    state
        .mpd
        .with_connection(move |conn| Box::pin(async move { conn.delete(position).await }))
        .await?;
    Ok(ok())
}
