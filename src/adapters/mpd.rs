//! MPD protocol client
//!
//! Speaks the line-oriented text protocol on port 6600:
//!
//! ```text
//! -> (connect)
//! <- OK MPD 0.23.5
//! -> status
//! <- volume: 42
//! <- state: play
//! <- OK
//! ```
//!
//! A command either ends with `OK` or with a single
//! `ACK [code@index] {command} message` line. The `idle` command blocks until
//! a subsystem changes and answers with `changed: <subsystem>` lines.
//!
//! Connections are never shared. Request/response callers go through
//! [`MpdClient::with_connection`], which opens a fresh connection, runs one
//! unit of work and releases the connection on every exit path. The live feed
//! holds its own dedicated connection through [`IdleWatcher`].

use std::time::Duration;

use futures::future::BoxFuture;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::time::timeout;
use tracing::{debug, trace, warn};

use crate::error::{DaemonError, DaemonResult, ProtocolError};
use crate::protocol::catalog::{parse_album_listing, AlbumSummary};
use crate::protocol::{
    parse_attrs, parse_attrs_list, parse_values, Attrs, PLAYLIST_SENTINEL, SONG_SENTINEL,
};

pub const DEFAULT_PORT: u16 = 6600;
const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);
const RESPONSE_TIMEOUT: Duration = Duration::from_secs(10);
/// Longest response line accepted, terminator included
pub const MAX_LINE_BYTES: usize = 1024 * 1024;
const GREETING_PREFIX: &str = "OK MPD ";
const OK_LINE: &str = "OK";
const ACK_PREFIX: &str = "ACK ";
const CHANGED_KEY: &str = "changed";

/// Connection deadlines
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Timeouts {
    pub connect: Duration,
    /// Applies to every response except `idle`, which blocks by design
    pub response: Duration,
}

impl Default for Timeouts {
    fn default() -> Self {
        Self {
            connect: CONNECT_TIMEOUT,
            response: RESPONSE_TIMEOUT,
        }
    }
}

// =============================================================================
// Commands
// =============================================================================

/// One protocol command with its arguments
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Command {
    name: &'static str,
    args: Vec<String>,
}

impl Command {
    pub fn new(name: &'static str) -> Self {
        Self {
            name,
            args: Vec::new(),
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Render the command as a protocol line, arguments quoted.
    ///
    /// Line breaks cannot be expressed inside an argument, so they are rejected.
    pub fn to_line(&self) -> Result<String, ProtocolError> {
        if self.name.is_empty()
            || !self
                .name
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '_')
        {
            return Err(ProtocolError::InvalidCommand(format!(
                "bad command name {:?}",
                self.name
            )));
        }

        let mut line = self.name.to_string();
        for arg in &self.args {
            if arg.contains(['\n', '\r']) {
                return Err(ProtocolError::InvalidCommand(format!(
                    "line break in argument to {}",
                    self.name
                )));
            }
            line.push(' ');
            line.push_str(&quote(arg));
        }
        line.push('\n');
        Ok(line)
    }
}

/// Double-quote an argument, escaping `"` and `\`.
pub fn quote(arg: &str) -> String {
    let mut quoted = String::with_capacity(arg.len() + 2);
    quoted.push('"');
    for c in arg.chars() {
        if c == '"' || c == '\\' {
            quoted.push('\\');
        }
        quoted.push(c);
    }
    quoted.push('"');
    quoted
}

/// Parse `ACK [code@index] {command} message`
pub fn parse_ack(line: &str) -> ProtocolError {
    let rest = line.strip_prefix(ACK_PREFIX).unwrap_or(line);

    let (code, rest) = match rest.strip_prefix('[').and_then(|r| r.split_once(']')) {
        Some((inner, rest)) => {
            let code = inner
                .split('@')
                .next()
                .and_then(|c| c.parse().ok())
                .unwrap_or(0);
            (code, rest.trim_start())
        }
        None => (0, rest),
    };

    let (command, message) = match rest.strip_prefix('{').and_then(|r| r.split_once('}')) {
        Some((command, message)) => (command.to_string(), message.trim_start().to_string()),
        None => (String::new(), rest.to_string()),
    };

    ProtocolError::Ack {
        code,
        command,
        message,
    }
}

/// Extract the protocol version from the greeting line
pub fn parse_greeting(line: &str) -> Result<String, ProtocolError> {
    line.strip_prefix(GREETING_PREFIX)
        .map(|version| version.trim().to_string())
        .ok_or_else(|| ProtocolError::BadGreeting(line.to_string()))
}

// =============================================================================
// Client
// =============================================================================

/// Connection settings for the daemon. Cheap to clone; holds no connection.
#[derive(Debug, Clone)]
pub struct MpdClient {
    addr: String,
    password: Option<String>,
    timeouts: Timeouts,
}

impl MpdClient {
    pub fn new(host: &str, port: u16) -> Self {
        Self {
            addr: format!("{}:{}", host, port),
            password: None,
            timeouts: Timeouts::default(),
        }
    }

    pub fn with_password(mut self, password: Option<String>) -> Self {
        self.password = password.filter(|p| !p.is_empty());
        self
    }

    pub fn with_timeouts(mut self, timeouts: Timeouts) -> Self {
        self.timeouts = timeouts;
        self
    }

    pub fn addr(&self) -> &str {
        &self.addr
    }

    async fn connect(&self) -> DaemonResult<MpdConnection> {
        let stream = timeout(self.timeouts.connect, TcpStream::connect(&self.addr))
            .await
            .map_err(|_| DaemonError::Timeout(self.timeouts.connect))??;
        stream.set_nodelay(true)?;

        let (read_half, write_half) = stream.into_split();
        let mut conn = MpdConnection {
            reader: BufReader::new(read_half),
            writer: write_half,
            version: String::new(),
            response_timeout: self.timeouts.response,
            idling: false,
        };

        let greeting = conn.read_line(Some(self.timeouts.response)).await?;
        conn.version = parse_greeting(&greeting)?;
        trace!(addr = %self.addr, version = %conn.version, "MPD connected");

        if let Some(ref password) = self.password {
            conn.run(&Command::new("password").arg(password.as_str()))
                .await?;
        }

        Ok(conn)
    }

    /// Open a connection, run `work` on it, and release it.
    ///
    /// The connection is closed whether `work` succeeds or fails. Closures must
    /// own what they capture:
    ///
    /// ```ignore
    /// let songs = client
    ///     .with_connection(move |conn| Box::pin(async move { conn.find(&criteria).await }))
    ///     .await?;
    /// ```
    pub async fn with_connection<T, F>(&self, work: F) -> DaemonResult<T>
    where
        F: for<'c> FnOnce(&'c mut MpdConnection) -> BoxFuture<'c, DaemonResult<T>>,
    {
        let mut conn = self.connect().await?;
        let result = work(&mut conn).await;
        if let Err(ref e) = result {
            debug!(addr = %self.addr, "MPD call failed: {}", e);
        }
        conn.close().await;
        result
    }

    /// Open a dedicated connection for change notifications.
    ///
    /// An empty `subsystems` list watches every subsystem.
    pub async fn watch(&self, subsystems: &[&str]) -> DaemonResult<IdleWatcher> {
        let conn = self.connect().await?;
        debug!(addr = %self.addr, ?subsystems, "MPD idle subscription opened");
        Ok(IdleWatcher {
            conn,
            subsystems: subsystems.iter().map(|s| s.to_string()).collect(),
        })
    }
}

// =============================================================================
// Connection
// =============================================================================

/// One open protocol connection. Not shareable; all access is through `&mut`.
pub struct MpdConnection {
    reader: BufReader<OwnedReadHalf>,
    writer: OwnedWriteHalf,
    version: String,
    response_timeout: Duration,
    /// An `idle` was sent and its answer has not been read
    idling: bool,
}

impl MpdConnection {
    /// Protocol version announced in the greeting
    pub fn version(&self) -> &str {
        &self.version
    }

    async fn send(&mut self, command: &Command) -> DaemonResult<()> {
        let line = command.to_line()?;
        self.writer.write_all(line.as_bytes()).await?;
        self.writer.flush().await?;
        Ok(())
    }

    /// Read one line without its terminator. `None` waits forever.
    async fn read_line(&mut self, deadline: Option<Duration>) -> DaemonResult<String> {
        let mut line = String::new();
        let mut bounded = (&mut self.reader).take(MAX_LINE_BYTES as u64);
        let read = match deadline {
            Some(d) => timeout(d, bounded.read_line(&mut line))
                .await
                .map_err(|_| DaemonError::Timeout(d))??,
            None => bounded.read_line(&mut line).await?,
        };
        if read == 0 {
            return Err(DaemonError::Closed);
        }
        if read == MAX_LINE_BYTES && !line.ends_with('\n') {
            return Err(ProtocolError::LineTooLong {
                limit: MAX_LINE_BYTES,
            }
            .into());
        }
        let trimmed = line.trim_end_matches(['\n', '\r']).len();
        line.truncate(trimmed);
        Ok(line)
    }

    /// Read body lines up to the terminating `OK` or `ACK`.
    async fn read_response(&mut self, deadline: Option<Duration>) -> DaemonResult<Vec<String>> {
        let mut body = Vec::new();
        loop {
            let line = self.read_line(deadline).await?;
            if line == OK_LINE {
                return Ok(body);
            }
            if line.starts_with(ACK_PREFIX) {
                return Err(parse_ack(&line).into());
            }
            body.push(line);
        }
    }

    /// Send a command and collect its raw response body.
    pub async fn run(&mut self, command: &Command) -> DaemonResult<Vec<String>> {
        trace!(command = command.name(), "MPD request");
        self.send(command).await?;
        self.read_response(Some(self.response_timeout)).await
    }

    async fn run_ok(&mut self, command: Command) -> DaemonResult<()> {
        self.run(&command).await.map(|_| ())
    }

    // -------------------------------------------------------------------------
    // Queries
    // -------------------------------------------------------------------------

    pub async fn status(&mut self) -> DaemonResult<Attrs> {
        let lines = self.run(&Command::new("status")).await?;
        Ok(parse_attrs(lines)?)
    }

    /// Current song attributes; empty when nothing is selected.
    pub async fn current_song(&mut self) -> DaemonResult<Attrs> {
        let lines = self.run(&Command::new("currentsong")).await?;
        Ok(parse_attrs(lines)?)
    }

    /// Whole play queue, in queue order.
    pub async fn queue(&mut self) -> DaemonResult<Vec<Attrs>> {
        let lines = self.run(&Command::new("playlistinfo")).await?;
        Ok(parse_attrs_list(lines, SONG_SENTINEL)?)
    }

    /// Distinct values of one tag (e.g. `genre`, `albumartist`).
    pub async fn list(&mut self, tag: &str) -> DaemonResult<Vec<String>> {
        let lines = self.run(&Command::new("list").arg(tag)).await?;
        Ok(parse_values(lines)?)
    }

    /// Every album with its album artist and date.
    pub async fn list_albums(&mut self) -> DaemonResult<Vec<AlbumSummary>> {
        let command = Command::new("list")
            .arg("album")
            .arg("group")
            .arg("albumartist")
            .arg("group")
            .arg("date");
        let lines = self.run(&command).await?;
        Ok(parse_album_listing(lines)?)
    }

    /// Songs matching every `(tag, value)` pair exactly.
    pub async fn find(&mut self, criteria: &[(String, String)]) -> DaemonResult<Vec<Attrs>> {
        if criteria.is_empty() {
            return Err(
                ProtocolError::InvalidCommand("find needs at least one criterion".into()).into(),
            );
        }
        let command = criteria
            .iter()
            .fold(Command::new("find"), |cmd, (tag, value)| {
                cmd.arg(tag.as_str()).arg(value.as_str())
            });
        let lines = self.run(&command).await?;
        Ok(parse_attrs_list(lines, SONG_SENTINEL)?)
    }

    /// Stored playlists (`playlist`, `Last-Modified`)
    pub async fn list_playlists(&mut self) -> DaemonResult<Vec<Attrs>> {
        let lines = self.run(&Command::new("listplaylists")).await?;
        Ok(parse_attrs_list(lines, PLAYLIST_SENTINEL)?)
    }

    pub async fn playlist_contents(&mut self, name: &str) -> DaemonResult<Vec<Attrs>> {
        let lines = self
            .run(&Command::new("listplaylistinfo").arg(name))
            .await?;
        Ok(parse_attrs_list(lines, SONG_SENTINEL)?)
    }

    // -------------------------------------------------------------------------
    // Control
    // -------------------------------------------------------------------------

    /// Start playback, at a queue position when given.
    pub async fn play(&mut self, position: Option<u32>) -> DaemonResult<()> {
        let command = match position {
            Some(pos) => Command::new("play").arg(pos.to_string()),
            None => Command::new("play"),
        };
        self.run_ok(command).await
    }

    pub async fn pause(&mut self, paused: bool) -> DaemonResult<()> {
        self.run_ok(Command::new("pause").arg(if paused { "1" } else { "0" }))
            .await
    }

    pub async fn stop(&mut self) -> DaemonResult<()> {
        self.run_ok(Command::new("stop")).await
    }

    pub async fn next(&mut self) -> DaemonResult<()> {
        self.run_ok(Command::new("next")).await
    }

    pub async fn previous(&mut self) -> DaemonResult<()> {
        self.run_ok(Command::new("previous")).await
    }

    /// Volume in percent; callers clamp to 0..=100.
    pub async fn set_volume(&mut self, volume: u8) -> DaemonResult<()> {
        self.run_ok(Command::new("setvol").arg(volume.to_string()))
            .await
    }

    pub async fn clear(&mut self) -> DaemonResult<()> {
        self.run_ok(Command::new("clear")).await
    }

    /// Append a song or directory (recursively) to the queue.
    pub async fn add(&mut self, uri: &str) -> DaemonResult<()> {
        self.run_ok(Command::new("add").arg(uri)).await
    }

    pub async fn delete(&mut self, position: u32) -> DaemonResult<()> {
        self.run_ok(Command::new("delete").arg(position.to_string()))
            .await
    }

    pub async fn load_playlist(&mut self, name: &str) -> DaemonResult<()> {
        self.run_ok(Command::new("load").arg(name)).await
    }

    pub async fn save_playlist(&mut self, name: &str) -> DaemonResult<()> {
        self.run_ok(Command::new("save").arg(name)).await
    }

    // -------------------------------------------------------------------------
    // Idle
    // -------------------------------------------------------------------------

    /// Block until the daemon reports a change; returns the changed subsystems.
    ///
    /// Changes that happened since the previous `idle` returned are reported
    /// immediately, so none are lost between calls.
    pub async fn idle(&mut self, subsystems: &[String]) -> DaemonResult<Vec<String>> {
        let command = subsystems
            .iter()
            .fold(Command::new("idle"), |cmd, s| cmd.arg(s.as_str()));
        self.send(&command).await?;
        self.idling = true;
        let lines = self.read_response(None).await?;
        self.idling = false;

        Ok(parse_changed(lines)?)
    }

    /// Release the connection. Errors are ignored; the socket is dropped anyway.
    pub async fn close(mut self) {
        if self.idling {
            let _ = self.writer.write_all(b"noidle\n").await;
        }
        if let Err(e) = self.writer.write_all(b"close\n").await {
            trace!("MPD close not delivered: {}", e);
        }
        let _ = self.writer.shutdown().await;
    }
}

/// Collect `changed: <subsystem>` values, ignoring any other keys.
fn parse_changed(lines: Vec<String>) -> Result<Vec<String>, ProtocolError> {
    let records = crate::protocol::parse_records(lines)?;
    Ok(records
        .into_iter()
        .filter(|r| r.key == CHANGED_KEY)
        .map(|r| r.value)
        .collect())
}

// =============================================================================
// Idle watcher
// =============================================================================

/// Dedicated connection that waits for daemon change notifications.
pub struct IdleWatcher {
    conn: MpdConnection,
    subsystems: Vec<String>,
}

impl IdleWatcher {
    /// Wait for the next batch of changed subsystems.
    ///
    /// Dropping the returned future mid-wait leaves the connection in idle
    /// mode; the watcher must then be closed, not reused.
    pub async fn next_change(&mut self) -> DaemonResult<Vec<String>> {
        let changes = self.conn.idle(&self.subsystems).await?;
        if changes.is_empty() {
            warn!("MPD idle returned without any changed subsystem");
        }
        Ok(changes)
    }

    pub async fn close(self) {
        self.conn.close().await;
    }
}
