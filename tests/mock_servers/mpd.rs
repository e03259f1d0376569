#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
//! Mock MPD for testing
//!
//! Simulates the line protocol on port 6600: greeting, quoted arguments,
//! `OK`/`ACK` framing and `idle`/`noidle`.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use mpd_bridge::adapters::mpd::MpdClient;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{broadcast, RwLock};
use tokio::task::JoinHandle;

/// One song known to the mock library
#[derive(Debug, Clone, Default)]
pub struct MockSong {
    pub file: String,
    pub title: String,
    pub artist: String,
    pub album_artist: String,
    pub album: String,
    pub genre: String,
    pub date: String,
}

impl MockSong {
    pub fn new(file: &str, artist: &str, album: &str, title: &str) -> Self {
        Self {
            file: file.to_string(),
            title: title.to_string(),
            artist: artist.to_string(),
            album_artist: artist.to_string(),
            album: album.to_string(),
            genre: "Jazz".to_string(),
            date: "1959".to_string(),
        }
    }

    pub fn genre(mut self, genre: &str) -> Self {
        self.genre = genre.to_string();
        self
    }

    pub fn date(mut self, date: &str) -> Self {
        self.date = date.to_string();
        self
    }

    pub fn album_artist(mut self, album_artist: &str) -> Self {
        self.album_artist = album_artist.to_string();
        self
    }

    fn tag(&self, tag: &str) -> Option<&str> {
        match tag {
            "file" => Some(&self.file),
            "title" => Some(&self.title),
            "artist" => Some(&self.artist),
            "albumartist" => Some(&self.album_artist),
            "album" => Some(&self.album),
            "genre" => Some(&self.genre),
            "date" => Some(&self.date),
            _ => None,
        }
    }

    fn lines(&self) -> String {
        let mut out = format!("file: {}\n", self.file);
        out.push_str(&format!("Title: {}\n", self.title));
        out.push_str(&format!("Artist: {}\n", self.artist));
        if !self.album_artist.is_empty() {
            out.push_str(&format!("AlbumArtist: {}\n", self.album_artist));
        }
        out.push_str(&format!("Album: {}\n", self.album));
        out.push_str(&format!("Genre: {}\n", self.genre));
        out.push_str(&format!("Date: {}\n", self.date));
        out
    }
}

/// Mock MPD state
#[derive(Debug, Clone)]
pub struct MockMpdState {
    pub greeting: String,
    pub password: Option<String>,
    pub state: String,
    pub volume: u8,
    pub library: Vec<MockSong>,
    pub queue: Vec<MockSong>,
    pub current: Option<usize>,
    pub playlists: Vec<(String, Vec<MockSong>)>,
    /// Command name answered with an ACK instead of running
    pub fail_on: Option<String>,
    /// Answer `currentsong` with an empty body even while playing
    pub empty_current_song: bool,
    /// Raw lines in the order they were received
    pub commands: Vec<String>,
}

impl Default for MockMpdState {
    fn default() -> Self {
        Self {
            greeting: "OK MPD 0.23.5".to_string(),
            password: None,
            state: "stop".to_string(),
            volume: 50,
            library: Vec::new(),
            queue: Vec::new(),
            current: None,
            playlists: Vec::new(),
            fail_on: None,
            empty_current_song: false,
            commands: Vec::new(),
        }
    }
}

/// Mock MPD server
pub struct MockMpdServer {
    addr: SocketAddr,
    state: Arc<RwLock<MockMpdState>>,
    changes: broadcast::Sender<String>,
    open: Arc<AtomicUsize>,
    handle: JoinHandle<()>,
}

impl MockMpdServer {
    /// Start a mock MPD server on a random port
    pub async fn start() -> Self {
        let state = Arc::new(RwLock::new(MockMpdState::default()));
        let (changes, _) = broadcast::channel(32);
        let open = Arc::new(AtomicUsize::new(0));
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let state_clone = state.clone();
        let changes_clone = changes.clone();
        let open_clone = open.clone();
        let handle = tokio::spawn(async move {
            loop {
                match listener.accept().await {
                    Ok((stream, _)) => {
                        let state = state_clone.clone();
                        // Subscribe before the greeting so no change is missed
                        let changes = changes_clone.subscribe();
                        let open = open_clone.clone();
                        open.fetch_add(1, Ordering::SeqCst);
                        tokio::spawn(async move {
                            handle_connection(stream, state, changes).await;
                            open.fetch_sub(1, Ordering::SeqCst);
                        });
                    }
                    Err(_) => break,
                }
            }
        });

        Self {
            addr,
            state,
            changes,
            open,
            handle,
        }
    }

    /// Get the server address
    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// Client configured for this server
    pub fn client(&self) -> MpdClient {
        MpdClient::new("127.0.0.1", self.addr.port())
    }

    pub async fn set_library(&self, songs: Vec<MockSong>) {
        self.state.write().await.library = songs;
    }

    pub async fn set_queue(&self, songs: Vec<MockSong>) {
        self.state.write().await.queue = songs;
    }

    /// Set playback state, selecting a queue position when playing or paused
    pub async fn set_playing(&self, state: &str, current: Option<usize>) {
        let mut s = self.state.write().await;
        s.state = state.to_string();
        s.current = current;
    }

    pub async fn add_playlist(&self, name: &str, songs: Vec<MockSong>) {
        self.state
            .write()
            .await
            .playlists
            .push((name.to_string(), songs));
    }

    pub async fn require_password(&self, password: &str) {
        self.state.write().await.password = Some(password.to_string());
    }

    pub async fn set_greeting(&self, greeting: &str) {
        self.state.write().await.greeting = greeting.to_string();
    }

    /// Reject every future `command` with an ACK
    pub async fn fail_on(&self, command: &str) {
        self.state.write().await.fail_on = Some(command.to_string());
    }

    pub async fn set_empty_current_song(&self, empty: bool) {
        self.state.write().await.empty_current_song = empty;
    }

    pub async fn snapshot(&self) -> MockMpdState {
        self.state.read().await.clone()
    }

    /// Command names received so far, in order
    pub async fn command_names(&self) -> Vec<String> {
        self.state
            .read()
            .await
            .commands
            .iter()
            .map(|c| c.split_whitespace().next().unwrap_or_default().to_string())
            .collect()
    }

    /// Report a subsystem change to every connection, idle or not
    pub fn notify(&self, subsystem: &str) {
        let _ = self.changes.send(subsystem.to_string());
    }

    pub fn open_connections(&self) -> usize {
        self.open.load(Ordering::SeqCst)
    }

    /// Wait until every client connection has been closed
    pub async fn wait_all_closed(&self) -> bool {
        for _ in 0..100 {
            if self.open_connections() == 0 {
                return true;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        false
    }

    /// Stop the mock server
    pub async fn stop(self) {
        self.handle.abort();
    }
}

/// Handle a single TCP connection
async fn handle_connection(
    stream: TcpStream,
    state: Arc<RwLock<MockMpdState>>,
    mut changes: broadcast::Receiver<String>,
) {
    let (reader, mut writer) = stream.into_split();
    let mut reader = BufReader::new(reader);
    let mut line = String::new();
    let mut authed = state.read().await.password.is_none();

    let greeting = format!("{}\n", state.read().await.greeting);
    if writer.write_all(greeting.as_bytes()).await.is_err() {
        return;
    }

    loop {
        line.clear();
        match reader.read_line(&mut line).await {
            Ok(0) | Err(_) => break,
            Ok(_) => {}
        }
        let command = line.trim_end().to_string();
        state.write().await.commands.push(command.clone());
        let (name, args) = split_command(&command);

        let response = match name.as_str() {
            "close" => break,
            "idle" => match wait_for_change(&mut reader, &mut changes, &state).await {
                Some(response) => response,
                None => break,
            },
            "password" => {
                let expected = state.read().await.password.clone();
                if expected.as_deref() == args.first().map(String::as_str) {
                    authed = true;
                    "OK\n".to_string()
                } else {
                    "ACK [3@0] {password} incorrect password\n".to_string()
                }
            }
            _ if !authed => format!("ACK [4@0] {{{}}} you don't have permission\n", name),
            _ => process_command(&name, &args, &state).await,
        };

        if writer.write_all(response.as_bytes()).await.is_err() {
            break;
        }
    }
}

/// Block an `idle` until a change arrives or the client sends `noidle`.
async fn wait_for_change(
    reader: &mut BufReader<tokio::net::tcp::OwnedReadHalf>,
    changes: &mut broadcast::Receiver<String>,
    state: &Arc<RwLock<MockMpdState>>,
) -> Option<String> {
    let mut line = String::new();
    loop {
        tokio::select! {
            change = changes.recv() => match change {
                Ok(subsystem) => return Some(format!("changed: {}\nOK\n", subsystem)),
                Err(broadcast::error::RecvError::Lagged(_)) => continue,
                Err(broadcast::error::RecvError::Closed) => return None,
            },
            read = reader.read_line(&mut line) => match read {
                Ok(0) | Err(_) => return None,
                Ok(_) => {
                    let command = line.trim_end().to_string();
                    state.write().await.commands.push(command.clone());
                    // Anything but noidle while idling drops the client
                    return (command == "noidle").then(|| "OK\n".to_string());
                }
            },
        }
    }
}

/// Split `name "arg one" "arg \"two\""` into its parts
fn split_command(line: &str) -> (String, Vec<String>) {
    let (name, rest) = line.split_once(' ').unwrap_or((line, ""));
    let mut args = Vec::new();
    let mut chars = rest.chars().peekable();

    while let Some(c) = chars.next() {
        if c == '"' {
            let mut arg = String::new();
            while let Some(c) = chars.next() {
                match c {
                    '\\' => {
                        if let Some(escaped) = chars.next() {
                            arg.push(escaped);
                        }
                    }
                    '"' => break,
                    other => arg.push(other),
                }
            }
            args.push(arg);
        } else if !c.is_whitespace() {
            let mut arg = c.to_string();
            while let Some(&next) = chars.peek() {
                if next.is_whitespace() {
                    break;
                }
                arg.push(next);
                chars.next();
            }
            args.push(arg);
        }
    }

    (name.to_string(), args)
}

fn tag_key(tag: &str) -> &'static str {
    match tag {
        "artist" => "Artist",
        "albumartist" => "AlbumArtist",
        "album" => "Album",
        "genre" => "Genre",
        "date" => "Date",
        "title" => "Title",
        _ => "Unknown",
    }
}

fn ack(code: u32, command: &str, message: &str) -> String {
    format!("ACK [{}@0] {{{}}} {}\n", code, command, message)
}

/// Process one command and return the full response including `OK`
async fn process_command(name: &str, args: &[String], state: &Arc<RwLock<MockMpdState>>) -> String {
    let mut s = state.write().await;

    if s.fail_on.as_deref() == Some(name) {
        return ack(5, name, "injected failure");
    }

    let body = match name {
        "status" => {
            let mut out = format!(
                "volume: {}\nrepeat: 0\nrandom: 0\nplaylistlength: {}\nstate: {}\n",
                s.volume,
                s.queue.len(),
                s.state
            );
            if let Some(pos) = s.current {
                out.push_str(&format!("song: {}\nsongid: {}\n", pos, pos + 1));
            }
            out
        }
        "currentsong" => match s.current {
            Some(pos) if s.state != "stop" && !s.empty_current_song => match s.queue.get(pos) {
                Some(song) => format!("{}Pos: {}\nId: {}\n", song.lines(), pos, pos + 1),
                None => String::new(),
            },
            _ => String::new(),
        },
        "playlistinfo" => s
            .queue
            .iter()
            .enumerate()
            .map(|(pos, song)| format!("{}Pos: {}\nId: {}\n", song.lines(), pos, pos + 1))
            .collect(),
        "list" => {
            let Some(tag) = args.first() else {
                return ack(2, name, "too few arguments for \"list\"");
            };
            if args.iter().any(|a| a == "group") {
                // list album group albumartist group date
                let mut seen = Vec::new();
                let mut out = String::new();
                for song in &s.library {
                    let key = (song.album.clone(), song.album_artist.clone(), song.date.clone());
                    if seen.contains(&key) {
                        continue;
                    }
                    out.push_str(&format!(
                        "Album: {}\nAlbumArtist: {}\nDate: {}\n",
                        key.0, key.1, key.2
                    ));
                    seen.push(key);
                }
                out
            } else {
                let mut values: Vec<&str> = Vec::new();
                for song in &s.library {
                    if let Some(v) = song.tag(tag) {
                        if !values.contains(&v) {
                            values.push(v);
                        }
                    }
                }
                values
                    .iter()
                    .map(|v| format!("{}: {}\n", tag_key(tag), v))
                    .collect()
            }
        }
        "find" => {
            if args.is_empty() || args.len() % 2 != 0 {
                return ack(2, name, "incorrect arguments");
            }
            s.library
                .iter()
                .filter(|song| {
                    args.chunks(2)
                        .all(|pair| song.tag(&pair[0]) == Some(pair[1].as_str()))
                })
                .map(MockSong::lines)
                .collect()
        }
        "listplaylists" => s
            .playlists
            .iter()
            .map(|(name, _)| format!("playlist: {}\nLast-Modified: 2024-01-01T00:00:00Z\n", name))
            .collect(),
        "listplaylistinfo" => {
            let wanted = args.first().cloned().unwrap_or_default();
            match s.playlists.iter().find(|(n, _)| *n == wanted) {
                Some((_, songs)) => songs.iter().map(MockSong::lines).collect(),
                None => return ack(50, name, "No such playlist"),
            }
        }
        "load" => {
            let wanted = args.first().cloned().unwrap_or_default();
            let found = s
                .playlists
                .iter()
                .find(|(n, _)| *n == wanted)
                .map(|(_, songs)| songs.clone());
            match found {
                Some(songs) => {
                    s.queue.extend(songs);
                    String::new()
                }
                None => return ack(50, name, "No such playlist"),
            }
        }
        "save" => {
            let wanted = args.first().cloned().unwrap_or_default();
            if s.playlists.iter().any(|(n, _)| *n == wanted) {
                return ack(56, name, "Playlist already exists");
            }
            let queue = s.queue.clone();
            s.playlists.push((wanted, queue));
            String::new()
        }
        "clear" => {
            s.queue.clear();
            s.current = None;
            s.state = "stop".to_string();
            String::new()
        }
        "add" => {
            let uri = args.first().cloned().unwrap_or_default();
            let prefix = format!("{}/", uri);
            let matched: Vec<MockSong> = s
                .library
                .iter()
                .filter(|song| song.file == uri || song.file.starts_with(&prefix))
                .cloned()
                .collect();
            if matched.is_empty() {
                return ack(50, name, "No such directory");
            }
            s.queue.extend(matched);
            String::new()
        }
        "play" => {
            let pos = match args.first() {
                Some(p) => match p.parse::<usize>() {
                    Ok(p) if p < s.queue.len() => Some(p),
                    _ => return ack(2, name, "Bad song index"),
                },
                None => s.current.or(if s.queue.is_empty() { None } else { Some(0) }),
            };
            if pos.is_some() {
                s.current = pos;
                s.state = "play".to_string();
            }
            String::new()
        }
        "pause" => {
            if s.state != "stop" {
                s.state = if args.first().map(String::as_str) == Some("1") {
                    "pause".to_string()
                } else {
                    "play".to_string()
                };
            }
            String::new()
        }
        "stop" => {
            s.state = "stop".to_string();
            String::new()
        }
        "next" | "previous" => {
            if let Some(pos) = s.current {
                let next = if name == "next" {
                    pos + 1
                } else {
                    pos.saturating_sub(1)
                };
                if next < s.queue.len() {
                    s.current = Some(next);
                } else {
                    s.current = None;
                    s.state = "stop".to_string();
                }
            }
            String::new()
        }
        "delete" => match args.first().and_then(|p| p.parse::<usize>().ok()) {
            Some(pos) if pos < s.queue.len() => {
                s.queue.remove(pos);
                String::new()
            }
            _ => return ack(2, name, "Bad song index"),
        },
        "setvol" => match args.first().and_then(|v| v.parse::<u8>().ok()) {
            Some(v) if v <= 100 => {
                s.volume = v;
                String::new()
            }
            _ => return ack(2, name, "Invalid volume value"),
        },
        "noidle" => String::new(),
        other => return ack(5, "", &format!("unknown command \"{}\"", other)),
    };

    format!("{}OK\n", body)
}

