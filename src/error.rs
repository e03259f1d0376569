//! Error types shared by the daemon client, the parsers and the relay

use std::time::Duration;
use thiserror::Error;

/// The daemon answered, but not in the shape we expected.
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// A response line without a `": "` separator, or with an empty key.
    #[error("malformed record: {line:?}")]
    MalformedRecord { line: String },

    /// A record appeared before the first start-of-entity key.
    #[error("record {key:?} appears before any {sentinel:?} record")]
    OrphanRecord { key: String, sentinel: String },

    #[error("unrecognized field {key:?} in album listing")]
    UnrecognizedField { key: String },

    #[error("album group is missing field {field:?} (found {found:?})")]
    MissingField {
        field: &'static str,
        found: Option<String>,
    },

    #[error("no results for {0}")]
    EmptyResult(String),

    /// `ACK [code@index] {command} message`
    #[error("daemon rejected {command:?}: [{code}] {message}")]
    Ack {
        code: u32,
        command: String,
        message: String,
    },

    #[error("unexpected greeting: {0:?}")]
    BadGreeting(String),

    #[error("response line longer than {limit} bytes")]
    LineTooLong { limit: usize },

    #[error("invalid command: {0}")]
    InvalidCommand(String),
}

/// Failure talking to the daemon.
#[derive(Debug, Error)]
pub enum DaemonError {
    #[error("transport error: {0}")]
    Transport(#[from] std::io::Error),

    #[error("no response from daemon within {0:?}")]
    Timeout(Duration),

    #[error("daemon closed the connection")]
    Closed,

    #[error(transparent)]
    Protocol(#[from] ProtocolError),
}

impl DaemonError {
    /// True when the daemon could not be reached or the link broke,
    /// as opposed to the daemon answering with something unexpected.
    pub fn is_transport(&self) -> bool {
        matches!(
            self,
            DaemonError::Transport(_) | DaemonError::Timeout(_) | DaemonError::Closed
        )
    }
}

/// Session-fatal failure inside the live feed.
#[derive(Debug, Error)]
pub enum RelayError {
    #[error(transparent)]
    Daemon(#[from] DaemonError),

    #[error("live feed client went away")]
    ClientGone,

    #[error("failed to encode snapshot: {0}")]
    Encode(#[from] serde_json::Error),
}

pub type DaemonResult<T> = std::result::Result<T, DaemonError>;
