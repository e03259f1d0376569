//! Music daemon adapters

pub mod mpd;

pub use mpd::{Command, IdleWatcher, MpdClient, MpdConnection, Timeouts};
