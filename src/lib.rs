//! mpd-bridge
//!
//! HTTP/WebSocket bridge in front of a Music Player Daemon.
//!
//! This library provides:
//! - A client for the daemon's line protocol, one connection per unit of work
//! - Decoding of `Key: Value` responses and album catalog grouping
//! - Player snapshots (status, current song, queue)
//! - A live relay pushing a fresh snapshot on every daemon change
//! - axum handlers for playback, library and playlist routes

pub mod adapters;
pub mod aggregator;
pub mod api;
pub mod config;
pub mod error;
pub mod protocol;
pub mod relay;
