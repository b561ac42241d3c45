#![deny(missing_docs)]
//! Song requester library.
//!
//! Watches a group chat thread for shared track links and queues them on the
//! playback service, with a per-user cooldown and admin controls.

/// Poll loop, message classification and side effects.
pub mod bot;
/// Chat transport capability and the Instagram adapter.
pub mod chat;
/// Configuration management.
pub mod config;
/// Track link extraction.
pub mod links;
/// Playback queue capability and the Spotify adapter.
pub mod playback;
/// Durable cooldown ledger and processing cursor (SQLite).
pub mod storage;
/// Utility functions.
pub mod utils;

#[cfg(test)]
pub mod testing;
