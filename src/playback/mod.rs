//! Playback queue capability
//!
//! The interpreter enqueues tracks through [`QueueClient`]; the Spotify Web API
//! adapter lives in [`spotify`].

/// Spotify Web API adapter
pub mod spotify;

use crate::links::TrackReference;
use async_trait::async_trait;
use thiserror::Error;

/// Errors surfaced by playback services
#[derive(Debug, Error)]
pub enum QueueError {
    /// No player is running on the account, so there is no queue to add to
    #[error("No active playback device: {0}")]
    DeviceUnavailable(String),
    /// Any other failure (auth, network, rejected request)
    #[error("Queue request failed: {0}")]
    Other(String),
}

/// Interface for playback services
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait QueueClient: Send + Sync {
    /// Append a track to the playback queue
    async fn enqueue(&self, track: &TrackReference) -> Result<(), QueueError>;
}
