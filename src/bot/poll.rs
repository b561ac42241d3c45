//! Poll loop controller.
//!
//! Drives the fetch, dedupe and dispatch cycle against a single thread and keeps
//! running through every error once started. Sleeps use `tokio::time`, so the
//! loop can be driven with a paused clock.

use crate::bot::commands::{classify, ActionKind};
use crate::bot::handlers::Dispatcher;
use crate::bot::state::{BotConfig, Identities};
use crate::chat::{ChatClient, ChatError, Message};
use crate::config::PollTimings;
use crate::links::LinkExtractor;
use crate::storage::{CooldownStore, StoreError};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::time::{sleep, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Errors that end a single poll iteration
#[derive(Debug, Error)]
pub enum PollError {
    /// Chat service failure other than a 5xx
    #[error(transparent)]
    Chat(#[from] ChatError),
    /// Cooldown store failure
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Result of one iteration
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollOutcome {
    /// The thread has no messages
    Idle,
    /// Latest message was already processed
    AlreadySeen,
    /// The chat service answered with a 5xx
    ServerBusy,
    /// A new message was classified and acted on
    Processed(ActionKind),
}

/// Long-running controller for one watched thread
pub struct PollLoop {
    chat: Arc<dyn ChatClient>,
    store: Arc<CooldownStore>,
    dispatcher: Dispatcher,
    links: LinkExtractor,
    identities: Identities,
    config: BotConfig,
    timings: PollTimings,
    members: HashMap<String, String>,
    last_success: Instant,
}

impl PollLoop {
    /// Create a loop with default timings and an empty member map
    #[must_use]
    pub fn new(
        chat: Arc<dyn ChatClient>,
        store: Arc<CooldownStore>,
        dispatcher: Dispatcher,
        links: LinkExtractor,
        identities: Identities,
        config: BotConfig,
    ) -> Self {
        Self {
            chat,
            store,
            dispatcher,
            links,
            identities,
            config,
            timings: PollTimings::default(),
            members: HashMap::new(),
            last_success: Instant::now(),
        }
    }

    /// Override the sleep durations
    #[must_use]
    pub const fn with_timings(mut self, timings: PollTimings) -> Self {
        self.timings = timings;
        self
    }

    /// Seed the user id to username map
    #[must_use]
    pub fn with_members(mut self, members: HashMap<String, String>) -> Self {
        self.members = members;
        self
    }

    /// Current runtime configuration
    #[must_use]
    pub const fn config(&self) -> &BotConfig {
        &self.config
    }

    fn thread_id(&self) -> &str {
        self.dispatcher.thread_id()
    }

    /// Run until `shutdown` is cancelled. Errors are logged and backed off, never returned.
    pub async fn run(&mut self, shutdown: CancellationToken) {
        info!(
            "🚀 Watching thread {} (poll every {:?})",
            self.thread_id(),
            self.timings.poll_interval
        );

        while !shutdown.is_cancelled() {
            let pause = match self.poll_once().await {
                Ok(PollOutcome::ServerBusy) => {
                    warn!(
                        "Chat server error, backing off for {:?}",
                        self.timings.server_error_backoff
                    );
                    Some(self.timings.server_error_backoff)
                }
                Ok(outcome) => {
                    debug!("Poll outcome: {:?}", outcome);
                    None
                }
                Err(e) => {
                    let backoff = self.backoff_for(&e);
                    error!(
                        operation = "poll",
                        "Poll iteration failed: {}. Retrying in {:?}", e, backoff
                    );
                    Some(backoff)
                }
            };

            if let Some(pause) = pause {
                if !sleep_or_cancel(pause, &shutdown).await {
                    break;
                }
            }
            if !sleep_or_cancel(self.timings.poll_interval, &shutdown).await {
                break;
            }
        }
        info!("🛑 Poll loop stopped");
    }

    const fn backoff_for(&self, error: &PollError) -> Duration {
        match error {
            PollError::Chat(ChatError::Server { .. }) => self.timings.server_error_backoff,
            PollError::Chat(_) => self.timings.api_error_backoff,
            PollError::Store(_) => self.timings.generic_error_backoff,
        }
    }

    /// Run a single fetch, dedupe and dispatch iteration.
    ///
    /// # Errors
    ///
    /// Returns `PollError` for chat failures other than 5xx, failed session
    /// recovery and cooldown store failures.
    pub async fn poll_once(&mut self) -> Result<PollOutcome, PollError> {
        if self.last_success.elapsed() > self.timings.session_stale_after {
            self.recover_session().await?;
        }

        let latest = match self.chat.fetch_latest(self.thread_id()).await {
            Ok(latest) => latest,
            Err(e) if e.is_server() => return Ok(PollOutcome::ServerBusy),
            Err(e) => return Err(e.into()),
        };
        self.last_success = Instant::now();

        let Some(mut message) = latest else {
            return Ok(PollOutcome::Idle);
        };
        if self.store.get_cursor()?.as_deref() == Some(message.id.as_str()) {
            return Ok(PollOutcome::AlreadySeen);
        }

        self.resolve_sender(&mut message).await;
        self.store.set_cursor(&message.id)?;

        let action = classify(&message, &self.config, &self.identities, &self.links);
        let kind = action.kind();
        info!(
            message_id = %message.id,
            user = %message.display_name(),
            "📨 New message: {}",
            kind.label()
        );
        self.dispatcher
            .dispatch(action, &message, &mut self.config)
            .await?;
        Ok(PollOutcome::Processed(kind))
    }

    async fn recover_session(&mut self) -> Result<(), PollError> {
        warn!(
            "No successful fetch for {:?}, re-establishing the chat session",
            self.last_success.elapsed()
        );
        self.chat.reestablish_session().await?;
        self.last_success = Instant::now();
        info!("🔑 Chat session re-established");
        self.refresh_members().await;
        Ok(())
    }

    async fn refresh_members(&mut self) {
        match self.chat.list_thread_members(self.thread_id()).await {
            Ok(members) => {
                debug!("Loaded {} thread members", members.len());
                self.members = members;
            }
            Err(e) => warn!("Failed to reload thread members: {}", e),
        }
    }

    /// Fill in a missing display name from the member map, reloading it once on a miss
    async fn resolve_sender(&mut self, message: &mut Message) {
        // The inbox never lists the viewer, so the bot's own id is never a member
        if self.identities.is_bot(&message.sender_id) {
            return;
        }
        let known = message
            .sender_display_name
            .as_deref()
            .is_some_and(|name| !name.is_empty());
        if known {
            return;
        }
        if !self.members.contains_key(&message.sender_id) {
            debug!("Unknown sender {}, reloading members", message.sender_id);
            self.refresh_members().await;
        }
        match self.members.get(&message.sender_id) {
            Some(name) => message.sender_display_name = Some(name.clone()),
            None => warn!(
                "Sender {} is not a known member, using the id as name",
                message.sender_id
            ),
        }
    }
}

/// Sleep for `duration`; false if `shutdown` fired first
async fn sleep_or_cancel(duration: Duration, shutdown: &CancellationToken) -> bool {
    tokio::select! {
        () = sleep(duration) => true,
        () = shutdown.cancelled() => false,
    }
}
