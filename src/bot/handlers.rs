//! Side effects for classified messages.
//!
//! Replies and likes are best-effort: a failure is logged and never blocks the
//! loop. Enqueue failures are turned into user-facing replies and never retried.

use crate::bot::commands::{Action, AdminCommand};
use crate::bot::state::BotConfig;
use crate::chat::{ChatClient, Message};
use crate::links::TrackReference;
use crate::playback::{QueueClient, QueueError};
use crate::storage::{CooldownStore, StoreError};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// Reply texts sent to the thread
pub mod replies {
    /// Sent when a music attachment arrives instead of a text link
    pub const ATTACHMENT_NOTICE: &str = "🎵 This looks like shared music. If the link does not \
         work, delete everything before `open.spotify.com/...` and send it again.";
    /// Bot paused by the admin
    pub const PAUSED: &str = "⏸️ Bot paused.";
    /// Bot resumed by the admin
    pub const RESUMED: &str = "▶️ Bot resumed.";
    /// `set cooldown` without a usable number
    pub const INVALID_COOLDOWN: &str = "❌ Invalid cooldown format. Use: set cooldown <minutes>";
    /// Track queued
    pub const QUEUED: &str = "✅ Added to the queue.";
    /// No active Spotify player
    pub const NO_DEVICE: &str =
        "⚠️ Spotify is not playing anywhere. Please open the player and start something.";
    /// Any other queue failure
    pub const QUEUE_FAILED: &str = "❌ Failed to add the track to the queue.";
}

/// Executes the effect of each [`Action`]
pub struct Dispatcher {
    chat: Arc<dyn ChatClient>,
    queue: Arc<dyn QueueClient>,
    store: Arc<CooldownStore>,
    thread_id: String,
    like_accepted: bool,
}

impl Dispatcher {
    /// Create a dispatcher replying into `thread_id`
    #[must_use]
    pub fn new(
        chat: Arc<dyn ChatClient>,
        queue: Arc<dyn QueueClient>,
        store: Arc<CooldownStore>,
        thread_id: impl Into<String>,
    ) -> Self {
        Self {
            chat,
            queue,
            store,
            thread_id: thread_id.into(),
            like_accepted: false,
        }
    }

    /// Also like messages whose track was queued
    #[must_use]
    pub const fn with_like_accepted(mut self, like_accepted: bool) -> Self {
        self.like_accepted = like_accepted;
        self
    }

    /// Thread the dispatcher replies into
    #[must_use]
    pub fn thread_id(&self) -> &str {
        &self.thread_id
    }

    /// Run the effect of `action` for `message`.
    ///
    /// # Errors
    ///
    /// Returns `StoreError` if the cooldown ledger cannot be read; every other
    /// failure is handled here.
    pub async fn dispatch(
        &self,
        action: Action,
        message: &Message,
        config: &mut BotConfig,
    ) -> Result<(), StoreError> {
        let user = message.display_name();
        match action {
            Action::IgnoreOwn => debug!("Message {} is from the bot, ignoring", message.id),
            Action::AttachmentNotice => {
                debug!("Music attachment from @{}, sending notice", user);
                self.reply(user, replies::ATTACHMENT_NOTICE).await;
            }
            Action::Admin(command) => self.handle_admin(command, user, config).await,
            Action::Paused => debug!("Bot is paused, skipping message {}", message.id),
            Action::NoTrack => {}
            Action::Track(track) => self.handle_track(&track, message, config).await?,
        }
        Ok(())
    }

    async fn handle_admin(&self, command: AdminCommand, user: &str, config: &mut BotConfig) {
        match command {
            AdminCommand::Stop => {
                config.active = false;
                info!("⏸️ Bot paused by @{}", user);
                self.reply(user, replies::PAUSED).await;
            }
            AdminCommand::Start => {
                config.active = true;
                info!("▶️ Bot resumed by @{}", user);
                self.reply(user, replies::RESUMED).await;
            }
            AdminCommand::SetCooldown(minutes) => {
                config.cooldown_window = Duration::from_secs(u64::from(minutes) * 60);
                info!(
                    "🕒 Cooldown set to {} minutes by @{}",
                    config.cooldown_minutes(),
                    user
                );
                self.reply(user, &format!("🕒 Cooldown set to {minutes} minutes."))
                    .await;
            }
            AdminCommand::InvalidCooldown => {
                warn!("Invalid cooldown command from @{}", user);
                self.reply(user, replies::INVALID_COOLDOWN).await;
            }
        }
    }

    async fn handle_track(
        &self,
        track: &TrackReference,
        message: &Message,
        config: &BotConfig,
    ) -> Result<(), StoreError> {
        let user = message.display_name();
        if !self.store.can_post(user, config.cooldown_window)? {
            let minutes = self.store.minutes_remaining(user, config.cooldown_window)?;
            debug!("@{} is on cooldown for {} more minutes", user, minutes);
            self.reply(user, &format!("🕒 Try again in {minutes} minutes."))
                .await;
            return Ok(());
        }

        match self.queue.enqueue(track).await {
            Ok(()) => {
                if let Err(e) = self.store.record_post(user) {
                    error!(
                        user = %user,
                        message_id = %message.id,
                        "Track queued but cooldown not recorded: {}", e
                    );
                }
                info!("✅ Queued {} from @{}", track.track_id, user);
                self.reply(user, replies::QUEUED).await;
                if self.like_accepted {
                    if let Err(e) = self.chat.like(&self.thread_id, &message.id).await {
                        warn!(message_id = %message.id, "Failed to like message: {}", e);
                    }
                }
            }
            Err(e) => {
                error!(
                    user = %user,
                    message_id = %message.id,
                    track_id = %track.track_id,
                    "Enqueue failed: {}", e
                );
                let text = match e {
                    QueueError::DeviceUnavailable(_) => replies::NO_DEVICE,
                    QueueError::Other(_) => replies::QUEUE_FAILED,
                };
                self.reply(user, text).await;
            }
        }
        Ok(())
    }

    async fn reply(&self, user: &str, text: &str) {
        let text = format!("@{user}: {text}");
        if let Err(e) = self.chat.send(&self.thread_id, &text).await {
            warn!(user = %user, "Failed to send reply: {}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bot::commands::classify;
    use crate::bot::state::Identities;
    use crate::chat::ChatError;
    use crate::links::LinkExtractor;
    use crate::playback::MockQueueClient;
    use crate::storage::ManualClock;
    use crate::testing::{
        mock_chat_recording, mock_queue_unused, replies as sent_replies, tamperable_store,
        text_message, ADMIN, BOT_ID, THREAD,
    };
    use chrono::Utc;
    use mockall::predicate::eq;

    const MINUTE: Duration = Duration::from_secs(60);

    struct Harness {
        store: Arc<CooldownStore>,
        clock: Arc<ManualClock>,
        links: LinkExtractor,
        identities: Identities,
    }

    impl Harness {
        fn new() -> Self {
            let clock = Arc::new(ManualClock::new(Utc::now()));
            let store = Arc::new(
                CooldownStore::open_in_memory(clock.clone()).expect("in-memory store"),
            );
            Self {
                store,
                clock,
                links: LinkExtractor::new("open.example.com").expect("valid host"),
                identities: Identities {
                    bot_user_id: BOT_ID.to_string(),
                    admin_name: ADMIN.to_string(),
                },
            }
        }

        fn dispatcher(
            &self,
            chat: impl ChatClient + 'static,
            queue: impl QueueClient + 'static,
        ) -> Dispatcher {
            Dispatcher::new(Arc::new(chat), Arc::new(queue), self.store.clone(), THREAD)
        }

        async fn handle(
            &self,
            dispatcher: &Dispatcher,
            message: &Message,
            config: &mut BotConfig,
        ) -> Result<(), StoreError> {
            let action = classify(message, config, &self.identities, &self.links);
            dispatcher.dispatch(action, message, config).await
        }
    }

    fn queue_ok(track_id: &'static str) -> MockQueueClient {
        let mut queue = MockQueueClient::new();
        queue
            .expect_enqueue()
            .with(eq(TrackReference::new(track_id)))
            .times(1)
            .returning(|_| Ok(()));
        queue
    }

    #[tokio::test]
    async fn test_track_is_queued_and_confirmed() -> Result<(), StoreError> {
        let h = Harness::new();
        let (chat, sent) = mock_chat_recording();
        let dispatcher = h.dispatcher(chat, queue_ok("abc123"));
        let mut config = BotConfig::new(20 * MINUTE);

        let msg = text_message("m1", "alice", "https://open.example.com/track/abc123?si=x");
        h.handle(&dispatcher, &msg, &mut config).await?;

        assert_eq!(sent_replies(&sent), vec!["@alice: ✅ Added to the queue."]);
        assert!(!h.store.can_post("alice", config.cooldown_window)?);
        Ok(())
    }

    #[tokio::test]
    async fn test_cooldown_blocks_second_track() -> Result<(), StoreError> {
        let h = Harness::new();
        let (chat, sent) = mock_chat_recording();
        let dispatcher = h.dispatcher(chat, queue_ok("first"));
        let mut config = BotConfig::new(20 * MINUTE);

        let first = text_message("m1", "alice", "https://open.example.com/track/first");
        h.handle(&dispatcher, &first, &mut config).await?;
        h.clock.advance(3 * MINUTE);
        let second = text_message("m2", "alice", "https://open.example.com/track/second");
        h.handle(&dispatcher, &second, &mut config).await?;

        assert_eq!(
            sent_replies(&sent),
            vec![
                "@alice: ✅ Added to the queue.",
                "@alice: 🕒 Try again in 17 minutes."
            ]
        );
        Ok(())
    }

    #[tokio::test]
    async fn test_confirmation_sent_when_cooldown_write_fails() -> Result<(), StoreError> {
        let clock = Arc::new(ManualClock::new(Utc::now()));
        let (_dir, store, raw) = tamperable_store(clock);
        raw.execute_batch(
            "CREATE TRIGGER reject_cooldowns BEFORE INSERT ON cooldowns
             BEGIN SELECT RAISE(ABORT, 'read only'); END;",
        )?;
        let (chat, sent) = mock_chat_recording();
        let dispatcher = Dispatcher::new(
            Arc::new(chat),
            Arc::new(queue_ok("abc")),
            store.clone(),
            THREAD,
        );
        let mut config = BotConfig::new(20 * MINUTE);

        let msg = text_message("m1", "alice", "https://open.example.com/track/abc");
        let action = Action::Track(TrackReference::new("abc"));
        dispatcher.dispatch(action, &msg, &mut config).await?;

        assert_eq!(sent_replies(&sent), vec!["@alice: ✅ Added to the queue."]);
        assert!(store.can_post("alice", config.cooldown_window)?);
        Ok(())
    }

    #[tokio::test]
    async fn test_device_unavailable_reply_without_cooldown() -> Result<(), StoreError> {
        let h = Harness::new();
        let (chat, sent) = mock_chat_recording();
        let mut queue = MockQueueClient::new();
        queue
            .expect_enqueue()
            .times(1)
            .returning(|_| Err(QueueError::DeviceUnavailable("No active device found".into())));
        let dispatcher = h.dispatcher(chat, queue);
        let mut config = BotConfig::new(20 * MINUTE);

        let msg = text_message("m1", "bob", "https://open.example.com/track/abc");
        h.handle(&dispatcher, &msg, &mut config).await?;

        assert_eq!(sent_replies(&sent), vec![format!("@bob: {}", replies::NO_DEVICE)]);
        assert!(h.store.can_post("bob", config.cooldown_window)?);
        Ok(())
    }

    #[tokio::test]
    async fn test_other_queue_error_reply() -> Result<(), StoreError> {
        let h = Harness::new();
        let (chat, sent) = mock_chat_recording();
        let mut queue = MockQueueClient::new();
        queue
            .expect_enqueue()
            .times(1)
            .returning(|_| Err(QueueError::Other("403 Premium required".into())));
        let dispatcher = h.dispatcher(chat, queue);
        let mut config = BotConfig::new(20 * MINUTE);

        let msg = text_message("m1", "bob", "https://open.example.com/track/abc");
        h.handle(&dispatcher, &msg, &mut config).await?;

        assert_eq!(
            sent_replies(&sent),
            vec![format!("@bob: {}", replies::QUEUE_FAILED)]
        );
        Ok(())
    }

    #[tokio::test]
    async fn test_admin_stop_then_links_ignored() -> Result<(), StoreError> {
        let h = Harness::new();
        let (chat, sent) = mock_chat_recording();
        let dispatcher = h.dispatcher(chat, mock_queue_unused());
        let mut config = BotConfig::new(20 * MINUTE);

        h.handle(&dispatcher, &text_message("m1", ADMIN, "Stop"), &mut config)
            .await?;
        assert!(!config.active);

        let link = text_message("m2", "alice", "https://open.example.com/track/abc");
        h.handle(&dispatcher, &link, &mut config).await?;

        assert_eq!(sent_replies(&sent), vec![format!("@{ADMIN}: {}", replies::PAUSED)]);
        Ok(())
    }

    #[tokio::test]
    async fn test_admin_start_resumes() -> Result<(), StoreError> {
        let h = Harness::new();
        let (chat, _sent) = mock_chat_recording();
        let dispatcher = h.dispatcher(chat, mock_queue_unused());
        let mut config = BotConfig::new(20 * MINUTE);
        config.active = false;

        h.handle(&dispatcher, &text_message("m1", ADMIN, "start"), &mut config)
            .await?;
        assert!(config.active);
        Ok(())
    }

    #[tokio::test]
    async fn test_set_cooldown_releases_user() -> Result<(), StoreError> {
        let h = Harness::new();
        let (chat, sent) = mock_chat_recording();
        let dispatcher = h.dispatcher(chat, mock_queue_unused());
        let mut config = BotConfig::new(20 * MINUTE);

        h.store.record_post("alice")?;
        h.clock.advance(6 * MINUTE);
        assert!(!h.store.can_post("alice", config.cooldown_window)?);

        h.handle(
            &dispatcher,
            &text_message("m1", ADMIN, "set cooldown 5"),
            &mut config,
        )
        .await?;

        assert_eq!(config.cooldown_window, 5 * MINUTE);
        assert!(h.store.can_post("alice", config.cooldown_window)?);
        assert_eq!(
            sent_replies(&sent),
            vec![format!("@{ADMIN}: 🕒 Cooldown set to 5 minutes.")]
        );
        Ok(())
    }

    #[tokio::test]
    async fn test_invalid_cooldown_keeps_window() -> Result<(), StoreError> {
        let h = Harness::new();
        let (chat, sent) = mock_chat_recording();
        let dispatcher = h.dispatcher(chat, mock_queue_unused());
        let mut config = BotConfig::new(20 * MINUTE);

        h.handle(
            &dispatcher,
            &text_message("m1", ADMIN, "set cooldown abc"),
            &mut config,
        )
        .await?;

        assert_eq!(config.cooldown_window, 20 * MINUTE);
        assert_eq!(
            sent_replies(&sent),
            vec![format!("@{ADMIN}: {}", replies::INVALID_COOLDOWN)]
        );
        Ok(())
    }

    #[tokio::test]
    async fn test_reply_failure_is_swallowed() -> Result<(), StoreError> {
        let h = Harness::new();
        let mut chat = crate::chat::MockChatClient::new();
        chat.expect_send()
            .times(1)
            .returning(|_, _| Err(ChatError::Network("connection reset".into())));
        let dispatcher = h.dispatcher(chat, queue_ok("abc"));
        let mut config = BotConfig::new(20 * MINUTE);

        let msg = text_message("m1", "alice", "https://open.example.com/track/abc");
        h.handle(&dispatcher, &msg, &mut config).await?;
        assert!(!h.store.can_post("alice", config.cooldown_window)?);
        Ok(())
    }

    #[tokio::test]
    async fn test_like_after_queue_when_enabled() -> Result<(), StoreError> {
        let h = Harness::new();
        let mut chat = crate::chat::MockChatClient::new();
        chat.expect_send().returning(|_, _| Ok(()));
        chat.expect_like()
            .withf(|thread, message_id| thread == THREAD && message_id == "m1")
            .times(1)
            .returning(|_, _| Ok(()));
        let dispatcher = h.dispatcher(chat, queue_ok("abc")).with_like_accepted(true);
        let mut config = BotConfig::new(20 * MINUTE);

        let msg = text_message("m1", "alice", "https://open.example.com/track/abc");
        h.handle(&dispatcher, &msg, &mut config).await?;
        Ok(())
    }

    #[tokio::test]
    async fn test_attachment_notice() -> Result<(), StoreError> {
        let h = Harness::new();
        let (chat, sent) = mock_chat_recording();
        let dispatcher = h.dispatcher(chat, mock_queue_unused());
        let mut config = BotConfig::new(20 * MINUTE);

        let mut msg = text_message("m1", "alice", "");
        msg.kind = crate::chat::MessageKind::MusicAttachment;
        h.handle(&dispatcher, &msg, &mut config).await?;

        assert_eq!(
            sent_replies(&sent),
            vec![format!("@alice: {}", replies::ATTACHMENT_NOTICE)]
        );
        Ok(())
    }
}
