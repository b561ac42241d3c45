//! Message classification.
//!
//! [`classify`] is pure: it decides what a message means given the current bot
//! configuration, and leaves every side effect to [`crate::bot::handlers`].

// lazy_regex! uses once_cell internally
#![allow(clippy::non_std_lazy_statics)]

use crate::bot::state::{BotConfig, Identities};
use crate::chat::{Message, MessageKind};
use crate::links::{LinkExtractor, TrackReference};
use lazy_regex::lazy_regex;

/// First run of digits, e.g. the minutes in `set cooldown 15`
static RE_DIGITS: lazy_regex::Lazy<regex::Regex> = lazy_regex!(r"\d+");

/// Admin commands, matched case-insensitively anywhere in the body
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AdminCommand {
    /// Pause link processing
    Stop,
    /// Resume link processing
    Start,
    /// Change the cooldown window (minutes)
    SetCooldown(u32),
    /// `set cooldown` without a usable number
    InvalidCooldown,
}

impl AdminCommand {
    /// Parse an admin command from a message body.
    ///
    /// `stop` is checked first, then `start`, then `set cooldown <minutes>`.
    #[must_use]
    pub fn parse(body: &str) -> Option<Self> {
        let text = body.to_lowercase();
        if text.contains("stop") {
            return Some(Self::Stop);
        }
        if text.contains("start") {
            return Some(Self::Start);
        }
        if text.contains("set cooldown") {
            let minutes = RE_DIGITS
                .find(&text)
                .and_then(|m| m.as_str().parse::<u32>().ok());
            return Some(minutes.map_or(Self::InvalidCooldown, Self::SetCooldown));
        }
        None
    }
}

/// What to do with a message
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Action {
    /// Sent by the bot itself
    IgnoreOwn,
    /// Music attachment whose link cannot be read; explain how to re-paste
    AttachmentNotice,
    /// Admin command
    Admin(AdminCommand),
    /// Bot is paused
    Paused,
    /// No track link in the message
    NoTrack,
    /// Track link found
    Track(TrackReference),
}

/// Fieldless mirror of [`Action`], reported by the poll loop
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActionKind {
    /// See [`Action::IgnoreOwn`]
    IgnoreOwn,
    /// See [`Action::AttachmentNotice`]
    AttachmentNotice,
    /// See [`Action::Admin`]
    Admin,
    /// See [`Action::Paused`]
    Paused,
    /// See [`Action::NoTrack`]
    NoTrack,
    /// See [`Action::Track`]
    Track,
}

impl ActionKind {
    /// Short label for logs
    #[must_use]
    pub const fn label(self) -> &'static str {
        match self {
            Self::IgnoreOwn => "own message",
            Self::AttachmentNotice => "music attachment",
            Self::Admin => "admin command",
            Self::Paused => "paused",
            Self::NoTrack => "no track",
            Self::Track => "track link",
        }
    }
}

impl Action {
    /// Kind of this action
    #[must_use]
    pub const fn kind(&self) -> ActionKind {
        match self {
            Self::IgnoreOwn => ActionKind::IgnoreOwn,
            Self::AttachmentNotice => ActionKind::AttachmentNotice,
            Self::Admin(_) => ActionKind::Admin,
            Self::Paused => ActionKind::Paused,
            Self::NoTrack => ActionKind::NoTrack,
            Self::Track(_) => ActionKind::Track,
        }
    }
}

/// Classify a message; the first matching rule wins.
#[must_use]
pub fn classify(
    message: &Message,
    config: &BotConfig,
    identities: &Identities,
    links: &LinkExtractor,
) -> Action {
    if identities.is_bot(&message.sender_id) {
        return Action::IgnoreOwn;
    }
    if message.kind == MessageKind::MusicAttachment {
        return Action::AttachmentNotice;
    }
    if identities.is_admin(message.display_name()) {
        if let Some(command) = AdminCommand::parse(&message.body) {
            return Action::Admin(command);
        }
    }
    if !config.active {
        return Action::Paused;
    }
    links
        .find(&message.body)
        .map_or(Action::NoTrack, Action::Track)
}
