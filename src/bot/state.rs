use std::time::Duration;

/// Runtime bot configuration, changed only by admin commands.
///
/// Lives in memory only: a restart resets it to the configured defaults.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BotConfig {
    /// Whether track links are currently processed
    pub active: bool,
    /// Minimum time between two accepted tracks of the same user
    pub cooldown_window: Duration,
}

impl BotConfig {
    /// Active bot with the given cooldown window
    #[must_use]
    pub const fn new(cooldown_window: Duration) -> Self {
        Self {
            active: true,
            cooldown_window,
        }
    }

    /// Cooldown window in whole minutes
    #[must_use]
    pub const fn cooldown_minutes(&self) -> u64 {
        self.cooldown_window.as_secs() / 60
    }
}

/// Accounts with special meaning to the interpreter
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Identities {
    /// User id of the account the bot posts as
    pub bot_user_id: String,
    /// Username allowed to run admin commands
    pub admin_name: String,
}

impl Identities {
    /// Whether `sender_id` is the bot itself
    #[must_use]
    pub fn is_bot(&self, sender_id: &str) -> bool {
        sender_id == self.bot_user_id
    }

    /// Whether `display_name` belongs to the administrator
    #[must_use]
    pub fn is_admin(&self, display_name: &str) -> bool {
        !self.admin_name.is_empty() && display_name == self.admin_name
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_starts_active() {
        let config = BotConfig::new(Duration::from_secs(20 * 60));
        assert!(config.active);
        assert_eq!(config.cooldown_minutes(), 20);
    }

    #[test]
    fn test_identities() {
        let ids = Identities {
            bot_user_id: "9000".to_string(),
            admin_name: "dj_admin".to_string(),
        };
        assert!(ids.is_bot("9000"));
        assert!(!ids.is_bot("9001"));
        assert!(ids.is_admin("dj_admin"));
        assert!(!ids.is_admin("DJ_ADMIN_2"));

        let nobody = Identities {
            bot_user_id: "9000".to_string(),
            admin_name: String::new(),
        };
        assert!(!nobody.is_admin(""));
    }
}
