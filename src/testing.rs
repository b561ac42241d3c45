//! Testing helpers and mock utilities.
//!
//! Provides convenient constructors for mocked chat/queue clients, sample
//! settings and chat messages.

use crate::chat::{Message, MessageKind, MockChatClient};
use crate::config::Settings;
use crate::playback::MockQueueClient;
use crate::storage::{Clock, CooldownStore};
use rusqlite::Connection;
use std::sync::{Arc, Mutex};
use tempfile::TempDir;

/// Thread id used across tests.
pub const THREAD: &str = "340282366841710300949128";
/// User id of the bot account.
pub const BOT_ID: &str = "9000";
/// Username of the administrator.
pub const ADMIN: &str = "dj_admin";

/// Settings with every field populated with harmless values.
#[must_use]
pub fn sample_settings() -> Settings {
    Settings {
        instagram_username: "bot".to_string(),
        instagram_password: "secret".to_string(),
        instagram_session_file: "session.json".to_string(),
        spotify_client_id: "abc".to_string(),
        spotify_client_secret: "client-secret".to_string(),
        spotify_redirect_uri: "http://127.0.0.1:8888/callback".to_string(),
        spotify_refresh_token: Some("refresh".to_string()),
        group_thread_id: THREAD.to_string(),
        admin_username: ADMIN.to_string(),
        default_cooldown_minutes: 20,
        database_path: "cooldown.sqlite3".to_string(),
        track_host: "open.spotify.com".to_string(),
        like_accepted_tracks: false,
    }
}

/// Text message from `sender`, whose user id is `id-{sender}`.
#[must_use]
pub fn text_message(id: &str, sender: &str, body: &str) -> Message {
    Message {
        id: id.to_string(),
        sender_id: format!("id-{sender}"),
        sender_display_name: Some(sender.to_string()),
        body: body.to_string(),
        kind: MessageKind::Text,
    }
}

/// Chat mock that accepts any reply or like and records the sent texts.
///
/// `fetch_latest`, `list_thread_members` and `reestablish_session` are left
/// without expectations so each test declares exactly what it polls.
#[must_use]
pub fn mock_chat_recording() -> (MockChatClient, Arc<Mutex<Vec<String>>>) {
    let sent = Arc::new(Mutex::new(Vec::new()));
    let mut mock = MockChatClient::new();

    let sink = sent.clone();
    mock.expect_send().returning(move |_, text| {
        if let Ok(mut sent) = sink.lock() {
            sent.push(text.to_string());
        }
        Ok(())
    });

    mock.expect_like().returning(|_, _| Ok(()));

    (mock, sent)
}

/// Queue mock that must never be called.
#[must_use]
pub fn mock_queue_unused() -> MockQueueClient {
    let mut mock = MockQueueClient::new();
    mock.expect_enqueue().never();
    mock
}

/// Snapshot of the recorded replies.
#[must_use]
pub fn replies(sent: &Arc<Mutex<Vec<String>>>) -> Vec<String> {
    sent.lock().map(|s| s.clone()).unwrap_or_default()
}

/// File-backed store plus a second raw connection to the same database, used to
/// plant broken rows or triggers. Keep the `TempDir` alive for the whole test.
#[must_use]
pub fn tamperable_store(clock: Arc<dyn Clock>) -> (TempDir, Arc<CooldownStore>, Connection) {
    let dir = TempDir::new().expect("temp dir");
    let path = dir.path().join("cooldown.sqlite3");
    let store = CooldownStore::open(&path, clock).expect("file store");
    let raw = Connection::open(&path).expect("raw connection");
    (dir, Arc::new(store), raw)
}
