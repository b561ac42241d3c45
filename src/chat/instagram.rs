//! Instagram Direct adapter over the private mobile HTTP API.
//!
//! The session (cookies plus device identifiers) is persisted to a JSON file so
//! restarts do not trigger a fresh login, which Instagram rate-limits heavily.

use super::{ChatClient, ChatError, Message, MessageKind};
use crate::config::Settings;
use crate::utils::{create_http_client, summarize_error_body};
use async_trait::async_trait;
use reqwest::{Client as HttpClient, RequestBuilder, Response, StatusCode};
use serde::{Deserialize, Deserializer, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tokio::sync::RwLock;
use tracing::{debug, info, warn};
use uuid::Uuid;

const API_BASE: &str = "https://i.instagram.com/api/v1";
const IG_APP_ID: &str = "567067343352427";
const USER_AGENT: &str = "Instagram 269.0.0.18.75 Android (26/8.0.0; 480dpi; 1080x1920; \
                          OnePlus; 6T Dev; devitron; qcom; en_US; 314665256)";

/// Persisted login state
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    /// Numeric id of the logged-in account
    pub user_id: String,
    /// `sessionid` cookie
    pub session_id: String,
    /// `csrftoken` cookie, when issued
    pub csrf_token: Option<String>,
    /// Device UUID sent with mutating requests
    pub uuid: String,
    /// Android device id used at login
    pub device_id: String,
}

/// Summary of a thread in the inbox
#[derive(Debug, Clone)]
pub struct ThreadSummary {
    /// Thread identifier (the value for `GROUP_THREAD_ID`)
    pub thread_id: String,
    /// Title, if the group has one
    pub title: Option<String>,
    /// Usernames of the other participants
    pub usernames: Vec<String>,
}

/// Chat client for Instagram Direct threads
pub struct InstagramClient {
    http: HttpClient,
    username: String,
    password: String,
    session_file: PathBuf,
    session: RwLock<Option<Session>>,
}

impl InstagramClient {
    /// Create a client; no request is made until [`Self::establish`]
    #[must_use]
    pub fn new(settings: &Settings) -> Self {
        Self {
            http: create_http_client(),
            username: settings.instagram_username.clone(),
            password: settings.instagram_password.clone(),
            session_file: PathBuf::from(&settings.instagram_session_file),
            session: RwLock::new(None),
        }
    }

    /// Id of the logged-in account, once a session exists
    pub async fn user_id(&self) -> Option<String> {
        self.session.read().await.as_ref().map(|s| s.user_id.clone())
    }

    /// Restore the persisted session if it is still valid, otherwise log in.
    ///
    /// # Errors
    ///
    /// Returns `ChatError::Auth` if the credentials are rejected, or a transport error.
    pub async fn establish(&self) -> Result<(), ChatError> {
        if let Some(saved) = load_session(&self.session_file).await {
            *self.session.write().await = Some(saved);
            match self.verify().await {
                Ok(()) => {
                    info!("🔑 Restored Instagram session from {}", self.session_file.display());
                    return Ok(());
                }
                Err(e) => warn!("Saved Instagram session rejected ({}), logging in again", e),
            }
        }
        self.login().await
    }

    /// Delete the persisted session so the next attempt starts from a clean login.
    pub async fn discard_session_file(&self) {
        *self.session.write().await = None;
        match tokio::fs::remove_file(&self.session_file).await {
            Ok(()) => debug!("Removed session file {}", self.session_file.display()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => warn!("Could not remove {}: {}", self.session_file.display(), e),
        }
    }

    /// Most recent threads of the inbox
    ///
    /// # Errors
    ///
    /// Returns a `ChatError` if the inbox cannot be fetched or decoded.
    pub async fn list_threads(&self, amount: usize) -> Result<Vec<ThreadSummary>, ChatError> {
        let url = format!("{API_BASE}/direct_v2/inbox/?limit={amount}");
        let request = self.authorized(self.http.get(url)).await?;
        let inbox: InboxEnvelope = decode(execute(request).await?).await?;
        Ok(inbox
            .inbox
            .threads
            .into_iter()
            .take(amount)
            .map(|thread| ThreadSummary {
                thread_id: thread.thread_id,
                title: thread.thread_title.filter(|t| !t.is_empty()),
                usernames: thread.users.into_iter().map(|u| u.username).collect(),
            })
            .collect())
    }

    async fn verify(&self) -> Result<(), ChatError> {
        let url = format!("{API_BASE}/accounts/current_user/?edit=true");
        let request = self.authorized(self.http.get(url)).await?;
        execute(request).await.map(|_| ())
    }

    async fn login(&self) -> Result<(), ChatError> {
        let uuid = Uuid::new_v4().to_string();
        let device_id = format!("android-{}", &Uuid::new_v4().simple().to_string()[..16]);
        let timestamp = chrono::Utc::now().timestamp();
        let payload = serde_json::json!({
            "username": self.username,
            "enc_password": format!("#PWD_INSTAGRAM:0:{timestamp}:{}", self.password),
            "guid": uuid,
            "phone_id": Uuid::new_v4().to_string(),
            "device_id": device_id,
            "login_attempt_count": "0",
        });
        let form = [("signed_body", format!("SIGNATURE.{payload}"))];

        let response = self
            .http
            .post(format!("{API_BASE}/accounts/login/"))
            .header("User-Agent", USER_AGENT)
            .header("X-IG-App-ID", IG_APP_ID)
            .form(&form)
            .send()
            .await
            .map_err(|e| ChatError::Network(e.to_string()))?;

        if response.status() == StatusCode::BAD_REQUEST {
            let body = response.text().await.unwrap_or_default();
            return Err(ChatError::Auth(summarize_error_body(&body)));
        }
        let response = check_status(response).await?;

        let mut session_id = None;
        let mut csrf_token = None;
        for cookie in response.cookies() {
            match cookie.name() {
                "sessionid" => session_id = Some(cookie.value().to_string()),
                "csrftoken" => csrf_token = Some(cookie.value().to_string()),
                _ => {}
            }
        }
        let body: LoginResponse = decode(response).await?;
        let session_id = session_id
            .ok_or_else(|| ChatError::Auth("login response carried no session cookie".into()))?;

        let session = Session {
            user_id: body.logged_in_user.pk,
            session_id,
            csrf_token,
            uuid,
            device_id,
        };
        save_session(&self.session_file, &session).await;
        info!("🔑 Logged in to Instagram as {} ({})", self.username, session.user_id);
        *self.session.write().await = Some(session);
        Ok(())
    }

    async fn authorized(&self, request: RequestBuilder) -> Result<RequestBuilder, ChatError> {
        let guard = self.session.read().await;
        let session = guard
            .as_ref()
            .ok_or_else(|| ChatError::Auth("no active session".into()))?;

        let mut cookie = format!(
            "sessionid={}; ds_user_id={}",
            session.session_id, session.user_id
        );
        let mut request = request
            .header("User-Agent", USER_AGENT)
            .header("X-IG-App-ID", IG_APP_ID);
        if let Some(csrf) = &session.csrf_token {
            cookie.push_str(&format!("; csrftoken={csrf}"));
            request = request.header("X-CSRFToken", csrf);
        }
        Ok(request.header("Cookie", cookie))
    }

    async fn device_uuid(&self) -> String {
        self.session
            .read()
            .await
            .as_ref()
            .map(|s| s.uuid.clone())
            .unwrap_or_default()
    }

    async fn fetch_thread(&self, thread_id: &str, limit: usize) -> Result<Thread, ChatError> {
        let url = format!("{API_BASE}/direct_v2/threads/{thread_id}/?limit={limit}");
        let request = self.authorized(self.http.get(url)).await?;
        let envelope: ThreadEnvelope = decode(execute(request).await?).await?;
        Ok(envelope.thread)
    }

    async fn broadcast(&self, endpoint: &str, form: &[(&str, String)]) -> Result<(), ChatError> {
        let url = format!("{API_BASE}/direct_v2/threads/broadcast/{endpoint}/");
        let request = self.authorized(self.http.post(url)).await?.form(form);
        execute(request).await.map(|_| ())
    }
}

#[async_trait]
impl ChatClient for InstagramClient {
    async fn fetch_latest(&self, thread_id: &str) -> Result<Option<Message>, ChatError> {
        let thread = self.fetch_thread(thread_id, 1).await?;
        let names: HashMap<String, String> = thread
            .users
            .into_iter()
            .map(|u| (u.pk, u.username))
            .collect();
        Ok(thread.items.into_iter().next().map(|item| {
            let sender_display_name = names.get(&item.user_id).cloned();
            item.into_message(sender_display_name)
        }))
    }

    async fn send(&self, thread_id: &str, text: &str) -> Result<(), ChatError> {
        let form = [
            ("text", text.to_string()),
            ("thread_ids", format!("[{thread_id}]")),
            ("action", "send_item".to_string()),
            ("client_context", Uuid::new_v4().to_string()),
            ("_uuid", self.device_uuid().await),
        ];
        self.broadcast("text", &form).await
    }

    async fn like(&self, thread_id: &str, message_id: &str) -> Result<(), ChatError> {
        let form = [
            ("thread_ids", format!("[{thread_id}]")),
            ("item_id", message_id.to_string()),
            ("reaction_type", "like".to_string()),
            ("reaction_status", "created".to_string()),
            ("node_type", "item".to_string()),
            ("client_context", Uuid::new_v4().to_string()),
            ("_uuid", self.device_uuid().await),
        ];
        self.broadcast("reaction", &form).await
    }

    async fn list_thread_members(
        &self,
        thread_id: &str,
    ) -> Result<HashMap<String, String>, ChatError> {
        let thread = self.fetch_thread(thread_id, 1).await?;
        Ok(thread
            .users
            .into_iter()
            .map(|u| (u.pk, u.username))
            .collect())
    }

    async fn reestablish_session(&self) -> Result<(), ChatError> {
        info!("🔄 Re-establishing Instagram session...");
        *self.session.write().await = None;
        self.login().await
    }
}

async fn execute(request: RequestBuilder) -> Result<Response, ChatError> {
    let response = request
        .send()
        .await
        .map_err(|e| ChatError::Network(e.to_string()))?;
    check_status(response).await
}

async fn check_status(response: Response) -> Result<Response, ChatError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    if status.is_server_error() {
        return Err(ChatError::Server {
            status: status.as_u16(),
        });
    }
    let body = response.text().await.unwrap_or_default();
    Err(classify_rejection(status, &body))
}

fn classify_rejection(status: StatusCode, body: &str) -> ChatError {
    let auth_markers = ["login_required", "checkpoint_required", "challenge_required"];
    if matches!(status, StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN)
        || auth_markers.iter().any(|m| body.contains(m))
    {
        return ChatError::Auth(format!("{status}: {}", summarize_error_body(body)));
    }
    ChatError::Api(format!("{status}: {}", summarize_error_body(body)))
}

async fn decode<T: for<'de> Deserialize<'de>>(response: Response) -> Result<T, ChatError> {
    response
        .json()
        .await
        .map_err(|e| ChatError::Api(format!("unexpected response: {e}")))
}

async fn load_session(path: &Path) -> Option<Session> {
    let raw = tokio::fs::read_to_string(path).await.ok()?;
    match serde_json::from_str(&raw) {
        Ok(session) => Some(session),
        Err(e) => {
            warn!("Ignoring unreadable session file {}: {}", path.display(), e);
            None
        }
    }
}

async fn save_session(path: &Path, session: &Session) {
    let result = match serde_json::to_string_pretty(session) {
        Ok(json) => tokio::fs::write(path, json).await.map_err(|e| e.to_string()),
        Err(e) => Err(e.to_string()),
    };
    if let Err(e) = result {
        warn!("Could not persist session to {}: {}", path.display(), e);
    }
}

/// Accept ids encoded either as JSON strings or numbers
fn id_string<'de, D: Deserializer<'de>>(deserializer: D) -> Result<String, D::Error> {
    match serde_json::Value::deserialize(deserializer)? {
        serde_json::Value::String(s) => Ok(s),
        serde_json::Value::Number(n) => Ok(n.to_string()),
        other => Err(serde::de::Error::custom(format!("invalid id: {other}"))),
    }
}

#[derive(Deserialize)]
struct LoginResponse {
    logged_in_user: LoggedInUser,
}

#[derive(Deserialize)]
struct LoggedInUser {
    #[serde(deserialize_with = "id_string")]
    pk: String,
}

#[derive(Deserialize)]
struct InboxEnvelope {
    inbox: Inbox,
}

#[derive(Deserialize)]
struct Inbox {
    #[serde(default)]
    threads: Vec<Thread>,
}

#[derive(Deserialize)]
struct ThreadEnvelope {
    thread: Thread,
}

#[derive(Deserialize)]
struct Thread {
    #[serde(default)]
    thread_id: String,
    #[serde(default)]
    thread_title: Option<String>,
    #[serde(default)]
    items: Vec<Item>,
    #[serde(default)]
    users: Vec<User>,
}

#[derive(Deserialize)]
struct User {
    #[serde(deserialize_with = "id_string")]
    pk: String,
    username: String,
}

#[derive(Deserialize)]
struct Item {
    item_id: String,
    #[serde(deserialize_with = "id_string")]
    user_id: String,
    #[serde(default)]
    item_type: String,
    #[serde(default)]
    text: Option<String>,
    #[serde(default)]
    link: Option<LinkItem>,
}

#[derive(Deserialize)]
struct LinkItem {
    #[serde(default)]
    text: Option<String>,
}

impl Item {
    fn into_message(self, sender_display_name: Option<String>) -> Message {
        let kind = match self.item_type.as_str() {
            "text" | "link" => MessageKind::Text,
            "music" => MessageKind::MusicAttachment,
            _ => MessageKind::Other,
        };
        let body = self
            .text
            .or_else(|| self.link.and_then(|l| l.text))
            .unwrap_or_default();
        Message {
            id: self.item_id,
            sender_id: self.user_id,
            sender_display_name,
            body,
            kind,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_thread_items_decode_into_messages() -> Result<(), serde_json::Error> {
        let raw = r#"{
            "thread": {
                "thread_id": "340282366841710300949128",
                "items": [
                    {"item_id": "3101", "user_id": 17841400, "item_type": "link",
                     "link": {"text": "https://open.spotify.com/track/abc"}},
                    {"item_id": "3100", "user_id": "17841401", "item_type": "text", "text": "hi"}
                ],
                "users": [{"pk": 17841400, "username": "alice"}]
            }
        }"#;
        let envelope: ThreadEnvelope = serde_json::from_str(raw)?;
        let thread = envelope.thread;
        let names: HashMap<String, String> =
            thread.users.into_iter().map(|u| (u.pk, u.username)).collect();
        let mut items = thread.items.into_iter();

        let first = items.next().map(|i| {
            let name = names.get(&i.user_id).cloned();
            i.into_message(name)
        });
        assert_eq!(
            first,
            Some(Message {
                id: "3101".to_string(),
                sender_id: "17841400".to_string(),
                sender_display_name: Some("alice".to_string()),
                body: "https://open.spotify.com/track/abc".to_string(),
                kind: MessageKind::Text,
            })
        );
        Ok(())
    }

    #[test]
    fn test_music_item_kind() -> Result<(), serde_json::Error> {
        let item: Item =
            serde_json::from_str(r#"{"item_id": "1", "user_id": 5, "item_type": "music"}"#)?;
        let message = item.into_message(None);
        assert_eq!(message.kind, MessageKind::MusicAttachment);
        assert!(message.body.is_empty());
        Ok(())
    }

    #[test]
    fn test_classify_rejection() {
        assert!(matches!(
            classify_rejection(StatusCode::BAD_REQUEST, r#"{"message":"login_required"}"#),
            ChatError::Auth(_)
        ));
        assert!(matches!(
            classify_rejection(StatusCode::FORBIDDEN, ""),
            ChatError::Auth(_)
        ));
        assert!(matches!(
            classify_rejection(StatusCode::TOO_MANY_REQUESTS, "Please wait a few minutes"),
            ChatError::Api(_)
        ));
    }
}
