//! Spotify Web API adapter.
//!
//! Authenticates with a long-lived refresh token (obtained once through the
//! `spotify_authorize` utility) and caches the short-lived access token until
//! shortly before it expires.

use super::{QueueClient, QueueError};
use crate::config::Settings;
use crate::links::TrackReference;
use crate::utils::{create_http_client, summarize_error_body};
use async_trait::async_trait;
use reqwest::{Client as HttpClient, StatusCode};
use serde::Deserialize;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::{debug, info, warn};

const ACCOUNTS_BASE: &str = "https://accounts.spotify.com";
const API_BASE: &str = "https://api.spotify.com/v1";
/// Scopes needed to read and modify the playback queue.
pub const SCOPES: &str = "user-modify-playback-state user-read-playback-state";
/// Refresh this long before the reported expiry.
const EXPIRY_MARGIN: Duration = Duration::from_secs(60);

/// Errors from the OAuth token endpoint
#[derive(Debug, Error)]
pub enum AuthError {
    /// No refresh token configured
    #[error("SPOTIFY_REFRESH_TOKEN is not set; run spotify_authorize first")]
    MissingRefreshToken,
    /// Network failure talking to the accounts service
    #[error("Spotify accounts network error: {0}")]
    Network(String),
    /// Token request rejected
    #[error("Spotify token request rejected: {0}")]
    Rejected(String),
}

/// Tokens returned by the authorization-code exchange
#[derive(Debug, Clone, Deserialize)]
pub struct TokenGrant {
    /// Short-lived bearer token
    pub access_token: String,
    /// Lifetime of the access token in seconds
    pub expires_in: u64,
    /// Long-lived refresh token (only on code exchange or rotation)
    #[serde(default)]
    pub refresh_token: Option<String>,
}

/// A playback device visible to the account
#[derive(Debug, Clone, Deserialize)]
pub struct Device {
    /// Device name as shown in the Spotify apps
    pub name: String,
    /// Whether this device is currently playing
    #[serde(default)]
    pub is_active: bool,
}

#[derive(Deserialize)]
struct DevicesResponse {
    #[serde(default)]
    devices: Vec<Device>,
}

#[derive(Deserialize)]
struct ErrorEnvelope {
    error: ErrorBody,
}

#[derive(Deserialize)]
struct ErrorBody {
    #[serde(default)]
    message: String,
    #[serde(default)]
    reason: Option<String>,
}

struct CachedToken {
    access_token: String,
    refresh_at: Instant,
}

/// Queue client backed by the Spotify Web API
pub struct SpotifyClient {
    http: HttpClient,
    client_id: String,
    client_secret: String,
    redirect_uri: String,
    refresh_token: Mutex<Option<String>>,
    token: Mutex<Option<CachedToken>>,
}

impl SpotifyClient {
    /// Create a client from settings; no request is made until a token is needed
    #[must_use]
    pub fn new(settings: &Settings) -> Self {
        Self {
            http: create_http_client(),
            client_id: settings.spotify_client_id.clone(),
            client_secret: settings.spotify_client_secret.clone(),
            redirect_uri: settings.spotify_redirect_uri.clone(),
            refresh_token: Mutex::new(settings.spotify_refresh_token.clone()),
            token: Mutex::new(None),
        }
    }

    /// URL the account owner opens to grant queue access
    #[must_use]
    pub fn authorize_url(&self) -> String {
        let mut url = match reqwest::Url::parse(&format!("{ACCOUNTS_BASE}/authorize")) {
            Ok(url) => url,
            Err(_) => return String::new(),
        };
        url.query_pairs_mut()
            .append_pair("client_id", &self.client_id)
            .append_pair("response_type", "code")
            .append_pair("redirect_uri", &self.redirect_uri)
            .append_pair("scope", SCOPES);
        url.to_string()
    }

    /// Exchange an authorization code for tokens.
    ///
    /// # Errors
    ///
    /// Returns `AuthError` if the accounts service rejects the code.
    pub async fn exchange_code(&self, code: &str) -> Result<TokenGrant, AuthError> {
        let form = [
            ("grant_type", "authorization_code"),
            ("code", code),
            ("redirect_uri", self.redirect_uri.as_str()),
        ];
        self.token_request(&form).await
    }

    /// Obtain a fresh access token now, verifying the configured credentials.
    ///
    /// # Errors
    ///
    /// Returns `AuthError` if no refresh token is configured or it is rejected.
    pub async fn authenticate(&self) -> Result<(), AuthError> {
        self.access_token().await.map(|_| ())
    }

    /// Playback devices currently known to the account.
    ///
    /// # Errors
    ///
    /// Returns `QueueError::Other` on any failure.
    pub async fn devices(&self) -> Result<Vec<Device>, QueueError> {
        let token = self
            .access_token()
            .await
            .map_err(|e| QueueError::Other(e.to_string()))?;
        let response = self
            .http
            .get(format!("{API_BASE}/me/player/devices"))
            .bearer_auth(token)
            .send()
            .await
            .map_err(|e| QueueError::Other(e.to_string()))?;
        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(QueueError::Other(format!(
                "{status}: {}",
                summarize_error_body(&body)
            )));
        }
        let parsed: DevicesResponse = response
            .json()
            .await
            .map_err(|e| QueueError::Other(e.to_string()))?;
        Ok(parsed.devices)
    }

    async fn access_token(&self) -> Result<String, AuthError> {
        let mut cached = self.token.lock().await;
        if let Some(token) = cached.as_ref() {
            if Instant::now() < token.refresh_at {
                return Ok(token.access_token.clone());
            }
        }

        let refresh_token = self
            .refresh_token
            .lock()
            .await
            .clone()
            .ok_or(AuthError::MissingRefreshToken)?;
        let form = [
            ("grant_type", "refresh_token"),
            ("refresh_token", refresh_token.as_str()),
        ];
        let grant = self.token_request(&form).await?;
        if let Some(rotated) = grant.refresh_token {
            debug!("Spotify rotated the refresh token");
            *self.refresh_token.lock().await = Some(rotated);
        }

        let lifetime = Duration::from_secs(grant.expires_in).saturating_sub(EXPIRY_MARGIN);
        *cached = Some(CachedToken {
            access_token: grant.access_token.clone(),
            refresh_at: Instant::now() + lifetime,
        });
        info!("🎧 Spotify access token refreshed");
        Ok(grant.access_token)
    }

    async fn token_request(&self, form: &[(&str, &str)]) -> Result<TokenGrant, AuthError> {
        let response = self
            .http
            .post(format!("{ACCOUNTS_BASE}/api/token"))
            .basic_auth(&self.client_id, Some(&self.client_secret))
            .form(form)
            .send()
            .await
            .map_err(|e| AuthError::Network(e.to_string()))?;
        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(AuthError::Rejected(format!(
                "{status}: {}",
                summarize_error_body(&body)
            )));
        }
        response
            .json()
            .await
            .map_err(|e| AuthError::Rejected(format!("unexpected token response: {e}")))
    }

    async fn invalidate_token(&self) {
        *self.token.lock().await = None;
    }
}

#[async_trait]
impl QueueClient for SpotifyClient {
    async fn enqueue(&self, track: &TrackReference) -> Result<(), QueueError> {
        let token = self
            .access_token()
            .await
            .map_err(|e| QueueError::Other(e.to_string()))?;
        let response = self
            .http
            .post(format!("{API_BASE}/me/player/queue"))
            .query(&[("uri", track.uri())])
            .bearer_auth(token)
            .header("Content-Length", "0")
            .send()
            .await
            .map_err(|e| QueueError::Other(e.to_string()))?;

        let status = response.status();
        if status.is_success() {
            return Ok(());
        }
        if status == StatusCode::UNAUTHORIZED {
            warn!("Spotify rejected the access token, dropping it");
            self.invalidate_token().await;
        }
        let body = response.text().await.unwrap_or_default();
        Err(classify_queue_error(status, &body))
    }
}

fn classify_queue_error(status: StatusCode, body: &str) -> QueueError {
    let parsed = serde_json::from_str::<ErrorEnvelope>(body).ok();
    let (message, reason) = parsed.map_or_else(
        || (summarize_error_body(body), None),
        |e| (e.error.message, e.error.reason),
    );
    let no_device = reason.as_deref() == Some("NO_ACTIVE_DEVICE")
        || message.contains("No active device found");
    if no_device {
        QueueError::DeviceUnavailable(message)
    } else {
        QueueError::Other(format!("{status}: {message}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_no_active_device_by_reason() {
        let body = r#"{"error":{"status":404,"message":"Player command failed: No active device found","reason":"NO_ACTIVE_DEVICE"}}"#;
        assert!(matches!(
            classify_queue_error(StatusCode::NOT_FOUND, body),
            QueueError::DeviceUnavailable(_)
        ));
    }

    #[test]
    fn test_no_active_device_by_message_only() {
        let body = r#"{"error":{"status":404,"message":"No active device found"}}"#;
        assert!(matches!(
            classify_queue_error(StatusCode::NOT_FOUND, body),
            QueueError::DeviceUnavailable(_)
        ));
    }

    #[test]
    fn test_other_errors() {
        let body = r#"{"error":{"status":403,"message":"Player command failed: Premium required","reason":"PREMIUM_REQUIRED"}}"#;
        assert!(matches!(
            classify_queue_error(StatusCode::FORBIDDEN, body),
            QueueError::Other(_)
        ));
        assert!(matches!(
            classify_queue_error(StatusCode::BAD_GATEWAY, "<html>oops</html>"),
            QueueError::Other(_)
        ));
    }

    #[test]
    fn test_authorize_url_carries_scopes() {
        let settings = crate::testing::sample_settings();
        let url = SpotifyClient::new(&settings).authorize_url();
        assert!(url.starts_with("https://accounts.spotify.com/authorize?"));
        assert!(url.contains("client_id=abc"));
        assert!(url.contains("scope=user-modify-playback-state+user-read-playback-state"));
        assert!(url.contains("redirect_uri=http%3A%2F%2F127.0.0.1%3A8888%2Fcallback"));
    }

    #[tokio::test]
    async fn test_missing_refresh_token() {
        let mut settings = crate::testing::sample_settings();
        settings.spotify_refresh_token = None;
        let client = SpotifyClient::new(&settings);
        assert!(matches!(
            client.authenticate().await,
            Err(AuthError::MissingRefreshToken)
        ));
    }
}
