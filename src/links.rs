//! Track link extraction from free-form chat text.
//!
//! Two passes are available: [`LinkExtractor::extract`] only accepts absolute
//! `http(s)://` URLs, while [`LinkExtractor::reconstruct`] recovers links pasted
//! without a scheme (a common result of copying from a music attachment preview).
//! [`LinkExtractor::find`] chains them so a valid absolute link always wins.

use regex::Regex;

/// Host used when none is configured.
pub const DEFAULT_TRACK_HOST: &str = "open.spotify.com";

/// A validly formed reference to a single track
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TrackReference {
    /// Identifier taken from the path segment after `track/`
    pub track_id: String,
}

impl TrackReference {
    /// Create a reference from a bare track identifier
    #[must_use]
    pub fn new(track_id: impl Into<String>) -> Self {
        Self {
            track_id: track_id.into(),
        }
    }

    /// Playback URI understood by the queue API, e.g. `spotify:track:abc123`
    #[must_use]
    pub fn uri(&self) -> String {
        format!("spotify:track:{}", self.track_id)
    }
}

/// Finds track references pointing at one configured host
#[derive(Debug, Clone)]
pub struct LinkExtractor {
    host: String,
    absolute: Regex,
    bare: Regex,
}

impl LinkExtractor {
    /// Build an extractor for `host` (for example `open.spotify.com`).
    ///
    /// # Errors
    ///
    /// Returns an error if the resulting pattern cannot be compiled.
    pub fn new(host: &str) -> Result<Self, regex::Error> {
        let host = host.trim().trim_end_matches('/').to_lowercase();
        let escaped = regex::escape(&host);
        Ok(Self {
            absolute: Regex::new(&format!(r"(?i:https?://{escaped})/track/([^\s?#/]+)"))?,
            // Host must not be the tail of a longer name such as `notopen.example.com`
            bare: Regex::new(&format!(r"(?:^|[^\w.-])((?i:{escaped})/track/\S+)"))?,
            host,
        })
    }

    /// Host this extractor matches
    #[must_use]
    pub fn host(&self) -> &str {
        &self.host
    }

    /// Canonical `https://` link for a reference
    #[must_use]
    pub fn url(&self, reference: &TrackReference) -> String {
        format!("https://{}/track/{}", self.host, reference.track_id)
    }

    /// Extract the track identifier from a well-formed absolute URL.
    ///
    /// # Examples
    ///
    /// ```
    /// use song_requester::links::LinkExtractor;
    ///
    /// let extractor = LinkExtractor::new("open.example.com").expect("valid host");
    /// let found = extractor.extract("check out https://open.example.com/track/abc123?si=xyz");
    /// assert_eq!(found.map(|r| r.track_id).as_deref(), Some("abc123"));
    /// ```
    #[must_use]
    pub fn extract(&self, text: &str) -> Option<TrackReference> {
        self.absolute
            .captures(text)
            .and_then(|caps| caps.get(1))
            .map(|m| TrackReference::new(m.as_str()))
    }

    /// Recover a link pasted without its scheme.
    ///
    /// Finds each `host/track/...`, prefixes `https://` and runs [`Self::extract`] on
    /// the result; the first one yielding an identifier wins.
    #[must_use]
    pub fn reconstruct(&self, text: &str) -> Option<TrackReference> {
        self.bare
            .captures_iter(text)
            .filter_map(|caps| caps.get(1))
            .find_map(|bare| self.extract(&format!("https://{}", bare.as_str())))
    }

    /// Whether the text mentions the track host at all (case-insensitive)
    #[must_use]
    pub fn mentions_host(&self, text: &str) -> bool {
        text.to_lowercase().contains(&self.host)
    }

    /// Extract first, falling back to reconstruction only when the host is mentioned.
    #[must_use]
    pub fn find(&self, text: &str) -> Option<TrackReference> {
        if let Some(found) = self.extract(text) {
            return Some(found);
        }
        if !self.mentions_host(text) {
            return None;
        }
        let recovered = self.reconstruct(text)?;
        tracing::debug!("🔧 Reconstructed link: {}", self.url(&recovered));
        Some(recovered)
    }
}
