use dotenvy::dotenv;
use regex::Regex;
use song_requester::bot::{BotConfig, Dispatcher, Identities, PollLoop};
use song_requester::chat::instagram::InstagramClient;
use song_requester::chat::ChatClient;
use song_requester::config::{PollTimings, Settings, LOGIN_BACKOFF_BASE_MS, LOGIN_MAX_ATTEMPTS};
use song_requester::links::LinkExtractor;
use song_requester::playback::spotify::SpotifyClient;
use song_requester::storage::{CooldownStore, SystemClock};
use song_requester::utils::retry_with_backoff;
use std::collections::HashMap;
use std::io::{self, Write};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::{prelude::*, EnvFilter};

/// Regex patterns for redacting sensitive data
struct RedactionPatterns {
    password: Regex,
    session_cookie: Regex,
    bearer: Regex,
    client_secret: Regex,
    oauth_token: Regex,
}

impl RedactionPatterns {
    /// Initialize all regex patterns
    ///
    /// # Errors
    ///
    /// Returns an error if any regex pattern is invalid
    fn new() -> Result<Self, regex::Error> {
        Ok(Self {
            password: Regex::new(r"(INSTAGRAM_PASSWORD=|enc_password=|#PWD_INSTAGRAM:0:\d+:)[^\s&]+")?,
            session_cookie: Regex::new(r"(sessionid[=:]\s*)[^\s;,]+")?,
            bearer: Regex::new(r"(Bearer\s+)[A-Za-z0-9._~+/=-]+")?,
            client_secret: Regex::new(r"(SPOTIFY_CLIENT_SECRET=)[^\s&]+")?,
            oauth_token: Regex::new(r#"("?(?:access|refresh)_token"?\s*[=:]\s*"?)[A-Za-z0-9._~+/=-]+"#)?,
        })
    }

    fn redact(&self, input: &str) -> String {
        let mut output = input.to_string();
        output = self
            .password
            .replace_all(&output, "$1[MASKED]")
            .to_string();
        output = self
            .session_cookie
            .replace_all(&output, "$1[MASKED]")
            .to_string();
        output = self.bearer.replace_all(&output, "$1[TOKEN]").to_string();
        output = self
            .client_secret
            .replace_all(&output, "$1[MASKED]")
            .to_string();
        output = self
            .oauth_token
            .replace_all(&output, "$1[TOKEN]")
            .to_string();
        output
    }
}

/// Log sink that masks secrets before they reach `inner`
struct RedactingWriter<W> {
    inner: W,
    patterns: Arc<RedactionPatterns>,
}

impl<W: Write> Write for RedactingWriter<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let masked = self.patterns.redact(&String::from_utf8_lossy(buf));
        self.inner.write_all(masked.as_bytes())?;
        // Masking changes the length; callers only need to know `buf` was consumed
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}

/// `MakeWriter` handing out redacting stderr writers, one per event
#[derive(Clone)]
struct RedactedStderr(Arc<RedactionPatterns>);

impl<'a> tracing_subscriber::fmt::MakeWriter<'a> for RedactedStderr {
    type Writer = RedactingWriter<io::StderrLock<'static>>;

    fn make_writer(&'a self) -> Self::Writer {
        RedactingWriter {
            inner: io::stderr().lock(),
            patterns: self.0.clone(),
        }
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Load .env file
    dotenv().ok();

    // Initialize redaction patterns early (before logging)
    let patterns = Arc::new(RedactionPatterns::new().map_err(|e| {
        eprintln!("Failed to compile regex patterns: {e}");
        e
    })?);

    init_logging(patterns);

    info!("Starting song requester...");

    let settings = init_settings();
    let store = init_store(&settings);
    let links = init_links(&settings);

    let instagram = Arc::new(InstagramClient::new(&settings));
    let bot_user_id = init_instagram(&instagram).await;

    let spotify = Arc::new(SpotifyClient::new(&settings));
    init_spotify(&spotify).await;

    let members = load_members(&instagram, &settings.group_thread_id).await;

    let chat: Arc<dyn ChatClient> = instagram;
    let dispatcher = Dispatcher::new(
        chat.clone(),
        spotify,
        store.clone(),
        settings.group_thread_id.clone(),
    )
    .with_like_accepted(settings.like_accepted_tracks);
    let identities = Identities {
        bot_user_id,
        admin_name: settings.admin_username.clone(),
    };
    let config = BotConfig::new(settings.default_cooldown());

    let mut poll = PollLoop::new(chat, store, dispatcher, links, identities, config)
        .with_timings(PollTimings::from_env())
        .with_members(members);

    let shutdown = CancellationToken::new();
    spawn_ctrlc_handler(shutdown.clone());

    info!(
        "Bot is running (admin: @{}, cooldown: {} min)",
        settings.admin_username, settings.default_cooldown_minutes
    );
    poll.run(shutdown).await;

    Ok(())
}

fn init_logging(patterns: Arc<RedactionPatterns>) {
    let make_writer = RedactedStderr(patterns);
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_writer(make_writer))
        .init();
}

fn init_settings() -> Settings {
    match Settings::new().and_then(|s| s.validate_for_bot().map(|()| s)) {
        Ok(s) => {
            info!("Configuration loaded successfully.");
            s
        }
        Err(e) => {
            error!("Failed to load configuration: {}", e);
            std::process::exit(1);
        }
    }
}

fn init_store(settings: &Settings) -> Arc<CooldownStore> {
    match CooldownStore::open(&settings.database_path, Arc::new(SystemClock)) {
        Ok(store) => Arc::new(store),
        Err(e) => {
            error!("Failed to open cooldown store: {}", e);
            std::process::exit(1);
        }
    }
}

fn init_links(settings: &Settings) -> LinkExtractor {
    match LinkExtractor::new(&settings.track_host) {
        Ok(links) => {
            info!("🔗 Watching for links to {}", links.host());
            links
        }
        Err(e) => {
            error!("Invalid TRACK_HOST {:?}: {}", settings.track_host, e);
            std::process::exit(1);
        }
    }
}

/// Log in, discarding the persisted session between failed attempts; returns the bot's user id
async fn init_instagram(instagram: &Arc<InstagramClient>) -> String {
    let ig = instagram.as_ref();
    let login = retry_with_backoff(
        "Instagram login",
        LOGIN_MAX_ATTEMPTS,
        Duration::from_millis(LOGIN_BACKOFF_BASE_MS),
        || async move {
            let result = ig.establish().await;
            if result.is_err() {
                ig.discard_session_file().await;
            }
            result
        },
    )
    .await;

    if let Err(e) = login {
        error!("Instagram login failed after {} attempts: {}", LOGIN_MAX_ATTEMPTS, e);
        std::process::exit(1);
    }
    match ig.user_id().await {
        Some(id) => {
            info!("📷 Logged in to Instagram as user {}", id);
            id
        }
        None => {
            error!("Instagram session has no user id");
            std::process::exit(1);
        }
    }
}

async fn init_spotify(spotify: &SpotifyClient) {
    if let Err(e) = spotify.authenticate().await {
        error!("Spotify authentication failed: {}", e);
        std::process::exit(1);
    }
}

async fn load_members(instagram: &InstagramClient, thread_id: &str) -> HashMap<String, String> {
    let members = retry_with_backoff(
        "Loading thread members",
        LOGIN_MAX_ATTEMPTS,
        Duration::from_millis(LOGIN_BACKOFF_BASE_MS),
        || instagram.list_thread_members(thread_id),
    )
    .await;
    match members {
        Ok(members) if !members.is_empty() => {
            info!("👥 Loaded {} thread members", members.len());
            members
        }
        Ok(_) => {
            warn!("Thread {} has no members listed, replies will use user ids", thread_id);
            HashMap::new()
        }
        Err(e) => {
            warn!("Failed to load thread members, replies will use user ids: {}", e);
            HashMap::new()
        }
    }
}

fn spawn_ctrlc_handler(shutdown: CancellationToken) {
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => info!("Ctrl-C received, shutting down..."),
            Err(e) => warn!("Failed to listen for Ctrl-C: {}", e),
        }
        shutdown.cancel();
    });
}
