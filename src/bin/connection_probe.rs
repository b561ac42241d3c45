//! Check each external dependency in turn and report every outcome:
//! plain HTTPS reachability, the Instagram session and the Spotify token plus
//! its playback devices. Exits non-zero if any check failed.

use anyhow::{anyhow, Context, Result};
use dotenvy::dotenv;
use song_requester::chat::instagram::InstagramClient;
use song_requester::config::Settings;
use song_requester::playback::spotify::SpotifyClient;
use song_requester::utils::create_http_client;
use tracing_subscriber::EnvFilter;

const REACHABILITY_URL: &str = "https://i.instagram.com";

/// Print the outcome of one check and remember whether it failed
fn report(failures: &mut Vec<&'static str>, step: &'static str, outcome: Result<String>) {
    match outcome {
        Ok(detail) => println!("✅ {step}: {detail}"),
        Err(e) => {
            println!("❌ {step}: {e:#}");
            failures.push(step);
        }
    }
}

async fn check_reachable() -> Result<String> {
    let response = create_http_client()
        .get(REACHABILITY_URL)
        .send()
        .await
        .with_context(|| format!("{REACHABILITY_URL} is unreachable"))?;
    Ok(format!("{REACHABILITY_URL} answered HTTP {}", response.status()))
}

async fn check_instagram(settings: &Settings) -> Result<String> {
    let instagram = InstagramClient::new(settings);
    instagram.establish().await.context("login failed")?;
    let user_id = instagram.user_id().await.unwrap_or_default();
    Ok(format!("session OK (user id {user_id})"))
}

async fn check_spotify(settings: &Settings) -> Result<String> {
    let spotify = SpotifyClient::new(settings);
    spotify.authenticate().await.context("token refresh failed")?;
    let devices = spotify.devices().await.context("device listing failed")?;
    if devices.is_empty() {
        return Ok("token OK, no devices online; start playback before running the bot".into());
    }
    let names: Vec<String> = devices
        .iter()
        .map(|d| {
            if d.is_active {
                format!("{} (active)", d.name)
            } else {
                d.name.clone()
            }
        })
        .collect();
    Ok(format!("token OK, devices: {}", names.join(", ")))
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    let settings = Settings::new().context("Failed to load configuration")?;
    let mut failures = Vec::new();

    report(&mut failures, "HTTPS", check_reachable().await);
    report(&mut failures, "Instagram", check_instagram(&settings).await);
    report(&mut failures, "Spotify", check_spotify(&settings).await);

    if failures.is_empty() {
        println!("All checks passed.");
        Ok(())
    } else {
        Err(anyhow!("failed checks: {}", failures.join(", ")))
    }
}
