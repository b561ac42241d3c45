//! One-time Spotify authorization.
//!
//! Without arguments, prints the URL to open in a browser. After granting
//! access, run it again with the `code` from the redirect (or the whole
//! redirect URL) to print the refresh token for `SPOTIFY_REFRESH_TOKEN`.

use anyhow::{anyhow, Context, Result};
use dotenvy::dotenv;
use reqwest::Url;
use song_requester::config::Settings;
use song_requester::playback::spotify::SpotifyClient;

#[tokio::main]
async fn main() -> Result<()> {
    dotenv().ok();
    tracing_subscriber::fmt().with_writer(std::io::stderr).init();

    let settings = Settings::new().context("Failed to load configuration")?;
    let spotify = SpotifyClient::new(&settings);

    let Some(arg) = std::env::args().nth(1) else {
        println!("Open this URL, approve access, then rerun with the redirect URL or code:");
        println!("{}", spotify.authorize_url());
        return Ok(());
    };

    let code = authorization_code(&arg)?;
    let grant = spotify
        .exchange_code(&code)
        .await
        .context("Code exchange failed")?;
    let refresh = grant
        .refresh_token
        .ok_or_else(|| anyhow!("Spotify did not return a refresh token"))?;
    println!("SPOTIFY_REFRESH_TOKEN={refresh}");
    Ok(())
}

/// Accept either a bare code or the full redirect URL carrying `?code=`
fn authorization_code(arg: &str) -> Result<String> {
    let Ok(url) = Url::parse(arg) else {
        return Ok(arg.trim().to_string());
    };
    if let Some((_, error)) = url.query_pairs().find(|(k, _)| k == "error") {
        return Err(anyhow!("Authorization denied: {error}"));
    }
    url.query_pairs()
        .find(|(k, _)| k == "code")
        .map(|(_, v)| v.into_owned())
        .ok_or_else(|| anyhow!("No code parameter in {arg}"))
}
