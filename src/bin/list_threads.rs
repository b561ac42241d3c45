//! Print the most recent Instagram Direct threads so the group id can be copied
//! into `GROUP_THREAD_ID`.
//!
//! Usage: `list_threads [amount]` (default 10).

use anyhow::{Context, Result};
use dotenvy::dotenv;
use song_requester::chat::instagram::InstagramClient;
use song_requester::config::Settings;
use tracing_subscriber::EnvFilter;

const DEFAULT_AMOUNT: usize = 10;

#[tokio::main]
async fn main() -> Result<()> {
    dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .with_writer(std::io::stderr)
        .init();

    let amount = match std::env::args().nth(1) {
        Some(raw) => raw
            .parse()
            .with_context(|| format!("amount must be a number, got {raw:?}"))?,
        None => DEFAULT_AMOUNT,
    };

    let settings = Settings::new().context("Failed to load configuration")?;
    let instagram = InstagramClient::new(&settings);
    instagram
        .establish()
        .await
        .context("Instagram login failed")?;

    let threads = instagram
        .list_threads(amount)
        .await
        .context("Failed to fetch the inbox")?;
    if threads.is_empty() {
        println!("No threads found.");
        return Ok(());
    }
    for thread in threads {
        let title = thread.title.as_deref().unwrap_or("(no title)");
        println!("{}  {}  [{}]", thread.thread_id, title, thread.usernames.join(", "));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lists_ten_threads_by_default() {
        assert_eq!(DEFAULT_AMOUNT, 10);
    }
}
