use std::env;

use anyhow::Context;
use statement_vote::{Config, Store, init_tracing};

/// Loads one statement per line; blank lines and `#` comments are skipped.
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv::dotenv().ok();
    init_tracing();

    let config = Config::from_env()?;
    if config.database_url.is_none() {
        anyhow::bail!("DATABASE_URL must be set, the in-memory store does not outlive this process");
    }
    let store = Store::from_config(&config).await?;
    tracing::info!("Connected to database!");

    let path = env::args().nth(1).unwrap_or_else(|| "statements.txt".to_string());
    let content = std::fs::read_to_string(&path)
        .with_context(|| format!("Failed to read {path} - make sure it exists!"))?;

    let mut count = 0;
    let mut skipped = 0;

    for line in content.lines() {
        let text = line.trim();
        if text.is_empty() || text.starts_with('#') {
            continue;
        }

        if store.statement_exists_with_text(text).await? {
            tracing::info!("Skipped (duplicate): {}", text);
            skipped += 1;
            continue;
        }

        store.create_statement(None, text).await?;
        count += 1;
    }

    tracing::info!(loaded = count, skipped, "finished loading statements from {}", path);
    Ok(())
}
