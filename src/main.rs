//! News Select - daily news selection pipeline
//!
//! Scores ingested articles with an LLM, collects human verdicts, and refines
//! the scoring instructions from the disagreements.

use news_select::cli;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // INFO for this crate by default, use RUST_LOG to override
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("news_select=info")),
        )
        .init();

    cli::run().await
}
