//! Buglink - Feedback-Augmented Bug/Feature Linker
//!
//! Classifies bug reports against candidate feature requests, learning
//! from human corrections over time.

use buglink::cli;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging (WARN level by default, use RUST_LOG=info for more)
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::WARN.into()),
        )
        .init();

    cli::run().await
}
