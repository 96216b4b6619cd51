//! Buglink - Feedback-Augmented Bug/Feature Linker Library
//!
//! Links defect reports to product feature requests with:
//! - An OpenAI-compatible LLM classifier (OpenRouter-style API)
//! - Retrieval of similar past human corrections to bias the model
//! - Confidence-gated acceptance of model answers
//! - An append-only feedback store that closes the human-review loop
//!
//! # Example
//!
//! ```ignore
//! use buglink::config::Config;
//! use buglink::engine::ClassificationEngine;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = Config::load(None)?;
//!     let engine = ClassificationEngine::from_config(&config).await?;
//!     let result = engine.classify_bug(&bug, &features, None).await;
//!     println!("{} -> {:?}", result.bug_id, result.chosen_feature);
//!     Ok(())
//! }
//! ```

// Core modules (order matters for cross-module dependencies)
pub mod types;
pub mod error;
pub mod config;
pub mod feedback; // Must come before index since index reads feedback records
pub mod index;
pub mod resolve;
pub mod prompt;
pub mod engine;
pub mod cli;

// Re-export commonly used types for convenience
pub use types::{Bug, Feature, ClassificationResult, ClassificationStatus};
pub use error::TriageError;
pub use config::Config;

pub use feedback::{
    FeedbackStore,
    FeedbackRecord,
    PendingReview,
};

pub use index::{SimilarityIndex, IndexStrategy};
pub use resolve::{resolve, Guidance, ResolverStrategy};
pub use engine::ClassificationEngine;

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Library name
pub const NAME: &str = env!("CARGO_PKG_NAME");

/// Get the library info
pub fn info() -> String {
    format!("{} v{} - Feedback-Augmented Bug/Feature Linker", NAME, VERSION)
}
