//! News Select - daily news selection library
//!
//! A feedback-driven evaluation loop:
//! - Dated article batches with atomic JSON persistence
//! - LLM scoring of each article against a versioned instruction set
//! - Human review with agree / override verdicts
//! - Deduplicated, thresholded daily output
//! - Prompt refinement from the day's overrides
//!
//! # Example
//!
//! ```ignore
//! use news_select::{ArticleStore, PromptStore, ScoringStage};
//!
//! let store = ArticleStore::open(data_dir)?;
//! let instructions = PromptStore::open(data_dir)?.current()?;
//! let report = ScoringStage::new(&store, &evaluator)
//!     .with_concurrency(4)
//!     .run(date, &instructions)
//!     .await?;
//! println!("scored {} of {}", report.scored, report.total);
//! ```

pub mod error;
pub mod store;
pub mod prompt;
pub mod agent;
pub mod pipeline;
pub mod ingest;
pub mod config;
pub mod security;
pub mod server;
pub mod cli;

pub use error::{PipelineError, PipelineResult};

pub use store::{
    ArticleRecord,
    ArticleStore,
    Batch,
    IncomingArticle,
    ReviewStatus,
    Score,
};

pub use prompt::{InstructionSet, PromptStore};

pub use agent::{
    evaluator::{Evaluation, Evaluator, LlmEvaluator},
    refiner::{LlmRefiner, NotesRefiner, PromptRefiner},
};

pub use pipeline::{
    RefinementEngine,
    RefinementOutcome,
    ReviewStage,
    ScoringStage,
    SummaryEntry,
    SummaryOptions,
};

pub use config::Config;

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Longest prefix of `s` that is at most `max` bytes and ends on a char boundary
pub fn truncate_safe(s: &str, max: usize) -> &str {
    if s.len() <= max {
        return s;
    }
    let mut end = max;
    while !s.is_char_boundary(end) {
        end -= 1;
    }
    &s[..end]
}
