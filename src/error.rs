//! Pipeline error kinds
//!
//! Every stage reports failures through [`PipelineError`]. Per-article
//! evaluator failures are counted and skipped by the scoring stage, review
//! validation failures go straight back to the caller, and refinement
//! failures leave the instruction set untouched.

use chrono::NaiveDate;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum PipelineError {
    /// Transport or authentication failure talking to the scoring backend
    #[error("evaluator unavailable: {0}")]
    EvaluatorUnavailable(String),

    /// The backend answered, but not with a score in 1..=10 and a rationale
    #[error("evaluator returned a malformed response: {0}")]
    EvaluatorMalformedResponse(String),

    #[error("article {id} has no body text to evaluate")]
    MissingBody { id: String },

    #[error("invalid review: {0}")]
    InvalidReview(String),

    #[error("article {id} has already been reviewed")]
    AlreadyReviewed { id: String },

    #[error("article {id} has already been scored")]
    AlreadyScored { id: String },

    #[error("article {id} has not been scored yet")]
    NotScored { id: String },

    #[error("article {id} not found in batch {date}")]
    ArticleNotFound { date: NaiveDate, id: String },

    #[error("no batch archived for {0}")]
    BatchNotFound(NaiveDate),

    /// The generative call backing prompt refinement failed
    #[error("prompt refinement unavailable: {0}")]
    RefinementUnavailable(String),

    #[error("storage error: {0}")]
    Storage(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl PipelineError {
    /// Errors the scoring stage counts and skips instead of propagating
    pub fn is_per_article(&self) -> bool {
        matches!(
            self,
            PipelineError::EvaluatorUnavailable(_)
                | PipelineError::EvaluatorMalformedResponse(_)
                | PipelineError::MissingBody { .. }
                | PipelineError::AlreadyScored { .. }
        )
    }
}

pub type PipelineResult<T> = std::result::Result<T, PipelineError>;
