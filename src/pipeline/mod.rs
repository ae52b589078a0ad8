//! Daily cycle stages
//!
//! score -> review -> summarize, with refinement closing the loop by feeding
//! the day's verdicts into the next day's instruction set.

pub mod refine;
pub mod review;
pub mod scoring;
pub mod summary;

pub use refine::{RefineOptions, RefinementEngine, RefinementOutcome, UnchangedReason};
pub use review::{verdicts, ReviewProgress, ReviewStage, Verdict, VerdictKind};
pub use scoring::{ScoringReport, ScoringStage};
pub use summary::{save_summary, summarize, write_summary, DedupPolicy, SummaryEntry, SummaryOptions};
