//! Scoring stage - drive the evaluator over a batch's unscored records

use chrono::{NaiveDate, Utc};
use futures::stream::{self, StreamExt};
use tracing::{debug, info, warn};

use crate::agent::evaluator::Evaluator;
use crate::error::{PipelineError, PipelineResult};
use crate::prompt::InstructionSet;
use crate::store::{ArticleRecord, ArticleStore, AutoEvaluation, ReviewStatus};

/// Outcome of one scoring run
#[derive(Debug)]
pub struct ScoringReport {
    pub date: NaiveDate,
    pub total: usize,
    /// Records that were already past `unscored` when the run started
    pub already_scored: usize,
    pub scored: usize,
    /// Records left `unscored`, with the reason
    pub failures: Vec<(String, PipelineError)>,
}

impl ScoringReport {
    pub fn failed(&self) -> usize {
        self.failures.len()
    }
}

pub struct ScoringStage<'a> {
    store: &'a ArticleStore,
    evaluator: &'a dyn Evaluator,
    concurrency: usize,
}

impl<'a> ScoringStage<'a> {
    pub fn new(store: &'a ArticleStore, evaluator: &'a dyn Evaluator) -> Self {
        Self {
            store,
            evaluator,
            concurrency: 1,
        }
    }

    /// Maximum number of evaluator calls in flight
    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency.max(1);
        self
    }

    /// Score every unscored record in `date`'s batch under `instructions`.
    ///
    /// Calls are dispatched in ingestion order. A per-article failure is
    /// logged, counted and leaves the record `unscored` for the next run;
    /// only storage failures abort the stage.
    pub async fn run(&self, date: NaiveDate, instructions: &InstructionSet) -> PipelineResult<ScoringReport> {
        let batch = self.store.load_batch(date)?;
        let pending: Vec<ArticleRecord> = batch
            .with_status(ReviewStatus::Unscored)
            .into_iter()
            .cloned()
            .collect();

        let mut report = ScoringReport {
            date,
            total: batch.len(),
            already_scored: batch.len() - pending.len(),
            scored: 0,
            failures: Vec::new(),
        };

        if pending.is_empty() {
            info!("Batch {}: nothing to score ({} records)", date, report.total);
            return Ok(report);
        }

        info!(
            "Batch {}: scoring {} articles with instructions v{} (model {}, concurrency {})",
            date,
            pending.len(),
            instructions.version,
            self.evaluator.model(),
            self.concurrency
        );

        let mut results = stream::iter(pending)
            .map(|article| async move {
                let result = self.evaluator.evaluate(&article, instructions).await;
                (article.id, result)
            })
            .buffer_unordered(self.concurrency);

        while let Some((id, result)) = results.next().await {
            let outcome = result.and_then(|evaluation| {
                let auto = AutoEvaluation {
                    score: evaluation.score,
                    rationale: evaluation.rationale,
                    summary: evaluation.summary,
                    model: self.evaluator.model().to_string(),
                    instructions_version: instructions.version,
                    scored_at: Utc::now(),
                };
                self.store.update_record(date, &id, |record| record.apply_evaluation(auto))
            });

            match outcome {
                Ok(()) => {
                    debug!("Scored {}", id);
                    report.scored += 1;
                }
                Err(e) if e.is_per_article() => {
                    warn!("Skipping {}: {}", id, e);
                    report.failures.push((id, e));
                }
                Err(e) => return Err(e),
            }
        }

        info!(
            "Batch {}: scored {}, failed {}, previously scored {}",
            date,
            report.scored,
            report.failed(),
            report.already_scored
        );
        Ok(report)
    }
}
