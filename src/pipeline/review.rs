//! Review stage - one-at-a-time human verdicts on scored records

use chrono::{NaiveDate, Utc};
use serde::Serialize;
use tracing::info;

use crate::error::{PipelineError, PipelineResult};
use crate::store::{ArticleRecord, ArticleStore, Batch, HumanReview, ReviewStatus, Score};

/// Per-batch review counts
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ReviewProgress {
    pub date: NaiveDate,
    pub total: usize,
    pub unscored: usize,
    /// Scored, awaiting a human verdict
    pub pending: usize,
    pub reviewed: usize,
}

impl ReviewProgress {
    pub fn of(batch: &Batch) -> Self {
        Self {
            date: batch.date,
            total: batch.len(),
            unscored: batch.count(ReviewStatus::Unscored),
            pending: batch.count(ReviewStatus::Scored),
            reviewed: batch.count(ReviewStatus::Reviewed),
        }
    }

    pub fn is_complete(&self) -> bool {
        self.pending == 0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum VerdictKind {
    Agree,
    Override,
}

/// Human verdict relative to the automated score, derived from a reviewed record
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Verdict {
    pub id: String,
    pub title: String,
    pub automated: Score,
    pub human: Score,
    /// `human - automated`
    pub delta: i8,
    pub rationale: String,
    pub kind: VerdictKind,
}

impl Verdict {
    /// `None` unless the record is reviewed
    pub fn from_record(record: &ArticleRecord, tolerance: u8) -> Option<Self> {
        let evaluation = record.evaluation.as_ref()?;
        let review = record.review.as_ref()?;
        let delta = review.score.delta(evaluation.score);
        let kind = if review.accepted_automated || delta.unsigned_abs() <= tolerance {
            VerdictKind::Agree
        } else {
            VerdictKind::Override
        };
        Some(Self {
            id: record.id.clone(),
            title: record.title.clone(),
            automated: evaluation.score,
            human: review.score,
            delta,
            rationale: review.rationale.clone(),
            kind,
        })
    }

    pub fn is_override(&self) -> bool {
        self.kind == VerdictKind::Override
    }
}

/// Verdicts for every reviewed record in ingestion order
pub fn verdicts(batch: &Batch, tolerance: u8) -> Vec<Verdict> {
    batch
        .with_status(ReviewStatus::Reviewed)
        .into_iter()
        .filter_map(|record| Verdict::from_record(record, tolerance))
        .collect()
}

pub struct ReviewStage<'a> {
    store: &'a ArticleStore,
}

impl<'a> ReviewStage<'a> {
    pub fn new(store: &'a ArticleStore) -> Self {
        Self { store }
    }

    /// Scored records awaiting review, in ingestion order
    pub fn pending(&self, date: NaiveDate) -> PipelineResult<Vec<ArticleRecord>> {
        let batch = self.store.load_batch(date)?;
        Ok(batch.with_status(ReviewStatus::Scored).into_iter().cloned().collect())
    }

    /// First scored record in ingestion order; `None` once fully reviewed
    pub fn next_pending(&self, date: NaiveDate) -> PipelineResult<Option<ArticleRecord>> {
        let batch = self.store.load_batch(date)?;
        Ok(batch.with_status(ReviewStatus::Scored).first().map(|r| (*r).clone()))
    }

    pub fn progress(&self, date: NaiveDate) -> PipelineResult<ReviewProgress> {
        Ok(ReviewProgress::of(&self.store.load_batch(date)?))
    }

    /// Record a human score and rationale, making the record `reviewed`
    pub fn submit_review(
        &self,
        date: NaiveDate,
        id: &str,
        score: i64,
        rationale: &str,
    ) -> PipelineResult<ArticleRecord> {
        let score = Score::new(score).ok_or_else(|| {
            PipelineError::InvalidReview(format!(
                "score {} outside {}..={}",
                score,
                Score::MIN,
                Score::MAX
            ))
        })?;
        let rationale = rationale.trim();
        if rationale.is_empty() {
            return Err(PipelineError::InvalidReview("rationale must not be empty".to_string()));
        }

        let review = HumanReview {
            score,
            rationale: rationale.to_string(),
            accepted_automated: false,
            reviewed_at: Utc::now(),
        };
        let record = self.store.update_record(date, id, |record| {
            record.apply_review(review)?;
            Ok(record.clone())
        })?;
        info!("Reviewed {} in batch {}: score {}", id, date, score);
        Ok(record)
    }

    /// Take the automated score and rationale as the human verdict
    pub fn accept_automated(&self, date: NaiveDate, id: &str) -> PipelineResult<ArticleRecord> {
        let record = self.store.update_record(date, id, |record| {
            let evaluation = record
                .evaluation
                .clone()
                .ok_or_else(|| PipelineError::NotScored { id: record.id.clone() })?;
            record.apply_review(HumanReview {
                score: evaluation.score,
                rationale: evaluation.rationale,
                accepted_automated: true,
                reviewed_at: Utc::now(),
            })?;
            Ok(record.clone())
        })?;
        info!("Accepted automated verdict for {} in batch {}", id, date);
        Ok(record)
    }
}
