//! Article Store - dated batches of article records
//!
//! One batch per processing day, one record per article. A record carries its
//! automated evaluation and its human review as optional parts; the review
//! status is derived from which parts are present, so "human fields present
//! iff reviewed" holds by construction.

pub mod archive;

pub use archive::{ArticleStore, ImportReport};

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::io::Write;
use std::path::Path;

use crate::error::{PipelineError, PipelineResult};

/// Worthiness score on the fixed 1-10 scale
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "i64", into = "u8")]
pub struct Score(u8);

impl Score {
    pub const MIN: u8 = 1;
    pub const MAX: u8 = 10;

    /// Returns `None` when the value is outside 1..=10
    pub fn new(value: i64) -> Option<Self> {
        if (Self::MIN as i64..=Self::MAX as i64).contains(&value) {
            Some(Self(value as u8))
        } else {
            None
        }
    }

    pub fn get(self) -> u8 {
        self.0
    }

    /// Signed difference `self - other`
    pub fn delta(self, other: Score) -> i8 {
        self.0 as i8 - other.0 as i8
    }
}

impl TryFrom<i64> for Score {
    type Error = String;

    fn try_from(value: i64) -> Result<Self, Self::Error> {
        Score::new(value).ok_or_else(|| format!("score {} outside {}..={}", value, Self::MIN, Self::MAX))
    }
}

impl From<Score> for u8 {
    fn from(score: Score) -> u8 {
        score.0
    }
}

impl std::fmt::Display for Score {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Point geometry reported by the ingestion source
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoPoint {
    pub longitude: f64,
    pub latitude: f64,
}

/// Review lifecycle; transitions only move forward
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReviewStatus {
    Unscored,
    Scored,
    Reviewed,
}

impl std::fmt::Display for ReviewStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ReviewStatus::Unscored => write!(f, "unscored"),
            ReviewStatus::Scored => write!(f, "scored"),
            ReviewStatus::Reviewed => write!(f, "reviewed"),
        }
    }
}

/// Automated verdict written by the scoring stage
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AutoEvaluation {
    pub score: Score,
    pub rationale: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub summary: Option<String>,
    pub model: String,
    /// Version of the instruction set the evaluator was given
    pub instructions_version: u32,
    pub scored_at: DateTime<Utc>,
}

/// Human verdict written by the review stage
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HumanReview {
    pub score: Score,
    pub rationale: String,
    /// True when the reviewer accepted the automated verdict as-is
    #[serde(default)]
    pub accepted_automated: bool,
    pub reviewed_at: DateTime<Utc>,
}

/// An article as handed over by the ingestion collaborator
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IncomingArticle {
    pub id: String,
    pub title: String,
    #[serde(default)]
    pub location_name: Option<String>,
    pub body_html: String,
    #[serde(default)]
    pub link: Option<String>,
    #[serde(default)]
    pub mention_count: Option<u64>,
    #[serde(default)]
    pub share_image: Option<String>,
    #[serde(default)]
    pub location: Option<GeoPoint>,
}

/// A single article within a day's batch
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArticleRecord {
    pub id: String,
    /// Ingestion order within the batch, starting at 0
    pub seq: u32,
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location_name: Option<String>,
    pub body_html: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub link: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mention_count: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub share_image: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location: Option<GeoPoint>,
    pub ingested_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub evaluation: Option<AutoEvaluation>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub review: Option<HumanReview>,
}

impl ArticleRecord {
    pub fn from_incoming(incoming: IncomingArticle, seq: u32) -> Self {
        Self {
            id: incoming.id,
            seq,
            title: incoming.title,
            location_name: incoming.location_name,
            body_html: incoming.body_html,
            link: incoming.link,
            mention_count: incoming.mention_count,
            share_image: incoming.share_image,
            location: incoming.location,
            ingested_at: Utc::now(),
            evaluation: None,
            review: None,
        }
    }

    pub fn status(&self) -> ReviewStatus {
        match (&self.evaluation, &self.review) {
            (_, Some(_)) => ReviewStatus::Reviewed,
            (Some(_), None) => ReviewStatus::Scored,
            (None, None) => ReviewStatus::Unscored,
        }
    }

    pub fn has_body(&self) -> bool {
        !self.body_html.trim().is_empty()
    }

    /// Human score if reviewed, else the automated score
    pub fn effective_score(&self) -> Option<Score> {
        self.review
            .as_ref()
            .map(|r| r.score)
            .or_else(|| self.evaluation.as_ref().map(|e| e.score))
    }

    /// Short summary for the output set, falling back to the rationale
    pub fn summary_text(&self) -> Option<&str> {
        let eval = self.evaluation.as_ref()?;
        Some(eval.summary.as_deref().unwrap_or(&eval.rationale))
    }

    /// `unscored -> scored`
    pub fn apply_evaluation(&mut self, evaluation: AutoEvaluation) -> PipelineResult<()> {
        if self.status() != ReviewStatus::Unscored {
            return Err(PipelineError::AlreadyScored { id: self.id.clone() });
        }
        self.evaluation = Some(evaluation);
        Ok(())
    }

    /// `scored -> reviewed`
    pub fn apply_review(&mut self, review: HumanReview) -> PipelineResult<()> {
        match self.status() {
            ReviewStatus::Unscored => Err(PipelineError::NotScored { id: self.id.clone() }),
            ReviewStatus::Reviewed => Err(PipelineError::AlreadyReviewed { id: self.id.clone() }),
            ReviewStatus::Scored => {
                self.review = Some(review);
                Ok(())
            }
        }
    }
}

/// All records for one processing day, in ingestion order
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Batch {
    pub date: NaiveDate,
    /// Instruction-set version this batch's verdicts were folded into
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refined_into: Option<u32>,
    #[serde(default)]
    pub articles: Vec<ArticleRecord>,
}

impl Batch {
    pub fn new(date: NaiveDate) -> Self {
        Self {
            date,
            refined_into: None,
            articles: Vec::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.articles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.articles.is_empty()
    }

    pub fn get(&self, id: &str) -> Option<&ArticleRecord> {
        self.articles.iter().find(|a| a.id == id)
    }

    pub fn get_mut(&mut self, id: &str) -> Option<&mut ArticleRecord> {
        self.articles.iter_mut().find(|a| a.id == id)
    }

    pub fn count(&self, status: ReviewStatus) -> usize {
        self.articles.iter().filter(|a| a.status() == status).count()
    }

    /// Records with the given status, in ingestion order
    pub fn with_status(&self, status: ReviewStatus) -> Vec<&ArticleRecord> {
        let mut records: Vec<&ArticleRecord> =
            self.articles.iter().filter(|a| a.status() == status).collect();
        records.sort_by_key(|a| a.seq);
        records
    }

    fn next_seq(&self) -> u32 {
        self.articles.iter().map(|a| a.seq + 1).max().unwrap_or(0)
    }
}

/// Replace `path` with `contents` through a sibling temp file and rename, so
/// readers only ever see the old or the new document.
pub(crate) fn write_atomic(path: &Path, contents: &[u8]) -> std::io::Result<()> {
    let dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    std::fs::create_dir_all(dir)?;
    let mut tmp = tempfile::NamedTempFile::new_in(dir)?;
    tmp.write_all(contents)?;
    tmp.as_file().sync_all()?;
    tmp.persist(path).map_err(|e| e.error)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(id: &str, seq: u32) -> ArticleRecord {
        ArticleRecord::from_incoming(
            IncomingArticle {
                id: id.to_string(),
                title: format!("Title {}", id),
                location_name: Some("Kathmandu, Nepal".to_string()),
                body_html: "<a href=\"https://example.com\">Landslide</a>".to_string(),
                link: None,
                mention_count: Some(3),
                share_image: None,
                location: None,
            },
            seq,
        )
    }

    fn evaluation(score: i64) -> AutoEvaluation {
        AutoEvaluation {
            score: Score::new(score).unwrap(),
            rationale: "Timely and of broad public interest".to_string(),
            summary: None,
            model: "test-model".to_string(),
            instructions_version: 0,
            scored_at: Utc::now(),
        }
    }

    fn review(score: i64) -> HumanReview {
        HumanReview {
            score: Score::new(score).unwrap(),
            rationale: "Local interest only".to_string(),
            accepted_automated: false,
            reviewed_at: Utc::now(),
        }
    }

    #[test]
    fn test_score_range() {
        assert!(Score::new(0).is_none());
        assert!(Score::new(11).is_none());
        assert!(Score::new(-3).is_none());
        assert_eq!(Score::new(1).unwrap().get(), 1);
        assert_eq!(Score::new(10).unwrap().get(), 10);
    }

    #[test]
    fn test_score_serde_rejects_out_of_range() {
        let ok: Score = serde_json::from_str("7").unwrap();
        assert_eq!(ok.get(), 7);
        assert!(serde_json::from_str::<Score>("12").is_err());
        assert_eq!(serde_json::to_string(&ok).unwrap(), "7");
    }

    #[test]
    fn test_status_transitions_forward_only() {
        let mut rec = record("a", 0);
        assert_eq!(rec.status(), ReviewStatus::Unscored);

        // Cannot review before scoring
        assert!(matches!(rec.apply_review(review(5)), Err(PipelineError::NotScored { .. })));
        assert!(rec.review.is_none());

        rec.apply_evaluation(evaluation(8)).unwrap();
        assert_eq!(rec.status(), ReviewStatus::Scored);
        assert!(matches!(
            rec.apply_evaluation(evaluation(3)),
            Err(PipelineError::AlreadyScored { .. })
        ));
        assert_eq!(rec.evaluation.as_ref().unwrap().score.get(), 8);

        rec.apply_review(review(5)).unwrap();
        assert_eq!(rec.status(), ReviewStatus::Reviewed);
        assert!(matches!(rec.apply_review(review(9)), Err(PipelineError::AlreadyReviewed { .. })));
        assert_eq!(rec.review.as_ref().unwrap().score.get(), 5);
    }

    #[test]
    fn test_effective_score_prefers_human() {
        let mut rec = record("a", 0);
        assert!(rec.effective_score().is_none());
        rec.apply_evaluation(evaluation(8)).unwrap();
        assert_eq!(rec.effective_score().unwrap().get(), 8);
        rec.apply_review(review(4)).unwrap();
        assert_eq!(rec.effective_score().unwrap().get(), 4);
    }

    #[test]
    fn test_summary_falls_back_to_rationale() {
        let mut rec = record("a", 0);
        assert!(rec.summary_text().is_none());
        rec.apply_evaluation(evaluation(8)).unwrap();
        assert_eq!(rec.summary_text(), Some("Timely and of broad public interest"));
    }

    #[test]
    fn test_batch_status_queries_use_ingestion_order() {
        let mut batch = Batch::new(NaiveDate::from_ymd_opt(2025, 3, 1).unwrap());
        batch.articles.push(record("z", 1));
        batch.articles.push(record("a", 0));
        batch.articles.push(record("m", 2));
        batch.get_mut("m").unwrap().apply_evaluation(evaluation(6)).unwrap();

        let unscored: Vec<&str> = batch
            .with_status(ReviewStatus::Unscored)
            .iter()
            .map(|r| r.id.as_str())
            .collect();
        assert_eq!(unscored, vec!["a", "z"]);
        assert_eq!(batch.count(ReviewStatus::Scored), 1);
        assert_eq!(batch.next_seq(), 3);
    }

    #[test]
    fn test_write_atomic_replaces_contents() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("doc.json");
        write_atomic(&path, b"first").unwrap();
        write_atomic(&path, b"second").unwrap();
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "second");
        // No temp files left behind
        let leftovers = std::fs::read_dir(path.parent().unwrap()).unwrap().count();
        assert_eq!(leftovers, 1);
    }
}
