//! Deduplication and filter engine - the day's output set

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use tracing::info;

use crate::error::PipelineResult;
use crate::store::{write_atomic, ArticleRecord, Batch, GeoPoint, Score};

/// How survivors are grouped into "the same story"
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DedupPolicy {
    /// Identical normalized titles
    #[default]
    Exact,
    /// Containment or word overlap above the similarity cut-off
    Fuzzy,
}

#[derive(Debug, Clone, Copy)]
pub struct SummaryOptions {
    pub threshold: u8,
    pub policy: DedupPolicy,
    /// Word-overlap ratio above which fuzzy titles collapse
    pub similarity: f64,
}

impl Default for SummaryOptions {
    fn default() -> Self {
        Self {
            threshold: 7,
            policy: DedupPolicy::Exact,
            similarity: 0.7,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SummaryEntry {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub link: Option<String>,
    pub title: String,
    pub summary: String,
    pub score: Score,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location: Option<GeoPoint>,
}

impl SummaryEntry {
    fn from_record(record: &ArticleRecord, score: Score) -> Self {
        Self {
            id: record.id.clone(),
            link: record.link.clone(),
            title: record.title.clone(),
            summary: record.summary_text().unwrap_or_default().to_string(),
            score,
            location_name: record.location_name.clone(),
            location: record.location,
        }
    }
}

/// Case-folded, whitespace-collapsed title
pub fn normalize_title(title: &str) -> String {
    title
        .split_whitespace()
        .map(|w| w.to_lowercase())
        .collect::<Vec<_>>()
        .join(" ")
}

/// Fuzzy title match on already-normalized titles
pub fn titles_similar(a: &str, b: &str, similarity: f64) -> bool {
    if a.is_empty() || b.is_empty() {
        return false;
    }
    if a.len() < 5 || b.len() < 5 {
        return a == b;
    }
    if a.contains(b) || b.contains(a) {
        return true;
    }
    let a_words: HashSet<&str> = a.split_whitespace().collect();
    let b_words: HashSet<&str> = b.split_whitespace().collect();
    let intersection = a_words.intersection(&b_words).count();
    let union = a_words.union(&b_words).count();
    if union == 0 {
        return false;
    }
    (intersection as f64 / union as f64) > similarity
}

struct Group<'b> {
    key: String,
    best: &'b ArticleRecord,
    score: Score,
}

impl Group<'_> {
    fn matches(&self, key: &str, options: &SummaryOptions) -> bool {
        // Blank titles never stand for the same story
        if key.is_empty() || self.key.is_empty() {
            return false;
        }
        match options.policy {
            DedupPolicy::Exact => self.key == key,
            DedupPolicy::Fuzzy => titles_similar(&self.key, key, options.similarity),
        }
    }
}

/// Filter a batch to its share-worthy stories, one per group.
///
/// Records below the threshold and unscored records are dropped. Within a
/// group the highest effective score wins, ties going to the earliest
/// ingested. Output is ordered by descending score, then identifier.
pub fn summarize(batch: &Batch, options: &SummaryOptions) -> Vec<SummaryEntry> {
    let mut survivors: Vec<(&ArticleRecord, Score)> = batch
        .articles
        .iter()
        .filter_map(|record| record.effective_score().map(|score| (record, score)))
        .filter(|(_, score)| score.get() >= options.threshold)
        .collect();
    survivors.sort_by_key(|(record, _)| record.seq);

    let mut groups: Vec<Group> = Vec::new();
    for (record, score) in survivors {
        let key = normalize_title(&record.title);
        match groups.iter_mut().find(|g| g.matches(&key, options)) {
            Some(group) => {
                if score > group.score {
                    group.best = record;
                    group.score = score;
                }
            }
            None => groups.push(Group { key, best: record, score }),
        }
    }

    let mut entries: Vec<SummaryEntry> = groups
        .iter()
        .map(|g| SummaryEntry::from_record(g.best, g.score))
        .collect();
    entries.sort_by(|a, b| b.score.cmp(&a.score).then_with(|| a.id.cmp(&b.id)));
    entries
}

pub fn summary_path(data_dir: &Path, date: NaiveDate) -> PathBuf {
    data_dir
        .join("summaries")
        .join(format!("{}.json", date.format("%Y-%m-%d")))
}

/// Persist the output set for `date`, replacing any earlier one
pub fn save_summary(data_dir: &Path, date: NaiveDate, entries: &[SummaryEntry]) -> PipelineResult<PathBuf> {
    let path = summary_path(data_dir, date);
    write_summary(&path, entries)?;
    Ok(path)
}

/// Atomically write the output set to `path`
pub fn write_summary(path: &Path, entries: &[SummaryEntry]) -> PipelineResult<()> {
    write_atomic(path, &serde_json::to_vec_pretty(entries)?)?;
    info!("Wrote {} summary entries to {}", entries.len(), path.display());
    Ok(())
}
