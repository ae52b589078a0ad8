//! Batch archive - one JSON document per processing day
//!
//! Files live under `<data_dir>/batches/YYYY-MM-DD.json`. Every mutation is a
//! read-modify-write of the whole document performed under that batch's lock
//! and finished with an atomic replace, so at most one writer touches a given
//! record at a time and readers never see a half-written batch.

use chrono::NaiveDate;
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::{debug, info, warn};

use super::{write_atomic, ArticleRecord, Batch, IncomingArticle};
use crate::error::{PipelineError, PipelineResult};

/// Outcome of merging incoming articles into a batch
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ImportReport {
    pub added: usize,
    /// Identifiers skipped because the batch (or the input) already had them
    pub duplicates: Vec<String>,
}

/// Durable store of daily batches
pub struct ArticleStore {
    base_dir: PathBuf,
    locks: Mutex<HashMap<NaiveDate, Arc<Mutex<()>>>>,
}

impl ArticleStore {
    /// Open the store under `data_dir`, creating the batch directory if needed
    pub fn open(data_dir: &Path) -> PipelineResult<Self> {
        let base_dir = data_dir.join("batches");
        std::fs::create_dir_all(&base_dir)?;
        Ok(Self {
            base_dir,
            locks: Mutex::new(HashMap::new()),
        })
    }

    fn batch_path(&self, date: NaiveDate) -> PathBuf {
        self.base_dir.join(format!("{}.json", date.format("%Y-%m-%d")))
    }

    fn batch_lock(&self, date: NaiveDate) -> Arc<Mutex<()>> {
        let mut locks = self.locks.lock().unwrap_or_else(|e| e.into_inner());
        locks.entry(date).or_default().clone()
    }

    fn hold(lock: &Mutex<()>) -> MutexGuard<'_, ()> {
        lock.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn exists(&self, date: NaiveDate) -> bool {
        self.batch_path(date).exists()
    }

    /// Load a batch snapshot
    pub fn load_batch(&self, date: NaiveDate) -> PipelineResult<Batch> {
        let path = self.batch_path(date);
        if !path.exists() {
            return Err(PipelineError::BatchNotFound(date));
        }
        let content = std::fs::read_to_string(&path)?;
        let batch: Batch = serde_json::from_str(&content)?;
        Ok(batch)
    }

    fn load_or_new(&self, date: NaiveDate) -> PipelineResult<Batch> {
        match self.load_batch(date) {
            Ok(batch) => Ok(batch),
            Err(PipelineError::BatchNotFound(_)) => Ok(Batch::new(date)),
            Err(e) => Err(e),
        }
    }

    fn save_batch(&self, batch: &Batch) -> PipelineResult<()> {
        let json = serde_json::to_vec_pretty(batch)?;
        write_atomic(&self.batch_path(batch.date), &json)?;
        Ok(())
    }

    /// Merge incoming articles into the day's batch, creating it if absent.
    ///
    /// New records start `unscored` and are appended in input order. Records
    /// already present are left untouched.
    pub fn import(&self, date: NaiveDate, incoming: Vec<IncomingArticle>) -> PipelineResult<ImportReport> {
        let lock = self.batch_lock(date);
        let _guard = Self::hold(&lock);

        let mut batch = self.load_or_new(date)?;
        let mut seen: HashSet<String> = batch.articles.iter().map(|a| a.id.clone()).collect();
        let mut report = ImportReport::default();
        let mut seq = batch.next_seq();

        for article in incoming {
            if !seen.insert(article.id.clone()) {
                warn!("Skipping duplicate article {} in batch {}", article.id, date);
                report.duplicates.push(article.id);
                continue;
            }
            batch.articles.push(ArticleRecord::from_incoming(article, seq));
            seq += 1;
            report.added += 1;
        }

        self.save_batch(&batch)?;
        info!(
            "Imported {} articles into batch {} ({} duplicates, {} total)",
            report.added,
            date,
            report.duplicates.len(),
            batch.len()
        );
        Ok(report)
    }

    /// Mutate one record under the batch lock.
    ///
    /// The batch is persisted only when `f` succeeds; an error leaves the
    /// archived record exactly as it was.
    pub fn update_record<T>(
        &self,
        date: NaiveDate,
        id: &str,
        f: impl FnOnce(&mut ArticleRecord) -> PipelineResult<T>,
    ) -> PipelineResult<T> {
        let lock = self.batch_lock(date);
        let _guard = Self::hold(&lock);

        let mut batch = self.load_batch(date)?;
        let record = batch
            .get_mut(id)
            .ok_or_else(|| PipelineError::ArticleNotFound {
                date,
                id: id.to_string(),
            })?;
        let out = f(record)?;
        self.save_batch(&batch)?;
        debug!("Updated article {} in batch {}", id, date);
        Ok(out)
    }

    /// Record that the batch's verdicts were folded into instruction `version`
    pub fn mark_refined(&self, date: NaiveDate, version: u32) -> PipelineResult<()> {
        let lock = self.batch_lock(date);
        let _guard = Self::hold(&lock);

        let mut batch = self.load_batch(date)?;
        batch.refined_into = Some(version);
        self.save_batch(&batch)
    }

    /// List archived batch dates (newest first)
    pub fn list_batches(&self) -> PipelineResult<Vec<NaiveDate>> {
        let mut dates = Vec::new();
        for entry in std::fs::read_dir(&self.base_dir)? {
            let entry = entry?;
            let name = entry.file_name();
            let name_str = name.to_string_lossy();
            if let Some(date_str) = name_str.strip_suffix(".json") {
                if let Ok(date) = NaiveDate::parse_from_str(date_str, "%Y-%m-%d") {
                    dates.push(date);
                }
            }
        }
        dates.sort_by(|a, b| b.cmp(a));
        Ok(dates)
    }

    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }
}
