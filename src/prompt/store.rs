//! Persistent instruction set
//!
//! `<data_dir>/instructions/current.json` holds the live version; every
//! version it replaces is archived as `history/vNNNN.json` for audit.

use std::path::{Path, PathBuf};
use tracing::{info, warn};

use super::InstructionSet;
use crate::error::PipelineResult;
use crate::store::write_atomic;

pub struct PromptStore {
    base_dir: PathBuf,
}

impl PromptStore {
    pub fn open(data_dir: &Path) -> PipelineResult<Self> {
        let base_dir = data_dir.join("instructions");
        std::fs::create_dir_all(base_dir.join("history"))?;
        Ok(Self { base_dir })
    }

    fn current_path(&self) -> PathBuf {
        self.base_dir.join("current.json")
    }

    fn history_path(&self, version: u32) -> PathBuf {
        self.base_dir.join("history").join(format!("v{:04}.json", version))
    }

    /// The live instruction set, or the built-in default if none was written
    pub fn current(&self) -> PipelineResult<InstructionSet> {
        let path = self.current_path();
        if !path.exists() {
            return Ok(InstructionSet::default());
        }
        let content = std::fs::read_to_string(&path)?;
        Ok(serde_json::from_str(&content)?)
    }

    /// Make `next` the live version.
    ///
    /// The outgoing version is archived first; the live document itself is
    /// swapped with a single rename.
    pub fn replace(&self, next: &InstructionSet) -> PipelineResult<()> {
        let previous = self.current()?;
        if next.version <= previous.version {
            warn!(
                "Replacing instruction set v{} with non-increasing v{}",
                previous.version, next.version
            );
        }
        if self.current_path().exists() {
            write_atomic(&self.history_path(previous.version), &serde_json::to_vec_pretty(&previous)?)?;
        }
        write_atomic(&self.current_path(), &serde_json::to_vec_pretty(next)?)?;
        info!("Instruction set v{} is now live", next.version);
        Ok(())
    }

    /// Install hand-written instructions as the next version
    pub fn install_text(&self, text: &str) -> PipelineResult<InstructionSet> {
        let next = self.current()?.next(text.trim(), None);
        self.replace(&next)?;
        Ok(next)
    }

    /// Archived versions, oldest first
    pub fn history(&self) -> PipelineResult<Vec<InstructionSet>> {
        let mut versions = Vec::new();
        for entry in std::fs::read_dir(self.base_dir.join("history"))? {
            let path = entry?.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            let content = std::fs::read_to_string(&path)?;
            match serde_json::from_str::<InstructionSet>(&content) {
                Ok(set) => versions.push(set),
                Err(e) => warn!("Skipping unreadable history entry {}: {}", path.display(), e),
            }
        }
        versions.sort_by_key(|s| s.version);
        Ok(versions)
    }
}
