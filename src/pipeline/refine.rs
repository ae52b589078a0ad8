//! Prompt refinement engine - fold a batch's human verdicts into the next
//! instruction set
//!
//! Refinement only ever writes when the batch has at least one override.
//! The new text is the refiner's rewrite of the instructions followed by the
//! retained calibration blocks, the newest of which lists this batch's
//! overrides verbatim.

use chrono::NaiveDate;
use regex::Regex;
use std::sync::LazyLock;
use tracing::{info, warn};

use super::review::{verdicts, Verdict};
use crate::agent::refiner::{clean_refined_text, PromptRefiner};
use crate::error::{PipelineError, PipelineResult};
use crate::prompt::{InstructionSet, PromptStore};
use crate::store::ArticleStore;

static CALIBRATION_BLOCK: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)<!-- calibration v(\d+) (\S+) -->.*?<!-- /calibration -->\n?").unwrap());

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnchangedReason {
    NoVerdicts,
    AllAgree,
    /// The batch was already folded into this version
    AlreadyApplied(u32),
}

impl std::fmt::Display for UnchangedReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            UnchangedReason::NoVerdicts => write!(f, "no reviewed articles"),
            UnchangedReason::AllAgree => write!(f, "every verdict agrees with the evaluator"),
            UnchangedReason::AlreadyApplied(v) => write!(f, "already refined into v{}", v),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum RefinementOutcome {
    Unchanged(UnchangedReason),
    Refined {
        previous_version: u32,
        instructions: InstructionSet,
        overrides: usize,
        /// Batches marked as folded into `instructions`
        batches: Vec<NaiveDate>,
    },
}

#[derive(Debug, Clone, Copy)]
pub struct RefineOptions {
    pub tolerance: u8,
    pub max_calibration_blocks: usize,
    /// Refine even if the batch was already folded in
    pub force: bool,
}

impl Default for RefineOptions {
    fn default() -> Self {
        Self {
            tolerance: 0,
            max_calibration_blocks: 5,
            force: false,
        }
    }
}

/// Feedback section handed to the refiner
pub fn feedback_report(verdicts: &[Verdict]) -> String {
    let mut report = String::from("=== Human Feedback Integration ===\n");
    if verdicts.is_empty() {
        return report;
    }
    let average = verdicts.iter().map(|v| v.human.get() as f64).sum::<f64>() / verdicts.len() as f64;
    report.push_str(&format!("Average Human Score: {:.2}\n", average));
    report.push_str("Detailed Feedback:\n");
    for verdict in verdicts {
        let line = format!("Score: {:.1} - {}", verdict.human.get() as f64, single_line(&verdict.rationale));
        if verdict.is_override() {
            report.push_str(&format!(
                "{} (override: evaluator gave {}, delta {:+})\n",
                line, verdict.automated, verdict.delta
            ));
        } else {
            report.push_str(&format!("{}\n", line));
        }
    }
    report
}

/// Collapse whitespace and defuse comment markers so reviewer text can never
/// open or close a calibration block
fn single_line(text: &str) -> String {
    text.split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .replace("<!--", "< !--")
        .replace("-->", "-- >")
}

/// Marked block listing a batch's overrides
pub fn calibration_block(version: u32, date: NaiveDate, overrides: &[&Verdict]) -> String {
    let mut block = format!("<!-- calibration v{} {} -->\n", version, date.format("%Y-%m-%d"));
    block.push_str(&format!(
        "Reviewer corrections from {}; weigh similar stories the same way:\n",
        date.format("%Y-%m-%d")
    ));
    for verdict in overrides {
        block.push_str(&format!(
            "- \"{}\" [{}]: evaluator {}, reviewer {} ({:+}). {}\n",
            single_line(&verdict.title),
            verdict.id,
            verdict.automated,
            verdict.human,
            verdict.delta,
            single_line(&verdict.rationale)
        ));
    }
    block.push_str("<!-- /calibration -->\n");
    block
}

/// Split instruction text into its prose and its calibration blocks
pub fn split_calibration(text: &str) -> (String, Vec<String>) {
    let blocks = CALIBRATION_BLOCK
        .find_iter(text)
        .map(|m| {
            let mut block = m.as_str().to_string();
            if !block.ends_with('\n') {
                block.push('\n');
            }
            block
        })
        .collect();
    let prose = CALIBRATION_BLOCK.replace_all(text, "").trim().to_string();
    (prose, blocks)
}

/// Prose followed by the newest `max_blocks` calibration blocks
pub fn assemble(prose: &str, mut blocks: Vec<String>, max_blocks: usize) -> String {
    let keep = max_blocks.max(1);
    if blocks.len() > keep {
        blocks.drain(..blocks.len() - keep);
    }
    format!("{}\n\n{}", prose.trim(), blocks.concat().trim_end())
}

pub struct RefinementEngine<'a> {
    store: &'a ArticleStore,
    prompts: &'a PromptStore,
    refiner: &'a dyn PromptRefiner,
    options: RefineOptions,
}

impl<'a> RefinementEngine<'a> {
    pub fn new(store: &'a ArticleStore, prompts: &'a PromptStore, refiner: &'a dyn PromptRefiner) -> Self {
        Self {
            store,
            prompts,
            refiner,
            options: RefineOptions::default(),
        }
    }

    pub fn with_options(mut self, options: RefineOptions) -> Self {
        self.options = options;
        self
    }

    /// Produce and install the next instruction set from `date`'s verdicts.
    ///
    /// The live set is untouched unless the batch has overrides and the
    /// refiner returns usable text. The instruction set is replaced before
    /// the batch is marked, so an interrupted run refines again rather than
    /// losing the batch's feedback.
    pub async fn refine(&self, date: NaiveDate) -> PipelineResult<RefinementOutcome> {
        self.refine_batches(&[date]).await
    }

    /// Fold the verdicts of several batches into a single new version.
    ///
    /// Batches already refined are skipped unless forced. One feedback report
    /// covers every remaining verdict, each batch with overrides gets its own
    /// calibration block, and every batch that contributed a verdict is
    /// marked with the new version.
    pub async fn refine_batches(&self, dates: &[NaiveDate]) -> PipelineResult<RefinementOutcome> {
        let mut dates = dates.to_vec();
        dates.sort();
        dates.dedup();

        let mut applied = None;
        let mut gathered: Vec<(NaiveDate, Vec<Verdict>)> = Vec::new();
        for date in dates {
            let batch = self.store.load_batch(date)?;
            if let (Some(version), false) = (batch.refined_into, self.options.force) {
                info!("Batch {} already refined into v{}", date, version);
                applied = applied.max(Some(version));
                continue;
            }
            let batch_verdicts = verdicts(&batch, self.options.tolerance);
            if !batch_verdicts.is_empty() {
                gathered.push((date, batch_verdicts));
            }
        }

        let all: Vec<Verdict> = gathered.iter().flat_map(|(_, v)| v.iter().cloned()).collect();
        if all.is_empty() {
            if let Some(version) = applied {
                return Ok(RefinementOutcome::Unchanged(UnchangedReason::AlreadyApplied(version)));
            }
            info!("No verdicts, instructions unchanged");
            return Ok(RefinementOutcome::Unchanged(UnchangedReason::NoVerdicts));
        }
        let overrides = all.iter().filter(|v| v.is_override()).count();
        if overrides == 0 {
            info!("All {} verdicts agree, instructions unchanged", all.len());
            return Ok(RefinementOutcome::Unchanged(UnchangedReason::AllAgree));
        }

        let current = self.prompts.current()?;
        let (prose, mut blocks) = split_calibration(&current.text);
        let feedback = feedback_report(&all);

        let rewritten = self.refiner.refine(&prose, &feedback).await.map_err(|e| {
            warn!("Refiner {} failed: {}", self.refiner.name(), e);
            match e {
                PipelineError::RefinementUnavailable(_) => e,
                other => PipelineError::RefinementUnavailable(other.to_string()),
            }
        })?;
        // Any block the refiner echoed back is replaced by the tracked ones
        let (rewritten, _) = split_calibration(&clean_refined_text(&rewritten));
        if rewritten.is_empty() {
            warn!("Refiner {} returned empty instructions", self.refiner.name());
            return Err(PipelineError::RefinementUnavailable(
                "refiner returned empty instructions".to_string(),
            ));
        }

        let version = current.version + 1;
        for (date, batch_verdicts) in &gathered {
            let batch_overrides: Vec<&Verdict> = batch_verdicts.iter().filter(|v| v.is_override()).collect();
            if !batch_overrides.is_empty() {
                blocks.push(calibration_block(version, *date, &batch_overrides));
            }
        }
        let batches: Vec<NaiveDate> = gathered.iter().map(|(date, _)| *date).collect();
        let next = current.next(
            assemble(&rewritten, blocks, self.options.max_calibration_blocks),
            batches.last().copied(),
        );
        self.prompts.replace(&next)?;
        for date in &batches {
            self.store.mark_refined(*date, next.version)?;
        }

        info!(
            "{} of {} verdicts across {} batch(es) were overrides; instructions v{} -> v{}",
            overrides,
            all.len(),
            batches.len(),
            current.version,
            next.version
        );
        Ok(RefinementOutcome::Refined {
            previous_version: current.version,
            instructions: next,
            overrides,
            batches,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::refiner::NotesRefiner;
    use crate::pipeline::review::ReviewStage;
    use crate::store::{AutoEvaluation, IncomingArticle, Score};
    use async_trait::async_trait;
    use chrono::Utc;
    use std::sync::Mutex;

    struct FixedRefiner {
        reply: PipelineResult<String>,
        feedback: Mutex<Option<String>>,
    }

    impl FixedRefiner {
        fn ok(reply: &str) -> Self {
            Self {
                reply: Ok(reply.to_string()),
                feedback: Mutex::new(None),
            }
        }

        fn failing() -> Self {
            Self {
                reply: Err(PipelineError::RefinementUnavailable("503 from provider".to_string())),
                feedback: Mutex::new(None),
            }
        }
    }

    #[async_trait]
    impl PromptRefiner for FixedRefiner {
        async fn refine(&self, _current: &str, feedback: &str) -> PipelineResult<String> {
            *self.feedback.lock().unwrap() = Some(feedback.to_string());
            match &self.reply {
                Ok(text) => Ok(text.clone()),
                Err(e) => Err(PipelineError::RefinementUnavailable(e.to_string())),
            }
        }

        fn name(&self) -> &str {
            "fixed"
        }
    }

    fn date() -> NaiveDate {
        NaiveDate::from_ymd_opt(2025, 6, 15).unwrap()
    }

    fn setup(dir: &std::path::Path, scores: &[(&str, i64)]) -> (ArticleStore, PromptStore) {
        let store = ArticleStore::open(dir).unwrap();
        let prompts = PromptStore::open(dir).unwrap();
        store
            .import(
                date(),
                scores
                    .iter()
                    .map(|(id, _)| IncomingArticle {
                        id: id.to_string(),
                        title: format!("Story {}", id),
                        location_name: None,
                        body_html: "<p>body</p>".to_string(),
                        link: None,
                        mention_count: None,
                        share_image: None,
                        location: None,
                    })
                    .collect(),
            )
            .unwrap();
        for (id, score) in scores {
            store
                .update_record(date(), id, |r| {
                    r.apply_evaluation(AutoEvaluation {
                        score: Score::new(*score).unwrap(),
                        rationale: "auto".to_string(),
                        summary: None,
                        model: "m".to_string(),
                        instructions_version: 0,
                        scored_at: Utc::now(),
                    })
                })
                .unwrap();
        }
        (store, prompts)
    }

    fn live_bytes(dir: &std::path::Path) -> Option<Vec<u8>> {
        std::fs::read(dir.join("instructions").join("current.json")).ok()
    }

    #[tokio::test]
    async fn test_no_verdicts_leaves_instructions_untouched() {
        let dir = tempfile::tempdir().unwrap();
        let (store, prompts) = setup(dir.path(), &[("a", 8)]);
        prompts.install_text("Be strict.").unwrap();
        let before = live_bytes(dir.path());

        let refiner = FixedRefiner::ok("should not be used");
        let outcome = RefinementEngine::new(&store, &prompts, &refiner).refine(date()).await.unwrap();
        assert_eq!(outcome, RefinementOutcome::Unchanged(UnchangedReason::NoVerdicts));
        assert_eq!(live_bytes(dir.path()), before);
        assert!(refiner.feedback.lock().unwrap().is_none());
    }

    #[tokio::test]
    async fn test_all_agree_leaves_instructions_untouched() {
        let dir = tempfile::tempdir().unwrap();
        let (store, prompts) = setup(dir.path(), &[("a", 8), ("b", 5)]);
        let stage = ReviewStage::new(&store);
        stage.accept_automated(date(), "a").unwrap();
        stage.submit_review(date(), "b", 5, "Fair score").unwrap();

        let outcome = RefinementEngine::new(&store, &prompts, &NotesRefiner).refine(date()).await.unwrap();
        assert_eq!(outcome, RefinementOutcome::Unchanged(UnchangedReason::AllAgree));
        assert!(live_bytes(dir.path()).is_none());
        assert_eq!(prompts.current().unwrap(), InstructionSet::default());
    }

    #[tokio::test]
    async fn test_override_produces_new_version() {
        let dir = tempfile::tempdir().unwrap();
        let (store, prompts) = setup(dir.path(), &[("a", 8), ("b", 6)]);
        let stage = ReviewStage::new(&store);
        stage.submit_review(date(), "a", 3, "Only of local interest").unwrap();
        stage.accept_automated(date(), "b").unwrap();

        let refiner = FixedRefiner::ok("```\nPenalize purely local stories.\n```");
        let outcome = RefinementEngine::new(&store, &prompts, &refiner).refine(date()).await.unwrap();
        let RefinementOutcome::Refined { previous_version, instructions, overrides, batches } = outcome else {
            panic!("expected refinement");
        };
        assert_eq!(previous_version, 0);
        assert_eq!(overrides, 1);
        assert_eq!(batches, vec![date()]);
        assert_eq!(instructions.version, 1);
        assert_eq!(instructions.refined_from, Some(date()));
        assert!(instructions.text.starts_with("Penalize purely local stories."));
        assert!(instructions.text.contains("<!-- calibration v1 2025-06-15 -->"));
        assert!(instructions.text.contains("Only of local interest"));
        assert_ne!(instructions.text, InstructionSet::default().text);

        assert_eq!(prompts.current().unwrap(), instructions);
        assert_eq!(store.load_batch(date()).unwrap().refined_into, Some(1));

        let feedback = refiner.feedback.lock().unwrap().clone().unwrap();
        assert!(feedback.contains("Average Human Score: 4.50"));
        assert!(feedback.contains("Score: 3.0 - Only of local interest (override: evaluator gave 8, delta -5)"));
    }

    #[tokio::test]
    async fn test_notes_refiner_still_changes_text() {
        let dir = tempfile::tempdir().unwrap();
        let (store, prompts) = setup(dir.path(), &[("a", 4)]);
        ReviewStage::new(&store).submit_review(date(), "a", 9, "Major casualties").unwrap();
        let before = prompts.current().unwrap();

        let outcome = RefinementEngine::new(&store, &prompts, &NotesRefiner).refine(date()).await.unwrap();
        let RefinementOutcome::Refined { instructions, .. } = outcome else {
            panic!("expected refinement");
        };
        assert_ne!(instructions.text, before.text);
        assert!(instructions.text.starts_with(before.text.trim()));
    }

    #[tokio::test]
    async fn test_second_refine_is_noop_unless_forced() {
        let dir = tempfile::tempdir().unwrap();
        let (store, prompts) = setup(dir.path(), &[("a", 4)]);
        ReviewStage::new(&store).submit_review(date(), "a", 9, "Major casualties").unwrap();

        let engine = RefinementEngine::new(&store, &prompts, &NotesRefiner);
        engine.refine(date()).await.unwrap();
        assert_eq!(
            engine.refine(date()).await.unwrap(),
            RefinementOutcome::Unchanged(UnchangedReason::AlreadyApplied(1))
        );

        let forced = RefinementEngine::new(&store, &prompts, &NotesRefiner)
            .with_options(RefineOptions { force: true, ..RefineOptions::default() })
            .refine(date())
            .await
            .unwrap();
        let RefinementOutcome::Refined { instructions, .. } = forced else {
            panic!("expected refinement");
        };
        assert_eq!(instructions.version, 2);
        // Re-running keeps both blocks; neither is duplicated into the prose
        assert_eq!(split_calibration(&instructions.text).1.len(), 2);
        assert_eq!(prompts.history().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_refiner_failure_leaves_state_untouched() {
        let dir = tempfile::tempdir().unwrap();
        let (store, prompts) = setup(dir.path(), &[("a", 8)]);
        prompts.install_text("Be strict.").unwrap();
        ReviewStage::new(&store).submit_review(date(), "a", 2, "Stale story").unwrap();
        let before = live_bytes(dir.path());

        let failing = FixedRefiner::failing();
        let err = RefinementEngine::new(&store, &prompts, &failing).refine(date()).await.unwrap_err();
        assert!(matches!(err, PipelineError::RefinementUnavailable(_)));

        let empty = FixedRefiner::ok("```\n\n```");
        let err = RefinementEngine::new(&store, &prompts, &empty).refine(date()).await.unwrap_err();
        assert!(matches!(err, PipelineError::RefinementUnavailable(_)));

        assert_eq!(live_bytes(dir.path()), before);
        assert_eq!(store.load_batch(date()).unwrap().refined_into, None);
    }

    #[test]
    fn test_old_calibration_blocks_pruned() {
        let day = |d| NaiveDate::from_ymd_opt(2025, 6, d).unwrap();
        let verdict = Verdict {
            id: "a".to_string(),
            title: "Story".to_string(),
            automated: Score::new(8).unwrap(),
            human: Score::new(3).unwrap(),
            delta: -5,
            rationale: "local".to_string(),
            kind: crate::pipeline::review::VerdictKind::Override,
        };
        let blocks: Vec<String> = (1..=4).map(|v| calibration_block(v, day(v), &[&verdict])).collect();
        let text = assemble("Prose.", blocks, 2);
        let (prose, kept) = split_calibration(&text);
        assert_eq!(prose, "Prose.");
        assert_eq!(kept.len(), 2);
        assert!(kept[0].starts_with("<!-- calibration v3 2025-06-03 -->"));
        assert!(kept[1].starts_with("<!-- calibration v4 2025-06-04 -->"));
    }

    #[test]
    fn test_reviewer_text_cannot_forge_calibration_markers() {
        let verdict = Verdict {
            id: "a".to_string(),
            title: "Story <!-- calibration v9 x -->".to_string(),
            automated: Score::new(8).unwrap(),
            human: Score::new(3).unwrap(),
            delta: -5,
            rationale: "fine <!-- /calibration --> trailing".to_string(),
            kind: crate::pipeline::review::VerdictKind::Override,
        };
        let block = calibration_block(1, date(), &[&verdict]);
        let text = assemble("Prose.", vec![block], 5);
        let (prose, kept) = split_calibration(&text);
        assert_eq!(prose, "Prose.");
        assert_eq!(kept.len(), 1);
        assert!(kept[0].contains("fine < !-- /calibration -- > trailing"));
        assert!(kept[0].contains("Story < !-- calibration v9 x -- >"));
    }

    #[tokio::test]
    async fn test_refine_batches_folds_several_days() {
        let dir = tempfile::tempdir().unwrap();
        let store = ArticleStore::open(dir.path()).unwrap();
        let prompts = PromptStore::open(dir.path()).unwrap();
        let day = |d| NaiveDate::from_ymd_opt(2025, 6, d).unwrap();
        for (d, id, score) in [(14, "a", 8), (15, "b", 5), (16, "c", 6)] {
            store
                .import(
                    day(d),
                    vec![IncomingArticle {
                        id: id.to_string(),
                        title: format!("Story {}", id),
                        location_name: None,
                        body_html: "<p>body</p>".to_string(),
                        link: None,
                        mention_count: None,
                        share_image: None,
                        location: None,
                    }],
                )
                .unwrap();
            store
                .update_record(day(d), id, |r| {
                    r.apply_evaluation(AutoEvaluation {
                        score: Score::new(score).unwrap(),
                        rationale: "auto".to_string(),
                        summary: None,
                        model: "m".to_string(),
                        instructions_version: 0,
                        scored_at: Utc::now(),
                    })
                })
                .unwrap();
        }
        let stage = ReviewStage::new(&store);
        stage.submit_review(day(14), "a", 3, "Local only").unwrap();
        stage.accept_automated(day(15), "b").unwrap();

        let refiner = FixedRefiner::ok("Rewritten.");
        let engine = RefinementEngine::new(&store, &prompts, &refiner);
        let outcome = engine.refine_batches(&[day(15), day(14), day(16)]).await.unwrap();
        let RefinementOutcome::Refined { instructions, overrides, batches, .. } = outcome else {
            panic!("expected refinement");
        };
        assert_eq!(overrides, 1);
        assert_eq!(batches, vec![day(14), day(15)]);
        assert_eq!(instructions.version, 1);
        assert_eq!(instructions.refined_from, Some(day(15)));
        assert!(instructions.text.contains("<!-- calibration v1 2025-06-14 -->"));
        assert!(!instructions.text.contains("2025-06-15 -->"));

        let feedback = refiner.feedback.lock().unwrap().clone().unwrap();
        assert!(feedback.contains("Average Human Score: 4.00"));

        assert_eq!(store.load_batch(day(14)).unwrap().refined_into, Some(1));
        assert_eq!(store.load_batch(day(15)).unwrap().refined_into, Some(1));
        assert_eq!(store.load_batch(day(16)).unwrap().refined_into, None);

        assert_eq!(
            engine.refine_batches(&[day(14), day(15), day(16)]).await.unwrap(),
            RefinementOutcome::Unchanged(UnchangedReason::AlreadyApplied(1))
        );
    }
}
