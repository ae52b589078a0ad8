//! CLI interface for news-select

use anyhow::{Context, Result};
use chrono::{Local, NaiveDate};
use clap::{Parser, Subcommand};
use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::warn;

use crate::agent::evaluator::LlmEvaluator;
use crate::agent::llm::{ChatClient, ProviderConfig};
use crate::agent::refiner::{LlmRefiner, NotesRefiner, PromptRefiner};
use crate::config::{Config, RefineBackend};
use crate::error::PipelineError;
use crate::ingest::{load_raw_file, GdeltClient, RawArticle};
use crate::pipeline::{
    save_summary, summarize, write_summary, RefinementEngine, RefinementOutcome, ReviewProgress, ReviewStage,
    ScoringStage,
};
use crate::prompt::PromptStore;
use crate::store::{ArticleRecord, ArticleStore, IncomingArticle};

#[derive(Parser)]
#[command(name = "news-select")]
#[command(about = "Daily news selection with LLM scoring, human review and prompt refinement", long_about = None)]
#[command(version)]
struct Cli {
    /// Config file (default: platform config dir)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Fetch today's articles from GDELT into the batch
    Extract {
        #[arg(long, value_parser = parse_date)]
        date: Option<NaiveDate>,
    },
    /// Import a JSON array of raw articles into the batch
    Import {
        file: PathBuf,
        #[arg(long, value_parser = parse_date)]
        date: Option<NaiveDate>,
    },
    /// Score unscored articles with the current instructions
    Score {
        #[arg(long, value_parser = parse_date)]
        date: Option<NaiveDate>,
        /// Override the configured fan-out
        #[arg(long)]
        concurrency: Option<usize>,
    },
    /// Review scored articles in the terminal
    Review {
        #[arg(long, value_parser = parse_date)]
        date: Option<NaiveDate>,
    },
    /// Start the review web server
    Serve {
        #[arg(short, long)]
        port: Option<u16>,
        #[arg(long)]
        host: Option<String>,
    },
    /// Fold the batch's human verdicts into the instruction set
    RefinePrompt {
        #[arg(long, value_parser = parse_date)]
        date: Option<NaiveDate>,
        /// Fold every archived batch from this day through --date into one refinement
        #[arg(long, value_parser = parse_date)]
        since: Option<NaiveDate>,
        /// Refine even if a batch was already applied
        #[arg(long)]
        force: bool,
    },
    /// Write the deduplicated output set for the batch
    Summarize {
        #[arg(long, value_parser = parse_date)]
        date: Option<NaiveDate>,
        /// Output path (default: <data_dir>/summaries/DATE.json)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
    /// Show review progress per batch
    Status {
        #[arg(long, value_parser = parse_date)]
        date: Option<NaiveDate>,
    },
    /// Inspect or replace the instruction set
    Prompt {
        #[command(subcommand)]
        command: PromptCommands,
    },
    /// Configure news-select
    Config {
        #[command(subcommand)]
        command: ConfigCommands,
    },
}

#[derive(Subcommand)]
enum PromptCommands {
    /// Print the live instruction set
    Show,
    /// List archived versions
    History,
    /// Install the contents of FILE as the next version
    Set { file: PathBuf },
}

#[derive(Subcommand)]
enum ConfigCommands {
    /// Show the effective configuration
    Show,
    /// Store the LLM API key in the OS keyring
    SetApiKey { key: String },
    /// Remove the stored LLM API key
    DeleteApiKey,
    /// Print the default configuration
    Defaults,
}

fn parse_date(s: &str) -> std::result::Result<NaiveDate, String> {
    NaiveDate::parse_from_str(s, "%Y-%m-%d").map_err(|e| format!("expected YYYY-MM-DD: {}", e))
}

fn resolve_date(date: Option<NaiveDate>) -> NaiveDate {
    date.unwrap_or_else(|| Local::now().date_naive())
}

/// Loaded configuration plus the stores it points at
struct App {
    config: Config,
    config_path: PathBuf,
    data_dir: PathBuf,
    store: ArticleStore,
    prompts: PromptStore,
}

impl App {
    fn open(config_path: Option<PathBuf>) -> Result<Self> {
        let config_path = match config_path {
            Some(path) => path,
            None => crate::config::config_path()?,
        };
        let config = Config::load_from(&config_path)?;
        let data_dir = config.data_dir()?;
        let store = ArticleStore::open(&data_dir)
            .with_context(|| format!("Failed to open batch store in {}", data_dir.display()))?;
        let prompts = PromptStore::open(&data_dir)
            .with_context(|| format!("Failed to open instruction store in {}", data_dir.display()))?;
        Ok(Self {
            config,
            config_path,
            data_dir,
            store,
            prompts,
        })
    }

    fn chat_client(&self) -> Result<ChatClient> {
        let api_key = crate::security::get_api_key(&self.config.llm.api_key_env)?;
        let provider = ProviderConfig::for_base_url(api_key, &self.config.llm.base_url);
        ChatClient::with_timeout(provider, Duration::from_secs(self.config.llm.timeout_secs))
    }

    fn refiner(&self) -> Result<Box<dyn PromptRefiner>> {
        Ok(match self.config.refine.backend {
            RefineBackend::Notes => Box::new(NotesRefiner),
            RefineBackend::Llm => Box::new(
                LlmRefiner::new(self.chat_client()?, self.config.llm.refiner_model.clone())
                    .with_temperature(self.config.refine.temperature),
            ),
        })
    }

    fn import(&self, date: NaiveDate, raw: Vec<RawArticle>) -> Result<()> {
        let incoming: Vec<IncomingArticle> = raw.into_iter().map(RawArticle::into_incoming).collect();
        let report = self.store.import(date, incoming)?;
        println!(
            "Batch {}: added {} articles ({} duplicates skipped)",
            date,
            report.added,
            report.duplicates.len()
        );
        Ok(())
    }
}

/// Run the CLI
pub async fn run() -> Result<()> {
    let cli = Cli::parse();
    let app = App::open(cli.config)?;

    match cli.command {
        Commands::Extract { date } => {
            let date = resolve_date(date);
            let raw = GdeltClient::new(app.config.ingest.clone())?.fetch().await?;
            if raw.is_empty() {
                println!("GDELT returned no articles.");
            }
            app.import(date, raw)?;
        }
        Commands::Import { file, date } => {
            app.import(resolve_date(date), load_raw_file(&file)?)?;
        }
        Commands::Score { date, concurrency } => {
            let date = resolve_date(date);
            let evaluator = LlmEvaluator::new(app.chat_client()?, app.config.llm.evaluator_model.clone())
                .with_max_tokens(app.config.llm.max_tokens)
                .with_temperature(app.config.llm.temperature);
            let instructions = app.prompts.current()?;
            let report = ScoringStage::new(&app.store, &evaluator)
                .with_concurrency(concurrency.unwrap_or(app.config.pipeline.concurrency))
                .run(date, &instructions)
                .await?;
            println!(
                "Batch {}: scored {}, failed {}, already scored {} (instructions v{})",
                date,
                report.scored,
                report.failed(),
                report.already_scored,
                instructions.version
            );
            for (id, err) in &report.failures {
                println!("  {} - {}", id, err);
            }
        }
        Commands::Review { date } => {
            review_loop(&app.store, resolve_date(date))?;
        }
        Commands::Serve { port, host } => {
            let state = crate::server::ServerState {
                store: Arc::new(app.store),
                summary_options: app.config.pipeline.summary_options(),
            };
            let host = host.unwrap_or(app.config.server.host);
            let port = port.unwrap_or(app.config.server.port);
            crate::server::start(&host, port, state).await?;
        }
        Commands::RefinePrompt { date, since, force } => {
            let date = resolve_date(date);
            let dates = match since {
                Some(since) => app
                    .store
                    .list_batches()?
                    .into_iter()
                    .filter(|d| (since..=date).contains(d))
                    .collect(),
                None => vec![date],
            };
            if dates.is_empty() {
                println!("No batches between {} and {}.", since.unwrap_or(date), date);
                return Ok(());
            }
            let refiner = app.refiner()?;
            let outcome = RefinementEngine::new(&app.store, &app.prompts, refiner.as_ref())
                .with_options(app.config.refine_options(force))
                .refine_batches(&dates)
                .await;
            match outcome {
                Ok(RefinementOutcome::Unchanged(reason)) => {
                    println!("Instructions unchanged: {}.", reason);
                }
                Ok(RefinementOutcome::Refined { previous_version, instructions, overrides, batches }) => {
                    println!(
                        "Instructions refined v{} -> v{} from {} override(s) across {} batch(es).",
                        previous_version,
                        instructions.version,
                        overrides,
                        batches.len()
                    );
                }
                Err(e @ PipelineError::RefinementUnavailable(_)) => {
                    warn!("{}", e);
                    println!("Refinement skipped, instructions unchanged: {}", e);
                }
                Err(e) => return Err(e.into()),
            }
        }
        Commands::Summarize { date, output } => {
            let date = resolve_date(date);
            let batch = app.store.load_batch(date)?;
            let entries = summarize(&batch, &app.config.pipeline.summary_options());
            let path = match output {
                Some(path) => {
                    write_summary(&path, &entries)
                        .with_context(|| format!("Failed to write {}", path.display()))?;
                    path
                }
                None => save_summary(&app.data_dir, date, &entries)?,
            };
            for entry in &entries {
                println!("[{:>2}] {}", entry.score, entry.title);
            }
            println!("{} stories written to {}", entries.len(), path.display());
        }
        Commands::Status { date } => {
            let dates = match date {
                Some(date) => vec![date],
                None => app.store.list_batches()?,
            };
            let live = app.prompts.current()?;
            println!("Instructions: v{}", live.version);
            if dates.is_empty() {
                println!("No batches yet.");
            }
            for date in dates {
                let batch = app.store.load_batch(date)?;
                print_progress(&ReviewProgress::of(&batch), batch.refined_into);
            }
        }
        Commands::Prompt { command } => match command {
            PromptCommands::Show => {
                let live = app.prompts.current()?;
                println!("# v{}{}", live.version, live.refined_from.map(|d| format!(" (from {})", d)).unwrap_or_default());
                println!("{}", live.text);
            }
            PromptCommands::History => {
                let history = app.prompts.history()?;
                if history.is_empty() {
                    println!("No archived versions.");
                }
                for set in history {
                    println!(
                        "v{:<4} {:<12} {} chars",
                        set.version,
                        set.refined_from.map(|d| d.to_string()).unwrap_or_else(|| "-".to_string()),
                        set.text.len()
                    );
                }
            }
            PromptCommands::Set { file } => {
                let text = std::fs::read_to_string(&file)
                    .with_context(|| format!("Failed to read {}", file.display()))?;
                if text.trim().is_empty() {
                    anyhow::bail!("{} is empty", file.display());
                }
                let installed = app.prompts.install_text(&text)?;
                println!("Installed instructions v{}", installed.version);
            }
        },
        Commands::Config { command } => match command {
            ConfigCommands::Show => crate::config::show_config(&app.config, &app.config_path)?,
            ConfigCommands::SetApiKey { key } => {
                crate::security::set_api_key(&key)?;
                println!("API key stored securely.");
            }
            ConfigCommands::DeleteApiKey => {
                crate::security::delete_api_key()?;
                println!("Stored API key removed.");
            }
            ConfigCommands::Defaults => print!("{}", crate::config::default_config_toml()),
        },
    }

    Ok(())
}

fn print_progress(progress: &ReviewProgress, refined_into: Option<u32>) {
    println!(
        "{}  {:>3} articles  {:>3} unscored  {:>3} pending  {:>3} reviewed{}",
        progress.date,
        progress.total,
        progress.unscored,
        progress.pending,
        progress.reviewed,
        refined_into.map(|v| format!("  refined into v{}", v)).unwrap_or_default()
    );
}

/// One line of reviewer input
#[derive(Debug, PartialEq)]
enum ReviewInput {
    Accept,
    Skip,
    Quit,
    Score(i64, String),
    Unknown,
}

fn parse_review_input(line: &str) -> ReviewInput {
    let line = line.trim();
    match line.to_lowercase().as_str() {
        "a" | "agree" => return ReviewInput::Accept,
        "s" | "skip" => return ReviewInput::Skip,
        "q" | "quit" | "exit" => return ReviewInput::Quit,
        _ => {}
    }
    let (head, rest) = line.split_once(char::is_whitespace).unwrap_or((line, ""));
    match head.parse::<i64>() {
        Ok(score) => ReviewInput::Score(score, rest.trim().to_string()),
        Err(_) => ReviewInput::Unknown,
    }
}

fn print_record(record: &ArticleRecord, position: usize, pending: usize) {
    println!();
    println!("── {} of {} pending ──", position, pending);
    println!("{}", record.title);
    if let Some(name) = &record.location_name {
        println!("  Location: {}", name);
    }
    if let Some(link) = &record.link {
        println!("  Link:     {}", link);
    }
    if let Some(eval) = &record.evaluation {
        println!("  Evaluator score: {}", eval.score);
        println!("  Rationale: {}", eval.rationale);
    }
}

/// Terminal review loop over the batch's pending records
fn review_loop(store: &ArticleStore, date: NaiveDate) -> Result<()> {
    let stage = ReviewStage::new(store);
    let mut skipped: HashSet<String> = HashSet::new();
    let mut rl = rustyline::DefaultEditor::new().context("Failed to start line editor")?;

    println!("Reviewing batch {}. Enter 'a' to agree, '<score> <rationale>' to override, 's' to skip, 'q' to quit.", date);
    loop {
        let pending = stage.pending(date)?;
        let total = pending.len();
        let Some((index, record)) = pending
            .into_iter()
            .enumerate()
            .find(|(_, r)| !skipped.contains(&r.id))
        else {
            let progress = stage.progress(date)?;
            if progress.is_complete() {
                println!("Batch {} fully reviewed.", date);
            } else {
                println!("{} article(s) left pending.", progress.pending);
            }
            break;
        };

        print_record(&record, index + 1, total);
        let line = match rl.readline("review> ") {
            Ok(line) => line,
            Err(rustyline::error::ReadlineError::Interrupted | rustyline::error::ReadlineError::Eof) => break,
            Err(e) => return Err(e).context("Failed to read input"),
        };
        let _ = rl.add_history_entry(line.as_str());

        let result = match parse_review_input(&line) {
            ReviewInput::Accept => stage.accept_automated(date, &record.id).map(|_| ()),
            ReviewInput::Score(score, rationale) => {
                stage.submit_review(date, &record.id, score, &rationale).map(|_| ())
            }
            ReviewInput::Skip => {
                skipped.insert(record.id);
                continue;
            }
            ReviewInput::Quit => break,
            ReviewInput::Unknown => {
                println!("Enter 'a', '<score 1-10> <rationale>', 's' or 'q'.");
                continue;
            }
        };
        match result {
            Ok(()) => {}
            Err(e @ (PipelineError::InvalidReview(_) | PipelineError::AlreadyReviewed { .. })) => {
                println!("{}", e);
            }
            Err(e) => return Err(e.into()),
        }
    }
    Ok(())
}
