//! Configuration management
//!
//! Evaluator and refiner backends, pipeline thresholds, ingestion query and
//! storage locations, read from a TOML file with per-field defaults.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::agent::llm::OPENROUTER_BASE_URL;
use crate::pipeline::{DedupPolicy, RefineOptions, SummaryOptions};

/// Main configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Chat-completions provider and models
    #[serde(default)]
    pub llm: LlmConfig,
    /// Scoring, review and summary settings
    #[serde(default)]
    pub pipeline: PipelineConfig,
    /// Prompt refinement settings
    #[serde(default)]
    pub refine: RefineConfig,
    /// GDELT query
    #[serde(default)]
    pub ingest: IngestConfig,
    #[serde(default)]
    pub paths: PathsConfig,
    /// Review server
    #[serde(default)]
    pub server: ServerConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmConfig {
    /// OpenAI-compatible base URL
    #[serde(default = "default_base_url")]
    pub base_url: String,
    /// Environment variable checked before the keyring
    #[serde(default = "default_api_key_env")]
    pub api_key_env: String,
    #[serde(default = "default_evaluator_model")]
    pub evaluator_model: String,
    #[serde(default = "default_refiner_model")]
    pub refiner_model: String,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
    /// Sampling temperature for scoring calls
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    #[serde(default = "default_llm_timeout")]
    pub timeout_secs: u64,
}

fn default_base_url() -> String {
    OPENROUTER_BASE_URL.to_string()
}

fn default_api_key_env() -> String {
    "OPENROUTER_API_KEY".to_string()
}

fn default_evaluator_model() -> String {
    "google/gemini-2.0-flash-001".to_string()
}

fn default_refiner_model() -> String {
    "google/gemini-2.0-flash-001".to_string()
}

fn default_max_tokens() -> u32 {
    512
}

fn default_temperature() -> f32 {
    0.2
}

fn default_llm_timeout() -> u64 {
    60
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            api_key_env: default_api_key_env(),
            evaluator_model: default_evaluator_model(),
            refiner_model: default_refiner_model(),
            max_tokens: default_max_tokens(),
            temperature: default_temperature(),
            timeout_secs: default_llm_timeout(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Minimum effective score for the output set
    #[serde(default = "default_threshold")]
    pub threshold: u8,
    /// Largest |human - automated| still counted as agreement
    #[serde(default)]
    pub agree_tolerance: u8,
    /// Evaluator calls in flight during scoring
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,
    #[serde(default)]
    pub dedup: DedupPolicy,
    /// Word-overlap cut-off for fuzzy dedup
    #[serde(default = "default_similarity")]
    pub similarity: f64,
}

fn default_threshold() -> u8 {
    7
}

fn default_concurrency() -> usize {
    4
}

fn default_similarity() -> f64 {
    0.7
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            threshold: default_threshold(),
            agree_tolerance: 0,
            concurrency: default_concurrency(),
            dedup: DedupPolicy::default(),
            similarity: default_similarity(),
        }
    }
}

impl PipelineConfig {
    pub fn summary_options(&self) -> SummaryOptions {
        SummaryOptions {
            threshold: self.threshold,
            policy: self.dedup,
            similarity: self.similarity,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RefineBackend {
    /// Rewrite the instructions with the refiner model
    #[default]
    Llm,
    /// Keep the wording, append calibration notes only
    Notes,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RefineConfig {
    #[serde(default)]
    pub backend: RefineBackend,
    /// Calibration blocks kept in the instruction text
    #[serde(default = "default_max_calibration_blocks")]
    pub max_calibration_blocks: usize,
    #[serde(default = "default_refine_temperature")]
    pub temperature: f32,
}

fn default_max_calibration_blocks() -> usize {
    5
}

fn default_refine_temperature() -> f32 {
    0.7
}

impl Default for RefineConfig {
    fn default() -> Self {
        Self {
            backend: RefineBackend::default(),
            max_calibration_blocks: default_max_calibration_blocks(),
            temperature: default_refine_temperature(),
        }
    }
}

impl Config {
    /// Refinement options combining `[refine]` with the pipeline's tolerance
    pub fn refine_options(&self, force: bool) -> RefineOptions {
        RefineOptions {
            tolerance: self.pipeline.agree_tolerance,
            max_calibration_blocks: self.refine.max_calibration_blocks,
            force,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IngestConfig {
    #[serde(default = "default_gdelt_endpoint")]
    pub endpoint: String,
    #[serde(default = "default_query")]
    pub query: String,
    #[serde(default = "default_mode")]
    pub mode: String,
    #[serde(default = "default_timespan")]
    pub timespan: String,
    #[serde(default = "default_max_records")]
    pub max_records: usize,
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
    #[serde(default = "default_ingest_timeout")]
    pub timeout_secs: u64,
}

fn default_gdelt_endpoint() -> String {
    "https://api.gdeltproject.org/api/v2/geo/geo".to_string()
}

fn default_query() -> String {
    "landslide".to_string()
}

fn default_mode() -> String {
    "PointData".to_string()
}

fn default_timespan() -> String {
    "1d".to_string()
}

fn default_max_records() -> usize {
    10
}

fn default_user_agent() -> String {
    format!("news-select/{}", crate::VERSION)
}

fn default_ingest_timeout() -> u64 {
    15
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            endpoint: default_gdelt_endpoint(),
            query: default_query(),
            mode: default_mode(),
            timespan: default_timespan(),
            max_records: default_max_records(),
            user_agent: default_user_agent(),
            timeout_secs: default_ingest_timeout(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PathsConfig {
    /// Batches, instructions and summaries; the platform data dir when unset
    #[serde(default)]
    pub data_dir: Option<PathBuf>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    8300
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

impl Config {
    /// Load configuration from `path`, writing defaults there if it is missing
    pub fn load_from(path: &Path) -> Result<Self> {
        if path.exists() {
            let contents = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read config file {}", path.display()))?;
            let config: Config = toml::from_str(&contents)
                .with_context(|| format!("Failed to parse config file {}", path.display()))?;
            Ok(config)
        } else {
            let config = Config::default();
            config.save_to(path)?;
            Ok(config)
        }
    }

    /// Save configuration to `path`
    pub fn save_to(&self, path: &Path) -> Result<()> {
        let parent = path.parent()
            .context("Config path has no parent")?;

        std::fs::create_dir_all(parent)
            .context("Failed to create config directory")?;

        let contents = toml::to_string_pretty(self)
            .context("Failed to serialize config")?;

        std::fs::write(path, contents)
            .context("Failed to write config file")?;

        Ok(())
    }

    /// Resolved data directory
    pub fn data_dir(&self) -> Result<PathBuf> {
        match &self.paths.data_dir {
            Some(dir) => Ok(dir.clone()),
            None => data_dir(),
        }
    }
}

fn project_dirs() -> Result<directories::ProjectDirs> {
    directories::ProjectDirs::from("com", "news-select", "news-select")
        .context("Failed to get project directories")
}

/// Get the configuration file path
pub fn config_path() -> Result<PathBuf> {
    Ok(project_dirs()?.config_dir().join("config.toml"))
}

/// Get the data directory path
pub fn data_dir() -> Result<PathBuf> {
    Ok(project_dirs()?.data_dir().to_path_buf())
}

/// Print the effective configuration
pub fn show_config(config: &Config, path: &Path) -> Result<()> {
    println!("Config file: {}", path.display());
    println!("Data dir:    {}", config.data_dir()?.display());
    println!();

    println!("Evaluator:");
    println!("  base url:   {}", config.llm.base_url);
    println!("  model:      {}", config.llm.evaluator_model);
    println!("  api key:    {}", if crate::security::has_api_key(&config.llm.api_key_env) { "configured" } else { "missing" });

    println!("\nPipeline:");
    println!("  threshold:  {}", config.pipeline.threshold);
    println!("  tolerance:  {}", config.pipeline.agree_tolerance);
    println!("  fan-out:    {}", config.pipeline.concurrency);
    println!("  dedup:      {:?} (similarity {})", config.pipeline.dedup, config.pipeline.similarity);

    println!("\nRefinement:");
    println!("  backend:    {:?}", config.refine.backend);
    println!("  model:      {}", config.llm.refiner_model);
    println!("  calibration blocks kept: {}", config.refine.max_calibration_blocks);

    println!("\nIngestion:");
    println!("  query:      {} ({}, {}, max {})", config.ingest.query, config.ingest.mode, config.ingest.timespan, config.ingest.max_records);

    println!("\nReview server: http://{}:{}", config.server.host, config.server.port);
    Ok(())
}

/// Get default configuration as TOML string
pub fn default_config_toml() -> String {
    let config = Config::default();
    toml::to_string_pretty(&config).unwrap_or_else(|_| "# Default configuration\n".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.pipeline.threshold, 7);
        assert_eq!(config.pipeline.agree_tolerance, 0);
        assert_eq!(config.pipeline.dedup, DedupPolicy::Exact);
        assert_eq!(config.refine.backend, RefineBackend::Llm);
        assert_eq!(config.ingest.query, "landslide");
        assert_eq!(config.llm.base_url, OPENROUTER_BASE_URL);
    }

    #[test]
    fn test_partial_file_fills_defaults() {
        let config: Config = toml::from_str(
            r#"
            [pipeline]
            threshold = 8
            dedup = "fuzzy"

            [refine]
            backend = "notes"
            "#,
        )
        .unwrap();
        assert_eq!(config.pipeline.threshold, 8);
        assert_eq!(config.pipeline.dedup, DedupPolicy::Fuzzy);
        assert_eq!(config.pipeline.concurrency, 4);
        assert_eq!(config.refine.backend, RefineBackend::Notes);
        assert_eq!(config.refine.max_calibration_blocks, 5);
        assert_eq!(config.server.port, 8300);
    }

    #[test]
    fn test_load_writes_defaults_then_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("config.toml");
        let mut config = Config::load_from(&path).unwrap();
        assert!(path.exists());

        config.paths.data_dir = Some(dir.path().join("data"));
        config.save_to(&path).unwrap();
        let reloaded = Config::load_from(&path).unwrap();
        assert_eq!(reloaded.data_dir().unwrap(), dir.path().join("data"));
    }

    #[test]
    fn test_default_toml_parses() {
        let parsed: Config = toml::from_str(&default_config_toml()).unwrap();
        assert_eq!(parsed.pipeline.threshold, 7);
    }
}
