//! Application configuration structures.

use std::collections::HashMap;
use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{AppError, Result};
use crate::models::EntitySchema;

/// Root application configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Primary fetch tool settings
    #[serde(default)]
    pub http: HttpConfig,

    /// Secondary (headless browser) tool settings
    #[serde(default)]
    pub browser: BrowserSettings,

    /// Reasoning service client settings
    #[serde(default)]
    pub reasoning: ReasoningConfig,

    /// Per-domain throttling
    #[serde(default)]
    pub limiter: LimiterConfig,

    /// Escalation behavior
    #[serde(default)]
    pub orchestrator: OrchestratorConfig,

    /// Batch fan-out settings
    #[serde(default)]
    pub scheduler: SchedulerConfig,

    /// Deduplication rules
    #[serde(default)]
    pub dedup: DedupConfig,

    /// Checkpoint storage location
    #[serde(default)]
    pub storage: StorageConfig,

    /// Entity descriptor for extraction
    #[serde(default)]
    pub schema: EntitySchema,
}

impl Config {
    /// Load configuration from a TOML file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let content = fs::read_to_string(path)?;
        Ok(toml::from_str(&content)?)
    }

    /// Load configuration or return default if loading fails.
    pub fn load_or_default(path: impl AsRef<Path>) -> Self {
        Self::load(&path).unwrap_or_else(|e| {
            log::warn!(
                "Config load failed from {:?}: {}. Using defaults.",
                path.as_ref(),
                e
            );
            Self::default()
        })
    }

    /// Validate configuration values for basic sanity.
    pub fn validate(&self) -> Result<()> {
        if self.http.user_agent.trim().is_empty() {
            return Err(AppError::validation("http.user_agent is empty"));
        }
        if self.http.timeout_secs == 0 {
            return Err(AppError::validation("http.timeout_secs must be > 0"));
        }
        if self.browser.timeout_secs == 0 {
            return Err(AppError::validation("browser.timeout_secs must be > 0"));
        }
        if self.reasoning.timeout_secs == 0 {
            return Err(AppError::validation("reasoning.timeout_secs must be > 0"));
        }
        if self.reasoning.endpoint.trim().is_empty() {
            return Err(AppError::validation("reasoning.endpoint is empty"));
        }
        url::Url::parse(&self.reasoning.endpoint)?;
        if !(self.limiter.permits_per_second > 0.0) {
            return Err(AppError::validation(
                "limiter.permits_per_second must be > 0",
            ));
        }
        if let Some((domain, _)) = self
            .limiter
            .overrides
            .iter()
            .find(|(_, rate)| !(**rate > 0.0))
        {
            return Err(AppError::validation(format!(
                "limiter.overrides.{domain} must be > 0"
            )));
        }
        if self.orchestrator.max_attempts == 0 {
            return Err(AppError::validation(
                "orchestrator.max_attempts must be > 0",
            ));
        }
        if self.scheduler.batch_size == 0 {
            return Err(AppError::validation("scheduler.batch_size must be > 0"));
        }
        if self.scheduler.max_concurrency == 0 {
            return Err(AppError::validation(
                "scheduler.max_concurrency must be > 0",
            ));
        }
        if self.dedup.confidence_threshold > 100 {
            return Err(AppError::validation(
                "dedup.confidence_threshold must be within 0..=100",
            ));
        }
        if self.dedup.identity_field.trim().is_empty() {
            return Err(AppError::validation("dedup.identity_field is empty"));
        }
        self.schema.validate()?;
        if self.orchestrator.extraction == ExtractionMode::Selectors
            && self.schema.selectors.is_empty()
        {
            return Err(AppError::validation(
                "selector extraction requires schema.selectors",
            ));
        }
        Ok(())
    }
}

/// Primary fetch tool settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HttpConfig {
    /// User-Agent header for HTTP requests
    #[serde(default = "defaults::user_agent")]
    pub user_agent: String,

    /// Request timeout in seconds
    #[serde(default = "defaults::http_timeout")]
    pub timeout_secs: u64,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            user_agent: defaults::user_agent(),
            timeout_secs: defaults::http_timeout(),
        }
    }
}

/// Headless browser settings for the escalation tier.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BrowserSettings {
    /// Launch the browser tier at all
    #[serde(default = "defaults::enabled")]
    pub enabled: bool,

    /// Navigation + interaction deadline in seconds
    #[serde(default = "defaults::browser_timeout")]
    pub timeout_secs: u64,

    /// Wait after each interaction script, in milliseconds
    #[serde(default = "defaults::settle_ms")]
    pub settle_ms: u64,

    /// JavaScript snippets run in order after navigation
    #[serde(default)]
    pub scripts: Vec<String>,

    /// Explicit Chromium binary; auto-detected when unset
    #[serde(default)]
    pub chrome_path: Option<String>,
}

impl Default for BrowserSettings {
    fn default() -> Self {
        Self {
            enabled: defaults::enabled(),
            timeout_secs: defaults::browser_timeout(),
            settle_ms: defaults::settle_ms(),
            scripts: Vec::new(),
            chrome_path: None,
        }
    }
}

/// Reasoning service client settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReasoningConfig {
    /// OpenAI-compatible chat completions URL
    #[serde(default = "defaults::reasoning_endpoint")]
    pub endpoint: String,

    /// Model name sent with each request
    #[serde(default = "defaults::reasoning_model")]
    pub model: String,

    /// Environment variable holding the bearer token (optional)
    #[serde(default = "defaults::api_key_env")]
    pub api_key_env: String,

    /// Per-call deadline in seconds
    #[serde(default = "defaults::reasoning_timeout")]
    pub timeout_secs: u64,

    /// Sampling temperature
    #[serde(default)]
    pub temperature: f32,

    /// Page text budget for reasoning-based extraction
    #[serde(default = "defaults::max_content_chars")]
    pub max_content_chars: usize,
}

impl Default for ReasoningConfig {
    fn default() -> Self {
        Self {
            endpoint: defaults::reasoning_endpoint(),
            model: defaults::reasoning_model(),
            api_key_env: defaults::api_key_env(),
            timeout_secs: defaults::reasoning_timeout(),
            temperature: 0.0,
            max_content_chars: defaults::max_content_chars(),
        }
    }
}

/// Per-domain throttle settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LimiterConfig {
    /// Default permits per second for every domain
    #[serde(default = "defaults::permits_per_second")]
    pub permits_per_second: f64,

    /// Domain-specific rates (host name -> permits per second)
    #[serde(default)]
    pub overrides: HashMap<String, f64>,
}

impl Default for LimiterConfig {
    fn default() -> Self {
        Self {
            permits_per_second: defaults::permits_per_second(),
            overrides: HashMap::new(),
        }
    }
}

/// How fields are pulled out of fetched content.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExtractionMode {
    /// CSS selectors declared in the schema
    Selectors,
    /// Ask the reasoning service for a JSON object
    #[default]
    Reasoning,
}

/// Escalation settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrchestratorConfig {
    /// Upper bound on tier attempts per item
    #[serde(default = "defaults::max_attempts")]
    pub max_attempts: u32,

    /// Field extraction strategy
    #[serde(default)]
    pub extraction: ExtractionMode,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            max_attempts: defaults::max_attempts(),
            extraction: ExtractionMode::default(),
        }
    }
}

/// Batch fan-out settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    /// Checkpoint phase name
    #[serde(default = "defaults::phase")]
    pub phase: String,

    /// Items per checkpoint batch
    #[serde(default = "defaults::batch_size")]
    pub batch_size: usize,

    /// Concurrent items within a batch
    #[serde(default = "defaults::max_concurrency")]
    pub max_concurrency: usize,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            phase: defaults::phase(),
            batch_size: defaults::batch_size(),
            max_concurrency: defaults::max_concurrency(),
        }
    }
}

/// Deduplication rules.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DedupConfig {
    /// Field holding the record's identity (e.g. a name)
    #[serde(default = "defaults::identity_field")]
    pub identity_field: String,

    /// Field (or metadata key) grouping records into comparison scopes
    #[serde(default)]
    pub scope_field: Option<String>,

    /// Minimum confidence for a fuzzy "equivalent" verdict
    #[serde(default = "defaults::confidence_threshold")]
    pub confidence_threshold: u8,

    /// Run the reasoning-backed second stage
    #[serde(default = "defaults::enabled")]
    pub fuzzy_enabled: bool,
}

impl Default for DedupConfig {
    fn default() -> Self {
        Self {
            identity_field: defaults::identity_field(),
            scope_field: None,
            confidence_threshold: defaults::confidence_threshold(),
            fuzzy_enabled: defaults::enabled(),
        }
    }
}

/// Checkpoint storage location.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    #[serde(default = "defaults::checkpoint_dir")]
    pub checkpoint_dir: String,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            checkpoint_dir: defaults::checkpoint_dir(),
        }
    }
}

mod defaults {
    // Fetch defaults
    pub fn user_agent() -> String {
        "Mozilla/5.0 (compatible; harvester/0.1)".into()
    }
    pub fn http_timeout() -> u64 {
        30
    }
    pub fn browser_timeout() -> u64 {
        45
    }
    pub fn settle_ms() -> u64 {
        750
    }
    pub fn enabled() -> bool {
        true
    }

    // Reasoning defaults
    pub fn reasoning_endpoint() -> String {
        "http://localhost:11434/v1/chat/completions".into()
    }
    pub fn reasoning_model() -> String {
        "llama3.1".into()
    }
    pub fn api_key_env() -> String {
        "REASONING_API_KEY".into()
    }
    pub fn reasoning_timeout() -> u64 {
        60
    }
    pub fn max_content_chars() -> usize {
        12_000
    }

    // Pipeline defaults
    pub fn permits_per_second() -> f64 {
        1.0
    }
    pub fn max_attempts() -> u32 {
        3
    }
    pub fn phase() -> String {
        "acquire".into()
    }
    pub fn batch_size() -> usize {
        10
    }
    pub fn max_concurrency() -> usize {
        5
    }
    pub fn identity_field() -> String {
        "name".into()
    }
    pub fn confidence_threshold() -> u8 {
        90
    }

    // Storage
    pub fn checkpoint_dir() -> String {
        "checkpoints".into()
    }
}
