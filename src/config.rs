use std::path::PathBuf;
use std::time::Duration;

use chrono::NaiveDate;

/// Application-level constants
pub const APP_NAME: &str = "MedRouter";
pub const APP_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Characters of extracted text kept in error responses as a preview.
pub const OCR_PREVIEW_CHARS: usize = 500;

/// Characters of a raw model response attached to parse-failure diagnostics.
pub const PARSE_EXCERPT_CHARS: usize = 200;

/// Confidence assumed for cached text that carries no confidence of its own.
pub const DEFAULT_OCR_CONFIDENCE: f32 = 0.8;

/// Replaces any generated answer the safety validator rejects.
pub const SAFE_FALLBACK_MESSAGE: &str = "I can't provide a reliable answer to that from your records. \
     Please review the original documents or ask your healthcare provider.";

const ENV_LLM_TIMEOUT: &str = "MEDROUTER_LLM_TIMEOUT_SECS";
const ENV_EXTRACTION_TIMEOUT: &str = "MEDROUTER_EXTRACTION_TIMEOUT_SECS";
const ENV_STORAGE_TIMEOUT: &str = "MEDROUTER_STORAGE_TIMEOUT_SECS";
const ENV_RELEVANCE_THRESHOLD: &str = "MEDROUTER_RELEVANCE_THRESHOLD";
const ENV_ROUTING_CONFIDENCE: &str = "MEDROUTER_ROUTING_CONFIDENCE";
const ENV_DEFAULT_CATEGORY: &str = "MEDROUTER_DEFAULT_CATEGORY";

/// Default tracing filter when `RUST_LOG` is unset.
pub fn default_log_filter() -> &'static str {
    "medrouter=info,warn"
}

/// Get the application data directory (~/MedRouter/).
/// Falls back to the working directory when no home directory is known.
pub fn app_data_dir() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(APP_NAME)
}

/// Default location of the health record database.
pub fn database_path() -> PathBuf {
    app_data_dir().join("records.db")
}

/// Upper bounds for every external capability call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CapabilityTimeouts {
    pub llm: Duration,
    pub extraction: Duration,
    pub storage: Duration,
}

impl Default for CapabilityTimeouts {
    fn default() -> Self {
        Self {
            llm: Duration::from_secs(120),
            extraction: Duration::from_secs(120),
            storage: Duration::from_secs(15),
        }
    }
}

/// Tunables shared by both orchestrators and every domain handler.
#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    pub timeouts: CapabilityTimeouts,
    /// A handler must score strictly above this to join a fan-out.
    pub relevance_threshold: f32,
    /// Single-domain routes below this confidence widen to multi-domain.
    pub routing_confidence_threshold: f32,
    /// Category used when document classification is ambiguous.
    pub default_document_category: String,
    /// Route label used when question routing cannot be parsed.
    pub default_question_domain: String,
    /// Lookback for history loaded next to a freshly analyzed document.
    pub history_lookback_days: u32,
    pub history_limit: usize,
    /// Documents are truncated to this many characters inside prompts.
    pub max_prompt_chars: usize,
    pub max_steps: usize,
    /// Pins "today" for lookback windows; `None` uses the local date.
    pub reference_date: Option<NaiveDate>,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            timeouts: CapabilityTimeouts::default(),
            relevance_threshold: 0.5,
            routing_confidence_threshold: 0.6,
            default_document_category: "vitals".to_string(),
            default_question_domain: "multi_domain".to_string(),
            history_lookback_days: 180,
            history_limit: 20,
            max_prompt_chars: 8_000,
            max_steps: 50,
            reference_date: None,
        }
    }
}

impl OrchestratorConfig {
    /// Defaults overlaid with any `MEDROUTER_*` environment variables.
    /// Unparseable values are ignored with a warning.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = Self::default();

        if let Some(secs) = parse_var::<u64>(&lookup, ENV_LLM_TIMEOUT) {
            config.timeouts.llm = Duration::from_secs(secs);
        }
        if let Some(secs) = parse_var::<u64>(&lookup, ENV_EXTRACTION_TIMEOUT) {
            config.timeouts.extraction = Duration::from_secs(secs);
        }
        if let Some(secs) = parse_var::<u64>(&lookup, ENV_STORAGE_TIMEOUT) {
            config.timeouts.storage = Duration::from_secs(secs);
        }
        if let Some(threshold) = parse_var::<f32>(&lookup, ENV_RELEVANCE_THRESHOLD) {
            config.relevance_threshold = threshold.clamp(0.0, 1.0);
        }
        if let Some(threshold) = parse_var::<f32>(&lookup, ENV_ROUTING_CONFIDENCE) {
            config.routing_confidence_threshold = threshold.clamp(0.0, 1.0);
        }
        if let Some(category) = lookup(ENV_DEFAULT_CATEGORY) {
            let category = category.trim().to_lowercase();
            if !category.is_empty() {
                config.default_document_category = category;
            }
        }

        config
    }

    /// Today's date for lookback windows.
    pub fn today(&self) -> NaiveDate {
        self.reference_date
            .unwrap_or_else(|| chrono::Local::now().date_naive())
    }
}

fn parse_var<T: std::str::FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &str,
) -> Option<T> {
    let raw = lookup(key)?;
    match raw.trim().parse::<T>() {
        Ok(value) => Some(value),
        Err(_) => {
            tracing::warn!(variable = key, value = %raw, "Ignoring unparseable configuration value");
            None
        }
    }
}
