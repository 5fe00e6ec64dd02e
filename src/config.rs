//! Configuration types for the scan-to-analysis pipeline.
//!
//! All pipeline behaviour is controlled through [`PipelineConfig`], built via
//! its [`PipelineConfigBuilder`]. Keeping every knob in one struct makes it
//! trivial to share a config across tasks, log it, and diff two runs to
//! understand why their outputs differ.
//!
//! # Design choice: builder over constructor
//! A fifteen-field constructor is unreadable and breaks on every new field.
//! The builder lets callers set only what they care about and rely on
//! well-documented defaults for the rest.

use crate::error::ScanError;
use crate::pipeline::analyze::ChatService;
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

/// Configuration for a scan-to-analysis pipeline.
///
/// Built via [`PipelineConfig::builder()`] or using
/// [`PipelineConfig::default()`].
///
/// # Example
/// ```rust
/// use coascan::PipelineConfig;
///
/// let config = PipelineConfig::builder()
///     .max_pages(3)
///     .model("gpt-4.1-mini")
///     .build()
///     .unwrap();
/// ```
#[derive(Clone)]
pub struct PipelineConfig {
    /// Seconds a scanned code is suppressed from re-triggering. Default: 5.
    ///
    /// A camera pointed at a label decodes the same QR code many times per
    /// second. Five seconds is long enough to absorb an entire aiming pass
    /// and short enough that deliberately re-scanning a label still works.
    pub cooldown_secs: u64,

    /// Maximum number of PDF pages to extract, from page 1. Default: 5.
    ///
    /// Certificates of Analysis put the product summary and cannabinoid
    /// table on the first pages; later pages are chromatograms and lab
    /// boilerplate that add tokens without adding signal.
    pub max_pages: usize,

    /// Maximum characters of extracted text kept after all pages are
    /// concatenated. Default: 5000.
    ///
    /// One cap applied once, after concatenation, so the page headers and
    /// early pages always survive whole rather than each page losing its
    /// tail independently.
    pub max_chars: usize,

    /// Optional relay endpoint prepended to every document fetch.
    ///
    /// When set, the fetcher requests `{relay_endpoint}{url-encoded target}`
    /// instead of the target directly. Useful when documents sit behind a
    /// CORS-restricted or geo-fenced host that a relay can reach.
    pub relay_endpoint: Option<String>,

    /// Chat model identifier. Default: "gpt-4.1-mini".
    pub model: String,

    /// Sampling temperature for the analysis completion. Default: 0.7.
    ///
    /// Summaries read better with some variation in phrasing; 0.7 keeps the
    /// factual content stable while avoiding the stilted tone of 0.0.
    pub temperature: f32,

    /// Maximum tokens the service may generate per analysis. Default: 2048.
    ///
    /// A COA summary is a few paragraphs. 2048 leaves generous headroom so
    /// a long cannabinoid table never truncates the reply mid-sentence.
    pub max_tokens: usize,

    /// Base URL of the chat-completions API. Default: OpenAI's.
    pub api_base: String,

    /// API key for the analysis service.
    ///
    /// If None, `OPENAI_API_KEY` is read from the environment at analysis
    /// time. A missing key fails the analysis stage, never construction.
    pub api_key: Option<String>,

    /// Custom system persona. If None, uses the built-in default.
    pub system_prompt: Option<String>,

    /// Inline analysis template. Takes precedence over `template_path`.
    pub template: Option<String>,

    /// Path to a plain-text analysis template file.
    pub template_path: Option<PathBuf>,

    /// Document fetch timeout in seconds. Default: 30.
    pub fetch_timeout_secs: u64,

    /// Per-analysis-call timeout in seconds. Default: 60.
    pub api_timeout_secs: u64,

    /// Number of history records retained, oldest dropped first.
    /// Default: Some(100). None disables the cap.
    ///
    /// Enforced by the store: pass this to
    /// [`crate::history::HistoryStore::with_limit`] when opening one.
    pub history_limit: Option<usize>,

    /// Pre-constructed chat service. Takes precedence over `api_key` and
    /// the environment; mainly useful for tests and middleware.
    pub service: Option<Arc<dyn ChatService>>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            cooldown_secs: 5,
            max_pages: 5,
            max_chars: 5000,
            relay_endpoint: None,
            model: "gpt-4.1-mini".to_string(),
            temperature: 0.7,
            max_tokens: 2048,
            api_base: "https://api.openai.com/v1".to_string(),
            api_key: None,
            system_prompt: None,
            template: None,
            template_path: None,
            fetch_timeout_secs: 30,
            api_timeout_secs: 60,
            history_limit: Some(crate::history::DEFAULT_HISTORY_LIMIT),
            service: None,
        }
    }
}

impl fmt::Debug for PipelineConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PipelineConfig")
            .field("cooldown_secs", &self.cooldown_secs)
            .field("max_pages", &self.max_pages)
            .field("max_chars", &self.max_chars)
            .field("relay_endpoint", &self.relay_endpoint)
            .field("model", &self.model)
            .field("temperature", &self.temperature)
            .field("max_tokens", &self.max_tokens)
            .field("api_base", &self.api_base)
            .field("api_key", &self.api_key.as_ref().map(|_| "<redacted>"))
            .field("template", &self.template)
            .field("template_path", &self.template_path)
            .field("fetch_timeout_secs", &self.fetch_timeout_secs)
            .field("api_timeout_secs", &self.api_timeout_secs)
            .field("history_limit", &self.history_limit)
            .field("service", &self.service.as_ref().map(|_| "<dyn ChatService>"))
            .finish()
    }
}

impl PipelineConfig {
    /// Create a new builder for `PipelineConfig`.
    pub fn builder() -> PipelineConfigBuilder {
        PipelineConfigBuilder {
            config: Self::default(),
        }
    }
}

/// Builder for [`PipelineConfig`].
#[derive(Debug)]
pub struct PipelineConfigBuilder {
    config: PipelineConfig,
}

impl PipelineConfigBuilder {
    pub fn cooldown_secs(mut self, secs: u64) -> Self {
        self.config.cooldown_secs = secs;
        self
    }

    pub fn max_pages(mut self, n: usize) -> Self {
        self.config.max_pages = n.max(1);
        self
    }

    pub fn max_chars(mut self, n: usize) -> Self {
        self.config.max_chars = n.max(1);
        self
    }

    pub fn relay_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.config.relay_endpoint = Some(endpoint.into());
        self
    }

    pub fn model(mut self, model: impl Into<String>) -> Self {
        self.config.model = model.into();
        self
    }

    pub fn temperature(mut self, t: f32) -> Self {
        self.config.temperature = t.clamp(0.0, 2.0);
        self
    }

    pub fn max_tokens(mut self, n: usize) -> Self {
        self.config.max_tokens = n;
        self
    }

    pub fn api_base(mut self, base: impl Into<String>) -> Self {
        self.config.api_base = base.into();
        self
    }

    pub fn api_key(mut self, key: impl Into<String>) -> Self {
        self.config.api_key = Some(key.into());
        self
    }

    pub fn system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.config.system_prompt = Some(prompt.into());
        self
    }

    pub fn template(mut self, template: impl Into<String>) -> Self {
        self.config.template = Some(template.into());
        self
    }

    pub fn template_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.template_path = Some(path.into());
        self
    }

    pub fn fetch_timeout_secs(mut self, secs: u64) -> Self {
        self.config.fetch_timeout_secs = secs;
        self
    }

    pub fn api_timeout_secs(mut self, secs: u64) -> Self {
        self.config.api_timeout_secs = secs;
        self
    }

    pub fn history_limit(mut self, limit: Option<usize>) -> Self {
        self.config.history_limit = limit;
        self
    }

    pub fn service(mut self, service: Arc<dyn ChatService>) -> Self {
        self.config.service = Some(service);
        self
    }

    /// Build the configuration, validating constraints.
    pub fn build(self) -> Result<PipelineConfig, ScanError> {
        let c = &self.config;
        if c.max_pages == 0 {
            return Err(ScanError::InvalidConfig("max_pages must be ≥ 1".into()));
        }
        if c.max_chars == 0 {
            return Err(ScanError::InvalidConfig("max_chars must be ≥ 1".into()));
        }
        if c.api_base.is_empty() {
            return Err(ScanError::InvalidConfig("api_base must not be empty".into()));
        }
        if let Some(limit) = c.history_limit {
            if limit == 0 {
                return Err(ScanError::InvalidConfig(
                    "history_limit must be ≥ 1 (use None for unlimited)".into(),
                ));
            }
        }
        Ok(self.config)
    }
}
