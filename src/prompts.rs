//! Prompt text for the COA analysis step.
//!
//! Centralising every prompt here serves two purposes:
//!
//! 1. **Single source of truth**: changing how products are summarized
//!    requires editing exactly one place.
//!
//! 2. **Testability**: unit tests can inspect the exact prompt a request
//!    will carry without calling a real service.
//!
//! Callers can override both texts via
//! [`crate::config::PipelineConfig::system_prompt`] and
//! [`crate::config::PipelineConfig::template`]; the constants here are used
//! only when no override is provided.

/// Default system persona for the analysis service.
///
/// Used when `PipelineConfig::system_prompt` is `None`.
pub const SYSTEM_PERSONA: &str =
    "You are a budtender who explains cannabis products to customers.";

/// Default analysis template, sent ahead of the extracted text.
///
/// Used when neither `PipelineConfig::template` nor
/// `PipelineConfig::template_path` is set.
pub const DEFAULT_ANALYSIS_TEMPLATE: &str = "Here is the content of a COA (Certificate of Analysis) page for a cannabis product. Please briefly summarize what the product is and any important information:";

/// Build the user-message prompt: template first, extracted text after a
/// blank line.
pub fn compose_prompt(template: &str, extracted_text: &str) -> String {
    format!("{}\n\n{}", template, extracted_text)
}
