//! Configuration types for table extraction.
//!
//! All extraction behaviour is controlled through [`ExtractionConfig`], built
//! via its [`ExtractionConfigBuilder`]. Which models answer the detection,
//! recognition and reasoning requests is chosen separately, through
//! [`crate::backend::Backends`].

use crate::error::TableExtractError;
use crate::progress::ProgressCallback;
use edgequake_llm::LLMProvider;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

/// Upper bound on degraded-mode OCR workers.
pub const MAX_OCR_WORKERS: usize = 6;

/// Configuration for one extraction run.
///
/// # Example
/// ```rust
/// use edgequake_tables::ExtractionConfig;
///
/// let config = ExtractionConfig::builder()
///     .dpi(200)
///     .languages(vec!["en".to_string(), "de".to_string()])
///     .merge_gap_px(40.0)
///     .build()
///     .unwrap();
/// ```
#[derive(Clone)]
pub struct ExtractionConfig {
    /// Rendering DPI used when rasterising each PDF page. Range: 72–400. Default: 150.
    pub dpi: u32,

    /// Maximum rendered image dimension (width or height) in pixels. Default: 2000.
    ///
    /// Applied after the DPI scale so an oversized page never allocates more
    /// than roughly `max_rendered_pixels²` pixels.
    pub max_rendered_pixels: u32,

    /// PDF user password for encrypted documents.
    pub password: Option<String>,

    /// Page selection. Default: All pages. Ignored for raster-image input.
    pub pages: PageSelection,

    /// OCR language hints. Default: `["en"]`.
    pub languages: Vec<String>,

    /// Pages per layout-detection request. Default: 8.
    pub layout_batch_size: usize,

    /// Pages per table-recognition request. Default: 16.
    pub table_batch_size: usize,

    /// Degraded-mode OCR worker count. Default: available cores, capped at
    /// [`MAX_OCR_WORKERS`].
    pub ocr_workers: usize,

    /// Largest vertical gap (pixels, exclusive) between the last row of one
    /// fragment and the first row of the next for them to merge. Default: 50.
    pub merge_gap_px: f32,

    /// Run the reasoning-service refinement pass. Default: true.
    pub refine: bool,

    /// LLM model identifier for [`crate::backend::LlmReasoningService`].
    pub model: Option<String>,

    /// LLM provider name (e.g. "openai", "gemini", "ollama").
    pub provider_name: Option<String>,

    /// Pre-constructed LLM provider. Takes precedence over `provider_name`.
    pub provider: Option<Arc<dyn LLMProvider>>,

    /// Sampling temperature for refinement calls. Default: 0.0.
    pub temperature: f32,

    /// Maximum tokens the reasoning service may generate per table. Default: 8192.
    pub max_tokens: usize,

    /// Retry attempts on a transient refinement failure. Default: 3.
    pub max_retries: u32,

    /// Initial retry delay in milliseconds; doubles on each attempt. Default: 500.
    pub retry_backoff_ms: u64,

    /// Per-refinement-call timeout in seconds. Default: 60.
    pub api_timeout_secs: u64,

    /// Per-model-server request timeout in seconds. Default: 300.
    pub model_timeout_secs: u64,

    /// Download timeout for URL inputs in seconds. Default: 120.
    pub download_timeout_secs: u64,

    /// Custom refinement system prompt. If None, uses the built-in one.
    pub system_prompt: Option<String>,

    /// Optional observer for stage, page and table events.
    pub progress_callback: Option<ProgressCallback>,
}

impl Default for ExtractionConfig {
    fn default() -> Self {
        Self {
            dpi: 150,
            max_rendered_pixels: 2000,
            password: None,
            pages: PageSelection::default(),
            languages: vec!["en".to_string()],
            layout_batch_size: 8,
            table_batch_size: 16,
            ocr_workers: default_ocr_workers(),
            merge_gap_px: 50.0,
            refine: true,
            model: None,
            provider_name: None,
            provider: None,
            temperature: 0.0,
            max_tokens: 8192,
            max_retries: 3,
            retry_backoff_ms: 500,
            api_timeout_secs: 60,
            model_timeout_secs: 300,
            download_timeout_secs: 120,
            system_prompt: None,
            progress_callback: None,
        }
    }
}

/// Available cores, capped at [`MAX_OCR_WORKERS`].
pub fn default_ocr_workers() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1)
        .clamp(1, MAX_OCR_WORKERS)
}

impl fmt::Debug for ExtractionConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExtractionConfig")
            .field("dpi", &self.dpi)
            .field("max_rendered_pixels", &self.max_rendered_pixels)
            .field("pages", &self.pages)
            .field("languages", &self.languages)
            .field("layout_batch_size", &self.layout_batch_size)
            .field("table_batch_size", &self.table_batch_size)
            .field("ocr_workers", &self.ocr_workers)
            .field("merge_gap_px", &self.merge_gap_px)
            .field("refine", &self.refine)
            .field("model", &self.model)
            .field("provider_name", &self.provider_name)
            .field("provider", &self.provider.as_ref().map(|_| "<dyn LLMProvider>"))
            .field("max_retries", &self.max_retries)
            .field(
                "progress_callback",
                &self.progress_callback.as_ref().map(|_| "<dyn ExtractionProgressCallback>"),
            )
            .finish()
    }
}

impl ExtractionConfig {
    /// Create a new builder for `ExtractionConfig`.
    pub fn builder() -> ExtractionConfigBuilder {
        ExtractionConfigBuilder {
            config: Self::default(),
        }
    }
}

/// Builder for [`ExtractionConfig`].
pub struct ExtractionConfigBuilder {
    config: ExtractionConfig,
}

impl fmt::Debug for ExtractionConfigBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExtractionConfigBuilder")
            .field("config", &self.config)
            .finish()
    }
}

impl ExtractionConfigBuilder {
    pub fn dpi(mut self, dpi: u32) -> Self {
        self.config.dpi = dpi.clamp(72, 400);
        self
    }

    pub fn max_rendered_pixels(mut self, px: u32) -> Self {
        self.config.max_rendered_pixels = px.max(100);
        self
    }

    pub fn password(mut self, pwd: impl Into<String>) -> Self {
        self.config.password = Some(pwd.into());
        self
    }

    pub fn pages(mut self, selection: PageSelection) -> Self {
        self.config.pages = selection;
        self
    }

    pub fn languages(mut self, langs: Vec<String>) -> Self {
        self.config.languages = langs;
        self
    }

    pub fn layout_batch_size(mut self, n: usize) -> Self {
        self.config.layout_batch_size = n;
        self
    }

    pub fn table_batch_size(mut self, n: usize) -> Self {
        self.config.table_batch_size = n;
        self
    }

    pub fn ocr_workers(mut self, n: usize) -> Self {
        self.config.ocr_workers = n.clamp(1, MAX_OCR_WORKERS);
        self
    }

    pub fn merge_gap_px(mut self, px: f32) -> Self {
        self.config.merge_gap_px = px;
        self
    }

    pub fn refine(mut self, v: bool) -> Self {
        self.config.refine = v;
        self
    }

    pub fn model(mut self, model: impl Into<String>) -> Self {
        self.config.model = Some(model.into());
        self
    }

    pub fn provider_name(mut self, name: impl Into<String>) -> Self {
        self.config.provider_name = Some(name.into());
        self
    }

    pub fn provider(mut self, provider: Arc<dyn LLMProvider>) -> Self {
        self.config.provider = Some(provider);
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

    pub fn max_retries(mut self, n: u32) -> Self {
        self.config.max_retries = n;
        self
    }

    pub fn retry_backoff_ms(mut self, ms: u64) -> Self {
        self.config.retry_backoff_ms = ms;
        self
    }

    pub fn api_timeout_secs(mut self, secs: u64) -> Self {
        self.config.api_timeout_secs = secs;
        self
    }

    pub fn model_timeout_secs(mut self, secs: u64) -> Self {
        self.config.model_timeout_secs = secs;
        self
    }

    pub fn download_timeout_secs(mut self, secs: u64) -> Self {
        self.config.download_timeout_secs = secs;
        self
    }

    pub fn system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.config.system_prompt = Some(prompt.into());
        self
    }

    pub fn progress_callback(mut self, cb: ProgressCallback) -> Self {
        self.config.progress_callback = Some(cb);
        self
    }

    /// Build the configuration, validating constraints.
    pub fn build(self) -> Result<ExtractionConfig, TableExtractError> {
        let c = &self.config;
        if c.dpi < 72 || c.dpi > 400 {
            return Err(TableExtractError::InvalidConfig(format!(
                "DPI must be 72–400, got {}",
                c.dpi
            )));
        }
        if c.layout_batch_size == 0 || c.table_batch_size == 0 {
            return Err(TableExtractError::InvalidConfig(
                "Batch sizes must be ≥ 1".into(),
            ));
        }
        if !c.merge_gap_px.is_finite() || c.merge_gap_px <= 0.0 {
            return Err(TableExtractError::InvalidConfig(format!(
                "Merge gap must be a positive number of pixels, got {}",
                c.merge_gap_px
            )));
        }
        if c.languages.iter().all(|l| l.trim().is_empty()) {
            return Err(TableExtractError::InvalidConfig(
                "At least one OCR language is required".into(),
            ));
        }
        Ok(self.config)
    }
}

// ── Enums ────────────────────────────────────────────────────────────────

/// Specifies which pages of the PDF to process.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub enum PageSelection {
    /// Process all pages (default).
    #[default]
    All,
    /// Process a single page (1-indexed).
    Single(usize),
    /// Process a contiguous range of pages (1-indexed, inclusive).
    Range(usize, usize),
    /// Process specific pages (1-indexed, deduplicated).
    Set(Vec<usize>),
}

impl PageSelection {
    /// Expand the selection into a sorted, deduplicated list of 0-indexed page numbers.
    pub fn to_indices(&self, total_pages: usize) -> Vec<usize> {
        let mut indices: Vec<usize> = match self {
            PageSelection::All => (0..total_pages).collect(),
            PageSelection::Single(p) => {
                if *p >= 1 && *p <= total_pages {
                    vec![p - 1]
                } else {
                    vec![]
                }
            }
            PageSelection::Range(start, end) => {
                let s = (*start).max(1) - 1;
                let e = (*end).min(total_pages);
                (s..e).collect()
            }
            PageSelection::Set(pages) => pages
                .iter()
                .filter(|&&p| p >= 1 && p <= total_pages)
                .map(|p| p - 1)
                .collect(),
        };
        indices.sort_unstable();
        indices.dedup();
        indices
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_values() {
        let c = ExtractionConfig::default();
        assert_eq!(c.languages, vec!["en".to_string()]);
        assert_eq!(c.layout_batch_size, 8);
        assert_eq!(c.table_batch_size, 16);
        assert_eq!(c.merge_gap_px, 50.0);
        assert!(c.ocr_workers >= 1 && c.ocr_workers <= MAX_OCR_WORKERS);
        assert!(c.refine);
    }

    #[test]
    fn builder_clamps_workers() {
        let c = ExtractionConfig::builder().ocr_workers(64).build().unwrap();
        assert_eq!(c.ocr_workers, MAX_OCR_WORKERS);
        let c = ExtractionConfig::builder().ocr_workers(0).build().unwrap();
        assert_eq!(c.ocr_workers, 1);
    }

    #[test]
    fn builder_rejects_bad_values() {
        assert!(ExtractionConfig::builder().merge_gap_px(0.0).build().is_err());
        assert!(ExtractionConfig::builder().merge_gap_px(f32::NAN).build().is_err());
        assert!(ExtractionConfig::builder().table_batch_size(0).build().is_err());
        assert!(ExtractionConfig::builder().languages(vec![]).build().is_err());
    }

    #[test]
    fn page_selection_to_indices() {
        assert_eq!(PageSelection::All.to_indices(3), vec![0, 1, 2]);
        assert_eq!(PageSelection::Single(3).to_indices(5), vec![2]);
        assert_eq!(PageSelection::Single(6).to_indices(5), Vec::<usize>::new());
        assert_eq!(PageSelection::Range(2, 4).to_indices(5), vec![1, 2, 3]);
        assert_eq!(PageSelection::Set(vec![3, 1, 3]).to_indices(5), vec![0, 2]);
    }
}
