//! # edgequake-tables
//!
//! Reconstruct tables from scanned and born-digital documents, including
//! tables that continue across page breaks, and emit them as JSON.
//!
//! ## Pipeline Overview
//!
//! ```text
//! PDF / image
//!  │
//!  ├─ 1. Input      resolve local file or download from URL
//!  ├─ 2. Rasterize  render pages via pdfium (spawn_blocking)
//!  ├─ 3. Layout     label regions: table / text / figure
//!  ├─ 4. Structure  detect table fragments and their cell grid
//!  ├─ 5. OCR        accelerated tier, degraded worker pool on exhaustion
//!  ├─ 6. Stitch     merge fragments split by page breaks
//!  ├─ 7. Refine     best-effort LLM reconciliation, identity fallback
//!  └─ 8. Assemble   {table_id, page, headers, rows} per table
//! ```
//!
//! Detection and recognition models are reached through the traits in
//! [`backend`]; [`Backends::model_server`] wires all of them to one HTTP
//! model server. Refinement goes through any `edgequake-llm` provider or
//! directly to Gemini.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use edgequake_tables::{extract_to_dir, Backends, ExtractionConfig, LlmReasoningService};
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = ExtractionConfig::default();
//!     let reasoning = LlmReasoningService::from_config(&config)?;
//!     let backends = Backends::model_server("http://localhost:8008", config.model_timeout_secs)?
//!         .with_reasoning(Arc::new(reasoning));
//!     let summary = extract_to_dir("rates.pdf", "table_output", backends, &config).await?;
//!     eprintln!("{} tables, {} OCR pages dropped", summary.tables, summary.dropped_ocr_pages.len());
//!     Ok(())
//! }
//! ```
//!
//! ## Feature Flags
//!
//! | Feature | Default | Description |
//! |---------|---------|-------------|
//! | `cli`   | on      | Enables the `pdf2tables` binary (clap + anyhow + tracing-subscriber + indicatif) |
//!
//! Disable `cli` when using only the library:
//! ```toml
//! edgequake-tables = { version = "0.1", default-features = false }
//! ```

// ── Modules ──────────────────────────────────────────────────────────────

pub mod backend;
pub mod config;
pub mod error;
pub mod extract;
pub mod model;
pub mod output;
pub mod pipeline;
pub mod progress;
pub mod prompts;

// ── Re-exports ───────────────────────────────────────────────────────────

pub use backend::{
    Backends, GeminiReasoningService, LayoutModel, LlmReasoningService, ReasoningService,
    TableStructureModel, TextRecognitionModel,
};
pub use config::{ExtractionConfig, ExtractionConfigBuilder, PageSelection};
pub use error::{
    MergeGeometryError, ModelError, PageRecognitionError, RefinementError, TableExtractError,
};
pub use extract::{extract, extract_from_bytes, extract_sync, extract_to_dir, inspect};
pub use model::{
    BBox, Cell, LayoutLabel, LayoutRegion, MergedTable, Page, PageLayout, PageTables, PageText,
    RefinedTable, RefinementOutcome, TableFragment, TextLine,
};
pub use output::{DocumentInfo, DocumentKind, ExtractionOutput, ExtractionSummary, TableJson};
pub use progress::{ExtractionProgressCallback, NoopProgressCallback, ProgressCallback, Stage};
