//! Output types: the JSON artifact rows and the run summary.

use crate::model::RefinedTable;
use serde::{Deserialize, Serialize};

/// One table of the `tables.json` artifact.
///
/// Every row is a list of cell strings in column order; cells without text
/// are rendered as `""`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableJson {
    pub table_id: usize,
    /// 1-based page the table starts on.
    pub page: usize,
    pub headers: Vec<Vec<String>>,
    pub rows: Vec<Vec<String>>,
}

/// Counters and timings for one extraction run.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExtractionSummary {
    /// Pages in the source document.
    pub total_pages: usize,
    /// Pages rasterised and sent through the detectors.
    pub processed_pages: usize,
    /// Table fragments detected before stitching.
    pub fragments: usize,
    /// Fragments the stitcher skipped for bad geometry.
    pub skipped_fragments: usize,
    /// Logical tables emitted.
    pub tables: usize,
    /// Pages whose OCR result was dropped (1-based, ascending).
    pub dropped_ocr_pages: Vec<usize>,
    /// Page at which OCR left accelerated mode, if it did.
    pub ocr_degraded_at: Option<usize>,
    pub refined_tables: usize,
    /// Tables that fell back to their unrefined form.
    pub unrefined_tables: usize,
    /// Tables that were not sent for refinement at all.
    pub skipped_refinement: usize,
    pub rasterize_duration_ms: u64,
    pub layout_duration_ms: u64,
    pub structure_duration_ms: u64,
    pub ocr_duration_ms: u64,
    pub refine_duration_ms: u64,
    pub total_duration_ms: u64,
}

/// Everything a run produced.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExtractionOutput {
    pub tables: Vec<TableJson>,
    /// Tables as they left the refiner, with their refinement outcome.
    pub refined: Vec<RefinedTable>,
    pub summary: ExtractionSummary,
}

/// Basic facts about an input document, obtained without running any model.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DocumentInfo {
    pub kind: DocumentKind,
    pub page_count: usize,
}

/// Format of the input document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DocumentKind {
    Pdf,
    Image,
}
