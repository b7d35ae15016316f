//! Extraction entry points.
//!
//! [`extract`] runs every stage and returns the tables in memory;
//! [`extract_to_dir`] additionally writes `tables.json`. Both return `Ok` as
//! long as the document could be read and both detectors ran. Dropped OCR
//! pages, skipped fragments and refinement fallbacks are reported in the
//! [`ExtractionSummary`], not as errors.

use crate::backend::Backends;
use crate::config::ExtractionConfig;
use crate::error::TableExtractError;
use crate::model::RefinedTable;
use crate::output::{DocumentInfo, ExtractionOutput, ExtractionSummary};
use crate::pipeline::{
    input, ocr_lines_for_table, DocumentAssembler, LayoutDetector, Rasterizer, TableRefiner,
    TableStitcher, TableStructureDetector, TextRecognizer,
};
use crate::progress::Stage;
use std::io::Write;
use std::path::Path;
use std::time::Instant;
use tracing::{debug, info, warn};

/// Name of the artifact written by [`extract_to_dir`].
pub const TABLES_FILE_NAME: &str = "tables.json";

/// Extract every table of a PDF or image (local path or URL).
///
/// # Errors
/// Returns `Err(TableExtractError)` only for fatal errors:
/// - the input cannot be found, read, downloaded or decoded
/// - the page selection matches no page
/// - layout or table-structure detection failed
pub async fn extract(
    input_str: impl AsRef<str>,
    backends: Backends,
    config: &ExtractionConfig,
) -> Result<ExtractionOutput, TableExtractError> {
    let total_start = Instant::now();
    let input_str = input_str.as_ref();
    info!("Starting extraction: {}", input_str);

    let Backends {
        layout,
        structure,
        ocr_accelerated,
        ocr_degraded,
        reasoning,
    } = backends;
    let progress = config.progress_callback.clone();
    let stage_start = |stage: Stage| {
        if let Some(ref cb) = progress {
            cb.on_stage_start(stage);
        }
        Instant::now()
    };
    let stage_done = |stage: Stage, started: Instant| -> u64 {
        if let Some(ref cb) = progress {
            cb.on_stage_complete(stage);
        }
        started.elapsed().as_millis() as u64
    };

    let mut summary = ExtractionSummary::default();

    // ── Step 1: Resolve input ────────────────────────────────────────────
    let resolved = input::resolve_input(input_str, config.download_timeout_secs).await?;

    // ── Step 2: Rasterise ────────────────────────────────────────────────
    let rasterizer = Rasterizer::from_config(config);
    summary.total_pages = rasterizer.page_count(resolved.path(), resolved.kind()).await?;

    let started = stage_start(Stage::Rasterize);
    let pages = rasterizer.rasterize(resolved.path(), resolved.kind()).await?;
    summary.rasterize_duration_ms = stage_done(Stage::Rasterize, started);
    summary.processed_pages = pages.len();
    info!(
        "Rasterised {}/{} pages in {}ms",
        pages.len(),
        summary.total_pages,
        summary.rasterize_duration_ms
    );

    if let Some(ref cb) = progress {
        cb.on_extraction_start(pages.len());
    }

    // ── Step 3: Layout ───────────────────────────────────────────────────
    let started = stage_start(Stage::Layout);
    let layouts = LayoutDetector::new(layout, config.layout_batch_size)
        .run(&pages)
        .await?;
    summary.layout_duration_ms = stage_done(Stage::Layout, started);

    // ── Step 4: Table structure ──────────────────────────────────────────
    let started = stage_start(Stage::Structure);
    let tables = TableStructureDetector::new(structure, config.table_batch_size)
        .run(&pages)
        .await?;
    summary.structure_duration_ms = stage_done(Stage::Structure, started);
    summary.fragments = tables.iter().map(|t| t.fragments.len()).sum();

    // ── Step 5: OCR ──────────────────────────────────────────────────────
    let started = stage_start(Stage::Ocr);
    let ocr = TextRecognizer::new(ocr_accelerated, ocr_degraded, config.ocr_workers)
        .with_progress(progress.clone())
        .run(&pages, &config.languages)
        .await;
    summary.ocr_duration_ms = stage_done(Stage::Ocr, started);
    summary.dropped_ocr_pages = ocr.dropped_pages();
    summary.dropped_ocr_pages.sort_unstable();
    summary.ocr_degraded_at = ocr.degraded_at;
    drop(pages);

    // ── Step 6: Stitch ───────────────────────────────────────────────────
    let started = stage_start(Stage::Stitch);
    let stitched = TableStitcher::new(config.merge_gap_px).stitch(&tables, &layouts);
    stage_done(Stage::Stitch, started);
    summary.skipped_fragments = stitched.skipped.len();
    summary.tables = stitched.tables.len();

    // ── Step 7: Refine ───────────────────────────────────────────────────
    let started = stage_start(Stage::Refine);
    let refined: Vec<RefinedTable> = match reasoning.filter(|_| config.refine) {
        Some(service) => {
            let refiner = TableRefiner::from_config(service, config);
            let mut refined = Vec::with_capacity(stitched.tables.len());
            for (table_id, table) in stitched.tables.into_iter().enumerate() {
                let lines = ocr_lines_for_table(&table, &ocr.texts);
                debug!("Table {}: {} OCR lines inside", table_id, lines.len());
                let result = refiner.refine(table_id, &table, &lines).await;
                if let Err(ref e) = result {
                    warn!("Table {}: refinement failed, keeping unrefined table: {}", table_id, e);
                }
                let r = RefinedTable::from_result(table, result);
                if let Some(ref cb) = progress {
                    cb.on_table_refined(table_id, r.is_refined());
                }
                refined.push(r);
            }
            refined
        }
        None => {
            debug!("Refinement disabled; passing tables through");
            stitched.tables.into_iter().map(RefinedTable::unrefined).collect()
        }
    };
    summary.refine_duration_ms = stage_done(Stage::Refine, started);
    summary.refined_tables = refined.iter().filter(|r| r.is_refined()).count();
    summary.unrefined_tables = refined.iter().filter(|r| r.fell_back()).count();
    summary.skipped_refinement = refined.len() - summary.refined_tables - summary.unrefined_tables;

    // ── Step 8: Assemble ─────────────────────────────────────────────────
    let started = stage_start(Stage::Assemble);
    let table_json = DocumentAssembler::new().assemble(&refined, &ocr.texts);
    stage_done(Stage::Assemble, started);

    summary.total_duration_ms = total_start.elapsed().as_millis() as u64;
    info!(
        "Extraction complete: {} tables from {} pages ({} OCR pages dropped, {} tables unrefined), {}ms total",
        summary.tables,
        summary.processed_pages,
        summary.dropped_ocr_pages.len(),
        summary.unrefined_tables,
        summary.total_duration_ms
    );

    if let Some(ref cb) = progress {
        cb.on_extraction_complete(&summary);
    }

    Ok(ExtractionOutput {
        tables: table_json,
        refined,
        summary,
    })
}

/// Extract tables and write `<output_dir>/tables.json`.
///
/// Uses atomic write (temp file + rename) to prevent partial files.
pub async fn extract_to_dir(
    input_str: impl AsRef<str>,
    output_dir: impl AsRef<Path>,
    backends: Backends,
    config: &ExtractionConfig,
) -> Result<ExtractionSummary, TableExtractError> {
    let output = extract(input_str, backends, config).await?;
    let dir = output_dir.as_ref();
    let path = dir.join(TABLES_FILE_NAME);

    tokio::fs::create_dir_all(dir)
        .await
        .map_err(|e| TableExtractError::OutputWriteFailed {
            path: dir.to_path_buf(),
            source: e,
        })?;

    let json = serde_json::to_vec_pretty(&output.tables)
        .map_err(|e| TableExtractError::Internal(format!("Failed to serialise tables: {}", e)))?;

    let tmp_path = path.with_extension("json.tmp");
    tokio::fs::write(&tmp_path, &json)
        .await
        .map_err(|e| TableExtractError::OutputWriteFailed {
            path: path.clone(),
            source: e,
        })?;

    tokio::fs::rename(&tmp_path, &path)
        .await
        .map_err(|e| TableExtractError::OutputWriteFailed {
            path: path.clone(),
            source: e,
        })?;

    info!("Wrote {} tables to {}", output.tables.len(), path.display());
    Ok(output.summary)
}

/// Synchronous wrapper around [`extract`].
///
/// Creates a temporary tokio runtime internally.
pub fn extract_sync(
    input_str: impl AsRef<str>,
    backends: Backends,
    config: &ExtractionConfig,
) -> Result<ExtractionOutput, TableExtractError> {
    tokio::runtime::Runtime::new()
        .map_err(|e| TableExtractError::Internal(format!("Failed to create tokio runtime: {}", e)))?
        .block_on(extract(input_str, backends, config))
}

/// Extract tables from document bytes held in memory.
///
/// The bytes are written to a managed [`tempfile`] that is removed when
/// this function returns.
pub async fn extract_from_bytes(
    bytes: &[u8],
    backends: Backends,
    config: &ExtractionConfig,
) -> Result<ExtractionOutput, TableExtractError> {
    let mut tmp = tempfile::NamedTempFile::new()
        .map_err(|e| TableExtractError::Internal(format!("tempfile: {e}")))?;
    tmp.write_all(bytes)
        .map_err(|e| TableExtractError::Internal(format!("tempfile write: {e}")))?;
    let path = tmp.path().to_string_lossy().to_string();
    extract(&path, backends, config).await
}

/// Report the document kind and page count without running any model.
pub async fn inspect(input_str: impl AsRef<str>) -> Result<DocumentInfo, TableExtractError> {
    let config = ExtractionConfig::default();
    let resolved = input::resolve_input(input_str.as_ref(), config.download_timeout_secs).await?;
    let page_count = Rasterizer::from_config(&config)
        .page_count(resolved.path(), resolved.kind())
        .await?;
    Ok(DocumentInfo {
        kind: resolved.kind(),
        page_count,
    })
}
