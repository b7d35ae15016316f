//! Progress-callback trait for stage, page and table events.
//!
//! Inject an [`Arc<dyn ExtractionProgressCallback>`] via
//! [`crate::config::ExtractionConfigBuilder::progress_callback`] to receive
//! events as the pipeline moves through its stages.
//!
//! # Example
//!
//! ```rust
//! use edgequake_tables::{ExtractionConfig, ExtractionProgressCallback};
//! use std::sync::{Arc, atomic::{AtomicUsize, Ordering}};
//!
//! struct DroppedPages(AtomicUsize);
//!
//! impl ExtractionProgressCallback for DroppedPages {
//!     fn on_page_dropped(&self, page: usize, _total: usize, error: &str) {
//!         self.0.fetch_add(1, Ordering::SeqCst);
//!         eprintln!("page {page} dropped: {error}");
//!     }
//! }
//!
//! let config = ExtractionConfig::builder()
//!     .progress_callback(Arc::new(DroppedPages(AtomicUsize::new(0))))
//!     .build()
//!     .unwrap();
//! ```

use crate::output::ExtractionSummary;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

/// Pipeline stages, in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Stage {
    Rasterize,
    Layout,
    Structure,
    Ocr,
    Stitch,
    Refine,
    Assemble,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Stage::Rasterize => "rasterize",
            Stage::Layout => "layout",
            Stage::Structure => "table structure",
            Stage::Ocr => "ocr",
            Stage::Stitch => "stitch",
            Stage::Refine => "refine",
            Stage::Assemble => "assemble",
        };
        f.write_str(name)
    }
}

/// Called by the extraction pipeline as it progresses.
///
/// Implementations must be `Send + Sync`: degraded-mode OCR reports pages
/// from concurrent worker tasks. All methods default to no-ops.
pub trait ExtractionProgressCallback: Send + Sync {
    /// Called once the document is rasterised and the page count is known.
    fn on_extraction_start(&self, total_pages: usize) {
        let _ = total_pages;
    }

    fn on_stage_start(&self, stage: Stage) {
        let _ = stage;
    }

    fn on_stage_complete(&self, stage: Stage) {
        let _ = stage;
    }

    /// A page's OCR result is available (either tier).
    fn on_page_recognized(&self, page: usize, total_pages: usize) {
        let _ = (page, total_pages);
    }

    /// A page's OCR result was dropped; it contributes no text.
    fn on_page_dropped(&self, page: usize, total_pages: usize, error: &str) {
        let _ = (page, total_pages, error);
    }

    /// The recognizer left accelerated mode at `page`.
    fn on_ocr_degraded(&self, page: usize) {
        let _ = page;
    }

    /// A table left the refiner; `refined` is false when it fell back.
    fn on_table_refined(&self, table_id: usize, refined: bool) {
        let _ = (table_id, refined);
    }

    fn on_extraction_complete(&self, summary: &ExtractionSummary) {
        let _ = summary;
    }
}

/// A no-op implementation for callers that don't need progress events.
pub struct NoopProgressCallback;

impl ExtractionProgressCallback for NoopProgressCallback {}

/// Convenience alias matching the type stored in [`crate::config::ExtractionConfig`].
pub type ProgressCallback = Arc<dyn ExtractionProgressCallback>;

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    #[derive(Default)]
    struct TrackingCallback {
        stages: Mutex<Vec<Stage>>,
        recognized: AtomicUsize,
        dropped: AtomicUsize,
    }

    impl ExtractionProgressCallback for TrackingCallback {
        fn on_stage_start(&self, stage: Stage) {
            self.stages.lock().unwrap().push(stage);
        }

        fn on_page_recognized(&self, _page: usize, _total: usize) {
            self.recognized.fetch_add(1, Ordering::SeqCst);
        }

        fn on_page_dropped(&self, _page: usize, _total: usize, _error: &str) {
            self.dropped.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[test]
    fn noop_callback_does_not_panic() {
        let cb = NoopProgressCallback;
        cb.on_extraction_start(5);
        cb.on_stage_start(Stage::Ocr);
        cb.on_ocr_degraded(3);
        cb.on_page_dropped(4, 5, "boom");
        cb.on_table_refined(0, false);
        cb.on_extraction_complete(&ExtractionSummary::default());
    }

    #[test]
    fn tracking_callback_receives_events() {
        let tracker = TrackingCallback::default();
        tracker.on_stage_start(Stage::Layout);
        tracker.on_stage_start(Stage::Ocr);
        tracker.on_page_recognized(1, 2);
        tracker.on_page_dropped(2, 2, "worker failed");

        assert_eq!(*tracker.stages.lock().unwrap(), vec![Stage::Layout, Stage::Ocr]);
        assert_eq!(tracker.recognized.load(Ordering::SeqCst), 1);
        assert_eq!(tracker.dropped.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn stage_display() {
        assert_eq!(Stage::Structure.to_string(), "table structure");
        assert_eq!(Stage::Refine.to_string(), "refine");
    }
}
