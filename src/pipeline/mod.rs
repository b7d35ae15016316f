//! Pipeline stages for table extraction.
//!
//! Each submodule implements exactly one step. Stages that own a model take
//! `self` by value in `run` and release the model before returning, so only
//! one heavy model is resident at a time.
//!
//! ## Data Flow
//!
//! ```text
//! input ─▶ rasterize ─▶ layout ─▶ structure ─▶ ocr ─▶ stitch ─▶ refine ─▶ assemble
//! (path/URL) (pdfium)   (regions)  (fragments)  (lines) (tables)  (LLM)    (JSON)
//! ```
//!
//! 1. [`input`]    : resolve a path or URL and sniff PDF vs image
//! 2. [`rasterize`]: render selected pages in `spawn_blocking`
//! 3. [`layout`]   : label page regions, batched
//! 4. [`structure`]: detect table fragments and cell grids, batched
//! 5. [`ocr`]      : recognise text with the accelerated/degraded state machine
//! 6. [`stitch`]   : merge fragments across page boundaries
//! 7. [`refine`]   : best-effort reconciliation through a reasoning service
//!    ([`reply`] parses what comes back)
//! 8. [`assemble`] : build header and data rows per table
//!
//! [`encode`] turns pages into base64 PNG for the model-server client.

pub mod assemble;
pub mod encode;
pub mod input;
pub mod layout;
pub mod ocr;
pub mod rasterize;
pub mod refine;
pub mod reply;
pub mod stitch;
pub mod structure;

pub use assemble::DocumentAssembler;
pub use layout::LayoutDetector;
pub use ocr::{OcrRun, TextRecognizer};
pub use rasterize::Rasterizer;
pub use refine::{ocr_lines_for_table, TableRefiner};
pub use stitch::{StitchOutcome, TableStitcher};
pub use structure::TableStructureDetector;
