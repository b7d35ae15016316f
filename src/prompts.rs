//! Prompts for the table refinement stage.
//!
//! Callers can override the system prompt via
//! [`crate::config::ExtractionConfig::system_prompt`]; the request body is
//! always rendered by [`render_refine_request`].

use crate::model::{MergedTable, TextLine};
use serde::Serialize;

/// Default system prompt for table refinement.
pub const DEFAULT_REFINE_SYSTEM_PROMPT: &str = r#"You are an expert at reconstructing tables from scanned documents.

You receive:
- TABLE: the detected cell grid of one logical table as JSON. Each cell has
  `page`, `row_id`, `col_id`, `bbox` ([x0, y0, x1, y1] in page pixels, y grows
  downward), `is_header` and `text` (often empty).
- OCR: the text lines recognised inside the table area, one per line, with
  their page and bounding box.

The table may span several pages. Rows were already renumbered so that
`row_id` increases in reading order across pages.

Your task:
1. Assign each OCR line to the cell whose box contains it.
2. Fix the text of each cell. Join multi-line cell text with a single space.
3. Do NOT invent cells. Use only the `row_id` / `col_id` pairs given in TABLE.
   Header flags are fixed; do not change them.

Output ONLY a JSON object of this exact shape, with no commentary:
{"cells": [{"row_id": 0, "col_id": 0, "text": "..."}]}"#;

#[derive(Serialize)]
struct CellPayload<'a> {
    page: usize,
    row_id: u32,
    col_id: u32,
    bbox: [f32; 4],
    is_header: bool,
    text: &'a str,
}

#[derive(Serialize)]
struct TablePayload<'a> {
    table_id: usize,
    pages: Vec<usize>,
    columns: usize,
    cells: Vec<CellPayload<'a>>,
}

/// Render the user message: table geometry as JSON plus the OCR transcript.
pub fn render_refine_request(table_id: usize, table: &MergedTable, lines: &[TextLine]) -> String {
    let payload = TablePayload {
        table_id,
        pages: table.pages(),
        columns: table.column_count(),
        cells: table
            .cells()
            .map(|(page, c)| CellPayload {
                page,
                row_id: c.row_id,
                col_id: c.col_id,
                bbox: c.bbox.into(),
                is_header: c.is_header,
                text: &c.text,
            })
            .collect(),
    };
    // Serialising plain structs of numbers and strings cannot fail.
    let table_json = serde_json::to_string_pretty(&payload).unwrap_or_default();

    let transcript = lines
        .iter()
        .map(|l| {
            format!(
                "[p{} {:.0},{:.0},{:.0},{:.0}] {}",
                l.page, l.bbox.x0, l.bbox.y0, l.bbox.x1, l.bbox.y1, l.text
            )
        })
        .collect::<Vec<_>>()
        .join("\n");

    format!(
        "TABLE:\n{}\n\nOCR:\n{}\n\nReturn only the JSON output.",
        table_json,
        if transcript.is_empty() { "(no text recognised)" } else { &transcript }
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{BBox, Cell, TableFragment};

    #[test]
    fn request_embeds_geometry_and_transcript() {
        let table = MergedTable::from_fragment(TableFragment {
            page: 2,
            bbox: BBox::new(0.0, 0.0, 100.0, 20.0),
            cells: vec![Cell {
                row_id: 0,
                col_id: 1,
                bbox: BBox::new(50.0, 0.0, 100.0, 20.0),
                is_header: true,
                text: String::new(),
            }],
        });
        let lines = vec![TextLine {
            page: 2,
            bbox: BBox::new(55.0, 2.0, 95.0, 18.0),
            text: "Rate".into(),
            confidence: 0.98,
        }];

        let req = render_refine_request(7, &table, &lines);
        assert!(req.contains("\"table_id\": 7"));
        assert!(req.contains("\"col_id\": 1"));
        assert!(req.contains("[p2 55,2,95,18] Rate"));
    }

    #[test]
    fn empty_transcript_is_marked() {
        let table = MergedTable { fragments: vec![] };
        assert!(render_refine_request(0, &table, &[]).contains("(no text recognised)"));
    }

    #[test]
    fn system_prompt_requests_cells_schema() {
        assert!(DEFAULT_REFINE_SYSTEM_PROMPT.contains("\"cells\""));
        assert!(!DEFAULT_REFINE_SYSTEM_PROMPT.contains("\"is_header\": false"));
    }
}
