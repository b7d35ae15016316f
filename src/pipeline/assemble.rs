//! Final assembly: refined tables → [`TableJson`] rows.
//!
//! Cells are grouped by `row_id` (ascending) and laid out by `col_id`, so a
//! row always has exactly `column_count` strings. Missing cells and cells
//! without text become `""`. A row is a header row iff its first cell (lowest
//! `col_id`) carries `is_header`.
//!
//! Cells the refiner left empty are filled from the OCR lines whose centre
//! falls inside the cell box on the cell's page.

use crate::model::{Cell, PageText, RefinedTable, TextLine};
use crate::output::TableJson;
use std::collections::{BTreeMap, HashMap};
use tracing::debug;

#[derive(Debug, Clone, Copy, Default)]
pub struct DocumentAssembler;

impl DocumentAssembler {
    pub fn new() -> Self {
        Self
    }

    /// One [`TableJson`] per refined table; `table_id` is the table's position.
    pub fn assemble(&self, refined: &[RefinedTable], texts: &[PageText]) -> Vec<TableJson> {
        let lines_by_page: HashMap<usize, &[TextLine]> =
            texts.iter().map(|t| (t.page, t.lines.as_slice())).collect();

        refined
            .iter()
            .enumerate()
            .map(|(table_id, r)| self.assemble_table(table_id, r, &lines_by_page))
            .collect()
    }

    fn assemble_table(
        &self,
        table_id: usize,
        refined: &RefinedTable,
        lines_by_page: &HashMap<usize, &[TextLine]>,
    ) -> TableJson {
        let table = &refined.table;
        let columns = table.column_count();

        let mut rows: BTreeMap<u32, Vec<(usize, &Cell)>> = BTreeMap::new();
        for (page, cell) in table.cells() {
            rows.entry(cell.row_id).or_default().push((page, cell));
        }

        let mut out = TableJson {
            table_id,
            page: table.page(),
            headers: Vec::new(),
            rows: Vec::new(),
        };

        for (_, mut cells) in rows {
            cells.sort_by_key(|(_, c)| c.col_id);
            let is_header = cells.first().map(|(_, c)| c.is_header).unwrap_or(false);

            let mut row = vec![String::new(); columns];
            for (page, cell) in cells {
                let text = if cell.text.is_empty() {
                    lines_by_page
                        .get(&page)
                        .map(|lines| text_in_cell(cell, lines))
                        .unwrap_or_default()
                } else {
                    cell.text.clone()
                };
                if let Some(slot) = row.get_mut(cell.col_id as usize) {
                    *slot = text;
                }
            }

            if is_header {
                out.headers.push(row);
            } else {
                out.rows.push(row);
            }
        }

        debug!(
            "Table {}: {} header rows, {} data rows, {} columns",
            table_id,
            out.headers.len(),
            out.rows.len(),
            columns
        );
        out
    }
}

/// OCR text whose line centre is inside the cell, top-to-bottom then left-to-right.
fn text_in_cell(cell: &Cell, lines: &[TextLine]) -> String {
    let mut inside: Vec<&TextLine> = lines
        .iter()
        .filter(|l| {
            let (x, y) = l.bbox.center();
            cell.bbox.contains_point(x, y)
        })
        .collect();
    inside.sort_by(|a, b| {
        a.bbox
            .y0
            .total_cmp(&b.bbox.y0)
            .then(a.bbox.x0.total_cmp(&b.bbox.x0))
    });
    inside
        .iter()
        .map(|l| l.text.trim())
        .filter(|t| !t.is_empty())
        .collect::<Vec<_>>()
        .join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{BBox, MergedTable, TableFragment};

    fn cell(row_id: u32, col_id: u32, header: bool, text: &str) -> Cell {
        Cell {
            row_id,
            col_id,
            bbox: BBox::new(
                col_id as f32 * 100.0,
                row_id as f32 * 20.0,
                col_id as f32 * 100.0 + 100.0,
                row_id as f32 * 20.0 + 20.0,
            ),
            is_header: header,
            text: text.into(),
        }
    }

    fn refined(page: usize, cells: Vec<Cell>) -> RefinedTable {
        RefinedTable::unrefined(MergedTable::from_fragment(TableFragment {
            page,
            bbox: BBox::new(0.0, 0.0, 300.0, 200.0),
            cells,
        }))
    }

    #[test]
    fn headers_and_rows_in_row_order() {
        let t = refined(
            3,
            vec![
                cell(1, 1, false, "b1"),
                cell(0, 0, true, "Name"),
                cell(1, 0, false, "a1"),
                cell(0, 1, true, "Value"),
            ],
        );
        let out = DocumentAssembler::new().assemble(&[t], &[]);
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].table_id, 0);
        assert_eq!(out[0].page, 3);
        assert_eq!(out[0].headers, vec![vec!["Name", "Value"]]);
        assert_eq!(out[0].rows, vec![vec!["a1", "b1"]]);
    }

    #[test]
    fn missing_cells_render_as_empty_strings() {
        let t = refined(
            1,
            vec![cell(0, 0, false, "x"), cell(0, 2, false, "z"), cell(1, 1, false, "")],
        );
        let out = DocumentAssembler::new().assemble(&[t], &[]);
        assert_eq!(out[0].rows, vec![vec!["x", "", "z"], vec!["", "", ""]]);
    }

    #[test]
    fn header_flag_comes_from_first_cell() {
        let t = refined(1, vec![cell(0, 0, false, "a"), cell(0, 1, true, "b")]);
        let out = DocumentAssembler::new().assemble(&[t], &[]);
        assert!(out[0].headers.is_empty());
        assert_eq!(out[0].rows.len(), 1);
    }

    #[test]
    fn empty_cells_take_ocr_text() {
        let t = refined(2, vec![cell(0, 0, false, ""), cell(0, 1, false, "kept")]);
        let texts = vec![PageText {
            page: 2,
            lines: vec![
                TextLine {
                    page: 2,
                    bbox: BBox::new(5.0, 10.0, 60.0, 18.0),
                    text: "world".into(),
                    confidence: 0.9,
                },
                TextLine {
                    page: 2,
                    bbox: BBox::new(5.0, 1.0, 60.0, 9.0),
                    text: "hello".into(),
                    confidence: 0.9,
                },
                TextLine {
                    page: 2,
                    bbox: BBox::new(105.0, 1.0, 160.0, 9.0),
                    text: "ignored".into(),
                    confidence: 0.9,
                },
            ],
        }];
        let out = DocumentAssembler::new().assemble(&[t], &texts);
        assert_eq!(out[0].rows, vec![vec!["hello world", "kept"]]);
    }

    #[test]
    fn table_ids_follow_input_order() {
        let tables = vec![
            refined(1, vec![cell(0, 0, false, "a")]),
            refined(2, vec![cell(0, 0, false, "b")]),
        ];
        let out = DocumentAssembler::new().assemble(&tables, &[]);
        let ids: Vec<usize> = out.iter().map(|t| t.table_id).collect();
        assert_eq!(ids, vec![0, 1]);
        assert_eq!(out[1].page, 2);
    }
}
