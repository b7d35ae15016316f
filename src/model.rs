//! Data model shared by every pipeline stage.
//!
//! All values are created inside a single extraction run and handed from one
//! stage to the next. Nothing is mutated after hand-off except the cell list of
//! a [`MergedTable`], which the stitcher extends while it accumulates
//! fragments.
//!
//! Coordinates are page pixels of the rasterised image, origin top-left, with
//! `y` growing downwards.

use crate::error::{MergeGeometryError, RefinementError};
use image::DynamicImage;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashSet};
use std::fmt;
use std::sync::Arc;

// ── Geometry ─────────────────────────────────────────────────────────────

/// Axis-aligned bounding box `(x0, y0, x1, y1)`.
///
/// Serialised as a four-element array, the shape every collaborator uses.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(from = "[f32; 4]", into = "[f32; 4]")]
pub struct BBox {
    pub x0: f32,
    pub y0: f32,
    pub x1: f32,
    pub y1: f32,
}

impl BBox {
    pub const fn new(x0: f32, y0: f32, x1: f32, y1: f32) -> Self {
        Self { x0, y0, x1, y1 }
    }

    pub fn width(&self) -> f32 {
        self.x1 - self.x0
    }

    pub fn height(&self) -> f32 {
        self.y1 - self.y0
    }

    pub fn center(&self) -> (f32, f32) {
        ((self.x0 + self.x1) / 2.0, (self.y0 + self.y1) / 2.0)
    }

    /// `true` if `other` lies fully inside `self` (edges inclusive on all four sides).
    pub fn contains(&self, other: &BBox) -> bool {
        other.x0 >= self.x0 && other.x1 <= self.x1 && other.y0 >= self.y0 && other.y1 <= self.y1
    }

    pub fn contains_point(&self, x: f32, y: f32) -> bool {
        x >= self.x0 && x <= self.x1 && y >= self.y0 && y <= self.y1
    }

    /// Finite coordinates with non-negative width and height.
    pub fn is_valid(&self) -> bool {
        [self.x0, self.y0, self.x1, self.y1]
            .iter()
            .all(|v| v.is_finite())
            && self.x1 >= self.x0
            && self.y1 >= self.y0
    }
}

impl From<[f32; 4]> for BBox {
    fn from(v: [f32; 4]) -> Self {
        BBox::new(v[0], v[1], v[2], v[3])
    }
}

impl From<BBox> for [f32; 4] {
    fn from(b: BBox) -> Self {
        [b.x0, b.y0, b.x1, b.y1]
    }
}

// ── Pages ────────────────────────────────────────────────────────────────

/// One rasterised page.
///
/// The image sits behind an `Arc` so OCR workers can hold a page without
/// copying pixels.
#[derive(Clone)]
pub struct Page {
    /// 1-based ordinal within the document.
    pub index: usize,
    pub image: Arc<DynamicImage>,
    pub width: u32,
    pub height: u32,
}

impl Page {
    pub fn new(index: usize, image: DynamicImage) -> Self {
        let (width, height) = (image.width(), image.height());
        Self {
            index,
            image: Arc::new(image),
            width,
            height,
        }
    }
}

impl fmt::Debug for Page {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Page")
            .field("index", &self.index)
            .field("width", &self.width)
            .field("height", &self.height)
            .finish()
    }
}

// ── Layout ───────────────────────────────────────────────────────────────

/// Content type of a layout region.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum LayoutLabel {
    Table,
    Text,
    Figure,
    Other,
}

impl LayoutLabel {
    /// Map a model's free-form label onto the four classes the stitcher cares about.
    pub fn from_model_label(label: &str) -> Self {
        match label.trim().to_ascii_lowercase().replace(['_', ' '], "-").as_str() {
            "table" | "table-of-contents" => LayoutLabel::Table,
            "text" | "paragraph" | "title" | "section-header" | "list-item" | "caption"
            | "footnote" | "page-header" | "page-footer" | "formula" => LayoutLabel::Text,
            "figure" | "picture" | "image" | "chart" => LayoutLabel::Figure,
            _ => LayoutLabel::Other,
        }
    }
}

/// A labelled area of one page.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LayoutRegion {
    pub page: usize,
    pub label: LayoutLabel,
    pub bbox: BBox,
}

/// Layout regions of one page.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PageLayout {
    pub page: usize,
    pub regions: Vec<LayoutRegion>,
}

// ── Tables ───────────────────────────────────────────────────────────────

/// One grid cell of a detected table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Cell {
    pub row_id: u32,
    pub col_id: u32,
    pub bbox: BBox,
    #[serde(default)]
    pub is_header: bool,
    /// Recognised text; empty until OCR or refinement fills it.
    #[serde(default)]
    pub text: String,
}

/// A table-like structure detected on a single page, before cross-page merging.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TableFragment {
    pub page: usize,
    pub bbox: BBox,
    pub cells: Vec<Cell>,
}

impl TableFragment {
    /// Check the fragment is usable by the stitcher.
    pub fn validate(&self) -> Result<(), MergeGeometryError> {
        if self.cells.is_empty() {
            return Err(MergeGeometryError::NoRows { page: self.page });
        }
        let mut seen = HashSet::with_capacity(self.cells.len());
        for cell in &self.cells {
            if cell.row_id == u32::MAX {
                return Err(MergeGeometryError::RowIdOverflow {
                    page: self.page,
                    row_id: cell.row_id,
                });
            }
            if !cell.bbox.is_valid() {
                return Err(MergeGeometryError::InvalidBox {
                    page: self.page,
                    row_id: cell.row_id,
                });
            }
            if !seen.insert((cell.row_id, cell.col_id)) {
                return Err(MergeGeometryError::DuplicateCell {
                    page: self.page,
                    row_id: cell.row_id,
                    col_id: cell.col_id,
                });
            }
        }
        Ok(())
    }

    pub fn min_row_id(&self) -> Option<u32> {
        self.cells.iter().map(|c| c.row_id).min()
    }

    pub fn max_row_id(&self) -> Option<u32> {
        self.cells.iter().map(|c| c.row_id).max()
    }

    /// Top edge of the first row.
    pub fn first_row_top(&self) -> Option<f32> {
        let first = self.min_row_id()?;
        self.cells
            .iter()
            .filter(|c| c.row_id == first)
            .map(|c| c.bbox.y0)
            .reduce(f32::min)
    }

    /// Bottom edge of the last row.
    pub fn last_row_bottom(&self) -> Option<f32> {
        let last = self.max_row_id()?;
        self.cells
            .iter()
            .filter(|c| c.row_id == last)
            .map(|c| c.bbox.y1)
            .reduce(f32::max)
    }

    /// Shift every row id by `offset`. Nothing changes when any id would overflow.
    pub fn offset_rows(&mut self, offset: u32) -> Result<(), MergeGeometryError> {
        if let Some(max) = self.max_row_id() {
            if max.checked_add(offset).is_none() {
                return Err(MergeGeometryError::RowIdOverflow {
                    page: self.page,
                    row_id: max,
                });
            }
        }
        for cell in &mut self.cells {
            cell.row_id += offset;
        }
        Ok(())
    }
}

/// Table fragments detected on one page.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PageTables {
    pub page: usize,
    pub fragments: Vec<TableFragment>,
}

// ── Text ─────────────────────────────────────────────────────────────────

/// One recognised line of text.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TextLine {
    pub page: usize,
    pub bbox: BBox,
    pub text: String,
    /// Recogniser confidence in `[0, 1]`.
    pub confidence: f32,
}

/// OCR output of one page.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PageText {
    pub page: usize,
    pub lines: Vec<TextLine>,
}

// ── Merged and refined tables ────────────────────────────────────────────

/// A logical table: one or more fragments concatenated in reading order.
///
/// Invariant: `(row_id, col_id)` is unique across all cells of all fragments.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MergedTable {
    pub fragments: Vec<TableFragment>,
}

impl MergedTable {
    pub fn from_fragment(fragment: TableFragment) -> Self {
        Self {
            fragments: vec![fragment],
        }
    }

    /// Page the table starts on (0 for a table with no fragments).
    pub fn page(&self) -> usize {
        self.fragments.first().map(|f| f.page).unwrap_or(0)
    }

    /// Distinct pages the table spans, ascending.
    pub fn pages(&self) -> Vec<usize> {
        self.fragments
            .iter()
            .map(|f| f.page)
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect()
    }

    /// Every cell paired with the page it was detected on.
    pub fn cells(&self) -> impl Iterator<Item = (usize, &Cell)> {
        self.fragments
            .iter()
            .flat_map(|f| f.cells.iter().map(move |c| (f.page, c)))
    }

    pub fn cell_count(&self) -> usize {
        self.fragments.iter().map(|f| f.cells.len()).sum()
    }

    pub fn max_row_id(&self) -> Option<u32> {
        self.fragments.iter().filter_map(|f| f.max_row_id()).max()
    }

    /// Number of columns: highest `col_id` plus one.
    pub fn column_count(&self) -> usize {
        self.cells()
            .map(|(_, c)| c.col_id as usize + 1)
            .max()
            .unwrap_or(0)
    }

    /// Bottom edge of the last row of the last fragment.
    pub fn last_row_bottom(&self) -> Option<f32> {
        self.fragments.last().and_then(|f| f.last_row_bottom())
    }

    /// Append a fragment below the existing rows.
    ///
    /// The fragment's row ids are shifted by `max_row_id + 1`; the applied
    /// offset is returned. On overflow the table is left untouched.
    pub fn append(&mut self, mut fragment: TableFragment) -> Result<u32, MergeGeometryError> {
        let offset = match self.max_row_id() {
            Some(max) => max.checked_add(1).ok_or(MergeGeometryError::RowIdOverflow {
                page: fragment.page,
                row_id: max,
            })?,
            None => 0,
        };
        fragment.offset_rows(offset)?;
        self.fragments.push(fragment);
        Ok(offset)
    }

    /// `true` when no two cells share a `(row_id, col_id)` pair.
    pub fn has_unique_cells(&self) -> bool {
        let mut seen = HashSet::with_capacity(self.cell_count());
        self.cells().all(|(_, c)| seen.insert((c.row_id, c.col_id)))
    }

    /// Mutable access to the cell at a grid position.
    pub fn cell_mut(&mut self, row_id: u32, col_id: u32) -> Option<&mut Cell> {
        self.fragments
            .iter_mut()
            .flat_map(|f| f.cells.iter_mut())
            .find(|c| c.row_id == row_id && c.col_id == col_id)
    }
}

/// What happened when a table went through the refiner.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum RefinementOutcome {
    /// The reasoning service reply was applied.
    Refined,
    /// Refinement failed; the table is the stitcher's output unchanged.
    Fallback { reason: RefinementError },
    /// No reasoning service was configured.
    Skipped,
}

/// A merged table after the (best-effort) refinement stage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RefinedTable {
    pub table: MergedTable,
    pub outcome: RefinementOutcome,
}

impl RefinedTable {
    /// Resolve a refinement result, falling back to `original` on failure.
    pub fn from_result(
        original: MergedTable,
        result: Result<MergedTable, RefinementError>,
    ) -> Self {
        match result {
            Ok(table) => Self {
                table,
                outcome: RefinementOutcome::Refined,
            },
            Err(reason) => Self {
                table: original,
                outcome: RefinementOutcome::Fallback { reason },
            },
        }
    }

    /// Pass a table through without refinement.
    pub fn unrefined(table: MergedTable) -> Self {
        Self {
            table,
            outcome: RefinementOutcome::Skipped,
        }
    }

    pub fn is_refined(&self) -> bool {
        matches!(self.outcome, RefinementOutcome::Refined)
    }

    pub fn fell_back(&self) -> bool {
        matches!(self.outcome, RefinementOutcome::Fallback { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cell(row_id: u32, col_id: u32, y0: f32, y1: f32) -> Cell {
        Cell {
            row_id,
            col_id,
            bbox: BBox::new(col_id as f32 * 100.0, y0, col_id as f32 * 100.0 + 90.0, y1),
            is_header: false,
            text: String::new(),
        }
    }

    #[test]
    fn bbox_serialises_as_array() {
        let json = serde_json::to_string(&BBox::new(1.0, 2.0, 3.0, 4.0)).unwrap();
        assert_eq!(json, "[1.0,2.0,3.0,4.0]");
        let back: BBox = serde_json::from_str("[1,2,3,4]").unwrap();
        assert_eq!(back, BBox::new(1.0, 2.0, 3.0, 4.0));
    }

    #[test]
    fn bbox_containment_is_edge_inclusive() {
        let outer = BBox::new(0.0, 0.0, 100.0, 100.0);
        assert!(outer.contains(&BBox::new(0.0, 0.0, 100.0, 100.0)));
        assert!(outer.contains(&BBox::new(10.0, 10.0, 20.0, 20.0)));
        assert!(!outer.contains(&BBox::new(10.0, 10.0, 101.0, 20.0)));
        assert!(!outer.contains(&BBox::new(-1.0, 10.0, 20.0, 20.0)));
    }

    #[test]
    fn layout_label_mapping() {
        assert_eq!(LayoutLabel::from_model_label("Table"), LayoutLabel::Table);
        assert_eq!(LayoutLabel::from_model_label("Section-header"), LayoutLabel::Text);
        assert_eq!(LayoutLabel::from_model_label("list_item"), LayoutLabel::Text);
        assert_eq!(LayoutLabel::from_model_label("Picture"), LayoutLabel::Figure);
        assert_eq!(LayoutLabel::from_model_label("stamp"), LayoutLabel::Other);
    }

    #[test]
    fn fragment_row_edges() {
        let frag = TableFragment {
            page: 1,
            bbox: BBox::new(0.0, 10.0, 300.0, 100.0),
            cells: vec![cell(0, 0, 10.0, 40.0), cell(0, 1, 12.0, 40.0), cell(1, 0, 40.0, 100.0)],
        };
        assert_eq!(frag.first_row_top(), Some(10.0));
        assert_eq!(frag.last_row_bottom(), Some(100.0));
        assert!(frag.validate().is_ok());
    }

    #[test]
    fn fragment_validation_rejects_empty_and_duplicates() {
        let empty = TableFragment {
            page: 3,
            bbox: BBox::default(),
            cells: vec![],
        };
        assert_eq!(empty.validate(), Err(MergeGeometryError::NoRows { page: 3 }));

        let dup = TableFragment {
            page: 1,
            bbox: BBox::default(),
            cells: vec![cell(0, 0, 0.0, 10.0), cell(0, 0, 0.0, 10.0)],
        };
        assert!(matches!(
            dup.validate(),
            Err(MergeGeometryError::DuplicateCell { .. })
        ));
    }

    #[test]
    fn append_offsets_row_ids() {
        let a = TableFragment {
            page: 1,
            bbox: BBox::default(),
            cells: (0..3).map(|r| cell(r, 0, r as f32 * 10.0, r as f32 * 10.0 + 10.0)).collect(),
        };
        let b = TableFragment {
            page: 2,
            bbox: BBox::default(),
            cells: (0..2).map(|r| cell(r, 0, r as f32 * 10.0, r as f32 * 10.0 + 10.0)).collect(),
        };
        let mut merged = MergedTable::from_fragment(a);
        let offset = merged.append(b).unwrap();
        assert_eq!(offset, 3);
        let rows: Vec<u32> = merged.cells().map(|(_, c)| c.row_id).collect();
        assert_eq!(rows, vec![0, 1, 2, 3, 4]);
        assert!(merged.has_unique_cells());
        assert_eq!(merged.pages(), vec![1, 2]);
    }

    #[test]
    fn append_rejects_row_id_overflow() {
        let high = TableFragment {
            page: 1,
            bbox: BBox::default(),
            cells: vec![cell(u32::MAX - 1, 0, 0.0, 10.0)],
        };
        let next = TableFragment {
            page: 2,
            bbox: BBox::default(),
            cells: (0..2).map(|r| cell(r, 0, r as f32 * 10.0, r as f32 * 10.0 + 10.0)).collect(),
        };
        let mut merged = MergedTable::from_fragment(high);
        let before = merged.clone();

        assert_eq!(
            merged.append(next),
            Err(MergeGeometryError::RowIdOverflow { page: 2, row_id: 1 })
        );
        assert_eq!(merged, before);
    }

    #[test]
    fn max_row_id_fails_validation() {
        let frag = TableFragment {
            page: 4,
            bbox: BBox::default(),
            cells: vec![cell(u32::MAX, 0, 0.0, 10.0)],
        };
        assert_eq!(
            frag.validate(),
            Err(MergeGeometryError::RowIdOverflow { page: 4, row_id: u32::MAX })
        );
    }

    #[test]
    fn refined_table_falls_back_to_original() {
        let table = MergedTable::from_fragment(TableFragment {
            page: 1,
            bbox: BBox::default(),
            cells: vec![cell(0, 0, 0.0, 10.0)],
        });
        let refined = RefinedTable::from_result(
            table.clone(),
            Err(RefinementError::Status {
                status: 500,
                body: String::new(),
            }),
        );
        assert!(refined.fell_back());
        assert_eq!(refined.table, table);
    }
}
