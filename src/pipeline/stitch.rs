//! Cross-page table stitching.
//!
//! Fragments are visited in page order (top-to-bottom within a page). Each
//! one either extends the open accumulator or closes it and opens a new one.
//! A fragment extends the accumulator when
//!
//! 1. `candidate_first_row_top - accumulator_last_row_bottom < gap_px`, and
//! 2. no non-table layout region lies strictly between those two edges on the
//!    accumulator's last page or on the candidate's page.
//!
//! The candidate's row ids are shifted by the accumulator's `max_row_id + 1`.
//! Only the immediately preceding accumulator is ever considered.

use crate::error::MergeGeometryError;
use crate::model::{LayoutLabel, MergedTable, PageLayout, PageTables, TableFragment};
use tracing::{debug, info, warn};

/// Default vertical merge threshold in pixels.
pub const DEFAULT_MERGE_GAP_PX: f32 = 50.0;

/// Tables produced by one stitch pass.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StitchOutcome {
    /// Logical tables in reading order.
    pub tables: Vec<MergedTable>,
    /// Fragments rejected before merging.
    pub skipped: Vec<MergeGeometryError>,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TableStitcher {
    gap_px: f32,
}

impl Default for TableStitcher {
    fn default() -> Self {
        Self::new(DEFAULT_MERGE_GAP_PX)
    }
}

impl TableStitcher {
    pub fn new(gap_px: f32) -> Self {
        Self { gap_px }
    }

    /// Merge all fragments into logical tables.
    pub fn stitch(&self, tables: &[PageTables], layouts: &[PageLayout]) -> StitchOutcome {
        self.resume(None, tables, layouts)
    }

    /// Continue stitching from an already-open accumulator.
    ///
    /// With no further fragments the accumulator is emitted unchanged.
    pub fn resume(
        &self,
        accumulator: Option<MergedTable>,
        tables: &[PageTables],
        layouts: &[PageLayout],
    ) -> StitchOutcome {
        let mut outcome = StitchOutcome::default();
        let mut current = accumulator;

        for fragment in ordered_fragments(tables) {
            if let Err(e) = fragment.validate() {
                warn!("Skipping table fragment on page {}: {}", fragment.page, e);
                outcome.skipped.push(e);
                continue;
            }

            current = match current.take() {
                Some(mut acc) if self.should_merge(&acc, fragment, layouts) => {
                    match acc.append(fragment.clone()) {
                        Ok(offset) => debug!(
                            "Merged fragment from page {} into table starting on page {} (row offset {})",
                            fragment.page,
                            acc.page(),
                            offset
                        ),
                        Err(e) => {
                            warn!("Skipping table fragment on page {}: {}", fragment.page, e);
                            outcome.skipped.push(e);
                        }
                    }
                    Some(acc)
                }
                Some(acc) => {
                    outcome.tables.push(acc);
                    Some(MergedTable::from_fragment(fragment.clone()))
                }
                None => Some(MergedTable::from_fragment(fragment.clone())),
            };
        }

        if let Some(acc) = current {
            outcome.tables.push(acc);
        }

        info!(
            "Stitched {} logical tables ({} fragments skipped)",
            outcome.tables.len(),
            outcome.skipped.len()
        );
        outcome
    }

    /// Decide whether `candidate` continues `acc`.
    pub fn should_merge(
        &self,
        acc: &MergedTable,
        candidate: &TableFragment,
        layouts: &[PageLayout],
    ) -> bool {
        let (Some(bottom), Some(top)) = (acc.last_row_bottom(), candidate.first_row_top()) else {
            return false;
        };

        if top - bottom >= self.gap_px {
            return false;
        }

        let acc_page = acc.fragments.last().map(|f| f.page).unwrap_or(candidate.page);
        let separated = layouts
            .iter()
            .filter(|l| l.page == acc_page || l.page == candidate.page)
            .flat_map(|l| l.regions.iter())
            .any(|r| r.label != LayoutLabel::Table && r.bbox.y0 > bottom && r.bbox.y1 < top);

        if separated {
            debug!(
                "Fragment on page {} separated from previous table by a non-table region",
                candidate.page
            );
        }
        !separated
    }
}

/// Fragments sorted by page, then by top edge.
fn ordered_fragments(tables: &[PageTables]) -> Vec<&TableFragment> {
    let mut fragments: Vec<&TableFragment> =
        tables.iter().flat_map(|t| t.fragments.iter()).collect();
    fragments.sort_by(|a, b| a.page.cmp(&b.page).then(a.bbox.y0.total_cmp(&b.bbox.y0)));
    fragments
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{BBox, Cell, LayoutRegion, RefinedTable};
    use crate::pipeline::DocumentAssembler;

    /// A fragment whose rows are 10px tall, stacked from `top`.
    fn fragment(page: usize, top: f32, rows: u32, cols: u32) -> TableFragment {
        let cells = (0..rows)
            .flat_map(|r| {
                (0..cols).map(move |c| Cell {
                    row_id: r,
                    col_id: c,
                    bbox: BBox::new(
                        c as f32 * 50.0,
                        top + r as f32 * 10.0,
                        c as f32 * 50.0 + 50.0,
                        top + (r + 1) as f32 * 10.0,
                    ),
                    is_header: false,
                    text: String::new(),
                })
            })
            .collect();
        TableFragment {
            page,
            bbox: BBox::new(0.0, top, cols as f32 * 50.0, top + rows as f32 * 10.0),
            cells,
        }
    }

    fn page_tables(fragments: Vec<TableFragment>) -> Vec<PageTables> {
        let mut by_page: Vec<PageTables> = Vec::new();
        for f in fragments {
            match by_page.iter_mut().find(|p| p.page == f.page) {
                Some(p) => p.fragments.push(f),
                None => by_page.push(PageTables {
                    page: f.page,
                    fragments: vec![f],
                }),
            }
        }
        by_page
    }

    fn text_region(page: usize, y0: f32, y1: f32) -> PageLayout {
        PageLayout {
            page,
            regions: vec![LayoutRegion {
                page,
                label: LayoutLabel::Text,
                bbox: BBox::new(0.0, y0, 500.0, y1),
            }],
        }
    }

    #[test]
    fn merges_across_pages_within_gap() {
        // Page 1 ends at y=100, page 2 starts at y=130.
        let a = fragment(1, 70.0, 3, 2);
        let b = fragment(2, 130.0, 2, 2);
        let out = TableStitcher::default().stitch(&page_tables(vec![a, b]), &[]);

        assert_eq!(out.tables.len(), 1);
        let rows: std::collections::BTreeSet<u32> =
            out.tables[0].cells().map(|(_, c)| c.row_id).collect();
        assert_eq!(rows.into_iter().collect::<Vec<_>>(), vec![0, 1, 2, 3, 4]);
        assert!(out.tables[0].has_unique_cells());
    }

    #[test]
    fn intervening_text_blocks_merge() {
        let a = fragment(1, 70.0, 3, 2);
        let b = fragment(2, 130.0, 2, 2);
        let layouts = vec![text_region(2, 105.0, 125.0)];
        let out = TableStitcher::default().stitch(&page_tables(vec![a, b]), &layouts);
        assert_eq!(out.tables.len(), 2);
    }

    #[test]
    fn table_regions_do_not_block_merge() {
        let a = fragment(1, 70.0, 3, 2);
        let b = fragment(2, 130.0, 2, 2);
        let layouts = vec![PageLayout {
            page: 1,
            regions: vec![LayoutRegion {
                page: 1,
                label: LayoutLabel::Table,
                bbox: BBox::new(0.0, 105.0, 500.0, 125.0),
            }],
        }];
        let out = TableStitcher::default().stitch(&page_tables(vec![a, b]), &layouts);
        assert_eq!(out.tables.len(), 1);
    }

    #[test]
    fn gap_at_threshold_does_not_merge() {
        let a = fragment(1, 70.0, 3, 2);
        let b = fragment(2, 150.0, 2, 2);
        let out = TableStitcher::default().stitch(&page_tables(vec![a, b]), &[]);
        assert_eq!(out.tables.len(), 2);
    }

    #[test]
    fn empty_fragments_are_skipped() {
        let a = fragment(1, 70.0, 3, 2);
        let empty = TableFragment {
            page: 2,
            bbox: BBox::new(0.0, 0.0, 10.0, 10.0),
            cells: vec![],
        };
        let b = fragment(2, 110.0, 1, 2);
        let out = TableStitcher::default().stitch(&page_tables(vec![a, empty, b]), &[]);
        assert_eq!(out.skipped, vec![MergeGeometryError::NoRows { page: 2 }]);
        assert_eq!(out.tables.len(), 1);
        assert_eq!(out.tables[0].max_row_id(), Some(3));
    }

    #[test]
    fn fragment_that_would_overflow_row_ids_is_skipped() {
        let high = TableFragment {
            page: 1,
            bbox: BBox::new(0.0, 90.0, 50.0, 100.0),
            cells: vec![Cell {
                row_id: u32::MAX - 1,
                col_id: 0,
                bbox: BBox::new(0.0, 90.0, 50.0, 100.0),
                is_header: false,
                text: String::new(),
            }],
        };
        let b = fragment(2, 110.0, 2, 1);
        let out = TableStitcher::default().stitch(&page_tables(vec![high, b]), &[]);

        assert_eq!(out.tables.len(), 1);
        assert_eq!(out.tables[0].pages(), vec![1]);
        assert_eq!(
            out.skipped,
            vec![MergeGeometryError::RowIdOverflow { page: 2, row_id: 1 }]
        );
    }

    #[test]
    fn resume_with_no_fragments_is_identity() {
        let a = fragment(1, 70.0, 3, 2);
        let b = fragment(2, 130.0, 2, 2);
        let stitcher = TableStitcher::default();
        let merged = stitcher.stitch(&page_tables(vec![a, b]), &[]).tables.remove(0);

        let again = stitcher.resume(Some(merged.clone()), &[], &[]);
        assert_eq!(again.tables, vec![merged]);
    }

    #[test]
    fn out_of_order_fragments_are_emitted_in_reading_order() {
        // Page 2 arrives first; page 1 lists its lower table before its upper one.
        let tables = vec![
            PageTables {
                page: 2,
                fragments: vec![fragment(2, 500.0, 1, 3)],
            },
            PageTables {
                page: 1,
                fragments: vec![fragment(1, 400.0, 2, 2), fragment(1, 50.0, 2, 1)],
            },
        ];
        let out = TableStitcher::default().stitch(&tables, &[]);

        let order: Vec<(usize, usize)> = out
            .tables
            .iter()
            .map(|t| (t.page(), t.column_count()))
            .collect();
        assert_eq!(order, vec![(1, 1), (1, 2), (2, 3)]);

        let refined: Vec<RefinedTable> =
            out.tables.into_iter().map(RefinedTable::unrefined).collect();
        let json = DocumentAssembler::new().assemble(&refined, &[]);
        let ids: Vec<(usize, usize, usize)> = json
            .iter()
            .map(|t| (t.table_id, t.page, t.rows[0].len()))
            .collect();
        assert_eq!(ids, vec![(0, 1, 1), (1, 1, 2), (2, 2, 3)]);
    }

    #[test]
    fn no_fragments_no_tables() {
        let out = TableStitcher::default().stitch(&[], &[]);
        assert!(out.tables.is_empty());
    }
}
