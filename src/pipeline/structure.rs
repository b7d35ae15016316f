//! Table structure detection stage.

use crate::backend::TableStructureModel;
use crate::error::{ModelError, TableExtractError};
use crate::model::{Page, PageTables};
use tracing::{debug, info, warn};

/// Finds table fragments and their cell grids, one batch of pages at a time.
pub struct TableStructureDetector {
    model: Box<dyn TableStructureModel>,
    batch_size: usize,
}

impl TableStructureDetector {
    pub fn new(model: Box<dyn TableStructureModel>, batch_size: usize) -> Self {
        Self {
            model,
            batch_size: batch_size.max(1),
        }
    }

    /// Detect fragments on every page, then free the model.
    ///
    /// Fragments come back in page order with their page index set; cell text
    /// is whatever the model supplied (usually empty).
    pub async fn run(self, pages: &[Page]) -> Result<Vec<PageTables>, TableExtractError> {
        let result = self.recognize_all(pages).await;

        if let Err(e) = self.model.release().await {
            warn!("Failed to release table model '{}': {}", self.model.name(), e);
        }

        let tables = result.map_err(TableExtractError::TableDetectionFailed)?;
        info!(
            "Table structure: {} fragments over {} pages",
            tables.iter().map(|t| t.fragments.len()).sum::<usize>(),
            tables.len()
        );
        Ok(tables)
    }

    async fn recognize_all(&self, pages: &[Page]) -> Result<Vec<PageTables>, ModelError> {
        let mut all = Vec::with_capacity(pages.len());
        for batch in pages.chunks(self.batch_size) {
            let detected = self.model.recognize(batch).await?;
            if detected.len() != batch.len() {
                return Err(ModelError::InvalidResponse(format!(
                    "table model returned {} pages for a batch of {}",
                    detected.len(),
                    batch.len()
                )));
            }
            for (page, mut tables) in batch.iter().zip(detected) {
                tables.page = page.index;
                for fragment in &mut tables.fragments {
                    fragment.page = page.index;
                }
                debug!("Page {}: {} table fragments", page.index, tables.fragments.len());
                all.push(tables);
            }
        }
        Ok(all)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{BBox, Cell, TableFragment};
    use async_trait::async_trait;
    use image::DynamicImage;

    struct OneTablePerPage;

    #[async_trait]
    impl TableStructureModel for OneTablePerPage {
        fn name(&self) -> &str {
            "one-per-page"
        }

        async fn recognize(&self, pages: &[Page]) -> Result<Vec<PageTables>, ModelError> {
            Ok(pages
                .iter()
                .map(|_| PageTables {
                    page: 0,
                    fragments: vec![TableFragment {
                        page: 0,
                        bbox: BBox::new(0.0, 0.0, 100.0, 20.0),
                        cells: vec![Cell {
                            row_id: 0,
                            col_id: 0,
                            bbox: BBox::new(0.0, 0.0, 100.0, 20.0),
                            is_header: true,
                            text: String::new(),
                        }],
                    }],
                })
                .collect())
        }
    }

    struct ShortReply;

    #[async_trait]
    impl TableStructureModel for ShortReply {
        fn name(&self) -> &str {
            "short"
        }

        async fn recognize(&self, _pages: &[Page]) -> Result<Vec<PageTables>, ModelError> {
            Ok(vec![])
        }
    }

    fn pages(n: usize) -> Vec<Page> {
        (1..=n).map(|i| Page::new(i, DynamicImage::new_rgb8(4, 4))).collect()
    }

    #[tokio::test]
    async fn fragments_carry_their_page() {
        let tables = TableStructureDetector::new(Box::new(OneTablePerPage), 16)
            .run(&pages(3))
            .await
            .unwrap();
        assert_eq!(tables.len(), 3);
        assert_eq!(tables[2].page, 3);
        assert_eq!(tables[2].fragments[0].page, 3);
    }

    #[tokio::test]
    async fn page_count_mismatch_is_fatal() {
        let err = TableStructureDetector::new(Box::new(ShortReply), 16)
            .run(&pages(2))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            TableExtractError::TableDetectionFailed(ModelError::InvalidResponse(_))
        ));
    }
}
