//! Layout detection stage.
//!
//! The detector owns its model for the duration of [`LayoutDetector::run`]
//! and releases it before returning, whether the run succeeded or not.

use crate::backend::LayoutModel;
use crate::error::{ModelError, TableExtractError};
use crate::model::{Page, PageLayout};
use tracing::{debug, info, warn};

pub struct LayoutDetector {
    model: Box<dyn LayoutModel>,
    batch_size: usize,
}

impl LayoutDetector {
    pub fn new(model: Box<dyn LayoutModel>, batch_size: usize) -> Self {
        Self {
            model,
            batch_size: batch_size.max(1),
        }
    }

    /// Label the regions of every page, then free the model.
    ///
    /// Any model failure is fatal: without layout the stitcher cannot tell
    /// whether text separates two fragments.
    pub async fn run(self, pages: &[Page]) -> Result<Vec<PageLayout>, TableExtractError> {
        let result = self.detect_all(pages).await;

        if let Err(e) = self.model.release().await {
            warn!("Failed to release layout model '{}': {}", self.model.name(), e);
        }

        let layouts = result.map_err(TableExtractError::LayoutDetectionFailed)?;
        info!(
            "Layout: {} regions over {} pages",
            layouts.iter().map(|l| l.regions.len()).sum::<usize>(),
            layouts.len()
        );
        Ok(layouts)
    }

    async fn detect_all(&self, pages: &[Page]) -> Result<Vec<PageLayout>, ModelError> {
        let mut layouts = Vec::with_capacity(pages.len());
        for batch in pages.chunks(self.batch_size) {
            let detected = self.model.detect(batch).await?;
            if detected.len() != batch.len() {
                return Err(ModelError::InvalidResponse(format!(
                    "layout model returned {} pages for a batch of {}",
                    detected.len(),
                    batch.len()
                )));
            }
            for (page, mut layout) in batch.iter().zip(detected) {
                layout.page = page.index;
                for region in &mut layout.regions {
                    region.page = page.index;
                }
                debug!("Page {}: {} layout regions", page.index, layout.regions.len());
                layouts.push(layout);
            }
        }
        Ok(layouts)
    }
}
