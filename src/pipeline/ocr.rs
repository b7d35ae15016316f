//! Text recognition with an accelerated tier and a degraded worker-pool tier.
//!
//! ```text
//!   Accelerated ──(ResourceExhausted on page p)──▶ Degraded
//!        │                                            │
//!   one page at a time                   pages p..=n on `workers` tasks
//! ```
//!
//! The transition is one-way. Pages recognised before the switch keep their
//! accelerated results; the page that exhausted the accelerator is retried on
//! the degraded tier together with every page after it. On the degraded tier
//! a failing page is dropped and reported, the rest of the run continues.

use crate::backend::TextRecognitionModel;
use crate::error::PageRecognitionError;
use crate::model::{Page, PageText, TextLine};
use crate::progress::ProgressCallback;
use futures::stream::{self, StreamExt};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Execution tier of the recognizer.
enum Tier {
    Accelerated(Box<dyn TextRecognitionModel>),
    Degraded,
}

/// Result of one OCR run over the document.
#[derive(Debug, Default)]
pub struct OcrRun {
    /// Recognised pages, in page order. Dropped pages are absent.
    pub texts: Vec<PageText>,
    pub dropped: Vec<PageRecognitionError>,
    /// Page on which the accelerated tier ran out of resources.
    pub degraded_at: Option<usize>,
}

impl OcrRun {
    pub fn dropped_pages(&self) -> Vec<usize> {
        self.dropped.iter().map(|e| e.page()).collect()
    }
}

pub struct TextRecognizer {
    tier: Tier,
    degraded: Arc<dyn TextRecognitionModel>,
    workers: usize,
    progress: Option<ProgressCallback>,
}

impl TextRecognizer {
    pub fn new(
        accelerated: Box<dyn TextRecognitionModel>,
        degraded: Arc<dyn TextRecognitionModel>,
        workers: usize,
    ) -> Self {
        Self {
            tier: Tier::Accelerated(accelerated),
            degraded,
            workers: workers.max(1),
            progress: None,
        }
    }

    pub fn with_progress(mut self, progress: Option<ProgressCallback>) -> Self {
        self.progress = progress;
        self
    }

    /// Recognise every page and release whichever models were used.
    pub async fn run(mut self, pages: &[Page], languages: &[String]) -> OcrRun {
        let total = pages.len();
        let mut run = OcrRun::default();
        let mut next = 0;

        while next < total {
            let Tier::Accelerated(model) = &self.tier else {
                break;
            };
            let page = &pages[next];
            let result = model.recognize(page, languages).await;

            match result {
                Ok(lines) => {
                    debug!("OCR page {} (accelerated): {} lines", page.index, lines.len());
                    run.texts.push(page_text(page.index, lines));
                    if let Some(ref cb) = self.progress {
                        cb.on_page_recognized(page.index, total);
                    }
                    next += 1;
                }
                Err(e) if e.is_resource_exhaustion() => {
                    warn!(
                        "Accelerated OCR exhausted on page {}: {}; switching to degraded mode",
                        page.index, e
                    );
                    run.degraded_at = Some(page.index);
                    self.degrade().await;
                    if let Some(ref cb) = self.progress {
                        cb.on_ocr_degraded(page.index);
                    }
                }
                Err(source) => {
                    let err = PageRecognitionError::Model {
                        page: page.index,
                        source,
                    };
                    warn!("Dropping OCR for page {}: {}", page.index, err);
                    if let Some(ref cb) = self.progress {
                        cb.on_page_dropped(page.index, total, &err.to_string());
                    }
                    run.dropped.push(err);
                    next += 1;
                }
            }
        }

        if next < total {
            self.run_degraded(&pages[next..], languages, total, &mut run).await;
            if let Err(e) = self.degraded.release().await {
                warn!("Failed to release degraded OCR model '{}': {}", self.degraded.name(), e);
            }
        } else if let Tier::Accelerated(model) = &self.tier {
            if let Err(e) = model.release().await {
                warn!("Failed to release OCR model '{}': {}", model.name(), e);
            }
        }

        info!(
            "OCR: {}/{} pages recognised, {} dropped{}",
            run.texts.len(),
            total,
            run.dropped.len(),
            run.degraded_at
                .map(|p| format!(", degraded from page {}", p))
                .unwrap_or_default()
        );
        run
    }

    /// Accelerated → Degraded. The accelerated model is released and dropped.
    async fn degrade(&mut self) {
        if let Tier::Accelerated(model) = std::mem::replace(&mut self.tier, Tier::Degraded) {
            if let Err(e) = model.release().await {
                warn!("Failed to release accelerated OCR model '{}': {}", model.name(), e);
            }
        }
    }

    async fn run_degraded(
        &self,
        remaining: &[Page],
        languages: &[String],
        total: usize,
        run: &mut OcrRun,
    ) {
        info!("Degraded OCR: {} pages on {} workers", remaining.len(), self.workers);

        let results: Vec<Result<PageText, PageRecognitionError>> =
            stream::iter(remaining.iter().cloned().map(|page| {
                let model = Arc::clone(&self.degraded);
                let langs = languages.to_vec();
                let progress = self.progress.clone();
                async move {
                    let index = page.index;
                    let handle = tokio::spawn(async move { model.recognize(&page, &langs).await });
                    let result = match handle.await {
                        Ok(Ok(lines)) => Ok(page_text(index, lines)),
                        Ok(Err(source)) => Err(PageRecognitionError::Model { page: index, source }),
                        Err(join) => Err(PageRecognitionError::WorkerAborted {
                            page: index,
                            detail: join.to_string(),
                        }),
                    };
                    if let Some(cb) = progress {
                        match &result {
                            Ok(_) => cb.on_page_recognized(index, total),
                            Err(e) => cb.on_page_dropped(index, total, &e.to_string()),
                        }
                    }
                    result
                }
            }))
            .buffered(self.workers)
            .collect()
            .await;

        for result in results {
            match result {
                Ok(text) => {
                    debug!("OCR page {} (degraded): {} lines", text.page, text.lines.len());
                    run.texts.push(text);
                }
                Err(e) => {
                    warn!("Dropping OCR for page {}: {}", e.page(), e);
                    run.dropped.push(e);
                }
            }
        }
    }
}

fn page_text(page: usize, mut lines: Vec<TextLine>) -> PageText {
    for line in &mut lines {
        line.page = page;
    }
    PageText { page, lines }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ModelError;
    use crate::model::BBox;
    use async_trait::async_trait;
    use image::DynamicImage;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Tags every line with `tag`; fails on the configured pages.
    struct FakeOcr {
        tag: &'static str,
        exhaust_on: Option<usize>,
        fail_on: Vec<usize>,
        panic_on: Option<usize>,
        released: Arc<AtomicUsize>,
    }

    impl FakeOcr {
        fn new(tag: &'static str) -> Self {
            Self {
                tag,
                exhaust_on: None,
                fail_on: vec![],
                panic_on: None,
                released: Arc::new(AtomicUsize::new(0)),
            }
        }
    }

    #[async_trait]
    impl TextRecognitionModel for FakeOcr {
        fn name(&self) -> &str {
            self.tag
        }

        async fn recognize(
            &self,
            page: &Page,
            _languages: &[String],
        ) -> Result<Vec<TextLine>, ModelError> {
            if self.exhaust_on.is_some_and(|p| page.index >= p) {
                return Err(ModelError::ResourceExhausted("CUDA out of memory".into()));
            }
            if self.fail_on.contains(&page.index) {
                return Err(ModelError::Request("worker crashed".into()));
            }
            if self.panic_on == Some(page.index) {
                panic!("recognizer panicked");
            }
            Ok(vec![TextLine {
                page: 0,
                bbox: BBox::new(0.0, 0.0, 10.0, 10.0),
                text: format!("{}-{}", self.tag, page.index),
                confidence: 0.9,
            }])
        }

        async fn release(&self) -> Result<(), ModelError> {
            self.released.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    fn pages(n: usize) -> Vec<Page> {
        (1..=n).map(|i| Page::new(i, DynamicImage::new_rgb8(4, 4))).collect()
    }

    fn langs() -> Vec<String> {
        vec!["en".to_string()]
    }

    #[tokio::test]
    async fn accelerated_only_when_nothing_fails() {
        let gpu = FakeOcr::new("gpu");
        let released = gpu.released.clone();
        let run = TextRecognizer::new(Box::new(gpu), Arc::new(FakeOcr::new("cpu")), 2)
            .run(&pages(3), &langs())
            .await;

        assert_eq!(run.texts.len(), 3);
        assert!(run.texts.iter().all(|t| t.lines[0].text.starts_with("gpu")));
        assert_eq!(run.degraded_at, None);
        assert_eq!(released.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn exhaustion_switches_remaining_pages_to_degraded() {
        let mut gpu = FakeOcr::new("gpu");
        gpu.exhaust_on = Some(5);
        let gpu_released = gpu.released.clone();
        let mut cpu = FakeOcr::new("cpu");
        cpu.fail_on = vec![7];

        let run = TextRecognizer::new(Box::new(gpu), Arc::new(cpu), 3)
            .run(&pages(10), &langs())
            .await;

        assert_eq!(run.degraded_at, Some(5));
        assert_eq!(run.texts.len(), 9);
        assert_eq!(run.dropped_pages(), vec![7]);
        assert_eq!(gpu_released.load(Ordering::SeqCst), 1);

        for text in &run.texts {
            let expected = if text.page < 5 { "gpu" } else { "cpu" };
            assert_eq!(text.lines[0].text, format!("{}-{}", expected, text.page));
            assert_eq!(text.lines[0].page, text.page);
        }
        let order: Vec<usize> = run.texts.iter().map(|t| t.page).collect();
        assert_eq!(order, vec![1, 2, 3, 4, 5, 6, 8, 9, 10]);
    }

    #[tokio::test]
    async fn other_accelerated_errors_drop_the_page_only() {
        let mut gpu = FakeOcr::new("gpu");
        gpu.fail_on = vec![2];
        let run = TextRecognizer::new(Box::new(gpu), Arc::new(FakeOcr::new("cpu")), 2)
            .run(&pages(3), &langs())
            .await;

        assert_eq!(run.degraded_at, None);
        assert_eq!(run.dropped_pages(), vec![2]);
        assert!(run.texts.iter().all(|t| t.lines[0].text.starts_with("gpu")));
    }

    #[tokio::test]
    async fn panicking_worker_drops_its_page() {
        let mut gpu = FakeOcr::new("gpu");
        gpu.exhaust_on = Some(1);
        let mut cpu = FakeOcr::new("cpu");
        cpu.panic_on = Some(2);

        let run = TextRecognizer::new(Box::new(gpu), Arc::new(cpu), 2)
            .run(&pages(3), &langs())
            .await;

        assert_eq!(run.texts.len(), 2);
        assert!(matches!(
            run.dropped.as_slice(),
            [PageRecognitionError::WorkerAborted { page: 2, .. }]
        ));
    }
}
