//! Collaborator interfaces: the models and services the pipeline calls out to.
//!
//! The pipeline never knows which model architecture answers a request. Each
//! collaborator is reached through a narrow async trait that takes a batch of
//! pages and returns per-page predictions:
//!
//! | Trait | Stage | Shipped implementation |
//! |-------|-------|------------------------|
//! | [`LayoutModel`] | layout detection | [`model_server::ModelServerLayout`] |
//! | [`TableStructureModel`] | table structure | [`model_server::ModelServerTables`] |
//! | [`TextRecognitionModel`] | OCR (both tiers) | [`model_server::ModelServerOcr`] |
//! | [`ReasoningService`] | refinement | [`LlmReasoningService`], [`GeminiReasoningService`] |
//!
//! Every model trait carries a `release` hook. Stage components call it when
//! they are done so the collaborator can free accelerator memory before the
//! next heavy stage starts.

pub mod gemini;
pub mod llm;
pub mod model_server;

pub use gemini::GeminiReasoningService;
pub use llm::LlmReasoningService;
pub use model_server::{Device, ModelServerClient};

use crate::error::{ModelError, RefinementError, TableExtractError};
use crate::model::{Page, PageLayout, PageTables, TextLine};
use async_trait::async_trait;
use std::fmt;
use std::sync::Arc;

/// Labels page regions (table, text, figure).
#[async_trait]
pub trait LayoutModel: Send + Sync {
    fn name(&self) -> &str;

    /// Detect regions on each page. Must return one entry per input page.
    async fn detect(&self, pages: &[Page]) -> Result<Vec<PageLayout>, ModelError>;

    /// Free the model's resources. Called once, after the stage completes.
    async fn release(&self) -> Result<(), ModelError> {
        Ok(())
    }
}

/// Locates tables and their cell grid.
#[async_trait]
pub trait TableStructureModel: Send + Sync {
    fn name(&self) -> &str;

    /// Recognise table fragments on each page. Must return one entry per input page.
    async fn recognize(&self, pages: &[Page]) -> Result<Vec<PageTables>, ModelError>;

    async fn release(&self) -> Result<(), ModelError> {
        Ok(())
    }
}

/// Recognises text lines on a single page.
#[async_trait]
pub trait TextRecognitionModel: Send + Sync {
    fn name(&self) -> &str;

    /// Recognise one page. [`ModelError::ResourceExhausted`] on the
    /// accelerated tier moves the recognizer into degraded mode.
    async fn recognize(
        &self,
        page: &Page,
        languages: &[String],
    ) -> Result<Vec<TextLine>, ModelError>;

    async fn release(&self) -> Result<(), ModelError> {
        Ok(())
    }
}

/// External reasoning service used to reconcile a table with its OCR text.
#[async_trait]
pub trait ReasoningService: Send + Sync {
    fn name(&self) -> &str;

    /// Send one request and return the raw reply text (expected to be JSON).
    async fn complete(&self, system: &str, prompt: &str) -> Result<String, RefinementError>;
}

/// The full set of collaborators for one extraction run.
///
/// Detection models and the accelerated recognizer are owned exclusively and
/// consumed by their stage; the degraded recognizer is shared by the OCR
/// worker pool.
pub struct Backends {
    pub layout: Box<dyn LayoutModel>,
    pub structure: Box<dyn TableStructureModel>,
    pub ocr_accelerated: Box<dyn TextRecognitionModel>,
    pub ocr_degraded: Arc<dyn TextRecognitionModel>,
    pub reasoning: Option<Arc<dyn ReasoningService>>,
}

impl Backends {
    /// All models served by one model server; accelerated OCR runs on
    /// `cuda`, degraded OCR and nothing else on `cpu`.
    pub fn model_server(base_url: &str, timeout_secs: u64) -> Result<Self, TableExtractError> {
        let client = Arc::new(ModelServerClient::new(base_url, timeout_secs)?);
        Ok(Self {
            layout: Box::new(client.layout(Device::Cuda)),
            structure: Box::new(client.tables(Device::Cuda)),
            ocr_accelerated: Box::new(client.ocr(Device::Cuda)),
            ocr_degraded: Arc::new(client.ocr(Device::Cpu)),
            reasoning: None,
        })
    }

    pub fn with_reasoning(mut self, service: Arc<dyn ReasoningService>) -> Self {
        self.reasoning = Some(service);
        self
    }
}

impl fmt::Debug for Backends {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Backends")
            .field("layout", &self.layout.name())
            .field("structure", &self.structure.name())
            .field("ocr_accelerated", &self.ocr_accelerated.name())
            .field("ocr_degraded", &self.ocr_degraded.name())
            .field("reasoning", &self.reasoning.as_ref().map(|r| r.name().to_string()))
            .finish()
    }
}
