//! Table refinement through an external reasoning service.
//!
//! Refinement is best-effort. [`TableRefiner::refine`] returns a `Result`
//! and the caller resolves it with [`RefinedTable::from_result`], which keeps
//! the stitched table verbatim on any failure.
//!
//! Transport failures (request errors, timeouts, 429 and 5xx) are retried
//! with exponential backoff (`retry_backoff_ms * 2^(attempt-1)`). Replies that
//! arrive but cannot be used are not retried.
//!
//! [`RefinedTable::from_result`]: crate::model::RefinedTable::from_result

use crate::backend::ReasoningService;
use crate::config::ExtractionConfig;
use crate::error::RefinementError;
use crate::model::{MergedTable, PageText, TextLine};
use crate::pipeline::reply;
use crate::prompts::{render_refine_request, DEFAULT_REFINE_SYSTEM_PROMPT};
use std::sync::Arc;
use tokio::time::{sleep, timeout, Duration};
use tracing::{debug, warn};

pub struct TableRefiner {
    service: Arc<dyn ReasoningService>,
    system_prompt: String,
    max_retries: u32,
    retry_backoff_ms: u64,
    timeout_secs: u64,
}

impl TableRefiner {
    pub fn new(service: Arc<dyn ReasoningService>) -> Self {
        Self {
            service,
            system_prompt: DEFAULT_REFINE_SYSTEM_PROMPT.to_string(),
            max_retries: 3,
            retry_backoff_ms: 500,
            timeout_secs: 60,
        }
    }

    pub fn from_config(service: Arc<dyn ReasoningService>, config: &ExtractionConfig) -> Self {
        Self {
            service,
            system_prompt: config
                .system_prompt
                .clone()
                .unwrap_or_else(|| DEFAULT_REFINE_SYSTEM_PROMPT.to_string()),
            max_retries: config.max_retries,
            retry_backoff_ms: config.retry_backoff_ms,
            timeout_secs: config.api_timeout_secs,
        }
    }

    pub fn with_retries(mut self, max_retries: u32, retry_backoff_ms: u64) -> Self {
        self.max_retries = max_retries;
        self.retry_backoff_ms = retry_backoff_ms;
        self
    }

    /// Ask the service to reconcile `table` with the OCR `lines` inside it.
    pub async fn refine(
        &self,
        table_id: usize,
        table: &MergedTable,
        lines: &[TextLine],
    ) -> Result<MergedTable, RefinementError> {
        let prompt = render_refine_request(table_id, table, lines);
        let raw = self.complete_with_retry(table_id, &prompt).await?;
        let cells = reply::parse_reply(&raw)?;
        let refined = reply::apply_reply(table, &cells)?;
        debug!(
            "Table {}: applied {} reply cells via '{}'",
            table_id,
            cells.len(),
            self.service.name()
        );
        Ok(refined)
    }

    async fn complete_with_retry(
        &self,
        table_id: usize,
        prompt: &str,
    ) -> Result<String, RefinementError> {
        let mut attempt = 0u32;
        loop {
            if attempt > 0 {
                let backoff = backoff_ms(self.retry_backoff_ms, attempt);
                warn!(
                    "Table {}: retry {}/{} after {}ms",
                    table_id, attempt, self.max_retries, backoff
                );
                sleep(Duration::from_millis(backoff)).await;
            }

            let result = match timeout(
                Duration::from_secs(self.timeout_secs),
                self.service.complete(&self.system_prompt, prompt),
            )
            .await
            {
                Ok(r) => r,
                Err(_) => Err(RefinementError::Timeout {
                    secs: self.timeout_secs,
                }),
            };

            match result {
                Ok(text) => return Ok(text),
                Err(e) if e.is_retryable() && attempt < self.max_retries => {
                    warn!("Table {}: attempt {} failed: {}", table_id, attempt + 1, e);
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }
}

/// `base * 2^(attempt-1)`, saturating at `u64::MAX`.
fn backoff_ms(base: u64, attempt: u32) -> u64 {
    base.saturating_mul(2u64.saturating_pow(attempt.saturating_sub(1)))
}

/// OCR lines belonging to `table`, in reading order.
///
/// A line belongs to the table when it lies on a fragment's page and fully
/// inside that fragment's box.
pub fn ocr_lines_for_table(table: &MergedTable, texts: &[PageText]) -> Vec<TextLine> {
    let mut lines: Vec<TextLine> = Vec::new();
    for text in texts {
        let boxes: Vec<_> = table
            .fragments
            .iter()
            .filter(|f| f.page == text.page)
            .map(|f| f.bbox)
            .collect();
        if boxes.is_empty() {
            continue;
        }
        lines.extend(
            text.lines
                .iter()
                .filter(|l| boxes.iter().any(|b| b.contains(&l.bbox)))
                .cloned(),
        );
    }
    lines.sort_by(|a, b| {
        a.page
            .cmp(&b.page)
            .then(a.bbox.y0.total_cmp(&b.bbox.y0))
            .then(a.bbox.x0.total_cmp(&b.bbox.x0))
    });
    lines
}
