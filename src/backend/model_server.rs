//! HTTP client for a detection/recognition model server.
//!
//! The server hosts the layout, table-recognition and OCR models and exposes
//! them as JSON endpoints. Page images travel as base64 PNG; every request
//! names the device the model should run on.
//!
//! ```text
//! POST /v1/layout     {"device","images":[{"page","png_base64"}]}
//!                  →  {"pages":[{"page","regions":[{"label","bbox"}]}]}
//! POST /v1/table_rec  {"device","images":[...]}
//!                  →  {"pages":[{"page","tables":[{"bbox","cells":[...]}]}]}
//! POST /v1/ocr        {"device","langs":[...],"images":[one]}
//!                  →  {"pages":[{"page","text_lines":[{"text","bbox","confidence"}]}]}
//! POST /v1/release    {"model","device"}
//! ```
//!
//! HTTP 507 or a body of `{"error":"out_of_memory"}` means the device ran out
//! of memory and maps to [`ModelError::ResourceExhausted`].

use super::{LayoutModel, TableStructureModel, TextRecognitionModel};
use crate::error::{ModelError, TableExtractError};
use crate::model::{
    BBox, Cell, LayoutLabel, LayoutRegion, Page, PageLayout, PageTables, TableFragment, TextLine,
};
use crate::pipeline::encode::encode_page;
use async_trait::async_trait;
use reqwest::StatusCode;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

/// Where the server should run a model.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Device {
    Cuda,
    Cpu,
}

impl Device {
    pub fn as_str(&self) -> &'static str {
        match self {
            Device::Cuda => "cuda",
            Device::Cpu => "cpu",
        }
    }
}

/// Shared HTTP connection to the model server.
#[derive(Debug, Clone)]
pub struct ModelServerClient {
    http: reqwest::Client,
    base_url: String,
}

impl ModelServerClient {
    pub fn new(base_url: &str, timeout_secs: u64) -> Result<Self, TableExtractError> {
        let base_url = base_url.trim_end_matches('/').to_string();
        if !(base_url.starts_with("http://") || base_url.starts_with("https://")) {
            return Err(TableExtractError::ModelInit {
                backend: "model-server".into(),
                detail: format!("'{base_url}' is not an HTTP/HTTPS URL"),
            });
        }
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .build()
            .map_err(|e| TableExtractError::ModelInit {
                backend: "model-server".into(),
                detail: e.to_string(),
            })?;
        Ok(Self { http, base_url })
    }

    pub fn layout(self: &Arc<Self>, device: Device) -> ModelServerLayout {
        ModelServerLayout {
            client: Arc::clone(self),
            device,
        }
    }

    pub fn tables(self: &Arc<Self>, device: Device) -> ModelServerTables {
        ModelServerTables {
            client: Arc::clone(self),
            device,
        }
    }

    pub fn ocr(self: &Arc<Self>, device: Device) -> ModelServerOcr {
        ModelServerOcr {
            client: Arc::clone(self),
            device,
        }
    }

    async fn post<B: Serialize + ?Sized, T: DeserializeOwned>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<T, ModelError> {
        let url = format!("{}{}", self.base_url, path);
        let response = self
            .http
            .post(&url)
            .json(body)
            .send()
            .await
            .map_err(|e| ModelError::Request(e.to_string()))?;

        let status = response.status();
        let text = response
            .text()
            .await
            .map_err(|e| ModelError::Request(e.to_string()))?;
        debug!("POST {} → {} ({} bytes)", url, status, text.len());

        decode_response(status, &text)
    }

    async fn release(&self, model: &str, device: Device) -> Result<(), ModelError> {
        let body = serde_json::json!({ "model": model, "device": device.as_str() });
        let _: serde_json::Value = self.post("/v1/release", &body).await?;
        Ok(())
    }
}

/// Map a raw server reply onto predictions or a [`ModelError`].
fn decode_response<T: DeserializeOwned>(status: StatusCode, text: &str) -> Result<T, ModelError> {
    let value: Option<serde_json::Value> = serde_json::from_str(text).ok();
    let server_error = value
        .as_ref()
        .and_then(|v| v.get("error"))
        .and_then(|e| e.as_str());

    if status == StatusCode::INSUFFICIENT_STORAGE || server_error == Some("out_of_memory") {
        return Err(ModelError::ResourceExhausted(truncate(text)));
    }
    if !status.is_success() {
        return Err(ModelError::Status {
            status: status.as_u16(),
            body: truncate(text),
        });
    }
    if let Some(err) = server_error {
        return Err(ModelError::InvalidResponse(err.to_string()));
    }
    let value = value
        .ok_or_else(|| ModelError::InvalidResponse(format!("not JSON: {}", truncate(text))))?;
    serde_json::from_value(value).map_err(|e| ModelError::InvalidResponse(e.to_string()))
}

fn truncate(s: &str) -> String {
    s.chars().take(200).collect()
}

// ── Wire types ───────────────────────────────────────────────────────────

#[derive(Serialize)]
struct ImagePayload {
    page: usize,
    png_base64: String,
}

#[derive(Serialize)]
struct BatchRequest<'a> {
    device: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    langs: Option<&'a [String]>,
    images: Vec<ImagePayload>,
}

impl<'a> BatchRequest<'a> {
    fn new(
        device: Device,
        langs: Option<&'a [String]>,
        pages: &[Page],
    ) -> Result<Self, ModelError> {
        let images = pages
            .iter()
            .map(|p| {
                encode_page(&p.image)
                    .map(|png_base64| ImagePayload {
                        page: p.index,
                        png_base64,
                    })
                    .map_err(|e| {
                        ModelError::InvalidResponse(format!(
                            "page {}: encode failed: {e}",
                            p.index
                        ))
                    })
            })
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self {
            device: device.as_str(),
            langs,
            images,
        })
    }
}

#[derive(Deserialize)]
struct Paged<P> {
    pages: Vec<P>,
}

trait PageKeyed {
    fn page(&self) -> usize;
}

#[derive(Deserialize)]
struct LayoutPageWire {
    page: usize,
    #[serde(default)]
    regions: Vec<RegionWire>,
}

#[derive(Deserialize)]
struct RegionWire {
    label: String,
    bbox: BBox,
}

#[derive(Deserialize)]
struct TablePageWire {
    page: usize,
    #[serde(default)]
    tables: Vec<TableWire>,
}

#[derive(Deserialize)]
struct TableWire {
    bbox: BBox,
    #[serde(default)]
    cells: Vec<Cell>,
}

#[derive(Deserialize)]
struct OcrPageWire {
    page: usize,
    #[serde(default)]
    text_lines: Vec<LineWire>,
}

#[derive(Deserialize)]
struct LineWire {
    text: String,
    bbox: BBox,
    #[serde(default)]
    confidence: f32,
}

impl PageKeyed for LayoutPageWire {
    fn page(&self) -> usize {
        self.page
    }
}

impl PageKeyed for TablePageWire {
    fn page(&self) -> usize {
        self.page
    }
}

impl PageKeyed for OcrPageWire {
    fn page(&self) -> usize {
        self.page
    }
}

/// Reorder server pages to match the request, failing if any page is missing.
fn align_pages<P: PageKeyed>(
    requested: &[Page],
    mut returned: Vec<P>,
) -> Result<Vec<P>, ModelError> {
    let mut aligned = Vec::with_capacity(requested.len());
    for page in requested {
        let pos = returned
            .iter()
            .position(|p| p.page() == page.index)
            .ok_or_else(|| {
                ModelError::InvalidResponse(format!("no prediction for page {}", page.index))
            })?;
        aligned.push(returned.swap_remove(pos));
    }
    Ok(aligned)
}

// ── Model adapters ───────────────────────────────────────────────────────

/// Layout model hosted by the server.
#[derive(Debug, Clone)]
pub struct ModelServerLayout {
    client: Arc<ModelServerClient>,
    device: Device,
}

#[async_trait]
impl LayoutModel for ModelServerLayout {
    fn name(&self) -> &str {
        "model-server/layout"
    }

    async fn detect(&self, pages: &[Page]) -> Result<Vec<PageLayout>, ModelError> {
        let request = BatchRequest::new(self.device, None, pages)?;
        let response: Paged<LayoutPageWire> = self.client.post("/v1/layout", &request).await?;
        Ok(align_pages(pages, response.pages)?
            .into_iter()
            .map(|p| PageLayout {
                page: p.page,
                regions: p
                    .regions
                    .into_iter()
                    .map(|r| LayoutRegion {
                        page: p.page,
                        label: LayoutLabel::from_model_label(&r.label),
                        bbox: r.bbox,
                    })
                    .collect(),
            })
            .collect())
    }

    async fn release(&self) -> Result<(), ModelError> {
        self.client.release("layout", self.device).await
    }
}

/// Table-recognition model hosted by the server.
#[derive(Debug, Clone)]
pub struct ModelServerTables {
    client: Arc<ModelServerClient>,
    device: Device,
}

#[async_trait]
impl TableStructureModel for ModelServerTables {
    fn name(&self) -> &str {
        "model-server/table_rec"
    }

    async fn recognize(&self, pages: &[Page]) -> Result<Vec<PageTables>, ModelError> {
        let request = BatchRequest::new(self.device, None, pages)?;
        let response: Paged<TablePageWire> = self.client.post("/v1/table_rec", &request).await?;
        Ok(align_pages(pages, response.pages)?
            .into_iter()
            .map(|p| PageTables {
                page: p.page,
                fragments: p
                    .tables
                    .into_iter()
                    .map(|t| TableFragment {
                        page: p.page,
                        bbox: t.bbox,
                        cells: t.cells,
                    })
                    .collect(),
            })
            .collect())
    }

    async fn release(&self) -> Result<(), ModelError> {
        self.client.release("table_rec", self.device).await
    }
}

/// OCR model hosted by the server.
#[derive(Debug, Clone)]
pub struct ModelServerOcr {
    client: Arc<ModelServerClient>,
    device: Device,
}

#[async_trait]
impl TextRecognitionModel for ModelServerOcr {
    fn name(&self) -> &str {
        match self.device {
            Device::Cuda => "model-server/ocr@cuda",
            Device::Cpu => "model-server/ocr@cpu",
        }
    }

    async fn recognize(
        &self,
        page: &Page,
        languages: &[String],
    ) -> Result<Vec<TextLine>, ModelError> {
        let pages = std::slice::from_ref(page);
        let request = BatchRequest::new(self.device, Some(languages), pages)?;
        let response: Paged<OcrPageWire> = self.client.post("/v1/ocr", &request).await?;
        let recognized = align_pages(pages, response.pages)?;
        Ok(recognized
            .into_iter()
            .flat_map(|p| {
                let page = p.page;
                p.text_lines.into_iter().map(move |l| TextLine {
                    page,
                    bbox: l.bbox,
                    text: l.text,
                    confidence: l.confidence.clamp(0.0, 1.0),
                })
            })
            .collect())
    }

    async fn release(&self) -> Result<(), ModelError> {
        self.client.release("ocr", self.device).await
    }
}
