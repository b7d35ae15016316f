//! Rasterisation: turn a PDF or a scanned image into [`Page`]s.
//!
//! pdfium is not safe to drive from async code, so every call runs inside
//! `tokio::task::spawn_blocking`. Each page is scaled by `dpi / 72` and then
//! capped at `max_rendered_pixels` on its longest edge.
//!
//! The pdfium library is looked up in `PDFIUM_LIB_PATH` (a file or the
//! directory containing it) before falling back to the system library path.

use crate::config::{ExtractionConfig, PageSelection};
use crate::error::TableExtractError;
use crate::model::Page;
use crate::output::DocumentKind;
use image::DynamicImage;
use pdfium_render::prelude::*;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Renders document pages to images.
#[derive(Debug, Clone)]
pub struct Rasterizer {
    dpi: u32,
    max_pixels: u32,
    password: Option<String>,
    pages: PageSelection,
}

impl Rasterizer {
    pub fn from_config(config: &ExtractionConfig) -> Self {
        Self {
            dpi: config.dpi,
            max_pixels: config.max_rendered_pixels,
            password: config.password.clone(),
            pages: config.pages.clone(),
        }
    }

    /// Render the selected pages, in document order.
    ///
    /// A raster image is a one-page document.
    pub async fn rasterize(
        &self,
        path: &Path,
        kind: DocumentKind,
    ) -> Result<Vec<Page>, TableExtractError> {
        let path = path.to_path_buf();
        let this = self.clone();
        tokio::task::spawn_blocking(move || match kind {
            DocumentKind::Pdf => this.render_pdf_blocking(&path),
            DocumentKind::Image => this.load_image_blocking(&path),
        })
        .await
        .map_err(|e| TableExtractError::Internal(format!("Render task panicked: {}", e)))?
    }

    /// Number of pages in the document, without rendering anything.
    pub async fn page_count(
        &self,
        path: &Path,
        kind: DocumentKind,
    ) -> Result<usize, TableExtractError> {
        if kind == DocumentKind::Image {
            return Ok(1);
        }
        let path = path.to_path_buf();
        let password = self.password.clone();
        tokio::task::spawn_blocking(move || {
            let pdfium = bind_pdfium()?;
            let document = open_document(&pdfium, &path, password.as_deref())?;
            Ok(document.pages().len() as usize)
        })
        .await
        .map_err(|e| TableExtractError::Internal(format!("Page count task panicked: {}", e)))?
    }

    fn render_pdf_blocking(&self, path: &Path) -> Result<Vec<Page>, TableExtractError> {
        let pdfium = bind_pdfium()?;
        let document = open_document(&pdfium, path, self.password.as_deref())?;

        let pages = document.pages();
        let total_pages = pages.len() as usize;
        info!("PDF loaded: {} pages", total_pages);

        let indices = self.selected_indices(total_pages)?;

        let render_config = PdfRenderConfig::new()
            .scale_page_by_factor(self.dpi as f32 / 72.0)
            .set_maximum_width(self.max_pixels as i32)
            .set_maximum_height(self.max_pixels as i32);

        let mut rendered = Vec::with_capacity(indices.len());
        for idx in indices {
            let page = pages
                .get(idx as u16)
                .map_err(|e| TableExtractError::RasterisationFailed {
                    page: idx + 1,
                    detail: format!("{:?}", e),
                })?;

            let bitmap = page.render_with_config(&render_config).map_err(|e| {
                TableExtractError::RasterisationFailed {
                    page: idx + 1,
                    detail: format!("{:?}", e),
                }
            })?;

            let image = bitmap.as_image();
            debug!(
                "Rendered page {} → {}x{} px",
                idx + 1,
                image.width(),
                image.height()
            );
            rendered.push(Page::new(idx + 1, image));
        }

        Ok(rendered)
    }

    fn load_image_blocking(&self, path: &Path) -> Result<Vec<Page>, TableExtractError> {
        self.selected_indices(1)?;

        let image = image::open(path).map_err(|e| TableExtractError::DocumentRead {
            path: path.to_path_buf(),
            detail: e.to_string(),
        })?;
        let image = cap_longest_edge(image, self.max_pixels);
        debug!("Loaded image → {}x{} px", image.width(), image.height());

        Ok(vec![Page::new(1, image)])
    }

    fn selected_indices(&self, total_pages: usize) -> Result<Vec<usize>, TableExtractError> {
        let indices = self.pages.to_indices(total_pages);
        if indices.is_empty() {
            return Err(TableExtractError::PageOutOfRange {
                page: first_requested_page(&self.pages),
                total: total_pages,
            });
        }
        Ok(indices)
    }
}

fn first_requested_page(selection: &PageSelection) -> usize {
    match selection {
        PageSelection::All => 1,
        PageSelection::Single(p) => *p,
        PageSelection::Range(start, _) => *start,
        PageSelection::Set(pages) => pages.iter().copied().min().unwrap_or(0),
    }
}

/// Downscale so neither edge exceeds `max_pixels`. Smaller images are untouched.
fn cap_longest_edge(image: DynamicImage, max_pixels: u32) -> DynamicImage {
    if image.width().max(image.height()) <= max_pixels {
        return image;
    }
    image.resize(max_pixels, max_pixels, image::imageops::FilterType::Lanczos3)
}

/// Bind to pdfium: `PDFIUM_LIB_PATH` first, then the system library.
fn bind_pdfium() -> Result<Pdfium, TableExtractError> {
    if let Some(path) = std::env::var_os("PDFIUM_LIB_PATH").map(PathBuf::from) {
        let lib = if path.is_dir() {
            Pdfium::pdfium_platform_library_name_at_path(&path)
        } else {
            path
        };
        debug!("Binding pdfium from {}", lib.display());
        return Pdfium::bind_to_library(&lib)
            .map(Pdfium::new)
            .map_err(|e| {
                TableExtractError::PdfiumBindingFailed(format!("{}: {:?}", lib.display(), e))
            });
    }

    Pdfium::bind_to_system_library()
        .map(Pdfium::new)
        .map_err(|e| TableExtractError::PdfiumBindingFailed(format!("{:?}", e)))
}

fn open_document<'a>(
    pdfium: &'a Pdfium,
    path: &Path,
    password: Option<&'a str>,
) -> Result<PdfDocument<'a>, TableExtractError> {
    pdfium.load_pdf_from_file(path, password).map_err(|e| {
        let err_str = format!("{:?}", e);
        if err_str.to_ascii_lowercase().contains("password") {
            if password.is_some() {
                TableExtractError::WrongPassword {
                    path: path.to_path_buf(),
                }
            } else {
                TableExtractError::PasswordRequired {
                    path: path.to_path_buf(),
                }
            }
        } else {
            TableExtractError::CorruptPdf {
                path: path.to_path_buf(),
                detail: err_str,
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{Rgb, RgbImage};

    fn rasterizer(pages: PageSelection) -> Rasterizer {
        let config = ExtractionConfig {
            pages,
            max_rendered_pixels: 400,
            ..Default::default()
        };
        Rasterizer::from_config(&config)
    }

    #[test]
    fn large_images_are_capped() {
        let img = DynamicImage::ImageRgb8(RgbImage::from_pixel(1000, 500, Rgb([255, 255, 255])));
        let capped = cap_longest_edge(img, 400);
        assert_eq!(capped.width(), 400);
        assert_eq!(capped.height(), 200);
    }

    #[test]
    fn small_images_are_untouched() {
        let img = DynamicImage::ImageRgb8(RgbImage::new(100, 50));
        assert_eq!(cap_longest_edge(img, 400).width(), 100);
    }

    #[tokio::test]
    async fn image_input_is_one_page() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("scan.png");
        RgbImage::from_pixel(800, 600, Rgb([250, 250, 250])).save(&path).unwrap();

        let pages = rasterizer(PageSelection::All)
            .rasterize(&path, DocumentKind::Image)
            .await
            .unwrap();
        assert_eq!(pages.len(), 1);
        assert_eq!(pages[0].index, 1);
        assert_eq!((pages[0].width, pages[0].height), (400, 300));
    }

    #[tokio::test]
    async fn image_page_selection_out_of_range() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("scan.png");
        RgbImage::new(10, 10).save(&path).unwrap();

        let err = rasterizer(PageSelection::Single(3))
            .rasterize(&path, DocumentKind::Image)
            .await
            .unwrap_err();
        assert!(matches!(err, TableExtractError::PageOutOfRange { page: 3, total: 1 }));
    }
}
