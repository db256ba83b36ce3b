use std::convert::TryFrom;
use std::mem;
use std::path::Path;
use std::sync::Arc;

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;
use pdfium_render::prelude::*;
use pdfview_core::{
    DecodeError, DocumentBackend, DocumentId, DocumentInfo, DocumentMetadata, DocumentProvider,
    RenderImage, RenderRequest,
};
use tracing::{debug, instrument, warn};

/// Overrides where the pdfium shared library is loaded from.
pub const PDFIUM_LIBRARY_ENV: &str = "PDFVIEW_PDFIUM_LIBRARY_PATH";

const MIN_RENDER_SCALE: f32 = 0.1;

pub struct PdfiumProvider {
    pdfium: Arc<Pdfium>,
}

impl PdfiumProvider {
    pub fn new() -> Result<Self> {
        let pdfium = match bind_pdfium_from_env() {
            Some(pdfium) => pdfium,
            None => bind_pdfium_default()?,
        };
        Ok(Self {
            pdfium: Arc::new(pdfium),
        })
    }
}

#[async_trait]
impl DocumentProvider for PdfiumProvider {
    async fn open(
        &self,
        id: DocumentId,
        bytes: Bytes,
        password: Option<&str>,
    ) -> Result<Arc<dyn DocumentBackend>, DecodeError> {
        let pdfium = Arc::clone(&self.pdfium);
        let password = password.map(str::to_owned);
        let document = tokio::task::spawn_blocking(move || {
            PdfiumDocument::open(pdfium, id, bytes, password.as_deref())
        })
        .await
        .map_err(|err| DecodeError::Malformed(format!("decoder task failed: {err}")))??;
        Ok(Arc::new(document))
    }
}

struct PdfiumDocument {
    info: DocumentInfo,
    document: Mutex<PdfDocument<'static>>,
    pdfium: Arc<Pdfium>,
}

impl PdfiumDocument {
    fn open(
        pdfium: Arc<Pdfium>,
        id: DocumentId,
        bytes: Bytes,
        password: Option<&str>,
    ) -> Result<Self, DecodeError> {
        let document = pdfium
            .load_pdf_from_byte_vec(bytes.to_vec(), password)
            .map_err(decode_error)?;
        // SAFETY: the document borrows the bindings owned by `pdfium`. Both live in this
        // struct and fields drop in declaration order, so `document` is dropped before the
        // `Arc<Pdfium>` it borrows from.
        let document = unsafe { mem::transmute::<PdfDocument<'_>, PdfDocument<'static>>(document) };
        let info = build_document_info(id, &document);
        debug!(%id, page_count = info.page_count, "pdfium document opened");
        Ok(Self {
            info,
            document: Mutex::new(document),
            pdfium,
        })
    }

    fn render_internal(
        &self,
        document: &PdfDocument<'_>,
        request: &RenderRequest,
    ) -> Result<RenderImage, DecodeError> {
        let page_index: PdfPageIndex = request.page_index.try_into().map_err(|_| {
            DecodeError::Malformed(format!(
                "page {} is out of supported range",
                request.page_index
            ))
        })?;
        let page = document.pages().get(page_index).map_err(|err| {
            DecodeError::Malformed(format!("page {} out of range: {err}", request.page_index))
        })?;

        let factor = match request.bounds {
            Some((width, height)) => {
                fit_scale(page.width().value, page.height().value, width, height)
            }
            None => request.scale.max(MIN_RENDER_SCALE),
        };
        let config = PdfRenderConfig::new().scale_page_by_factor(factor);
        let bitmap = page.render_with_config(&config).map_err(|err| {
            DecodeError::Malformed(format!(
                "failed to render page {}: {err}",
                request.page_index
            ))
        })?;
        let image = bitmap.as_image().to_rgba8();

        Ok(RenderImage {
            width: image.width(),
            height: image.height(),
            pixels: image.into_raw(),
        })
    }
}

impl DocumentBackend for PdfiumDocument {
    fn info(&self) -> &DocumentInfo {
        &self.info
    }

    #[instrument(skip(self), fields(document = %self.info.id))]
    fn render_page(&self, request: RenderRequest) -> Result<RenderImage, DecodeError> {
        let document = self.document.lock();
        self.render_internal(&document, &request)
    }
}

impl Drop for PdfiumDocument {
    fn drop(&mut self) {
        debug!(id = %self.info.id, "releasing pdfium document");
    }
}

/// Largest factor that fits a `page_width` x `page_height` page (in points) into the box.
pub fn fit_scale(page_width: f32, page_height: f32, width: u32, height: u32) -> f32 {
    if page_width <= 0.0 || page_height <= 0.0 {
        return 1.0;
    }
    let factor = (width as f32 / page_width).min(height as f32 / page_height);
    if factor.is_finite() && factor > 0.0 {
        factor
    } else {
        1.0
    }
}

fn decode_error(err: PdfiumError) -> DecodeError {
    match err {
        PdfiumError::PdfiumLibraryInternalError(PdfiumInternalError::PasswordError) => {
            DecodeError::Locked
        }
        other => DecodeError::Malformed(other.to_string()),
    }
}

fn build_document_info(id: DocumentId, document: &PdfDocument<'_>) -> DocumentInfo {
    let page_count = usize::try_from(document.pages().len()).unwrap_or_default();
    let metadata = document.metadata();

    let title = metadata
        .get(PdfDocumentMetadataTagType::Title)
        .map(|t| t.value().to_owned());
    let author = metadata
        .get(PdfDocumentMetadataTagType::Author)
        .map(|t| t.value().to_owned());
    let keywords = metadata
        .get(PdfDocumentMetadataTagType::Keywords)
        .map(|t| {
            t.value()
                .split(',')
                .map(|s| s.trim().to_owned())
                .filter(|s| !s.is_empty())
                .collect()
        })
        .unwrap_or_default();

    DocumentInfo {
        id,
        page_count,
        metadata: DocumentMetadata {
            title,
            author,
            keywords,
        },
    }
}

fn bind_pdfium_from_env() -> Option<Pdfium> {
    let path = std::env::var_os(PDFIUM_LIBRARY_ENV).filter(|path| !path.is_empty())?;
    match Pdfium::bind_to_library(&path) {
        Ok(bindings) => Some(Pdfium::new(bindings)),
        Err(err) => {
            warn!(
                "failed to load Pdfium from {} ({}): {}",
                PDFIUM_LIBRARY_ENV,
                Path::new(&path).display(),
                err
            );
            None
        }
    }
}

fn bind_pdfium_default() -> Result<Pdfium> {
    let mut errors = Vec::new();

    let cwd_path = Pdfium::pdfium_platform_library_name_at_path("./");
    match Pdfium::bind_to_library(&cwd_path) {
        Ok(bindings) => return Ok(Pdfium::new(bindings)),
        Err(err) => errors.push(format!("{}: {}", cwd_path.display(), err)),
    }

    match Pdfium::bind_to_system_library() {
        Ok(bindings) => Ok(Pdfium::new(bindings)),
        Err(err) => {
            errors.push(format!("system: {err}"));
            Err(anyhow!(
                "failed to bind to a pdfium library; set {} or install it ({})",
                PDFIUM_LIBRARY_ENV,
                errors.join(", ")
            ))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fit_scale_preserves_aspect_ratio() {
        // US letter is 612 x 792 points.
        let factor = fit_scale(612.0, 792.0, 306, 306);
        assert!((factor - 306.0 / 792.0).abs() < 1e-6);
        let factor = fit_scale(612.0, 792.0, 1224, 10_000);
        assert!((factor - 2.0).abs() < 1e-6);
    }

    #[test]
    fn fit_scale_falls_back_for_degenerate_pages() {
        assert_eq!(fit_scale(0.0, 792.0, 100, 100), 1.0);
        assert_eq!(fit_scale(612.0, -1.0, 100, 100), 1.0);
    }

    #[test]
    fn password_errors_are_classified_structurally() {
        let locked = decode_error(PdfiumError::PdfiumLibraryInternalError(
            PdfiumInternalError::PasswordError,
        ));
        assert_eq!(locked, DecodeError::Locked);
        let other = decode_error(PdfiumError::PdfiumLibraryInternalError(
            PdfiumInternalError::FormatError,
        ));
        assert!(matches!(other, DecodeError::Malformed(_)));
    }
}
