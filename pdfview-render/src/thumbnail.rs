use std::io::Cursor;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use image::{imageops, ImageFormat, Rgba, RgbaImage};
use pdfview_core::{
    CacheManager, DecodeError, DocumentBackend, LoadError, LoadPipeline, RenderImage,
    RenderRequest,
};
use thiserror::Error;
use tracing::{debug, instrument};

pub const MIN_THUMBNAIL_SCALE: f32 = 0.1;

const BACKGROUND: Rgba<u8> = Rgba([255, 255, 255, 255]);

#[derive(Debug, Error)]
pub enum ThumbnailError {
    #[error("Invalid thumbnail size {width}x{height}")]
    InvalidSize { width: u32, height: u32 },
    #[error("Document has no pages")]
    EmptyDocument,
    #[error(transparent)]
    Load(#[from] LoadError),
    #[error("Failed to render page {page}: {source}")]
    Render {
        page: usize,
        #[source]
        source: DecodeError,
    },
    #[error("Rendered page has an inconsistent pixel buffer")]
    BadPixels,
    #[error("Failed to encode thumbnail: {0}")]
    Encode(#[from] image::ImageError),
    #[error("Thumbnail task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ThumbnailOptions {
    /// 1-based; clamped into the document.
    pub page: i64,
    pub width: u32,
    pub height: u32,
    pub scale: f32,
}

impl ThumbnailOptions {
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            page: 1,
            width,
            height,
            scale: 1.0,
        }
    }

    pub fn with_page(mut self, page: i64) -> Self {
        self.page = page;
        self
    }

    pub fn with_scale(mut self, scale: f32) -> Self {
        self.scale = scale;
        self
    }

    /// Output size in pixels: `width * scale` by `height * scale`.
    pub fn canvas_size(&self) -> (u32, u32) {
        let scale = if self.scale.is_finite() {
            self.scale.max(MIN_THUMBNAIL_SCALE)
        } else {
            1.0
        };
        let scaled = |value: u32| ((value as f32 * scale).round() as u32).max(1);
        (scaled(self.width), scaled(self.height))
    }

    pub fn page_index(&self, page_count: usize) -> usize {
        let index = usize::try_from(self.page.saturating_sub(1)).unwrap_or(0);
        index.min(page_count.saturating_sub(1))
    }
}

/// Opens `source` through the same resolve/cache/fetch path as a view and renders one page.
pub async fn generate_thumbnail(
    pipeline: &LoadPipeline,
    cache: &CacheManager,
    source: &str,
    password: Option<&str>,
    options: ThumbnailOptions,
) -> Result<String, ThumbnailError> {
    if options.width == 0 || options.height == 0 {
        return Err(ThumbnailError::InvalidSize {
            width: options.width,
            height: options.height,
        });
    }
    let document = pipeline.open_document(source, password, cache).await?;
    tokio::task::spawn_blocking(move || render_thumbnail(document.as_ref(), &options)).await?
}

#[instrument(skip(document), fields(document = %document.info().id))]
pub fn render_thumbnail(
    document: &dyn DocumentBackend,
    options: &ThumbnailOptions,
) -> Result<String, ThumbnailError> {
    let page_count = document.page_count();
    if page_count == 0 {
        return Err(ThumbnailError::EmptyDocument);
    }
    let page = options.page_index(page_count);
    let (width, height) = options.canvas_size();
    let rendered = document
        .render_page(RenderRequest::fit(page, width, height))
        .map_err(|source| ThumbnailError::Render { page, source })?;
    debug!(page, width = rendered.width, height = rendered.height, "page rendered");
    let canvas = compose_centered(&rendered, width, height)?;
    encode_png_data_url(&canvas)
}

/// Centers `page` on a white canvas; anything outside the canvas is cropped.
pub fn compose_centered(
    page: &RenderImage,
    width: u32,
    height: u32,
) -> Result<RgbaImage, ThumbnailError> {
    let rendered = RgbaImage::from_raw(page.width, page.height, page.pixels.clone())
        .ok_or(ThumbnailError::BadPixels)?;
    let mut canvas = RgbaImage::from_pixel(width, height, BACKGROUND);
    let x = (i64::from(width) - i64::from(page.width)) / 2;
    let y = (i64::from(height) - i64::from(page.height)) / 2;
    imageops::overlay(&mut canvas, &rendered, x, y);
    Ok(canvas)
}

pub fn encode_png_data_url(image: &RgbaImage) -> Result<String, ThumbnailError> {
    let mut buffer = Cursor::new(Vec::new());
    image.write_to(&mut buffer, ImageFormat::Png)?;
    Ok(format!(
        "data:image/png;base64,{}",
        BASE64.encode(buffer.into_inner())
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use pdfview_core::{document_id_for_source, DocumentInfo, DocumentMetadata};

    const RED: [u8; 4] = [200, 0, 0, 255];

    /// Renders a solid page half as tall as the requested box and records the page index.
    struct StripeDocument {
        info: DocumentInfo,
        requested: Mutex<Vec<usize>>,
    }

    impl StripeDocument {
        fn new(page_count: usize) -> Self {
            Self {
                info: DocumentInfo {
                    id: document_id_for_source("stripe"),
                    page_count,
                    metadata: DocumentMetadata::default(),
                },
                requested: Mutex::new(Vec::new()),
            }
        }
    }

    impl DocumentBackend for StripeDocument {
        fn info(&self) -> &DocumentInfo {
            &self.info
        }

        fn render_page(&self, request: RenderRequest) -> Result<RenderImage, DecodeError> {
            self.requested.lock().push(request.page_index);
            let (width, height) = request.bounds.unwrap_or((10, 10));
            let height = (height / 2).max(1);
            Ok(RenderImage {
                width,
                height,
                pixels: RED.repeat((width * height) as usize),
            })
        }
    }

    fn decode(data_url: &str) -> RgbaImage {
        let payload = data_url
            .strip_prefix("data:image/png;base64,")
            .expect("png data url");
        let bytes = BASE64.decode(payload).unwrap();
        image::load_from_memory(&bytes).unwrap().to_rgba8()
    }

    #[test]
    fn canvas_size_applies_scale_with_floor() {
        assert_eq!(ThumbnailOptions::new(100, 50).canvas_size(), (100, 50));
        assert_eq!(
            ThumbnailOptions::new(100, 50).with_scale(2.0).canvas_size(),
            (200, 100)
        );
        assert_eq!(
            ThumbnailOptions::new(100, 50).with_scale(0.0).canvas_size(),
            (10, 5)
        );
    }

    #[test]
    fn page_is_clamped_into_document() {
        let options = ThumbnailOptions::new(10, 10);
        assert_eq!(options.with_page(0).page_index(5), 0);
        assert_eq!(options.with_page(-4).page_index(5), 0);
        assert_eq!(options.with_page(3).page_index(5), 2);
        assert_eq!(options.with_page(99).page_index(5), 4);
    }

    #[test]
    fn thumbnail_is_centered_on_white() {
        let document = StripeDocument::new(3);
        let options = ThumbnailOptions::new(40, 20).with_page(7);
        let url = render_thumbnail(&document, &options).unwrap();

        let image = decode(&url);
        assert_eq!(image.dimensions(), (40, 20));
        assert_eq!(image.get_pixel(0, 0).0, [255, 255, 255, 255]);
        assert_eq!(image.get_pixel(20, 10).0, RED);
        assert_eq!(*document.requested.lock(), vec![2]);
    }

    #[test]
    fn inconsistent_pixels_are_rejected() {
        let page = RenderImage {
            width: 4,
            height: 4,
            pixels: vec![0; 3],
        };
        assert!(matches!(
            compose_centered(&page, 4, 4),
            Err(ThumbnailError::BadPixels)
        ));
    }

    #[test]
    fn empty_documents_have_no_thumbnail() {
        let document = StripeDocument::new(0);
        assert!(matches!(
            render_thumbnail(&document, &ThumbnailOptions::new(10, 10)),
            Err(ThumbnailError::EmptyDocument)
        ));
    }
}
