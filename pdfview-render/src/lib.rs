#[cfg(feature = "pdf")]
mod pdfium;
pub mod thumbnail;

#[cfg(feature = "pdf")]
pub use pdfium::{fit_scale, PdfiumProvider, PDFIUM_LIBRARY_ENV};
pub use thumbnail::{
    compose_centered, encode_png_data_url, generate_thumbnail, render_thumbnail,
    ThumbnailError, ThumbnailOptions, MIN_THUMBNAIL_SCALE,
};
