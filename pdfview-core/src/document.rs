use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::DecodeError;

pub type DocumentId = Uuid;

static DOCUMENT_NAMESPACE: Lazy<Uuid> = Lazy::new(|| {
    Uuid::parse_str("3f0e4c1a-5d7b-5e2a-9c61-8b2f4d9a7e10").expect("valid namespace UUID")
});

pub fn document_id_for_source(source: &str) -> DocumentId {
    Uuid::new_v5(&DOCUMENT_NAMESPACE, source.trim().as_bytes())
}

#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq, Eq)]
pub struct DocumentMetadata {
    pub title: Option<String>,
    pub author: Option<String>,
    pub keywords: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DocumentInfo {
    pub id: DocumentId,
    pub page_count: usize,
    pub metadata: DocumentMetadata,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RenderRequest {
    pub page_index: usize,
    pub scale: f32,
    /// When set, the page is scaled to fit inside `(width, height)` pixels and `scale` is
    /// ignored.
    pub bounds: Option<(u32, u32)>,
}

impl RenderRequest {
    pub fn fit(page_index: usize, width: u32, height: u32) -> Self {
        Self {
            page_index,
            scale: 1.0,
            bounds: Some((width.max(1), height.max(1))),
        }
    }
}

impl Default for RenderRequest {
    fn default() -> Self {
        Self {
            page_index: 0,
            scale: 1.0,
            bounds: None,
        }
    }
}

// RGBA8, row-major.
#[derive(Debug, Clone)]
pub struct RenderImage {
    pub width: u32,
    pub height: u32,
    pub pixels: Vec<u8>,
}

/// An opened, readable document. Dropping the last handle releases the engine resources.
pub trait DocumentBackend: Send + Sync {
    fn info(&self) -> &DocumentInfo;

    fn page_count(&self) -> usize {
        self.info().page_count
    }

    fn render_page(&self, request: RenderRequest) -> Result<RenderImage, DecodeError>;
}

/// Bytes of an encrypted document that could not be opened yet. Kept by the session so a
/// later password can be tried without fetching again.
#[derive(Debug, Clone)]
pub struct LockedDocument {
    id: DocumentId,
    bytes: Bytes,
}

impl LockedDocument {
    pub fn new(id: DocumentId, bytes: Bytes) -> Self {
        Self { id, bytes }
    }

    pub fn id(&self) -> DocumentId {
        self.id
    }

    pub fn bytes(&self) -> &Bytes {
        &self.bytes
    }
}

/// The document engine. Implementations decode off the caller's task.
#[async_trait]
pub trait DocumentProvider: Send + Sync {
    /// Opens `bytes`. Returns [`DecodeError::Locked`] when the document is encrypted and
    /// `password` is missing or wrong.
    async fn open(
        &self,
        id: DocumentId,
        bytes: Bytes,
        password: Option<&str>,
    ) -> Result<Arc<dyn DocumentBackend>, DecodeError>;

    async fn unlock(
        &self,
        locked: &LockedDocument,
        password: &str,
    ) -> Result<Arc<dyn DocumentBackend>, DecodeError> {
        self.open(locked.id(), locked.bytes().clone(), Some(password))
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn document_id_is_stable_for_same_source() {
        let first = document_id_for_source("https://example.com/a.pdf");
        let second = document_id_for_source("  https://example.com/a.pdf\n");
        assert_eq!(first, second);
        assert_ne!(first, document_id_for_source("https://example.com/b.pdf"));
    }

    #[test]
    fn fit_request_never_has_zero_bounds() {
        let request = RenderRequest::fit(2, 0, 40);
        assert_eq!(request.bounds, Some((1, 40)));
        assert_eq!(request.page_index, 2);
    }
}
