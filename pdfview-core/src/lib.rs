pub mod cache;
pub mod cancel;
pub mod config;
pub mod coordinator;
pub mod document;
pub mod error;
pub mod events;
pub mod fetch;
pub mod navigator;
pub mod pipeline;
pub mod source;
pub mod view;

pub use cache::{cache_key, CacheManager, CachePolicy, CacheStore, DiskCache, CACHE_DIR_NAME};
pub use cancel::CancellationToken;
pub use config::{Settings, ViewOptions};
pub use coordinator::{
    Completion, JobKind, LoadJob, LoadOutcome, LoadState, SessionId, SessionSnapshot, ViewSession,
};
pub use document::{
    document_id_for_source, DocumentBackend, DocumentId, DocumentInfo, DocumentMetadata,
    DocumentProvider, LockedDocument, RenderImage, RenderRequest,
};
pub use error::{DecodeError, LoadError};
pub use events::{ChannelSink, EventSink, ViewEvent};
pub use fetch::{Fetcher, HttpFetcher};
pub use navigator::{InitialPage, PageChange, PageNavigator};
pub use pipeline::LoadPipeline;
pub use source::{Source, SourceResolver};
pub use view::PdfView;
