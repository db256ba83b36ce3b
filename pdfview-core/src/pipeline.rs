use std::path::Path;
use std::sync::Arc;

use bytes::Bytes;
use tracing::{debug, instrument};

use crate::cache::{CacheManager, CacheStore};
use crate::cancel::CancellationToken;
use crate::coordinator::{JobKind, LoadJob, LoadOutcome};
use crate::document::{
    document_id_for_source, DocumentBackend, DocumentProvider, LockedDocument,
};
use crate::error::{DecodeError, LoadError};
use crate::fetch::Fetcher;
use crate::source::{Source, SourceResolver};

/// Runs [`LoadJob`]s: resolve, read from cache or fetch, decode, unlock. Shared by every
/// view in the process; holds no per-view state.
pub struct LoadPipeline {
    resolver: SourceResolver,
    cache: Arc<dyn CacheStore>,
    fetcher: Arc<dyn Fetcher>,
    provider: Arc<dyn DocumentProvider>,
}

impl LoadPipeline {
    pub fn new(
        resolver: SourceResolver,
        cache: Arc<dyn CacheStore>,
        fetcher: Arc<dyn Fetcher>,
        provider: Arc<dyn DocumentProvider>,
    ) -> Self {
        Self {
            resolver,
            cache,
            fetcher,
            provider,
        }
    }

    pub fn cache(&self) -> &Arc<dyn CacheStore> {
        &self.cache
    }

    #[instrument(skip(self, job), fields(session = %job.session, generation = job.generation))]
    pub async fn run(&self, job: LoadJob) -> LoadOutcome {
        let result = match &job.kind {
            JobKind::Open => self.open(&job).await,
            JobKind::Unlock(locked) => self.unlock(locked, job.password.as_deref()).await,
        };
        match result {
            Ok(outcome) => outcome,
            Err(err) => LoadOutcome::Failed(err),
        }
    }

    /// Bytes behind `source`, going through the cache for remote sources.
    pub async fn fetch_bytes(
        &self,
        source: &str,
        cache: &CacheManager,
        token: &CancellationToken,
    ) -> Result<Option<Bytes>, LoadError> {
        let resolved = self
            .resolver
            .resolve(source)?
            .ok_or_else(|| LoadError::SourceNotFound(source.to_string()))?;
        debug!(source = %resolved, "source resolved");
        let bytes = match resolved {
            Source::DataPayload { bytes, .. } => bytes,
            Source::LocalFile(path) | Source::BundleResource(path) => read_file(&path).await?,
            Source::RemoteFetch(url) => {
                if let Some(path) = cache.get(&url) {
                    read_file(&path).await?
                } else {
                    if token.is_cancelled() {
                        return Ok(None);
                    }
                    let bytes = self.fetcher.fetch(&url).await?;
                    cache.put(&url, &bytes);
                    bytes
                }
            }
        };
        if token.is_cancelled() {
            return Ok(None);
        }
        Ok(Some(bytes))
    }

    /// One-shot open outside of any view session. An encrypted document is an error here:
    /// `InvalidPassword` if a password was given, `LockedNoPassword` otherwise.
    pub async fn open_document(
        &self,
        source: &str,
        password: Option<&str>,
        cache: &CacheManager,
    ) -> Result<Arc<dyn DocumentBackend>, LoadError> {
        let token = CancellationToken::new();
        let bytes = self
            .fetch_bytes(source, cache, &token)
            .await?
            .ok_or_else(|| LoadError::SourceNotFound(source.to_string()))?;
        let password = password.filter(|p| !p.is_empty());
        match self
            .provider
            .open(document_id_for_source(source), bytes, password)
            .await
        {
            Ok(document) => Ok(document),
            Err(DecodeError::Locked) if password.is_some() => Err(LoadError::InvalidPassword),
            Err(err) => Err(err.into()),
        }
    }

    async fn open(&self, job: &LoadJob) -> Result<LoadOutcome, LoadError> {
        if job.token.is_cancelled() {
            return Ok(LoadOutcome::Cancelled);
        }
        let cache = CacheManager::new(Arc::clone(&self.cache), job.cache_policy, job.cache_ttl);
        let Some(bytes) = self.fetch_bytes(&job.source, &cache, &job.token).await? else {
            return Ok(LoadOutcome::Cancelled);
        };

        let id = document_id_for_source(&job.source);
        let password = job.password.as_deref().filter(|p| !p.is_empty());
        match self.provider.open(id, bytes.clone(), password).await {
            Ok(document) => Ok(LoadOutcome::Loaded(document)),
            Err(DecodeError::Locked) => Ok(LoadOutcome::Locked {
                document: LockedDocument::new(id, bytes),
                password_rejected: password.is_some(),
            }),
            Err(err) => Err(err.into()),
        }
    }

    async fn unlock(
        &self,
        locked: &LockedDocument,
        password: Option<&str>,
    ) -> Result<LoadOutcome, LoadError> {
        let Some(password) = password.filter(|p| !p.is_empty()) else {
            return Ok(LoadOutcome::Locked {
                document: locked.clone(),
                password_rejected: false,
            });
        };
        match self.provider.unlock(locked, password).await {
            Ok(document) => Ok(LoadOutcome::Loaded(document)),
            Err(DecodeError::Locked) => Ok(LoadOutcome::Locked {
                document: locked.clone(),
                password_rejected: true,
            }),
            Err(err) => Err(err.into()),
        }
    }
}

async fn read_file(path: &Path) -> Result<Bytes, LoadError> {
    tokio::fs::read(path)
        .await
        .map(Bytes::from)
        .map_err(|err| LoadError::io(path, &err))
}
