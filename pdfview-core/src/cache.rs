use std::fs::{self, File};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::{debug, warn};
use url::Url;
use uuid::Uuid;

pub const CACHE_DIR_NAME: &str = "PdfViewCache";
pub const DEFAULT_CACHE_TTL: Duration = Duration::from_secs(60 * 60 * 24 * 7);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CachePolicy {
    #[default]
    None,
    Disk,
}

impl std::str::FromStr for CachePolicy {
    type Err = String;

    fn from_str(value: &str) -> std::result::Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "none" => Ok(CachePolicy::None),
            "disk" => Ok(CachePolicy::Disk),
            other => Err(format!("unknown cache policy `{other}` (expected none or disk)")),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheEntry {
    pub file_path: PathBuf,
    pub written_at: SystemTime,
}

impl CacheEntry {
    /// An entry is usable iff `now - written_at <= ttl`. Timestamps in the future count as
    /// fresh.
    pub fn is_fresh(&self, now: SystemTime, ttl: Duration) -> bool {
        match now.duration_since(self.written_at) {
            Ok(age) => age <= ttl,
            Err(_) => true,
        }
    }
}

pub fn cache_key(url: &Url) -> String {
    hex::encode(Sha256::digest(url.as_str().as_bytes()))
}

pub trait CacheStore: Send + Sync {
    fn entry(&self, url: &Url) -> Result<Option<CacheEntry>>;
    fn put(&self, url: &Url, bytes: &[u8]) -> Result<PathBuf>;
    /// Callers must not clear while a read of a cached path is in flight.
    fn clear(&self) -> Result<()>;
}

pub struct DiskCache {
    root: PathBuf,
}

impl DiskCache {
    pub fn new(root: PathBuf) -> Self {
        Self { root }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn path_for(&self, url: &Url) -> PathBuf {
        self.root.join(format!("{}.pdf", cache_key(url)))
    }
}

impl CacheStore for DiskCache {
    fn entry(&self, url: &Url) -> Result<Option<CacheEntry>> {
        let path = self.path_for(url);
        let metadata = match fs::metadata(&path) {
            Ok(metadata) => metadata,
            Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(err) => {
                return Err(err).with_context(|| format!("failed to stat cache file {:?}", path))
            }
        };
        if !metadata.is_file() {
            return Ok(None);
        }
        let written_at = metadata
            .modified()
            .with_context(|| format!("no modification time for {:?}", path))?;
        Ok(Some(CacheEntry {
            file_path: path,
            written_at,
        }))
    }

    fn put(&self, url: &Url, bytes: &[u8]) -> Result<PathBuf> {
        fs::create_dir_all(&self.root)
            .with_context(|| format!("failed to create cache directory at {:?}", self.root))?;
        let path = self.path_for(url);
        let tmp = path.with_extension(format!("{}.tmp", Uuid::new_v4().simple()));
        let mut file = File::create(&tmp)
            .with_context(|| format!("failed to open temp cache file {:?}", tmp))?;
        file.write_all(bytes)?;
        file.flush()?;
        drop(file);
        if let Err(err) = fs::rename(&tmp, &path) {
            let _ = fs::remove_file(&tmp);
            return Err(err).with_context(|| format!("failed to move cache file to {:?}", path));
        }
        Ok(path)
    }

    fn clear(&self) -> Result<()> {
        match fs::remove_dir_all(&self.root) {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(err) => {
                Err(err).with_context(|| format!("failed to remove cache directory {:?}", self.root))
            }
        }
    }
}

#[derive(Clone)]
pub struct CacheManager {
    store: Arc<dyn CacheStore>,
    policy: CachePolicy,
    ttl: Duration,
}

impl CacheManager {
    pub fn new(store: Arc<dyn CacheStore>, policy: CachePolicy, ttl: Duration) -> Self {
        Self { store, policy, ttl }
    }

    pub fn get(&self, url: &Url) -> Option<PathBuf> {
        self.get_at(url, SystemTime::now())
    }

    fn get_at(&self, url: &Url, now: SystemTime) -> Option<PathBuf> {
        if self.policy != CachePolicy::Disk {
            return None;
        }
        match self.store.entry(url) {
            Ok(Some(entry)) if entry.is_fresh(now, self.ttl) => {
                debug!(%url, path = %entry.file_path.display(), "cache hit");
                Some(entry.file_path)
            }
            Ok(Some(_)) => {
                debug!(%url, "cache entry expired");
                None
            }
            Ok(None) => {
                debug!(%url, "cache miss");
                None
            }
            Err(err) => {
                warn!(?err, %url, "failed to inspect cache entry");
                None
            }
        }
    }

    /// Write failures are logged and otherwise ignored; the fetched bytes are still used.
    pub fn put(&self, url: &Url, bytes: &[u8]) -> Option<PathBuf> {
        if self.policy != CachePolicy::Disk {
            return None;
        }
        match self.store.put(url, bytes) {
            Ok(path) => Some(path),
            Err(err) => {
                warn!(?err, %url, "failed to write cache entry");
                None
            }
        }
    }

    pub fn clear(&self) -> Result<()> {
        self.store.clear()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    const URL: &str = "https://example.com/report.pdf";

    fn url() -> Url {
        Url::parse(URL).unwrap()
    }

    fn age_file(path: &Path, age: Duration) {
        let file = File::options().write(true).open(path).unwrap();
        file.set_modified(SystemTime::now() - age).unwrap();
    }

    #[test]
    fn key_is_stable_and_url_specific() {
        assert_eq!(cache_key(&url()), cache_key(&url()));
        let other = Url::parse("https://example.com/other.pdf").unwrap();
        assert_ne!(cache_key(&url()), cache_key(&other));
        assert_eq!(cache_key(&url()).len(), 64);
    }

    #[test]
    fn key_ignores_spelling_differences_of_the_same_url() {
        let bare = Url::parse("HTTPS://Example.COM").unwrap();
        let canonical = Url::parse("https://example.com/").unwrap();
        assert_eq!(cache_key(&bare), cache_key(&canonical));
    }

    #[test]
    fn put_then_get_within_ttl() {
        let dir = tempdir().unwrap();
        let store = Arc::new(DiskCache::new(dir.path().join(CACHE_DIR_NAME)));
        let manager = CacheManager::new(store.clone(), CachePolicy::Disk, DEFAULT_CACHE_TTL);

        assert_eq!(manager.get(&url()), None);
        let written = manager.put(&url(), b"%PDF-1.7").unwrap();
        assert_eq!(written, store.path_for(&url()));
        assert_eq!(manager.get(&url()), Some(written.clone()));
        assert_eq!(fs::read(written).unwrap(), b"%PDF-1.7");
    }

    #[test]
    fn expired_entries_are_treated_as_absent_but_kept() {
        let dir = tempdir().unwrap();
        let store = Arc::new(DiskCache::new(dir.path().to_path_buf()));
        let manager = CacheManager::new(store.clone(), CachePolicy::Disk, Duration::from_secs(60));

        let path = manager.put(&url(), b"old").unwrap();
        age_file(&path, Duration::from_secs(120));

        assert_eq!(manager.get(&url()), None);
        assert!(path.exists());

        manager.put(&url(), b"new").unwrap();
        assert_eq!(manager.get(&url()), Some(path.clone()));
        assert_eq!(fs::read(path).unwrap(), b"new");
    }

    #[test]
    fn policy_none_bypasses_the_store() {
        let dir = tempdir().unwrap();
        let store = Arc::new(DiskCache::new(dir.path().join("cache")));
        let manager = CacheManager::new(store.clone(), CachePolicy::None, DEFAULT_CACHE_TTL);

        assert_eq!(manager.put(&url(), b"bytes"), None);
        assert!(!store.root().exists());

        store.put(&url(), b"bytes").unwrap();
        assert_eq!(manager.get(&url()), None);
    }

    #[test]
    fn clear_removes_directory_and_is_idempotent() {
        let dir = tempdir().unwrap();
        let store = Arc::new(DiskCache::new(dir.path().join("cache")));
        let manager = CacheManager::new(store.clone(), CachePolicy::Disk, DEFAULT_CACHE_TTL);

        manager.put(&url(), b"bytes").unwrap();
        manager.clear().unwrap();
        assert!(!store.root().exists());
        manager.clear().unwrap();

        manager.put(&url(), b"again").unwrap();
        assert!(store.root().is_dir());
    }

    #[test]
    fn future_timestamps_count_as_fresh() {
        let entry = CacheEntry {
            file_path: PathBuf::from("x.pdf"),
            written_at: SystemTime::now() + Duration::from_secs(30),
        };
        assert!(entry.is_fresh(SystemTime::now(), Duration::ZERO));
    }

    #[test]
    fn cache_policy_parses_case_insensitively() {
        assert_eq!("Disk".parse::<CachePolicy>(), Ok(CachePolicy::Disk));
        assert_eq!("none".parse::<CachePolicy>(), Ok(CachePolicy::None));
        assert!("memory".parse::<CachePolicy>().is_err());
    }
}
