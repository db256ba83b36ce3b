use std::fmt;
use std::path::{Path, PathBuf};

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use bytes::Bytes;
use url::Url;

use crate::error::LoadError;

/// How the bytes behind a source string are obtained.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Source {
    RemoteFetch(Url),
    LocalFile(PathBuf),
    DataPayload { bytes: Bytes, base64: bool },
    BundleResource(PathBuf),
}

impl Source {
    pub fn kind(&self) -> &'static str {
        match self {
            Source::RemoteFetch(_) => "remote",
            Source::LocalFile(_) => "file",
            Source::DataPayload { .. } => "data",
            Source::BundleResource(_) => "bundle",
        }
    }
}

impl fmt::Display for Source {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Source::RemoteFetch(url) => write!(f, "remote {url}"),
            Source::LocalFile(path) => write!(f, "file {}", path.display()),
            Source::DataPayload { bytes, base64 } => write!(
                f,
                "data {} bytes{}",
                bytes.len(),
                if *base64 { " (base64)" } else { "" }
            ),
            Source::BundleResource(path) => write!(f, "bundle {}", path.display()),
        }
    }
}

pub fn is_blank(raw: &str) -> bool {
    raw.trim().is_empty()
}

/// Classifies source strings. Bundle resources are looked up by base name in
/// `resource_dirs`, in order.
#[derive(Debug, Clone, Default)]
pub struct SourceResolver {
    resource_dirs: Vec<PathBuf>,
}

impl SourceResolver {
    pub fn new(resource_dirs: Vec<PathBuf>) -> Self {
        Self { resource_dirs }
    }

    /// Returns `Ok(None)` for blank input, which callers treat as "nothing to load yet".
    pub fn resolve(&self, raw: &str) -> Result<Option<Source>, LoadError> {
        if is_blank(raw) {
            return Ok(None);
        }
        let raw = raw.trim();

        if has_scheme(raw, "data:") {
            return decode_data_url(raw).map(Some);
        }
        if has_scheme(raw, "http://") || has_scheme(raw, "https://") {
            let url = Url::parse(raw)
                .map_err(|err| LoadError::InvalidSource(format!("{raw}: {err}")))?;
            return Ok(Some(Source::RemoteFetch(url)));
        }
        if has_scheme(raw, "file://") {
            let path = Url::parse(raw)
                .ok()
                .and_then(|url| url.to_file_path().ok())
                .ok_or_else(|| LoadError::InvalidSource(format!("Invalid file URL: {raw}")))?;
            return Ok(Some(Source::LocalFile(path)));
        }
        if has_scheme(raw, "content://") {
            let url = Url::parse(raw)
                .map_err(|_| LoadError::InvalidSource(format!("Invalid content URI: {raw}")))?;
            return Ok(Some(Source::LocalFile(PathBuf::from(url.path()))));
        }

        let path = Path::new(raw);
        if path.is_absolute() && path.exists() {
            return Ok(Some(Source::LocalFile(path.to_path_buf())));
        }
        if let Some(found) = self.find_bundle_resource(path) {
            return Ok(Some(Source::BundleResource(found)));
        }
        Err(LoadError::SourceNotFound(raw.to_string()))
    }

    fn find_bundle_resource(&self, path: &Path) -> Option<PathBuf> {
        let name = path.file_stem()?.to_str()?;
        let ext = path
            .extension()
            .and_then(|ext| ext.to_str())
            .filter(|ext| !ext.is_empty())
            .unwrap_or("pdf");
        let file_name = format!("{name}.{ext}");
        self.resource_dirs
            .iter()
            .map(|dir| dir.join(&file_name))
            .find(|candidate| candidate.is_file())
    }
}

fn has_scheme(raw: &str, prefix: &str) -> bool {
    raw.len() >= prefix.len()
        && raw.is_char_boundary(prefix.len())
        && raw[..prefix.len()].eq_ignore_ascii_case(prefix)
}

fn decode_data_url(raw: &str) -> Result<Source, LoadError> {
    let (meta, payload) = raw
        .split_once(',')
        .ok_or_else(|| LoadError::InvalidSource("Invalid data URL".into()))?;
    let base64 = meta.contains(";base64");
    let bytes = if base64 {
        let compact: String = payload.chars().filter(|c| !c.is_whitespace()).collect();
        BASE64
            .decode(compact.as_bytes())
            .map_err(|err| LoadError::InvalidSource(format!("Invalid data URL payload: {err}")))?
    } else {
        payload.as_bytes().to_vec()
    };
    Ok(Source::DataPayload {
        bytes: Bytes::from(bytes),
        base64,
    })
}
