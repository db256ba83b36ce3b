use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use serde_with::{serde_as, DurationSeconds};

use crate::cache::{CachePolicy, DEFAULT_CACHE_TTL};
use crate::fetch::{DEFAULT_FETCH_TIMEOUT, MAX_DOCUMENT_BYTES};

/// Per-view parameters. Page numbers here are 1-based, as consumers see them.
#[derive(Debug, Clone, PartialEq)]
pub struct ViewOptions {
    pub password: Option<String>,
    pub initial_page: Option<i64>,
    /// Requested page, applied as soon as the first document is shown.
    pub page: Option<i64>,
    pub cache_policy: CachePolicy,
    pub cache_ttl: Duration,
    pub scroll_enabled: bool,
    pub enable_double_tap_zoom: bool,
    pub native_password_prompt: bool,
}

impl Default for ViewOptions {
    fn default() -> Self {
        Self {
            password: None,
            initial_page: None,
            page: None,
            cache_policy: CachePolicy::None,
            cache_ttl: DEFAULT_CACHE_TTL,
            scroll_enabled: true,
            enable_double_tap_zoom: true,
            native_password_prompt: true,
        }
    }
}

impl ViewOptions {
    pub fn with_password(mut self, password: impl Into<String>) -> Self {
        let password = password.into();
        self.password = (!password.is_empty()).then_some(password);
        self
    }

    pub fn with_initial_page(mut self, page: i64) -> Self {
        self.initial_page = Some(page.max(1));
        self
    }

    /// 0-based alias of [`with_initial_page`](Self::with_initial_page).
    pub fn with_initial_page_index(mut self, index: i64) -> Self {
        self.initial_page = Some(index.max(0) + 1);
        self
    }

    pub fn with_page(mut self, page: i64) -> Self {
        self.page = Some(page);
        self
    }

    pub fn with_cache(mut self, policy: CachePolicy, ttl: Duration) -> Self {
        self.cache_policy = policy;
        self.cache_ttl = ttl;
        self
    }
}

/// TTLs arrive as fractional seconds; negative values clamp to zero.
pub fn ttl_from_secs(seconds: f64) -> Duration {
    if seconds.is_finite() && seconds > 0.0 {
        Duration::from_secs_f64(seconds)
    } else {
        Duration::ZERO
    }
}

/// Process-wide settings, read from `config.toml`.
#[serde_as]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub cache_policy: CachePolicy,
    #[serde_as(as = "DurationSeconds<u64>")]
    pub cache_ttl: Duration,
    pub cache_dir: Option<PathBuf>,
    pub resource_dirs: Vec<PathBuf>,
    pub native_password_prompt: bool,
    #[serde_as(as = "DurationSeconds<u64>")]
    pub fetch_timeout: Duration,
    /// Larger downloads fail instead of being truncated.
    pub max_document_bytes: u64,
    pub scroll_enabled: bool,
    pub enable_double_tap_zoom: bool,
}

impl Default for Settings {
    fn default() -> Self {
        let view = ViewOptions::default();
        Self {
            cache_policy: view.cache_policy,
            cache_ttl: view.cache_ttl,
            cache_dir: None,
            resource_dirs: Vec::new(),
            native_password_prompt: view.native_password_prompt,
            fetch_timeout: DEFAULT_FETCH_TIMEOUT,
            max_document_bytes: MAX_DOCUMENT_BYTES,
            scroll_enabled: view.scroll_enabled,
            enable_double_tap_zoom: view.enable_double_tap_zoom,
        }
    }
}

impl Settings {
    /// A missing file yields defaults; an unreadable or malformed one is an error.
    pub fn load(path: &Path) -> Result<Self> {
        let text = match fs::read_to_string(path) {
            Ok(text) => text,
            Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(Self::default()),
            Err(err) => {
                return Err(err).with_context(|| format!("failed to read config file {:?}", path))
            }
        };
        Self::from_toml_str(&text).with_context(|| format!("failed to parse config file {:?}", path))
    }

    pub fn from_toml_str(text: &str) -> Result<Self> {
        Ok(toml::from_str(text)?)
    }

    pub fn view_options(&self) -> ViewOptions {
        ViewOptions {
            cache_policy: self.cache_policy,
            cache_ttl: self.cache_ttl,
            native_password_prompt: self.native_password_prompt,
            scroll_enabled: self.scroll_enabled,
            enable_double_tap_zoom: self.enable_double_tap_zoom,
            ..ViewOptions::default()
        }
    }
}
