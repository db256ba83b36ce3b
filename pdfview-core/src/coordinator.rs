//! [`ViewSession`] performs no I/O: inputs return a [`LoadJob`] to run elsewhere and every
//! job comes back as a [`Completion`]. At most one job is in flight per session.

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info};
use uuid::Uuid;

use crate::cache::CachePolicy;
use crate::cancel::CancellationToken;
use crate::config::{ttl_from_secs, ViewOptions};
use crate::document::{DocumentBackend, LockedDocument};
use crate::error::LoadError;
use crate::events::{EventEmitter, ViewEvent};
use crate::navigator::{InitialPage, PageNavigator};
use crate::source::is_blank;

pub type SessionId = Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadState {
    Idle,
    Loading,
    Loaded,
    Locked,
    Failed,
}

#[derive(Debug, Clone)]
pub enum JobKind {
    /// Resolve, fetch (or read from cache), and decode the source.
    Open,
    /// Retry an already fetched encrypted document with a new password.
    Unlock(LockedDocument),
}

/// Everything the background pipeline needs for one attempt, captured at request time.
#[derive(Debug, Clone)]
pub struct LoadJob {
    pub session: SessionId,
    pub generation: u64,
    pub source: String,
    pub password: Option<String>,
    pub cache_policy: CachePolicy,
    pub cache_ttl: Duration,
    pub kind: JobKind,
    pub token: CancellationToken,
}

pub enum LoadOutcome {
    Loaded(Arc<dyn DocumentBackend>),
    /// The document is encrypted. `password_rejected` is set when a password was tried.
    Locked {
        document: LockedDocument,
        password_rejected: bool,
    },
    Failed(LoadError),
    Cancelled,
}

impl std::fmt::Debug for LoadOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LoadOutcome::Loaded(doc) => f
                .debug_tuple("Loaded")
                .field(&doc.info().page_count)
                .finish(),
            LoadOutcome::Locked {
                password_rejected, ..
            } => f
                .debug_struct("Locked")
                .field("password_rejected", password_rejected)
                .finish(),
            LoadOutcome::Failed(err) => f.debug_tuple("Failed").field(err).finish(),
            LoadOutcome::Cancelled => f.write_str("Cancelled"),
        }
    }
}

#[derive(Debug)]
pub struct Completion {
    pub generation: u64,
    pub outcome: LoadOutcome,
}

/// Read-only view of a session, for hosts and tests.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionSnapshot {
    pub state: LoadState,
    pub source: Option<String>,
    pub page: usize,
    pub page_count: usize,
    pub pending_reload: bool,
    pub pending_page: Option<usize>,
    pub initial_page: InitialPage,
    pub detached: bool,
    pub has_document: bool,
}

struct InFlight {
    generation: u64,
    token: CancellationToken,
}

pub struct ViewSession {
    id: SessionId,
    source: Option<String>,
    options: ViewOptions,
    state: LoadState,
    pending_reload: bool,
    in_flight: Option<InFlight>,
    generation: u64,
    detached: bool,
    document: Option<Arc<dyn DocumentBackend>>,
    locked: Option<LockedDocument>,
    navigator: PageNavigator,
    emitter: EventEmitter,
}

impl ViewSession {
    pub fn new(options: ViewOptions) -> Self {
        let mut navigator = PageNavigator::new();
        if let Some(page) = options.initial_page {
            navigator.set_initial_page(page);
        }
        if let Some(page) = options.page {
            navigator.go_to(page);
        }
        Self {
            id: Uuid::new_v4(),
            source: None,
            options,
            state: LoadState::Idle,
            pending_reload: false,
            in_flight: None,
            generation: 0,
            detached: false,
            document: None,
            locked: None,
            navigator,
            emitter: EventEmitter::new(),
        }
    }

    pub fn id(&self) -> SessionId {
        self.id
    }

    pub fn state(&self) -> LoadState {
        self.state
    }

    pub fn page(&self) -> usize {
        self.navigator.page()
    }

    pub fn page_count(&self) -> usize {
        self.navigator.page_count()
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        SessionSnapshot {
            state: self.state,
            source: self.source.clone(),
            page: self.navigator.page(),
            page_count: self.navigator.page_count(),
            pending_reload: self.pending_reload,
            pending_page: self.navigator.pending(),
            initial_page: self.navigator.initial(),
            detached: self.detached,
            has_document: self.document.is_some(),
        }
    }

    /// Events produced since the last call, in emission order.
    pub fn take_events(&mut self) -> Vec<ViewEvent> {
        self.emitter.take()
    }

    /// Blank sources are ignored so transient empty values during mount do nothing.
    pub fn set_source(&mut self, source: &str) -> Option<LoadJob> {
        if is_blank(source) {
            return None;
        }
        self.source = Some(source.trim().to_string());
        self.request()
    }

    /// Stores the password. A locked document is retried with it; otherwise a document that
    /// already went through a load attempt is reloaded.
    pub fn set_password(&mut self, password: Option<String>) -> Option<LoadJob> {
        self.options.password = password.filter(|p| !p.is_empty());
        match self.state {
            LoadState::Locked => {
                let password = self.options.password.clone()?;
                let locked = self.locked.clone()?;
                self.begin(JobKind::Unlock(locked), Some(password))
            }
            LoadState::Loading | LoadState::Loaded | LoadState::Failed => self.request(),
            LoadState::Idle => None,
        }
    }

    pub fn set_initial_page(&mut self, page: i64) {
        self.navigator.set_initial_page(page);
    }

    pub fn set_initial_page_index(&mut self, index: i64) {
        self.navigator.set_initial_page(index.max(0) + 1);
    }

    /// Takes effect on the next fetch.
    pub fn set_cache_policy(&mut self, policy: CachePolicy) {
        self.options.cache_policy = policy;
    }

    pub fn set_cache_ttl_secs(&mut self, seconds: f64) {
        self.options.cache_ttl = ttl_from_secs(seconds);
    }

    /// Locked documents are always reported; this only decides whether that is
    /// `onPasswordRequired` or a plain error.
    pub fn set_native_password_prompt(&mut self, enabled: bool) {
        self.options.native_password_prompt = enabled;
    }

    pub fn set_scroll_enabled(&mut self, enabled: bool) -> Option<LoadJob> {
        if self.options.scroll_enabled == enabled {
            return None;
        }
        self.options.scroll_enabled = enabled;
        self.reload_if_loaded()
    }

    pub fn set_double_tap_zoom(&mut self, enabled: bool) -> Option<LoadJob> {
        if self.options.enable_double_tap_zoom == enabled {
            return None;
        }
        self.options.enable_double_tap_zoom = enabled;
        self.reload_if_loaded()
    }

    /// Re-runs the pipeline for the current source, coalescing with any job in flight.
    pub fn request(&mut self) -> Option<LoadJob> {
        if self.detached {
            self.pending_reload = false;
            return None;
        }
        self.source.as_ref()?;
        if self.state == LoadState::Loading {
            if !self.pending_reload {
                debug!(session = %self.id, "load in progress; coalescing request");
            }
            self.pending_reload = true;
            if let Some(in_flight) = &self.in_flight {
                in_flight.token.cancel();
            }
            return None;
        }
        let password = self.options.password.clone();
        self.begin(JobKind::Open, password)
    }

    pub fn go_to_page(&mut self, page: i64) {
        if let Some(change) = self.navigator.go_to(page) {
            self.emitter.emit(change.into());
        }
    }

    pub fn next_page(&mut self) {
        if let Some(change) = self.navigator.next() {
            self.emitter.emit(change.into());
        }
    }

    pub fn prev_page(&mut self) {
        if let Some(change) = self.navigator.prev() {
            self.emitter.emit(change.into());
        }
    }

    /// The renderer moved on its own (user scroll); `index` is 0-based.
    pub fn observe_page(&mut self, index: usize) {
        if self.state != LoadState::Loaded {
            return;
        }
        if let Some(change) = self.navigator.observe(index) {
            self.emitter.emit(change.into());
        }
    }

    pub fn observe_scale(&mut self, scale: f32) {
        if self.state == LoadState::Loaded && scale.is_finite() {
            self.emitter.emit(ViewEvent::ScaleChanged { scale });
        }
    }

    /// The view left the UI tree. Nothing is emitted afterwards. A loaded document is
    /// released now; a job in flight is cancelled and its result released when it reports.
    pub fn detach(&mut self) {
        if self.detached {
            return;
        }
        info!(session = %self.id, state = ?self.state, "view detached");
        self.detached = true;
        self.pending_reload = false;
        self.emitter.mute();
        self.locked = None;
        self.release_document();
        match &self.in_flight {
            Some(in_flight) => in_flight.token.cancel(),
            None => self.state = LoadState::Idle,
        }
    }

    /// Re-enables the view after [`detach`](Self::detach). A load cancelled by the detach
    /// is restarted once its job reports back.
    pub fn attach(&mut self) {
        if !self.detached {
            return;
        }
        self.detached = false;
        self.emitter.unmute();
        if self.in_flight.is_some() && self.source.is_some() {
            debug!(session = %self.id, "reattached during load; reload queued");
            self.pending_reload = true;
        }
    }

    /// Applies the result of a job. Returns the follow-up job when a coalesced request was
    /// waiting.
    pub fn complete(&mut self, completion: Completion) -> Option<LoadJob> {
        let Completion {
            generation,
            outcome,
        } = completion;
        match &self.in_flight {
            Some(in_flight) if in_flight.generation == generation => {}
            _ => {
                debug!(session = %self.id, generation, "discarding stale completion");
                return None;
            }
        }
        self.in_flight = None;

        if self.detached {
            debug!(session = %self.id, generation, ?outcome, "releasing result of detached view");
            drop(outcome);
            self.state = LoadState::Idle;
            return None;
        }

        if self.pending_reload {
            debug!(session = %self.id, generation, ?outcome, "superseded; reloading");
            drop(outcome);
            self.state = LoadState::Idle;
            return self.request();
        }

        match outcome {
            LoadOutcome::Loaded(document) => self.on_loaded(document),
            LoadOutcome::Locked {
                document,
                password_rejected,
            } => self.on_locked(document, password_rejected),
            LoadOutcome::Failed(err) => {
                info!(session = %self.id, %err, "load failed");
                self.state = LoadState::Failed;
                self.emitter.emit(ViewEvent::error(err));
            }
            LoadOutcome::Cancelled => {
                self.state = if self.locked.is_some() {
                    LoadState::Locked
                } else {
                    LoadState::Idle
                };
            }
        }
        None
    }

    fn reload_if_loaded(&mut self) -> Option<LoadJob> {
        match self.state {
            LoadState::Loaded | LoadState::Loading => self.request(),
            _ => None,
        }
    }

    fn begin(&mut self, kind: JobKind, password: Option<String>) -> Option<LoadJob> {
        let source = self.source.clone()?;
        if let JobKind::Open = kind {
            self.locked = None;
        }
        self.release_document();
        self.state = LoadState::Loading;
        self.pending_reload = false;
        self.generation += 1;
        let token = CancellationToken::new();
        self.in_flight = Some(InFlight {
            generation: self.generation,
            token: token.clone(),
        });
        info!(session = %self.id, generation = self.generation, source = %source, "load started");
        Some(LoadJob {
            session: self.id,
            generation: self.generation,
            source,
            password,
            cache_policy: self.options.cache_policy,
            cache_ttl: self.options.cache_ttl,
            kind,
            token,
        })
    }

    fn on_loaded(&mut self, document: Arc<dyn DocumentBackend>) {
        let page_count = document.page_count();
        info!(session = %self.id, page_count, "document loaded");
        self.locked = None;
        self.state = LoadState::Loaded;
        self.document = Some(document);
        let change = self.navigator.attach(page_count);
        self.emitter.emit(ViewEvent::Load {
            source: self.source.clone().unwrap_or_default(),
            page_count,
        });
        self.emitter.emit(change.into());
    }

    fn on_locked(&mut self, document: LockedDocument, password_rejected: bool) {
        info!(session = %self.id, password_rejected, "document is locked");
        self.state = LoadState::Locked;
        self.locked = Some(document);
        let event = if password_rejected {
            ViewEvent::error(LoadError::InvalidPassword)
        } else if self.options.native_password_prompt {
            ViewEvent::PasswordRequired
        } else {
            ViewEvent::error(LoadError::LockedNoPassword)
        };
        self.emitter.emit(event);
    }

    fn release_document(&mut self) {
        if self.document.take().is_some() {
            debug!(session = %self.id, "document released");
        }
        self.navigator.detach();
    }
}
