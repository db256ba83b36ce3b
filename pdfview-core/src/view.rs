use std::sync::Arc;

use anyhow::{anyhow, Result};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, Instrument};

use crate::cache::CachePolicy;
use crate::config::ViewOptions;
use crate::coordinator::{Completion, LoadJob, SessionId, SessionSnapshot, ViewSession};
use crate::events::EventSink;
use crate::pipeline::LoadPipeline;

#[derive(Debug)]
enum ViewCommand {
    SetSource(String),
    SetPassword(Option<String>),
    SetInitialPage(i64),
    SetInitialPageIndex(i64),
    SetCachePolicy(CachePolicy),
    SetCacheTtl(f64),
    SetScrollEnabled(bool),
    SetDoubleTapZoom(bool),
    SetNativePasswordPrompt(bool),
    GoToPage(i64),
    Next,
    Prev,
    ObservePage(usize),
    ObserveScale(f32),
    Detach,
    Attach,
    Snapshot(oneshot::Sender<SessionSnapshot>),
}

/// Cloneable handle to a running view. Dropping every handle unmounts the view.
#[derive(Clone)]
pub struct PdfView {
    id: SessionId,
    commands: mpsc::UnboundedSender<ViewCommand>,
}

impl PdfView {
    pub fn spawn(
        pipeline: Arc<LoadPipeline>,
        options: ViewOptions,
        sink: Arc<dyn EventSink>,
    ) -> (Self, JoinHandle<()>) {
        let session = ViewSession::new(options);
        let id = session.id();
        let (commands_tx, commands_rx) = mpsc::unbounded_channel();
        let (completions_tx, completions_rx) = mpsc::unbounded_channel();
        let actor = ViewActor {
            session,
            pipeline,
            sink,
            commands: commands_rx,
            completions: completions_rx,
            completions_tx,
        };
        let span = tracing::info_span!("view", session = %id);
        let handle = tokio::spawn(actor.run().instrument(span));
        (
            Self {
                id,
                commands: commands_tx,
            },
            handle,
        )
    }

    pub fn id(&self) -> SessionId {
        self.id
    }

    pub fn set_source(&self, source: impl Into<String>) -> Result<()> {
        self.send(ViewCommand::SetSource(source.into()))
    }

    pub fn set_password(&self, password: Option<String>) -> Result<()> {
        self.send(ViewCommand::SetPassword(password))
    }

    pub fn set_initial_page(&self, page: i64) -> Result<()> {
        self.send(ViewCommand::SetInitialPage(page))
    }

    pub fn set_initial_page_index(&self, index: i64) -> Result<()> {
        self.send(ViewCommand::SetInitialPageIndex(index))
    }

    pub fn set_cache_policy(&self, policy: CachePolicy) -> Result<()> {
        self.send(ViewCommand::SetCachePolicy(policy))
    }

    pub fn set_cache_ttl(&self, seconds: f64) -> Result<()> {
        self.send(ViewCommand::SetCacheTtl(seconds))
    }

    pub fn set_scroll_enabled(&self, enabled: bool) -> Result<()> {
        self.send(ViewCommand::SetScrollEnabled(enabled))
    }

    pub fn set_double_tap_zoom(&self, enabled: bool) -> Result<()> {
        self.send(ViewCommand::SetDoubleTapZoom(enabled))
    }

    pub fn set_native_password_prompt(&self, enabled: bool) -> Result<()> {
        self.send(ViewCommand::SetNativePasswordPrompt(enabled))
    }

    pub fn go_to_page(&self, page: i64) -> Result<()> {
        self.send(ViewCommand::GoToPage(page))
    }

    pub fn next(&self) -> Result<()> {
        self.send(ViewCommand::Next)
    }

    pub fn prev(&self) -> Result<()> {
        self.send(ViewCommand::Prev)
    }

    /// Renderer callback: the view now shows the 0-based page `index`.
    pub fn observe_page(&self, index: usize) -> Result<()> {
        self.send(ViewCommand::ObservePage(index))
    }

    pub fn observe_scale(&self, scale: f32) -> Result<()> {
        self.send(ViewCommand::ObserveScale(scale))
    }

    pub fn detach(&self) -> Result<()> {
        self.send(ViewCommand::Detach)
    }

    pub fn attach(&self) -> Result<()> {
        self.send(ViewCommand::Attach)
    }

    pub async fn snapshot(&self) -> Result<SessionSnapshot> {
        let (reply, response) = oneshot::channel();
        self.send(ViewCommand::Snapshot(reply))?;
        response.await.map_err(|_| anyhow!("view task has stopped"))
    }

    /// 1-based current page; 1 while nothing is loaded.
    pub async fn page(&self) -> Result<usize> {
        Ok(self.snapshot().await?.page)
    }

    pub async fn page_count(&self) -> Result<usize> {
        Ok(self.snapshot().await?.page_count)
    }

    fn send(&self, command: ViewCommand) -> Result<()> {
        self.commands
            .send(command)
            .map_err(|_| anyhow!("view task has stopped"))
    }
}

struct ViewActor {
    session: ViewSession,
    pipeline: Arc<LoadPipeline>,
    sink: Arc<dyn EventSink>,
    commands: mpsc::UnboundedReceiver<ViewCommand>,
    completions: mpsc::UnboundedReceiver<Completion>,
    completions_tx: mpsc::UnboundedSender<Completion>,
}

impl ViewActor {
    async fn run(mut self) {
        loop {
            tokio::select! {
                command = self.commands.recv() => match command {
                    Some(command) => {
                        let job = self.handle(command);
                        self.start(job);
                    }
                    None => break,
                },
                Some(completion) = self.completions.recv() => {
                    let job = self.session.complete(completion);
                    self.start(job);
                }
            }
            self.flush().await;
        }
        debug!("all handles dropped; unmounting view");
        self.session.detach();
    }

    fn handle(&mut self, command: ViewCommand) -> Option<LoadJob> {
        let session = &mut self.session;
        match command {
            ViewCommand::SetSource(source) => session.set_source(&source),
            ViewCommand::SetPassword(password) => session.set_password(password),
            ViewCommand::SetInitialPage(page) => {
                session.set_initial_page(page);
                None
            }
            ViewCommand::SetInitialPageIndex(index) => {
                session.set_initial_page_index(index);
                None
            }
            ViewCommand::SetCachePolicy(policy) => {
                session.set_cache_policy(policy);
                None
            }
            ViewCommand::SetCacheTtl(seconds) => {
                session.set_cache_ttl_secs(seconds);
                None
            }
            ViewCommand::SetScrollEnabled(enabled) => session.set_scroll_enabled(enabled),
            ViewCommand::SetDoubleTapZoom(enabled) => session.set_double_tap_zoom(enabled),
            ViewCommand::SetNativePasswordPrompt(enabled) => {
                session.set_native_password_prompt(enabled);
                None
            }
            ViewCommand::GoToPage(page) => {
                session.go_to_page(page);
                None
            }
            ViewCommand::Next => {
                session.next_page();
                None
            }
            ViewCommand::Prev => {
                session.prev_page();
                None
            }
            ViewCommand::ObservePage(index) => {
                session.observe_page(index);
                None
            }
            ViewCommand::ObserveScale(scale) => {
                session.observe_scale(scale);
                None
            }
            ViewCommand::Detach => {
                session.detach();
                None
            }
            ViewCommand::Attach => {
                session.attach();
                None
            }
            ViewCommand::Snapshot(reply) => {
                let _ = reply.send(session.snapshot());
                None
            }
        }
    }

    fn start(&self, job: Option<LoadJob>) {
        let Some(job) = job else {
            return;
        };
        let pipeline = Arc::clone(&self.pipeline);
        let completions = self.completions_tx.clone();
        tokio::spawn(
            async move {
                let generation = job.generation;
                let outcome = pipeline.run(job).await;
                // A closed channel means the view is gone; dropping the outcome releases it.
                let _ = completions.send(Completion {
                    generation,
                    outcome,
                });
            }
            .in_current_span(),
        );
    }

    async fn flush(&mut self) {
        let events = self.session.take_events();
        if events.is_empty() {
            return;
        }
        tokio::task::yield_now().await;
        for event in events {
            debug!(event = event.name(), "emitting");
            self.sink.deliver(event);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use async_trait::async_trait;
    use bytes::Bytes;
    use tempfile::tempdir;
    use tokio::sync::Semaphore;
    use url::Url;

    use crate::cache::DiskCache;
    use crate::coordinator::LoadState;
    use crate::document::{
        DocumentBackend, DocumentId, DocumentInfo, DocumentMetadata, DocumentProvider,
        RenderImage, RenderRequest,
    };
    use crate::error::{DecodeError, LoadError};
    use crate::events::{ChannelSink, ViewEvent};
    use crate::fetch::Fetcher;
    use crate::source::SourceResolver;

    const TIMEOUT: Duration = Duration::from_secs(5);

    struct FakeDocument {
        info: DocumentInfo,
        drops: Arc<AtomicUsize>,
    }

    impl DocumentBackend for FakeDocument {
        fn info(&self) -> &DocumentInfo {
            &self.info
        }

        fn render_page(&self, _request: RenderRequest) -> Result<RenderImage, DecodeError> {
            Err(DecodeError::Malformed("unused".into()))
        }
    }

    impl Drop for FakeDocument {
        fn drop(&mut self) {
            self.drops.fetch_add(1, Ordering::SeqCst);
        }
    }

    /// `%PDF-n` opens with n pages; `%LOCK:<pw>:n` needs `<pw>`.
    #[derive(Default)]
    struct FakeProvider {
        drops: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl DocumentProvider for FakeProvider {
        async fn open(
            &self,
            id: DocumentId,
            bytes: Bytes,
            password: Option<&str>,
        ) -> Result<Arc<dyn DocumentBackend>, DecodeError> {
            let text = String::from_utf8_lossy(&bytes).to_string();
            let count = match text.strip_prefix("%LOCK:") {
                Some(rest) => {
                    let (expected, count) = rest.split_once(':').unwrap();
                    if password != Some(expected) {
                        return Err(DecodeError::Locked);
                    }
                    count.to_string()
                }
                None => text
                    .strip_prefix("%PDF-")
                    .ok_or_else(|| DecodeError::Malformed("not a PDF".into()))?
                    .to_string(),
            };
            Ok(Arc::new(FakeDocument {
                info: DocumentInfo {
                    id,
                    page_count: count.parse().unwrap(),
                    metadata: DocumentMetadata::default(),
                },
                drops: Arc::clone(&self.drops),
            }))
        }
    }

    /// Serves `/<anything>` with the URL's last path segment as the body. Each fetch waits
    /// for a permit from `gate`.
    struct GatedFetcher {
        gate: Arc<Semaphore>,
        calls: AtomicUsize,
    }

    #[async_trait]
    impl Fetcher for GatedFetcher {
        async fn fetch(&self, url: &Url) -> Result<Bytes, LoadError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let permit = self
                .gate
                .acquire()
                .await
                .map_err(|err| LoadError::Network(err.to_string()))?;
            permit.forget();
            let body = url.path_segments().and_then(|s| s.last()).unwrap_or("");
            Ok(Bytes::from(body.replace("%25", "%").replace("%3A", ":")))
        }
    }

    struct Harness {
        view: PdfView,
        events: mpsc::UnboundedReceiver<ViewEvent>,
        fetcher: Arc<GatedFetcher>,
        drops: Arc<AtomicUsize>,
        _dir: tempfile::TempDir,
    }

    fn harness(options: ViewOptions, open_gate: bool) -> Harness {
        let dir = tempdir().unwrap();
        let gate = Arc::new(Semaphore::new(if open_gate {
            Semaphore::MAX_PERMITS
        } else {
            0
        }));
        let fetcher = Arc::new(GatedFetcher {
            gate,
            calls: AtomicUsize::new(0),
        });
        let provider = FakeProvider::default();
        let drops = Arc::clone(&provider.drops);
        let pipeline = Arc::new(LoadPipeline::new(
            SourceResolver::default(),
            Arc::new(DiskCache::new(dir.path().join("cache"))),
            fetcher.clone(),
            Arc::new(provider),
        ));
        let (sink, events) = ChannelSink::new();
        let (view, _task) = PdfView::spawn(pipeline, options, Arc::new(sink));
        Harness {
            view,
            events,
            fetcher,
            drops,
            _dir: dir,
        }
    }

    async fn next_event(events: &mut mpsc::UnboundedReceiver<ViewEvent>) -> ViewEvent {
        tokio::time::timeout(TIMEOUT, events.recv())
            .await
            .expect("timed out waiting for an event")
            .expect("event channel closed")
    }

    async fn wait_for_state(view: &PdfView, state: LoadState) -> SessionSnapshot {
        tokio::time::timeout(TIMEOUT, async {
            loop {
                let snapshot = view.snapshot().await.unwrap();
                if snapshot.state == state {
                    return snapshot;
                }
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("timed out waiting for state")
    }

    #[tokio::test]
    async fn unencrypted_remote_document_loads_on_first_page() {
        let mut h = harness(ViewOptions::default(), true);
        h.view.set_source("https://example.com/%25PDF-3").unwrap();

        assert_eq!(
            next_event(&mut h.events).await,
            ViewEvent::Load {
                source: "https://example.com/%25PDF-3".into(),
                page_count: 3
            }
        );
        assert_eq!(
            next_event(&mut h.events).await,
            ViewEvent::PageChanged {
                page: 1,
                page_count: Some(3)
            }
        );
        assert_eq!(h.view.page_count().await.unwrap(), 3);
        assert_eq!(h.view.page().await.unwrap(), 1);

        h.view.go_to_page(10).unwrap();
        assert_eq!(
            next_event(&mut h.events).await,
            ViewEvent::PageChanged {
                page: 3,
                page_count: Some(3)
            }
        );
    }

    #[tokio::test]
    async fn encrypted_document_prompts_then_unlocks() {
        let mut h = harness(ViewOptions::default(), true);
        h.view
            .set_source("https://example.com/%25LOCK%3Acorrect%3A4")
            .unwrap();
        assert_eq!(next_event(&mut h.events).await, ViewEvent::PasswordRequired);
        wait_for_state(&h.view, LoadState::Locked).await;

        h.view.set_password(Some("wrong".into())).unwrap();
        assert_eq!(
            next_event(&mut h.events).await,
            ViewEvent::error("Invalid password")
        );
        wait_for_state(&h.view, LoadState::Locked).await;

        h.view.set_password(Some("correct".into())).unwrap();
        assert!(matches!(
            next_event(&mut h.events).await,
            ViewEvent::Load { page_count: 4, .. }
        ));
        assert_eq!(h.fetcher.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn rapid_source_changes_load_only_the_last() {
        let mut h = harness(ViewOptions::default(), false);
        h.view.set_source("https://example.com/%25PDF-1").unwrap();
        h.view.set_source("https://example.com/%25PDF-2").unwrap();
        h.view.set_source("https://example.com/%25PDF-5").unwrap();
        let snapshot = h.view.snapshot().await.unwrap();
        assert!(snapshot.pending_reload);

        h.fetcher.gate.add_permits(Semaphore::MAX_PERMITS);
        assert_eq!(
            next_event(&mut h.events).await,
            ViewEvent::Load {
                source: "https://example.com/%25PDF-5".into(),
                page_count: 5
            }
        );
        assert!(matches!(
            next_event(&mut h.events).await,
            ViewEvent::PageChanged { page: 1, .. }
        ));
        wait_for_state(&h.view, LoadState::Loaded).await;
        assert!(h.events.try_recv().is_err());
        assert!(h.fetcher.calls.load(Ordering::SeqCst) <= 2);
    }

    #[tokio::test]
    async fn detaching_while_loading_silences_the_view() {
        let mut h = harness(ViewOptions::default(), false);
        h.view.set_source("https://example.com/%25PDF-2").unwrap();
        h.view.detach().unwrap();
        let snapshot = h.view.snapshot().await.unwrap();
        assert!(snapshot.detached);
        assert_eq!(snapshot.state, LoadState::Loading);

        h.fetcher.gate.add_permits(Semaphore::MAX_PERMITS);
        let snapshot = wait_for_state(&h.view, LoadState::Idle).await;
        assert!(!snapshot.has_document);
        assert!(h.events.try_recv().is_err());
    }

    #[tokio::test]
    async fn initial_page_and_pending_navigation() {
        let options = ViewOptions::default().with_initial_page_index(1);
        let mut h = harness(options, true);
        h.view.set_source("data:application/pdf,%PDF-4").unwrap();
        assert!(matches!(
            next_event(&mut h.events).await,
            ViewEvent::Load { page_count: 4, .. }
        ));
        assert_eq!(
            next_event(&mut h.events).await,
            ViewEvent::PageChanged {
                page: 2,
                page_count: Some(4)
            }
        );

        h.view.set_source("data:application/pdf,%PDF-6").unwrap();
        h.view.go_to_page(5).unwrap();
        next_event(&mut h.events).await;
        assert_eq!(
            next_event(&mut h.events).await,
            ViewEvent::PageChanged {
                page: 5,
                page_count: Some(6)
            }
        );
        assert_eq!(h.drops.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn dropping_handles_stops_the_task() {
        let h = harness(ViewOptions::default(), true);
        let view = h.view.clone();
        drop(h);
        drop(view);
    }
}
