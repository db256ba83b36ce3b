mod repl;

use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use clap::{Parser, Subcommand};
use directories::ProjectDirs;
use pdfview_core::config::ttl_from_secs;
use pdfview_core::{
    CacheManager, CachePolicy, CacheStore, ChannelSink, DiskCache, DocumentProvider, HttpFetcher,
    LoadPipeline, LoadState, PdfView, Settings, Source, SourceResolver, ViewEvent,
    CACHE_DIR_NAME,
};
use pdfview_render::{generate_thumbnail, PdfiumProvider, ThumbnailOptions};
use serde_json::json;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{debug, warn};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{prelude::*, EnvFilter};
use url::Url;

use crate::repl::ReplCommand;

#[derive(Debug, Parser)]
#[command(
    name = "pdfview",
    version,
    about = "Load, page through and thumbnail PDF documents from any source"
)]
struct Args {
    /// Settings file (defaults to config.toml in the platform config dir)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Directory used for the on-disk document cache
    #[arg(long, global = true)]
    cache_dir: Option<PathBuf>,

    /// Directory searched for bundled documents; may be repeated
    #[arg(long = "resource-dir", global = true)]
    resource_dirs: Vec<PathBuf>,

    /// Directory for pdfview.log (defaults to the platform data dir)
    #[arg(long, global = true)]
    log_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Load a document and stream its events as JSON lines; commands are read from stdin
    Open(OpenArgs),
    /// Render one page into a PNG thumbnail
    Thumbnail(ThumbnailArgs),
    /// Inspect or clear the document cache
    #[command(subcommand)]
    Cache(CacheCommand),
    /// Print how a source string would be loaded
    Resolve { source: String },
}

#[derive(Debug, clap::Args)]
struct OpenArgs {
    source: String,

    #[arg(long)]
    password: Option<String>,

    /// Page to show first (1-based), applied once
    #[arg(long, conflicts_with = "initial_page_index")]
    initial_page: Option<i64>,

    /// Page to show first (0-based), applied once
    #[arg(long)]
    initial_page_index: Option<i64>,

    /// Page to navigate to (1-based) as soon as the document is loaded
    #[arg(long)]
    page: Option<i64>,

    /// `none` or `disk`
    #[arg(long)]
    cache_policy: Option<CachePolicy>,

    /// Seconds a cached download stays valid
    #[arg(long)]
    cache_ttl: Option<f64>,

    /// Report encrypted documents as errors instead of asking for a password
    #[arg(long)]
    no_password_prompt: bool,
}

#[derive(Debug, clap::Args)]
struct ThumbnailArgs {
    source: String,

    #[arg(long)]
    width: u32,

    #[arg(long)]
    height: u32,

    /// 1-based; clamped into the document
    #[arg(long, default_value_t = 1)]
    page: i64,

    #[arg(long, default_value_t = 1.0)]
    scale: f32,

    #[arg(long)]
    password: Option<String>,

    /// Write the PNG here instead of printing a data URL
    #[arg(short, long)]
    output: Option<PathBuf>,
}

#[derive(Debug, Subcommand)]
enum CacheCommand {
    /// Remove every cached document
    Clear,
    /// Print where a URL would be cached
    Path { url: String },
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let project_dirs = ProjectDirs::from("dev", "pdfview", "pdfview");
    let _log_guard = init_logging(args.log_dir.clone(), project_dirs.as_ref())?;

    let settings = load_settings(&args, project_dirs.as_ref())?;
    let cache_root = settings
        .cache_dir
        .clone()
        .or_else(|| {
            project_dirs
                .as_ref()
                .map(|dirs| dirs.cache_dir().join(CACHE_DIR_NAME))
        })
        .ok_or_else(|| anyhow!("unable to determine a cache directory; pass --cache-dir"))?;
    debug!(cache = %cache_root.display(), "settings loaded");

    match args.command {
        Command::Open(open) => run_open(open, &settings, cache_root).await,
        Command::Thumbnail(thumbnail) => run_thumbnail(thumbnail, &settings, cache_root).await,
        Command::Cache(command) => run_cache(command, cache_root),
        Command::Resolve { source } => run_resolve(&source, &settings),
    }
}

fn load_settings(args: &Args, project_dirs: Option<&ProjectDirs>) -> Result<Settings> {
    let path = args
        .config
        .clone()
        .or_else(|| project_dirs.map(|dirs| dirs.config_dir().join("config.toml")));
    let mut settings = match path {
        Some(path) => Settings::load(&path)?,
        None => Settings::default(),
    };
    if let Some(dir) = &args.cache_dir {
        settings.cache_dir = Some(dir.clone());
    }
    settings.resource_dirs.extend(args.resource_dirs.iter().cloned());
    Ok(settings)
}

fn build_pipeline(
    settings: &Settings,
    cache_root: PathBuf,
    provider: Arc<dyn DocumentProvider>,
) -> LoadPipeline {
    LoadPipeline::new(
        SourceResolver::new(settings.resource_dirs.clone()),
        Arc::new(DiskCache::new(cache_root)),
        Arc::new(
            HttpFetcher::new(settings.fetch_timeout).with_max_bytes(settings.max_document_bytes),
        ),
        provider,
    )
}

async fn run_open(args: OpenArgs, settings: &Settings, cache_root: PathBuf) -> Result<()> {
    let provider = PdfiumProvider::new()?;
    let pipeline = Arc::new(build_pipeline(settings, cache_root, Arc::new(provider)));

    let mut options = settings.view_options();
    if let Some(password) = &args.password {
        options = options.with_password(password.clone());
    }
    if let Some(page) = args.page {
        options = options.with_page(page);
    }
    if let Some(page) = args.initial_page {
        options = options.with_initial_page(page);
    }
    if let Some(index) = args.initial_page_index {
        options = options.with_initial_page_index(index);
    }
    if let Some(policy) = args.cache_policy {
        options.cache_policy = policy;
    }
    if let Some(ttl) = args.cache_ttl {
        options.cache_ttl = ttl_from_secs(ttl);
    }
    if args.no_password_prompt {
        options.native_password_prompt = false;
    }

    let (sink, mut events) = ChannelSink::new();
    let (view, task) = PdfView::spawn(pipeline, options, Arc::new(sink));
    let printer = tokio::spawn(async move {
        while let Some(event) = events.recv().await {
            print_event(&event);
        }
    });

    view.set_source(args.source.as_str())?;

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut quit = false;
    while let Some(line) = lines.next_line().await? {
        if line.trim().is_empty() {
            continue;
        }
        let command = match line.parse::<ReplCommand>() {
            Ok(command) => command,
            Err(err) => {
                eprintln!("{err:#}");
                continue;
            }
        };
        if !execute(&view, command).await? {
            quit = true;
            break;
        }
    }
    if !quit {
        // Input ended; let the current load report before unmounting.
        wait_until_settled(&view).await?;
    }

    view.detach()?;
    drop(view);
    task.await.context("view task panicked")?;
    printer.await.context("event printer panicked")?;
    Ok(())
}

/// Returns `false` once the session should end.
async fn execute(view: &PdfView, command: ReplCommand) -> Result<bool> {
    match command {
        ReplCommand::Next => view.next()?,
        ReplCommand::Prev => view.prev()?,
        ReplCommand::GoTo(page) => view.go_to_page(page)?,
        ReplCommand::Page => print_line(&json!({ "page": view.page().await? })),
        ReplCommand::Count => print_line(&json!({ "pageCount": view.page_count().await? })),
        ReplCommand::Password(password) => view.set_password(password)?,
        ReplCommand::Source(source) => view.set_source(source)?,
        ReplCommand::Scale(scale) => view.observe_scale(scale)?,
        ReplCommand::Detach => view.detach()?,
        ReplCommand::Attach => view.attach()?,
        ReplCommand::Quit => return Ok(false),
    }
    Ok(true)
}

async fn wait_until_settled(view: &PdfView) -> Result<()> {
    while view.snapshot().await?.state == LoadState::Loading {
        tokio::time::sleep(Duration::from_millis(25)).await;
    }
    // Events of the final transition are delivered one turn after it.
    tokio::time::sleep(Duration::from_millis(25)).await;
    Ok(())
}

async fn run_thumbnail(args: ThumbnailArgs, settings: &Settings, cache_root: PathBuf) -> Result<()> {
    let provider = PdfiumProvider::new()?;
    let pipeline = build_pipeline(settings, cache_root, Arc::new(provider));
    let cache = CacheManager::new(
        Arc::clone(pipeline.cache()),
        settings.cache_policy,
        settings.cache_ttl,
    );
    let options = ThumbnailOptions::new(args.width, args.height)
        .with_page(args.page)
        .with_scale(args.scale);

    let data_url = generate_thumbnail(
        &pipeline,
        &cache,
        &args.source,
        args.password.as_deref(),
        options,
    )
    .await?;

    match args.output {
        Some(path) => write_png(&path, &data_url)?,
        None => println!("{data_url}"),
    }
    Ok(())
}

fn write_png(path: &Path, data_url: &str) -> Result<()> {
    let payload = data_url
        .split_once(',')
        .map(|(_, payload)| payload)
        .ok_or_else(|| anyhow!("thumbnail is not a data URL"))?;
    let bytes = BASE64
        .decode(payload)
        .context("thumbnail payload is not valid base64")?;
    fs::write(path, bytes).with_context(|| format!("failed to write {:?}", path))?;
    Ok(())
}

fn run_cache(command: CacheCommand, cache_root: PathBuf) -> Result<()> {
    let cache = DiskCache::new(cache_root);
    match command {
        CacheCommand::Clear => {
            cache.clear()?;
            print_line(&json!({ "cleared": cache.root() }));
        }
        CacheCommand::Path { url } => {
            let url = Url::parse(&url).with_context(|| format!("invalid URL `{url}`"))?;
            print_line(&json!({ "url": url.as_str(), "path": cache.path_for(&url) }));
        }
    }
    Ok(())
}

fn run_resolve(source: &str, settings: &Settings) -> Result<()> {
    let resolver = SourceResolver::new(settings.resource_dirs.clone());
    let description = match resolver.resolve(source)? {
        None => json!({ "kind": "blank" }),
        Some(Source::RemoteFetch(url)) => json!({ "kind": "remote", "url": url.as_str() }),
        Some(Source::LocalFile(path)) => json!({ "kind": "file", "path": path }),
        Some(Source::BundleResource(path)) => json!({ "kind": "bundle", "path": path }),
        Some(Source::DataPayload { bytes, base64 }) => {
            json!({ "kind": "data", "bytes": bytes.len(), "base64": base64 })
        }
    };
    print_line(&description);
    Ok(())
}

fn print_event(event: &ViewEvent) {
    match serde_json::to_value(event) {
        Ok(value) => print_line(&value),
        Err(err) => warn!(?err, event = event.name(), "failed to serialize event"),
    }
}

fn print_line(value: &serde_json::Value) {
    let mut stdout = io::stdout().lock();
    if let Err(err) = writeln!(stdout, "{value}").and_then(|_| stdout.flush()) {
        warn!(?err, "failed to write to stdout");
    }
}

fn init_logging(
    log_dir: Option<PathBuf>,
    project_dirs: Option<&ProjectDirs>,
) -> Result<Option<WorkerGuard>> {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let console_layer = tracing_subscriber::fmt::layer().with_writer(io::stderr);

    let log_dir = log_dir.or_else(|| project_dirs.map(|dirs| dirs.data_local_dir().join("logs")));
    let file = match log_dir {
        Some(dir) => match fs::create_dir_all(&dir) {
            Ok(()) => {
                let appender = tracing_appender::rolling::never(dir, "pdfview.log");
                Some(tracing_appender::non_blocking(appender))
            }
            Err(err) => {
                eprintln!("logging to stderr only; cannot create {}: {err}", dir.display());
                None
            }
        },
        None => None,
    };
    let (file_writer, guard) = match file {
        Some((writer, guard)) => (Some(writer), Some(guard)),
        None => (None, None),
    };
    let file_layer = file_writer.map(|writer| {
        tracing_subscriber::fmt::layer()
            .with_ansi(false)
            .with_writer(writer)
    });

    tracing_subscriber::registry()
        .with(env_filter)
        .with(file_layer)
        .with(console_layer)
        .try_init()
        .map_err(|err| anyhow!(err))?;

    Ok(guard)
}
