//! AxioCNC gateway entry point: loads configuration, wires the Controller
//! event/message buses, the Machine Status Manager, auth, the Session Hub,
//! and the REST API, then runs until `ctrl_c`.
//!
//! CLI parsing follows `dosa::main`'s flag-scanning idiom rather than a
//! parser crate — the surface is five flags, not worth a `clap` dependency
//! the rest of the workspace doesn't otherwise need.

use anyhow::{Context, Result};
use axiocnc_config::{default_config_path, ConfigStore};
use axiocnc_core::event::EventDispatcher;
use axiocnc_core::message::MessageDispatcher;
use axiocnc_gateway::{AuthService, RestApi, SessionHub};
use axiocnc_runtime::StatusManager;
use axiocnc_store::{Macro, MdiEntry, RecordStore, Tool, User, WatchFolder};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

struct Args {
    host: String,
    port: u16,
    config: PathBuf,
    watch_directory: Option<PathBuf>,
    verbose: bool,
}

const HELP: &str = "\
axiocnc: network-accessible CNC controller gateway

USAGE:
    axiocnc [OPTIONS]

OPTIONS:
    --host <addr>            Bind address for the Session Hub and REST API [default: 127.0.0.1]
    --port <n>                Bind port for the Session Hub (REST API runs on port+1) [default: 8000]
    --config <path>          Path to the Configuration Store document
    --watch-directory <dir>  Directory to watch for auto-loadable G-code files
    --verbose                Enable verbose (debug-level) logging
    --help                   Print this help and exit
";

fn parse_args() -> Option<Args> {
    let raw: Vec<String> = std::env::args().collect();
    if raw.iter().any(|arg| arg == "--help") {
        print!("{HELP}");
        return None;
    }
    let host = raw
        .iter()
        .position(|arg| arg == "--host")
        .and_then(|i| raw.get(i + 1))
        .cloned()
        .unwrap_or_else(|| "127.0.0.1".to_string());
    let port = raw
        .iter()
        .position(|arg| arg == "--port")
        .and_then(|i| raw.get(i + 1))
        .and_then(|s| s.parse::<u16>().ok())
        .unwrap_or(8000);
    let config = raw
        .iter()
        .position(|arg| arg == "--config")
        .and_then(|i| raw.get(i + 1))
        .map(PathBuf::from)
        .unwrap_or_else(default_config_path);
    let watch_directory = raw
        .iter()
        .position(|arg| arg == "--watch-directory")
        .and_then(|i| raw.get(i + 1))
        .map(PathBuf::from);
    let verbose = raw.iter().any(|arg| arg == "--verbose");

    Some(Args {
        host,
        port,
        config,
        watch_directory,
        verbose,
    })
}

#[tokio::main]
async fn main() -> Result<()> {
    let Some(args) = parse_args() else {
        return Ok(());
    };

    let default_filter = if args.verbose { "axiocnc=debug" } else { "axiocnc=info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| default_filter.into()),
        )
        .init();

    tracing::info!("starting AxioCNC v{}", env!("CARGO_PKG_VERSION"));

    let config_store = ConfigStore::load(args.config.clone())
        .await
        .with_context(|| format!("failed to load configuration at {}", args.config.display()))?;
    tracing::info!(path = %config_store.path().display(), "configuration loaded");

    if let Some(dir) = &args.watch_directory {
        config_store
            .set("settings.watchDirectory", serde_json::json!(dir.display().to_string()))
            .await
            .context("failed to persist --watch-directory override")?;
    }

    let data_dir = args
        .config
        .parent()
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("."));
    let macros: Arc<RecordStore<Macro>> = Arc::new(RecordStore::new(data_dir.join("macros.json")));
    let mdi: Arc<RecordStore<MdiEntry>> = Arc::new(RecordStore::new(data_dir.join("mdi.json")));
    let tools: Arc<RecordStore<Tool>> = Arc::new(RecordStore::new(data_dir.join("tools.json")));
    let watch_folders: Arc<RecordStore<WatchFolder>> =
        Arc::new(RecordStore::new(data_dir.join("watch_folders.json")));
    let users: Arc<RecordStore<User>> = Arc::new(RecordStore::new(data_dir.join("users.json")));
    for (name, result) in [
        ("macros", macros.load()),
        ("mdi", mdi.load()),
        ("tools", tools.load()),
        ("watch-folders", watch_folders.load()),
        ("users", users.load()),
    ] {
        result.with_context(|| format!("failed to load {name} collection"))?;
    }

    let events = EventDispatcher::default_with_buffer();
    let messages = MessageDispatcher::default_with_buffer();
    let (status, status_task) = StatusManager::spawn(&events);

    let auth = Arc::new(AuthService::new(users.clone()));
    let close_grace = Duration::from_secs(0);
    let hub = SessionHub::new(auth.clone(), events, messages, status, close_grace);
    let rest = RestApi::new(hub.clone(), auth, macros, mdi, tools, watch_folders, users);

    let ws_addr: SocketAddr = format!("{}:{}", args.host, args.port)
        .parse()
        .with_context(|| format!("invalid bind address {}:{}", args.host, args.port))?;
    let rest_addr: SocketAddr = format!("{}:{}", args.host, args.port + 1)
        .parse()
        .with_context(|| format!("invalid bind address {}:{}", args.host, args.port + 1))?;

    let hub_task = tokio::spawn(async move {
        if let Err(err) = hub.serve(ws_addr).await {
            tracing::error!("session hub error: {err}");
        }
    });
    let rest_task = tokio::spawn(async move {
        if let Err(err) = rest.serve(rest_addr).await {
            tracing::error!("rest api error: {err}");
        }
    });

    tracing::info!(%ws_addr, %rest_addr, "AxioCNC ready");

    match tokio::signal::ctrl_c().await {
        Ok(()) => tracing::info!("received shutdown signal"),
        Err(err) => tracing::error!("unable to listen for shutdown signal: {err}"),
    }

    tracing::info!("shutting down...");
    hub_task.abort();
    rest_task.abort();
    status_task.abort();

    tracing::info!("shutdown complete");
    Ok(())
}
