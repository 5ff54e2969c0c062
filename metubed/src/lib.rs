pub mod server;
pub mod sweeper;

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use metube_core::credentials::install_from_env;
use metube_core::{
    load_metube_config, CacheBackendKind, CacheStore, FetchOrchestrator, MemoryCacheStore,
    MetubeConfig, ScratchDir, SqliteCacheStore, YtDlpExtractor,
};
use thiserror::Error;
use tokio::signal;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

pub use server::{router, AppState};

pub type Result<T> = std::result::Result<T, AppError>;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("config error: {0}")]
    Config(#[from] metube_core::ConfigError),
    #[error("cache error: {0}")]
    Cache(#[from] metube_core::CacheError),
    #[error("io error at {path}: {source}")]
    Io {
        source: std::io::Error,
        path: PathBuf,
    },
    #[error("invalid listen address {addr}: {source}")]
    Address {
        addr: String,
        source: std::net::AddrParseError,
    },
    #[error("server error: {0}")]
    Server(std::io::Error),
}

#[derive(Parser, Debug)]
#[command(author, version, about = "Media fetch and stream service", long_about = None)]
pub struct Cli {
    /// Path to metube.toml
    #[arg(long, default_value = "configs/metube.toml")]
    pub config: PathBuf,
    /// Override server.host
    #[arg(long)]
    pub host: Option<String>,
    /// Override server.port
    #[arg(long)]
    pub port: Option<u16>,
    /// Override paths.base_dir
    #[arg(long)]
    pub base_dir: Option<PathBuf>,
    /// Override paths.scratch_dir
    #[arg(long)]
    pub scratch_dir: Option<PathBuf>,
    /// Default log filter when RUST_LOG is unset
    #[arg(long, default_value = "info")]
    pub log_level: String,
}

impl Cli {
    fn apply_overrides(&self, config: &mut MetubeConfig) {
        if let Some(host) = &self.host {
            config.server.host = host.clone();
        }
        if let Some(port) = self.port {
            config.server.port = port;
        }
        if let Some(base_dir) = &self.base_dir {
            config.paths.base_dir = base_dir.to_string_lossy().into_owned();
        }
        if let Some(scratch_dir) = &self.scratch_dir {
            config.paths.scratch_dir = scratch_dir.to_string_lossy().into_owned();
        }
    }
}

pub fn init_tracing(default_level: &str) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .try_init();
}

/// Build the cache backend named in the config and report whether it answers.
pub fn build_cache(config: &MetubeConfig) -> Result<Arc<dyn CacheStore>> {
    let store: Arc<dyn CacheStore> = match config.cache.backend {
        CacheBackendKind::Memory => Arc::new(MemoryCacheStore::new()),
        CacheBackendKind::Sqlite => {
            let path = config.cache_db_path();
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent).map_err(|source| AppError::Io {
                    source,
                    path: parent.to_path_buf(),
                })?;
            }
            let store = SqliteCacheStore::builder()
                .path(&path)
                .create_if_missing(true)
                .build()?;
            if let Err(err) = store.initialize() {
                warn!(path = %path.display(), error = %err, "failed to initialise cache schema");
            }
            Arc::new(store)
        }
    };
    match store.ping() {
        Ok(()) => info!(backend = ?config.cache.backend, "cache store ready"),
        Err(err) => warn!(
            backend = ?config.cache.backend,
            error = %err,
            "cache store unavailable, requests will bypass it"
        ),
    }
    Ok(store)
}

pub async fn run(cli: Cli) -> Result<()> {
    let mut config = load_metube_config(&cli.config)?;
    cli.apply_overrides(&mut config);
    config.validate()?;

    let scratch_root = config.scratch_dir();
    let scratch = ScratchDir::new(&scratch_root).map_err(|source| AppError::Io {
        source,
        path: scratch_root.clone(),
    })?;
    let cookies = config.cookies_path();
    install_from_env(&config.credentials.env_var, &cookies);

    let cache = build_cache(&config)?;
    let extractor = YtDlpExtractor::from_config(&config.downloader, Some(cookies.clone()));
    let fetch = FetchOrchestrator::new(cache, Arc::new(extractor), scratch, config.cache.ttl());

    let sweeper = config
        .cleanup
        .enabled
        .then(|| sweeper::spawn(fetch.clone(), config.cleanup.clone(), vec![cookies]));

    let addr_text = format!("{}:{}", config.server.host, config.server.port);
    let addr: SocketAddr = addr_text.parse().map_err(|source| AppError::Address {
        addr: addr_text.clone(),
        source,
    })?;
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .map_err(|source| AppError::Io {
            source,
            path: PathBuf::from(&addr_text),
        })?;
    info!(%addr, scratch = %scratch_root.display(), "metubed listening");

    let served = axum::serve(listener, router(AppState::new(fetch)))
        .with_graceful_shutdown(shutdown_signal())
        .await
        .map_err(AppError::Server);

    if let Some(handle) = sweeper {
        handle.abort();
    }
    info!("metubed stopped");
    served
}

async fn shutdown_signal() {
    if let Err(err) = signal::ctrl_c().await {
        warn!(error = %err, "failed to install ctrl-c handler");
        std::future::pending::<()>().await;
    }
}
