use crate::api::{FallbackStore, FileStore, HttpStore, ModelStore};
use clap::Args;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;

/// Where models and training data live
#[derive(Args, Debug, Clone)]
pub struct StoreArgs {
    /// Directory for locally stored models and training data
    #[arg(long, env = "DATA_DIR", default_value = "data")]
    pub data_dir: PathBuf,

    /// Base URL of a remote backend (the `web` binary). Local files are
    /// kept as a fallback cache when set.
    #[arg(long, env = "BACKEND_URL")]
    pub backend_url: Option<String>,
}

impl StoreArgs {
    pub fn open_store(&self) -> Arc<dyn ModelStore> {
        let local = FileStore::new(&self.data_dir);
        match &self.backend_url {
            Some(url) => {
                info!(
                    "Using backend at {} with local cache in {}",
                    url,
                    self.data_dir.display()
                );
                Arc::new(FallbackStore::new(HttpStore::new(url.as_str()), local))
            }
            None => {
                info!("Using local store in {}", self.data_dir.display());
                Arc::new(local)
            }
        }
    }
}

/// Settings for the persistence backend
#[derive(Args, Debug, Clone)]
pub struct WebArgs {
    /// Directory the backend keeps its blobs in
    #[arg(long, env = "DATA_DIR", default_value = "data")]
    pub data_dir: PathBuf,

    /// Listen address
    #[arg(long, env = "WEB_ADDR", default_value = "127.0.0.1:3000")]
    pub addr: String,

    /// Static assets served at `/`
    #[arg(long, env = "STATIC_DIR", default_value = "static")]
    pub static_dir: PathBuf,
}

/// Install the fmt subscriber, filtered by `RUST_LOG` (default `info`)
pub fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();
}
