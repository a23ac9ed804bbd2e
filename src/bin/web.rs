use anyhow::{Context, Result};
use betting_model::api::server::router;
use betting_model::config::{init_tracing, WebArgs};
use betting_model::models::sport::validate_registry;
use betting_model::FileStore;
use clap::Parser;
use std::sync::Arc;
use tower_http::services::ServeDir;
use tracing::info;

/// Persistence backend for trained models and training data
#[derive(Parser)]
#[command(name = "betting-model-web", version, about)]
struct Cli {
    #[command(flatten)]
    web: WebArgs,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load environment variables
    dotenv::dotenv().ok();
    init_tracing();

    let cli = Cli::parse();
    validate_registry().map_err(anyhow::Error::msg)?;

    let store = FileStore::new(&cli.web.data_dir);
    tokio::fs::create_dir_all(store.root())
        .await
        .with_context(|| format!("Failed to create {}", store.root().display()))?;
    info!("Serving blobs from {}", store.root().display());

    let app = router(Arc::new(store)).fallback_service(ServeDir::new(&cli.web.static_dir));

    let listener = tokio::net::TcpListener::bind(&cli.web.addr)
        .await
        .with_context(|| format!("Failed to bind {}", cli.web.addr))?;

    println!("\nStarting backend at http://{}", cli.web.addr);
    println!("Press Ctrl+C to stop\n");

    axum::serve(listener, app)
        .await
        .context("Server error")?;
    Ok(())
}
