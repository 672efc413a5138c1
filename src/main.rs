//! TCARP Backend - decision rollout & causal explainability API

use anyhow::{Context, Result};
use clap::Parser;
use dotenv::dotenv;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use tcarp_backend::api::create_router;
use tcarp_backend::models::{Config, StoreBackend};
use tcarp_backend::DecisionService;

#[derive(Parser, Debug)]
#[command(name = "tcarp")]
#[command(about = "Trading policy training, causal discovery and decision explanations over HTTP")]
struct Cli {
    /// Port to listen on
    #[arg(long, env = "PORT")]
    port: Option<u16>,

    /// Model store backend: sqlite, fs or memory
    #[arg(long, env = "MODEL_STORE")]
    store: Option<StoreBackend>,

    /// SQLite file or directory for the model store
    #[arg(long, env = "MODEL_STORE_PATH")]
    store_path: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    load_env();
    init_tracing();

    let cli = Cli::parse();
    let mut config = Config::from_env()?;
    if let Some(port) = cli.port {
        config.port = port;
    }
    if let Some(store) = cli.store {
        config.store = store;
        if cli.store_path.is_none() && std::env::var("MODEL_STORE_PATH").is_err() {
            config.store_path = store.default_path();
        }
    }
    if let Some(path) = cli.store_path {
        config.store_path = path;
    }

    info!(
        port = config.port,
        store = %config.store,
        price_api = %config.price_api_base,
        "Starting TCARP backend"
    );

    let service = DecisionService::from_config(&config).context("Failed to build service")?;
    let app = create_router(Arc::new(service));

    let addr = format!("0.0.0.0:{}", config.port);
    let listener = TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;
    info!("API server listening on {}", addr);

    axum::serve(listener, app).await.context("Server error")?;

    Ok(())
}

fn init_tracing() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "tcarp_backend=debug,tcarp=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();
}

fn load_env() {
    // Standard dotenv search (cwd + parents)
    let _ = dotenv();

    // Also the crate-root .env when launched from elsewhere
    let manifest_env = Path::new(env!("CARGO_MANIFEST_DIR")).join(".env");
    if manifest_env.exists() {
        let _ = dotenv::from_path(&manifest_env);
    }
}
