//! AuthGate - session tokens, sliding-window throttling, and gated routes
//! Mission: Serve the auth endpoints behind the authorization pipeline

use anyhow::{Context, Result};
use authgate_backend::{
    auth::UserStore,
    clock::SystemClock,
    config::Config,
    create_router, AppState,
};
use clap::Parser;
use dotenv::dotenv;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser, Debug)]
#[command(name = "authgate")]
#[command(about = "Token issuance, rate limiting and route authorization")]
struct Args {
    /// Address to listen on (overrides BIND_ADDR)
    #[arg(long)]
    bind: Option<SocketAddr>,

    /// Extra .env file loaded before the environment is read
    #[arg(long)]
    env_file: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    load_env(args.env_file.as_deref())?;
    init_tracing();

    let mut config = Config::from_env().context("Failed to load configuration")?;
    if let Some(bind) = args.bind {
        config.bind_addr = bind;
    }

    let http_client = reqwest::Client::builder()
        .timeout(config.provider_timeout)
        .build()
        .context("Failed to build HTTP client")?;

    let state = AppState::from_config(
        &config,
        SystemClock::shared(),
        Arc::new(UserStore::new()),
        http_client,
    );

    info!(
        session_ttl_secs = config.session_ttl.as_secs(),
        rate_limit = config.rate_limit.max_requests,
        rate_limit_window = %config.rate_limit.window_label(),
        trust_proxy_headers = config.trust_proxy_headers,
        "Authorization layer initialized"
    );

    let app = create_router(state);

    let listener = TcpListener::bind(config.bind_addr)
        .await
        .with_context(|| format!("Failed to bind {}", config.bind_addr))?;
    info!("API server listening on {}", config.bind_addr);

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await
    .context("Server error")?;

    Ok(())
}

/// Initialize tracing
fn init_tracing() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "authgate_backend=debug,authgate=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();
}

fn load_env(env_file: Option<&Path>) -> Result<()> {
    // An explicit file wins over anything found by the standard search.
    if let Some(path) = env_file {
        dotenv::from_path(path)
            .with_context(|| format!("Failed to load env file {}", path.display()))?;
    }

    // Standard dotenv search (cwd + parents)
    let _ = dotenv();

    let manifest_env = Path::new(env!("CARGO_MANIFEST_DIR")).join(".env");
    if manifest_env.exists() {
        let _ = dotenv::from_path(&manifest_env);
    }

    Ok(())
}
