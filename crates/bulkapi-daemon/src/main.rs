//! `bulkapi-daemon`: runs the background refresh loop for one or more configured sites
//! alongside a thin HTTP server that serves their gzip artifacts.

use anyhow::{Context, Result};
use bulkapi_daemon::config::Config;
use bulkapi_local::sites::SiteRegistry;
use bulkapi_local::{RefreshLoop, ReqwestFetcher};
use clap::{Parser, Subcommand};
use std::sync::Arc;

#[derive(Parser)]
#[command(name = "bulkapi-daemon", version, about = "Crawl/cache/serve bulk JSON artifacts")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the background refresh loops and the HTTP server.
    Serve {
        /// Site names to refresh (from the reference registry); refreshes all if omitted.
        #[arg(long)]
        site: Vec<String>,

        /// Directory artifacts are written to and served from.
        #[arg(long, env = "BULKAPI_BASE_DIR")]
        base_dir: Option<std::path::PathBuf>,

        /// Address the HTTP server binds to.
        #[arg(long, env = "BULKAPI_BIND_ADDR")]
        bind_addr: Option<std::net::SocketAddr>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let mut config = Config::from_env().context("loading configuration from environment")?;

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_new(&config.log_level)
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .compact()
        .init();

    let cli = Cli::parse();
    let Commands::Serve {
        site,
        base_dir,
        bind_addr,
    } = cli.command;

    if let Some(base_dir) = base_dir {
        config.base_dir = base_dir;
    }
    if let Some(bind_addr) = bind_addr {
        config.bind_addr = bind_addr;
    }

    std::fs::create_dir_all(&config.base_dir)
        .with_context(|| format!("creating base dir {}", config.base_dir.display()))?;

    let registry = SiteRegistry::with_reference_sites();
    let selected: Vec<String> = if site.is_empty() {
        registry.keys().map(str::to_string).collect()
    } else {
        site
    };

    let fetcher: Arc<dyn bulkapi_core::Fetcher> =
        Arc::new(ReqwestFetcher::new().context("constructing HTTP client")?);

    let mut refresh_tasks = Vec::new();
    for name in &selected {
        let Some(site_model) = registry.get(name) else {
            anyhow::bail!(
                "unknown site {name:?}; available: {:?}",
                registry.keys().collect::<Vec<_>>()
            );
        };
        tracing::info!(site = %name, "starting refresh loop");
        let mut loop_ = RefreshLoop::new(site_model, fetcher.clone(), config.base_dir.clone());
        if let Some(endpoint) = &config.preview_endpoint {
            loop_ = loop_.with_preview_endpoint(endpoint.clone());
        }
        let loop_ = Arc::new(loop_);
        let task_loop = loop_.clone();
        refresh_tasks.push(tokio::spawn(async move {
            if let Err(err) = task_loop.run().await {
                tracing::error!(error = %err, "refresh loop exited unexpectedly");
            }
        }));
    }

    let app = bulkapi_daemon::http::router(config.base_dir.clone());
    let listener = tokio::net::TcpListener::bind(config.bind_addr)
        .await
        .with_context(|| format!("binding {}", config.bind_addr))?;
    tracing::info!(addr = %config.bind_addr, "serving bulk artifacts");
    let server = tokio::spawn(async move {
        if let Err(err) = axum::serve(listener, app).await {
            tracing::error!(error = %err, "http server exited unexpectedly");
        }
    });

    tokio::signal::ctrl_c().await.context("waiting for ctrl-c")?;
    tracing::info!("shutting down");
    server.abort();
    for task in refresh_tasks {
        task.abort();
    }

    Ok(())
}
