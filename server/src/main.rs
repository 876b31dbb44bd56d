use anyhow::Result;
use axum::Router;
use clap::Parser;
use pkgsearch_server::{build_app, build_state, spawn_refresh_loop, ServerConfig};
use std::net::SocketAddr;
use std::path::PathBuf;
use tracing_subscriber::{fmt, EnvFilter};
use tokio::net::TcpListener;

#[derive(Parser)]
struct Args {
    /// Record store directory (sled)
    #[arg(long, default_value = "./store")]
    store: PathBuf,
    /// Host to bind
    #[arg(long, default_value = "0.0.0.0")]
    host: String,
    /// Port to bind
    #[arg(long, default_value_t = 8080)]
    port: u16,
    /// Seconds between scheduled snapshot refreshes; 0 disables them
    #[arg(long, default_value_t = 300)]
    refresh_interval_secs: u64,
}

#[tokio::main]
async fn main() -> Result<()> {
    fmt().with_env_filter(EnvFilter::from_default_env()).init();
    let args = Args::parse();
    let config = ServerConfig::from_env(args.store.clone(), args.refresh_interval_secs);

    let state = tokio::task::spawn_blocking({
        let config = config.clone();
        move || build_state(&config)
    })
    .await??;
    if let Some(every) = config.refresh_interval {
        spawn_refresh_loop(state.coordinator.clone(), every);
    }
    let app: Router = build_app(state, &config);

    let addr: SocketAddr = format!("{}:{}", args.host, args.port).parse()?;
    let listener = TcpListener::bind(addr).await?;
    tracing::info!(%addr, store = %args.store.display(), "server listening");
    axum::serve(listener, app).await?;
    Ok(())
}
