use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use env_logger::{Env, Target};
use log::{info, warn};
use rusty_chess_arena::{api, config::Args, engine::EngineSpec, registry::SessionRegistry};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

#[tokio::main]
async fn main() -> Result<()> {
    // start with "./rusty-chess-arena 2>&1 | tee -a /path/to/arena.log" for a log-file
    env_logger::Builder::from_env(Env::default().default_filter_or("info"))
        .target(Target::Stdout)
        .init();

    let args = Args::parse();
    let settings = args.session_settings();
    match &settings.engine {
        EngineSpec::Uci(command) => info!("engine: {}", command.path.display()),
        EngineSpec::Random => warn!("no engine configured, sessions play random moves"),
    }

    let registry = Arc::new(SessionRegistry::new(settings, args.idle_timeout()));
    let reaper_stop = CancellationToken::new();
    let reaper = tokio::spawn(
        Arc::clone(&registry).run_reaper(reaper_stop.clone(), args.reap_interval()),
    );

    let listener = TcpListener::bind(args.listen)
        .await
        .with_context(|| format!("cannot listen on {}", args.listen))?;
    info!("serving on http://{}", args.listen);

    axum::serve(listener, api::router(Arc::clone(&registry)))
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("http server failed")?;

    info!("shutting down...");
    reaper_stop.cancel();
    if let Err(e) = reaper.await {
        warn!("session reaper ended abnormally: {e}");
    }
    registry.shutdown().await;
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!("cannot listen for ctrl-c: {e}");
        std::future::pending::<()>().await;
    }
}
