mod auth;
mod chat;
mod config;
mod db;
mod error;
mod gmail;
mod ingest;
mod models;
mod report;
mod sentiment;
mod server;
mod session;
mod source;
mod ui;

use anyhow::Context;
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;
use tracing_subscriber::EnvFilter;

use crate::auth::TokenRefresher;
use crate::chat::ChatBot;
use crate::config::Config;
use crate::gmail::GmailSource;
use crate::sentiment::Classifier;
use crate::server::AppState;

#[derive(Parser, Debug)]
#[command(name = "mailmood", about = "Sentiment overview of your Gmail mailbox")]
struct Args {
    /// Settings file
    #[arg(short, long, default_value = "settings.toml")]
    config: PathBuf,

    /// Verbose logging (overridden by RUST_LOG)
    #[arg(long)]
    debug: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let default_level = if args.debug { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .init();

    let config = Config::load(&args.config);

    let db = db::Database::new(&config.database.url).await?;
    db.run_migrations().await?;

    let http = reqwest::Client::builder()
        .build()
        .context("Failed to build HTTP client")?;

    let source = GmailSource::new(
        config.gmail.api_base_url.clone(),
        Duration::from_secs(config.gmail.timeout_secs),
        TokenRefresher::new(),
    )?;
    let chatbot = ChatBot::from_config(http, &config.chat);

    let bind = config.server.bind.clone();
    let state = AppState::new(config, Arc::new(source), db, Classifier::default(), chatbot);

    let listener = tokio::net::TcpListener::bind(&bind)
        .await
        .with_context(|| format!("Failed to bind {}", bind))?;
    info!("Listening on {}", bind);

    axum::serve(listener, server::router(state))
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("Server stopped");
    Ok(())
}

async fn shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
}
