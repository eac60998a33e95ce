use std::sync::Arc;

use anyhow::{Context, Result};
use emoji_engine::{GenerationClient, ReplicateProvider};
use emoji_server::config::Config;
use emoji_server::state::AppState;
use tracing::info;
use tracing_subscriber::{fmt, EnvFilter};

fn main() {
    if let Err(err) = run() {
        eprintln!("emoji-server error: {err:#}");
        std::process::exit(1);
    }
}

fn run() -> Result<()> {
    fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let config = Config::load()?;

    // The provider owns a blocking HTTP client; it is built and finally
    // dropped outside the async runtime.
    let mut provider = ReplicateProvider::new(config.api_token.clone());
    if let Some(api_base) = &config.api_base {
        provider = provider.with_api_base(api_base.clone());
    }
    info!(api_base = provider.api_base(), "using Replicate provider");
    let client = Arc::new(GenerationClient::new(provider));
    info!(model = client.model(), "emoji model");

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("failed to start tokio runtime")?;
    runtime.block_on(emoji_server::serve(&config, AppState::new(client.clone())))?;
    drop(runtime);
    drop(client);
    Ok(())
}
