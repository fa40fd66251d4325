pub mod ai;
pub mod animation;
pub mod config;
pub mod render;
pub mod server;
pub mod session;
pub mod tts;
pub mod utils;

use anyhow::Context;
use config::CompanionConfig;
use session::Session;

/// Run one session until Ctrl-C.
pub async fn run(config: CompanionConfig) -> anyhow::Result<()> {
    let session = Session::start(config)
        .await
        .context("failed to start companion session")?;
    tracing::info!(addr = %session.local_addr(), "ready, press Ctrl-C to stop");

    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::warn!(error = %e, "failed to listen for Ctrl-C, stopping");
    }
    session.shutdown().await;
    Ok(())
}
