use sprite_control::config::{default_config_path, log_config_source, read_json_config, CompanionConfig};
use std::path::PathBuf;
use tracing_subscriber::{fmt, EnvFilter};

const DEFAULT_LOG_FILTER: &str = "sprite_control=info";

fn init_logging(configured: Option<&str>) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(configured.unwrap_or(DEFAULT_LOG_FILTER)));
    let _ = fmt().with_target(false).with_env_filter(filter).try_init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let path = std::env::args()
        .nth(1)
        .map(PathBuf::from)
        .unwrap_or_else(default_config_path);
    let (config, source) = read_json_config::<CompanionConfig>(&path);
    init_logging(config.log_filter.as_deref());
    log_config_source("sprite-control", &path, &source);
    tracing::info!(config = %path.display(), version = env!("CARGO_PKG_VERSION"), "starting sprite-control");

    sprite_control::run(config).await
}
