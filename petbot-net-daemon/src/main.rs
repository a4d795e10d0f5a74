mod runner;

use anyhow::{Context, Result};
use petbot_net_core::config::{load_config_from_toml_str, AppConfig};
use petbot_net_core::log_ring::LogRing;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

const DEFAULT_CONFIG: &str = include_str!("../config/default.toml");

// 编译时只能选择一个后端
const BACKEND_COUNT: usize = cfg!(feature = "backend_mock") as usize + cfg!(feature = "backend_wpa_cli") as usize;
const _: () = assert!(
    BACKEND_COUNT == 1,
    "Select exactly ONE backend feature (backend_mock or backend_wpa_cli)."
);

fn load_config() -> Result<AppConfig> {
    match std::env::var("PETBOT_CONFIG") {
        Ok(path) => {
            let text = std::fs::read_to_string(&path).with_context(|| format!("reading config {}", path))?;
            load_config_from_toml_str(&text).with_context(|| format!("parsing config {}", path))
        }
        Err(_) => load_config_from_toml_str(DEFAULT_CONFIG).context("parsing embedded default config"),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let config = load_config()?;

    // 1. 初始化日志（这是入口点的职责），同时写入 Web 日志环形缓冲区
    let logs = LogRing::new(config.log.capacity, config.log.line_len);
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(tracing_subscriber::fmt::layer())
        .with(logs.layer())
        .init();

    // 2. 调用核心逻辑
    if let Err(e) = runner::run(config, logs).await {
        // 3. 处理顶层错误
        tracing::error!("❌ PetBot network daemon failed: {:#}", e);
        std::process::exit(1);
    }

    Ok(())
}
