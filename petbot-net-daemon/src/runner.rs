use anyhow::{Context, Result};
use petbot_net_core::app::{App, Platform};
use petbot_net_core::config::AppConfig;
use petbot_net_core::frontends::{DiskFrontend, EmbedFrontend};
use petbot_net_core::log_ring::LogRing;
use petbot_net_core::ota::RestartHook;
use petbot_net_core::traits::UiAssetProvider;
use std::sync::Arc;
use std::time::Duration;

// --- 1. 选择后端实现 ---
#[cfg(feature = "backend_mock")]
fn platform(_config: &AppConfig, frontend: Arc<dyn UiAssetProvider>, restart: RestartHook) -> Platform {
    use petbot_net_core::backends::mock::SimulatedRadio;
    use petbot_net_core::credentials::MemoryBlobStore;
    use petbot_net_core::ota::FileFirmwareSlot;

    tracing::info!("🚀 Using simulated radio");
    let (radio, radio_events) = SimulatedRadio::with_demo_networks();
    Platform {
        radio: radio.clone(),
        radio_events,
        advertiser: radio,
        blobs: Arc::new(MemoryBlobStore::new()),
        firmware: Arc::new(FileFirmwareSlot::new(std::env::temp_dir().join("petbot-ota"))),
        frontend,
        restart,
    }
}

#[cfg(feature = "backend_wpa_cli")]
fn platform(config: &AppConfig, frontend: Arc<dyn UiAssetProvider>, restart: RestartHook) -> Platform {
    use petbot_net_core::backends::wpa_cli::WpaCliRadio;
    use petbot_net_core::credentials::FileBlobStore;
    use petbot_net_core::mdns::MdnsAdvertiser;
    use petbot_net_core::ota::FileFirmwareSlot;

    tracing::info!("🚀 Using wpa_cli + hostapd radio");
    let (radio, radio_events) = WpaCliRadio::new();
    Platform {
        radio: Arc::new(radio),
        radio_events,
        advertiser: Arc::new(MdnsAdvertiser::new()),
        blobs: Arc::new(FileBlobStore::new(&config.storage.dir)),
        firmware: Arc::new(FileFirmwareSlot::new(&config.ota.dir)),
        frontend,
        restart,
    }
}

// --- 2. 选择前端实现 ---
fn frontend(config: &AppConfig) -> Arc<dyn UiAssetProvider> {
    match &config.http.ui_dir {
        Some(dir) => {
            tracing::info!(dir = %dir.display(), "🚀 Using Disk UI Frontend (Debug Mode)");
            Arc::new(DiskFrontend::new(dir))
        }
        None => Arc::new(EmbedFrontend::new()),
    }
}

/// Pushes a line every second so the web log always shows the device is alive.
fn spawn_heartbeat() {
    tokio::spawn(async {
        let mut ticker = tokio::time::interval(Duration::from_secs(1));
        let mut beats: u64 = 0;
        loop {
            ticker.tick().await;
            beats += 1;
            tracing::info!(target: "heartbeat", beats, "alive");
        }
    });
}

// 新固件就绪后退出进程，由 systemd 拉起
fn restart_process() {
    std::process::exit(0)
}

pub async fn run(config: AppConfig, logs: LogRing) -> Result<()> {
    let restart: RestartHook = Arc::new(restart_process);

    let platform = platform(&config, frontend(&config), restart);
    let app = App::build(&config, logs, platform).await;

    spawn_heartbeat();
    let (network, supervisor) = app.spawn();

    let mut session = network.subscribe();
    tokio::select! {
        res = tokio::signal::ctrl_c() => {
            res.context("waiting for Ctrl-C")?;
            tracing::info!("Ctrl-C received, shutting down");
        }
        _ = async {
            while session.changed().await.is_ok() {
                let s = *session.borrow();
                tracing::info!(mode = ?s.mode, connected = s.connected, ip = ?s.ip, "session updated");
            }
        } => {}
    }

    network.shutdown().await;
    supervisor.await.context("network supervisor panicked")?;
    Ok(())
}
