#![allow(dead_code)]

use petbot_net_core::app::{App, Platform};
use petbot_net_core::backends::mock::SimulatedRadio;
use petbot_net_core::config::AppConfig;
use petbot_net_core::credentials::MemoryBlobStore;
use petbot_net_core::frontends::EmbedFrontend;
use petbot_net_core::log_ring::LogRing;
use petbot_net_core::ota::{FileFirmwareSlot, RestartHook};
use petbot_net_core::state_machine::SessionState;
use petbot_net_core::supervisor::NetworkHandle;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

pub struct Fixture {
    pub app: App,
    pub radio: Arc<SimulatedRadio>,
    pub blobs: Arc<MemoryBlobStore>,
    pub firmware: Arc<FileFirmwareSlot>,
    pub restarted: Arc<AtomicBool>,
    _ota_dir: TempDir,
}

impl Fixture {
    pub fn restarted(&self) -> bool {
        self.restarted.load(Ordering::SeqCst)
    }
}

/// Loopback-only config with short timers.
pub fn test_config() -> AppConfig {
    let mut config = AppConfig::default();
    config.http.bind_addr = "127.0.0.1:0".parse().unwrap();
    config.dns.bind_addr = "127.0.0.1:0".parse().unwrap();
    config.station.retry_limit = 2;
    config.station.connect_timeout = Duration::from_secs(2);
    config
}

pub async fn fixture(config: AppConfig) -> Fixture {
    fixture_with_blobs(config, Arc::new(MemoryBlobStore::new())).await
}

pub async fn fixture_with_blobs(config: AppConfig, blobs: Arc<MemoryBlobStore>) -> Fixture {
    let (radio, radio_events) = SimulatedRadio::new();
    let ota_dir = tempfile::tempdir().unwrap();
    let firmware = Arc::new(FileFirmwareSlot::new(ota_dir.path()));

    let restarted = Arc::new(AtomicBool::new(false));
    let flag = restarted.clone();
    let restart: RestartHook = Arc::new(move || flag.store(true, Ordering::SeqCst));

    let platform = Platform {
        radio: radio.clone(),
        radio_events,
        advertiser: radio.clone(),
        blobs: blobs.clone(),
        firmware: firmware.clone(),
        frontend: Arc::new(EmbedFrontend::new()),
        restart,
    };
    let app = App::build(&config, LogRing::new(64, 160), platform).await;

    Fixture {
        app,
        radio,
        blobs,
        firmware,
        restarted,
        _ota_dir: ota_dir,
    }
}

/// Waits until the published session satisfies `pred`.
pub async fn wait_for(handle: &NetworkHandle, pred: impl Fn(&SessionState) -> bool) -> SessionState {
    let mut rx = handle.subscribe();
    tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            let current = *rx.borrow_and_update();
            if pred(&current) {
                return current;
            }
            rx.changed().await.expect("supervisor stopped");
        }
    })
    .await
    .expect("timed out waiting for session state")
}

/// Polls `cond` until it holds.
pub async fn eventually(cond: impl Fn() -> bool) {
    tokio::time::timeout(Duration::from_secs(5), async {
        while !cond() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("condition never held")
}
