//! Top-level wiring: one explicitly constructed context per device.

use crate::config::AppConfig;
use crate::credentials::CredentialStore;
use crate::log_ring::LogRing;
use crate::ota::{OtaUpdater, RestartHook};
use crate::state_machine::Policy;
use crate::supervisor::{self, NetworkHandle, NetworkSupervisor, SupervisorConfig};
use crate::traits::{BlobStore, FirmwareSlot, RadioEvent, ServiceAdvertiser, UiAssetProvider, WifiRadio};
use crate::web_server::{build_router, AppState, HttpLauncher};
use axum::Router;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

/// The platform collaborators the subsystem runs on.
pub struct Platform {
    pub radio: Arc<dyn WifiRadio>,
    pub radio_events: mpsc::Receiver<RadioEvent>,
    pub advertiser: Arc<dyn ServiceAdvertiser>,
    pub blobs: Arc<dyn BlobStore>,
    pub firmware: Arc<dyn FirmwareSlot>,
    pub frontend: Arc<dyn UiAssetProvider>,
    pub restart: RestartHook,
}

pub struct App {
    pub network: NetworkHandle,
    pub store: Arc<CredentialStore>,
    pub logs: LogRing,
    pub ota: Arc<OtaUpdater>,
    /// The management router, also served by the supervisor's HTTP launcher.
    pub router: Router,
    supervisor: NetworkSupervisor,
}

impl App {
    pub async fn build(config: &AppConfig, logs: LogRing, platform: Platform) -> Self {
        let store = Arc::new(CredentialStore::open(platform.blobs, config.storage.capacity).await);
        let ota = Arc::new(OtaUpdater::new(
            platform.firmware,
            config.ota.max_image_size,
            platform.restart,
        ));

        let (network, mailbox) = supervisor::channel();
        let state = Arc::new(AppState {
            radio: platform.radio.clone(),
            store: store.clone(),
            network: network.clone(),
            logs: logs.clone(),
            frontend: platform.frontend,
            portal_url: config.http.portal_url.clone(),
        });
        let router = build_router(state, Some(ota.clone()));

        let supervisor = NetworkSupervisor::new(
            SupervisorConfig {
                policy: Policy {
                    retry_limit: config.station.retry_limit,
                    connect_timeout: config.station.connect_timeout,
                },
                access_point: config.ap.clone(),
                hostname: config.station.hostname.clone(),
                http_port: config.http.bind_addr.port(),
                dns_bind: config.dns.bind_addr,
            },
            platform.radio,
            platform.radio_events,
            platform.advertiser,
            store.clone(),
            HttpLauncher::new(config.http.bind_addr, router.clone()),
            mailbox,
        );

        Self {
            network,
            store,
            logs,
            ota,
            router,
            supervisor,
        }
    }

    /// Starts the supervisor task; it boots the machine immediately.
    pub fn spawn(self) -> (NetworkHandle, JoinHandle<()>) {
        let handle = tokio::spawn(self.supervisor.run());
        (self.network, handle)
    }
}
