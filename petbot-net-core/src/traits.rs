use async_trait::async_trait;
use serde::Serialize;
use std::borrow::Cow;
use std::net::Ipv4Addr;

use crate::config::AccessPointConfig;
use crate::credentials::Credential;
use crate::error::{NetworkError, OtaError, StorageError};

// 在这里定义各组件依赖的平台协作者接口：无线电、持久化存储、固件分区、前端资源。

/// Authentication advertised by a scanned network.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AuthMode {
    Open,
    Wep,
    Wpa,
    Wpa2,
    WpaWpa2,
    Wpa3,
    Unknown,
}

/// Represents a single Wi-Fi network found during a scan.
/// Wi-Fi 扫描时单个网络的具体信息。
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ScanResult {
    pub ssid: String,
    /// Measured signal in dBm (e.g. -40 is stronger than -60).
    pub signal_strength: i16,
    pub auth_mode: AuthMode,
}

/// Events published by the radio layer. They are consumed exclusively by the
/// network supervisor task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RadioEvent {
    /// Station associated and obtained an address.
    Connected { ip: Ipv4Addr },
    /// Station association failed or the link went down.
    Disconnected,
    /// The access point is up and accepting clients.
    ApStarted,
}

/// The Wi-Fi radio as seen by the supervisor.
///
/// Operations block the calling task until the radio has accepted the
/// request; connection outcomes are reported asynchronously through the
/// radio's `RadioEvent` channel.
#[async_trait]
pub trait WifiRadio: Send + Sync {
    /// Executes a blocking scan in station role and returns every visible network.
    async fn scan(&self) -> Result<Vec<ScanResult>, NetworkError>;

    /// Configures station role with the credential and initiates association.
    async fn connect_station(&self, credential: &Credential) -> Result<(), NetworkError>;

    /// Stops the radio in station role.
    async fn stop_station(&self) -> Result<(), NetworkError>;

    /// Starts the radio in access-point role and returns the access point's own address.
    async fn start_access_point(&self, config: &AccessPointConfig) -> Result<Ipv4Addr, NetworkError>;

    /// Stops the access point.
    async fn stop_access_point(&self) -> Result<(), NetworkError>;

    /// Registers the discoverable hostname of the station interface.
    async fn set_hostname(&self, hostname: &str) -> Result<(), NetworkError>;
}

/// Makes the device discoverable on the joined network (`<hostname>.local`
/// plus an `_http._tcp` service for the management UI).
#[async_trait]
pub trait ServiceAdvertiser: Send + Sync {
    /// Replaces any earlier registration.
    async fn advertise(&self, hostname: &str, ip: Ipv4Addr, http_port: u16) -> Result<(), NetworkError>;

    /// Removes the registration; a no-op when nothing is advertised.
    async fn withdraw(&self) -> Result<(), NetworkError>;
}

/// Durable named blobs surviving power loss (NVS-equivalent).
///
/// A `write` must replace the previous value atomically: after a crash the
/// reader sees either the old or the new blob, never a mix.
#[async_trait]
pub trait BlobStore: Send + Sync {
    async fn read(&self, key: &str) -> Result<Option<Vec<u8>>, StorageError>;
    async fn write(&self, key: &str, data: &[u8]) -> Result<(), StorageError>;
    async fn erase(&self, key: &str) -> Result<(), StorageError>;
}

/// The inactive firmware slot an OTA upload is streamed into.
#[async_trait]
pub trait FirmwareSlot: Send + Sync {
    /// Prepares the slot for an image of `expected_len` bytes.
    async fn begin(&self, expected_len: u64) -> Result<(), OtaError>;

    async fn write(&self, chunk: &[u8]) -> Result<(), OtaError>;

    /// Validates the complete image and marks it bootable.
    async fn finalize(&self) -> Result<(), OtaError>;

    /// Discards a partial image. Never fails; leftovers are cleared by the next `begin`.
    async fn abort(&self);
}

/// 前端资源提供者接口。
#[async_trait]
pub trait UiAssetProvider: Send + Sync {
    /// Retrieves a single UI asset.
    ///
    /// # Arguments
    /// * `path` - The path to the asset (e.g., "index.html", "assets/style.css").
    ///
    /// # Returns
    /// A `Result` containing a tuple of (`Cow<'static, [u8]>`, `String`)
    /// representing the asset's content and its MIME type, or an `Error` if not found.
    async fn get_asset(&self, path: &str) -> crate::Result<(Cow<'static, [u8]>, String)>;
}
