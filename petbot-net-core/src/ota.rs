//! Firmware upload into the inactive slot.
//!
//! The image is streamed straight from the request body into the slot; it is
//! only marked bootable after the full declared length arrived and the slot
//! accepted it. Any failure discards the partial image.

use crate::error::{HttpError, OtaError};
use crate::traits::FirmwareSlot;
use async_trait::async_trait;
use axum::body::{Body, Bytes};
use axum::extract::{DefaultBodyLimit, State};
use axum::http::{header, HeaderMap};
use axum::routing::{get, post};
use axum::{Json, Router};
use futures_util::{Stream, StreamExt};
use sha2::{Digest, Sha256};
use std::fmt::Display;
use serde::Serialize;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::fs;
use tokio::io::AsyncWriteExt;

/// Largest image accepted unless configured otherwise.
pub const DEFAULT_MAX_IMAGE_SIZE: u64 = 4 * 1024 * 1024;
pub const UPLOAD_PATH: &str = "/api/ota/upload";
pub const STATUS_PATH: &str = "/api/ota/status";

const PARTIAL_FILE: &str = "firmware.partial";
const IMAGE_FILE: &str = "firmware.next";
const BOOT_MARKER: &str = "boot.next";

/// Progress of the most recent upload, served as JSON on [`STATUS_PATH`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum OtaStatus {
    Idle,
    Receiving { received: u64, expected: u64 },
    Verifying,
    Ready,
    Failed,
}

/// Invoked once a new image is bootable.
pub type RestartHook = Arc<dyn Fn() + Send + Sync>;

pub struct OtaUpdater {
    slot: Arc<dyn FirmwareSlot>,
    max_image_size: u64,
    busy: AtomicBool,
    status: Mutex<OtaStatus>,
    restart: RestartHook,
    restart_delay: Duration,
}

/// Clears the busy flag however the upload ends.
struct BusyGuard<'a>(&'a AtomicBool);

impl Drop for BusyGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

impl OtaUpdater {
    pub fn new(slot: Arc<dyn FirmwareSlot>, max_image_size: u64, restart: RestartHook) -> Self {
        Self {
            slot,
            max_image_size,
            busy: AtomicBool::new(false),
            status: Mutex::new(OtaStatus::Idle),
            restart,
            restart_delay: Duration::from_millis(500),
        }
    }

    pub fn with_restart_delay(mut self, delay: Duration) -> Self {
        self.restart_delay = delay;
        self
    }

    pub fn status(&self) -> OtaStatus {
        *self.status.lock().unwrap_or_else(|p| p.into_inner())
    }

    fn set_status(&self, status: OtaStatus) {
        *self.status.lock().unwrap_or_else(|p| p.into_inner()) = status;
    }

    /// Streams `body` into the slot. `expected_len` is the declared size.
    pub async fn apply<S, E>(&self, expected_len: u64, body: S) -> Result<u64, OtaError>
    where
        S: Stream<Item = Result<Bytes, E>> + Unpin,
        E: Display,
    {
        if expected_len == 0 {
            return Err(OtaError::InvalidSize("empty image".into()));
        }
        if expected_len > self.max_image_size {
            return Err(OtaError::InvalidSize(format!(
                "{} bytes exceeds the {} byte limit",
                expected_len, self.max_image_size
            )));
        }

        if self
            .busy
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return Err(OtaError::Busy);
        }
        let _guard = BusyGuard(&self.busy);

        tracing::info!(bytes = expected_len, "OTA upload started");
        match self.stream_into_slot(expected_len, body).await {
            Ok(()) => {
                self.set_status(OtaStatus::Ready);
                tracing::info!(bytes = expected_len, "OTA image accepted");
                Ok(expected_len)
            }
            Err(e) => {
                self.slot.abort().await;
                self.set_status(OtaStatus::Failed);
                tracing::error!("OTA upload aborted: {}", e);
                Err(e)
            }
        }
    }

    async fn stream_into_slot<S, E>(&self, expected: u64, mut body: S) -> Result<(), OtaError>
    where
        S: Stream<Item = Result<Bytes, E>> + Unpin,
        E: Display,
    {
        self.slot.begin(expected).await?;
        self.set_status(OtaStatus::Receiving { received: 0, expected });

        let mut received = 0u64;
        while let Some(chunk) = body.next().await {
            let chunk = chunk.map_err(|e| OtaError::Write(format!("body read failed: {}", e)))?;
            received += chunk.len() as u64;
            if received > expected {
                return Err(OtaError::Validation("body longer than Content-Length".into()));
            }
            self.slot.write(&chunk).await?;
            self.set_status(OtaStatus::Receiving { received, expected });
        }

        if received != expected {
            return Err(OtaError::Validation(format!(
                "received {} of {} bytes",
                received, expected
            )));
        }

        self.set_status(OtaStatus::Verifying);
        self.slot.finalize().await
    }

    /// Runs the restart hook after the configured delay, giving the HTTP
    /// response time to reach the client.
    pub fn schedule_restart(&self) {
        let hook = self.restart.clone();
        let delay = self.restart_delay;
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            tracing::warn!("restarting into new firmware");
            hook();
        });
    }
}

/// Adds the upload and progress routes to `router`.
pub fn register_upload_handler(router: Router, updater: Arc<OtaUpdater>) -> Router {
    let upload = Router::new()
        .route(UPLOAD_PATH, post(upload_firmware))
        .route(STATUS_PATH, get(upload_status))
        // 镜像大小由 OtaUpdater 自行限制
        .layer(DefaultBodyLimit::disable())
        .with_state(updater);
    router.merge(upload)
}

async fn upload_firmware(
    State(updater): State<Arc<OtaUpdater>>,
    headers: HeaderMap,
    body: Body,
) -> Result<&'static str, HttpError> {
    let expected = headers
        .get(header::CONTENT_LENGTH)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse::<u64>().ok())
        .filter(|n| *n > 0)
        .ok_or_else(|| HttpError::BadRequest("Content-Length required".into()))?;

    updater.apply(expected, body.into_data_stream()).await?;
    updater.schedule_restart();
    Ok("OK - Rebooting")
}

async fn upload_status(State(updater): State<Arc<OtaUpdater>>) -> Json<OtaStatus> {
    Json(updater.status())
}

struct PartialImage {
    file: fs::File,
    expected: u64,
    written: u64,
    hasher: Sha256,
}

/// Firmware slot backed by files in a directory.
///
/// The image is written to `firmware.partial`, renamed to `firmware.next`
/// once complete, and `boot.next` records its SHA-256 as the "bootable"
/// marker for the next start.
pub struct FileFirmwareSlot {
    dir: PathBuf,
    partial: tokio::sync::Mutex<Option<PartialImage>>,
}

impl FileFirmwareSlot {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            partial: tokio::sync::Mutex::new(None),
        }
    }

    /// Digest of the image marked bootable, if any.
    pub async fn pending_boot(&self) -> Option<String> {
        let marker = fs::read_to_string(self.dir.join(BOOT_MARKER)).await.ok()?;
        Some(marker.trim().to_string())
    }
}

#[async_trait]
impl FirmwareSlot for FileFirmwareSlot {
    async fn begin(&self, expected_len: u64) -> Result<(), OtaError> {
        fs::create_dir_all(&self.dir).await?;
        let file = fs::File::create(self.dir.join(PARTIAL_FILE)).await?;
        *self.partial.lock().await = Some(PartialImage {
            file,
            expected: expected_len,
            written: 0,
            hasher: Sha256::new(),
        });
        Ok(())
    }

    async fn write(&self, chunk: &[u8]) -> Result<(), OtaError> {
        let mut guard = self.partial.lock().await;
        let partial = guard
            .as_mut()
            .ok_or_else(|| OtaError::Write("no update in progress".into()))?;

        if partial.written + chunk.len() as u64 > partial.expected {
            return Err(OtaError::Write("image exceeds declared size".into()));
        }
        partial
            .file
            .write_all(chunk)
            .await
            .map_err(|e| OtaError::Write(e.to_string()))?;
        partial.hasher.update(chunk);
        partial.written += chunk.len() as u64;
        Ok(())
    }

    async fn finalize(&self) -> Result<(), OtaError> {
        let partial = self
            .partial
            .lock()
            .await
            .take()
            .ok_or_else(|| OtaError::Validation("no update in progress".into()))?;

        if partial.written != partial.expected {
            let _ = fs::remove_file(self.dir.join(PARTIAL_FILE)).await;
            return Err(OtaError::Validation(format!(
                "image is {} bytes, expected {}",
                partial.written, partial.expected
            )));
        }

        let PartialImage { mut file, hasher, .. } = partial;
        file.flush().await?;
        file.sync_all().await?;
        drop(file);

        fs::rename(self.dir.join(PARTIAL_FILE), self.dir.join(IMAGE_FILE)).await?;
        let digest = format!("{:x}", hasher.finalize());
        fs::write(self.dir.join(BOOT_MARKER), format!("{}\n", digest)).await?;
        tracing::info!(sha256 = %digest, "firmware marked bootable");
        Ok(())
    }

    async fn abort(&self) {
        self.partial.lock().await.take();
        let _ = fs::remove_file(self.dir.join(PARTIAL_FILE)).await;
    }
}
