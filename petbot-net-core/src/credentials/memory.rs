use crate::error::StorageError;
use crate::traits::BlobStore;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

/// Volatile blob store for tests and the simulated device.
#[derive(Debug, Default)]
pub struct MemoryBlobStore {
    blobs: Mutex<HashMap<String, Vec<u8>>>,
    unavailable: AtomicBool,
}

impl MemoryBlobStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Copy of the raw blob stored under `key`.
    pub fn snapshot(&self, key: &str) -> Option<Vec<u8>> {
        self.blobs.lock().ok()?.get(key).cloned()
    }

    /// Makes every operation fail with a permission error, like flash that
    /// went read-only.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    fn check(&self) -> Result<(), StorageError> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(StorageError::Io(std::io::Error::new(
                std::io::ErrorKind::PermissionDenied,
                "permission denied",
            )));
        }
        Ok(())
    }
}

fn poisoned() -> StorageError {
    StorageError::Io(std::io::Error::other("blob map lock poisoned"))
}

#[async_trait]
impl BlobStore for MemoryBlobStore {
    async fn read(&self, key: &str) -> Result<Option<Vec<u8>>, StorageError> {
        self.check()?;
        let blobs = self.blobs.lock().map_err(|_| poisoned())?;
        Ok(blobs.get(key).cloned())
    }

    async fn write(&self, key: &str, data: &[u8]) -> Result<(), StorageError> {
        self.check()?;
        let mut blobs = self.blobs.lock().map_err(|_| poisoned())?;
        blobs.insert(key.to_string(), data.to_vec());
        Ok(())
    }

    async fn erase(&self, key: &str) -> Result<(), StorageError> {
        self.check()?;
        let mut blobs = self.blobs.lock().map_err(|_| poisoned())?;
        blobs.remove(key);
        Ok(())
    }
}
