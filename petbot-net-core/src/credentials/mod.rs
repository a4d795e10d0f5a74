//! Persistent SSID → password list.
//!
//! The whole list lives in one fixed-size record that is rewritten in a
//! single durable write on every mutation, so callers never observe a
//! half-applied change.

mod file;
mod memory;
mod record;

pub use file::FileBlobStore;
pub use memory::MemoryBlobStore;

use crate::error::StorageError;
use crate::traits::BlobStore;
use std::fmt;
use std::sync::Arc;
use tokio::sync::Mutex;

/// Entries kept by the reference device.
pub const DEFAULT_CAPACITY: usize = 8;
pub const MAX_SSID_LEN: usize = 32;
pub const MAX_PASSWORD_LEN: usize = 64;
/// The record stores its slot count as a `u16`.
pub const MAX_CAPACITY: usize = u16::MAX as usize;

const RECORD_KEY: &str = "creds";

/// A saved network. Only constructible through [`Credential::new`], so every
/// instance satisfies the length limits of the persisted record.
#[derive(Clone, PartialEq, Eq)]
pub struct Credential {
    ssid: String,
    password: String,
}

impl Credential {
    pub fn new(ssid: impl Into<String>, password: impl Into<String>) -> crate::Result<Self> {
        let ssid = ssid.into();
        let password = password.into();
        if ssid.is_empty() {
            return Err(crate::Error::InvalidCredential("ssid is empty".into()));
        }
        if ssid.len() > MAX_SSID_LEN {
            return Err(crate::Error::InvalidCredential(format!(
                "ssid longer than {} bytes",
                MAX_SSID_LEN
            )));
        }
        if password.len() > MAX_PASSWORD_LEN {
            return Err(crate::Error::InvalidCredential(format!(
                "password longer than {} bytes",
                MAX_PASSWORD_LEN
            )));
        }
        Ok(Self { ssid, password })
    }

    pub fn ssid(&self) -> &str {
        &self.ssid
    }

    pub fn password(&self) -> &str {
        &self.password
    }

    pub fn has_password(&self) -> bool {
        !self.password.is_empty()
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credential")
            .field("ssid", &self.ssid)
            .field("password", &if self.password.is_empty() { "(empty)" } else { "********" })
            .finish()
    }
}

/// Owner of the saved credential list.
///
/// Every operation is a load-modify-persist cycle under one lock, which makes
/// mutations linearizable and gives readers a consistent snapshot.
pub struct CredentialStore {
    backend: Arc<dyn BlobStore>,
    capacity: usize,
    lock: Mutex<()>,
}

impl CredentialStore {
    /// Opens the store, erasing and re-initialising a corrupt record once.
    ///
    /// Never fails: unreadable storage is logged and the store starts with no
    /// saved networks, so bring-up still reaches the portal. Mutations keep
    /// reporting the underlying error to their caller.
    pub async fn open(backend: Arc<dyn BlobStore>, capacity: usize) -> Self {
        if capacity > MAX_CAPACITY {
            tracing::warn!(capacity, max = MAX_CAPACITY, "Credential capacity clamped");
        }
        let store = Self {
            backend,
            capacity: capacity.clamp(1, MAX_CAPACITY),
            lock: Mutex::new(()),
        };

        match store.backend.read(RECORD_KEY).await {
            Ok(None) => tracing::debug!("No credential record yet, starting empty"),
            Ok(Some(bytes)) => match record::decode(&bytes, store.capacity) {
                Ok(list) => tracing::info!(count = list.len(), "Credential record loaded"),
                Err(e) => {
                    tracing::warn!("Credential record unusable ({}), erasing and re-initialising", e);
                    store.reset().await;
                }
            },
            Err(e) => tracing::warn!("Credential storage unreadable ({}), starting with no saved networks", e),
        }

        store
    }

    async fn reset(&self) {
        if let Err(e) = self.backend.erase(RECORD_KEY).await {
            tracing::warn!("Erasing credential record failed: {}", e);
        }
        if let Err(e) = self.persist(&[]).await {
            tracing::warn!("Re-initialising credential record failed: {}", e);
        }
    }

    /// All saved credentials in insertion order. Empty when nothing was saved
    /// or the record cannot be read.
    pub async fn load(&self) -> Vec<Credential> {
        let _guard = self.lock.lock().await;
        match self.read_list().await {
            Ok(list) => list,
            Err(e) => {
                tracing::warn!("Failed to read credentials: {}", e);
                Vec::new()
            }
        }
    }

    /// Replaces the entry with the same SSID in place, or appends a new one.
    pub async fn save_or_update(&self, credential: Credential) -> Result<(), StorageError> {
        let _guard = self.lock.lock().await;
        let mut list = self.read_list().await?;

        if let Some(existing) = list.iter_mut().find(|c| c.ssid == credential.ssid) {
            *existing = credential;
        } else {
            if list.len() >= self.capacity {
                return Err(StorageError::CapacityExceeded {
                    capacity: self.capacity,
                });
            }
            list.push(credential);
        }

        self.persist(&list).await
    }

    /// Removes the entry for `ssid`, shifting later entries left.
    pub async fn delete(&self, ssid: &str) -> Result<(), StorageError> {
        let _guard = self.lock.lock().await;
        let mut list = self.read_list().await?;

        let before = list.len();
        list.retain(|c| c.ssid != ssid);
        if list.len() == before {
            return Err(StorageError::NotFound);
        }

        self.persist(&list).await
    }

    /// Empties the store unconditionally.
    pub async fn clear_all(&self) -> Result<(), StorageError> {
        let _guard = self.lock.lock().await;
        self.persist(&[]).await
    }

    async fn read_list(&self) -> Result<Vec<Credential>, StorageError> {
        match self.backend.read(RECORD_KEY).await? {
            Some(bytes) => record::decode(&bytes, self.capacity),
            None => Ok(Vec::new()),
        }
    }

    async fn persist(&self, list: &[Credential]) -> Result<(), StorageError> {
        let bytes = record::encode(list, self.capacity);
        self.backend.write(RECORD_KEY, &bytes).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cred(ssid: &str, password: &str) -> Credential {
        Credential::new(ssid, password).unwrap()
    }

    async fn open_empty(capacity: usize) -> (Arc<MemoryBlobStore>, CredentialStore) {
        let backend = Arc::new(MemoryBlobStore::new());
        let store = CredentialStore::open(backend.clone(), capacity).await;
        (backend, store)
    }

    fn ssids(list: &[Credential]) -> Vec<&str> {
        list.iter().map(|c| c.ssid()).collect()
    }

    #[test]
    fn credential_limits_are_enforced() {
        assert!(Credential::new("", "x").is_err());
        assert!(Credential::new("a".repeat(33), "").is_err());
        assert!(Credential::new("a".repeat(32), "p".repeat(64)).is_ok());
        assert!(Credential::new("net", "p".repeat(65)).is_err());
    }

    #[test]
    fn debug_output_hides_the_password() {
        let shown = format!("{:?}", cred("Home", "hunter22"));
        assert!(shown.contains("Home"));
        assert!(!shown.contains("hunter22"));
    }

    #[tokio::test]
    async fn empty_store_loads_nothing() {
        let (_, store) = open_empty(DEFAULT_CAPACITY).await;
        assert!(store.load().await.is_empty());
    }

    #[tokio::test]
    async fn saving_twice_is_idempotent() {
        let (backend, store) = open_empty(DEFAULT_CAPACITY).await;
        store.save_or_update(cred("Home", "12345678")).await.unwrap();
        let first = backend.snapshot(RECORD_KEY).unwrap();

        store.save_or_update(cred("Home", "12345678")).await.unwrap();
        assert_eq!(backend.snapshot(RECORD_KEY).unwrap(), first);
        assert_eq!(store.load().await, vec![cred("Home", "12345678")]);
    }

    #[tokio::test]
    async fn update_replaces_in_place_and_keeps_order() {
        let (_, store) = open_empty(DEFAULT_CAPACITY).await;
        for (s, p) in [("A", "1"), ("B", "2"), ("C", "3")] {
            store.save_or_update(cred(s, p)).await.unwrap();
        }
        store.save_or_update(cred("B", "changed")).await.unwrap();

        let list = store.load().await;
        assert_eq!(ssids(&list), ["A", "B", "C"]);
        assert_eq!(list[1].password(), "changed");
    }

    #[tokio::test]
    async fn ninth_distinct_ssid_exceeds_capacity() {
        let (_, store) = open_empty(8).await;
        for i in 0..8 {
            store.save_or_update(cred(&format!("net{i}"), "pw")).await.unwrap();
        }
        let before = store.load().await;

        let err = store.save_or_update(cred("net8", "pw")).await.unwrap_err();
        assert!(matches!(err, StorageError::CapacityExceeded { capacity: 8 }));
        assert_eq!(store.load().await, before);

        // Updating an existing SSID still works when full.
        store.save_or_update(cred("net3", "new")).await.unwrap();
        assert_eq!(store.load().await[3].password(), "new");
    }

    #[tokio::test]
    async fn delete_compacts_preserving_order() {
        let (_, store) = open_empty(DEFAULT_CAPACITY).await;
        for s in ["A", "B", "C", "D"] {
            store.save_or_update(cred(s, "pw")).await.unwrap();
        }

        store.delete("B").await.unwrap();
        assert_eq!(ssids(&store.load().await), ["A", "C", "D"]);

        store.delete("D").await.unwrap();
        assert_eq!(ssids(&store.load().await), ["A", "C"]);
    }

    #[tokio::test]
    async fn deleting_unknown_ssid_is_not_found() {
        let (_, store) = open_empty(DEFAULT_CAPACITY).await;
        store.save_or_update(cred("A", "pw")).await.unwrap();
        assert!(matches!(store.delete("Z").await, Err(StorageError::NotFound)));
        assert_eq!(store.load().await.len(), 1);
    }

    #[tokio::test]
    async fn clear_all_is_idempotent() {
        let (_, store) = open_empty(DEFAULT_CAPACITY).await;
        store.save_or_update(cred("A", "pw")).await.unwrap();
        store.clear_all().await.unwrap();
        store.clear_all().await.unwrap();
        assert!(store.load().await.is_empty());
    }

    #[tokio::test]
    async fn corrupt_record_is_reset_at_open() {
        let backend = Arc::new(MemoryBlobStore::new());
        backend.write(RECORD_KEY, b"garbage that is not a record").await.unwrap();

        let store = CredentialStore::open(backend.clone(), DEFAULT_CAPACITY).await;
        assert!(store.load().await.is_empty());

        // The reset record is valid and usable afterwards.
        store.save_or_update(cred("A", "pw")).await.unwrap();
        let reopened = CredentialStore::open(backend, DEFAULT_CAPACITY).await;
        assert_eq!(ssids(&reopened.load().await), ["A"]);
    }

    #[tokio::test]
    async fn unreadable_storage_opens_empty() {
        let backend = Arc::new(MemoryBlobStore::new());
        backend.set_unavailable(true);

        let store = CredentialStore::open(backend.clone(), DEFAULT_CAPACITY).await;
        assert!(store.load().await.is_empty());
        assert!(matches!(
            store.save_or_update(cred("A", "pw")).await,
            Err(StorageError::Io(_))
        ));

        // 存储恢复后写入正常
        backend.set_unavailable(false);
        store.save_or_update(cred("A", "pw")).await.unwrap();
        assert_eq!(ssids(&store.load().await), ["A"]);
    }

    #[tokio::test]
    async fn oversized_capacity_still_reopens() {
        let (backend, store) = open_empty(MAX_CAPACITY + 1).await;
        store.save_or_update(cred("Home", "12345678")).await.unwrap();

        // 头部记录的容量与重新打开时一致，不会被当成损坏
        let reopened = CredentialStore::open(backend, MAX_CAPACITY + 1).await;
        assert_eq!(ssids(&reopened.load().await), ["Home"]);
    }

    #[tokio::test]
    async fn uniqueness_holds_over_mixed_saves() {
        let (_, store) = open_empty(DEFAULT_CAPACITY).await;
        let writes = [("A", "1"), ("B", "1"), ("A", "2"), ("C", "1"), ("B", "3"), ("A", "4")];
        for (s, p) in writes {
            store.save_or_update(cred(s, p)).await.unwrap();
        }

        let list = store.load().await;
        assert_eq!(ssids(&list), ["A", "B", "C"]);
        assert_eq!(list[0].password(), "4");
        assert_eq!(list[1].password(), "3");
    }

    #[tokio::test]
    async fn concurrent_saves_are_not_lost() {
        let (_, store) = open_empty(DEFAULT_CAPACITY).await;
        let store = Arc::new(store);

        let mut tasks = Vec::new();
        for i in 0..6 {
            let store = store.clone();
            tasks.push(tokio::spawn(async move {
                store.save_or_update(cred(&format!("net{i}"), "pw")).await
            }));
        }
        for t in tasks {
            t.await.unwrap().unwrap();
        }

        assert_eq!(store.load().await.len(), 6);
    }
}
