//! Core library for the PetBot network subsystem.
//! This crate defines the collaborator traits (radio, blob storage, firmware
//! slot, UI assets), the credential store, the captive DNS responder, the
//! station/portal state machine with its supervisor task, the management
//! HTTP server and the in-memory log ring that feeds the web UI.

pub mod app;
pub mod backends;
pub mod config;
pub mod credentials;
pub mod dns;
pub mod error;
pub mod frontends;
pub mod log_ring;
pub mod mdns;
pub mod ota;
pub mod state_machine;
pub mod supervisor;
pub mod traits;
pub mod web_server;

// Define a shared Error and Result type for the entire crate.

use thiserror::Error;

pub use error::{HttpError, NetworkError, OtaError, ProtocolError, StorageError};

#[derive(Debug, Error)]
pub enum Error {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Network error: {0}")]
    Network(#[from] NetworkError),

    #[error("OTA error: {0}")]
    Ota(#[from] OtaError),

    #[error("Invalid configuration: {0}")]
    Config(#[from] toml::de::Error),

    #[error("Invalid credential: {0}")]
    InvalidCredential(String),

    #[error("Web server error: {0}")]
    WebServer(#[from] axum::BoxError),

    #[error("Asset not found: {0}")]
    AssetNotFound(String),
}

/// A specialized `Result` type for this crate's operations.
pub type Result<T> = std::result::Result<T, Error>;
