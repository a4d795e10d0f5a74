//! UI asset providers for the management pages.

pub mod disk_frontend;
pub mod embed_frontend;

pub use disk_frontend::DiskFrontend;
pub use embed_frontend::EmbedFrontend;
