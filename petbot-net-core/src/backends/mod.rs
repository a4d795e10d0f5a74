//! Radio implementations of [`crate::traits::WifiRadio`].

pub mod mock;
pub mod utils;

#[cfg(feature = "backend_wpa_cli")]
pub mod wpa_cli;
