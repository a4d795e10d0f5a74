//! The PetBot management pages compiled into the daemon binary.
//!
//! `ui/` holds four pages (Wi-Fi setup, logs, firmware update, settings)
//! sharing `assets/main.js` and `assets/style.css`. Bundling them means the
//! portal works on a device with a read-only or empty filesystem.

use crate::traits::UiAssetProvider;
use crate::{Error, Result};
use async_trait::async_trait;
use rust_embed::RustEmbed;
use std::borrow::Cow;

#[derive(RustEmbed)]
#[folder = "$CARGO_MANIFEST_DIR/ui/"]
struct PetbotPages;

/// Pages the router exposes, by file name.
pub const PAGES: [&str; 4] = ["index.html", "logs.html", "ota.html", "settings.html"];

/// Serves the bundled PetBot pages and their script and stylesheet.
#[derive(Debug, Default)]
pub struct EmbedFrontend;

impl EmbedFrontend {
    pub fn new() -> Self {
        Self
    }
}

/// 页面和脚本都是 UTF-8，文本类型补上 charset
fn content_type(path: &str) -> String {
    let mime = mime_guess::from_path(path).first_or_octet_stream();
    if mime.type_() == mime_guess::mime::TEXT || mime.subtype() == mime_guess::mime::JAVASCRIPT {
        format!("{}; charset=utf-8", mime.essence_str())
    } else {
        mime.essence_str().to_string()
    }
}

#[async_trait]
impl UiAssetProvider for EmbedFrontend {
    async fn get_asset(&self, path: &str) -> Result<(Cow<'static, [u8]>, String)> {
        let file = PetbotPages::get(path).ok_or_else(|| Error::AssetNotFound(path.to_string()))?;
        Ok((file.data, content_type(path)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn every_routed_page_is_bundled() {
        let ui = EmbedFrontend::new();
        for page in PAGES {
            let (data, mime) = ui.get_asset(page).await.unwrap();
            assert_eq!(mime, "text/html; charset=utf-8", "page {}", page);
            assert!(data.starts_with(b"<!doctype html>"), "page {}", page);
        }
    }

    #[tokio::test]
    async fn shared_assets_carry_their_types() {
        let ui = EmbedFrontend::new();
        let (_, css) = ui.get_asset("assets/style.css").await.unwrap();
        assert_eq!(css, "text/css; charset=utf-8");
        let (_, js) = ui.get_asset("assets/main.js").await.unwrap();
        assert!(js.contains("javascript") && js.ends_with("charset=utf-8"));
        assert!(matches!(ui.get_asset("missing.txt").await, Err(Error::AssetNotFound(_))));
    }
}
