use crate::traits::UiAssetProvider;
use crate::{Error, Result};
use async_trait::async_trait;
use std::borrow::Cow;
use std::path::{Component, Path, PathBuf};

/// Serves UI files from a directory, read at request time. Handy while
/// editing the pages without rebuilding.
#[derive(Debug, Clone)]
pub struct DiskFrontend {
    root: PathBuf,
}

impl DiskFrontend {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// 只接受普通的相对路径，拒绝 `..` 和绝对路径
    fn resolve(&self, path: &str) -> Option<PathBuf> {
        let rel = Path::new(path);
        if rel.components().all(|c| matches!(c, Component::Normal(_))) {
            Some(self.root.join(rel))
        } else {
            None
        }
    }
}

#[async_trait]
impl UiAssetProvider for DiskFrontend {
    async fn get_asset(&self, path: &str) -> Result<(Cow<'static, [u8]>, String)> {
        let file = self
            .resolve(path)
            .ok_or_else(|| Error::AssetNotFound(path.to_string()))?;
        let data = tokio::fs::read(&file)
            .await
            .map_err(|_| Error::AssetNotFound(path.to_string()))?;
        let mime = mime_guess::from_path(&file)
            .first_or_octet_stream()
            .to_string();

        Ok((Cow::Owned(data), mime))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn serves_files_and_rejects_traversal() {
        let dir = tempfile::tempdir().unwrap();
        let ui = dir.path().join("ui");
        std::fs::create_dir_all(ui.join("assets")).unwrap();
        std::fs::write(ui.join("assets/main.js"), "console.log(1)").unwrap();
        std::fs::write(dir.path().join("secret.txt"), "nope").unwrap();

        let frontend = DiskFrontend::new(&ui);
        let (data, mime) = frontend.get_asset("assets/main.js").await.unwrap();
        assert_eq!(&*data, b"console.log(1)");
        assert!(mime.contains("javascript"));

        assert!(frontend.get_asset("../secret.txt").await.is_err());
        assert!(frontend.get_asset("/etc/passwd").await.is_err());
        assert!(frontend.get_asset("index.html").await.is_err());
    }
}
