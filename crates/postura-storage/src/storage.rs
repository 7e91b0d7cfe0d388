//! 制品存储管理
//!
//! 上传原图和处理生成文件所在的分层文件存储。所有IO失败统一映射为 `StorageUnavailable`。

use postura_core::utils::generate_upload_name;
use postura_core::{PosturaError, Result};
use std::path::{Path, PathBuf};
use tracing::debug;

/// 存储管理器
#[derive(Debug, Clone)]
pub struct ArtifactStore {
    root: PathBuf,
    uploads_dir: String,
    processed_dir: String,
}

impl ArtifactStore {
    pub fn new(
        root: impl Into<PathBuf>,
        uploads_dir: impl Into<String>,
        processed_dir: impl Into<String>,
    ) -> Self {
        Self {
            root: root.into(),
            uploads_dir: uploads_dir.into(),
            processed_dir: processed_dir.into(),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// 生成文件所在目录名（同时也是Web路径的首段）
    pub fn processed_dir(&self) -> &str {
        &self.processed_dir
    }

    pub fn processed_root(&self) -> PathBuf {
        self.root.join(&self.processed_dir)
    }

    /// 原图的绝对路径
    pub fn original_path(&self, stored_name: &str) -> PathBuf {
        self.root.join(&self.uploads_dir).join(stored_name)
    }

    /// 存储上传的原图，返回存储文件名
    pub async fn store_original(&self, file_name: &str, data: &[u8]) -> Result<String> {
        let stored_name = generate_upload_name(file_name)?;
        let full_path = self.original_path(&stored_name);
        if let Some(parent) = full_path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| PosturaError::storage_unavailable(parent, e))?;
        }

        tokio::fs::write(&full_path, data)
            .await
            .map_err(|e| PosturaError::storage_unavailable(&full_path, e))?;
        debug!("Stored original photo {} ({} bytes)", full_path.display(), data.len());
        Ok(stored_name)
    }

    /// 文件是否存在
    pub async fn exists(&self, path: &Path) -> Result<bool> {
        tokio::fs::try_exists(path)
            .await
            .map_err(|e| PosturaError::storage_unavailable(path, e))
    }

    /// 列出目录下指定扩展名的文件，按文件名排序
    pub async fn list_files(&self, dir: &Path, extension: &str) -> Result<Vec<PathBuf>> {
        let wanted = extension.trim_start_matches('.');
        self.collect_files(dir, |path| {
            path.extension()
                .and_then(|ext| ext.to_str())
                .is_some_and(|ext| ext.eq_ignore_ascii_case(wanted))
        })
        .await
    }

    /// 列出目录下文件名以指定后缀结尾的文件，按文件名排序
    pub async fn find_by_suffix(&self, dir: &Path, suffix: &str) -> Result<Vec<PathBuf>> {
        self.collect_files(dir, |path| {
            path.file_name()
                .and_then(|name| name.to_str())
                .is_some_and(|name| name.ends_with(suffix))
        })
        .await
    }

    async fn collect_files<F>(&self, dir: &Path, matches: F) -> Result<Vec<PathBuf>>
    where
        F: Fn(&Path) -> bool,
    {
        let mut entries = tokio::fs::read_dir(dir)
            .await
            .map_err(|e| PosturaError::storage_unavailable(dir, e))?;

        let mut files = Vec::new();
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| PosturaError::storage_unavailable(dir, e))?
        {
            let file_type = entry
                .file_type()
                .await
                .map_err(|e| PosturaError::storage_unavailable(&entry.path(), e))?;
            let path = entry.path();
            if file_type.is_file() && matches(&path) {
                files.push(path);
            }
        }

        files.sort();
        Ok(files)
    }

    /// 删除文件，文件不存在时视为成功
    pub async fn remove_file(&self, path: &Path) -> Result<()> {
        match tokio::fs::remove_file(path).await {
            Ok(()) => {
                debug!("Removed stale artifact {}", path.display());
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(PosturaError::storage_unavailable(path, e)),
        }
    }

    /// 读取文本文件
    pub async fn read_text(&self, path: &Path) -> Result<String> {
        tokio::fs::read_to_string(path)
            .await
            .map_err(|e| PosturaError::storage_unavailable(path, e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use postura_core::ErrorKind;
    use tempfile::TempDir;

    fn store(dir: &TempDir) -> ArtifactStore {
        ArtifactStore::new(dir.path(), "images", "processed_images")
    }

    #[tokio::test]
    async fn test_store_original() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir);

        let name = store.store_original("back.jpeg", b"jpeg-bytes").await.unwrap();
        assert!(name.ends_with(".jpeg"));

        let path = store.original_path(&name);
        assert!(store.exists(&path).await.unwrap());
        assert_eq!(tokio::fs::read(&path).await.unwrap(), b"jpeg-bytes");
    }

    #[tokio::test]
    async fn test_store_original_rejects_other_formats() {
        let dir = TempDir::new().unwrap();
        let err = store(&dir).store_original("back.png", b"png").await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Validation);
    }

    #[tokio::test]
    async fn test_list_and_find_files() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir);
        for name in ["b.html", "a.HTML", "c.html", "photo_cobb_angle.txt", "notes.txt"] {
            tokio::fs::write(dir.path().join(name), "x").await.unwrap();
        }
        tokio::fs::create_dir(dir.path().join("nested.html")).await.unwrap();

        let html = store.list_files(dir.path(), "html").await.unwrap();
        let names: Vec<_> = html
            .iter()
            .map(|p| p.file_name().unwrap().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names, vec!["a.HTML", "b.html", "c.html"]);

        let angle = store.find_by_suffix(dir.path(), "_cobb_angle.txt").await.unwrap();
        assert_eq!(angle.len(), 1);
        assert_eq!(store.read_text(&angle[0]).await.unwrap(), "x");
    }

    #[tokio::test]
    async fn test_remove_file_tolerates_missing() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir);
        let path = dir.path().join("AnnotatedImage.jpg");
        tokio::fs::write(&path, "old").await.unwrap();

        store.remove_file(&path).await.unwrap();
        assert!(!store.exists(&path).await.unwrap());
        store.remove_file(&path).await.unwrap();

        let err = store.remove_file(dir.path()).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::StorageUnavailable);
    }

    #[tokio::test]
    async fn test_missing_directory_is_storage_unavailable() {
        let dir = TempDir::new().unwrap();
        let err = store(&dir)
            .list_files(&dir.path().join("absent"), "html")
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::StorageUnavailable);
    }
}
