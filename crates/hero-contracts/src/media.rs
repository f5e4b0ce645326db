use std::path::{Component, Path, PathBuf};

use thiserror::Error;

/// Media-relative directory holding product images.
pub const PRODUCT_IMAGE_PATH: &str = "catalog/product";
/// Media-relative directory holding category images, with trailing slash.
pub const CATEGORY_IMAGE_PATH: &str = "catalog/category/";

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("{op} failed for {path}: {source}")]
    Io {
        op: &'static str,
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("path escapes the media root: {0}")]
    OutsideRoot(String),
}

/// Durable file storage addressed by paths relative to a root.
pub trait FileStore: Send + Sync {
    fn write_file(&self, relative: &str, bytes: &[u8]) -> Result<(), StoreError>;

    fn file_exists(&self, relative: &str) -> bool;

    fn absolute_path(&self, relative: &str) -> PathBuf;

    fn file_size(&self, relative: &str) -> Result<u64, StoreError>;

    fn remove_file(&self, relative: &str) -> Result<(), StoreError>;
}

/// [`FileStore`] rooted at a media directory on the local filesystem.
#[derive(Debug, Clone)]
pub struct MediaDirectory {
    root: PathBuf,
}

impl MediaDirectory {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn checked_path(&self, relative: &str) -> Result<PathBuf, StoreError> {
        let trimmed = relative.trim_start_matches('/');
        let escapes = Path::new(trimmed)
            .components()
            .any(|component| !matches!(component, Component::Normal(_) | Component::CurDir));
        if escapes {
            return Err(StoreError::OutsideRoot(relative.to_string()));
        }
        Ok(self.root.join(trimmed))
    }
}

impl FileStore for MediaDirectory {
    fn write_file(&self, relative: &str, bytes: &[u8]) -> Result<(), StoreError> {
        let path = self.checked_path(relative)?;
        let io_err = |op, source| StoreError::Io {
            op,
            path: path.display().to_string(),
            source,
        };
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|source| io_err("create_dir_all", source))?;
        }
        let mut tmp_name = path.as_os_str().to_owned();
        tmp_name.push(".part");
        let tmp_path = PathBuf::from(tmp_name);
        std::fs::write(&tmp_path, bytes).map_err(|source| io_err("write", source))?;
        if let Err(source) = std::fs::rename(&tmp_path, &path) {
            let _ = std::fs::remove_file(&tmp_path);
            return Err(io_err("rename", source));
        }
        Ok(())
    }

    fn file_exists(&self, relative: &str) -> bool {
        self.checked_path(relative)
            .map(|path| path.is_file())
            .unwrap_or(false)
    }

    fn absolute_path(&self, relative: &str) -> PathBuf {
        let path = self.root.join(relative.trim_start_matches('/'));
        std::path::absolute(&path).unwrap_or(path)
    }

    fn file_size(&self, relative: &str) -> Result<u64, StoreError> {
        let path = self.checked_path(relative)?;
        std::fs::metadata(&path)
            .map(|meta| meta.len())
            .map_err(|source| StoreError::Io {
                op: "metadata",
                path: path.display().to_string(),
                source,
            })
    }

    fn remove_file(&self, relative: &str) -> Result<(), StoreError> {
        let path = self.checked_path(relative)?;
        std::fs::remove_file(&path).map_err(|source| StoreError::Io {
            op: "remove_file",
            path: path.display().to_string(),
            source,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::{FileStore, MediaDirectory, StoreError, CATEGORY_IMAGE_PATH};

    #[test]
    fn write_creates_parents_and_reports_size() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let media = MediaDirectory::new(temp.path());
        let relative = format!("{CATEGORY_IMAGE_PATH}hero.png");

        assert!(!media.file_exists(&relative));
        media.write_file(&relative, b"12345")?;
        assert!(media.file_exists(&relative));
        assert_eq!(media.file_size(&relative)?, 5);
        assert!(media.absolute_path(&relative).is_absolute());
        assert!(!temp
            .path()
            .join("catalog/category/hero.png.part")
            .exists());

        media.remove_file(&relative)?;
        assert!(!media.file_exists(&relative));
        Ok(())
    }

    #[test]
    fn leading_slash_is_relative_to_root() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let media = MediaDirectory::new(temp.path());
        media.write_file("/catalog/product/a/b/x.jpg", b"x")?;
        assert!(temp.path().join("catalog/product/a/b/x.jpg").is_file());
        Ok(())
    }

    #[test]
    fn parent_traversal_is_rejected() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let media = MediaDirectory::new(temp.path().join("media"));
        let err = media.write_file("../escape.png", b"x").err();
        assert!(matches!(err, Some(StoreError::OutsideRoot(_))));
        assert!(!media.file_exists("../escape.png"));
        Ok(())
    }
}
