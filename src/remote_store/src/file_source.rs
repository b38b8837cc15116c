use crate::{ReferenceStatus, RemoteSource, SourceReader, StoreError, StoreResult};
use async_trait::async_trait;
use std::io::SeekFrom;
use std::path::{Component, Path, PathBuf};
use tokio::fs::File;
use tokio::io::{AsyncReadExt, AsyncSeekExt};

/// Source over a rooted directory. Keys are absolute host paths; anything
/// that resolves outside the root is rejected before the file is opened.
pub struct FileSource {
    root: PathBuf,
}

impl FileSource {
    pub fn new<P: AsRef<Path>>(root: P) -> Self {
        Self {
            root: normalize_lexical(root.as_ref()),
        }
    }

    fn is_sub_path(&self, path: &Path) -> bool {
        normalize_lexical(path).starts_with(&self.root)
    }

    async fn open_at(&self, key: &str, offset: u64) -> StoreResult<File> {
        let path = PathBuf::from(key);
        if !self.is_sub_path(&path) {
            return Err(StoreError::CorruptReference(
                ReferenceStatus::OtherError,
                format!("file not in root path: {}", key),
            ));
        }

        let mut file = match File::open(&path).await {
            Ok(f) => f,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(StoreError::CorruptReference(
                    ReferenceStatus::FileNotFound,
                    format!("open {}: {}", key, e),
                ));
            }
            Err(e) => {
                return Err(StoreError::CorruptReference(
                    ReferenceStatus::FileError,
                    format!("open {}: {}", key, e),
                ));
            }
        };

        if offset > 0 {
            file.seek(SeekFrom::Start(offset)).await.map_err(|e| {
                StoreError::CorruptReference(
                    ReferenceStatus::FileError,
                    format!("seek {} to {}: {}", key, offset, e),
                )
            })?;
        }

        Ok(file)
    }
}

#[async_trait]
impl RemoteSource for FileSource {
    async fn get(&self, key: &str) -> StoreResult<(SourceReader, u64)> {
        let file = self.open_at(key, 0).await?;
        let size = file.metadata().await.map_err(|e| {
            StoreError::CorruptReference(
                ReferenceStatus::FileError,
                format!("stat {}: {}", key, e),
            )
        })?;
        Ok((Box::pin(file), size.len()))
    }

    async fn get_part(&self, key: &str, offset: u64, size: u64) -> StoreResult<SourceReader> {
        let file = self.open_at(key, offset).await?;
        Ok(Box::pin(file.take(size)))
    }
}

/// Lexical normalization: folds `.` away and resolves `..` against the
/// components gathered so far, without touching the filesystem.
fn normalize_lexical(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                if !out.pop() {
                    out.push("..");
                }
            }
            other => out.push(other.as_os_str()),
        }
    }
    out
}
