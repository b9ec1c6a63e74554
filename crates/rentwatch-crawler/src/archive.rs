//! Moving downloaded images into durable object storage.

use std::io::ErrorKind;
use std::path::{Component, Path, PathBuf};

use async_trait::async_trait;
use rentwatch_core::{DownloadStatus, ImageRecord};
use tokio::io::AsyncWriteExt;

use crate::error::CrawlError;
use crate::sink::PayloadSink;

/// Write-once object storage.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Stores `bytes` under `key` unless the key already exists.
    ///
    /// Returns `true` if the object was written and `false` if it was
    /// already present. Existing objects are never overwritten.
    ///
    /// # Errors
    ///
    /// Returns [`CrawlError`] if the key is invalid or the write fails.
    async fn put_if_absent(&self, key: &str, bytes: &[u8]) -> Result<bool, CrawlError>;
}

/// An [`ObjectStore`] rooted at a local directory; `/` in keys becomes a
/// directory level.
#[derive(Debug, Clone)]
pub struct DirObjectStore {
    root: PathBuf,
}

impl DirObjectStore {
    #[must_use]
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn path_for(&self, key: &str) -> Result<PathBuf, CrawlError> {
        let relative = Path::new(key);
        let plain = !key.is_empty()
            && relative
                .components()
                .all(|c| matches!(c, Component::Normal(_)));
        if !plain {
            return Err(CrawlError::InvalidKey {
                key: key.to_owned(),
                reason: "object keys must be relative paths without '.' or '..'".to_owned(),
            });
        }
        Ok(self.root.join(relative))
    }
}

/// Sibling scratch file an object is staged in before it is published:
/// `.<file name>.partial`, hidden from sink listings.
fn partial_path(path: &Path) -> PathBuf {
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    path.with_file_name(format!(".{name}.partial"))
}

async fn write_partial(partial: &Path, bytes: &[u8]) -> Result<(), CrawlError> {
    let mut file = tokio::fs::File::create(partial)
        .await
        .map_err(|e| CrawlError::io(partial.display(), e))?;
    file.write_all(bytes)
        .await
        .map_err(|e| CrawlError::io(partial.display(), e))?;
    file.sync_all()
        .await
        .map_err(|e| CrawlError::io(partial.display(), e))
}

#[async_trait]
impl ObjectStore for DirObjectStore {
    /// The bytes are written in full to a scratch file and then hard-linked
    /// into place, so an object key only ever names a complete object. A
    /// scratch file left by an interrupted upload is replaced on retry.
    async fn put_if_absent(&self, key: &str, bytes: &[u8]) -> Result<bool, CrawlError> {
        let path = self.path_for(key)?;
        if tokio::fs::symlink_metadata(&path).await.is_ok() {
            return Ok(false);
        }
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| CrawlError::io(parent.display(), e))?;
        }

        let partial = partial_path(&path);
        let published = match write_partial(&partial, bytes).await {
            Ok(()) => match tokio::fs::hard_link(&partial, &path).await {
                Ok(()) => Ok(true),
                Err(e) if e.kind() == ErrorKind::AlreadyExists => Ok(false),
                Err(e) => Err(CrawlError::io(path.display(), e)),
            },
            Err(e) => Err(e),
        };

        match tokio::fs::remove_file(&partial).await {
            Ok(()) => {}
            Err(e) if e.kind() == ErrorKind::NotFound => {}
            Err(e) => tracing::debug!(path = %partial.display(), error = %e, "could not remove scratch file"),
        }
        published
    }
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ArchiveSummary {
    pub uploaded: usize,
    pub already_present: usize,
    pub failed: usize,
}

impl ArchiveSummary {
    #[must_use]
    pub fn archived(&self) -> usize {
        self.uploaded + self.already_present
    }
}

/// Uploads every downloaded image from `images` to `store` under its
/// `object_name` and marks it archived.
///
/// Records in any other state are ignored. A record whose bytes cannot be read
/// or uploaded keeps its status and is retried on a later run.
pub async fn archive_images(
    records: &mut [ImageRecord],
    images: &dyn PayloadSink,
    store: &dyn ObjectStore,
) -> ArchiveSummary {
    let mut summary = ArchiveSummary::default();

    for record in records
        .iter_mut()
        .filter(|r| r.downloaded == DownloadStatus::Downloaded)
    {
        let bytes = match images.read(&record.sink_key()).await {
            Ok(bytes) => bytes,
            Err(e) => {
                tracing::warn!(image_id = record.id, error = %e, "downloaded image missing from staging");
                summary.failed += 1;
                continue;
            }
        };

        match store.put_if_absent(&record.object_name, &bytes).await {
            Ok(written) => {
                if written {
                    summary.uploaded += 1;
                } else {
                    tracing::debug!(object = %record.object_name, "already archived; skipping upload");
                    summary.already_present += 1;
                }
                record.transition(DownloadStatus::Archived);
            }
            Err(e) => {
                tracing::warn!(object = %record.object_name, error = %e, "archive upload failed");
                summary.failed += 1;
            }
        }
    }

    tracing::info!(
        uploaded = summary.uploaded,
        already_present = summary.already_present,
        failed = summary.failed,
        "image archival complete"
    );
    summary
}
