//! Where raw payloads are staged between fetching and extraction.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::NaiveDate;
use rentwatch_core::file_stamp;

use crate::error::CrawlError;

/// `<YYMMDD>_<n>`: the key for page `n` or listing `n` fetched on `date`.
#[must_use]
pub fn dated_key(date: NaiveDate, n: usize) -> String {
    format!("{}_{n}", file_stamp(date))
}

/// Flat key/value storage for fetched payloads.
///
/// Keys are single path segments; no key contains `/`.
#[async_trait]
pub trait PayloadSink: Send + Sync {
    /// Writes `bytes` under `key`, replacing any previous payload.
    ///
    /// # Errors
    ///
    /// Returns [`CrawlError`] if the key is invalid or the write fails.
    async fn write(&self, key: &str, bytes: &[u8]) -> Result<(), CrawlError>;

    /// # Errors
    ///
    /// Returns [`CrawlError`] if the key is invalid or the payload cannot be read.
    async fn read(&self, key: &str) -> Result<Vec<u8>, CrawlError>;

    /// Every stored key starting with `prefix`, sorted. Hidden entries (a
    /// leading `.`) are never listed.
    ///
    /// # Errors
    ///
    /// Returns [`CrawlError`] if the listing itself fails.
    async fn keys_with_prefix(&self, prefix: &str) -> Result<Vec<String>, CrawlError>;
}

/// A [`PayloadSink`] backed by one local directory.
#[derive(Debug, Clone)]
pub struct DirSink {
    root: PathBuf,
}

impl DirSink {
    #[must_use]
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn path_for(&self, key: &str) -> Result<PathBuf, CrawlError> {
        validate_key(key)?;
        Ok(self.root.join(key))
    }
}

fn validate_key(key: &str) -> Result<(), CrawlError> {
    let reason = if key.is_empty() {
        "empty"
    } else if key.contains(['/', '\\']) {
        "contains a path separator"
    } else if key.starts_with('.') {
        "starts with '.'"
    } else {
        return Ok(());
    };
    Err(CrawlError::InvalidKey {
        key: key.to_owned(),
        reason: reason.to_owned(),
    })
}

#[async_trait]
impl PayloadSink for DirSink {
    async fn write(&self, key: &str, bytes: &[u8]) -> Result<(), CrawlError> {
        let path = self.path_for(key)?;
        tokio::fs::create_dir_all(&self.root)
            .await
            .map_err(|e| CrawlError::io(self.root.display(), e))?;
        tokio::fs::write(&path, bytes)
            .await
            .map_err(|e| CrawlError::io(path.display(), e))
    }

    async fn read(&self, key: &str) -> Result<Vec<u8>, CrawlError> {
        let path = self.path_for(key)?;
        tokio::fs::read(&path)
            .await
            .map_err(|e| CrawlError::io(path.display(), e))
    }

    async fn keys_with_prefix(&self, prefix: &str) -> Result<Vec<String>, CrawlError> {
        let mut entries = match tokio::fs::read_dir(&self.root).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(CrawlError::io(self.root.display(), e)),
        };

        let mut keys = Vec::new();
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| CrawlError::io(self.root.display(), e))?
        {
            let Ok(name) = entry.file_name().into_string() else {
                continue;
            };
            if name.starts_with('.') || !name.starts_with(prefix) {
                continue;
            }
            match entry.file_type().await {
                Ok(kind) if kind.is_file() => keys.push(name),
                Ok(_) => {}
                Err(e) => tracing::debug!(entry = %name, error = %e, "skipping unreadable entry"),
            }
        }
        keys.sort();
        Ok(keys)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dated_key_uses_file_stamp() {
        let date = NaiveDate::from_ymd_opt(2024, 3, 9).unwrap();
        assert_eq!(dated_key(date, 12), "240309_12");
    }

    #[tokio::test]
    async fn write_then_read_creates_root() {
        let dir = tempfile::tempdir().unwrap();
        let sink = DirSink::new(dir.path().join("pages"));

        sink.write("240101_1", b"<html/>").await.unwrap();

        assert_eq!(sink.read("240101_1").await.unwrap(), b"<html/>");
    }

    #[tokio::test]
    async fn keys_with_prefix_filters_and_sorts() {
        let dir = tempfile::tempdir().unwrap();
        let sink = DirSink::new(dir.path());
        for key in ["240102_2", "240101_1", "240102_1", "notes"] {
            sink.write(key, b"x").await.unwrap();
        }
        std::fs::write(dir.path().join(".240102_hidden"), b"x").unwrap();
        std::fs::create_dir(dir.path().join("240102_dir")).unwrap();

        let keys = sink.keys_with_prefix("240102").await.unwrap();

        assert_eq!(keys, vec!["240102_1", "240102_2"]);
    }

    #[tokio::test]
    async fn keys_of_missing_root_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let sink = DirSink::new(dir.path().join("absent"));
        assert!(sink.keys_with_prefix("").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn path_like_keys_are_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let sink = DirSink::new(dir.path());
        for key in ["", "../escape", "a/b", ".hidden"] {
            assert!(
                matches!(sink.write(key, b"x").await, Err(CrawlError::InvalidKey { .. })),
                "key {key:?} should be rejected"
            );
        }
    }

    #[tokio::test]
    async fn read_of_missing_key_is_io_error() {
        let dir = tempfile::tempdir().unwrap();
        let sink = DirSink::new(dir.path());
        assert!(matches!(sink.read("nope").await, Err(CrawlError::Io { .. })));
    }
}
