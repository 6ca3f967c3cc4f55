//! Object storage for input documents and output packages.
//!
//! The pipeline only sees the [`FileStore`] trait: a flat namespace of
//! `/`-separated keys that can be listed, fetched and written. The shipped
//! implementation, [`LocalFileStore`], maps keys onto a directory tree.
//!
//! **Key rules:**
//! - keys are relative and `/`-separated (`in/2024/scan.pdf`)
//! - `..`, `.`, empty segments and absolute keys are rejected
//! - backslashes are rejected on Windows, where they separate paths
//! - keys ending in `/` are directory markers and never listed
//! - every key returned by [`FileStore::list`] can be fetched

use std::future::Future;
use std::path::{Path, PathBuf};

use serde::Serialize;
use tracing::{debug, info, instrument, warn};

use hrdocs_shared::{HrDocsError, Result};

/// One object returned by [`FileStore::list`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ObjectEntry {
    pub key: String,
    pub size_bytes: u64,
}

/// A store of named byte objects.
pub trait FileStore: Send + Sync {
    /// All objects, sorted by key. Directory markers are skipped, and every
    /// returned key is accepted by [`FileStore::fetch`].
    fn list(&self) -> impl Future<Output = Result<Vec<ObjectEntry>>> + Send;

    fn fetch(&self, key: &str) -> impl Future<Output = Result<Vec<u8>>> + Send;

    /// Create or replace the object at `key`.
    fn put(&self, key: &str, bytes: &[u8]) -> impl Future<Output = Result<()>> + Send;

    /// Delete the object at `key`. Removing a missing object succeeds.
    fn remove(&self, key: &str) -> impl Future<Output = Result<()>> + Send;

    /// Human-readable location, for logs and reports.
    fn describe(&self) -> String;
}

// ---------------------------------------------------------------------------
// LocalFileStore
// ---------------------------------------------------------------------------

/// [`FileStore`] backed by a directory on local disk.
#[derive(Debug, Clone)]
pub struct LocalFileStore {
    root: PathBuf,
}

impl LocalFileStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Filesystem path for `key`, after validating it.
    pub fn path_for(&self, key: &str) -> Result<PathBuf> {
        validate_key(key)?;
        Ok(key
            .split('/')
            .fold(self.root.clone(), |path, segment| path.join(segment)))
    }
}

impl FileStore for LocalFileStore {
    #[instrument(skip_all, fields(root = %self.root.display()))]
    async fn list(&self) -> Result<Vec<ObjectEntry>> {
        if !self.root.is_dir() {
            return Err(HrDocsError::Storage(format!(
                "store root {} is not a directory",
                self.root.display()
            )));
        }

        let mut entries = Vec::new();
        let mut pending = vec![(self.root.clone(), String::new())];

        while let Some((dir, prefix)) = pending.pop() {
            let mut reader = tokio::fs::read_dir(&dir)
                .await
                .map_err(|e| HrDocsError::io(&dir, e))?;

            while let Some(entry) = reader
                .next_entry()
                .await
                .map_err(|e| HrDocsError::io(&dir, e))?
            {
                let name = match entry.file_name().into_string() {
                    Ok(name) => name,
                    Err(raw) => {
                        warn!(path = %entry.path().display(), name = ?raw, "skipping object with non-UTF-8 name");
                        continue;
                    }
                };
                if is_temp_file(&name) {
                    continue;
                }
                let key = format!("{prefix}{name}");
                if let Err(e) = validate_key(&key) {
                    warn!(key = %key, error = %e, "skipping object with unusable name");
                    continue;
                }
                let file_type = entry
                    .file_type()
                    .await
                    .map_err(|e| HrDocsError::io(entry.path(), e))?;

                if file_type.is_dir() {
                    pending.push((entry.path(), format!("{key}/")));
                } else if file_type.is_file() {
                    let metadata = entry
                        .metadata()
                        .await
                        .map_err(|e| HrDocsError::io(entry.path(), e))?;
                    entries.push(ObjectEntry {
                        key,
                        size_bytes: metadata.len(),
                    });
                }
            }
        }

        entries.sort_by(|a, b| a.key.cmp(&b.key));
        info!(objects = entries.len(), "listed store");
        Ok(entries)
    }

    async fn fetch(&self, key: &str) -> Result<Vec<u8>> {
        let path = self.path_for(key)?;
        match tokio::fs::read(&path).await {
            Ok(bytes) => {
                debug!(key, size = bytes.len(), "fetched object");
                Ok(bytes)
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(HrDocsError::Storage(format!("object not found: {key}")))
            }
            Err(e) => Err(HrDocsError::io(path, e)),
        }
    }

    /// Writes to `.<name>.tmp` in the target directory, then renames.
    async fn put(&self, key: &str, bytes: &[u8]) -> Result<()> {
        let path = self.path_for(key)?;
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| HrDocsError::io(parent, e))?;
        }

        let file_name = hrdocs_shared::archived_name(key);
        let temp = path.with_file_name(format!(".{file_name}.tmp"));
        if let Err(e) = tokio::fs::write(&temp, bytes).await {
            let _ = tokio::fs::remove_file(&temp).await;
            return Err(HrDocsError::io(&temp, e));
        }
        if let Err(e) = tokio::fs::rename(&temp, &path).await {
            let _ = tokio::fs::remove_file(&temp).await;
            return Err(HrDocsError::io(&path, e));
        }

        debug!(key, size = bytes.len(), "stored object");
        Ok(())
    }

    async fn remove(&self, key: &str) -> Result<()> {
        let path = self.path_for(key)?;
        match tokio::fs::remove_file(&path).await {
            Ok(()) => {
                debug!(key, "removed object");
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(HrDocsError::io(path, e)),
        }
    }

    fn describe(&self) -> String {
        self.root.display().to_string()
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// Reject keys that would escape the store root or are not plain relative
/// paths.
pub fn validate_key(key: &str) -> Result<()> {
    let invalid = |why: &str| HrDocsError::Storage(format!("invalid object key {key:?}: {why}"));

    if key.is_empty() {
        return Err(invalid("empty"));
    }
    if key.starts_with('/') || Path::new(key).is_absolute() {
        return Err(invalid("absolute"));
    }
    if cfg!(windows) && key.contains('\\') {
        return Err(invalid("backslash"));
    }
    if key.ends_with('/') {
        return Err(invalid("directory marker"));
    }
    for segment in key.split('/') {
        match segment {
            "" => return Err(invalid("empty segment")),
            "." | ".." => return Err(invalid("relative segment")),
            _ => {}
        }
    }
    Ok(())
}

/// Leftovers of an interrupted atomic write.
fn is_temp_file(name: &str) -> bool {
    name.starts_with('.') && name.ends_with(".tmp")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_dir() -> PathBuf {
        let dir = std::env::temp_dir().join(format!("hrdocs-storage-test-{}", uuid::Uuid::now_v7()));
        std::fs::create_dir_all(&dir).unwrap();
        dir
    }

    #[test]
    fn key_validation() {
        assert!(validate_key("doc1.txt").is_ok());
        assert!(validate_key("run-1/BlobFiles/scan.pdf").is_ok());
        assert!(validate_key(".hidden").is_ok());

        for bad in ["", "/etc/passwd", "../x", "a/../b", "a//b", "a/./b", "dir/"] {
            assert!(validate_key(bad).is_err(), "{bad:?} should be rejected");
        }
        assert_eq!(validate_key("a\\b").is_err(), cfg!(windows));
    }

    #[tokio::test]
    async fn put_fetch_and_list_sorted() {
        let tmp = temp_dir();
        let store = LocalFileStore::new(&tmp);

        store.put("b/scan.pdf", b"%PDF").await.unwrap();
        store.put("a.txt", b"hello").await.unwrap();
        store.put("b/a.txt", b"x").await.unwrap();
        std::fs::create_dir_all(tmp.join("empty")).unwrap();

        assert_eq!(store.fetch("b/scan.pdf").await.unwrap(), b"%PDF");

        let listed = store.list().await.unwrap();
        let keys: Vec<&str> = listed.iter().map(|e| e.key.as_str()).collect();
        assert_eq!(keys, vec!["a.txt", "b/a.txt", "b/scan.pdf"]);
        assert_eq!(listed[0].size_bytes, 5);

        let _ = std::fs::remove_dir_all(&tmp);
    }

    #[tokio::test]
    async fn put_replaces_and_leaves_no_temp_file() {
        let tmp = temp_dir();
        let store = LocalFileStore::new(&tmp);

        store.put("run/out.dat", b"one").await.unwrap();
        store.put("run/out.dat", b"two").await.unwrap();

        assert_eq!(std::fs::read(tmp.join("run/out.dat")).unwrap(), b"two");
        assert!(!tmp.join("run/.out.dat.tmp").exists());

        let _ = std::fs::remove_dir_all(&tmp);
    }

    #[tokio::test]
    async fn remove_deletes_and_tolerates_missing() {
        let tmp = temp_dir();
        let store = LocalFileStore::new(&tmp);

        store.put("run/a.dat", b"a").await.unwrap();
        store.remove("run/a.dat").await.unwrap();
        assert!(!tmp.join("run/a.dat").exists());

        store.remove("run/a.dat").await.unwrap();
        assert!(store.remove("../outside").await.is_err());

        let _ = std::fs::remove_dir_all(&tmp);
    }

    #[tokio::test]
    async fn list_skips_leftover_temp_files() {
        let tmp = temp_dir();
        std::fs::write(tmp.join(".scan.pdf.tmp"), b"partial").unwrap();
        std::fs::write(tmp.join("scan.pdf"), b"ok").unwrap();

        let keys: Vec<String> = LocalFileStore::new(&tmp)
            .list()
            .await
            .unwrap()
            .into_iter()
            .map(|e| e.key)
            .collect();
        assert_eq!(keys, vec!["scan.pdf"]);

        let _ = std::fs::remove_dir_all(&tmp);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn listed_backslash_names_can_be_fetched() {
        let tmp = temp_dir();
        std::fs::write(tmp.join("doc1.txt"), b"one").unwrap();
        std::fs::write(tmp.join("scan\\2024.pdf"), b"%PDF").unwrap();
        let store = LocalFileStore::new(&tmp);

        let listed = store.list().await.unwrap();
        let keys: Vec<&str> = listed.iter().map(|e| e.key.as_str()).collect();
        assert_eq!(keys, vec!["doc1.txt", "scan\\2024.pdf"]);

        for entry in &listed {
            assert!(store.fetch(&entry.key).await.is_ok(), "{} not fetchable", entry.key);
        }
        assert_eq!(store.fetch("scan\\2024.pdf").await.unwrap(), b"%PDF");

        let _ = std::fs::remove_dir_all(&tmp);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn list_skips_non_utf8_names() {
        use std::os::unix::ffi::OsStrExt;

        let tmp = temp_dir();
        std::fs::write(tmp.join("ok.pdf"), b"ok").unwrap();
        let raw = std::ffi::OsStr::from_bytes(b"bad\xff.pdf");
        if std::fs::write(tmp.join(raw), b"x").is_err() {
            // Some filesystems refuse non-UTF-8 names outright.
            let _ = std::fs::remove_dir_all(&tmp);
            return;
        }
        let store = LocalFileStore::new(&tmp);

        let listed = store.list().await.unwrap();
        let keys: Vec<&str> = listed.iter().map(|e| e.key.as_str()).collect();
        assert_eq!(keys, vec!["ok.pdf"]);
        for entry in &listed {
            assert!(store.fetch(&entry.key).await.is_ok());
        }

        let _ = std::fs::remove_dir_all(&tmp);
    }

    #[tokio::test]
    async fn fetch_missing_and_escaping_keys_fail() {
        let tmp = temp_dir();
        let store = LocalFileStore::new(&tmp);

        let err = store.fetch("nope.pdf").await.unwrap_err();
        assert!(err.to_string().contains("object not found"));

        let err = store.put("../escape.txt", b"x").await.unwrap_err();
        assert!(matches!(err, HrDocsError::Storage(_)));
        assert!(!tmp.parent().unwrap().join("escape.txt").exists());

        let _ = std::fs::remove_dir_all(&tmp);
    }

    #[tokio::test]
    async fn list_missing_root_is_an_error() {
        let store = LocalFileStore::new(std::env::temp_dir().join("hrdocs-missing-root-xyz"));
        assert!(store.list().await.is_err());
        assert!(store.describe().contains("hrdocs-missing-root-xyz"));
    }
}
