//! Package staging: bulk file + original documents + manifests.
//!
//! Layout of a staged package:
//! ```text
//! <root>/
//! ├── DocumentsOfRecord.dat
//! ├── BlobFiles/
//! │   ├── doc1.pdf
//! │   └── ...
//! ├── metadata.json
//! └── manifest.json
//! ```

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use sha2::{Digest, Sha256};
use tracing::{debug, info, instrument};

pub use hrdocs_shared::{BLOB_DIR, MANIFEST_FILE, METADATA_FILE};
use hrdocs_shared::{DocumentMetadata, HrDocsError, Result, RunId, archived_name};

use crate::bulk::BulkFileMeta;

/// Metadata for a single file in the package.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct ArtifactMeta {
    /// Path relative to the package root, `/`-separated.
    pub filename: String,
    pub sha256: String,
    pub size_bytes: usize,
}

/// The `manifest.json` written at the package root.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct PackageManifest {
    pub run_id: RunId,
    pub created_at: DateTime<Utc>,
    pub documents: usize,
    pub bulk_file: ArtifactMeta,
    pub blob_files: Vec<ArtifactMeta>,
}

impl PackageManifest {
    /// Relative paths of every file to upload, manifest last.
    pub fn upload_order(&self) -> Vec<String> {
        let mut keys = Vec::with_capacity(self.blob_files.len() + 3);
        keys.push(self.bulk_file.filename.clone());
        keys.extend(self.blob_files.iter().map(|b| b.filename.clone()));
        keys.push(METADATA_FILE.to_string());
        keys.push(MANIFEST_FILE.to_string());
        keys
    }
}

/// A package being staged on local disk.
#[derive(Debug)]
pub struct Package {
    root: PathBuf,
    blob_files: Vec<ArtifactMeta>,
    names: HashSet<String>,
}

impl Package {
    /// Create an empty staging directory at `root`, replacing any previous
    /// contents so the package reflects exactly one run.
    pub fn create(root: &Path) -> Result<Self> {
        if root.exists() {
            std::fs::remove_dir_all(root).map_err(|e| HrDocsError::io(root, e))?;
            debug!(path = %root.display(), "cleared stale package directory");
        }
        let blob_dir = root.join(BLOB_DIR);
        std::fs::create_dir_all(&blob_dir).map_err(|e| HrDocsError::io(&blob_dir, e))?;

        Ok(Self {
            root: root.to_path_buf(),
            blob_files: Vec::new(),
            names: HashSet::new(),
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Absolute path of a file in the package.
    pub fn path_of(&self, relative: &str) -> PathBuf {
        relative
            .split('/')
            .fold(self.root.clone(), |path, segment| path.join(segment))
    }

    /// Number of originals staged so far.
    pub fn staged_count(&self) -> usize {
        self.blob_files.len()
    }

    /// Copy one original document into `BlobFiles/<basename>`.
    ///
    /// Two source keys with the same basename would collide inside the
    /// archive and are rejected.
    pub fn stage_original(&mut self, source_key: &str, bytes: &[u8]) -> Result<ArtifactMeta> {
        let name = archived_name(source_key);
        if name.is_empty() || name == "." || name == ".." {
            return Err(HrDocsError::validation(format!(
                "cannot archive {source_key:?}: no file name"
            )));
        }
        if !self.names.insert(name.to_string()) {
            return Err(HrDocsError::validation(format!(
                "duplicate archived file name {name:?} (from {source_key:?})"
            )));
        }

        let relative = format!("{BLOB_DIR}/{name}");
        let path = self.path_of(&relative);
        std::fs::write(&path, bytes).map_err(|e| HrDocsError::io(&path, e))?;

        debug!(file = %relative, size = bytes.len(), "staged original");

        let meta = ArtifactMeta {
            filename: relative,
            sha256: sha256_hex(bytes),
            size_bytes: bytes.len(),
        };
        self.blob_files.push(meta.clone());
        Ok(meta)
    }

    /// Write `metadata.json` and `manifest.json` and seal the package.
    #[instrument(skip_all, fields(root = %self.root.display(), run_id = %run_id))]
    pub fn finish(
        self,
        run_id: &RunId,
        bulk_file: &BulkFileMeta,
        metadata: &[DocumentMetadata],
    ) -> Result<PackageManifest> {
        let relative = bulk_file
            .path
            .strip_prefix(&self.root)
            .map_err(|_| {
                HrDocsError::validation(format!(
                    "bulk file {} is outside the package root",
                    bulk_file.path.display()
                ))
            })?
            .to_string_lossy()
            .replace('\\', "/");

        write_json(&self.root.join(METADATA_FILE), metadata)?;

        let manifest = PackageManifest {
            run_id: run_id.clone(),
            created_at: Utc::now(),
            documents: metadata.len(),
            bulk_file: ArtifactMeta {
                filename: relative,
                sha256: bulk_file.sha256.clone(),
                size_bytes: bulk_file.size_bytes,
            },
            blob_files: self.blob_files,
        };
        write_json(&self.root.join(MANIFEST_FILE), &manifest)?;

        info!(
            documents = manifest.documents,
            blob_files = manifest.blob_files.len(),
            "package staged"
        );
        Ok(manifest)
    }
}

/// Load a `metadata.json` snapshot.
pub fn read_metadata_snapshot(path: &Path) -> Result<Vec<DocumentMetadata>> {
    let content = std::fs::read_to_string(path).map_err(|e| HrDocsError::io(path, e))?;
    serde_json::from_str(&content).map_err(|e| {
        HrDocsError::validation(format!("invalid metadata snapshot {}: {e}", path.display()))
    })
}

fn sha256_hex(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    format!("{:x}", hasher.finalize())
}

/// Write a pretty-printed JSON file via temp + rename.
fn write_json<T: serde::Serialize + ?Sized>(path: &Path, data: &T) -> Result<()> {
    let json = serde_json::to_string_pretty(data)
        .map_err(|e| HrDocsError::validation(format!("JSON serialization failed: {e}")))?;

    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let temp = path.with_file_name(format!(".{file_name}.tmp"));
    std::fs::write(&temp, json).map_err(|e| HrDocsError::io(&temp, e))?;
    std::fs::rename(&temp, path).map_err(|e| HrDocsError::io(path, e))?;

    debug!(path = %path.display(), "wrote JSON file");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bulk::write_bulk_file;

    fn temp_dir() -> PathBuf {
        let dir = std::env::temp_dir().join(format!("hrdocs-package-test-{}", uuid::Uuid::now_v7()));
        std::fs::create_dir_all(&dir).unwrap();
        dir
    }

    #[test]
    fn stage_and_finish_writes_layout() {
        let tmp = temp_dir();
        let root = tmp.join("run-1");
        let mut package = Package::create(&root).unwrap();

        package.stage_original("in/doc1.pdf", b"%PDF-1.4").unwrap();
        package.stage_original("doc2.txt", b"hello").unwrap();
        assert_eq!(package.staged_count(), 2);

        let bulk = write_bulk_file::<&str>(&[], &[], &root.join("DocumentsOfRecord.dat")).unwrap();
        let metadata = vec![
            DocumentMetadata::unclassified("in/doc1.pdf"),
            DocumentMetadata::unclassified("doc2.txt"),
        ];
        let run_id: RunId = "run-1".parse().unwrap();
        let manifest = package.finish(&run_id, &bulk, &metadata).unwrap();

        assert_eq!(manifest.documents, 2);
        assert_eq!(manifest.bulk_file.filename, "DocumentsOfRecord.dat");
        assert_eq!(manifest.blob_files[0].filename, "BlobFiles/doc1.pdf");
        assert_eq!(manifest.blob_files[0].size_bytes, 8);
        assert_eq!(manifest.blob_files[0].sha256.len(), 64);

        assert!(root.join("BlobFiles/doc1.pdf").exists());
        assert!(root.join("BlobFiles/doc2.txt").exists());
        assert!(root.join(MANIFEST_FILE).exists());

        let snapshot = read_metadata_snapshot(&root.join(METADATA_FILE)).unwrap();
        assert_eq!(snapshot, metadata);

        assert_eq!(
            manifest.upload_order(),
            vec![
                "DocumentsOfRecord.dat",
                "BlobFiles/doc1.pdf",
                "BlobFiles/doc2.txt",
                "metadata.json",
                "manifest.json",
            ]
        );

        let _ = std::fs::remove_dir_all(&tmp);
    }

    #[test]
    fn duplicate_basenames_are_rejected() {
        let tmp = temp_dir();
        let mut package = Package::create(&tmp.join("pkg")).unwrap();
        package.stage_original("a/scan.pdf", b"1").unwrap();
        let err = package.stage_original("b/scan.pdf", b"2").unwrap_err();
        assert!(err.to_string().contains("duplicate archived file name"));
        let _ = std::fs::remove_dir_all(&tmp);
    }

    #[test]
    fn create_clears_previous_run() {
        let tmp = temp_dir();
        let root = tmp.join("pkg");
        std::fs::create_dir_all(root.join(BLOB_DIR)).unwrap();
        std::fs::write(root.join(BLOB_DIR).join("stale.pdf"), b"old").unwrap();

        let package = Package::create(&root).unwrap();
        assert_eq!(package.staged_count(), 0);
        assert!(!root.join(BLOB_DIR).join("stale.pdf").exists());
        assert!(root.join(BLOB_DIR).is_dir());

        let _ = std::fs::remove_dir_all(&tmp);
    }

    #[test]
    fn finish_rejects_bulk_file_outside_root() {
        let tmp = temp_dir();
        let package = Package::create(&tmp.join("pkg")).unwrap();
        let bulk = write_bulk_file::<&str>(&[], &[], &tmp.join("elsewhere.dat")).unwrap();
        let run_id = RunId::new();
        let err = package.finish(&run_id, &bulk, &[]).unwrap_err();
        assert!(err.to_string().contains("outside the package root"));
        let _ = std::fs::remove_dir_all(&tmp);
    }
}
