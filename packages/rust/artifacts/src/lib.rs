//! Bulk-load artifacts: the pipe-delimited bulk file and its package.
//!
//! - [`bulk`]: render, atomically write, and parse `DocumentsOfRecord.dat`
//! - [`package`]: stage originals under `BlobFiles/` with checksum manifests

pub mod bulk;
pub mod package;

pub use bulk::{
    BulkFile, BulkFileMeta, DA_HEADER, DOR_HEADER, parse_bulk_file, read_bulk_file,
    render_bulk_file, write_bulk_file,
};
pub use package::{
    ArtifactMeta, BLOB_DIR, MANIFEST_FILE, METADATA_FILE, Package, PackageManifest,
    read_metadata_snapshot,
};
