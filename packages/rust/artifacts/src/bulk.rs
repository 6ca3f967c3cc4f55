//! Bulk file rendering, atomic writing, and parsing.

use std::io::Write;
use std::path::{Path, PathBuf};

use sha2::{Digest, Sha256};
use tracing::{debug, info, instrument, warn};

use hrdocs_records::{
    DA_FIELDS, DOCUMENT_ATTACHMENT, DOCUMENTS_OF_RECORD, DOR_FIELDS, HEADER_KEYWORD, split_fields,
};
use hrdocs_shared::{HrDocsError, Result};

/// Header line of the DocumentsOfRecord section.
pub const DOR_HEADER: &str = "METADATA|DocumentsOfRecord|PersonNumber|DocumentType|Country|DocumentCode|DocumentName|DateFrom|DateTo|SourceSystemOwner|SourceSystemId";

/// Header line of the DocumentAttachment section.
pub const DA_HEADER: &str = "METADATA|DocumentAttachment|PersonNumber|DocumentType|Country|DocumentCode|DataTypeCode|URLorTextorFileName|Title|File|SourceSystemOwner|SourceSystemId";

/// Metadata about a written bulk file.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct BulkFileMeta {
    pub path: PathBuf,
    pub sha256: String,
    pub size_bytes: usize,
    pub dor_count: usize,
    pub da_count: usize,
}

/// A parsed bulk file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BulkFile {
    /// Field names of the DocumentsOfRecord header (after `METADATA|<Section>`).
    pub dor_header: Vec<String>,
    pub dor_lines: Vec<String>,
    /// Field names of the DocumentAttachment header.
    pub da_header: Vec<String>,
    pub da_lines: Vec<String>,
}

/// Render the complete bulk file contents.
pub fn render_bulk_file<S: AsRef<str>>(dor_lines: &[S], da_lines: &[S]) -> String {
    let body_len: usize = dor_lines
        .iter()
        .chain(da_lines)
        .map(|l| l.as_ref().len() + 1)
        .sum();
    let mut out = String::with_capacity(DOR_HEADER.len() + DA_HEADER.len() + 2 + body_len);

    out.push_str(DOR_HEADER);
    out.push('\n');
    for line in dor_lines {
        out.push_str(line.as_ref());
        out.push('\n');
    }

    out.push_str(DA_HEADER);
    out.push('\n');
    for line in da_lines {
        out.push_str(line.as_ref());
        out.push('\n');
    }
    out
}

/// Write the bulk file to `destination` atomically.
///
/// Content goes to `.<name>.tmp` beside the destination and is renamed into
/// place once fully written and synced. On failure the temp file is removed
/// and no file is created at `destination`.
#[instrument(skip_all, fields(destination = %destination.display(), dor = dor_lines.len(), da = da_lines.len()))]
pub fn write_bulk_file<S: AsRef<str>>(
    dor_lines: &[S],
    da_lines: &[S],
    destination: &Path,
) -> Result<BulkFileMeta> {
    let invalid = dor_lines
        .iter()
        .chain(da_lines)
        .any(|l| l.as_ref().contains(['\n', '\r']));
    if invalid {
        return Err(HrDocsError::validation(
            "record lines must not contain line breaks",
        ));
    }

    let content = render_bulk_file(dor_lines, da_lines);

    let file_name = destination
        .file_name()
        .ok_or_else(|| {
            HrDocsError::validation(format!(
                "bulk file destination {} has no file name",
                destination.display()
            ))
        })?
        .to_string_lossy()
        .into_owned();
    let parent = match destination.parent() {
        Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
        _ => PathBuf::from("."),
    };

    std::fs::create_dir_all(&parent).map_err(|e| HrDocsError::io(&parent, e))?;

    let temp = parent.join(format!(".{file_name}.tmp"));
    if let Err(e) = write_synced(&temp, content.as_bytes()) {
        discard(&temp);
        return Err(e);
    }
    if let Err(e) = std::fs::rename(&temp, destination) {
        discard(&temp);
        return Err(HrDocsError::io(destination, e));
    }

    let mut hasher = Sha256::new();
    hasher.update(content.as_bytes());

    let meta = BulkFileMeta {
        path: destination.to_path_buf(),
        sha256: format!("{:x}", hasher.finalize()),
        size_bytes: content.len(),
        dor_count: dor_lines.len(),
        da_count: da_lines.len(),
    };

    info!(
        size = meta.size_bytes,
        sha256 = %meta.sha256,
        "bulk file written"
    );
    Ok(meta)
}

fn write_synced(path: &Path, bytes: &[u8]) -> Result<()> {
    let mut file = std::fs::File::create(path).map_err(|e| HrDocsError::io(path, e))?;
    file.write_all(bytes).map_err(|e| HrDocsError::io(path, e))?;
    file.sync_all().map_err(|e| HrDocsError::io(path, e))?;
    Ok(())
}

fn discard(temp: &Path) {
    match std::fs::remove_file(temp) {
        Ok(()) => debug!(path = %temp.display(), "removed partial bulk file"),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => warn!(path = %temp.display(), error = %e, "failed to remove partial bulk file"),
    }
}

/// Parse bulk file contents back into its two sections.
pub fn parse_bulk_file(content: &str) -> Result<BulkFile> {
    let mut lines = content.lines();

    let dor_header = match lines.next() {
        Some(line) => parse_header(line, DOCUMENTS_OF_RECORD)?,
        None => return Err(HrDocsError::validation("bulk file is empty")),
    };

    let mut dor_lines = Vec::new();
    let mut da_header = None;
    // Record lines never equal a header: they have fewer fields, and a
    // leading `METADATA` value is written escaped.
    for line in lines.by_ref() {
        if line == DA_HEADER {
            da_header = Some(parse_header(line, DOCUMENT_ATTACHMENT)?);
            break;
        }
        dor_lines.push(line.to_string());
    }

    let da_header = da_header.ok_or_else(|| {
        HrDocsError::validation("bulk file has no DocumentAttachment section")
    })?;
    let da_lines: Vec<String> = lines.map(str::to_string).collect();

    if dor_header != DOR_FIELDS {
        return Err(HrDocsError::validation(format!(
            "unexpected DocumentsOfRecord header fields: {dor_header:?}"
        )));
    }
    if da_header != DA_FIELDS {
        return Err(HrDocsError::validation(format!(
            "unexpected DocumentAttachment header fields: {da_header:?}"
        )));
    }

    Ok(BulkFile {
        dor_header,
        dor_lines,
        da_header,
        da_lines,
    })
}

/// Read and parse a bulk file from disk.
pub fn read_bulk_file(path: &Path) -> Result<BulkFile> {
    let content = std::fs::read_to_string(path).map_err(|e| HrDocsError::io(path, e))?;
    parse_bulk_file(&content)
}

fn parse_header(line: &str, section: &str) -> Result<Vec<String>> {
    let mut fields = split_fields(line);
    if fields.len() < 2 || fields[0] != HEADER_KEYWORD || fields[1] != section {
        return Err(HrDocsError::validation(format!(
            "expected {HEADER_KEYWORD}|{section} header, got {line:?}"
        )));
    }
    Ok(fields.split_off(2))
}
