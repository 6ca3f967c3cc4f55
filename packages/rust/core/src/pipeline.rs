//! End-to-end batch run: input store → extraction → records → package → output store.

use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use serde::Serialize;
use tracing::{info, instrument, warn};

use hrdocs_artifacts::{BulkFileMeta, Package, read_metadata_snapshot, write_bulk_file};
use hrdocs_extract::{
    Classifier, ExtractionOutcome, ExtractionStatus, MetadataExtractor, TextExtractor,
};
use hrdocs_records::{RecordOptions, build_records};
use hrdocs_shared::{AppConfig, DocumentMetadata, HrDocsError, Result, RunId};
use hrdocs_storage::FileStore;

// ---------------------------------------------------------------------------
// Report & progress
// ---------------------------------------------------------------------------

/// A document that fell back to the unclassified record.
#[derive(Debug, Clone, Serialize)]
pub struct FallbackEntry {
    pub filename: String,
    pub reason: String,
}

/// Result of one [`Pipeline::run`].
#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub run_id: RunId,
    /// Documents in the batch (each appears once in both record sections).
    pub documents: usize,
    pub classified: usize,
    pub unclassified: usize,
    pub fallbacks: Vec<FallbackEntry>,
    /// The bulk file as written to the local work directory.
    pub bulk_file: BulkFileMeta,
    /// Keys written to the output store, in upload order.
    pub uploaded_keys: Vec<String>,
    pub elapsed: Duration,
}

/// Progress callback for reporting pipeline status.
pub trait ProgressReporter: Send + Sync {
    /// Called when entering a new phase.
    fn phase(&self, name: &str);
    /// Called after each document's metadata is known.
    fn document_processed(&self, key: &str, current: usize, total: usize, classified: bool);
    /// Called when the run completes.
    fn done(&self, report: &RunReport);
}

/// No-op progress reporter for headless/test usage.
pub struct SilentProgress;

impl ProgressReporter for SilentProgress {
    fn phase(&self, _name: &str) {}
    fn document_processed(&self, _key: &str, _current: usize, _total: usize, _classified: bool) {}
    fn done(&self, _report: &RunReport) {}
}

// ---------------------------------------------------------------------------
// Pipeline
// ---------------------------------------------------------------------------

/// One batch run over injected collaborators.
pub struct Pipeline<I, O, T, C> {
    config: AppConfig,
    input: I,
    output: O,
    text: T,
    metadata: MetadataExtractor<C>,
}

impl<I, O, T, C> Pipeline<I, O, T, C>
where
    I: FileStore,
    O: FileStore,
    T: TextExtractor,
    C: Classifier,
{
    pub fn new(
        config: AppConfig,
        input_store: I,
        output_store: O,
        text_extractor: T,
        metadata_extractor: MetadataExtractor<C>,
    ) -> Self {
        Self {
            config,
            input: input_store,
            output: output_store,
            text: text_extractor,
            metadata: metadata_extractor,
        }
    }

    /// Local staging directory for `run_id`.
    pub fn work_dir(&self, run_id: &RunId) -> PathBuf {
        Path::new(&self.config.storage.work_dir).join(run_id.as_str())
    }

    /// Process every input document and upload the package under `<run_id>/`.
    ///
    /// 1. List the input store (an empty store is an error)
    /// 2. Per document, in key order: fetch, stage, extract text, extract metadata
    /// 3. Build both record sections and write the bulk file
    /// 4. Write the manifests and upload the package
    ///
    /// Per-document extraction failures only degrade that document to the
    /// unclassified record. Fetch, write and upload failures abort the run.
    /// When an upload fails, the objects already written for this run are
    /// removed again. `manifest.json` goes last, so a run prefix without it
    /// is incomplete even if that cleanup fails too.
    #[instrument(skip_all, fields(run_id = %run_id))]
    pub async fn run(&self, run_id: &RunId, progress: &dyn ProgressReporter) -> Result<RunReport> {
        let start = Instant::now();
        info!(
            input = %self.input.describe(),
            output = %self.output.describe(),
            "starting run"
        );

        // --- Phase 1: List ---
        progress.phase("Listing input documents");
        let objects = self.input.list().await?;
        if objects.is_empty() {
            return Err(HrDocsError::validation(format!(
                "no input documents found in {}",
                self.input.describe()
            )));
        }
        let total = objects.len();
        info!(documents = total, "input listed");

        // --- Phase 2: Extract ---
        progress.phase("Extracting document metadata");
        let work_dir = self.work_dir(run_id);
        let mut package = Package::create(&work_dir)?;
        let mut metadata = Vec::with_capacity(total);
        let mut fallbacks = Vec::new();

        for (i, object) in objects.iter().enumerate() {
            let bytes = self.input.fetch(&object.key).await?;
            package.stage_original(&object.key, &bytes)?;

            let outcome = extract_document(&self.text, &self.metadata, &object.key, &bytes).await;
            let classified = outcome.is_classified();
            if let ExtractionStatus::Unclassified { reason } = outcome.status {
                fallbacks.push(FallbackEntry {
                    filename: object.key.clone(),
                    reason,
                });
            }
            metadata.push(outcome.metadata);
            progress.document_processed(&object.key, i + 1, total, classified);
        }

        // --- Phase 3: Records & bulk file ---
        progress.phase("Writing bulk file");
        let options = RecordOptions::from(&self.config.mapping);
        let records = build_records(&metadata, &options);
        let bulk_path = package.path_of(&self.config.output.bulk_file_name);
        let bulk_file = write_bulk_file(&records.dor_lines, &records.da_lines, &bulk_path)?;

        // --- Phase 4: Package & upload ---
        progress.phase("Packaging");
        let manifest = package.finish(run_id, &bulk_file, &metadata)?;

        progress.phase("Uploading package");
        let mut uploaded_keys = Vec::new();
        for relative in manifest.upload_order() {
            let uploaded = self
                .upload_one(&work_dir, run_id, &relative, &mut uploaded_keys)
                .await;
            if let Err(e) = uploaded {
                self.roll_back_upload(&uploaded_keys).await;
                return Err(e);
            }
        }

        let unclassified = fallbacks.len();
        let report = RunReport {
            run_id: run_id.clone(),
            documents: total,
            classified: total - unclassified,
            unclassified,
            fallbacks,
            bulk_file,
            uploaded_keys,
            elapsed: start.elapsed(),
        };

        info!(
            documents = report.documents,
            classified = report.classified,
            unclassified = report.unclassified,
            uploaded = report.uploaded_keys.len(),
            elapsed_ms = report.elapsed.as_millis() as u64,
            "run complete"
        );
        progress.done(&report);
        Ok(report)
    }
}

impl<I, O, T, C> Pipeline<I, O, T, C>
where
    I: FileStore,
    O: FileStore,
    T: TextExtractor,
    C: Classifier,
{
    async fn upload_one(
        &self,
        work_dir: &Path,
        run_id: &RunId,
        relative: &str,
        uploaded_keys: &mut Vec<String>,
    ) -> Result<()> {
        let local = local_path(work_dir, relative);
        let bytes = tokio::fs::read(&local)
            .await
            .map_err(|e| HrDocsError::io(&local, e))?;
        let key = format!("{run_id}/{relative}");
        self.output.put(&key, &bytes).await?;
        uploaded_keys.push(key);
        Ok(())
    }

    async fn roll_back_upload(&self, uploaded_keys: &[String]) {
        warn!(uploaded = uploaded_keys.len(), "upload failed; removing partial package");
        for key in uploaded_keys.iter().rev() {
            if let Err(e) = self.output.remove(key).await {
                warn!(key = %key, error = %e, "failed to remove partially uploaded object");
            }
        }
    }
}

/// Text extraction followed by metadata extraction for one document.
///
/// A text-extraction failure degrades to the unclassified record like any
/// classification failure.
pub async fn extract_document<T, C>(
    text_extractor: &T,
    metadata_extractor: &MetadataExtractor<C>,
    key: &str,
    bytes: &[u8],
) -> ExtractionOutcome
where
    T: TextExtractor,
    C: Classifier,
{
    match text_extractor.extract_text(key, bytes).await {
        Ok(text) => metadata_extractor.extract(key, &text).await,
        Err(e) => {
            warn!(key, error = %e, "text extraction failed; falling back to unclassified record");
            ExtractionOutcome::fallback(key, e.to_string())
        }
    }
}

/// Regenerate a bulk file from a `metadata.json` snapshot.
///
/// Deterministic: the same snapshot and options always produce the same bytes.
#[instrument(skip_all, fields(snapshot = %metadata_json.display()))]
pub fn rebuild_bulk_file(
    metadata_json: &Path,
    destination: &Path,
    options: &RecordOptions,
) -> Result<BulkFileMeta> {
    let metadata: Vec<DocumentMetadata> = read_metadata_snapshot(metadata_json)?;
    let records = build_records(&metadata, options);
    let meta = write_bulk_file(&records.dor_lines, &records.da_lines, destination)?;
    info!(documents = metadata.len(), path = %destination.display(), "bulk file rebuilt");
    Ok(meta)
}

fn local_path(root: &Path, relative: &str) -> PathBuf {
    relative
        .split('/')
        .fold(root.to_path_buf(), |path, segment| path.join(segment))
}
