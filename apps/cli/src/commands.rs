//! CLI command definitions, routing, and tracing setup.

use std::path::{Path, PathBuf};
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use color_eyre::eyre::{Result, eyre};
use indicatif::{ProgressBar, ProgressStyle};
use tracing::info;

use hrdocs_artifacts::read_bulk_file;
use hrdocs_core::{Pipeline, ProgressReporter, RunReport, extract_document, rebuild_bulk_file};
use hrdocs_extract::{GeminiClassifier, MetadataExtractor, RoutingTextExtractor};
use hrdocs_records::{RecordOptions, split_fields};
use hrdocs_shared::{
    AppConfig, RunId, classification_api_key, init_config, load_config, load_config_from,
};
use hrdocs_storage::LocalFileStore;

// ---------------------------------------------------------------------------
// CLI structure
// ---------------------------------------------------------------------------

/// hrdocs: classify HR documents and build bulk-load packages.
#[derive(Parser)]
#[command(
    name = "hrdocs",
    version,
    about = "Classify scanned HR documents and build a DocumentsOfRecord bulk-load package.",
    long_about = None,
)]
pub(crate) struct Cli {
    /// Config file to use instead of ~/.hrdocs/hrdocs.toml.
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Log format: text (default) or json.
    #[arg(long, default_value = "text", global = true)]
    pub log_format: LogFormat,

    /// Verbosity level (-v, -vv).
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    #[command(subcommand)]
    pub command: Command,
}

/// Log output format.
#[derive(Clone, Debug, clap::ValueEnum)]
pub(crate) enum LogFormat {
    Text,
    Json,
}

/// Top-level CLI subcommands.
#[derive(Subcommand)]
pub(crate) enum Command {
    /// Process every document in the input store and upload the package.
    Run {
        /// Run identifier; the package lands under <output>/<run_id>/.
        #[arg(long, env = "RUN_ID")]
        run_id: Option<String>,

        /// Input directory (overrides [storage] input_dir).
        #[arg(long, env = "HRDOCS_INPUT_DIR")]
        input: Option<PathBuf>,

        /// Output directory (overrides [storage] output_dir).
        #[arg(long, env = "HRDOCS_OUTPUT_DIR")]
        output: Option<PathBuf>,

        /// Local staging directory (overrides [storage] work_dir).
        #[arg(long)]
        work_dir: Option<PathBuf>,

        /// Exit with status 2 when any document falls back to unclassified.
        #[arg(long)]
        fail_on_unclassified: bool,

        /// Print the run report as JSON.
        #[arg(long)]
        json: bool,
    },

    /// Rebuild a bulk file from a metadata.json snapshot.
    Build {
        /// Path to metadata.json.
        #[arg(long)]
        metadata: PathBuf,

        /// Destination bulk file.
        #[arg(short, long)]
        out: PathBuf,

        /// Re-read the written file and check its structure.
        #[arg(long)]
        verify: bool,
    },

    /// Extract metadata from a single local file and print it as JSON.
    Classify {
        /// Document to classify.
        file: PathBuf,
    },

    /// Configuration management.
    Config {
        /// Config subcommand.
        #[command(subcommand)]
        action: ConfigAction,
    },
}

/// Config subcommands.
#[derive(Subcommand)]
pub(crate) enum ConfigAction {
    /// Initialize config file with defaults.
    Init,
    /// Show resolved configuration.
    Show,
}

// ---------------------------------------------------------------------------
// Tracing setup
// ---------------------------------------------------------------------------

/// Initialize tracing based on CLI flags. `RUST_LOG` takes precedence.
pub(crate) fn init_tracing(verbose: u8, format: &LogFormat) {
    use tracing_subscriber::{EnvFilter, fmt};

    let filter = match verbose {
        0 => "hrdocs=info",
        1 => "hrdocs=debug",
        _ => "hrdocs=trace",
    };

    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter));

    match format {
        LogFormat::Text => {
            fmt()
                .with_env_filter(env_filter)
                .with_target(false)
                .with_writer(std::io::stderr)
                .init();
        }
        LogFormat::Json => {
            fmt()
                .json()
                .with_env_filter(env_filter)
                .with_writer(std::io::stderr)
                .init();
        }
    }
}

// ---------------------------------------------------------------------------
// Command dispatch
// ---------------------------------------------------------------------------

/// Run the CLI command.
pub(crate) async fn run(cli: Cli) -> Result<ExitCode> {
    let config_path = cli.config.as_deref();
    match cli.command {
        Command::Run {
            run_id,
            input,
            output,
            work_dir,
            fail_on_unclassified,
            json,
        } => {
            let mut config = resolve_config(config_path)?;
            apply_storage_overrides(&mut config, input, output, work_dir);
            let run_id = match run_id {
                Some(id) => id.parse::<RunId>()?,
                None => RunId::new(),
            };
            let report = cmd_run(config, &run_id, json).await?;
            if fail_on_unclassified && report.unclassified > 0 {
                return Ok(ExitCode::from(2));
            }
            Ok(ExitCode::SUCCESS)
        }
        Command::Build {
            metadata,
            out,
            verify,
        } => {
            let config = resolve_config(config_path)?;
            cmd_build(&config, &metadata, &out, verify)?;
            Ok(ExitCode::SUCCESS)
        }
        Command::Classify { file } => {
            let config = resolve_config(config_path)?;
            cmd_classify(&config, &file).await?;
            Ok(ExitCode::SUCCESS)
        }
        Command::Config { action } => {
            match action {
                ConfigAction::Init => cmd_config_init()?,
                ConfigAction::Show => cmd_config_show(config_path)?,
            }
            Ok(ExitCode::SUCCESS)
        }
    }
}

fn resolve_config(path: Option<&Path>) -> Result<AppConfig> {
    let config = match path {
        Some(p) => load_config_from(p)?,
        None => load_config()?,
    };
    Ok(config)
}

/// Flags and env vars win over the config file.
fn apply_storage_overrides(
    config: &mut AppConfig,
    input: Option<PathBuf>,
    output: Option<PathBuf>,
    work_dir: Option<PathBuf>,
) {
    if let Some(p) = input {
        config.storage.input_dir = p.display().to_string();
    }
    if let Some(p) = output {
        config.storage.output_dir = p.display().to_string();
    }
    if let Some(p) = work_dir {
        config.storage.work_dir = p.display().to_string();
    }
}

fn build_metadata_extractor(config: &AppConfig) -> Result<MetadataExtractor<GeminiClassifier>> {
    let api_key = classification_api_key(config)?;
    let classifier = GeminiClassifier::new(&config.classification, api_key)?;
    Ok(MetadataExtractor::from_config(classifier, config)?)
}

// ---------------------------------------------------------------------------
// Command handlers
// ---------------------------------------------------------------------------

async fn cmd_run(config: AppConfig, run_id: &RunId, json: bool) -> Result<RunReport> {
    // Fail on a missing API key before touching any document.
    let metadata_extractor = build_metadata_extractor(&config)?;
    let text_extractor = RoutingTextExtractor::from_config(&config)?;

    let input = LocalFileStore::new(&config.storage.input_dir);
    let output = LocalFileStore::new(&config.storage.output_dir);

    info!(
        %run_id,
        input = %config.storage.input_dir,
        output = %config.storage.output_dir,
        ocr = text_extractor.has_ocr(),
        "starting batch run"
    );

    let pipeline = Pipeline::new(config, input, output, text_extractor, metadata_extractor);
    let reporter = CliProgress::new();
    let report = pipeline.run(run_id, &reporter).await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
        return Ok(report);
    }

    println!();
    println!("  Bulk-load package created!");
    println!("  Run:          {}", report.run_id);
    println!("  Documents:    {}", report.documents);
    println!("  Classified:   {}", report.classified);
    println!("  Unclassified: {}", report.unclassified);
    println!("  Uploaded:     {} files", report.uploaded_keys.len());
    println!("  Bulk file:    {}", report.bulk_file.path.display());
    println!("  SHA-256:      {}", report.bulk_file.sha256);
    println!("  Time:         {:.1}s", report.elapsed.as_secs_f64());
    for fallback in &report.fallbacks {
        println!("  ! {}: {}", fallback.filename, fallback.reason);
    }
    println!();

    Ok(report)
}

fn cmd_build(config: &AppConfig, metadata: &Path, out: &Path, verify: bool) -> Result<()> {
    let options = RecordOptions::from(&config.mapping);
    let meta = rebuild_bulk_file(metadata, out, &options)?;

    if verify {
        let bulk = read_bulk_file(out)?;
        if bulk.dor_lines.len() != meta.dor_count || bulk.da_lines.len() != meta.da_count {
            return Err(eyre!(
                "verification failed: expected {}/{} records, read {}/{}",
                meta.dor_count,
                meta.da_count,
                bulk.dor_lines.len(),
                bulk.da_lines.len()
            ));
        }
        let sections = [
            ("DocumentsOfRecord", &bulk.dor_lines, options.dor_field_count()),
            ("DocumentAttachment", &bulk.da_lines, options.da_field_count()),
        ];
        for (section, lines, expected) in sections {
            for (i, line) in lines.iter().enumerate() {
                let found = split_fields(line).len();
                if found != expected {
                    return Err(eyre!(
                        "verification failed: {section} record {} has {found} fields, expected {expected}",
                        i + 1
                    ));
                }
            }
        }
        info!(path = %out.display(), "bulk file verified");
    }

    println!("  Bulk file: {}", meta.path.display());
    println!("  Records:   {} / {}", meta.dor_count, meta.da_count);
    println!("  SHA-256:   {}", meta.sha256);
    Ok(())
}

async fn cmd_classify(config: &AppConfig, file: &Path) -> Result<()> {
    let bytes = tokio::fs::read(file)
        .await
        .map_err(|e| eyre!("cannot read {}: {e}", file.display()))?;
    let name = file
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .ok_or_else(|| eyre!("{} has no file name", file.display()))?;

    let text_extractor = RoutingTextExtractor::from_config(config)?;
    let metadata_extractor = build_metadata_extractor(config)?;

    let outcome = extract_document(&text_extractor, &metadata_extractor, &name, &bytes).await;
    if let hrdocs_extract::ExtractionStatus::Unclassified { reason } = &outcome.status {
        eprintln!("warning: {name} is unclassified: {reason}");
    }
    println!("{}", serde_json::to_string_pretty(&outcome.metadata)?);
    Ok(())
}

fn cmd_config_init() -> Result<()> {
    let path = init_config()?;
    println!("Config initialized at: {}", path.display());
    Ok(())
}

fn cmd_config_show(path: Option<&Path>) -> Result<()> {
    let config = resolve_config(path)?;
    let toml_str = toml::to_string_pretty(&config)?;
    println!("{toml_str}");
    Ok(())
}

// ---------------------------------------------------------------------------
// CLI progress reporter
// ---------------------------------------------------------------------------

/// CLI progress reporter using an indicatif spinner.
struct CliProgress {
    spinner: ProgressBar,
}

impl CliProgress {
    fn new() -> Self {
        let spinner = ProgressBar::new_spinner();
        let style = ProgressStyle::with_template("{spinner:.cyan} {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner())
            .tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏"]);
        spinner.set_style(style);
        spinner.enable_steady_tick(std::time::Duration::from_millis(80));
        Self { spinner }
    }
}

impl ProgressReporter for CliProgress {
    fn phase(&self, name: &str) {
        self.spinner.set_message(name.to_string());
    }

    fn document_processed(&self, key: &str, current: usize, total: usize, classified: bool) {
        let mark = if classified { "ok" } else { "unclassified" };
        self.spinner
            .set_message(format!("Extracting [{current}/{total}] {key} ({mark})"));
    }

    fn done(&self, _report: &RunReport) {
        self.spinner.finish_and_clear();
    }
}
