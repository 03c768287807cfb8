use anyhow::{Context, Result};
use clap::Parser;
use facesift_pipeline::{
    cluster_and_organize, run_worker, scheduler, Config, OutputLayout, ProcessLauncher, Scheduler,
    StateStore, WorkerManifest,
};
use facesift_raster::{discover_documents, Document};
use indicatif::{ProgressBar, ProgressStyle};
use std::io::IsTerminal;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use tracing_subscriber::EnvFilter;

const INTERRUPTED: u8 = 130;

#[derive(Parser)]
#[command(
    name = "facesift",
    about = "Extract faces from scanned PDFs and group them by person",
    version
)]
struct Cli {
    /// Folder of source PDFs
    #[arg(required_unless_present = "worker")]
    input: Option<PathBuf>,
    /// Output folder for state, face crops and the summary
    #[arg(required_unless_present = "worker")]
    output: Option<PathBuf>,
    /// Documents per worker process [env: FACESIFT_BATCH_SIZE]
    #[arg(long)]
    batch_size: Option<usize>,
    /// Similarity a face must exceed to join a person [env: FACESIFT_CLUSTER_THRESHOLD]
    #[arg(long)]
    threshold: Option<f32>,
    /// Rasterization resolution [env: FACESIFT_RASTER_DPI]
    #[arg(long)]
    dpi: Option<u32>,
    /// Run a single worker unit from a batch manifest
    #[arg(long, hide = true, value_name = "MANIFEST")]
    worker: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    if let Some(manifest) = cli.worker {
        return worker_main(manifest).await;
    }

    let mut config = Config::from_env();
    if let Some(n) = cli.batch_size {
        config.batch_size = n.max(1);
    }
    if let Some(t) = cli.threshold {
        config.cluster_threshold = t;
    }
    if let Some(d) = cli.dpi {
        config.raster_dpi = d;
    }

    // Both are present unless --worker was given.
    let (Some(input), Some(output)) = (cli.input, cli.output) else {
        anyhow::bail!("input and output directories are required");
    };
    run(&config, &input, &output).await
}

async fn worker_main(manifest_path: PathBuf) -> Result<ExitCode> {
    let manifest = WorkerManifest::read(&manifest_path)
        .with_context(|| format!("loading worker manifest {}", manifest_path.display()))?;
    tokio::task::spawn_blocking(move || run_worker(&manifest))
        .await
        .context("worker thread panicked")??;
    Ok(ExitCode::SUCCESS)
}

async fn run(config: &Config, input: &Path, output: &Path) -> Result<ExitCode> {
    let paths = discover_documents(input).context("reading input directory")?;
    let layout = OutputLayout::new(output);
    layout
        .create()
        .with_context(|| format!("creating output directory {}", output.display()))?;
    let store = StateStore::open(&layout.db_path).context("opening state store")?;

    tracing::info!(
        input = %input.display(),
        output = %output.display(),
        documents = paths.len(),
        batch_size = config.batch_size,
        "facesift starting"
    );

    let candidates = hash_documents(paths);
    let pending = scheduler::plan(candidates, &store.processed_hashes()?);
    tracing::info!(pending = pending.len(), "resuming with pending documents");

    let progress = progress_bar(config.progress);
    let program = std::env::current_exe().context("locating facesift executable")?;
    let mut launcher = ProcessLauncher::new(program, config, &layout.db_path, &layout.unsorted_dir)?;
    let report = Scheduler::new(config.batch_size)
        .run(&pending, &mut launcher, &progress)
        .await?;
    progress.finish_and_clear();

    if report.interrupted {
        eprintln!("Interrupted. Unfinished documents will be picked up on the next run.");
        return Ok(ExitCode::from(INTERRUPTED));
    }
    if report.failed_batches > 0 {
        tracing::warn!(failed = report.failed_batches, "some worker processes terminated abnormally");
    }

    let threshold = config.cluster_threshold;
    let faces_dir = layout.faces_dir.clone();
    let summary_path = layout.summary_path.clone();
    let post_pass = tokio::task::spawn_blocking(move || {
        let summary = cluster_and_organize(&store, &faces_dir, &summary_path, threshold)?;
        let counts = store.counts()?;
        anyhow::Ok((summary, counts))
    });

    let (summary, counts) = tokio::select! {
        joined = post_pass => joined.context("organizer thread panicked")??,
        _ = tokio::signal::ctrl_c() => {
            eprintln!("Interrupted during organization. Re-run to rebuild person folders.");
            // The blocking organizer task would hold up runtime shutdown.
            std::process::exit(INTERRUPTED.into());
        }
    };

    println!(
        "Done! {} unique individuals across {} detections from {} documents. Summary: {}",
        summary.len(),
        counts.detections,
        counts.processed,
        layout.summary_path.display()
    );
    Ok(ExitCode::SUCCESS)
}

/// Hash every candidate. Unreadable files are logged and left for the next run.
fn hash_documents(paths: Vec<PathBuf>) -> Vec<Document> {
    paths
        .into_iter()
        .filter_map(|path| match Document::from_path(&path) {
            Ok(doc) => Some(doc),
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "skipping unreadable document");
                None
            }
        })
        .collect()
}

fn progress_bar(enabled: bool) -> ProgressBar {
    if !enabled || !std::io::stderr().is_terminal() {
        return ProgressBar::hidden();
    }
    let style = ProgressStyle::with_template(
        "{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} PDFs",
    )
    .map(|s| s.progress_chars("#>-"))
    .unwrap_or_else(|_| ProgressStyle::default_bar());
    ProgressBar::new(0).with_style(style)
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_positional_arguments() {
        let cli = Cli::try_parse_from(["facesift", "in", "out", "--batch-size", "4"]).unwrap();
        assert_eq!(cli.input, Some(PathBuf::from("in")));
        assert_eq!(cli.output, Some(PathBuf::from("out")));
        assert_eq!(cli.batch_size, Some(4));
        assert!(cli.worker.is_none());
    }

    #[test]
    fn test_output_required() {
        assert!(Cli::try_parse_from(["facesift", "in"]).is_err());
    }

    #[test]
    fn test_worker_flag_alone() {
        let cli = Cli::try_parse_from(["facesift", scheduler::WORKER_FLAG, "/tmp/batch-0.json"]).unwrap();
        assert_eq!(cli.worker, Some(PathBuf::from("/tmp/batch-0.json")));
        assert!(cli.input.is_none());
    }

    #[test]
    fn test_hash_documents_skips_missing() {
        let dir = tempfile::tempdir().unwrap();
        let ok = dir.path().join("ok.pdf");
        std::fs::write(&ok, b"x").unwrap();
        let docs = hash_documents(vec![ok.clone(), dir.path().join("missing.pdf")]);
        assert_eq!(docs.len(), 1);
        assert_eq!(docs[0].path, ok);
    }

    #[tokio::test]
    async fn test_missing_input_is_setup_failure() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config::from_env();
        let err = run(&config, &dir.path().join("nope"), &dir.path().join("out"))
            .await
            .unwrap_err();
        assert!(format!("{err:#}").contains("input directory not found"), "got {err:#}");
        assert!(!dir.path().join("out").exists());
    }

    #[tokio::test]
    async fn test_empty_input_writes_empty_summary() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("in");
        std::fs::create_dir_all(&input).unwrap();
        let mut config = Config::from_env();
        config.progress = false;

        run(&config, &input, &dir.path().join("out")).await.unwrap();
        let summary = std::fs::read_to_string(dir.path().join("out/face_db.json")).unwrap();
        assert_eq!(summary.trim(), "[]");
    }
}
