use std::path::PathBuf;

use clap::Parser;
use indicatif::{ProgressBar, ProgressStyle};
use tracing_subscriber::EnvFilter;

use takeback_core::{
    config::ProjectConfig, consolidate, status, ExifTool, RunControl, RunOptions, StopToken,
};

#[derive(Parser)]
#[command(
    name = "takeback",
    version,
    about = "Reconcile exported media and JSON sidecars into a dated library"
)]
struct Cli {
    /// Project root containing takeout-archives/ and json-repository/
    #[arg(long, default_value = ".")]
    root: PathBuf,

    /// Destination library root
    #[arg(long)]
    library: PathBuf,

    /// Display a status report of ledgers and issue logs, then exit
    #[arg(long)]
    status: bool,

    /// Run the sidecar consolidation pass instead of media processing
    #[arg(long)]
    consolidate: bool,

    /// Live mode: actually move files and write metadata (default: dry run)
    #[arg(long)]
    live: bool,

    /// Process at most this many work items, then stop
    #[arg(long)]
    batch_size: Option<usize>,

    /// Name or full path of one .zip archive or standalone media file
    #[arg(long)]
    archive_name: Option<String>,

    /// Clear the workbench before extraction; with --archive-name, also
    /// re-process an archive the ledger says is done
    #[arg(long)]
    force_extract: bool,

    /// Clear the workbench after the run completes
    #[arg(long)]
    clean_workbench: bool,

    /// Destination path length ceiling before files divert to review
    #[arg(long, default_value_t = takeback_core::config::DEFAULT_MAX_PATH_LENGTH)]
    max_path_length: usize,
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let t_total = std::time::Instant::now();

    let cfg = ProjectConfig::new(&cli.root, &cli.library).with_max_path_length(cli.max_path_length);

    if cli.status {
        print!("{}", status::gather(&cfg)?);
        return Ok(());
    }

    let bar = ProgressBar::new(0);
    bar.set_style(
        ProgressStyle::with_template("{prefix:>12} [{bar:30}] {pos}/{len} {msg}")
            .expect("static template")
            .progress_chars("=> "),
    );
    let progress = {
        let bar = bar.clone();
        move |stage: &str, current: u64, total: u64, message: &str| {
            if bar.length() != Some(total) {
                bar.set_length(total);
            }
            bar.set_prefix(stage.to_string());
            bar.set_position((current + 1).min(total));
            bar.set_message(message.to_string());
        }
    };

    if cli.consolidate {
        let summary = consolidate::consolidate_sidecars(&cfg, &progress)?;
        bar.finish_and_clear();
        eprintln!(
            "Consolidation done: {} sidecars extracted, {} duplicates skipped, {} conflicts, {} corrupt archive(s) ({:.2}s)",
            summary.sidecars_extracted,
            summary.duplicates_skipped,
            summary.conflicts,
            summary.corrupt_archives,
            t_total.elapsed().as_secs_f64()
        );
        return Ok(());
    }

    let tool = ExifTool::discover(&cfg)?;

    let stop = StopToken::new();
    {
        let stop = stop.clone();
        ctrlc::set_handler(move || {
            eprintln!("\nstop requested; finishing the current file");
            stop.request_stop();
        })?;
    }

    let options = RunOptions {
        live: cli.live,
        batch_size: cli.batch_size,
        archive_name: cli.archive_name,
        force_extract: cli.force_extract,
        clean_workbench: cli.clean_workbench,
    };
    let control = RunControl { stop: Some(stop) };

    let summary = takeback_core::run_with_control(&cfg, &options, &tool, &control, &progress)?;
    bar.finish_and_clear();

    eprintln!(
        "Done! {}/{} work item(s), {} files processed, {} committed, {} diverted, {} matched, {} warning(s), {} error(s){} ({:.2}s)",
        summary.work_items_completed,
        summary.work_items_selected,
        summary.files_processed,
        summary.files_committed,
        summary.files_diverted,
        summary.matches_found,
        summary.warnings,
        summary.errors,
        if summary.stopped_early { " [stopped early]" } else { "" },
        t_total.elapsed().as_secs_f64()
    );

    Ok(())
}
