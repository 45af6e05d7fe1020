use std::io::{IsTerminal, Write};
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tokio::runtime::Handle;
use tracing_subscriber::EnvFilter;

use ctxpack::app::{
    AssembleOperation, AssembleRequest, Coordinator, Operation, ScanOperation, ScanRequest,
};
use ctxpack::config::{settings, AppConfig};
use ctxpack::core::{CoreError, Progress, Selection, Warning};

/// Warnings listed individually before the rest are only counted.
const MAX_LISTED_WARNINGS: usize = 5;

#[derive(Parser, Debug)]
#[command(
    name = "ctxpack",
    version,
    about = "Packs a directory tree and selected files into one context document"
)]
struct Args {
    /// Directory to scan
    root: PathBuf,

    /// File to include, relative to the root (repeatable)
    #[arg(short, long = "select", value_name = "PATH")]
    select: Vec<PathBuf>,

    /// Include every visible file
    #[arg(short, long, conflicts_with = "select")]
    all: bool,

    /// Maximum number of files in the tree
    #[arg(long, value_name = "N")]
    max_files: Option<u64>,

    /// Maximum size of a single file in bytes
    #[arg(long, value_name = "BYTES")]
    max_file_size: Option<u64>,

    /// Maximum cumulative size of all scanned files in bytes
    #[arg(long, value_name = "BYTES")]
    max_memory: Option<u64>,

    /// Budget for the collected file content in bytes
    #[arg(long, value_name = "BYTES")]
    max_size: Option<u64>,

    /// Deepest tree level drawn in the diagram
    #[arg(long, value_name = "N")]
    max_depth: Option<usize>,

    /// Number of scanner threads
    #[arg(short, long, value_name = "N")]
    workers: Option<usize>,

    /// Include dot files and directories
    #[arg(long)]
    hidden: bool,

    /// Walk ignored entries and draw them in the diagram
    #[arg(long)]
    show_ignored: bool,

    /// Glob that is never ignored (repeatable)
    #[arg(long, value_name = "GLOB")]
    include: Vec<String>,

    /// Glob that is always ignored (repeatable)
    #[arg(long, value_name = "GLOB")]
    exclude: Vec<String>,

    /// Configuration file to use instead of the default location
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,
}

impl Args {
    fn apply(&self, config: &mut AppConfig) {
        let scan = &mut config.scan;
        if let Some(n) = self.max_files {
            scan.max_files = n;
        }
        if let Some(n) = self.max_file_size {
            scan.max_file_size = n;
        }
        if let Some(n) = self.max_memory {
            scan.max_memory = n;
        }
        if let Some(n) = self.workers {
            scan.workers = n;
        }
        scan.include_hidden |= self.hidden;
        scan.include_ignored |= self.show_ignored;
        scan.include.extend(self.include.iter().cloned());
        scan.exclude.extend(self.exclude.iter().cloned());

        let assembly = &mut config.assembly;
        if let Some(n) = self.max_size {
            assembly.max_content_bytes = n;
        }
        if self.max_depth.is_some() {
            assembly.max_tree_depth = self.max_depth;
        }
        assembly.show_ignored_in_tree |= self.show_ignored;
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();
    match run(args).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => report_error(&e),
    }
}

async fn run(args: Args) -> Result<()> {
    let mut config = settings::load_config(args.config.as_deref())?;
    args.apply(&mut config);

    let outcome = drive(
        ScanOperation,
        ScanRequest {
            root: args.root.clone(),
            config: config.scan.clone(),
        },
    )
    .await?;
    tracing::info!(
        "Scanned {} files in {} directories",
        outcome.stats.files,
        outcome.stats.directories
    );

    let tree = Arc::new(outcome.root);
    let selection = if args.all {
        Selection::all_visible(&tree)
    } else {
        args.select.iter().collect()
    };

    let result = drive(
        AssembleOperation,
        AssembleRequest {
            tree: tree.clone(),
            selection,
            config: config.assembly.clone(),
        },
    )
    .await?;

    eprintln!(
        "# ctxpack: {} generated {}",
        tree.path.display(),
        chrono::Local::now().format("%Y-%m-%d %H:%M:%S")
    );

    let mut stdout = std::io::stdout().lock();
    stdout
        .write_all(result.document().as_bytes())
        .and_then(|()| stdout.flush())
        .context("Failed to write document to stdout")?;

    eprintln!(
        "# {} file(s), {} bytes, ~{} tokens",
        result.files_included, result.total_bytes, result.token_estimate
    );
    if let Some(path) = &result.truncated_at {
        eprintln!(
            "warning: content budget of {} bytes reached at {}; raise it with --max-size",
            config.assembly.max_content_bytes,
            path.display()
        );
    }
    let warnings: Vec<&Warning> = outcome.warnings.iter().chain(&result.warnings).collect();
    summarize_warnings(&warnings);
    Ok(())
}

/// Runs `operation` through a coordinator, cancelling it on Ctrl-C.
async fn drive<O: Operation>(operation: O, input: O::Input) -> Result<O::Output, CoreError> {
    let mut coordinator = Coordinator::new(Handle::current());
    coordinator.start(operation, input)?;

    let token = coordinator.cancellation_token();
    let ctrl_c = tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            token.cancel();
        }
    });

    let interactive = std::io::stderr().is_terminal();
    let result = coordinator
        .wait(|progress: Progress| {
            if interactive {
                eprint!(
                    "\r\x1b[2K{} {}/{}",
                    progress.stage, progress.current, progress.total
                );
            }
        })
        .await;
    if interactive {
        eprint!("\r\x1b[2K");
    }
    ctrl_c.abort();
    result
}

fn summarize_warnings(warnings: &[&Warning]) {
    if warnings.is_empty() {
        return;
    }
    eprintln!("{} entries were skipped:", warnings.len());
    for warning in warnings.iter().take(MAX_LISTED_WARNINGS) {
        eprintln!("  {warning}");
    }
    if warnings.len() > MAX_LISTED_WARNINGS {
        eprintln!("  ... and {} more", warnings.len() - MAX_LISTED_WARNINGS);
    }
}

fn report_error(error: &anyhow::Error) -> ExitCode {
    match error.downcast_ref::<CoreError>() {
        Some(e) if e.is_cancelled() => {
            eprintln!("Cancelled.");
            ExitCode::from(130)
        }
        Some(e) if e.is_limit() => {
            eprintln!("error: {e}");
            if let Some(limit) = e.limit() {
                eprintln!("hint: raise the limit with {}", limit.flag());
            }
            ExitCode::from(2)
        }
        _ => {
            eprintln!("error: {error:#}");
            ExitCode::FAILURE
        }
    }
}
