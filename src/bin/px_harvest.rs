use std::fs::OpenOptions;
use std::process::ExitCode;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};

use clap::{Args, Parser, Subcommand};
use miette::IntoDiagnostic;
use tracing::warn;
use tracing_subscriber::EnvFilter;

use px_harvest::app::{HarvestResult, Harvester};
use px_harvest::browser::open_page_source;
use px_harvest::cancel::CancelToken;
use px_harvest::config::{ConfigLoader, Overrides, Settings};
use px_harvest::domain::Accession;
use px_harvest::error::HarvestError;
use px_harvest::http::HttpTransport;
use px_harvest::output::{JsonOutput, OutputMode};
use px_harvest::providers::MatchMode;
use px_harvest::tui::Tui;

const INTERACTIVE_LOG: &str = "px-harvest.log";
const EXIT_INTERRUPTED: u8 = 130;

#[derive(Parser)]
#[command(name = "px-harvest")]
#[command(about = "Harvest ProteomeXchange dataset metadata and raw-file statistics into a spreadsheet")]
#[command(version, author)]
struct Cli {
    #[arg(long, global = true)]
    non_interactive: bool,

    #[arg(long, global = true, value_name = "PATH")]
    log_file: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    #[command(about = "Search datasets by keyword, collect statistics and export them")]
    Harvest(HarvestArgs),
    #[command(about = "Count raw files for a single accession")]
    Stats(StatsArgs),
}

#[derive(Args)]
struct HarvestArgs {
    #[arg(short, long)]
    keyword: Option<String>,

    #[arg(short, long, help = "Output file (.xlsx or .csv)")]
    output: Option<String>,

    #[arg(long)]
    output_dir: Option<String>,

    #[arg(short = 'm', long)]
    max_datasets: Option<usize>,

    #[arg(short, long, help = "Concurrent statistics workers (1-20)")]
    workers: Option<usize>,

    #[arg(long, help = "Skip raw-file statistics (fast mode)")]
    skip_stats: bool,

    #[arg(long)]
    show_browser: bool,

    #[arg(long, help = "Fetch search pages over plain HTTP")]
    no_browser: bool,

    #[command(flatten)]
    common: CommonArgs,
}

#[derive(Args)]
struct StatsArgs {
    accession: String,

    #[arg(long)]
    repository: Option<String>,

    #[command(flatten)]
    common: CommonArgs,
}

#[derive(Args)]
struct CommonArgs {
    #[arg(long)]
    config: Option<String>,

    #[arg(long)]
    match_mode: Option<MatchMode>,

    #[arg(long)]
    timeout_secs: Option<u64>,

    #[arg(long)]
    max_attempts: Option<u32>,
}

fn main() -> ExitCode {
    match run() {
        Ok(code) => ExitCode::from(code),
        Err(report) => {
            eprintln!("{report:?}");
            if let Some(error) = report.downcast_ref::<HarvestError>() {
                return ExitCode::from(map_exit_code(error));
            }
            ExitCode::from(1)
        }
    }
}

fn map_exit_code(error: &HarvestError) -> u8 {
    match error {
        error if error.is_fatal_config() => 2,
        HarvestError::InvalidAccession(_) => 2,
        HarvestError::Browser(_)
        | HarvestError::Timeout { .. }
        | HarvestError::Connection { .. }
        | HarvestError::HttpStatus { .. }
        | HarvestError::Http { .. } => 3,
        HarvestError::Export(_) | HarvestError::Filesystem(_) => 4,
        HarvestError::Interrupted => EXIT_INTERRUPTED,
        _ => 1,
    }
}

fn run() -> miette::Result<u8> {
    let cli = Cli::parse();
    let output_mode = if cli.non_interactive {
        OutputMode::NonInteractive
    } else {
        OutputMode::Interactive
    };
    init_tracing(cli.log_file.as_deref(), output_mode)?;

    match cli.command {
        Commands::Harvest(args) => run_harvest(args, output_mode),
        Commands::Stats(args) => run_stats(args, output_mode),
    }
}

fn init_tracing(log_file: Option<&str>, output_mode: OutputMode) -> miette::Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let path = match (log_file, output_mode) {
        (Some(path), _) => Some(path),
        (None, OutputMode::Interactive) => Some(INTERACTIVE_LOG),
        (None, OutputMode::NonInteractive) => None,
    };

    match path {
        Some(path) => {
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .map_err(|err| HarvestError::Filesystem(format!("open log {path}: {err}")))?;
            tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_target(false)
                .with_ansi(false)
                .with_writer(Mutex::new(file))
                .init();
        }
        None => {
            tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_target(false)
                .with_writer(std::io::stderr)
                .init();
        }
    }
    Ok(())
}

fn overrides(common: &CommonArgs) -> Overrides {
    Overrides {
        match_mode: common.match_mode,
        timeout_secs: common.timeout_secs,
        max_attempts: common.max_attempts,
        ..Overrides::default()
    }
}

fn run_harvest(args: HarvestArgs, output_mode: OutputMode) -> miette::Result<u8> {
    let config = ConfigLoader::resolve(args.common.config.as_deref())?;
    let overrides = Overrides {
        keyword: args.keyword,
        output: args.output,
        output_dir: args.output_dir,
        max_datasets: args.max_datasets,
        workers: args.workers,
        skip_stats: args.skip_stats,
        show_browser: args.show_browser,
        no_browser: args.no_browser,
        ..overrides(&args.common)
    };
    let settings = Settings::resolve(config, overrides)?;
    let keyword = settings.keyword.clone();
    let transport = HttpTransport::new(settings.timeout)?;
    let harvester = Harvester::new(transport, settings);
    let cancel = CancelToken::new();

    let result = match output_mode {
        OutputMode::Interactive => {
            let mut tui = Tui::new(&keyword, cancel.clone());
            let job_cancel = cancel.clone();
            let result = tui.run(move |sink| {
                let source = open_page_source(harvester.settings(), &job_cancel)?;
                harvester.run(source.as_ref(), &job_cancel, sink)
            })?;
            print_harvest_summary(&result);
            result
        }
        OutputMode::NonInteractive => {
            install_interrupt_handler(&cancel)?;
            let source = open_page_source(harvester.settings(), &cancel)?;
            let result = harvester.run(source.as_ref(), &cancel, &JsonOutput)?;
            JsonOutput::print_harvest(&result).into_diagnostic()?;
            result
        }
    };

    Ok(if result.interrupted { EXIT_INTERRUPTED } else { 0 })
}

fn run_stats(args: StatsArgs, output_mode: OutputMode) -> miette::Result<u8> {
    let accession: Accession = args.accession.parse()?;
    let config = ConfigLoader::resolve(args.common.config.as_deref())?;
    let settings = Settings::without_keyword(config, overrides(&args.common))?;
    let transport = HttpTransport::new(settings.timeout)?;
    let harvester = Harvester::new(transport, settings);

    let cancel = CancelToken::new();
    install_interrupt_handler(&cancel)?;
    let stats = harvester.stats(accession.as_str(), args.repository.as_deref(), &cancel)?;

    match output_mode {
        OutputMode::NonInteractive => {
            JsonOutput::print_stats(&accession, args.repository.as_deref(), &stats)
                .into_diagnostic()?;
        }
        OutputMode::Interactive => {
            println!("{accession}: {}", stats.status.label());
            if let Some(strategy) = stats.strategy {
                println!("  strategy: {}", strategy.label());
            }
            if let Some(count) = stats.count() {
                println!("  raw files: {count}");
            }
            if let Some(size) = stats.size_gb() {
                println!("  total size: {size:.2} GB");
            }
        }
    }
    Ok(if cancel.is_cancelled() { EXIT_INTERRUPTED } else { 0 })
}

/// First Ctrl-C cancels the run so collected results still get exported;
/// a second one exits immediately.
fn install_interrupt_handler(cancel: &CancelToken) -> miette::Result<()> {
    let cancel = cancel.clone();
    let presses = AtomicUsize::new(0);
    ctrlc::set_handler(move || {
        if presses.fetch_add(1, Ordering::SeqCst) > 0 {
            std::process::exit(i32::from(EXIT_INTERRUPTED));
        }
        warn!("interrupt received; finishing with collected results");
        cancel.cancel();
    })
    .into_diagnostic()
}

fn print_harvest_summary(result: &HarvestResult) {
    println!("Keyword: {}", result.keyword);
    println!(
        "Datasets: {} (duplicates dropped: {})",
        result.datasets, result.duplicates_dropped
    );
    let statuses = &result.statuses;
    println!(
        "Statistics: ok {}, unsupported {}, failed {}, cancelled {}, skipped {}",
        statuses.ok, statuses.unsupported, statuses.fetch_failed, statuses.cancelled, statuses.skipped
    );
    if result.failure_rate > 0.0 {
        println!("Failure rate: {:.1}%", result.failure_rate * 100.0);
    }
    match &result.output_path {
        Some(path) => println!("Saved: {path}"),
        None => println!("No datasets found; nothing written"),
    }
    if result.interrupted {
        println!("Run was interrupted; unresolved datasets are marked cancelled");
    }
}
