//! # rar-hunter CLI
//!
//! ```bash
//! # Extract every complete RAR set under ~/downloads
//! rar-hunter ~/downloads
//!
//! # Only report what would be extracted
//! rar-hunter --dry-run -v ~/downloads
//! ```
//!
//! Exits with status 1 when any extraction failed or the hunt could not run.

use clap::Parser;
use rar_hunter::{CliArchiver, Config, HuntReport, Hunter};
use std::path::PathBuf;
use std::process::ExitCode;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "rar-hunter")]
#[command(about = "Find complete RAR sets and extract them")]
#[command(version)]
struct Cli {
    /// Directory to search
    root: PathBuf,

    /// Path to a TOML config file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Number of event dispatch workers
    #[arg(long)]
    workers: Option<usize>,

    /// Path to the unrar binary (default: search PATH)
    #[arg(long)]
    unrar: Option<PathBuf>,

    /// Maximum number of archives extracted at once
    #[arg(long)]
    max_concurrent: Option<usize>,

    /// Report what would be extracted without extracting
    #[arg(long)]
    dry_run: bool,

    /// More logging (-v debug, -vv trace); RUST_LOG overrides
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
}

impl Cli {
    fn load_config(&self) -> rar_hunter::Result<Config> {
        let mut config = match &self.config {
            Some(path) => Config::load(path)?,
            None => Config::default(),
        };
        if let Some(workers) = self.workers {
            config.bus.workers = workers;
        }
        if let Some(unrar) = &self.unrar {
            config.tools.unrar_path = Some(unrar.clone());
        }
        if let Some(max) = self.max_concurrent {
            config.runner.max_concurrent = Some(max);
        }
        if self.dry_run {
            config.hunt.dry_run = true;
        }
        config.validate()?;
        Ok(config)
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    match run(&cli).await {
        Ok(report) => print_report(&report),
        Err(e) => {
            eprintln!("{e}");
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: &Cli) -> rar_hunter::Result<HuntReport> {
    let config = cli.load_config()?;
    let archiver = CliArchiver::from_config(&config.tools)?;

    let cancel = CancellationToken::new();
    let signals = tokio::spawn(rar_hunter::cancel_on_signal(cancel.clone()));

    let hunter = Hunter::new(config, archiver, cancel.clone());
    let result = hunter.run(&cli.root).await;

    // Release the signal task
    cancel.cancel();
    let _ = signals.await;
    result
}

fn print_report(report: &HuntReport) -> ExitCode {
    eprintln!("skipped {} dirs", report.skipped_count());
    if report.unresolved > 0 {
        eprintln!("{} dirs were never validated", report.unresolved);
    }

    if report.run.is_empty() {
        for target in &report.targets {
            println!("{}", target.path().display());
        }
    }

    match report.error() {
        Some(err) => {
            eprintln!("{err}");
            ExitCode::FAILURE
        }
        None => ExitCode::SUCCESS,
    }
}

fn init_tracing(verbose: u8) {
    let default = match verbose {
        0 => "rar_hunter=info",
        1 => "rar_hunter=debug",
        _ => "rar_hunter=trace",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}
