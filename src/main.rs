//! mftscan CLI
//!
//! Command-line front end: streams scan results to stdout, optionally sorted
//! and checked against the live filesystem.

use clap::{Parser, Subcommand, ValueEnum};
use console::style;
use indicatif::{HumanDuration, ProgressBar, ProgressStyle};
use mftscan::{
    probe_existence, CancelToken, MftScanError, ScanConfig, ScanStream, Scanner, UsnEntry,
    VolumeProvider,
};
use serde::Serialize;
use std::io::{BufWriter, Write};
use std::time::{Duration, Instant};

/// mftscan - NTFS file enumerator
///
/// Reads every volume's USN change journal directly and rebuilds full
/// paths, without walking the directory tree. Requires administrator rights.
#[derive(Parser)]
#[command(name = "mftscan")]
#[command(author = "mftscan Contributors")]
#[command(version)]
#[command(about = "NTFS file enumerator built on the USN journal", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Increase log verbosity (-v info, -vv debug, -vvv trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// Write logs to mftscan.log next to the executable
    #[arg(long, global = true)]
    log_file: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// List every file on every ready fixed volume
    Full {
        #[command(flatten)]
        output: OutputArgs,
    },

    /// List files below a folder
    Folder {
        /// Folder to restrict the scan to (e.g. C:\Users\me\Downloads)
        path: String,

        /// Only keep these extensions (repeat or comma-separate: -e pdf,zip)
        #[arg(short, long = "ext", value_delimiter = ',')]
        extensions: Vec<String>,

        #[command(flatten)]
        output: OutputArgs,
    },

    /// List ready fixed volumes
    Volumes,
}

#[derive(clap::Args)]
struct OutputArgs {
    /// Sort results by path (waits for the whole scan)
    #[arg(long)]
    sort: bool,

    /// Check each result on disk and show its creation time
    #[arg(long)]
    probe: bool,

    /// Stop after this many results
    #[arg(long)]
    limit: Option<usize>,

    /// Output format
    #[arg(short, long, value_enum, default_value_t = Format::Text)]
    format: Format,

    /// Maximum volumes scanned at once
    #[arg(long)]
    parallel: Option<usize>,

    /// Result channel capacity
    #[arg(long, default_value = "10000")]
    capacity: usize,
}

#[derive(Clone, Copy, PartialEq, Eq, ValueEnum)]
enum Format {
    Text,
    Json,
}

fn main() {
    let cli = Cli::parse();

    mftscan::logging::init(cli.verbose, cli.log_file);
    tracing::info!("mftscan {} starting up", mftscan::VERSION);

    #[cfg(windows)]
    let result = run(Scanner::new(mftscan::ntfs::SystemVolumes), cli.command);

    #[cfg(not(windows))]
    let result: mftscan::Result<()> = Err(MftScanError::Unsupported);

    if let Err(e) = result {
        eprintln!("{} {}", style("Error:").red().bold(), e);
        std::process::exit(1);
    }
}

#[cfg_attr(not(windows), allow(dead_code))]
fn run<P: VolumeProvider + 'static>(scanner: Scanner<P>, command: Commands) -> mftscan::Result<()> {
    match command {
        Commands::Full { output } => {
            let scanner = scanner.with_config(config_for(&output));
            let cancel = CancelToken::new();
            let stream = scanner.scan_full(cancel.clone())?;
            cmd_scan(stream, cancel, &output)
        }

        Commands::Folder {
            path,
            extensions,
            output,
        } => {
            let scanner = scanner.with_config(config_for(&output));
            let cancel = CancelToken::new();
            let stream = scanner.scan_folder(&path, &extensions, cancel.clone())?;
            cmd_scan(stream, cancel, &output)
        }

        Commands::Volumes => cmd_volumes(&scanner),
    }
}

#[cfg_attr(not(windows), allow(dead_code))]
fn config_for(output: &OutputArgs) -> ScanConfig {
    ScanConfig::default()
        .with_channel_capacity(output.capacity)
        .with_max_parallel_volumes(output.parallel)
}

/// Stream (or collect and sort) results, then report per-volume outcomes
#[cfg_attr(not(windows), allow(dead_code))]
fn cmd_scan(
    mut stream: ScanStream,
    cancel: CancelToken,
    output: &OutputArgs,
) -> mftscan::Result<()> {
    let start = Instant::now();
    let stdout = std::io::stdout();
    let mut out = BufWriter::new(stdout.lock());

    let pb = ProgressBar::new_spinner();
    pb.set_style(
        ProgressStyle::default_spinner()
            .template("{spinner:.green} [{elapsed_precise}] {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner()),
    );
    pb.enable_steady_tick(Duration::from_millis(120));
    pb.set_message("Enumerating volumes...");

    let limit = output.limit.unwrap_or(usize::MAX);
    let mut count = 0usize;
    let mut collected = Vec::new();

    for entry in stream.by_ref() {
        if count >= limit {
            break;
        }
        count += 1;
        if count == limit {
            cancel.cancel();
        }
        if count % 10_000 == 0 {
            pb.set_message(format!("{} files", count));
        }

        if output.sort {
            collected.push(entry);
        } else {
            pb.suspend(|| print_entry(&mut out, &entry, output))?;
        }
    }

    if count >= limit {
        cancel.cancel();
    }

    if output.sort {
        pb.set_message(format!("Sorting {} files...", collected.len()));
        collected.sort_by(|a, b| a.full_path.cmp(&b.full_path));
        pb.suspend(|| -> std::io::Result<()> {
            for entry in &collected {
                print_entry(&mut out, entry, output)?;
            }
            Ok(())
        })?;
    }
    out.flush()?;
    pb.finish_and_clear();

    let outcome = stream.finish();

    eprintln!(
        "{} {} files in {}",
        style("✓").green().bold(),
        count,
        style(HumanDuration(start.elapsed())).cyan()
    );

    match outcome {
        Ok(summary) => {
            for (volume, stats) in &summary.completed {
                tracing::info!(
                    volume = %volume,
                    records = stats.enumeration.records,
                    emitted = stats.emitted,
                    "volume done"
                );
            }
            if !summary.cancelled.is_empty() && output.limit.is_none() {
                eprintln!("  {} scan cancelled", style("!").yellow());
            }
            Ok(())
        }
        Err(MftScanError::VolumesFailed(failures)) => {
            for failure in &failures {
                eprintln!(
                    "  {} {}: {}",
                    style("✗").red(),
                    style(&failure.volume).yellow(),
                    failure.error
                );
            }
            Err(MftScanError::VolumesFailed(failures))
        }
        Err(e) => Err(e),
    }
}

#[derive(Serialize)]
struct JsonEntry<'a> {
    #[serde(flatten)]
    entry: &'a UsnEntry,
    #[serde(skip_serializing_if = "Option::is_none")]
    exists: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    created_at: Option<String>,
}

fn print_entry(out: &mut impl Write, entry: &UsnEntry, output: &OutputArgs) -> std::io::Result<()> {
    let path = entry.full_path.as_deref().unwrap_or(&entry.name);
    let probe = output.probe.then(|| probe_existence(path));

    match output.format {
        Format::Json => {
            let created_at = probe
                .and_then(|p| p.created_at)
                .map(|t| t.to_rfc3339());
            let line = JsonEntry {
                entry,
                exists: probe.map(|p| p.exists),
                created_at,
            };
            serde_json::to_writer(&mut *out, &line)?;
            writeln!(out)
        }
        Format::Text => match probe {
            None => writeln!(out, "{}", path),
            Some(p) if p.exists => {
                let created = p
                    .created_at
                    .map(|t| t.format("%Y-%m-%d %H:%M:%S").to_string())
                    .unwrap_or_else(|| "-------------------".to_string());
                writeln!(out, "{} {}", created, path)
            }
            Some(_) => writeln!(out, "{} {}", style("DELETED            ").red(), path),
        },
    }
}

/// List volumes command
#[cfg_attr(not(windows), allow(dead_code))]
fn cmd_volumes<P: VolumeProvider + 'static>(scanner: &Scanner<P>) -> mftscan::Result<()> {
    let volumes = scanner.provider().ready_fixed_volumes()?;

    if volumes.is_empty() {
        println!("  No ready fixed volumes found.");
    } else {
        println!("Ready fixed volumes:");
        println!();
        for volume in volumes {
            println!("  {} {}", style("•").green(), volume);
        }
    }

    Ok(())
}
