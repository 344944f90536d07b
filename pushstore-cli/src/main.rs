//! CLI for pushstore persistence files.
//!
//! Provides commands for inspecting, compacting, and benchmarking the store.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use clap::{Parser, Subcommand, ValueEnum};
use pushstore::codec::restore_index;
use pushstore::persist::{load, write_atomic};
use pushstore::proto::{LabelPair, Metric, MetricFamily, MetricType};
use pushstore::{DiskMetricStore, Index, StoreConfig, WriteRequest};
use serde::Serialize;
use tracing_subscriber::EnvFilter;

/// pushstore: in-memory metric store with crash-safe persistence.
#[derive(Parser)]
#[command(name = "pushstore", version, about)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

/// Available CLI commands.
#[derive(Subcommand)]
enum Commands {
    /// List the jobs, instances, and families in a persistence file.
    Inspect {
        /// Path to the persistence file.
        file: PathBuf,

        /// Output format.
        #[arg(long, default_value = "text")]
        format: OutputFormat,
    },

    /// Rewrite a persistence file, dropping duplicate and empty families.
    Compact {
        /// Path to the persistence file.
        file: PathBuf,
    },

    /// Run a concurrent write-path benchmark.
    Bench {
        /// Number of concurrent writer threads.
        #[arg(long, default_value = "4")]
        writers: u32,

        /// Number of write requests per writer.
        #[arg(long, default_value = "10000")]
        requests: u32,

        /// Persist to this file while the benchmark runs.
        #[arg(long)]
        file: Option<PathBuf>,

        /// Persistence interval in milliseconds.
        #[arg(long, default_value = "1000")]
        interval_ms: u64,
    },
}

/// Output format for `inspect`.
#[derive(Clone, ValueEnum)]
enum OutputFormat {
    /// Human-readable listing grouped by job and instance.
    Text,
    /// JSON array of families.
    Json,
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    let result = match cli.command {
        Commands::Inspect { file, format } => cmd_inspect(&file, &format),
        Commands::Compact { file } => cmd_compact(&file),
        Commands::Bench {
            writers,
            requests,
            file,
            interval_ms,
        } => cmd_bench(writers, requests, file, Duration::from_millis(interval_ms)),
    };

    if let Err(e) = result {
        eprintln!("Error: {e}");
        std::process::exit(1);
    }
}

/// One family as shown by `inspect`.
#[derive(Serialize)]
struct FamilyView {
    job: String,
    instance: String,
    name: String,
    #[serde(rename = "type")]
    kind: &'static str,
    help: String,
    samples: usize,
    /// Push time as Unix seconds; negative before the epoch.
    pushed_at: f64,
}

/// Loads the persistence file at `file` into an index.
fn load_index(file: &Path) -> Result<(Index, usize), Box<dyn std::error::Error>> {
    let records = load(file)?
        .ok_or_else(|| format!("No persistence file at '{}'", file.display()))?;
    let count = records.len();
    tracing::debug!("loaded {count} records from '{}'", file.display());
    Ok((restore_index(records), count))
}

/// Implements `pushstore inspect <file>`.
fn cmd_inspect(file: &Path, format: &OutputFormat) -> Result<(), Box<dyn std::error::Error>> {
    let (index, _) = load_index(file)?;

    let mut views: Vec<FamilyView> = index
        .iter()
        .map(|(job, instance, family)| FamilyView {
            job: job.to_string(),
            instance: instance.to_string(),
            name: family.name().to_string(),
            kind: type_name(family.family.r#type()),
            help: family.family.help.clone(),
            samples: family.sample_count(),
            pushed_at: unix_seconds(family.timestamp),
        })
        .collect();
    views.sort_by(|a, b| {
        (&a.job, &a.instance, &a.name).cmp(&(&b.job, &b.instance, &b.name))
    });

    match format {
        OutputFormat::Text => {
            let size = std::fs::metadata(file)?.len();
            println!("File: {}", file.display());
            println!("Size: {} ({size} bytes)", format_bytes(size));
            println!("Jobs: {}", index.job_count());
            println!("Families: {}", views.len());

            let mut current: Option<(&str, &str)> = None;
            for view in &views {
                let key = (view.job.as_str(), view.instance.as_str());
                if current.map(|(job, _)| job) != Some(key.0) {
                    println!();
                    println!("Job \"{}\"", view.job);
                }
                if current != Some(key) {
                    let instance = if view.instance.is_empty() {
                        "(none)"
                    } else {
                        &view.instance
                    };
                    println!("  Instance {instance}");
                }
                current = Some(key);
                println!(
                    "    - {} ({}, {} samples, pushed at {:.3})",
                    view.name, view.kind, view.samples, view.pushed_at
                );
            }
        }
        OutputFormat::Json => {
            println!("{}", serde_json::to_string_pretty(&views)?);
        }
    }

    Ok(())
}

/// Implements `pushstore compact <file>`.
fn cmd_compact(file: &Path) -> Result<(), Box<dyn std::error::Error>> {
    let before = std::fs::metadata(file)?.len();
    let (index, records) = load_index(file)?;

    let kept = index.timestamped_families();
    let written = write_atomic(file, &kept)?;
    let after = std::fs::metadata(file)?.len();

    println!("Compacted {}", file.display());
    println!("  Records: {records} -> {written}");
    println!("  Size: {} -> {}", format_bytes(before), format_bytes(after));

    Ok(())
}

/// Implements `pushstore bench`.
#[allow(clippy::cast_precision_loss)] // Benchmark stats are fine with f64 precision
fn cmd_bench(
    writers: u32,
    requests: u32,
    file: Option<PathBuf>,
    interval: Duration,
) -> Result<(), Box<dyn std::error::Error>> {
    println!("pushstore write-path benchmark");
    println!("  Writers: {writers}");
    println!("  Requests per writer: {requests}");
    match &file {
        Some(path) => println!("  Persistence: {} every {interval:?}", path.display()),
        None => println!("  Persistence: disabled"),
    }
    println!();

    let mut config = StoreConfig::default().with_persistence_interval(interval);
    if let Some(path) = &file {
        config = config.with_persistence_file(path);
    }
    let store = Arc::new(DiskMetricStore::open(config)?);

    let start = Instant::now();
    let handles: Vec<_> = (0..writers)
        .map(|w| {
            let store = Arc::clone(&store);
            thread::spawn(move || -> pushstore::Result<()> {
                let job = format!("bench_{w}");
                for i in 0..requests {
                    let instance = format!("host-{}", i % 100);
                    let family = MetricFamily::new(
                        "bench_requests_total",
                        MetricType::Counter,
                        vec![Metric::counter(
                            vec![
                                LabelPair::new("job", job.as_str()),
                                LabelPair::new("instance", instance.as_str()),
                            ],
                            f64::from(i),
                        )],
                    );
                    store.submit(WriteRequest::upsert_families(
                        &job,
                        &instance,
                        [family],
                        SystemTime::now(),
                    ))?;
                }
                Ok(())
            })
        })
        .collect();

    for handle in handles {
        handle
            .join()
            .map_err(|_| "writer thread panicked")??;
    }
    let submitted = start.elapsed();

    let shutdown_start = Instant::now();
    store.shutdown()?;
    let shutdown = shutdown_start.elapsed();

    let total = u64::from(writers) * u64::from(requests);
    let ns_per_write = submitted.as_nanos() as f64 / total.max(1) as f64;
    let writes_per_sec = total as f64 / submitted.as_secs_f64();

    println!("Results:");
    println!("  Total requests: {total}");
    println!("  Families stored: {}", store.family_count());
    println!("  Elapsed: {submitted:.3?}");
    println!("  Avg latency: {ns_per_write:.1} ns/request");
    println!("  Throughput: {writes_per_sec:.0} requests/sec");
    println!("  Shutdown (drain + final persist): {shutdown:.3?}");
    if let Some(path) = &file {
        let size = std::fs::metadata(path)?.len();
        println!("  File size: {} ({size} bytes)", format_bytes(size));
    }

    Ok(())
}

fn type_name(kind: MetricType) -> &'static str {
    match kind {
        MetricType::Counter => "counter",
        MetricType::Gauge => "gauge",
        MetricType::Summary => "summary",
        MetricType::Untyped => "untyped",
        MetricType::Histogram => "histogram",
    }
}

/// Converts a push time to fractional Unix seconds.
fn unix_seconds(time: SystemTime) -> f64 {
    match time.duration_since(UNIX_EPOCH) {
        Ok(after) => after.as_secs_f64(),
        Err(before) => -before.duration().as_secs_f64(),
    }
}

/// Formats a byte count as a human-readable string.
#[allow(clippy::cast_precision_loss)] // Byte counts are display-only
fn format_bytes(bytes: u64) -> String {
    if bytes >= 1_048_576 {
        format!("{:.1} MiB", bytes as f64 / 1_048_576.0)
    } else if bytes >= 1024 {
        format!("{:.1} KiB", bytes as f64 / 1024.0)
    } else {
        format!("{bytes} B")
    }
}
