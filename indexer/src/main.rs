use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use pkgsearch_core::persist::SledStore;
use pkgsearch_core::refresh::build_index;
use pkgsearch_core::store::validate;
use pkgsearch_core::{BatchReport, InsertOutcome, PackageRecord, RecordSource, RecordStore, StoreError};
use tracing_subscriber::{EnvFilter, fmt};
use walkdir::WalkDir;

use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};

#[derive(Parser)]
#[command(name = "pkgsearch-indexer")]
#[command(about = "Load package records into the search record store", long_about = None)]
#[command(after_help = "The server holds a lock on its store while it runs: use `push` to feed a running server and `load` only for an offline store.")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Load records from JSON/JSONL files or a directory of them
    Load {
        /// Input path (file or directory)
        #[arg(long)]
        input: String,
        /// Record store directory
        #[arg(long)]
        store: String,
    },
    /// Send records to a running server in batches
    Push {
        /// Input path (file or directory)
        #[arg(long)]
        input: String,
        /// Server base URL
        #[arg(long, default_value = "http://127.0.0.1:8080")]
        server: String,
        #[arg(long, env = "ADMIN_TOKEN", hide_env_values = true)]
        token: String,
        /// Records per request
        #[arg(long, default_value_t = 100)]
        batch_size: usize,
    },
    /// Build an index from the store without serving it and report what it holds
    Check {
        #[arg(long)]
        store: String,
    },
}

#[derive(Debug, Default, PartialEq, Eq)]
struct LoadReport {
    stored: usize,
    duplicates: usize,
    invalid: usize,
}

#[derive(Debug, Default, PartialEq, Eq)]
struct PushReport {
    batches: usize,
    inserted: usize,
    replaced: usize,
    stale: usize,
    invalid: usize,
}

#[tokio::main]
async fn main() -> Result<()> {
    fmt().with_env_filter(EnvFilter::from_default_env()).init();
    let cli = Cli::parse();

    match cli.command {
        Commands::Push { input, server, token, batch_size } => {
            let report = push(Path::new(&input), &server, &token, batch_size).await?;
            tracing::info!(
                batches = report.batches,
                inserted = report.inserted,
                replaced = report.replaced,
                stale = report.stale,
                invalid = report.invalid,
                "push complete"
            );
            Ok(())
        }
        Commands::Load { input, store } => {
            let store = SledStore::open(&store)
                .with_context(|| format!("open store {store} (use `push` while the server is running)"))?;
            let report = load(Path::new(&input), &store)?;
            store.flush()?;
            tracing::info!(stored = report.stored, duplicates = report.duplicates, invalid = report.invalid, "load complete");
            Ok(())
        }
        Commands::Check { store } => {
            let store = SledStore::open(&store).with_context(|| format!("open store {store}"))?;
            let (index, report) = build_index(store.scan_all()?);
            tracing::info!(
                records = report.records,
                documents = report.documents,
                skipped = report.skipped,
                superseded = report.superseded,
                terms = index.num_terms(),
                "store check complete"
            );
            Ok(())
        }
    }
}

fn input_files(input_path: &Path) -> Vec<PathBuf> {
    let mut files: Vec<PathBuf> = Vec::new();
    if input_path.is_dir() {
        for entry in WalkDir::new(input_path).into_iter().filter_map(|e| e.ok()) {
            let p = entry.path();
            if p.is_file() {
                if let Some(ext) = p.extension().and_then(|s| s.to_str()) {
                    if matches!(ext, "json" | "jsonl") {
                        files.push(p.to_path_buf());
                    }
                }
            }
        }
        files.sort();
    } else if input_path.is_file() {
        files.push(input_path.to_path_buf());
    }
    files
}

fn load(input: &Path, store: &impl RecordStore) -> Result<LoadReport> {
    let mut report = LoadReport::default();
    for record in read_records(input)? {
        store_record(store, record, &mut report)?;
    }
    Ok(report)
}

fn read_records(input: &Path) -> Result<Vec<PackageRecord>> {
    let mut records = Vec::new();
    for file in input_files(input) {
        if file.extension().and_then(|s| s.to_str()) == Some("jsonl") {
            records.extend(read_jsonl(&file)?);
        } else {
            records.extend(read_json(&file)?);
        }
    }
    Ok(records)
}

/// Post records to `/packages/batch`. Invalid records are dropped here so one
/// bad record cannot reject a whole batch on the server.
async fn push(input: &Path, server: &str, token: &str, batch_size: usize) -> Result<PushReport> {
    let mut report = PushReport::default();
    let mut records = read_records(input)?;
    records.retain(|record| match validate(record) {
        Ok(()) => true,
        Err(e) => {
            tracing::warn!(path = %record.package_path, error = %e, "skipping invalid record");
            report.invalid += 1;
            false
        }
    });

    let client = reqwest::Client::new();
    let url = format!("{}/packages/batch", server.trim_end_matches('/'));
    for chunk in records.chunks(batch_size.max(1)) {
        let resp = client.post(&url).header("X-ADMIN-TOKEN", token).json(chunk).send().await?;
        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            anyhow::bail!("{url}: {status}: {body}");
        }
        let batch: BatchReport = resp.json().await?;
        tracing::debug!(generation = batch.generation, records = chunk.len(), "batch accepted");
        report.batches += 1;
        for outcome in batch.outcomes {
            match outcome {
                InsertOutcome::Inserted => report.inserted += 1,
                InsertOutcome::Replaced => report.replaced += 1,
                InsertOutcome::Stale => report.stale += 1,
            }
        }
    }
    Ok(report)
}

fn store_record(store: &impl RecordStore, record: PackageRecord, report: &mut LoadReport) -> Result<()> {
    let path = record.package_path.clone();
    match store.put(record) {
        Ok(true) => report.stored += 1,
        Ok(false) => report.duplicates += 1,
        Err(StoreError::Invalid(e)) => {
            tracing::warn!(%path, error = %e, "skipping invalid record");
            report.invalid += 1;
        }
        Err(e) => return Err(e.into()),
    }
    Ok(())
}

fn read_jsonl(file: &Path) -> Result<Vec<PackageRecord>> {
    let f = File::open(file)?;
    let reader = BufReader::new(f);
    let mut out = Vec::new();
    for (n, line) in reader.lines().enumerate() {
        let line = line?;
        if line.trim().is_empty() { continue; }
        let record = serde_json::from_str(&line)
            .with_context(|| format!("{}:{}", file.display(), n + 1))?;
        out.push(record);
    }
    Ok(out)
}

fn read_json(file: &Path) -> Result<Vec<PackageRecord>> {
    let f = File::open(file)?;
    let reader = BufReader::new(f);
    let json: serde_json::Value = serde_json::from_reader(reader)?;
    let records = match json {
        serde_json::Value::Array(arr) => arr
            .into_iter()
            .map(serde_json::from_value)
            .collect::<Result<Vec<_>, _>>()?,
        serde_json::Value::Object(_) => vec![serde_json::from_value(json)?],
        _ => Vec::new(),
    };
    Ok(records)
}
