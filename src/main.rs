use clap::Parser;
use std::path::PathBuf;
use std::process::ExitCode;
use tracing_subscriber::EnvFilter;

use blocksend::{
    FileEntry, FileId, HashAlgorithm, HashMode, Pipeline, PipelineConfig, PipelineObserver,
    PipelineReport,
};

/// Upload files block by block, skipping blocks the server already has.
#[derive(Debug, Parser)]
#[command(name = "blocksend", version)]
struct Args {
    /// Upload endpoint URL
    endpoint: String,

    /// Files to upload
    files: Vec<PathBuf>,

    /// JSON config file; the endpoint and flags override it
    #[arg(long)]
    config: Option<PathBuf>,

    /// Block size in bytes
    #[arg(long)]
    block_size: Option<u64>,

    /// Content hash: blake3 (default) or sha256
    #[arg(long)]
    hash: Option<String>,

    /// Hash on a background thread
    #[arg(long)]
    worker: bool,
}

struct ConsoleObserver {
    names: Vec<(FileId, String)>,
}

impl ConsoleObserver {
    fn name<'a>(&'a self, file_id: &'a FileId) -> &'a str {
        self.names
            .iter()
            .find(|(id, _)| id == file_id)
            .map_or(file_id.as_str(), |(_, name)| name.as_str())
    }
}

impl PipelineObserver for ConsoleObserver {
    fn on_file_progress(&mut self, file_id: &FileId, uploaded: u64, total: u64) {
        tracing::debug!(file = self.name(file_id), uploaded, total, "progress");
    }

    fn on_file_complete(&mut self, file_id: &FileId) {
        println!("uploaded  {}", self.name(file_id));
    }

    fn on_file_failed(&mut self, file_id: &FileId, error: &str) {
        println!("failed    {}: {error}", self.name(file_id));
    }

    fn on_file_cancelled(&mut self, file_id: &FileId) {
        println!("cancelled {}", self.name(file_id));
    }

    fn on_drain(&mut self, report: &PipelineReport) {
        println!(
            "{} uploaded, {} failed, {} bytes ({} blocks sent, {} already stored)",
            report.completed.len(),
            report.failed.len(),
            report.bytes_uploaded,
            report.blocks_transferred,
            report.blocks_deduplicated,
        );
    }
}

fn load_config(args: &Args) -> blocksend::Result<PipelineConfig> {
    let mut config = match &args.config {
        Some(path) => PipelineConfig::from_json_file(path)?,
        None => PipelineConfig::default(),
    };

    config.endpoint.clone_from(&args.endpoint);
    if let Some(block_size) = args.block_size {
        config.block_size = block_size;
    }
    if let Some(name) = &args.hash {
        config.hash_algorithm = HashAlgorithm::from_name(name)
            .ok_or_else(|| blocksend::Error::ConfigError(format!("unknown hash {name:?}")))?;
    }
    if args.worker {
        config.hash_mode = HashMode::Worker;
    }

    config.validate()?;
    Ok(config)
}

async fn run(args: Args) -> blocksend::Result<PipelineReport> {
    let config = load_config(&args)?;

    let mut entries = Vec::with_capacity(args.files.len());
    for path in &args.files {
        entries.push(FileEntry::open(path).await?);
    }
    let names = entries
        .iter()
        .map(|entry| {
            (
                FileId::from_name(&entry.name, config.hash_algorithm),
                entry.name.clone(),
            )
        })
        .collect();

    let mut pipeline = Pipeline::new(config)?.with_observer(ConsoleObserver { names });
    pipeline.pipeline_files(entries).await
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    match run(Args::parse()).await {
        Ok(report) if report.is_success() => ExitCode::SUCCESS,
        Ok(_) => ExitCode::FAILURE,
        Err(err) => {
            tracing::error!("{err}");
            ExitCode::FAILURE
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_console_names_fall_back_to_file_id() {
        let known = FileId::from_name("notes.txt", HashAlgorithm::Blake3);
        let unknown = FileId::from_name("other.txt", HashAlgorithm::Blake3);
        let observer = ConsoleObserver {
            names: vec![(known.clone(), "notes.txt".into())],
        };

        assert_eq!(observer.name(&known), "notes.txt");
        assert_eq!(observer.name(&unknown), unknown.as_str());
    }
}
