//! Chunkwise command-line uploader.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result, bail};
use chunkwise_http::HttpRemote;
use chunkwise_upload::{
    ChunkOutcome, DiskFile, FileHandle, TransferConfig, UploadEvent, UploadOrchestrator,
    UploadRequest, UploadStatus,
};
use clap::Parser;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "chunkwise-cli")]
#[command(about = "Upload a file to a chunk store, resuming where it left off")]
#[command(version)]
struct Cli {
    /// File to upload
    file: PathBuf,

    /// Store base URL, e.g. http://localhost:4000
    #[arg(long, env = "CHUNKWISE_SERVER")]
    server: String,

    /// Identifier the store keys chunks by (default: the file name)
    #[arg(long)]
    file_id: Option<String>,

    /// JSON transfer config file
    #[arg(long, env = "CHUNKWISE_CONFIG")]
    config: Option<PathBuf>,

    /// Chunk size in bytes (overrides config)
    #[arg(long)]
    chunk_size: Option<u64>,

    /// Chunks in flight at once (overrides config)
    #[arg(long)]
    concurrency: Option<usize>,

    /// Re-attempts per chunk after a transient failure (overrides config)
    #[arg(long)]
    max_retries: Option<u32>,
}

impl Cli {
    async fn transfer_config(&self) -> Result<TransferConfig> {
        let mut config = match &self.config {
            Some(path) => TransferConfig::load(path)
                .await
                .with_context(|| format!("failed to load config {}", path.display()))?,
            None => TransferConfig::default(),
        };
        if let Some(chunk_size) = self.chunk_size {
            config.chunk_size = chunk_size;
        }
        if let Some(concurrency) = self.concurrency {
            config.concurrency_limit = concurrency;
        }
        if let Some(max_retries) = self.max_retries {
            config.max_retries = max_retries;
        }
        config.validate()?;
        Ok(config)
    }

    fn file_id(&self) -> Result<String> {
        if let Some(id) = &self.file_id {
            return Ok(id.clone());
        }
        default_file_id(&self.file)
    }
}

fn default_file_id(path: &Path) -> Result<String> {
    path.file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .with_context(|| format!("cannot derive a file id from {}", path.display()))
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let rt = tokio::runtime::Runtime::new()?;
    rt.block_on(run(cli))
}

async fn run(cli: Cli) -> Result<()> {
    let config = cli.transfer_config().await?;
    let file_id = cli.file_id()?;
    let remote = Arc::new(HttpRemote::new(&cli.server).context("invalid --server")?);
    let file = DiskFile::open(&cli.file)
        .await
        .with_context(|| format!("failed to open {}", cli.file.display()))?;

    info!(
        file = %cli.file.display(),
        file_id = %file_id,
        server = %remote.base_url(),
        size = file.len(),
        "starting upload"
    );

    let mut orchestrator = UploadOrchestrator::with_remote(remote, config);
    let events = orchestrator
        .take_events()
        .context("event stream already taken")?;
    let reporter = tokio::spawn(report_events(events));

    let cancel = orchestrator.session_token();
    let interrupt = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("interrupt received, stopping after in-flight chunks");
            interrupt.cancel();
        }
    });

    let outcome = orchestrator
        .upload(UploadRequest::for_file(file_id, file).with_cancel(cancel))
        .await;
    drop(orchestrator);
    let _ = reporter.await;

    let outcome = outcome.context("upload failed")?;
    match outcome.status {
        UploadStatus::Completed => {
            info!(chunks = outcome.total_chunks, "upload complete");
            Ok(())
        }
        UploadStatus::PartiallyFailed => bail!(
            "{} of {} chunks failed ({:?}); run again to retry them",
            outcome.failed_indices.len(),
            outcome.total_chunks,
            outcome.failed_indices
        ),
        UploadStatus::Cancelled => bail!(
            "upload cancelled at {}% ({} of {} chunks stored)",
            outcome.progress,
            outcome.uploaded_chunks,
            outcome.total_chunks
        ),
        UploadStatus::Aborted => bail!(
            "upload aborted: {}",
            outcome.abort_reason.unwrap_or_default()
        ),
    }
}

/// Logs session events until the orchestrator is dropped.
async fn report_events(mut events: tokio::sync::mpsc::UnboundedReceiver<UploadEvent>) {
    let mut last_percent = None;
    while let Some(event) = events.recv().await {
        match event {
            UploadEvent::Progress { percent, .. } if last_percent != Some(percent) => {
                last_percent = Some(percent);
                info!(percent, "progress");
            }
            UploadEvent::Chunk {
                index,
                outcome: ChunkOutcome::Success { bytes_per_second, .. },
                ..
            } => {
                tracing::debug!(index, kib_per_second = bytes_per_second / 1024.0, "chunk stored");
            }
            UploadEvent::StateChanged { state, .. } => info!(state = ?state, "session state"),
            _ => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chunkwise_upload::RetryBackoff;

    #[test]
    fn parses_flags() {
        let cli = Cli::try_parse_from([
            "chunkwise-cli",
            "movie.mkv",
            "--server",
            "http://localhost:4000",
            "--chunk-size",
            "1048576",
            "--concurrency",
            "4",
        ])
        .unwrap();
        assert_eq!(cli.file, PathBuf::from("movie.mkv"));
        assert_eq!(cli.chunk_size, Some(1_048_576));
        assert_eq!(cli.concurrency, Some(4));
        assert!(cli.max_retries.is_none());
    }

    #[test]
    fn file_id_defaults_to_file_name() {
        let cli = Cli::try_parse_from([
            "chunkwise-cli",
            "/videos/movie.mkv",
            "--server",
            "http://localhost:4000",
        ])
        .unwrap();
        assert_eq!(cli.file_id().unwrap(), "movie.mkv");
        assert!(default_file_id(Path::new("/")).is_err());
    }

    #[tokio::test]
    async fn flags_override_config_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("transfer.json");
        std::fs::write(
            &path,
            r#"{"chunkSize":4096,"maxRetries":1,"retryBackoff":{"kind":"none"}}"#,
        )
        .unwrap();

        let cli = Cli::try_parse_from([
            "chunkwise-cli",
            "movie.mkv",
            "--server",
            "http://localhost:4000",
            "--config",
            path.to_str().unwrap(),
            "--max-retries",
            "5",
        ])
        .unwrap();
        let config = cli.transfer_config().await.unwrap();
        assert_eq!(config.chunk_size, 4096);
        assert_eq!(config.max_retries, 5);
        assert!(matches!(config.retry_backoff, RetryBackoff::None));
    }

    #[tokio::test]
    async fn zero_concurrency_rejected() {
        let cli = Cli::try_parse_from([
            "chunkwise-cli",
            "movie.mkv",
            "--server",
            "http://localhost:4000",
            "--concurrency",
            "0",
        ])
        .unwrap();
        assert!(cli.transfer_config().await.is_err());
    }
}
