use anyhow::{Context, Result, bail};
use clap::Parser;
use skylift::config::{self, EngineConfig};
use skylift::logging::{self, LogConfig};
use skylift::uploader::{
    FnProgress, ProgressUpdate, ProviderKind, SessionStatus, UploadParams, Uploader,
    UploaderConfig,
};
use skylift_api::{Client, ClientConfig};
use std::path::PathBuf;
use std::sync::Arc;

/// Upload large files to cloud object stores in parallel chunks
#[derive(Parser, Debug)]
#[command(name = "skylift", version, about)]
struct Cli {
    /// File to upload
    file: PathBuf,

    /// Storage provider: s3, google_drive or gcs
    #[arg(long, short = 'p')]
    provider: Option<String>,

    /// Chunk size: 256K, 512K, 1M, 2M, 4M, 8M or 16M
    #[arg(long, short = 'c')]
    chunk_size: Option<String>,

    /// Concurrent chunk transfers (1-8)
    #[arg(long, short = 'n')]
    concurrency: Option<usize>,

    /// Adapt the chunk size to network conditions mid-upload
    #[arg(long)]
    auto_tune: bool,

    /// Base URL of the upload control plane
    #[arg(long)]
    api_base: Option<String>,

    /// File name presented to the provider (defaults to the local name)
    #[arg(long)]
    filename: Option<String>,

    /// MIME type (guessed from the file name when omitted)
    #[arg(long)]
    mime_type: Option<String>,

    /// Path to a JSON config file with defaults for the options above
    #[arg(long)]
    config: Option<PathBuf>,

    /// Disable the rolling log file
    #[arg(long)]
    no_log_file: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let defaults = match &cli.config {
        Some(path) => EngineConfig::load(path)?,
        None => EngineConfig::default(),
    };

    let _log_guard = logging::init_logging(LogConfig {
        log_to_file: defaults.log_to_file && !cli.no_log_file,
        ..LogConfig::default()
    })
    .context("Failed to initialize logging")?;

    let provider_str = cli.provider.unwrap_or(defaults.storage_type);
    let provider = ProviderKind::parse(&provider_str)
        .with_context(|| format!("unknown provider '{}'", provider_str))?;

    let chunk_size_str = cli.chunk_size.unwrap_or(defaults.chunk_size);
    let chunk_size = config::parse_chunk_size(&chunk_size_str).with_context(|| {
        format!(
            "invalid chunk size '{}', expected one of {}",
            chunk_size_str,
            config::CHUNK_SIZE_CHOICES.join(", ")
        )
    })?;

    let api_base = cli.api_base.unwrap_or(defaults.api_base);
    let api = Arc::new(
        Client::new(ClientConfig::new(api_base)).context("Failed to create API client")?,
    );
    let uploader =
        Uploader::new(api, UploaderConfig::default()).context("Failed to create uploader")?;

    let params = UploadParams {
        file_path: cli.file,
        filename: cli.filename,
        mime_type: cli.mime_type,
        provider,
        chunk_size,
        concurrency: cli.concurrency.unwrap_or(defaults.concurrency),
        auto_tune: cli.auto_tune || defaults.auto_tune,
    };

    let progress = FnProgress(|update: ProgressUpdate| {
        tracing::info!(target: "main", "{:?}", update);
    });

    let handle = uploader.start(params, progress).await?;

    // Ctrl-C cancels the session cooperatively
    let cancel_token = handle.cancellation_token().clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!(target: "main", "Interrupt received, cancelling upload");
            cancel_token.cancel();
        }
    });

    let session = handle.join().await?;
    match session.status {
        SessionStatus::Completed => {
            let location = session.final_location.as_deref().unwrap_or_default();
            println!("{}", location);
            Ok(())
        }
        SessionStatus::Cancelled => bail!("upload cancelled"),
        _ => {
            let message = session
                .error
                .as_ref()
                .map(|e| e.message.clone())
                .unwrap_or_else(|| "upload failed".to_string());
            bail!(message)
        }
    }
}
