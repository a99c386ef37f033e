//! sliceup command-line client.

mod adapter;

use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use clap::{Args, Parser, Subcommand};
use sliceup_protocol::StorageMode;
use sliceup_uploader::types::default_cache_dir;
use sliceup_uploader::{ProgressStore, UploadError, UploadOptions, Uploader};
use tracing_subscriber::EnvFilter;

use crate::adapter::WsTransport;

const DEFAULT_SERVER: &str = "ws://127.0.0.1:8080/ws";

#[derive(Debug, Parser)]
#[command(name = "sliceup", version, about = "Resumable chunked file uploads")]
struct Cli {
    /// More logging (-v debug, -vv trace).
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// Directory for local upload progress.
    #[arg(long, global = true, env = "SLICEUP_CACHE_DIR")]
    cache_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Args)]
struct ServerArg {
    /// Server WebSocket URL.
    #[arg(long, env = "SLICEUP_SERVER", default_value = DEFAULT_SERVER)]
    server: String,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Upload a file, resuming earlier progress when there is any.
    Upload {
        file: PathBuf,
        #[command(flatten)]
        server: ServerArg,
        /// Slice size in bytes for a new session.
        #[arg(long, default_value_t = default_chunk_size())]
        chunk_size: u64,
        /// Destination sub-directory on the server.
        #[arg(long, default_value = "")]
        prefix: String,
        /// Slices in flight at once.
        #[arg(long, default_value_t = 3)]
        concurrency: usize,
        /// Server storage for a new session (discrete or sparse).
        #[arg(long)]
        storage: Option<StorageMode>,
        /// Skip the checksum pass after uploading.
        #[arg(long)]
        no_verify: bool,
    },
    /// Print the server's session document.
    Meta {
        file_id: String,
        #[command(flatten)]
        server: ServerArg,
    },
    /// Compare the server's slice hashes with a local file.
    Verify {
        file: PathBuf,
        #[command(flatten)]
        server: ServerArg,
    },
    /// Drop local progress for a file.
    Forget { file: PathBuf },
}

fn default_chunk_size() -> u64 {
    UploadOptions::default().chunk_size
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let level = match cli.verbose {
        0 => "info",
        1 => "debug",
        _ => "trace",
    };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level)))
        .with_writer(std::io::stderr)
        .init();

    let cache_dir = cli.cache_dir.unwrap_or_else(default_cache_dir);
    let command = cli.command;
    let rt = tokio::runtime::Runtime::new()?;
    let result = rt.block_on(async move {
        match command {
            Command::Upload {
                file,
                server,
                chunk_size,
                prefix,
                concurrency,
                storage,
                no_verify,
            } => {
                let options = UploadOptions {
                    chunk_size,
                    prefix,
                    concurrency,
                    storage,
                    cache_dir,
                };
                upload(&file, &server.server, options, !no_verify).await
            }
            Command::Meta { file_id, server } => meta(&file_id, &server.server).await,
            Command::Verify { file, server } => verify(&file, &server.server, cache_dir).await,
            Command::Forget { file } => forget(&file, cache_dir).await,
        }
    });

    match result {
        Err(e) if e.downcast_ref::<UploadError>().is_some_and(UploadError::is_canceled) => {
            eprintln!("\ncanceled; run the same command again to resume");
            std::process::exit(130);
        }
        other => other,
    }
}

async fn upload(
    file: &Path,
    server: &str,
    options: UploadOptions,
    verify_after: bool,
) -> anyhow::Result<()> {
    let transport = Arc::new(WsTransport::connect(server).await?);
    let mut uploader = Uploader::open(transport.clone(), file, options).await?;

    uploader.set_progress_callback(|p| {
        eprint!("\r{}/{} slices", p.finished, p.total);
        let _ = std::io::stderr().flush();
    });

    let token = uploader.cancel_token();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("Ctrl-C received, finishing in-flight slices");
            token.cancel();
        }
    });

    let summary = uploader.upload().await?;
    eprintln!();
    println!(
        "{}: {} slices ({} uploaded now{})",
        summary.file_id,
        summary.total_slices,
        summary.uploaded,
        if summary.resumed { ", resumed" } else { "" }
    );

    if verify_after {
        let report = uploader.verify().await?;
        println!(
            "verified: {} matched, {} repaired",
            report.matched.len(),
            report.repaired.len()
        );
        if !report.is_clean() {
            anyhow::bail!("slices still pending on server: {:?}", report.pending);
        }
    }

    if uploader.meta().is_some_and(|m| m.is_complete()) {
        uploader.forget().await?;
    }
    transport.close().await;
    Ok(())
}

async fn meta(file_id: &str, server: &str) -> anyhow::Result<()> {
    let client = sliceup_connection::WsClient::connect(server).await?;
    let meta = client.get_session_meta(file_id).await?;
    println!("{}", serde_json::to_string_pretty(&meta)?);
    client.close().await;
    Ok(())
}

async fn verify(file: &Path, server: &str, cache_dir: PathBuf) -> anyhow::Result<()> {
    let transport = Arc::new(WsTransport::connect(server).await?);
    let options = UploadOptions {
        cache_dir,
        ..UploadOptions::default()
    };
    let mut uploader = Uploader::open(transport.clone(), file, options).await?;
    let report = uploader.verify().await?;
    println!(
        "{} matched, {} repaired, {} pending",
        report.matched.len(),
        report.repaired.len(),
        report.pending.len()
    );
    transport.close().await;
    Ok(())
}

async fn forget(file: &Path, cache_dir: PathBuf) -> anyhow::Result<()> {
    let size = tokio::fs::metadata(file).await?.len();
    let name = file
        .file_name()
        .and_then(|n| n.to_str())
        .ok_or_else(|| anyhow::anyhow!("not a file: {}", file.display()))?;
    if ProgressStore::new(cache_dir).clear(name, size).await? {
        println!("forgot {name}");
    } else {
        println!("no saved progress for {name}");
    }
    Ok(())
}
