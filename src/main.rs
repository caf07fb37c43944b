use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;
use tokio::sync::mpsc;

use launcher_pipeline::config::PipelineConfig;
use launcher_pipeline::logging;
use launcher_pipeline::services::{Download, DownloadEvent, DownloadManager, DownloadState};
use launcher_pipeline::Result;

/// Fetch one file through the launcher download manager.
#[derive(Parser)]
#[command(name = "launcher-fetch", version)]
struct Cli {
    /// Remote file URL.
    url: String,
    /// Destination path; an existing partial file is resumed.
    destination: PathBuf,
    /// XML chunk descriptor used to verify the partial file and the result.
    #[arg(short, long)]
    manifest: Option<String>,
    /// Expected size in bytes when no descriptor is given.
    #[arg(short, long)]
    size: Option<u64>,
    /// Log to the pipeline log directory instead of stderr.
    #[arg(long)]
    log_file: bool,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    let config = PipelineConfig::from_env();
    let logged = if cli.log_file {
        logging::init(&config.log_dir)
    } else {
        logging::init_stderr()
    };
    if let Err(err) = logged {
        eprintln!("failed to initialize logging: {err}");
    }
    match run(cli, config).await {
        Ok(DownloadState::Completed) => ExitCode::SUCCESS,
        Ok(state) => {
            eprintln!("download ended in state {state}");
            ExitCode::FAILURE
        }
        Err(err) => {
            eprintln!("launcher-fetch: {err}");
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli, config: PipelineConfig) -> Result<DownloadState> {
    let manager = DownloadManager::new(config.download)?;

    let mut download = Download::new(&cli.url, cli.destination);
    if let Some(size) = cli.size {
        download = download.with_expected_size(size);
    }
    if let Some(manifest_url) = cli.manifest.as_deref() {
        download = download.with_manifest(manager.fetch_manifest(manifest_url).await?);
    }

    let (tx, mut events) = mpsc::unbounded_channel::<DownloadEvent>();
    let listener = manager.add_listener(tx);
    manager.download_now(download.clone());

    let mut last_percent = None;
    let mut state = DownloadState::Queued;
    while let Some(event) = events.recv().await {
        if event.download != download {
            continue;
        }
        state = event.state;
        match event.state {
            DownloadState::Progress => {
                let percent = event.download.progress();
                if last_percent != Some(percent) {
                    eprint!("\r{:>3}%", percent);
                    last_percent = Some(percent);
                }
            }
            DownloadState::Failed => {
                eprintln!();
                if let Some(message) = event.message.as_deref() {
                    eprintln!("{message}");
                }
                break;
            }
            other if other.is_terminal() => {
                eprintln!();
                break;
            }
            _ => {}
        }
    }

    manager.remove_listener(listener);
    Ok(state)
}
