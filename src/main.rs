//! icloud-sync: incremental, idempotent mirror of an iCloud Photos library.
//!
//! Logs in (with two-step verification when Apple asks for it), prints the
//! account summary, then walks the photo catalog in order and downloads
//! every item that is not already present under `<directory>/YYYY/YYYY-MM-DD/`,
//! up to a per-run download limit.

#![warn(clippy::all)]

mod auth;
mod catalog;
mod cli;
mod config;
mod download;
mod icloud;
mod shutdown;
mod transport;
mod types;

use std::process::ExitCode;
use std::sync::Arc;

use clap::Parser;
use tracing_subscriber::EnvFilter;

use auth::prompt::TerminalPrompter;
use download::SyncReport;
use icloud::{ICloudService, RemoteService};
use transport::{RequestObserver, TracingObserver};

async fn run(cli: cli::Cli) -> anyhow::Result<SyncReport> {
    let config = config::Config::from_cli(cli)?;
    tracing::debug!(?config, "Configuration loaded");
    tracing::info!(
        "Starting icloud-sync for {} (domain: {})",
        config.username,
        config.domain.as_str()
    );

    let shutdown_token = shutdown::install_signal_handler()?;

    let observer: Arc<dyn RequestObserver> = Arc::new(TracingObserver);
    let service = ICloudService::new(config.domain, config.timeout, Some(observer))?;

    let mut prompter = TerminalPrompter;
    let session = auth::login(
        &service,
        &config.username,
        config.password.as_deref(),
        &mut prompter,
    )
    .await?;

    tracing::debug!("Session ready for {}", session.account());

    let download_config = config.download_config();
    let sync = async {
        let summary = service.account_summary().await?;
        println!("{}", serde_json::to_string_pretty(&summary)?);
        download::sync_library(&service, &session, &download_config, shutdown_token).await
    };

    if config.verify_tls {
        sync.await
    } else {
        transport::with_insecure_transport(service.transport(), sync).await
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = cli::Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(cli.log_level.as_filter())),
        )
        .init();

    match run(cli).await {
        Ok(report) => {
            if report.cancelled {
                tracing::info!("Stopped early on request");
            }
            ExitCode::SUCCESS
        }
        Err(e) => {
            tracing::error!("{:#}", e);
            ExitCode::FAILURE
        }
    }
}
