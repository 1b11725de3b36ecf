use std::collections::HashSet;
use std::path::PathBuf;
use std::time::Duration;

use crate::download::DownloadConfig;
use crate::types::Domain;

/// Application configuration, validated from the command line.
pub struct Config {
    pub username: String,
    pub password: Option<String>,
    pub directory: PathBuf,
    pub added_date_ids: Vec<String>,
    pub timeout: Duration,
    pub download_limit: usize,
    pub domain: Domain,
    pub verify_tls: bool,
    pub dry_run: bool,
    pub no_progress_bar: bool,
}

impl std::fmt::Debug for Config {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Config")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .field("directory", &self.directory)
            .field("download_limit", &self.download_limit)
            .field("domain", &self.domain)
            .field("verify_tls", &self.verify_tls)
            .field("dry_run", &self.dry_run)
            .finish_non_exhaustive()
    }
}

fn expand_tilde(path: &str) -> PathBuf {
    if let Some(stripped) = path.strip_prefix("~/") {
        if let Some(home) = dirs::home_dir() {
            return home.join(stripped);
        }
    }
    PathBuf::from(path)
}

impl Config {
    pub fn from_cli(cli: crate::cli::Cli) -> anyhow::Result<Self> {
        if cli.username.trim().is_empty() {
            anyhow::bail!("--username must not be empty");
        }
        if cli.directory.trim().is_empty() {
            anyhow::bail!("--directory must not be empty");
        }
        let download_limit = usize::try_from(cli.download_limit)?;
        if download_limit == 0 {
            anyhow::bail!("--download-limit must be at least 1");
        }

        Ok(Self {
            username: cli.username,
            password: cli.password,
            directory: expand_tilde(&cli.directory),
            added_date_ids: cli.added_date_ids,
            timeout: Duration::from_secs(cli.timeout_secs),
            download_limit,
            domain: cli.domain,
            verify_tls: cli.verify_tls,
            dry_run: cli.dry_run,
            no_progress_bar: cli.no_progress_bar,
        })
    }

    pub fn download_config(&self) -> DownloadConfig {
        DownloadConfig {
            directory: self.directory.clone(),
            download_limit: self.download_limit,
            added_date_ids: self.added_date_ids.iter().cloned().collect::<HashSet<_>>(),
            dry_run: self.dry_run,
            no_progress_bar: self.no_progress_bar,
        }
    }
}
