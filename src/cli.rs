use clap::Parser;

use crate::types::{Domain, LogLevel};

#[derive(Parser, Debug)]
#[command(
    name = "icloud-sync",
    version,
    about = "Incrementally sync iCloud photos and videos into dated folders"
)]
pub struct Cli {
    /// Apple ID email address
    #[arg(short = 'u', long, env = "ICLOUD_USERNAME")]
    pub username: String,

    /// iCloud password (if not provided, will prompt).
    /// WARNING: passing via --password is visible in process listings.
    /// Prefer the ICLOUD_PASSWORD environment variable instead.
    #[arg(short = 'p', long, env = "ICLOUD_PASSWORD", hide_env_values = true)]
    pub password: Option<String>,

    /// Root of the local store; items land in <DIRECTORY>/YYYY/YYYY-MM-DD/
    #[arg(short = 'd', long, env = "ICLOUD_DIRECTORY")]
    pub directory: String,

    /// Maximum number of files downloaded per run
    #[arg(
        long,
        env = "ICLOUD_DOWNLOAD_LIMIT",
        default_value_t = 100,
        value_parser = clap::value_parser!(u64).range(1..)
    )]
    pub download_limit: u64,

    /// iCloud domain (com or cn)
    #[arg(long, value_enum, default_value = "com")]
    pub domain: Domain,

    /// Item id whose folder comes from its added date rather than its asset
    /// date (repeatable)
    #[arg(long = "added-date-id", value_name = "ID")]
    pub added_date_ids: Vec<String>,

    /// Keep TLS certificate verification on while listing and downloading
    #[arg(long)]
    pub verify_tls: bool,

    /// Report what would be downloaded without fetching anything
    #[arg(long)]
    pub dry_run: bool,

    /// Disable progress bar
    #[arg(long)]
    pub no_progress_bar: bool,

    /// Log level (RUST_LOG takes precedence when set)
    #[arg(long, value_enum, default_value = "info")]
    pub log_level: LogLevel,

    /// HTTP request timeout in seconds
    #[arg(long, default_value_t = 30)]
    pub timeout_secs: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> Result<Cli, clap::Error> {
        let mut full = vec!["icloud-sync", "-u", "user@example.com", "-d", "/store"];
        full.extend_from_slice(args);
        Cli::try_parse_from(full)
    }

    #[test]
    fn test_defaults() {
        let cli = parse(&[]).unwrap();
        assert_eq!(cli.username, "user@example.com");
        assert_eq!(cli.directory, "/store");
        assert_eq!(cli.download_limit, 100);
        assert_eq!(cli.domain, Domain::Com);
        assert_eq!(cli.log_level, LogLevel::Info);
        assert_eq!(cli.timeout_secs, 30);
        assert!(cli.added_date_ids.is_empty());
        assert!(!cli.verify_tls);
        assert!(!cli.dry_run);
    }

    #[test]
    fn test_repeatable_added_date_ids() {
        let cli = parse(&["--added-date-id", "A1", "--added-date-id", "B2"]).unwrap();
        assert_eq!(cli.added_date_ids, vec!["A1", "B2"]);
    }

    #[test]
    fn test_zero_download_limit_rejected() {
        assert!(parse(&["--download-limit", "0"]).is_err());
        assert_eq!(parse(&["--download-limit", "7"]).unwrap().download_limit, 7);
    }

    #[test]
    fn test_cn_domain_and_flags() {
        let cli = parse(&["--domain", "cn", "--verify-tls", "--dry-run", "--log-level", "debug"])
            .unwrap();
        assert_eq!(cli.domain, Domain::Cn);
        assert!(cli.verify_tls);
        assert!(cli.dry_run);
        assert_eq!(cli.log_level, LogLevel::Debug);
    }

    #[test]
    fn test_directory_required() {
        assert!(Cli::try_parse_from(["icloud-sync", "-u", "user@example.com"]).is_err());
    }
}
