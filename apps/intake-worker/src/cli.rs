//! Command-line argument parsing

use clap::Parser;
use std::path::PathBuf;

#[derive(Parser, Debug, Clone)]
#[command(
    name = "intake-worker",
    about = "Document intake admission worker",
    version,
    long_about = "Scans the source container for attachments and runs each one through \
                  the file-type admission gate, quarantining anything it rejects."
)]
pub struct Args {
    /// Path to configuration file (TOML). Environment overrides still apply.
    #[arg(short, long, env = "INTAKE_CONFIG_PATH")]
    pub config: Option<PathBuf>,

    /// Override the number of events processed concurrently
    #[arg(long, env = "INTAKE_CONCURRENCY")]
    pub concurrency: Option<usize>,

    /// Keep scanning the source container instead of exiting after one pass
    #[arg(short, long)]
    pub watch: bool,

    /// Seconds between scans in watch mode
    #[arg(long, default_value = "30", value_parser = clap::value_parser!(u64).range(1..))]
    pub scan_interval_secs: u64,

    /// Print each outcome to stdout as a JSON line
    #[arg(long)]
    pub report: bool,

    /// Log level (trace, debug, info, warn, error)
    #[arg(
        short,
        long,
        env = "LOG_LEVEL",
        default_value = "info",
        value_parser = ["trace", "debug", "info", "warn", "error"]
    )]
    pub log_level: String,

    /// Enable JSON log format (useful for production)
    #[arg(long, env = "JSON_LOGS")]
    pub json_logs: bool,
}

impl Args {
    pub fn validate(&self) -> anyhow::Result<()> {
        if let Some(path) = &self.config {
            if !path.is_file() {
                anyhow::bail!("Config file not found: {}", path.display());
            }
        }
        if self.concurrency == Some(0) {
            anyhow::bail!("Concurrency must be at least 1");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let args = Args::parse_from(["intake-worker"]);
        assert!(!args.watch);
        assert_eq!(args.scan_interval_secs, 30);
        assert!(args.validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_missing_config() {
        let args = Args::parse_from(["intake-worker", "--config", "/nonexistent/intake.toml"]);
        assert!(args.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_zero_concurrency() {
        let args = Args::parse_from(["intake-worker", "--concurrency", "0"]);
        assert!(args.validate().is_err());
    }
}
