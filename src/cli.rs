//! Command line definitions

use clap::Parser;
use std::path::PathBuf;
use std::time::Duration;

/// event-transit - in-process event distribution engine
#[derive(Parser, Debug)]
#[command(
    name = "event-transit",
    about = "Run an event system from a config file and report on its traffic",
    version
)]
pub struct Cli {
    /// Path to config file (TOML or JSON)
    #[arg(short, long, help = "Path to config file (defaults to the platform config dir)")]
    pub config: Option<PathBuf>,

    /// How long to run, in seconds; runs until interrupted when omitted
    #[arg(short, long, value_name = "SECS")]
    pub duration: Option<u64>,

    /// Drive the stations with a built-in producer and one consumer per station
    #[arg(long)]
    pub demo: bool,

    /// Directory for daily rotated log files
    #[arg(long, value_name = "DIR")]
    pub log_dir: Option<PathBuf>,

    /// Snapshot interval in milliseconds
    #[arg(long, default_value = "1000", value_name = "MS")]
    pub monitor_interval_ms: u64,
}

impl Cli {
    pub fn run_for(&self) -> Option<Duration> {
        self.duration.map(Duration::from_secs)
    }

    pub fn monitor_interval(&self) -> Duration {
        Duration::from_millis(self.monitor_interval_ms.max(1))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let cli = Cli::parse_from(["event-transit"]);
        assert!(cli.config.is_none());
        assert!(!cli.demo);
        assert_eq!(cli.run_for(), None);
        assert_eq!(cli.monitor_interval(), Duration::from_secs(1));
    }

    #[test]
    fn test_flags() {
        let cli = Cli::parse_from([
            "event-transit",
            "--config",
            "sys.toml",
            "-d",
            "5",
            "--demo",
            "--monitor-interval-ms",
            "250",
        ]);
        assert_eq!(cli.config, Some(PathBuf::from("sys.toml")));
        assert_eq!(cli.run_for(), Some(Duration::from_secs(5)));
        assert!(cli.demo);
        assert_eq!(cli.monitor_interval(), Duration::from_millis(250));
    }
}
