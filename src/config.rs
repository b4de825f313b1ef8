//! Service configuration.
//!
//! Every setting can be given as a command-line flag or an environment
//! variable; flags win.

use std::time::Duration;

use clap::{Parser, ValueEnum};

/// Output format of the log subscriber.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum LogFormat {
    Json,
    Text,
}

#[derive(Debug, Clone, Parser)]
#[command(
    name = "review-assign",
    about = "Reviewer assignment service for team pull requests",
    version
)]
pub struct Config {
    /// Port the HTTP server listens on
    #[arg(long, env = "SERVER_PORT", default_value_t = 8080)]
    pub server_port: u16,

    /// SQLite database URL, e.g. sqlite:data/review-assign.db
    #[arg(long, env = "DATABASE_URL")]
    pub database_url: String,

    /// Log filter (error, warn, info, debug, trace); RUST_LOG overrides it
    #[arg(long, env = "LOG_LEVEL", default_value = "info")]
    pub log_level: String,

    #[arg(long, env = "LOG_FORMAT", value_enum, default_value_t = LogFormat::Json)]
    pub log_format: LogFormat,

    /// Time allowed for in-flight requests after a shutdown signal
    #[arg(long, env = "SHUTDOWN_TIMEOUT", default_value = "10s", value_parser = parse_duration)]
    pub shutdown_timeout: Duration,

    /// Deadline for a single assignment operation
    #[arg(long, env = "OPERATION_TIMEOUT", default_value = "5s", value_parser = parse_duration)]
    pub operation_timeout: Duration,

    #[arg(long, env = "DB_MAX_CONNECTIONS", default_value_t = 5)]
    pub db_max_connections: u32,
}

/// Parse durations such as `250ms`, `10s`, `2m` or `1h`. A bare number is
/// taken as seconds.
pub fn parse_duration(input: &str) -> Result<Duration, String> {
    let input = input.trim();
    let split = input
        .find(|c: char| !c.is_ascii_digit())
        .unwrap_or(input.len());
    let (digits, unit) = input.split_at(split);

    let value: u64 = digits
        .parse()
        .map_err(|_| format!("invalid duration '{}'", input))?;

    match unit.trim() {
        "ms" => Ok(Duration::from_millis(value)),
        "" | "s" => Ok(Duration::from_secs(value)),
        "m" => Ok(Duration::from_secs(value * 60)),
        "h" => Ok(Duration::from_secs(value * 3600)),
        other => Err(format!("unknown duration unit '{}' in '{}'", other, input)),
    }
}
