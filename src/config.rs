use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use std::time::Duration;

use crate::auth::{Credentials, Region};

/// YoLink session host
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct CliArgs {
    /// User access identifier (client id)
    #[arg(short = 'u', long, env = "UAID")]
    pub uaid: Option<String>,

    /// Secret key (client secret)
    #[arg(short = 's', long, env = "SECKEY", hide_env_values = true)]
    pub secret_key: Option<String>,

    /// API region (us, eu)
    #[arg(short = 'r', long, env = "YOLINK_REGION", default_value = "us")]
    pub region: String,

    /// Refresh the token this many seconds before it expires
    #[arg(long, env = "TOKEN_REFRESH_MARGIN", default_value = "0")]
    pub refresh_margin: u64,

    /// Seconds to wait before reconnecting when the API asks for it
    #[arg(long, env = "RECONNECT_DELAY", default_value = "10")]
    pub reconnect_delay: u64,

    /// Give up after this many reconnects (0 = never)
    #[arg(long = "max-reconnects", env = "MAX_RECONNECT_ATTEMPTS", default_value = "0")]
    pub max_reconnect_attempts: u32,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, env = "LOG_LEVEL", default_value = "info")]
    pub log_level: String,

    /// Log output format (text, json)
    #[arg(long, env = "LOG_FORMAT", default_value = "text")]
    pub log_format: String,

    /// Path to a .env file to load before reading the environment
    #[arg(long)]
    pub env_file: Option<PathBuf>,
}

#[derive(Clone, Debug)]
pub struct Config {
    // Credentials
    pub uaid: String,
    pub secret_key: String,
    pub region: Region,

    // Token lifecycle
    pub token_refresh_margin: Duration,

    // Reconnect loop
    pub reconnect_delay: Duration,
    pub max_reconnect_attempts: u32,

    // HTTP client
    pub http_max_connections: usize,
    pub http_connect_timeout: Duration,

    // Logging
    pub log_level: String,
    pub log_format: LogFormat,
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub enum LogFormat {
    Text,
    Json,
}

impl Config {
    /// Load configuration from all sources with priority: CLI > ENV > defaults
    pub fn load() -> Result<Self> {
        // Peek at --env-file before clap reads the environment
        match env_file_arg(std::env::args()) {
            Some(path) => {
                dotenvy::from_path(&path)
                    .with_context(|| format!("Failed to load env file: {}", path.display()))?;
            }
            None => {
                dotenvy::dotenv().ok();
            }
        }

        Self::from_args(CliArgs::parse())
    }

    /// Build configuration from already parsed arguments
    pub fn from_args(args: CliArgs) -> Result<Self> {
        let region: Region = args
            .region
            .parse()
            .with_context(|| format!("Invalid YOLINK_REGION: {}", args.region))?;

        Ok(Config {
            uaid: args
                .uaid
                .context("UAID is required (use -u or set UAID env var)")?,

            secret_key: args
                .secret_key
                .context("SECKEY is required (use -s or set SECKEY env var)")?,

            region,

            token_refresh_margin: Duration::from_secs(args.refresh_margin),

            reconnect_delay: Duration::from_secs(args.reconnect_delay),
            max_reconnect_attempts: args.max_reconnect_attempts,

            http_max_connections: std::env::var("HTTP_MAX_CONNECTIONS")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(20),

            http_connect_timeout: Duration::from_secs(
                std::env::var("HTTP_CONNECT_TIMEOUT")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(10),
            ),

            log_level: args.log_level,
            log_format: parse_log_format(&args.log_format),
        })
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        self.credentials()?;
        Ok(())
    }

    /// Client credentials for the token exchange
    pub fn credentials(&self) -> Result<Credentials> {
        Credentials::new(&self.uaid, &self.secret_key).context("Invalid credentials")
    }
}

/// Value of `--env-file PATH` or `--env-file=PATH`; the last one wins
fn env_file_arg(args: impl IntoIterator<Item = String>) -> Option<PathBuf> {
    let mut args = args.into_iter();
    let mut found = None;

    while let Some(arg) = args.next() {
        if arg == "--" {
            break;
        }
        if arg == "--env-file" {
            found = args.next().map(PathBuf::from);
        } else if let Some(path) = arg.strip_prefix("--env-file=") {
            found = Some(PathBuf::from(path));
        }
    }

    found
}

/// Parse log format from string
fn parse_log_format(s: &str) -> LogFormat {
    match s.to_lowercase().as_str() {
        "json" => LogFormat::Json,
        _ => LogFormat::Text,
    }
}
