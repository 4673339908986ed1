use anyhow::{Context, Result};
use clap::Parser;
use dialoguer::{Input, Password, Select};
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;
use uuid::Uuid;

use crate::auth::CredentialSet;
use crate::http_client::DEFAULT_API_VERSION;
use crate::orchestrator::{PollPolicy, TimingPolicy};

/// Preservica host used when none is configured
pub const DEFAULT_BASE_URL: &str = "https://nypl.preservica.com";

/// Tenants offered by the interactive prompt
pub const KNOWN_TENANTS: [&str; 2] = ["nypl", "nypltest"];

/// Export a Preservica structural object and download the package
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct CliArgs {
    /// Structural object UUID to export
    #[arg(env = "PRESERVICA_SO_UUID")]
    pub uuid: Option<String>,

    /// Preservica user name
    #[arg(short, long, env = "PRESERVICA_USERNAME")]
    pub username: Option<String>,

    /// Preservica password
    #[arg(long, env = "PRESERVICA_PASSWORD", hide_env_values = true)]
    pub password: Option<String>,

    /// Preservica tenant
    #[arg(short, long, env = "PRESERVICA_TENANT")]
    pub tenant: Option<String>,

    /// Preservica host
    #[arg(long, env = "PRESERVICA_BASE_URL", default_value = DEFAULT_BASE_URL)]
    pub base_url: String,

    /// Entity/XIP API version used in the export request
    #[arg(long, env = "PRESERVICA_API_VERSION", default_value = DEFAULT_API_VERSION)]
    pub api_version: String,

    /// Directory the package is written to
    #[arg(short, long, env = "EXPORT_OUTPUT_DIR", default_value = ".")]
    pub output_dir: String,

    /// Directory holding cached access tokens
    #[arg(long, env = "TOKEN_CACHE_DIR", default_value = ".")]
    pub cache_dir: String,

    /// Keep access tokens in memory only
    #[arg(long, env = "NO_TOKEN_CACHE")]
    pub no_token_cache: bool,

    /// Abort when the login endpoint reports failure
    #[arg(long, env = "STRICT_LOGIN")]
    pub strict_login: bool,

    /// Keep polling on non-200 progress responses until the attempt budget is spent
    #[arg(long, env = "KEEP_POLLING")]
    pub keep_polling: bool,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, env = "LOG_LEVEL", default_value = "info")]
    pub log_level: String,

    /// Log format (text, json)
    #[arg(long, env = "LOG_FORMAT", default_value = "text")]
    pub log_format: String,

    /// HTTP request timeout in seconds
    #[arg(long, env = "HTTP_REQUEST_TIMEOUT", default_value = "60")]
    pub http_timeout: u64,
}

#[derive(Clone, Debug)]
pub struct Config {
    // Export target
    pub structural_object_id: Option<String>,
    pub output_dir: PathBuf,

    // Credentials
    pub username: Option<String>,
    pub password: Option<String>,
    pub tenant: Option<String>,
    pub strict_login: bool,

    // Preservica API
    pub base_url: String,
    pub api_version: String,

    // Token cache (None keeps tokens in memory)
    pub token_cache_dir: Option<PathBuf>,

    // HTTP client
    pub http_connect_timeout: u64,
    pub http_request_timeout: u64,

    // Export timing
    pub timing: TimingPolicy,
    pub poll_policy: PollPolicy,

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
        // Load .env file if it exists
        dotenvy::dotenv().ok();

        Ok(Self::from_args(CliArgs::parse()))
    }

    /// Build configuration from parsed CLI arguments plus env-only settings
    pub fn from_args(args: CliArgs) -> Self {
        let defaults = TimingPolicy::default();

        Config {
            structural_object_id: args.uuid.map(|s| s.trim().to_string()),
            output_dir: expand_tilde(&args.output_dir),

            username: args.username,
            password: args.password,
            tenant: args.tenant,
            strict_login: args.strict_login,

            base_url: args.base_url.trim_end_matches('/').to_string(),
            api_version: args.api_version,

            token_cache_dir: if args.no_token_cache {
                None
            } else {
                Some(expand_tilde(&args.cache_dir))
            },

            http_connect_timeout: env_or("HTTP_CONNECT_TIMEOUT", 30),
            http_request_timeout: args.http_timeout,

            timing: TimingPolicy {
                settle_delay: env_secs_or("EXPORT_SETTLE_DELAY", defaults.settle_delay),
                poll_interval: env_secs_or("EXPORT_POLL_INTERVAL", defaults.poll_interval),
                max_poll_attempts: env_or("EXPORT_MAX_POLL_ATTEMPTS", defaults.max_poll_attempts),
                completion_delay: env_secs_or(
                    "EXPORT_COMPLETION_DELAY",
                    defaults.completion_delay,
                ),
            },
            poll_policy: if args.keep_polling {
                PollPolicy::KeepPolling
            } else {
                PollPolicy::AbortOnFirstNonReady
            },

            log_level: args.log_level,
            log_format: parse_log_format(&args.log_format),
        }
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        if let Some(ref id) = self.structural_object_id {
            Uuid::parse_str(id)
                .with_context(|| format!("Structural object id is not a UUID: {}", id))?;
        }

        if !self.base_url.starts_with("http://") && !self.base_url.starts_with("https://") {
            anyhow::bail!(
                "PRESERVICA_BASE_URL must start with http:// or https://: {}",
                self.base_url
            );
        }

        if self.timing.max_poll_attempts == 0 {
            anyhow::bail!("EXPORT_MAX_POLL_ATTEMPTS must be at least 1");
        }

        Ok(())
    }

    /// Credentials assembled from configuration
    pub fn credentials(&self) -> Result<CredentialSet> {
        let username = self
            .username
            .clone()
            .context("PRESERVICA_USERNAME is required (use -u or set PRESERVICA_USERNAME)")?;
        let password = self
            .password
            .clone()
            .context("PRESERVICA_PASSWORD is required (use --password or set PRESERVICA_PASSWORD)")?;
        let tenant = self
            .tenant
            .clone()
            .context("PRESERVICA_TENANT is required (use -t or set PRESERVICA_TENANT)")?;

        Ok(CredentialSet::new(username, password, tenant))
    }

    // === Interactive Setup ===

    /// Check if anything required is still missing
    pub fn needs_interactive_setup(&self) -> bool {
        self.structural_object_id.is_none()
            || self.username.is_none()
            || self.password.is_none()
            || self.tenant.is_none()
    }

    /// Prompt for every missing value
    pub fn run_interactive_setup(&mut self) -> Result<()> {
        if self.username.is_none() {
            let username: String = Input::new()
                .with_prompt("Enter user name")
                .interact_text()
                .context("Failed to read user name")?;
            self.username = Some(username);
        }

        if self.password.is_none() {
            let password: String = Password::new()
                .with_prompt("Enter password")
                .interact()
                .context("Failed to read password")?;
            if password.is_empty() {
                anyhow::bail!("Password cannot be empty");
            }
            self.password = Some(password);
        }

        if self.tenant.is_none() {
            let idx = Select::new()
                .with_prompt("Select tenant")
                .items(&KNOWN_TENANTS)
                .default(0)
                .interact()
                .context("Failed to read tenant selection")?;
            self.tenant = Some(KNOWN_TENANTS[idx].to_string());
        }

        if self.structural_object_id.is_none() {
            let id: String = Input::new()
                .with_prompt("Structural object UUID")
                .validate_with(|input: &String| -> std::result::Result<(), String> {
                    Uuid::parse_str(input.trim())
                        .map(|_| ())
                        .map_err(|e| format!("Not a UUID: {}", e))
                })
                .interact_text()
                .context("Failed to read structural object UUID")?;
            self.structural_object_id = Some(id.trim().to_string());
        }

        Ok(())
    }
}

/// Read a parseable value from the environment
fn env_or<T: FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(default)
}

/// Read a number of seconds from the environment
fn env_secs_or(key: &str, default: Duration) -> Duration {
    std::env::var(key)
        .ok()
        .and_then(|s| s.parse().ok())
        .map(Duration::from_secs)
        .unwrap_or(default)
}

/// Expand tilde (~) in file paths to user's home directory
fn expand_tilde(path: &str) -> PathBuf {
    if let Some(rest) = path.strip_prefix("~/") {
        if let Some(home) = dirs::home_dir() {
            return home.join(rest);
        }
    }
    PathBuf::from(path)
}

/// Parse log format from string
fn parse_log_format(s: &str) -> LogFormat {
    match s.to_lowercase().as_str() {
        "json" => LogFormat::Json,
        _ => LogFormat::Text,
    }
}
