use anyhow::{Context, Result};
use std::sync::Arc;

use prsv_export::auth::Authenticator;
use prsv_export::cache::{FileTokenCache, MemoryTokenCache, TokenCache};
use prsv_export::config::{Config, LogFormat};
use prsv_export::http_client::ExportClient;
use prsv_export::orchestrator::{package_file_name, ExportOrchestrator};
use prsv_export::timing::{SystemClock, TokioSleeper};

#[tokio::main]
async fn main() -> Result<()> {
    // Load configuration first (for log level)
    let mut config = Config::load()?;

    init_logging(&config);

    // Prompt for anything not supplied by CLI, env or .env
    if config.needs_interactive_setup() {
        config.run_interactive_setup()?;
    }
    config.validate()?;

    let credentials = config.credentials()?;
    let structural_object_id = config
        .structural_object_id
        .clone()
        .context("Structural object UUID is required")?;

    print_startup_banner(&config, &structural_object_id);

    let cache: Arc<dyn TokenCache> = match config.token_cache_dir {
        Some(ref dir) => {
            tracing::debug!("Token cache directory: {}", dir.display());
            Arc::new(FileTokenCache::new(dir))
        }
        None => {
            tracing::debug!("Token cache disabled, keeping tokens in memory");
            Arc::new(MemoryTokenCache::new())
        }
    };

    let export_client = ExportClient::new(
        config.base_url.clone(),
        config.api_version.clone(),
        config.http_connect_timeout,
        config.http_request_timeout,
    )?;

    let authenticator = Arc::new(
        Authenticator::new(
            export_client.client().clone(),
            config.base_url.clone(),
            cache,
            Arc::new(SystemClock),
        )
        .strict(config.strict_login),
    );

    let mut orchestrator = ExportOrchestrator::new(
        export_client,
        authenticator,
        Arc::new(TokioSleeper),
        credentials,
        structural_object_id,
    )
    .with_output_dir(config.output_dir.clone())
    .with_timing(config.timing.clone())
    .with_poll_policy(config.poll_policy);

    let outcome = orchestrator.run().await;

    if !outcome.success {
        eprintln!(
            "Export failed: {}",
            outcome.error_detail.as_deref().unwrap_or("unknown error")
        );
        std::process::exit(1);
    }

    Ok(())
}

/// Initialize logging with the configured level and format
fn init_logging(config: &Config) {
    let log_level = config.log_level.to_lowercase();
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&log_level));

    let builder = tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(true)
        .with_line_number(true);

    match config.log_format {
        LogFormat::Json => builder.json().init(),
        LogFormat::Text => builder.init(),
    }
}

/// Print startup banner
fn print_startup_banner(config: &Config, structural_object_id: &str) {
    println!();
    println!("  prsv-export {}", env!("CARGO_PKG_VERSION"));
    println!("  Host:        {}", config.base_url);
    println!("  Tenant:      {}", config.tenant.as_deref().unwrap_or("-"));
    println!("  Object:      {}", structural_object_id);
    println!(
        "  Output:      {}",
        config
            .output_dir
            .join(package_file_name(structural_object_id))
            .display()
    );
    println!("  Poll policy: {:?}", config.poll_policy);
    println!();
}
