use anyhow::{Context, Result};
use std::sync::Arc;

use yolink_session::config::{Config, LogFormat};
use yolink_session::{ApiClient, ApiEnvelope, AuthCoordinator};

#[tokio::main]
async fn main() -> Result<()> {
    let config = Config::load()?;
    config.validate()?;

    init_logging(&config);

    tracing::info!("YoLink session starting (region: {})", config.region);

    // Initialize authentication coordinator
    let auth = Arc::new(AuthCoordinator::new(
        config.credentials()?,
        config.token_refresh_margin,
    )?);
    auth.configure_region(config.region).await?;

    // Fail fast on bad credentials before touching the API
    let token = auth
        .current_token()
        .await
        .context("Authentication failed")?;
    tracing::info!(token_len = token.len(), "Authentication successful");

    let api = ApiClient::new(
        auth.clone(),
        config.http_max_connections,
        config.http_connect_timeout,
    )?;

    let devices = connect(&api, &config).await?;
    tracing::info!("Loaded {} devices", devices.devices().len());

    let info = api
        .get_general_info()
        .await
        .context("Failed to load home info")?;

    println!("Devices: {}", devices.devices().len());
    println!(
        "{}",
        serde_json::to_string_pretty(&info.data.unwrap_or_default())?
    );

    Ok(())
}

/// Initialize logging with the configured level and format
fn init_logging(config: &Config) {
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(config.log_level.to_lowercase()));

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

/// Load the device list, reconnecting while the API asks for it
async fn connect(api: &ApiClient, config: &Config) -> Result<ApiEnvelope> {
    let mut attempts = 0u32;

    loop {
        match api.get_device_list().await {
            Ok(envelope) => return Ok(envelope),
            Err(e) if e.should_reconnect() => {
                attempts += 1;
                if config.max_reconnect_attempts > 0 && attempts > config.max_reconnect_attempts {
                    return Err(e).context(format!("Gave up after {} reconnects", attempts - 1));
                }

                tracing::warn!(
                    code = e.code().unwrap_or_default(),
                    attempt = attempts,
                    "Attempting to reconnect in {}s...",
                    config.reconnect_delay.as_secs()
                );
                tokio::time::sleep(config.reconnect_delay).await;
            }
            Err(e) => return Err(e).context("Failed to load device list"),
        }
    }
}
