use anyhow::Context;
use gotify_telegram_relay::config::{LogConfig, load_settings};
use gotify_telegram_relay::logging::{filter_directive, mask_token};
use gotify_telegram_relay::relay::Relay;
use tokio::signal;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize rustls crypto provider
    let _ = rustls::crypto::aws_lc_rs::default_provider().install_default();

    let settings = load_settings().context("failed to load relay configuration")?;
    init_tracing(&settings.log);

    tracing::info!("🚀 Starting Gotify Telegram relay");
    tracing::debug!(
        source = %settings.source.url,
        client_token = %mask_token(&settings.source.client_token),
        targets = settings.telegram.targets.len(),
        "Configuration loaded"
    );

    let relay = Relay::new(settings)?;
    relay.enable().await?;
    tracing::info!("✅ Relay enabled, streaming from Gotify");

    let signal_name = wait_for_shutdown().await?;
    tracing::info!(
        signal = %signal_name,
        "Received shutdown signal, initiating graceful shutdown"
    );

    relay.disable().await?;
    tracing::info!("Graceful shutdown complete");
    Ok(())
}

fn init_tracing(log: &LogConfig) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(filter_directive(&log.level)));

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_line_number(true);

    if log.json {
        builder.json().init();
    } else {
        builder.init();
    }
}

/// Wait for SIGINT, SIGTERM or SIGQUIT (Ctrl+C off Unix)
async fn wait_for_shutdown() -> anyhow::Result<&'static str> {
    #[cfg(unix)]
    {
        use signal::unix::{SignalKind, signal};

        let mut sigint = signal(SignalKind::interrupt()).context("failed to set up SIGINT handler")?;
        let mut sigterm =
            signal(SignalKind::terminate()).context("failed to set up SIGTERM handler")?;
        let mut sigquit = signal(SignalKind::quit()).context("failed to set up SIGQUIT handler")?;

        let name = tokio::select! {
            _ = sigint.recv() => "SIGINT (Ctrl+C)",
            _ = sigterm.recv() => "SIGTERM",
            _ = sigquit.recv() => "SIGQUIT",
        };
        tracing::debug!(signal = name, "Caught signal");
        Ok(name)
    }

    #[cfg(not(unix))]
    {
        signal::ctrl_c()
            .await
            .context("failed to listen for Ctrl+C")?;
        tracing::debug!("Caught Ctrl+C signal");
        Ok("Ctrl+C")
    }
}
