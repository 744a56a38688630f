//! a3s-relay - webhook echo relay with self-keepalive

use a3s_relay::{
    build_app, AppState, HttpPinger, KeepaliveScheduler, RelayConfig, RelaySession,
    TelegramConnector,
};
use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "a3s-relay")]
#[command(author = "A3S Lab")]
#[command(version)]
#[command(about = "Webhook echo relay with self-keepalive")]
struct Cli {
    /// Configuration file path (.hcl)
    #[arg(short, long, env = "RELAY_CONFIG")]
    config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Serve the relay (default)
    Serve {
        /// Host to bind to
        #[arg(long)]
        host: Option<String>,

        /// Port to listen on
        #[arg(long, env = "PORT")]
        port: Option<u16>,

        /// Keepalive period in seconds (0 disables)
        #[arg(long, env = "RELAY_KEEPALIVE_PERIOD")]
        keepalive_period: Option<f64>,

        /// Bot token to configure with at startup
        #[arg(long, env = "RELAY_BOT_TOKEN", hide_env_values = true)]
        bot_token: Option<String>,

        /// Public URL to register as the webhook at startup
        #[arg(long, env = "RELAY_PUBLIC_URL")]
        public_url: Option<String>,
    },

    /// Print the effective configuration
    Config,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let log_level = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| format!("a3s_relay={0},tower_http={0}", log_level).into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let mut config = match &cli.config {
        Some(path) => RelayConfig::from_file(path)?,
        None => {
            tracing::info!("No config file given, using defaults");
            RelayConfig::default()
        }
    };

    match cli.command.unwrap_or(Commands::Serve {
        host: None,
        port: None,
        keepalive_period: None,
        bot_token: None,
        public_url: None,
    }) {
        Commands::Config => {
            let json = serde_json::to_string_pretty(&config)
                .context("Failed to serialize configuration")?;
            println!("{}", json);
        }
        Commands::Serve {
            host,
            port,
            keepalive_period,
            bot_token,
            public_url,
        } => {
            if let Some(host) = host {
                config.server.host = host;
            }
            if let Some(port) = port {
                config.server.port = port;
            }
            if let Some(period) = keepalive_period {
                config.keepalive.period_secs = period;
            }
            if bot_token.is_some() {
                config.telegram.bot_token = bot_token;
            }
            if public_url.is_some() {
                config.telegram.public_url = public_url;
            }
            config.validate()?;
            serve(config).await?;
        }
    }

    Ok(())
}

async fn serve(config: RelayConfig) -> Result<()> {
    let outbound_timeout = config.session.outbound_timeout();
    let connector = TelegramConnector::new(config.telegram.api_base.clone(), outbound_timeout);
    let session = Arc::new(RelaySession::with_options(
        connector,
        config.session.options(),
    ));
    let keepalive = Arc::new(KeepaliveScheduler::with_period(
        config.keepalive.period(),
        HttpPinger::new(outbound_timeout),
    ));

    if let Some((token, url)) = config.telegram.startup_credentials() {
        match session
            .configure(token, url, config.telegram.passphrase.as_deref())
            .await
        {
            Ok(webhook) => tracing::info!(webhook = %webhook, "Configured at startup"),
            Err(e) => tracing::warn!(error = %e, "Startup configuration failed, use the status page"),
        }
    }

    let app = build_app(AppState::new(session.clone(), keepalive.clone()));
    let addr = format!("{}:{}", config.server.host, config.server.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;

    tracing::info!(
        addr = %addr,
        keepalive_secs = config.keepalive.period_secs,
        "Relay listening"
    );

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("HTTP server error")?;

    if session.is_running() {
        session.shutdown().await.context("Failed to stop relay session")?;
    }
    keepalive.shutdown().await;

    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::warn!(error = %e, "Failed to listen for Ctrl-C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::warn!(error = %e, "Failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    tracing::info!("Shutdown signal received");
}
