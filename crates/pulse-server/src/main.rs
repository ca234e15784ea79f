//! pulse: real-time demo server

use anyhow::{Context, Result};
use clap::Parser;
use pulse_core::{Server, ServerConfig};
use std::path::PathBuf;
use std::time::Duration;
use tracing::info;

#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

#[derive(Debug, Parser)]
#[command(name = "pulse", version, about = "HTTP demo server with WebSocket and SSE chat broadcast")]
struct Cli {
    /// Port to listen on
    #[arg(short, long, env = "PORT", default_value_t = 3000)]
    port: u16,

    /// Address to bind
    #[arg(long, env = "HOST", default_value = "0.0.0.0")]
    host: String,

    /// Directory served for unrouted GET requests
    #[arg(long, env = "PULSE_ASSETS", default_value = "mychat")]
    assets: PathBuf,

    /// Worker threads (defaults to the number of CPUs)
    #[arg(long, env = "PULSE_WORKERS")]
    workers: Option<usize>,

    /// Seconds between keep-alive comments on idle event streams (0 disables)
    #[arg(long, env = "PULSE_SSE_KEEP_ALIVE", default_value_t = 15)]
    sse_keep_alive: u64,

    /// Seconds to wait for open connections on shutdown
    #[arg(long, env = "PULSE_SHUTDOWN_TIMEOUT", default_value_t = 5)]
    shutdown_timeout: u64,

    /// Emit logs as JSON
    #[arg(long, env = "PULSE_LOG_JSON")]
    log_json: bool,
}

impl Cli {
    fn init_logging(&self) {
        use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

        let env_filter = EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new("pulse_core=info,pulse_server=info"));

        if self.log_json {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(tracing_subscriber::fmt::layer().json())
                .try_init()
                .ok();
        } else {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(tracing_subscriber::fmt::layer())
                .try_init()
                .ok();
        }
    }

    fn config(&self) -> ServerConfig {
        let defaults = ServerConfig::default();
        ServerConfig {
            port: self.port,
            hostname: self.host.clone(),
            workers: self.workers.unwrap_or(defaults.workers),
            assets_dir: self.assets.clone(),
            sse_keep_alive: Duration::from_secs(self.sse_keep_alive),
            shutdown_timeout: Duration::from_secs(self.shutdown_timeout),
            ..defaults
        }
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    cli.init_logging();

    let config = cli.config();
    config.validate().context("invalid configuration")?;

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .worker_threads(config.workers)
        .enable_all()
        .build()
        .context("failed to build tokio runtime")?;

    runtime.block_on(serve(config))
}

async fn serve(config: ServerConfig) -> Result<()> {
    if !config.assets_dir.is_dir() {
        tracing::warn!(
            assets = %config.assets_dir.display(),
            "assets directory not found, static requests will 404"
        );
    }

    let server = Server::bind(&config)
        .await
        .with_context(|| format!("failed to bind {}:{}", config.hostname, config.port))?;
    info!(
        addr = %server.local_addr()?,
        workers = config.workers,
        assets = %config.assets_dir.display(),
        "pulse started"
    );

    server.run(shutdown_signal()).await?;
    info!("pulse stopped");
    Ok(())
}

/// Resolves on Ctrl-C or SIGTERM
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "failed to listen for Ctrl-C");
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
                tracing::error!(error = %e, "failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("received Ctrl-C"),
        _ = terminate => info!("received SIGTERM"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_defaults() {
        let cli = Cli::try_parse_from(["pulse"]).unwrap();
        let config = cli.config();
        assert_eq!(config.assets_dir, PathBuf::from("mychat"));
        assert_eq!(config.sse_keep_alive, Duration::from_secs(15));
    }

    #[test]
    fn test_cli_overrides() {
        let cli = Cli::try_parse_from([
            "pulse",
            "--port",
            "8080",
            "--host",
            "127.0.0.1",
            "--assets",
            "public",
            "--workers",
            "2",
            "--sse-keep-alive",
            "0",
            "--log-json",
        ])
        .unwrap();
        assert!(cli.log_json);

        let config = cli.config();
        assert_eq!(config.port, 8080);
        assert_eq!(config.workers, 2);
        assert_eq!(config.assets_dir, PathBuf::from("public"));
        assert!(config.sse_keep_alive.is_zero());
        config.validate().unwrap();
    }

    #[test]
    fn test_cli_rejects_bad_port() {
        assert!(Cli::try_parse_from(["pulse", "--port", "70000"]).is_err());
    }
}
