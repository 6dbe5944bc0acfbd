use clap::Parser;
use skyflowd::ControlPlane;
use std::path::PathBuf;
use tokio::signal;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "skyflowd")]
#[command(about = "skyflow control plane daemon", version)]
struct Cli {
    /// 設定ファイル (省略時は skyflow.kdl を検索)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// ログレベル (RUST_LOG が設定されていればそちらを優先)
    #[arg(long, default_value = "info")]
    log_level: String,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&cli.log_level));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let config = skyflow_config::load_config(cli.config.as_deref())?;
    let plane = ControlPlane::build(&config).await?;
    plane.start().await?;

    shutdown_signal().await?;
    info!("Shutting down");
    plane.shutdown().await;
    Ok(())
}

/// Ctrl+C or SIGTERM
async fn shutdown_signal() -> anyhow::Result<()> {
    #[cfg(unix)]
    {
        let mut terminate = signal::unix::signal(signal::unix::SignalKind::terminate())?;
        tokio::select! {
            result = signal::ctrl_c() => result?,
            _ = terminate.recv() => {}
        }
    }

    #[cfg(not(unix))]
    signal::ctrl_c().await?;

    Ok(())
}
