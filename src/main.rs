use std::path::PathBuf;

use clap::Parser;
use kubeask::config::load_config;
use kubeask::utils::logging::init_logger;

#[derive(Clone, Debug, clap::Parser)]
#[command(version, about = "Answer questions about a Kubernetes cluster from a periodically refreshed snapshot")]
pub struct Cli {
    /// YAML config file (default: <config dir>/kubeask/config.yaml)
    #[arg(long, env = "KUBEASK_CONFIG")]
    config: Option<PathBuf>,

    #[arg(long, env = "KUBEASK_BIND")]
    bind: Option<String>,

    /// Kubeconfig file; the standard lookup applies when unset
    #[arg(long, env = "KUBEASK_KUBECONFIG")]
    kubeconfig: Option<String>,

    #[arg(long, env = "KUBEASK_CONTEXT")]
    context: Option<String>,

    /// Append logs to this file instead of stderr
    #[arg(long, env = "KUBEASK_LOG_FILE")]
    log_file: Option<PathBuf>,

    /// Seconds between background refreshes (0 disables)
    #[arg(long, env = "KUBEASK_REFRESH_INTERVAL")]
    refresh_interval: Option<u64>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let mut config = load_config(cli.config.as_deref()).await?;
    if let Some(bind) = cli.bind {
        config.bind = bind;
    }
    if cli.kubeconfig.is_some() {
        config.kubeconfig = cli.kubeconfig;
    }
    if cli.context.is_some() {
        config.context = cli.context;
    }
    if cli.log_file.is_some() {
        config.log_file = cli.log_file;
    }
    if cli.refresh_interval.is_some() {
        config.refresh_interval_secs = cli.refresh_interval;
    }
    config.llm.resolve_api_key(|var| std::env::var(var).ok());

    init_logger(config.log_file.as_deref()).map_err(anyhow::Error::msg)?;

    kubeask::run(config).await
}
