use clap::Parser;
use code_runner::{CodeExecutionService, IsolationBackend, ServiceConfig};
use code_runner_server::{create_app, run_server};
use std::{net::SocketAddr, path::PathBuf};
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Server address to listen on
    #[arg(short, long, default_value = "0.0.0.0:3000")]
    addr: SocketAddr,

    /// TOML configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Maximum number of concurrent executions
    #[arg(short, long)]
    max_concurrent: Option<usize>,

    /// Maximum number of requests waiting for a slot
    #[arg(long)]
    queue_capacity: Option<usize>,

    /// Isolation backend (process or rlimit)
    #[arg(long)]
    backend: Option<IsolationBackend>,

    /// Directory under which per-run workspaces are created
    #[arg(long)]
    workspace_root: Option<PathBuf>,

    /// Append usage records to this JSON-lines file
    #[arg(long)]
    usage_log: Option<PathBuf>,
}

impl Args {
    fn service_config(&self) -> anyhow::Result<ServiceConfig> {
        let mut config = match &self.config {
            Some(path) => ServiceConfig::from_file(path)?,
            None => ServiceConfig::default(),
        };

        if let Some(max_concurrent) = self.max_concurrent {
            config.max_concurrent = max_concurrent;
        }
        if let Some(queue_capacity) = self.queue_capacity {
            config.queue_capacity = queue_capacity;
        }
        if let Some(backend) = self.backend {
            config.backend = backend;
        }
        if let Some(root) = &self.workspace_root {
            config.workspace_root = root.clone();
        }
        if let Some(log) = &self.usage_log {
            config.usage_log = Some(log.clone());
        }

        config.validate()?;
        Ok(config)
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let args = Args::parse();
    let config = args.service_config()?;
    std::fs::create_dir_all(&config.workspace_root)?;

    let service = CodeExecutionService::new(config)?;
    let available: Vec<_> = service
        .registry()
        .languages()
        .filter(|spec| spec.is_available())
        .map(|spec| spec.id)
        .collect();
    info!(languages = ?available, "Toolchains available on this node");

    let app = create_app(service);
    run_server(app, args.addr).await?;

    Ok(())
}
