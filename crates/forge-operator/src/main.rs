//! forge operator: reconciles ModelTraining and ModelPackaging resources
//! into Tekton pipelines

mod crds;
mod telemetry;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context as _;
use clap::Parser;
use kube::Client;
use tracing::{info, warn};

use forge_common::config::PipelineConfig;
use forge_common::crd::{ModelPackaging, ModelTraining};
use forge_controller::{
    Context, ControllerRunner, KubeEventSource, Reconciler, ResourceKind, DEFAULT_WORKERS,
};

use crate::telemetry::LogFormat;

/// forge - Kubernetes operator for model training and packaging jobs
#[derive(Parser, Debug)]
#[command(name = "forge-operator", version, about, long_about = None)]
struct Cli {
    /// Pipeline configuration file (YAML); built-in defaults when absent
    #[arg(long, env = "FORGE_CONFIG")]
    config: Option<PathBuf>,

    /// Helper image for the setup and result steps, overrides the file
    #[arg(long, env = "FORGE_HELPER_IMAGE")]
    helper_image: Option<String>,

    /// Number of reconcile workers
    #[arg(long, env = "FORGE_WORKERS", default_value_t = DEFAULT_WORKERS)]
    workers: usize,

    /// Log output format
    #[arg(long, value_enum, default_value_t = LogFormat::Json)]
    log_format: LogFormat,

    /// Print CRD manifests and exit
    #[arg(long)]
    crd: bool,

    /// Install or update CRDs before starting the controllers
    #[arg(long)]
    install_crds: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    if cli.crd {
        print!("{}", crds::render()?);
        return Ok(());
    }

    telemetry::init(cli.log_format)?;

    let config = Arc::new(load_config(&cli)?);
    info!(
        helper_image = %config.helper_image,
        integration_namespace = %config.integration_namespace,
        training = config.training_enabled,
        packaging = config.packaging_enabled,
        "configuration loaded"
    );

    let client = Client::try_default()
        .await
        .context("failed to create kubernetes client")?;

    if cli.install_crds {
        crds::ensure_installed(&client).await?;
    }

    let mut runner = ControllerRunner::new(cli.workers);
    if config.training_enabled {
        let ctx = Context::<ModelTraining>::from_client(client.clone(), Arc::clone(&config));
        runner.register(ResourceKind::Training, Arc::new(Reconciler::new(ctx)));
    }
    if config.packaging_enabled {
        let ctx = Context::<ModelPackaging>::from_client(client.clone(), Arc::clone(&config));
        runner.register(ResourceKind::Packaging, Arc::new(Reconciler::new(ctx)));
    }
    if !config.training_enabled && !config.packaging_enabled {
        warn!("every controller is disabled, nothing to do");
        return Ok(());
    }

    let source = KubeEventSource::new(client, config.training_enabled, config.packaging_enabled);
    runner.run(source, shutdown_signal()).await;
    Ok(())
}

/// Configuration file (or defaults) with command line overrides applied
fn load_config(cli: &Cli) -> anyhow::Result<PipelineConfig> {
    let mut config = match &cli.config {
        Some(path) => PipelineConfig::load(path)
            .with_context(|| format!("invalid configuration {}", path.display()))?,
        None => PipelineConfig::default(),
    };
    if let Some(image) = &cli.helper_image {
        config.helper_image = image.clone();
    }
    Ok(config)
}

/// Resolves on SIGINT or SIGTERM
async fn shutdown_signal() {
    let interrupt = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "cannot listen for SIGINT");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "cannot listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = interrupt => info!("received SIGINT"),
        _ = terminate => info!("received SIGTERM"),
    }
}
