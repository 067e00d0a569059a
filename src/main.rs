use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use clap::Parser;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use vultr_csi::backend::{ControllerBackend, NodeBackend};
use vultr_csi::cloud::rest::RestClient;
use vultr_csi::cloud::retry::Retrying;
use vultr_csi::config::{DriverRole, DEFAULT_SOCKET_PATH};
use vultr_csi::device::ByIdLocator;
use vultr_csi::driver::Driver;
use vultr_csi::error::CsiError;
use vultr_csi::metadata::{MetadataClient, NodeMetadata};
use vultr_csi::mount::SystemMounter;
use vultr_csi::transport::server::CsiServer;

#[derive(Parser, Debug)]
#[command(name = "vultr-csi", version, about = "CSI plugin for Vultr block and virtio-fs storage")]
struct Cli {
    /// Unix socket the CSI services listen on.
    #[arg(long, default_value = DEFAULT_SOCKET_PATH)]
    endpoint: PathBuf,

    /// Which planes this process serves.
    #[arg(long, value_enum, default_value = "node")]
    role: DriverRole,

    /// Cloud API token; required when the controller plane is enabled.
    #[arg(long, env = "VULTR_API_KEY", hide_env_values = true)]
    api_key: Option<String>,

    /// Log filter, e.g. `info` or `vultr_csi=debug`.
    #[arg(long, default_value = "info")]
    log_level: String,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(&cli.log_level))
        .init();

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!(error = %e, "startup failed");
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> Result<(), CsiError> {
    let mut driver = Driver::new(cli.role);

    if cli.role.runs_controller() {
        let api_key = cli.api_key.clone().ok_or_else(|| {
            CsiError::InvalidArgument("an API key is required for the controller role".into())
        })?;
        let cloud = Retrying::new(RestClient::new(api_key));
        driver = driver.with_controller(Arc::new(ControllerBackend::new(cloud)));
        info!("controller plane enabled");
    }

    if cli.role.runs_node() {
        let metadata = MetadataClient::new();
        let node_id = metadata.instance_id().await?;
        let region = metadata.region().await?;
        info!(node_id, region, "node plane enabled");
        driver = driver.with_node(Arc::new(NodeBackend::new(
            SystemMounter::new(),
            ByIdLocator::new(),
            node_id,
            region,
        )));
    }

    let server = CsiServer::bind(&cli.endpoint, Arc::new(driver))?;
    let shutdown = server.shutdown_token();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("shutdown signal received");
            shutdown.cancel();
        }
    });
    server.serve().await
}
