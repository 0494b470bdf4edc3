use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use log::{error, info};

use remotecap::collector::{Dispatcher, ExceptionServer};
use remotecap::configuration::CollectorConfig;
use remotecap::registry::EndpointRegistry;

#[derive(Parser)]
#[command(name = "remotecap-collector")]
#[command(version)]
#[command(about = "Central collector for remotely captured traffic")]
struct Args {
    /// TOML configuration file; flags below override its values
    #[arg(long)]
    config: Option<PathBuf>,

    /// Port of the registration/capture service
    #[arg(long)]
    rpc_port: Option<u16>,

    /// Port of the exception-list HTTP service
    #[arg(long)]
    http_port: Option<u16>,

    /// Directory trace files are written into
    #[arg(long)]
    output_dir: Option<PathBuf>,

    /// Directory holding exceptions.list
    #[arg(long)]
    public_dir: Option<PathBuf>,

    /// Snapshot length declared in trace-file headers
    #[arg(long)]
    snaplen: Option<u32>,
}

#[tokio::main]
async fn main() {
    env_logger::Builder::from_default_env()
        .filter_level(log::LevelFilter::Info)
        .format_target(false)
        .init();

    let args = Args::parse();

    let mut config = match &args.config {
        Some(path) => match CollectorConfig::from_file(path) {
            Ok(config) => config,
            Err(e) => {
                error!("Unable to import configuration from file: {}", e);
                std::process::exit(1);
            }
        },
        None => CollectorConfig::default(),
    };

    if let Some(port) = args.rpc_port {
        config.rpc_port = port;
    }
    if let Some(port) = args.http_port {
        config.http_port = port;
    }
    if let Some(dir) = args.output_dir {
        config.output_dir = dir;
    }
    if let Some(dir) = args.public_dir {
        config.public_dir = dir;
    }
    if let Some(snaplen) = args.snaplen {
        config.snapshot_length = snaplen;
    }

    if let Err(e) = config.validate() {
        error!("Invalid configuration: {}", e);
        std::process::exit(1);
    }
    if let Err(e) = config.ensure_dirs() {
        error!("{}", e);
        std::process::exit(1);
    }

    let registry = Arc::new(EndpointRegistry::new());

    let exception_server = ExceptionServer::new(config.public_dir.clone(), registry.clone());
    let http_bind = config.bind_address.clone();
    let http_port = config.http_port;
    tokio::spawn(async move {
        if let Err(e) = exception_server.start(&http_bind, http_port).await {
            error!("Exception list service failed: {}", e);
        }
    });

    info!("Server started.");
    let dispatcher = Dispatcher::new(config, registry);
    if let Err(e) = dispatcher.run().await {
        error!("Collector failed: {}", e);
        std::process::exit(1);
    }
}
