use std::path::PathBuf;

use clap::Parser;
use log::{error, info};

use remotecap::agent::{build_capture_filter, ReplaySource, Uplink};
use remotecap::configuration::AgentConfig;
use remotecap::registry::EndpointInfo;

#[derive(Parser)]
#[command(name = "remotecap-agent")]
#[command(version)]
#[command(about = "Streams captured traffic to a remote collector")]
struct Args {
    /// TOML configuration file; flags below override its values
    #[arg(long)]
    config: Option<PathBuf>,

    /// Remote packet collector IP
    #[arg(long)]
    remote: Option<String>,

    /// Address of this agent as the collector will see it
    #[arg(long)]
    ip: String,

    /// Source interface name, informational
    #[arg(long, default_value = "eth0")]
    interface: String,

    /// Hostname reported at registration
    #[arg(long)]
    hostname: Option<String>,

    /// Capture filter fragment, appended to the exclusion clauses
    #[arg(long)]
    filter: Option<String>,

    /// Fetch the collector's exception list and fold it into the filter
    #[arg(long)]
    whitelist: bool,

    /// Resolve whitelisted domains via DNS
    #[arg(long)]
    resolve: bool,

    /// Only stream this number of packets, then exit
    #[arg(long)]
    count: Option<u64>,

    /// Only stream this number of bytes, then exit
    #[arg(long)]
    bytes: Option<u64>,

    /// Trace file to stream as the capture source
    #[arg(long)]
    replay: PathBuf,
}

#[tokio::main]
async fn main() {
    env_logger::Builder::from_default_env()
        .filter_level(log::LevelFilter::Info)
        .format_target(false)
        .init();

    let args = Args::parse();

    let mut config = match &args.config {
        Some(path) => match AgentConfig::from_file(path) {
            Ok(config) => config,
            Err(e) => {
                error!("Unable to import configuration from file: {}", e);
                std::process::exit(1);
            }
        },
        None => AgentConfig::default(),
    };

    if let Some(remote) = args.remote {
        config.collector_address = remote;
    }
    if let Some(filter) = args.filter {
        config.capture_filter = filter;
    }
    if args.whitelist {
        config.use_exception_list = true;
    }
    if args.resolve {
        config.resolve_domains = true;
    }
    if args.count.is_some() {
        config.max_packets = args.count;
    }
    if args.bytes.is_some() {
        config.max_bytes = args.bytes;
    }

    // The filter is applied when the live handle is opened, outside this
    // process; print it so the opener can pick it up.
    match build_capture_filter(&config).await {
        Ok(filter) => info!("capture filter: {}", filter),
        Err(e) => {
            error!("Filter synthesis failed: {}", e);
            std::process::exit(1);
        }
    }

    let hostname = args.hostname.unwrap_or_else(|| {
        std::env::var("HOSTNAME").unwrap_or_else(|_| "unknown".to_string())
    });
    let info = EndpointInfo {
        ip_address: args.ip,
        hostname,
        interface: args.interface,
    };

    let uplink = Uplink::new(config);
    if let Err(e) = uplink.register(&info).await {
        error!("Registration failed: {}", e);
        std::process::exit(1);
    }

    let source = match ReplaySource::from_pcap_file(&args.replay) {
        Ok(source) => source,
        Err(e) => {
            error!("Cannot open capture source: {}", e);
            std::process::exit(1);
        }
    };

    info!("Streaming packets (CTRL + C to abort)");
    match uplink.stream_capture(source).await {
        Ok(stats) => {
            info!(
                "Captured {} packets ({} bytes)",
                stats.packets_sent, stats.bytes_sent
            );
        }
        Err(e) => {
            error!("Capture stream failed: {}", e);
            std::process::exit(1);
        }
    }
}
