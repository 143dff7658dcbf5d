//! Producer demo against the in-process broker
//!
//! Usage:
//!   producer-demo --station orders --name billing --count 10
//!   producer-demo --station orders --name billing --unique --async
//!   producer-demo --station orders --name billing --config client.toml --json-logs

use anyhow::{Context, Result};
use clap::Parser;
use network::MemoryTransport;
use station_producer::test_utils::MockControlPlane;
use station_producer::{ClientConfig, Connection, Headers, ProduceOptions, ProducerConfig};
use std::sync::Arc;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "producer-demo")]
#[command(about = "Create a station producer and publish messages through it")]
#[command(version)]
struct Args {
    /// Station to produce into
    #[arg(short, long)]
    station: String,

    /// Producer name
    #[arg(short, long)]
    name: String,

    /// Number of messages to produce
    #[arg(short, long, default_value_t = 1)]
    count: usize,

    /// Do not wait for broker acknowledgements
    #[arg(long = "async")]
    async_produce: bool,

    /// Append a random suffix to the producer name
    #[arg(long)]
    unique: bool,

    /// Seconds to wait for each acknowledgement
    #[arg(long, default_value_t = station_producer::DEFAULT_ACK_WAIT_SEC)]
    ack_wait_sec: u64,

    /// Path to client configuration file
    #[arg(long)]
    config: Option<String>,

    /// Log level (trace, debug, info, warn, error); RUST_LOG takes precedence
    #[arg(short, long, default_value = "info")]
    log_level: String,

    /// Enable JSON logging format
    #[arg(long)]
    json_logs: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    init_logging(&args);

    let config = match &args.config {
        Some(path) => ClientConfig::from_file(path)
            .with_context(|| format!("loading client configuration from {}", path))?,
        None => ClientConfig::default(),
    };

    let bus = MemoryTransport::new();
    let _control_plane = MockControlPlane::install(&bus);
    let connection = Connection::new(Arc::new(bus.clone()), config)?;

    let producer_config = if args.unique {
        ProducerConfig::new().with_unique_suffix()
    } else {
        ProducerConfig::new()
    };
    let producer = connection
        .create_producer(&args.station, &args.name, producer_config)
        .await
        .context("creating producer")?;
    info!("Producer '{}' active on station '{}'", producer.name(), producer.station());

    let mut failures = 0usize;
    for seq in 0..args.count {
        let headers = Headers::new().with("seq", seq.to_string())?;
        let options = ProduceOptions::new(format!("message {}", seq).into_bytes())
            .ack_wait_sec(args.ack_wait_sec)
            .headers(headers)
            .async_produce(args.async_produce);

        if let Err(e) = producer.produce(options).await {
            error!("Message {} failed: {}", seq, e);
            failures += 1;
        }
    }

    info!(
        "Produced {} of {} messages ({} on the wire)",
        args.count - failures,
        args.count,
        bus.published_count()
    );

    producer.destroy().await.context("destroying producer")?;
    info!("Producer '{}' destroyed", producer.name());
    Ok(())
}

fn init_logging(args: &Args) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(args.log_level.to_lowercase()));

    if args.json_logs {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }
}
