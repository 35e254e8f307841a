use clap::Parser;
use mq_kafka_bridge::{Bridge, Config, Error, Result};
use std::path::PathBuf;
use tokio::sync::watch;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

#[derive(Parser, Debug)]
#[command(name = "mq-kafka-bridge")]
#[command(about = "Transactional message queue to Kafka bridge", long_about = None)]
struct Args {
    #[arg(short, long, value_name = "FILE", default_value = "config.toml")]
    config: PathBuf,

    #[arg(short, long, help = "Enable JSON output for logs")]
    json_logs: bool,

    #[arg(short, long, help = "Verbose logging")]
    verbose: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    init_logging(args.json_logs, args.verbose);

    info!("Starting mq-kafka-bridge");
    info!("Loading configuration from {:?}", args.config);

    let config = match Config::from_file(&args.config) {
        Ok(cfg) => {
            info!("Configuration loaded successfully");
            cfg
        }
        Err(e) => {
            error!("Failed to load configuration: {}", e);
            return Err(Error::Config(e.to_string()));
        }
    };

    info!(
        queue_url = %config.queue.url,
        source_queue = %config.queue.source_queue,
        dead_letter_queue = %config.queue.dead_letter_queue,
        consumer_name = %config.queue.consumer_name,
        kafka_brokers = ?config.kafka.brokers,
        kafka_topic = %config.kafka.topic,
        schema_registry = %config.kafka.schema_registry_url,
        subject_name_strategy = ?config.kafka.subject_name_strategy,
        "Configuration summary"
    );

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => info!("Received Ctrl+C, shutting down after the current message"),
            Err(e) => error!("Failed to listen for Ctrl+C: {}", e),
        }
        let _ = shutdown_tx.send(true);
    });

    let stats = Bridge::new(config).run(shutdown_rx).await.map_err(|e| {
        error!("Bridge stopped with error: {}", e);
        e
    })?;

    info!(
        published = stats.published,
        diverted = stats.diverted,
        rolled_back = stats.rolled_back,
        "Shutdown complete"
    );
    Ok(())
}

fn init_logging(json: bool, verbose: bool) {
    let env_filter = if verbose {
        EnvFilter::new("mq_kafka_bridge=debug,info")
    } else {
        EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new("mq_kafka_bridge=info,warn"))
    };

    let fmt_layer = if json {
        tracing_subscriber::fmt::layer()
            .json()
            .flatten_event(true)
            .with_current_span(false)
            .with_span_list(false)
            .boxed()
    } else {
        tracing_subscriber::fmt::layer()
            .with_target(false)
            .with_thread_ids(false)
            .with_thread_names(false)
            .boxed()
    };

    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt_layer)
        .init();
}
