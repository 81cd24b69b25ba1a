//! Task Aggregator - main entry point

use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::process;
use std::sync::Arc;
use std::time::Duration;
use task_aggregator::api::{self, ApiState};
use task_aggregator::config::ServiceConfig;
use task_aggregator::consumer::{create_event_channel, EventConsumer};
use task_aggregator::observability::logging::{init_logging, LogSettings};
use task_aggregator::observability::HealthState;
use task_aggregator::pipeline::ProcessingPipeline;
use task_aggregator::store::{AggregateStore, InMemoryAggregateStore};
use task_aggregator::transport::mqtt::MqttClient;
use task_aggregator::transport::EventPublisher;
use task_aggregator::workflow::TaskService;
use tokio::signal;
use tokio::sync::watch;
use tracing::{error, info, warn, Level};

const DEFAULT_CONFIG_PATHS: &[&str] = &["task-aggregator.toml", "config/task-aggregator.toml"];

/// Task duration aggregation service
#[derive(Parser)]
#[command(name = "task-aggregator")]
#[command(about = "Aggregates task durations received over HTTP and MQTT")]
#[command(version)]
struct Cli {
    /// Configuration file path
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Verbose logging (-v debug, -vv trace)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the service
    Run,
    /// Validate configuration
    Config {
        /// Show current configuration
        #[arg(long)]
        show: bool,
    },
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let mut settings = LogSettings::from_env();
    match cli.verbose {
        0 => {}
        1 => settings.level = Level::DEBUG,
        _ => settings.level = Level::TRACE,
    }
    if let Err(e) = init_logging(&settings) {
        eprintln!("Failed to initialize logging: {e}");
    }

    info!(version = env!("CARGO_PKG_VERSION"), "starting task aggregator");

    let config = match load_configuration(cli.config.as_deref()) {
        Ok(config) => config,
        Err(e) => {
            error!("Failed to load configuration: {}", e);
            process::exit(1);
        }
    };

    let result = match cli.command {
        Commands::Run => run_service(config).await,
        Commands::Config { show } => handle_config_command(&config, show),
    };

    if let Err(e) = result {
        error!("Command failed: {}", e);
        process::exit(1);
    }

    info!("Application shutdown complete");
}

fn load_configuration(
    config_path: Option<&Path>,
) -> Result<ServiceConfig, Box<dyn std::error::Error>> {
    if let Some(path) = config_path {
        info!("Loading configuration from: {}", path.display());
        return Ok(ServiceConfig::load_from_file(path)?);
    }

    for path_str in DEFAULT_CONFIG_PATHS {
        let path = Path::new(path_str);
        if path.exists() {
            info!("Loading configuration from: {}", path.display());
            return Ok(ServiceConfig::load_from_file(path)?);
        }
    }

    Err(format!(
        "no configuration file found; pass -c/--config or create one of {}",
        DEFAULT_CONFIG_PATHS.join(", ")
    )
    .into())
}

async fn run_service(config: ServiceConfig) -> Result<(), Box<dyn std::error::Error>> {
    let service_id = config.service.id.clone();
    info!(service_id = %service_id, "service starting");

    let store: Arc<dyn AggregateStore> = Arc::new(InMemoryAggregateStore::new());
    let pipeline = ProcessingPipeline::from_config(&config.pipeline)?;
    info!(steps = ?pipeline.step_names(), "processing pipeline configured");

    let health = Arc::new(HealthState::new(
        &service_id,
        store.name(),
        config.mqtt.is_some(),
    ));
    let service = TaskService::new(store, pipeline).with_health(health.clone());
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let mut api_state = ApiState::new(service.clone());
    if let Some(timeout_ms) = config.http.request_timeout_ms {
        api_state = api_state.with_request_timeout(Duration::from_millis(timeout_ms));
    }

    let mut mqtt = None;
    let mut consumer_handle = None;
    if let Some(mqtt_config) = config.mqtt.clone() {
        let mut client = MqttClient::new(&service_id, mqtt_config)?.with_health(health.clone());
        let (event_tx, event_rx) = create_event_channel();
        client.set_event_sender(event_tx).await;
        client.connect().await?;
        client.subscribe_to_events().await?;

        let consumer = EventConsumer::new(service.clone(), event_rx, shutdown_rx.clone());
        consumer_handle = Some(tokio::spawn(consumer.run()));

        let client = Arc::new(client);
        if config.features.async_enabled {
            let publisher: Arc<dyn EventPublisher> = client.clone();
            api_state = api_state.with_async_publisher(publisher);
            info!("asynchronous HTTP submission enabled");
        }
        mqtt = Some(client);
    }

    let (_addr, server_handle) =
        api::serve(api_state, health, config.http.port, shutdown_rx.clone())?;

    wait_for_shutdown_signal().await?;

    info!("Application shutdown initiated");
    let _ = shutdown_tx.send(true);

    if let Err(e) = server_handle.await {
        error!(error = %e, "HTTP server task failed");
    }
    if let Some(handle) = consumer_handle {
        if let Err(e) = handle.await {
            error!(error = %e, "event consumer task failed");
        }
    }
    if let Some(client) = mqtt {
        match Arc::try_unwrap(client) {
            Ok(mut client) => client.disconnect().await?,
            Err(_) => warn!("MQTT client still shared at shutdown, dropping without disconnect"),
        }
    }

    Ok(())
}

async fn wait_for_shutdown_signal() -> Result<(), std::io::Error> {
    let mut sigterm = signal::unix::signal(signal::unix::SignalKind::terminate())?;

    tokio::select! {
        result = signal::ctrl_c() => {
            result?;
            info!("Received SIGINT, shutting down gracefully...");
        }
        _ = sigterm.recv() => {
            info!("Received SIGTERM, shutting down gracefully...");
        }
    }
    Ok(())
}

fn handle_config_command(
    config: &ServiceConfig,
    show: bool,
) -> Result<(), Box<dyn std::error::Error>> {
    ProcessingPipeline::from_config(&config.pipeline)?;

    if show {
        println!("Current configuration:");
        println!("{}", toml::to_string_pretty(config)?);
    }

    info!("Configuration validation complete");
    Ok(())
}
