//! Task Event Publisher
//!
//! Publishes task duration events to the service's MQTT topic, for trying the
//! queue path by hand.
//!
//! ## Usage
//!
//! ```bash
//! # One event
//! publish-task --task-id build --duration 1500
//!
//! # Ten events, 100ms apart, to a remote broker
//! publish-task --broker-url mqtt://broker.example.com:1883 \
//!   --task-id build --duration 1500 --count 10 --interval-ms 100
//! ```
//!
//! Exits with an error if the broker has not acknowledged every event within
//! `--ack-timeout-ms`.

use clap::Parser;
use task_aggregator::config::MqttSection;
use task_aggregator::protocol::TaskEvent;
use task_aggregator::transport::mqtt::{MqttClient, ReconnectConfig};
use tokio::time::{sleep, Duration};

#[derive(Parser)]
#[command(
    name = "publish-task",
    about = "Publish task duration events to the task aggregator's MQTT topic"
)]
struct Args {
    /// Task identifier
    #[arg(long, required = true)]
    task_id: String,

    /// Duration in milliseconds
    #[arg(long, required = true)]
    duration: u64,

    /// Number of events to publish
    #[arg(long, default_value = "1")]
    count: u32,

    /// Delay between events
    #[arg(long, default_value = "0")]
    interval_ms: u64,

    /// MQTT broker URL
    #[arg(long, default_value = "mqtt://localhost:1883")]
    broker_url: String,

    /// Topic the service consumes
    #[arg(long, default_value = "task-events")]
    topic: String,

    /// How long to wait for the broker to acknowledge every publish
    #[arg(long, default_value = "5000")]
    ack_timeout_ms: u64,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();
    let event = TaskEvent::new(args.task_id.as_str(), args.duration)?;

    let config = MqttSection {
        broker_url: args.broker_url.clone(),
        topic: args.topic,
        username_env: None,
        password_env: None,
    };
    let mut client = MqttClient::new("publish-task", config)?.with_reconnect_config(
        ReconnectConfig {
            max_attempts: Some(3),
            ..ReconnectConfig::default()
        },
    );

    println!("Connecting to MQTT broker {}...", args.broker_url);
    client.connect().await?;

    for sent in 1..=args.count {
        client.publish_event(&event).await?;
        println!(
            "[{sent}/{}] published {} ({}ms) to {}",
            args.count,
            event.task_id(),
            event.duration_ms(),
            client.topic()
        );
        if sent < args.count && args.interval_ms > 0 {
            sleep(Duration::from_millis(args.interval_ms)).await;
        }
    }

    let acked = client
        .wait_for_acks(Duration::from_millis(args.ack_timeout_ms))
        .await;
    client.disconnect().await?;
    acked?;
    println!("broker acknowledged {} event(s)", args.count);
    Ok(())
}
