//! mqtt-inbox - demo client
//!
//! `run` subscribes to `home/sensors/#`, simulates three sensors publishing
//! JSON readings through a second client, and prints the per-topic inbox at
//! a fixed interval until Ctrl-C.

use chrono::Utc;
use clap::{Parser, Subcommand};
use mqtt_inbox::config::ClientConfig;
use mqtt_inbox::observability::init_default_logging;
use mqtt_inbox::protocol::qos_from_level;
use mqtt_inbox::MqttManager;
use rand::Rng;
use rumqttc::QoS;
use serde::Serialize;
use std::path::PathBuf;
use std::process;
use std::sync::Arc;
use tokio::signal;
use tokio::sync::watch;
use tokio::time::{interval, Duration};
use tracing::{error, info, warn};

const SENSOR_FILTER: &str = "home/sensors/#";

/// MQTT client with a per-topic inbox
#[derive(Parser)]
#[command(name = "mqtt-inbox")]
#[command(about = "MQTT client that buffers received messages per topic")]
#[command(version)]
struct Cli {
    /// Configuration file path
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Subscribe to the sensor topics, simulate sensors and print the inbox
    Run {
        /// Seconds between simulated sensor readings
        #[arg(long, default_value_t = 5)]
        interval: u64,
        /// Seconds between inbox prints
        #[arg(long, default_value_t = 10)]
        poll: u64,
        /// Only listen; do not start the sensor simulation
        #[arg(long)]
        no_simulate: bool,
    },
    /// Validate configuration
    Config {
        /// Show current configuration
        #[arg(long)]
        show: bool,
    },
}

struct Sensor {
    name: &'static str,
    topic: &'static str,
    unit: &'static str,
    range: (f64, f64),
}

const SENSORS: [Sensor; 3] = [
    Sensor {
        name: "temperature",
        topic: "home/sensors/temperature",
        unit: "°C",
        range: (20.0, 30.0),
    },
    Sensor {
        name: "humidity",
        topic: "home/sensors/humidity",
        unit: "%",
        range: (40.0, 60.0),
    },
    Sensor {
        name: "pressure",
        topic: "home/sensors/pressure",
        unit: "hPa",
        range: (990.0, 1010.0),
    },
];

#[derive(Serialize)]
struct SensorReading<'a> {
    sensor: &'a str,
    value: f64,
    unit: &'a str,
    timestamp: f64,
    device_id: &'a str,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    init_default_logging();

    let config = match load_configuration(&cli.config) {
        Ok(config) => config,
        Err(e) => {
            error!("Failed to load configuration: {}", e);
            process::exit(1);
        }
    };

    let result = match cli.command {
        Commands::Run {
            interval,
            poll,
            no_simulate,
        } => run_inbox(config, interval.max(1), poll.max(1), !no_simulate).await,
        Commands::Config { show } => handle_config_command(&config, show),
    };

    if let Err(e) = result {
        error!("Command failed: {}", e);
        process::exit(1);
    }
}

fn load_configuration(config_path: &Option<PathBuf>) -> Result<ClientConfig, Box<dyn std::error::Error>> {
    if let Some(path) = config_path {
        info!("Loading configuration from: {}", path.display());
        return Ok(ClientConfig::load_from_file(path)?);
    }

    for path_str in ["mqtt-inbox.toml", "config/mqtt-inbox.toml"] {
        let path = PathBuf::from(path_str);
        if path.exists() {
            info!("Loading configuration from: {}", path.display());
            return Ok(ClientConfig::load_from_file(&path)?);
        }
    }

    info!("No configuration file found, using defaults");
    Ok(ClientConfig::default())
}

async fn run_inbox(
    config: ClientConfig,
    interval_secs: u64,
    poll_secs: u64,
    simulate: bool,
) -> Result<(), Box<dyn std::error::Error>> {
    let inbox = MqttManager::new(&config)?;
    info!(client_id = %inbox.client_id(), "Starting inbox client");

    inbox.connect(config.session.clean_session).await?;
    inbox.subscribe(SENSOR_FILTER, QoS::AtMostOnce).await?;

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let simulator = if simulate {
        // The simulator is a separate client, like a real device would be.
        let mut sensor_config = config.clone();
        sensor_config.broker.client_id = None;
        sensor_config.session.auto_subscribe.clear();
        let sensors = Arc::new(MqttManager::new(&sensor_config)?);
        sensors.connect(true).await?;
        Some((
            sensors.clone(),
            tokio::spawn(simulate_sensors(sensors, interval_secs, shutdown_rx)),
        ))
    } else {
        None
    };

    let mut ticker = interval(Duration::from_secs(poll_secs));
    ticker.tick().await;

    info!("Inbox is running, press Ctrl-C to stop");
    loop {
        tokio::select! {
            _ = signal::ctrl_c() => {
                info!("Received Ctrl-C, shutting down gracefully...");
                break;
            }
            _ = ticker.tick() => print_inbox(&inbox),
        }
    }

    let _ = shutdown_tx.send(true);
    if let Some((sensors, handle)) = simulator {
        if let Err(e) = handle.await {
            warn!("Sensor simulation ended with error: {}", e);
        }
        if let Err(e) = sensors.disconnect().await {
            warn!("Sensor client disconnect failed: {}", e);
        }
    }

    for record in inbox.diagnostics().failures() {
        warn!(at = %record.at, "Recorded failure: {:?}", record.diagnostic);
    }
    inbox.disconnect().await?;
    Ok(())
}

async fn simulate_sensors(
    client: Arc<MqttManager>,
    interval_secs: u64,
    mut shutdown_rx: watch::Receiver<bool>,
) {
    let mut ticker = interval(Duration::from_secs(interval_secs));
    loop {
        tokio::select! {
            _ = shutdown_rx.changed() => break,
            _ = ticker.tick() => {}
        }

        for sensor in &SENSORS {
            let (value, qos) = {
                let mut rng = rand::thread_rng();
                let value = rng.gen_range(sensor.range.0..=sensor.range.1);
                (
                    (value * 100.0).round() / 100.0,
                    qos_from_level(rng.gen_range(0..=2)).unwrap_or(QoS::AtMostOnce),
                )
            };
            let reading = SensorReading {
                sensor: sensor.name,
                value,
                unit: sensor.unit,
                timestamp: Utc::now().timestamp_millis() as f64 / 1000.0,
                device_id: client.client_id(),
            };

            // Failures are already logged and recorded by the client.
            let _ = client.publish_json(sensor.topic, &reading, qos, false).await;
        }
    }
}

fn print_inbox(inbox: &MqttManager) {
    for sensor in &SENSORS {
        let messages = inbox.get_messages(sensor.topic, true);
        if messages.is_empty() {
            continue;
        }
        println!("Messages for {} ({}):", sensor.topic, messages.len());
        for message in messages {
            println!("  {message}");
        }
    }
}

fn handle_config_command(config: &ClientConfig, show: bool) -> Result<(), Box<dyn std::error::Error>> {
    config.validate()?;
    if show {
        println!("Current configuration:");
        println!("{}", toml::to_string_pretty(&config.redacted())?);
    }

    info!("Configuration validation complete");
    Ok(())
}
