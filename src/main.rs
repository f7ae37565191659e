//! Device agent - Main Entry Point
//!
//! Loads configuration and certificates, connects to the broker, runs the
//! device activities until a signal or a fatal failure, then shuts down.

use clap::{Parser, Subcommand};
use device_agent::config::{
    DeviceConfig, DEFAULT_CONFIG_FILE, DEFAULT_MQTT_HOST, ENV_CONFIG_FILE, ENV_MQTT_HOST,
};
use device_agent::device::{DeviceService, TerminationReason};
use device_agent::observability::{init_logging, LoggingOptions};
use device_agent::tls::load_certificates;
use device_agent::transport::mqtt::MqttClient;
use device_agent::DeviceError;
use std::path::{Path, PathBuf};
use std::process;
use tokio::signal;
use tracing::{error, info, Level};

/// Simulated IoT device publishing SenML telemetry over MQTT
#[derive(Parser)]
#[command(name = "device-agent")]
#[command(about = "Simulated IoT device publishing SenML telemetry over MQTT")]
#[command(version)]
struct Cli {
    /// Configuration file path
    #[arg(
        short,
        long,
        value_name = "FILE",
        env = ENV_CONFIG_FILE,
        default_value = DEFAULT_CONFIG_FILE
    )]
    config: PathBuf,

    /// Broker URI; defaults to `mqtt.host` from the configuration file
    #[arg(long, value_name = "URI", env = ENV_MQTT_HOST)]
    mqtt_host: Option<String>,

    /// Verbose logging (-v debug, -vv trace)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Connect and run the device (default)
    Run,
    /// Validate configuration
    Config {
        /// Show current configuration with secrets redacted
        #[arg(long)]
        show: bool,
    },
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    // Logging needs the configured fallback level, so a load failure is
    // reported on stderr directly.
    let config = match load_configuration(&cli.config) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Failed to load configuration from {}: {e}", cli.config.display());
            process::exit(1);
        }
    };

    let mut logging = LoggingOptions::from_env(&config.server.log_level);
    match cli.verbose {
        0 => {}
        1 => logging.level = Level::DEBUG,
        _ => logging.level = Level::TRACE,
    }
    init_logging(logging.level, logging.format, logging.include_spans);

    info!(
        config = %cli.config.display(),
        "Starting device agent v{}",
        env!("CARGO_PKG_VERSION")
    );

    let result = match cli.command.unwrap_or(Commands::Run) {
        Commands::Run => {
            let broker_url = resolve_broker_url(cli.mqtt_host, &config);
            match run_device(config, &broker_url).await {
                // The service already logged why it stopped
                Ok(reason) if reason.is_failure() => process::exit(1),
                other => other.map(|_| ()),
            }
        }
        Commands::Config { show } => handle_config_command(&config, show),
    };

    match result {
        Ok(()) => info!("Application shutdown complete"),
        Err(e) => {
            error!(error = %e, "Device agent failed");
            process::exit(1);
        }
    }
}

fn load_configuration(path: &Path) -> Result<DeviceConfig, DeviceError> {
    Ok(DeviceConfig::load_from_file(path)?)
}

/// CLI flag or environment first, then the file, then the built-in default
fn resolve_broker_url(cli_host: Option<String>, config: &DeviceConfig) -> String {
    cli_host
        .filter(|host| !host.trim().is_empty())
        .or_else(|| {
            let host = config.mqtt.host.trim();
            (!host.is_empty()).then(|| host.to_string())
        })
        .unwrap_or_else(|| DEFAULT_MQTT_HOST.to_string())
}

/// Run the device until it terminates; the reason decides the exit status
async fn run_device(
    config: DeviceConfig,
    broker_url: &str,
) -> Result<TerminationReason, DeviceError> {
    let tls = load_certificates(&config.mqtt)?;
    let transport =
        MqttClient::new(&config, broker_url, tls.as_ref()).map_err(DeviceError::connect)?;

    info!(
        device_id = %config.device_id(),
        broker = %broker_url,
        mtls = tls.is_some(),
        "Device configured"
    );

    let mut service = DeviceService::new(config, transport);
    service.connect().await?;

    if let Err(e) = service.start().await {
        let _ = service.shutdown().await;
        return Err(e);
    }

    let reason = service.wait_for_termination(shutdown_signal()).await?;
    service.shutdown().await?;
    Ok(reason)
}

/// Resolves on SIGINT or SIGTERM
async fn shutdown_signal() {
    let mut sigterm = match signal::unix::signal(signal::unix::SignalKind::terminate()) {
        Ok(sigterm) => sigterm,
        Err(e) => {
            error!(error = %e, "Failed to install SIGTERM handler, relying on SIGINT");
            let _ = signal::ctrl_c().await;
            return;
        }
    };

    tokio::select! {
        _ = signal::ctrl_c() => {
            info!("Received SIGINT, shutting down gracefully...");
        }
        _ = sigterm.recv() => {
            info!("Received SIGTERM, shutting down gracefully...");
        }
    }
}

fn handle_config_command(config: &DeviceConfig, show: bool) -> Result<(), DeviceError> {
    if show {
        let rendered = toml::to_string_pretty(&config.redacted())
            .map_err(|e| DeviceError::InvalidState(format!("cannot render configuration: {e}")))?;
        println!("{rendered}");
    }

    info!(device_id = %config.device_id(), "Configuration validation complete");
    Ok(())
}
