use buttonoff::capture::{Listener, PcapListener};
use buttonoff::config::{write_default_config, Config};
use buttonoff::handler::DashButtonEventHandler;
use buttonoff::mqtt::{MqttPublisher, Publisher};
use clap::Parser;
use color_eyre::eyre::WrapErr;
use color_eyre::Result;
use std::path::PathBuf;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{info, info_span, warn};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

/// Publishes Dash button presses to MQTT
#[derive(Parser, Debug)]
#[command(name = "buttonoffd", version, about)]
struct Args {
    /// Configuration file
    #[arg(long, default_value = "./buttonoff.toml")]
    config: PathBuf,

    /// Capture interface, overrides listener.interface
    #[arg(long)]
    interface: Option<String>,

    /// Broker URI, overrides mqtt.broker_addr
    #[arg(long)]
    broker: Option<String>,

    /// Log filter used when RUST_LOG is unset
    #[arg(long, default_value = "info")]
    log: String,

    /// Write the default configuration to --config and exit
    #[arg(long)]
    write_default_config: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    setup(&args.log)?;

    if args.write_default_config {
        return write_default_config(&args.config).wrap_err("Could not write default config");
    }

    let mut config = Config::load(&args.config)
        .wrap_err_with(|| format!("Could not load config from {}", args.config.display()))?;
    if let Some(interface) = args.interface {
        config.listener.interface = interface;
    }
    if let Some(broker) = args.broker {
        config.mqtt.broker_addr = broker;
    }
    config.validate().wrap_err("Invalid configuration")?;

    let root = info_span!("buttonoffd");
    let publisher = Arc::new(
        MqttPublisher::connect(&config.mqtt, &root)
            .await
            .wrap_err("Could not connect to MQTT broker")?,
    );

    let handler = match DashButtonEventHandler::new(
        &config.general,
        &config.buttons,
        publisher.clone(),
        &root,
    ) {
        Ok(handler) => Arc::new(handler),
        Err(e) => {
            close_publisher(&publisher).await;
            return Err(e).wrap_err("Could not set up event handler");
        }
    };

    let listener = match PcapListener::new(&config.listener, handler, &root) {
        Ok(listener) => listener,
        Err(e) => {
            close_publisher(&publisher).await;
            return Err(e).wrap_err("Could not start packet capture");
        }
    };

    let cancel = CancellationToken::new();
    tokio::spawn(watch_signals(cancel.clone()));

    let capture_cancel = cancel.clone();
    let capture = async move {
        let result = listener.run(capture_cancel.clone()).await;
        // The publisher has nothing left to do once capture stops.
        capture_cancel.cancel();
        result
    };

    let (capture_result, publish_result) = tokio::join!(capture, publisher.run(cancel.clone()));
    publish_result.wrap_err("MQTT shutdown failed")?;
    capture_result.wrap_err("Packet capture failed")?;

    info!("Shutdown complete");
    Ok(())
}

fn setup(log_filter: &str) -> Result<()> {
    if std::env::var("RUST_LIB_BACKTRACE").is_err() {
        std::env::set_var("RUST_LIB_BACKTRACE", "0")
    }
    color_eyre::install()?;
    if std::env::var("RUST_LOG").is_err() {
        std::env::set_var("RUST_LOG", log_filter)
    }
    setup_logging_env();
    Ok(())
}

fn setup_logging_env() {
    FmtSubscriber::builder()
        .with_env_filter(EnvFilter::from_default_env())
        .with_target(false)
        .with_thread_ids(true)
        .with_file(true)
        .with_line_number(true)
        .init();
}

async fn close_publisher(publisher: &MqttPublisher) {
    if let Err(e) = publisher.close().await {
        warn!("Could not close MQTT connection: {}", e);
    }
}

async fn watch_signals(cancel: CancellationToken) {
    let interrupt = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!("Could not listen for Ctrl-C: {}", e);
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
                warn!("Could not listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = cancel.cancelled() => return,
        _ = interrupt => {}
        _ = terminate => {}
    }
    info!("Received shutdown signal");
    cancel.cancel();
}
