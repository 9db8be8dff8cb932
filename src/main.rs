//! RideLink - headless sensor bridge
//!
//! Connects the sensor kinds listed in the configuration, logs every decoded
//! reading and status change, and disconnects cleanly on Ctrl-C.

use std::sync::Arc;

use crossbeam::channel;
use ridelink::sensors::events::forward_until_stopped;
use ridelink::sensors::{BtleTransport, ConnectionManager, SensorEvent};
use ridelink::storage::config::load_config;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = load_config()?;

    tracing_subscriber::registry()
        .with(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(&config.logging.filter)),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting RideLink v{}", env!("CARGO_PKG_VERSION"));

    let sensor_config = config.sensors.to_sensor_config();
    let transport = Arc::new(BtleTransport::new(sensor_config.clone()).await);
    let manager = ConnectionManager::new(transport, sensor_config);

    let environment = manager.refresh_environment().await;
    if !environment.supports_transport || !environment.enabled {
        tracing::warn!("Bluetooth unavailable: {:?}", environment);
    }

    let events = manager.subscribe().await;
    // Dropping the sender stops the logger.
    let (stop_tx, stop_rx) = channel::bounded::<()>(0);
    let logger = tokio::task::spawn_blocking(move || {
        forward_until_stopped(&events, &stop_rx, log_event);
    });

    for kind in &config.sensors.auto_connect {
        let manager = manager.clone();
        let kind = *kind;
        tokio::spawn(async move {
            // Failures are already recorded and published by the manager.
            let _ = manager.connect(kind).await;
        });
    }

    tokio::signal::ctrl_c().await?;

    // Every status change is published before shutdown returns.
    manager.shutdown().await;
    drop(stop_tx);
    logger.await?;

    Ok(())
}

fn log_event(event: SensorEvent) {
    match event {
        SensorEvent::Reading { kind, reading } => {
            tracing::info!("{}: {:?}", kind, reading);
        }
        SensorEvent::StatusChanged { kind, status } => {
            tracing::info!("{} is {}", kind, status);
        }
        SensorEvent::Error { kind, message } => {
            tracing::error!("{}: {}", kind, message);
        }
    }
}
