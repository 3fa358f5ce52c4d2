use std::{
    io::ErrorKind,
    path::{Path, PathBuf},
    sync::OnceLock,
    time::{Duration, Instant},
};

use anyhow::Context;
use tracing::{info, warn};

use extractor_common::{Gateway, GatewayConfig, MqttClient, RuntimeConfig, TcpConnector};

use crate::devices::{
    GpioActuator, HostActuator, HostSensor, JsonSettingsStore, LogActuator, SimulatedSensor,
    W1Sensor,
};

const SIMULATED_BASELINE_C: f32 = 20.0;

pub async fn run() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let data_dir = data_dir();
    let mut runtime = load_runtime_config(&data_dir.join("runtime.json"))
        .await
        .unwrap_or_else(|err| {
            warn!("failed to load runtime config: {err:#}");
            RuntimeConfig::default()
        });
    runtime
        .network
        .apply_env_overrides(|key| std::env::var(key).ok());

    let store = JsonSettingsStore::new(data_dir.join("settings.json"), runtime.settings);
    let sensor = sensor_from_env();
    let actuator = actuator_from_env();

    info!(
        "extractor controller `{}` using broker {}:{}",
        runtime.network.client_id, runtime.network.mqtt_host, runtime.network.mqtt_port
    );

    let client = MqttClient::new(TcpConnector, runtime.mqtt_options());
    let mut gateway = Gateway::new(
        client,
        GatewayConfig::from_runtime(&runtime),
        store,
        sensor,
        actuator,
    );
    let poll_interval = Duration::from_millis(runtime.controller.poll_interval_ms);

    let shutdown = tokio::signal::ctrl_c();
    tokio::pin!(shutdown);

    loop {
        let now_ms = monotonic_ms();
        if gateway.is_due(now_ms) {
            gateway.tick(now_ms).await;
        }

        let message = tokio::select! {
            result = &mut shutdown => {
                result.context("failed to listen for shutdown signal")?;
                info!("shutdown requested");
                break;
            }
            message = gateway.next_message(poll_interval) => message,
        };

        if let Some(message) = message {
            gateway
                .handle_message(&message.topic, &message.payload, monotonic_ms())
                .await;
        }
    }

    gateway.shutdown().await;
    Ok(())
}

fn data_dir() -> PathBuf {
    std::env::var("EXTRACTOR_DATA_DIR")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("./.extractor"))
}

async fn load_runtime_config(path: &Path) -> anyhow::Result<RuntimeConfig> {
    match tokio::fs::read(path).await {
        Ok(raw) => serde_json::from_slice::<RuntimeConfig>(&raw)
            .with_context(|| format!("invalid runtime config at {}", path.display())),
        Err(err) if err.kind() == ErrorKind::NotFound => Ok(RuntimeConfig::default()),
        Err(err) => Err(err).with_context(|| format!("failed to read {}", path.display())),
    }
}

fn sensor_from_env() -> HostSensor {
    match std::env::var("EXTRACTOR_W1_DEVICE") {
        Ok(device_id) => {
            info!("reading temperature from 1-Wire device {device_id}");
            HostSensor::W1(W1Sensor::for_device(&device_id))
        }
        Err(_) => {
            info!("no 1-Wire device configured, simulating temperature");
            HostSensor::Simulated(SimulatedSensor::new(SIMULATED_BASELINE_C))
        }
    }
}

fn actuator_from_env() -> HostActuator {
    match std::env::var("EXTRACTOR_FAN_GPIO") {
        Ok(value_path) => {
            info!("driving extractor relay through {value_path}");
            HostActuator::Gpio(GpioActuator::new(PathBuf::from(value_path)))
        }
        Err(_) => HostActuator::Log(LogActuator),
    }
}

fn monotonic_ms() -> u64 {
    static START: OnceLock<Instant> = OnceLock::new();
    START
        .get_or_init(Instant::now)
        .elapsed()
        .as_millis()
        .try_into()
        .unwrap_or(u64::MAX)
}
