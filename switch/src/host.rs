use std::time::Duration;

use anyhow::{anyhow, Context};
use tracing::{info, warn};

use extractor_common::{
    mqtt::Connector, ControlState, MqttClient, MqttOptions, NetworkConfig, QoS, TcpConnector,
    Topics,
};

const SWITCH_CLIENT_ID: &str = "extractor-switch";
const DEFAULT_OVERRIDE: &str = "heating";

#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub attempts: u32,
    pub pause: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            attempts: 3,
            pause: Duration::from_secs(2),
        }
    }
}

pub async fn run() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let label = std::env::args()
        .nth(1)
        .unwrap_or_else(|| DEFAULT_OVERRIDE.to_string());
    let state = ControlState::parse_override(&label)
        .with_context(|| format!("unknown state override `{label}`"))?;

    let mut network = NetworkConfig {
        client_id: SWITCH_CLIENT_ID.to_string(),
        ..NetworkConfig::default()
    };
    network.apply_env_overrides(|key| std::env::var(key).ok());
    if let Ok(root) = std::env::var("EXTRACTOR_TOPIC_ROOT") {
        network.topic_root = root;
    }

    let mut options = MqttOptions::new(network.client_id.clone());
    options.clean_session = true;
    let mut client = MqttClient::new(TcpConnector, options);
    let topics = Topics::new(&network.topic_root);

    send_override(
        &mut client,
        &network,
        &topics.update_state,
        state,
        RetryPolicy::default(),
    )
    .await
}

pub async fn send_override<C: Connector>(
    client: &mut MqttClient<C>,
    network: &NetworkConfig,
    topic: &str,
    state: ControlState,
    retry: RetryPolicy,
) -> anyhow::Result<()> {
    let attempts = retry.attempts.max(1);
    let mut last_err = anyhow!("no attempt made");

    for attempt in 1..=attempts {
        let result = publish_once(client, network, topic, state).await;
        client.disconnect().await;

        match result {
            Ok(()) => {
                info!("sent `{}` to {topic}", state.as_str());
                return Ok(());
            }
            Err(err) => {
                warn!("attempt {attempt}/{attempts} failed: {err}");
                last_err = err.into();
            }
        }

        if attempt < attempts {
            tokio::time::sleep(retry.pause).await;
        }
    }

    Err(last_err.context(format!(
        "failed to deliver state override to {}:{}",
        network.mqtt_host, network.mqtt_port
    )))
}

async fn publish_once<C: Connector>(
    client: &mut MqttClient<C>,
    network: &NetworkConfig,
    topic: &str,
    state: ControlState,
) -> Result<(), extractor_common::MqttError> {
    client.connect(&network.mqtt_host, network.mqtt_port).await?;
    // Not retained: a reconnecting controller must not replay an old press.
    client
        .publish(topic, state.as_str().as_bytes(), QoS::AtLeastOnce, false)
        .await
}
