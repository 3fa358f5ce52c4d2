use std::time::Duration;

use tracing::{debug, info, warn};

use crate::{
    config::{ControllerConfig, RuntimeConfig, Settings},
    extractor::{EngineAction, ExtractorEngine, TransitionPolicy},
    mqtt::{Connector, MqttClient, MqttError, Publish, QoS},
    ports::{Actuator, SensorSource, SettingsStore},
    topics::Topics,
    trend::TrendTracker,
    types::{ControlState, FanState},
};

const MAX_MQTT_PAYLOAD_BYTES: usize = 512;

#[derive(Debug, Clone)]
pub struct GatewayConfig {
    pub host: String,
    pub port: u16,
    pub topics: Topics,
    pub controller: ControllerConfig,
}

impl GatewayConfig {
    pub fn from_runtime(runtime: &RuntimeConfig) -> Self {
        Self {
            host: runtime.network.mqtt_host.clone(),
            port: runtime.network.mqtt_port,
            topics: Topics::new(&runtime.network.topic_root),
            controller: runtime.controller.clone(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Inbound {
    Override(ControlState),
    SettingsUpdated(Settings),
    Rejected,
    Ignored,
}

pub struct Gateway<C: Connector, S, P, A> {
    client: MqttClient<C>,
    config: GatewayConfig,
    engine: ExtractorEngine,
    trend: TrendTracker,
    store: S,
    sensor: P,
    actuator: A,
    next_tick_ms: u64,
}

impl<C, S, P, A> Gateway<C, S, P, A>
where
    C: Connector,
    S: SettingsStore,
    P: SensorSource,
    A: Actuator,
{
    pub fn new(
        client: MqttClient<C>,
        config: GatewayConfig,
        mut store: S,
        sensor: P,
        mut actuator: A,
    ) -> Self {
        let settings = store.load().unwrap_or_else(|err| {
            warn!("failed to load settings, using defaults: {err}");
            Settings::default()
        });
        info!(
            "settings: on {:.1}C, on rate {:.1}, off {:.1}C, minimum {} min",
            settings.on_temperature,
            settings.on_rate,
            settings.off_temperature,
            settings.minimum_run_minutes
        );

        let policy = TransitionPolicy {
            respike_resets_timer: config.controller.respike_resets_timer,
        };

        // Relay starts in a known state.
        actuator.set_on(false);

        Self {
            client,
            config,
            engine: ExtractorEngine::new(settings, policy),
            trend: TrendTracker::new(),
            store,
            sensor,
            actuator,
            next_tick_ms: 0,
        }
    }

    pub fn engine(&self) -> &ExtractorEngine {
        &self.engine
    }

    pub fn trend(&self) -> &TrendTracker {
        &self.trend
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn actuator(&self) -> &A {
        &self.actuator
    }

    pub fn is_connected(&self) -> bool {
        self.client.is_connected()
    }

    pub fn is_due(&self, now_ms: u64) -> bool {
        now_ms >= self.next_tick_ms
    }

    pub async fn ensure_connected(&mut self) -> Result<(), MqttError> {
        if self.client.is_connected() {
            return Ok(());
        }

        match self.open_session().await {
            Ok(()) => Ok(()),
            Err(err) => {
                warn!(
                    "mqtt session with {}:{} failed: {err}",
                    self.config.host, self.config.port
                );
                self.client.disconnect().await;
                Err(err)
            }
        }
    }

    async fn open_session(&mut self) -> Result<(), MqttError> {
        self.client
            .connect(&self.config.host, self.config.port)
            .await?;

        let topics = &self.config.topics;
        self.client
            .subscribe(&[
                (topics.update_state.as_str(), QoS::AtLeastOnce),
                (topics.update_settings.as_str(), QoS::AtLeastOnce),
            ])
            .await?;

        let settings = settings_messages(topics, self.engine.settings());
        publish_retained(&mut self.client, &settings).await?;
        let extractor = extractor_message(topics, self.engine.is_fan_on());
        publish_retained(&mut self.client, &[extractor]).await
    }

    pub async fn tick(&mut self, now_ms: u64) -> ControlState {
        self.next_tick_ms = now_ms.saturating_add(self.config.controller.sample_interval_ms);

        let temp_c = self.sensor.sample();
        let reading = if self.config.controller.is_plausible(temp_c) {
            self.trend.record(temp_c);
            let rate = self.trend.rate_of_change();
            let actions = self.engine.tick(temp_c, rate, now_ms);
            self.apply(&actions);
            debug!(
                "temp {temp_c:.1}C, rate {rate:.1}, state {}",
                self.engine.state().as_str()
            );
            Some((temp_c, rate, !actions.is_empty()))
        } else {
            warn!("ignoring implausible sensor reading {temp_c}");
            None
        };

        // A fresh session already announces the relay state.
        let was_connected = self.client.is_connected();
        if self.ensure_connected().await.is_err() {
            return self.engine.state();
        }

        let topics = &self.config.topics;
        let mut messages = vec![(
            topics.current_state.as_str(),
            self.engine.state().as_str().to_string(),
        )];
        if let Some((temp_c, rate, fan_changed)) = reading {
            messages.push((topics.current_rate.as_str(), format!("{rate:.1}")));
            messages.push((topics.current_temperature.as_str(), format!("{temp_c:.1}")));
            if fan_changed && was_connected {
                messages.push(extractor_message(topics, self.engine.is_fan_on()));
            }
        }

        if let Err(err) = publish_retained(&mut self.client, &messages).await {
            self.drop_session("telemetry publish", err).await;
        }
        self.engine.state()
    }

    pub async fn next_message(&mut self, wait: Duration) -> Option<Publish> {
        if !self.client.is_connected() {
            tokio::time::sleep(wait).await;
            return None;
        }

        match self.client.poll(wait).await {
            Ok(message) => message,
            Err(err) => {
                self.drop_session("inbound poll", err).await;
                None
            }
        }
    }

    pub async fn handle_message(&mut self, topic: &str, payload: &[u8], now_ms: u64) -> Inbound {
        if payload.len() > MAX_MQTT_PAYLOAD_BYTES {
            warn!(
                "dropping oversized payload on {topic} ({} bytes)",
                payload.len()
            );
            return Inbound::Rejected;
        }

        if topic == self.config.topics.update_state {
            self.handle_state_override(payload, now_ms).await
        } else if topic == self.config.topics.update_settings {
            self.handle_settings_update(payload).await
        } else {
            warn!("ignoring message on unknown topic {topic}");
            Inbound::Ignored
        }
    }

    async fn handle_state_override(&mut self, payload: &[u8], now_ms: u64) -> Inbound {
        let label = String::from_utf8_lossy(payload);
        let Some(state) = ControlState::parse_override(&label) else {
            warn!("unknown state override `{}`", label.trim());
            return Inbound::Rejected;
        };

        info!("state override: {}", state.as_str());
        let actions = self.engine.force_state(state, now_ms);
        self.apply(&actions);
        // Re-evaluate and republish on the next loop pass.
        self.next_tick_ms = now_ms;

        if !actions.is_empty() && self.client.is_connected() {
            let extractor = extractor_message(&self.config.topics, self.engine.is_fan_on());
            if let Err(err) = publish_retained(&mut self.client, &[extractor]).await {
                self.drop_session("extractor publish", err).await;
            }
        }
        Inbound::Override(state)
    }

    async fn handle_settings_update(&mut self, payload: &[u8]) -> Inbound {
        let requested = match Settings::from_update_payload(payload) {
            Ok(settings) => settings,
            Err(err) => {
                warn!("ignoring settings update: {err}");
                return Inbound::Rejected;
            }
        };

        let stored = match self.store.save(&requested).and_then(|()| self.store.load()) {
            Ok(settings) => settings,
            Err(err) => {
                warn!("settings store failed, keeping update in memory only: {err}");
                requested
            }
        };
        self.engine.set_settings(stored);
        info!(
            "settings updated: on {:.1}C, on rate {:.1}, off {:.1}C, minimum {} min",
            stored.on_temperature, stored.on_rate, stored.off_temperature, stored.minimum_run_minutes
        );

        if self.client.is_connected() {
            let messages = settings_messages(&self.config.topics, &stored);
            if let Err(err) = publish_retained(&mut self.client, &messages).await {
                self.drop_session("settings publish", err).await;
            }
        }
        Inbound::SettingsUpdated(stored)
    }

    pub async fn shutdown(&mut self) {
        if self.client.is_connected() {
            info!("disconnecting from broker");
        }
        self.client.disconnect().await;
    }

    fn apply(&mut self, actions: &[EngineAction]) {
        for action in actions {
            info!("engine action: {action:?}");
            match action {
                EngineAction::FanOn => self.actuator.set_on(true),
                EngineAction::FanOff => self.actuator.set_on(false),
            }
        }
    }

    async fn drop_session(&mut self, during: &str, err: MqttError) {
        if err.is_session_fatal() {
            warn!("{during} failed, dropping session: {err}");
            self.client.disconnect().await;
        } else {
            warn!("{during} failed: {err}");
        }
    }
}

async fn publish_retained<C: Connector>(
    client: &mut MqttClient<C>,
    messages: &[(&str, String)],
) -> Result<(), MqttError> {
    for (topic, payload) in messages {
        client
            .publish(topic, payload.as_bytes(), QoS::AtLeastOnce, true)
            .await?;
    }
    Ok(())
}

fn settings_messages<'a>(topics: &'a Topics, settings: &Settings) -> [(&'a str, String); 4] {
    [
        (
            topics.settings_on_temperature.as_str(),
            format!("{:.1}", settings.on_temperature),
        ),
        (
            topics.settings_on_rate.as_str(),
            format!("{:.1}", settings.on_rate),
        ),
        (
            topics.settings_off_temperature.as_str(),
            format!("{:.1}", settings.off_temperature),
        ),
        (
            topics.settings_minimum_minutes.as_str(),
            settings.minimum_run_minutes.to_string(),
        ),
    ]
}

fn extractor_message(topics: &Topics, fan_on: bool) -> (&str, String) {
    (
        topics.current_extractor.as_str(),
        FanState::from(fan_on).as_str().to_string(),
    )
}
