use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::warn;

use crate::mqtt::MqttOptions;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ControllerConfig {
    pub sample_interval_ms: u64,
    pub poll_interval_ms: u64,
    pub ack_timeout_ms: u64,
    pub connect_timeout_ms: u64,
    pub keep_alive_secs: u16,
    pub min_valid_temp_c: f32,
    pub max_valid_temp_c: f32,
    pub respike_resets_timer: bool,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            sample_interval_ms: 5_000,
            poll_interval_ms: 100,
            ack_timeout_ms: 5_000,
            connect_timeout_ms: 5_000,
            keep_alive_secs: 60,
            min_valid_temp_c: -55.0,
            max_valid_temp_c: 125.0,
            respike_resets_timer: true,
        }
    }
}

impl ControllerConfig {
    pub fn is_plausible(&self, temp_c: f32) -> bool {
        temp_c.is_finite() && (self.min_valid_temp_c..=self.max_valid_temp_c).contains(&temp_c)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct Settings {
    pub on_temperature: f32,
    pub on_rate: f32,
    pub off_temperature: f32,
    #[serde(rename = "minimum-minutes")]
    pub minimum_run_minutes: u32,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            on_temperature: 25.0,
            on_rate: 10.0,
            off_temperature: 23.0,
            minimum_run_minutes: 5,
        }
    }
}

#[derive(Debug, Error)]
pub enum SettingsError {
    #[error("settings payload is not utf-8")]
    NotUtf8,
    #[error("invalid settings payload: {0}")]
    Invalid(#[from] serde_json::Error),
    #[error("{field} must be a finite number")]
    NotFinite { field: &'static str },
}

impl Settings {
    pub fn from_update_payload(payload: &[u8]) -> Result<Self, SettingsError> {
        let text = std::str::from_utf8(payload).map_err(|_| SettingsError::NotUtf8)?;
        let settings: Settings = serde_json::from_str(text.trim())?;
        settings.validate()?;
        Ok(settings)
    }

    pub fn validate(&self) -> Result<(), SettingsError> {
        let fields = [
            ("on-temperature", self.on_temperature),
            ("on-rate", self.on_rate),
            ("off-temperature", self.off_temperature),
        ];
        for (field, value) in fields {
            if !value.is_finite() {
                return Err(SettingsError::NotFinite { field });
            }
        }
        Ok(())
    }

    pub fn minimum_run_ms(&self) -> u64 {
        u64::from(self.minimum_run_minutes) * 60_000
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NetworkConfig {
    pub mqtt_host: String,
    pub mqtt_port: u16,
    pub client_id: String,
    pub clean_session: bool,
    pub topic_root: String,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            mqtt_host: "loft.local".to_string(),
            mqtt_port: 1883,
            client_id: "shower".to_string(),
            clean_session: false,
            topic_root: "shower".to_string(),
        }
    }
}

impl NetworkConfig {
    pub fn apply_env_overrides(&mut self, var: impl Fn(&str) -> Option<String>) {
        if let Some(host) = var("MQTT_HOST") {
            self.mqtt_host = host;
        }
        if let Some(port) = var("MQTT_PORT") {
            match port.parse::<u16>() {
                Ok(port) => self.mqtt_port = port,
                Err(_) => warn!("ignoring invalid MQTT_PORT `{port}`"),
            }
        }
        if let Some(client_id) = var("MQTT_CLIENT_ID") {
            self.client_id = client_id;
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RuntimeConfig {
    #[serde(default)]
    pub controller: ControllerConfig,
    #[serde(default)]
    pub settings: Settings,
    #[serde(default)]
    pub network: NetworkConfig,
}

impl RuntimeConfig {
    pub fn mqtt_options(&self) -> MqttOptions {
        MqttOptions {
            client_id: self.network.client_id.clone(),
            keep_alive_secs: self.controller.keep_alive_secs,
            clean_session: self.network.clean_session,
            connect_timeout: Duration::from_millis(self.controller.connect_timeout_ms),
            ack_timeout: Duration::from_millis(self.controller.ack_timeout_ms),
        }
    }
}
