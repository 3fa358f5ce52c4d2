use std::io;

use thiserror::Error;

use crate::config::Settings;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("settings store i/o failed: {0}")]
    Io(#[from] io::Error),
    #[error("stored settings are unreadable: {0}")]
    Format(#[from] serde_json::Error),
}

pub trait SettingsStore {
    fn load(&mut self) -> Result<Settings, StoreError>;

    fn save(&mut self, settings: &Settings) -> Result<(), StoreError>;
}

// Faulty probes may report -127.0 or NaN instead of failing.
pub trait SensorSource {
    fn sample(&mut self) -> f32;
}

pub trait Actuator {
    fn set_on(&mut self, on: bool);
}

#[derive(Debug, Clone, Default)]
pub struct MemorySettingsStore {
    settings: Settings,
    saves: usize,
}

impl MemorySettingsStore {
    pub fn saves(&self) -> usize {
        self.saves
    }
}

impl SettingsStore for MemorySettingsStore {
    fn load(&mut self) -> Result<Settings, StoreError> {
        Ok(self.settings)
    }

    fn save(&mut self, settings: &Settings) -> Result<(), StoreError> {
        self.settings = *settings;
        self.saves += 1;
        Ok(())
    }
}
