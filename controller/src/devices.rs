use std::{
    fs,
    io::{self, ErrorKind},
    path::{Path, PathBuf},
};

use extractor_common::{Actuator, SensorSource, Settings, SettingsStore, StoreError};
use thiserror::Error;
use tracing::{info, warn};

const W1_DEVICES_DIR: &str = "/sys/bus/w1/devices";

pub struct JsonSettingsStore {
    path: PathBuf,
    defaults: Settings,
}

impl JsonSettingsStore {
    pub fn new(path: PathBuf, defaults: Settings) -> Self {
        Self { path, defaults }
    }
}

impl SettingsStore for JsonSettingsStore {
    fn load(&mut self) -> Result<Settings, StoreError> {
        match fs::read(&self.path) {
            Ok(raw) => Ok(serde_json::from_slice(&raw)?),
            Err(err) if err.kind() == ErrorKind::NotFound => {
                info!(
                    "no saved settings at {}, writing defaults",
                    self.path.display()
                );
                let defaults = self.defaults;
                self.save(&defaults)?;
                Ok(defaults)
            }
            Err(err) => Err(err.into()),
        }
    }

    fn save(&mut self, settings: &Settings) -> Result<(), StoreError> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        let payload = serde_json::to_vec_pretty(settings)?;
        fs::write(&self.path, payload)?;
        Ok(())
    }
}

#[derive(Debug, Error)]
pub enum W1Error {
    #[error("failed to read {path}: {source}")]
    Read { path: String, source: io::Error },
    #[error("crc check failed")]
    Crc,
    #[error("no temperature field")]
    MissingReading,
    #[error("unparseable temperature `{0}`")]
    BadValue(String),
}

pub struct W1Sensor {
    slave_path: PathBuf,
}

impl W1Sensor {
    pub fn for_device(device_id: &str) -> Self {
        Self::at(Path::new(W1_DEVICES_DIR).join(device_id).join("w1_slave"))
    }

    pub fn at(slave_path: PathBuf) -> Self {
        Self { slave_path }
    }

    pub fn read_celsius(&self) -> Result<f32, W1Error> {
        let raw = fs::read_to_string(&self.slave_path).map_err(|source| W1Error::Read {
            path: self.slave_path.display().to_string(),
            source,
        })?;
        parse_w1_slave(&raw)
    }
}

impl SensorSource for W1Sensor {
    fn sample(&mut self) -> f32 {
        match self.read_celsius() {
            Ok(temp_c) => temp_c,
            Err(err) => {
                warn!("temperature probe read failed: {err}");
                f32::NAN
            }
        }
    }
}

pub fn parse_w1_slave(raw: &str) -> Result<f32, W1Error> {
    let mut lines = raw.lines();
    let crc_ok = lines
        .next()
        .is_some_and(|line| line.trim_end().ends_with("YES"));
    if !crc_ok {
        return Err(W1Error::Crc);
    }

    let value = lines
        .next()
        .and_then(|line| line.split_once("t="))
        .map(|(_, value)| value.trim())
        .ok_or(W1Error::MissingReading)?;
    let milli_c: i32 = value
        .parse()
        .map_err(|_| W1Error::BadValue(value.to_string()))?;

    Ok(milli_c as f32 / 1000.0)
}

pub struct SimulatedSensor {
    tick: u32,
    baseline_c: f32,
}

impl SimulatedSensor {
    const IDLE_TICKS: u32 = 24;
    const RAMP_TICKS: u32 = 6;
    const PLATEAU_TICKS: u32 = 60;
    const DECAY_TICKS: u32 = 90;
    const RAMP_STEP_C: f32 = 1.5;

    pub fn new(baseline_c: f32) -> Self {
        Self {
            tick: 0,
            baseline_c,
        }
    }

    fn temperature_at(&self, tick: u32) -> f32 {
        let peak = self.baseline_c + Self::RAMP_STEP_C * Self::RAMP_TICKS as f32;
        let ramp_start = Self::IDLE_TICKS;
        let plateau_start = ramp_start + Self::RAMP_TICKS;
        let decay_start = plateau_start + Self::PLATEAU_TICKS;

        if tick < ramp_start {
            self.baseline_c
        } else if tick < plateau_start {
            self.baseline_c + Self::RAMP_STEP_C * (tick - ramp_start + 1) as f32
        } else if tick < decay_start {
            peak
        } else {
            let progress = (tick - decay_start) as f32 / Self::DECAY_TICKS as f32;
            peak - (peak - self.baseline_c) * progress
        }
    }

    fn cycle_len() -> u32 {
        Self::IDLE_TICKS + Self::RAMP_TICKS + Self::PLATEAU_TICKS + Self::DECAY_TICKS
    }
}

impl SensorSource for SimulatedSensor {
    fn sample(&mut self) -> f32 {
        let temp_c = self.temperature_at(self.tick);
        self.tick = (self.tick + 1) % Self::cycle_len();
        temp_c
    }
}

pub struct GpioActuator {
    value_path: PathBuf,
}

impl GpioActuator {
    pub fn new(value_path: PathBuf) -> Self {
        Self { value_path }
    }
}

impl Actuator for GpioActuator {
    fn set_on(&mut self, on: bool) {
        let level = if on { "1" } else { "0" };
        if let Err(err) = fs::write(&self.value_path, level) {
            warn!(
                "failed to drive relay at {}: {err}",
                self.value_path.display()
            );
        }
    }
}

#[derive(Default)]
pub struct LogActuator;

impl Actuator for LogActuator {
    fn set_on(&mut self, on: bool) {
        info!("extractor relay {}", if on { "on" } else { "off" });
    }
}

pub enum HostSensor {
    W1(W1Sensor),
    Simulated(SimulatedSensor),
}

impl SensorSource for HostSensor {
    fn sample(&mut self) -> f32 {
        match self {
            Self::W1(sensor) => sensor.sample(),
            Self::Simulated(sensor) => sensor.sample(),
        }
    }
}

pub enum HostActuator {
    Gpio(GpioActuator),
    Log(LogActuator),
}

impl Actuator for HostActuator {
    fn set_on(&mut self, on: bool) {
        match self {
            Self::Gpio(actuator) => actuator.set_on(on),
            Self::Log(actuator) => actuator.set_on(on),
        }
    }
}
