pub mod config;
pub mod extractor;
pub mod gateway;
pub mod mqtt;
pub mod ports;
pub mod topics;
pub mod trend;
pub mod types;

pub use config::{ControllerConfig, NetworkConfig, RuntimeConfig, Settings, SettingsError};
pub use extractor::{EngineAction, ExtractorEngine, TransitionPolicy};
pub use gateway::{Gateway, GatewayConfig, Inbound};
pub use mqtt::{MqttClient, MqttError, MqttOptions, QoS, TcpConnector};
pub use ports::{Actuator, MemorySettingsStore, SensorSource, SettingsStore, StoreError};
pub use topics::*;
pub use trend::TrendTracker;
pub use types::{ControlState, FanState};
