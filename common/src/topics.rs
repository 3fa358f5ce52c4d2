pub const DEFAULT_TOPIC_ROOT: &str = "shower";

pub const SUFFIX_CURRENT_STATE: &str = "current/state";
pub const SUFFIX_CURRENT_RATE: &str = "current/rate";
pub const SUFFIX_CURRENT_TEMPERATURE: &str = "current/temperature";
pub const SUFFIX_CURRENT_EXTRACTOR: &str = "current/extractor";

pub const SUFFIX_SETTINGS_ON_TEMPERATURE: &str = "settings/on-temperature";
pub const SUFFIX_SETTINGS_ON_RATE: &str = "settings/on-rate";
pub const SUFFIX_SETTINGS_OFF_TEMPERATURE: &str = "settings/off-temperature";
pub const SUFFIX_SETTINGS_MINIMUM_MINUTES: &str = "settings/minimum-minutes";

pub const SUFFIX_UPDATE_SETTINGS: &str = "update-settings";
pub const SUFFIX_UPDATE_STATE: &str = "update-state";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Topics {
    pub current_state: String,
    pub current_rate: String,
    pub current_temperature: String,
    pub current_extractor: String,
    pub settings_on_temperature: String,
    pub settings_on_rate: String,
    pub settings_off_temperature: String,
    pub settings_minimum_minutes: String,
    pub update_settings: String,
    pub update_state: String,
}

impl Topics {
    pub fn new(root: &str) -> Self {
        let root = root.trim_end_matches('/');
        let topic = |suffix: &str| format!("{root}/{suffix}");
        Self {
            current_state: topic(SUFFIX_CURRENT_STATE),
            current_rate: topic(SUFFIX_CURRENT_RATE),
            current_temperature: topic(SUFFIX_CURRENT_TEMPERATURE),
            current_extractor: topic(SUFFIX_CURRENT_EXTRACTOR),
            settings_on_temperature: topic(SUFFIX_SETTINGS_ON_TEMPERATURE),
            settings_on_rate: topic(SUFFIX_SETTINGS_ON_RATE),
            settings_off_temperature: topic(SUFFIX_SETTINGS_OFF_TEMPERATURE),
            settings_minimum_minutes: topic(SUFFIX_SETTINGS_MINIMUM_MINUTES),
            update_settings: topic(SUFFIX_UPDATE_SETTINGS),
            update_state: topic(SUFFIX_UPDATE_STATE),
        }
    }
}

impl Default for Topics {
    fn default() -> Self {
        Self::new(DEFAULT_TOPIC_ROOT)
    }
}
