use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ControlState {
    Idle,
    Heating,
    Cooldown,
}

impl ControlState {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Heating => "heating",
            Self::Cooldown => "cooldown",
        }
    }

    // `initial` and `waiting` come from older switch firmware.
    pub fn parse_override(label: &str) -> Option<Self> {
        match label.trim().to_ascii_lowercase().as_str() {
            "idle" | "off" => Some(Self::Idle),
            "heating" | "initial" | "on" => Some(Self::Heating),
            "cooldown" | "waiting" => Some(Self::Cooldown),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FanState {
    On,
    Off,
}

impl FanState {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::On => "on",
            Self::Off => "off",
        }
    }
}

impl From<bool> for FanState {
    fn from(on: bool) -> Self {
        if on {
            Self::On
        } else {
            Self::Off
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn override_labels_map_to_states() {
        assert_eq!(ControlState::parse_override("idle"), Some(ControlState::Idle));
        assert_eq!(ControlState::parse_override("OFF"), Some(ControlState::Idle));
        assert_eq!(ControlState::parse_override("initial"), Some(ControlState::Heating));
        assert_eq!(ControlState::parse_override(" on\n"), Some(ControlState::Heating));
        assert_eq!(ControlState::parse_override("waiting"), Some(ControlState::Cooldown));
        assert_eq!(ControlState::parse_override("boost"), None);
    }

    #[test]
    fn labels_round_trip_through_parser() {
        for state in [ControlState::Idle, ControlState::Heating, ControlState::Cooldown] {
            assert_eq!(ControlState::parse_override(state.as_str()), Some(state));
        }
    }
}
