use crate::{config::Settings, types::ControlState};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineAction {
    FanOn,
    FanOff,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransitionPolicy {
    pub respike_resets_timer: bool,
}

impl Default for TransitionPolicy {
    fn default() -> Self {
        Self {
            respike_resets_timer: true,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ExtractorEngine {
    policy: TransitionPolicy,
    settings: Settings,

    state: ControlState,
    // Last commanded relay state; never read back from hardware.
    fan_on: bool,
    heating_start_ms: Option<u64>,
}

impl ExtractorEngine {
    pub fn new(settings: Settings, policy: TransitionPolicy) -> Self {
        Self {
            policy,
            settings,
            state: ControlState::Idle,
            fan_on: false,
            heating_start_ms: None,
        }
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn set_settings(&mut self, settings: Settings) -> bool {
        if self.settings != settings {
            self.settings = settings;
            true
        } else {
            false
        }
    }

    pub fn state(&self) -> ControlState {
        self.state
    }

    pub fn is_fan_on(&self) -> bool {
        self.fan_on
    }

    pub fn tick(&mut self, temp_c: f32, rate: f32, now_ms: u64) -> Vec<EngineAction> {
        let mut actions = Vec::new();

        if !temp_c.is_finite() || !rate.is_finite() {
            return actions;
        }

        // A fast ramp means water just started running, whatever state we are in.
        let spiking = rate > self.settings.on_rate;
        let rearm = self.state != ControlState::Heating || self.policy.respike_resets_timer;
        if spiking && rearm {
            self.enter_heating(now_ms, &mut actions);
            return actions;
        }

        self.evaluate_state(temp_c, now_ms, &mut actions);
        actions
    }

    pub fn force_state(&mut self, state: ControlState, now_ms: u64) -> Vec<EngineAction> {
        let mut actions = Vec::new();
        match state {
            ControlState::Idle => self.enter_idle(&mut actions),
            ControlState::Heating => self.enter_heating(now_ms, &mut actions),
            ControlState::Cooldown => self.state = ControlState::Cooldown,
        }
        actions
    }

    fn evaluate_state(&mut self, temp_c: f32, now_ms: u64, actions: &mut Vec<EngineAction>) {
        match self.state {
            ControlState::Idle => {
                if temp_c > self.settings.on_temperature {
                    self.enter_heating(now_ms, actions);
                }
            }
            ControlState::Heating => {
                let start = *self.heating_start_ms.get_or_insert(now_ms);
                if now_ms.saturating_sub(start) >= self.settings.minimum_run_ms() {
                    self.state = ControlState::Cooldown;
                }
            }
            ControlState::Cooldown => {
                if temp_c < self.settings.off_temperature {
                    self.enter_idle(actions);
                }
            }
        }
    }

    fn enter_heating(&mut self, now_ms: u64, actions: &mut Vec<EngineAction>) {
        if !self.fan_on {
            self.fan_on = true;
            actions.push(EngineAction::FanOn);
        }
        self.heating_start_ms = Some(now_ms);
        self.state = ControlState::Heating;
    }

    fn enter_idle(&mut self, actions: &mut Vec<EngineAction>) {
        if self.fan_on {
            self.fan_on = false;
            actions.push(EngineAction::FanOff);
        }
        self.heating_start_ms = None;
        self.state = ControlState::Idle;
    }
}
