// ── Observed zone state ──

use chrono::{DateTime, Utc};
use serde::Serialize;

use rehau_bridge_api::vendor::{ChannelUpdate, vendor_to_celsius};

use super::{Channel, CommandKind, CommandValue};

/// Last observed state of a zone's primary channel.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ZoneState {
    pub temperature: Option<f64>,
    pub setpoint: Option<f64>,
    pub humidity: Option<f64>,
    pub demand: Option<bool>,
    pub demand_percent: Option<f64>,
    pub mode: Option<u32>,
    pub preset: Option<u32>,
    pub ring_light: Option<bool>,
    pub lock: Option<bool>,
    pub updated_at: DateTime<Utc>,
}

impl ZoneState {
    pub fn from_channel(channel: &Channel, at: DateTime<Utc>) -> Self {
        Self {
            temperature: channel.temperature,
            setpoint: channel.setpoint,
            humidity: channel.humidity,
            demand: channel.demand,
            demand_percent: channel.demand_percent,
            mode: channel.mode,
            preset: channel.preset,
            ring_light: channel.ring_light,
            lock: channel.lock,
            updated_at: at,
        }
    }

    /// Patch in the fields present in a realtime update.
    pub fn apply(&mut self, update: &ChannelUpdate, at: DateTime<Utc>) {
        if let Some(raw) = update.temperature {
            self.temperature = Some(vendor_to_celsius(raw));
        }
        if let Some(raw) = update.setpoint {
            self.setpoint = Some(vendor_to_celsius(raw));
        }
        self.humidity = update.humidity.or(self.humidity);
        self.demand = update.demand.or(self.demand);
        self.demand_percent = update.demand_percent.or(self.demand_percent);
        self.mode = update.mode.or(self.mode);
        self.preset = update.preset.or(self.preset);
        self.ring_light = update.ring_light.or(self.ring_light);
        self.lock = update.lock.or(self.lock);
        self.updated_at = at;
    }

    /// The observed value a command of `kind` would overwrite.
    pub fn value_of(&self, kind: CommandKind) -> Option<CommandValue> {
        match kind {
            CommandKind::Temperature => self.setpoint.map(CommandValue::Temperature),
            CommandKind::Mode => self.mode.map(CommandValue::Code),
            CommandKind::Preset => self.preset.map(CommandValue::Code),
            CommandKind::RingLight => self.ring_light.map(CommandValue::Flag),
            CommandKind::Lock => self.lock.map(CommandValue::Flag),
        }
    }
}

/// The value a realtime update reports for `kind`, if it carries one.
pub fn reported_value(update: &ChannelUpdate, kind: CommandKind) -> Option<CommandValue> {
    match kind {
        CommandKind::Temperature => update
            .setpoint
            .map(|raw| CommandValue::Temperature(vendor_to_celsius(raw))),
        CommandKind::Mode => update.mode.map(CommandValue::Code),
        CommandKind::Preset => update.preset.map(CommandValue::Code),
        CommandKind::RingLight => update.ring_light.map(CommandValue::Flag),
        CommandKind::Lock => update.lock.map(CommandValue::Flag),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn update() -> ChannelUpdate {
        ChannelUpdate {
            installation: "inst".into(),
            channel: "ch".into(),
            ..ChannelUpdate::default()
        }
    }

    #[test]
    fn apply_only_touches_present_fields() {
        let channel = Channel {
            id: "ch".into(),
            temperature: Some(19.5),
            setpoint: Some(20.0),
            humidity: Some(40.0),
            ring_light: Some(false),
            ..Channel::default()
        };
        let mut state = ZoneState::from_channel(&channel, Utc::now());

        let mut u = update();
        u.setpoint = Some(698);
        u.ring_light = Some(true);
        state.apply(&u, Utc::now());

        assert_eq!(state.setpoint, Some(21.0));
        assert_eq!(state.temperature, Some(19.5));
        assert_eq!(state.humidity, Some(40.0));
        assert_eq!(state.ring_light, Some(true));
    }

    #[test]
    fn reported_value_per_kind() {
        let mut u = update();
        u.mode = Some(3);
        assert_eq!(reported_value(&u, CommandKind::Mode), Some(CommandValue::Code(3)));
        assert_eq!(reported_value(&u, CommandKind::Temperature), None);
    }
}
