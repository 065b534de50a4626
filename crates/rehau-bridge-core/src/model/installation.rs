// ── Installation tree ──
//
// Validated domain view of one polled installation. Temperatures are
// Celsius; vendor encodings never leave `convert.rs`.

use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

use super::ZoneId;

/// Whether the installation is currently heating or cooling.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, Display, EnumString)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case", ascii_case_insensitive)]
pub enum HeatCoolMode {
    #[default]
    Heat,
    Cool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Installation {
    pub id: String,
    /// Scope of the installation's vendor topics.
    pub unique: String,
    pub name: String,
    pub mode: HeatCoolMode,
    pub outdoor_temperature: Option<f64>,
    pub groups: Vec<Group>,
}

impl Installation {
    pub fn zones(&self) -> impl Iterator<Item = (&Group, &Zone)> {
        self.groups
            .iter()
            .flat_map(|group| group.zones.iter().map(move |zone| (group, zone)))
    }

    pub fn zone_count(&self) -> usize {
        self.groups.iter().map(|g| g.zones.len()).sum()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Group {
    pub name: String,
    pub zones: Vec<Zone>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Zone {
    pub id: ZoneId,
    /// Zone number, unique only within `controller`.
    pub number: u32,
    pub controller: u32,
    pub name: String,
    /// Never empty; the first channel is the zone's primary thermostat.
    pub channels: Vec<Channel>,
}

impl Zone {
    pub fn primary_channel(&self) -> Option<&Channel> {
        self.channels.first()
    }
}

/// Thermostat endpoint of a zone.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Channel {
    pub id: String,
    pub temperature: Option<f64>,
    pub setpoint: Option<f64>,
    pub humidity: Option<f64>,
    pub demand: Option<bool>,
    pub demand_percent: Option<f64>,
    pub setpoints: Setpoints,
    pub mode: Option<u32>,
    pub preset: Option<u32>,
    pub ring_light: Option<bool>,
    pub lock: Option<bool>,
}

/// Write-only configuration setpoints in Celsius.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Setpoints {
    pub heat_normal: Option<f64>,
    pub heat_reduced: Option<f64>,
    pub cool_normal: Option<f64>,
    pub cool_reduced: Option<f64>,
}
