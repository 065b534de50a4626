// ── Home Assistant discovery ──
//
// Config, state and availability payloads for every entity the registry
// assigns to a zone. Config and availability are retained; removing a
// zone publishes an empty retained config so Home Assistant drops it.

use std::sync::Arc;

use serde::Serialize;

use rehau_bridge_api::session::TransportKind;

use crate::connector::Connector;
use crate::dispatcher::SETPOINT_RANGE;
use crate::model::{CommandKind, ZoneState};
use crate::referential::ReferentialLoader;
use crate::registry::ZoneEntry;
use crate::topics::{EntityRole, EntityTopics};

pub const PAYLOAD_ONLINE: &str = "online";
pub const PAYLOAD_OFFLINE: &str = "offline";

const MANUFACTURER: &str = "REHAU";
const MODEL: &str = "NEA SMART 2.0";
const HVAC_MODES: &[&str] = &["heat", "cool", "off", "auto"];
const PRESET_MODES: &[&str] = &["comfort", "reduced", "standby"];

// ── Payload shapes ───────────────────────────────────────────────────

#[derive(Debug, Serialize)]
pub struct DeviceInfo<'a> {
    pub identifiers: [String; 1],
    pub name: &'a str,
    pub manufacturer: &'static str,
    pub model: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub suggested_area: Option<&'a str>,
}

#[derive(Debug, Serialize)]
pub struct EntityConfig<'a> {
    pub name: Option<&'static str>,
    pub unique_id: &'a str,
    pub object_id: &'a str,
    pub state_topic: &'a str,
    pub availability_topic: &'a str,
    pub device: DeviceInfo<'a>,
    #[serde(flatten)]
    pub component: Component<'a>,
}

/// Component-specific part of a discovery config.
#[derive(Debug, Serialize)]
#[serde(untagged)]
pub enum Component<'a> {
    Climate {
        current_temperature_topic: &'a str,
        current_temperature_template: &'static str,
        current_humidity_topic: &'a str,
        current_humidity_template: &'static str,
        temperature_state_topic: &'a str,
        temperature_state_template: &'static str,
        temperature_command_topic: &'a str,
        mode_state_topic: &'a str,
        mode_state_template: &'static str,
        mode_command_topic: &'a str,
        modes: &'static [&'static str],
        preset_mode_state_topic: &'a str,
        preset_mode_value_template: &'static str,
        preset_mode_command_topic: &'a str,
        preset_modes: &'static [&'static str],
        temperature_unit: &'static str,
        min_temp: f64,
        max_temp: f64,
        temp_step: f64,
    },
    Sensor {
        device_class: Option<&'static str>,
        unit_of_measurement: &'static str,
        state_class: &'static str,
    },
    BinarySensor {
        device_class: &'static str,
        payload_on: &'static str,
        payload_off: &'static str,
    },
    Light {
        command_topic: &'a str,
        payload_on: &'static str,
        payload_off: &'static str,
    },
    Lock {
        command_topic: &'a str,
        payload_lock: &'static str,
        payload_unlock: &'static str,
        state_locked: &'static str,
        state_unlocked: &'static str,
    },
}

/// JSON state of the climate entity.
#[derive(Debug, Serialize, PartialEq)]
pub struct ClimateState {
    pub temperature: Option<f64>,
    pub setpoint: Option<f64>,
    pub humidity: Option<f64>,
    pub mode: Option<String>,
    pub preset: Option<String>,
}

// ── Rendering ────────────────────────────────────────────────────────

fn command<'a>(topics: &'a EntityTopics, kind: CommandKind) -> &'a str {
    topics.command_topic(kind).unwrap_or_default()
}

/// Discovery config for one entity of a zone.
pub fn entity_config<'a>(entry: &'a ZoneEntry, topics: &'a EntityTopics) -> EntityConfig<'a> {
    let component = match topics.role {
        EntityRole::Climate => Component::Climate {
            current_temperature_topic: &topics.state,
            current_temperature_template: "{{ value_json.temperature }}",
            current_humidity_topic: &topics.state,
            current_humidity_template: "{{ value_json.humidity }}",
            temperature_state_topic: &topics.state,
            temperature_state_template: "{{ value_json.setpoint }}",
            temperature_command_topic: command(topics, CommandKind::Temperature),
            mode_state_topic: &topics.state,
            mode_state_template: "{{ value_json.mode }}",
            mode_command_topic: command(topics, CommandKind::Mode),
            modes: HVAC_MODES,
            preset_mode_state_topic: &topics.state,
            preset_mode_value_template: "{{ value_json.preset }}",
            preset_mode_command_topic: command(topics, CommandKind::Preset),
            preset_modes: PRESET_MODES,
            temperature_unit: "C",
            min_temp: *SETPOINT_RANGE.start(),
            max_temp: *SETPOINT_RANGE.end(),
            temp_step: 0.5,
        },
        EntityRole::Temperature => Component::Sensor {
            device_class: Some("temperature"),
            unit_of_measurement: "°C",
            state_class: "measurement",
        },
        EntityRole::Humidity => Component::Sensor {
            device_class: Some("humidity"),
            unit_of_measurement: "%",
            state_class: "measurement",
        },
        EntityRole::DemandPercent => Component::Sensor {
            device_class: None,
            unit_of_measurement: "%",
            state_class: "measurement",
        },
        EntityRole::Demand => Component::BinarySensor {
            device_class: "heat",
            payload_on: "ON",
            payload_off: "OFF",
        },
        EntityRole::RingLight => Component::Light {
            command_topic: command(topics, CommandKind::RingLight),
            payload_on: "ON",
            payload_off: "OFF",
        },
        EntityRole::Lock => Component::Lock {
            command_topic: command(topics, CommandKind::Lock),
            payload_lock: "LOCK",
            payload_unlock: "UNLOCK",
            state_locked: "LOCKED",
            state_unlocked: "UNLOCKED",
        },
    };

    let name = match topics.role {
        EntityRole::Climate => None,
        EntityRole::Temperature => Some("Temperature"),
        EntityRole::Humidity => Some("Humidity"),
        EntityRole::DemandPercent => Some("Demand"),
        EntityRole::Demand => Some("Heating demand"),
        EntityRole::RingLight => Some("Ring light"),
        EntityRole::Lock => Some("Lock"),
    };

    EntityConfig {
        name,
        unique_id: &topics.object_id,
        object_id: &topics.object_id,
        state_topic: &topics.state,
        availability_topic: &topics.availability,
        device: DeviceInfo {
            identifiers: [format!("rehau_{}", entry.zone_id)],
            name: &entry.display_name,
            manufacturer: MANUFACTURER,
            model: MODEL,
            suggested_area: Some(&entry.name).filter(|n| !n.is_empty()).map(String::as_str),
        },
        component,
    }
}

fn on_off(flag: bool) -> &'static str {
    if flag { "ON" } else { "OFF" }
}

/// State payload for one entity, or `None` when the value is unknown.
pub fn entity_state(
    role: EntityRole,
    state: &ZoneState,
    referentials: &ReferentialLoader,
) -> Option<String> {
    match role {
        EntityRole::Climate => {
            let body = ClimateState {
                temperature: state.temperature,
                setpoint: state.setpoint,
                humidity: state.humidity,
                mode: state.mode.map(|m| referentials.resolve_label(m)),
                preset: state.preset.map(|p| referentials.resolve_label(p)),
            };
            serde_json::to_string(&body).ok()
        }
        EntityRole::Temperature => state.temperature.map(|t| format!("{t:.1}")),
        EntityRole::Humidity => state.humidity.map(|h| format!("{h:.0}")),
        EntityRole::DemandPercent => state.demand_percent.map(|d| format!("{d:.0}")),
        EntityRole::Demand => state.demand.map(|d| on_off(d).to_owned()),
        EntityRole::RingLight => state.ring_light.map(|on| on_off(on).to_owned()),
        EntityRole::Lock => state
            .lock
            .map(|locked| if locked { "LOCKED" } else { "UNLOCKED" }.to_owned()),
    }
}

// ── Publisher ────────────────────────────────────────────────────────

pub struct DiscoveryPublisher {
    connector: Arc<Connector>,
    referentials: Arc<ReferentialLoader>,
}

impl DiscoveryPublisher {
    pub fn new(connector: Arc<Connector>, referentials: Arc<ReferentialLoader>) -> Self {
        Self {
            connector,
            referentials,
        }
    }

    /// Retained config for every entity of the zone, and subscriptions
    /// to its command topics.
    pub fn announce(&self, entry: &ZoneEntry) {
        for topics in &entry.entities {
            self.connector.publish_json(
                TransportKind::HomeAutomation,
                &topics.config,
                &entity_config(entry, topics),
                true,
            );
            for (_, topic) in &topics.commands {
                self.connector.subscribe(TransportKind::HomeAutomation, topic);
            }
        }
    }

    pub fn publish_state(&self, entry: &ZoneEntry, state: &ZoneState) {
        for topics in &entry.entities {
            if let Some(payload) = entity_state(topics.role, state, &self.referentials) {
                self.connector
                    .publish(TransportKind::HomeAutomation, &topics.state, payload, false);
            }
        }
    }

    pub fn publish_availability(&self, entry: &ZoneEntry, online: bool) {
        let payload = if online { PAYLOAD_ONLINE } else { PAYLOAD_OFFLINE };
        for topics in &entry.entities {
            self.connector.publish(
                TransportKind::HomeAutomation,
                &topics.availability,
                payload,
                true,
            );
        }
    }

    /// Clear retained config and availability so the entities disappear,
    /// and stop listening on their command topics.
    pub fn retract(&self, entry: &ZoneEntry) {
        for topics in &entry.entities {
            self.connector
                .publish(TransportKind::HomeAutomation, &topics.config, "", true);
            self.connector
                .publish(TransportKind::HomeAutomation, &topics.availability, "", true);
            for (_, topic) in &topics.commands {
                self.connector.unsubscribe(TransportKind::HomeAutomation, topic);
            }
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use chrono::Utc;
    use rehau_bridge_api::session::Link;
    use secrecy::SecretString;

    use super::*;
    use crate::connector::MemoryLink;
    use crate::model::{Channel, Group, HeatCoolMode, Installation, Zone, ZoneId};
    use crate::provider::StaticTokenProvider;
    use crate::registry::build_topic_space;

    fn entry() -> ZoneEntry {
        let installs = vec![Installation {
            id: "inst-1".into(),
            unique: "u-1".into(),
            name: "Home".into(),
            mode: HeatCoolMode::Heat,
            outdoor_temperature: None,
            groups: vec![Group {
                name: "Ground".into(),
                zones: vec![Zone {
                    id: ZoneId::parse("abc123").unwrap(),
                    number: 1,
                    controller: 0,
                    name: "Living".into(),
                    channels: vec![Channel {
                        id: "ch-1".into(),
                        ..Channel::default()
                    }],
                }],
            }],
        }];
        build_topic_space(&installs, true).zones().next().unwrap().clone()
    }

    fn publisher() -> (Arc<MemoryLink>, Arc<ReferentialLoader>, DiscoveryPublisher) {
        let home = MemoryLink::connected();
        let connector = Arc::new(Connector::new(MemoryLink::connected(), home.clone()));
        let tokens = Arc::new(StaticTokenProvider::new("me@example.com", "c", SecretString::from("t".to_string())));
        let referentials = Arc::new(ReferentialLoader::new(
            Arc::clone(&connector),
            tokens,
            std::time::Duration::from_secs(10),
        ));
        (home, Arc::clone(&referentials), DiscoveryPublisher::new(connector, referentials))
    }

    #[test]
    fn climate_config_points_at_zone_topics() {
        let entry = entry();
        let climate = entry.entity(EntityRole::Climate).unwrap();
        let json = serde_json::to_value(entity_config(&entry, climate)).unwrap();

        assert_eq!(json["unique_id"], "rehau_abc123");
        assert_eq!(json["state_topic"], "homeassistant/climate/rehau_abc123/state");
        assert_eq!(
            json["temperature_command_topic"],
            "homeassistant/climate/rehau_abc123/temperature_command"
        );
        assert_eq!(json["device"]["identifiers"][0], "rehau_abc123");
        assert_eq!(json["device"]["name"], "home_ground_living");
        assert!(json["name"].is_null());
    }

    #[test]
    fn lock_config_carries_payloads() {
        let entry = entry();
        let lock = entry.entity(EntityRole::Lock).unwrap();
        let json = serde_json::to_value(entity_config(&entry, lock)).unwrap();
        assert_eq!(json["command_topic"], "homeassistant/lock/rehau_abc123_lock/lock_command");
        assert_eq!(json["payload_lock"], "LOCK");
    }

    #[test]
    fn announce_retains_configs_and_subscribes_commands() {
        let (home, _, publisher) = publisher();
        let entry = entry();
        publisher.announce(&entry);

        let published = home.published();
        assert_eq!(published.len(), EntityRole::ALL.len());
        assert!(published.iter().all(|p| p.retain && p.topic.ends_with("/config")));
        assert_eq!(home.subscriptions().len(), 5);
    }

    #[test]
    fn state_skips_unknown_values() {
        let (home, referentials, publisher) = publisher();
        let entry = entry();
        let state = ZoneState::from_channel(
            &Channel {
                id: "ch-1".into(),
                temperature: Some(21.04),
                setpoint: Some(22.0),
                lock: Some(true),
                mode: Some(3),
                ..Channel::default()
            },
            Utc::now(),
        );

        publisher.publish_state(&entry, &state);
        let topics: Vec<_> = home.published().into_iter().map(|p| p.topic).collect();
        assert_eq!(
            topics,
            vec![
                "homeassistant/climate/rehau_abc123/state".to_string(),
                "homeassistant/sensor/rehau_abc123_temperature/state".to_string(),
                "homeassistant/lock/rehau_abc123_lock/state".to_string(),
            ]
        );

        assert_eq!(
            entity_state(EntityRole::Temperature, &state, &referentials).unwrap(),
            "21.0"
        );
        let climate: serde_json::Value =
            serde_json::from_str(&entity_state(EntityRole::Climate, &state, &referentials).unwrap()).unwrap();
        assert_eq!(climate["mode"], "3");
        assert_eq!(climate["setpoint"], 22.0);
    }

    #[test]
    fn retract_clears_retained_topics() {
        let (home, _, publisher) = publisher();
        publisher.retract(&entry());
        let published = home.published();
        assert_eq!(published.len(), EntityRole::ALL.len() * 2);
        assert!(published.iter().all(|p| p.retain && p.payload.is_empty()));
    }

    #[test]
    fn retract_drops_command_subscriptions() {
        let (home, _, publisher) = publisher();
        let entry = entry();
        publisher.announce(&entry);
        home.subscribe("homeassistant/status");
        assert_eq!(home.subscriptions().len(), 6);

        publisher.retract(&entry);
        assert_eq!(home.subscriptions(), vec!["homeassistant/status".to_string()]);
    }
}
