// ── Home Assistant topic namespace ──
//
// Every topic the bridge owns is derived from a zone's stable identifier:
//
//   homeassistant/<class>/rehau_<zoneId>[_<suffix>]/{config|state|availability|<field>_command}
//
// Command topics are parsed back into a `CommandTarget`. Besides the
// identifier form, the legacy object id `rehau_<installId>_zone_<number>`
// is still accepted; it names a zone only up to its controller, so the
// registry must disambiguate it.

use serde::Serialize;
use strum::{Display, IntoStaticStr};

use crate::model::{CommandKind, ZoneId};

pub const DISCOVERY_PREFIX: &str = "homeassistant";

/// Birth/last-will topic of the Home Assistant instance.
pub const STATUS_TOPIC: &str = "homeassistant/status";

const OBJECT_PREFIX: &str = "rehau_";
const LEGACY_ZONE_MARKER: &str = "_zone_";
const COMMAND_SUFFIX: &str = "_command";

// ── Entity roles ─────────────────────────────────────────────────────

/// Home Assistant component class of an entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Display, IntoStaticStr)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum EntityClass {
    Climate,
    Sensor,
    BinarySensor,
    Light,
    Lock,
}

/// One of the entities published for every zone.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum EntityRole {
    Climate,
    Temperature,
    Humidity,
    DemandPercent,
    Demand,
    RingLight,
    Lock,
}

impl EntityRole {
    pub const ALL: [Self; 7] = [
        Self::Climate,
        Self::Temperature,
        Self::Humidity,
        Self::DemandPercent,
        Self::Demand,
        Self::RingLight,
        Self::Lock,
    ];

    pub fn class(self) -> EntityClass {
        match self {
            Self::Climate => EntityClass::Climate,
            Self::Temperature | Self::Humidity | Self::DemandPercent => EntityClass::Sensor,
            Self::Demand => EntityClass::BinarySensor,
            Self::RingLight => EntityClass::Light,
            Self::Lock => EntityClass::Lock,
        }
    }

    /// Object id suffix; the climate entity has none.
    pub fn suffix(self) -> Option<&'static str> {
        match self {
            Self::Climate => None,
            Self::Temperature => Some("temperature"),
            Self::Humidity => Some("humidity"),
            Self::DemandPercent => Some("demand_percent"),
            Self::Demand => Some("demand"),
            Self::RingLight => Some("ring_light"),
            Self::Lock => Some("lock"),
        }
    }

    /// Commands accepted by this entity, with their topic field names.
    pub fn command_fields(self) -> &'static [(&'static str, CommandKind)] {
        match self {
            Self::Climate => &[
                ("mode", CommandKind::Mode),
                ("temperature", CommandKind::Temperature),
                ("preset", CommandKind::Preset),
            ],
            Self::RingLight => &[("light", CommandKind::RingLight)],
            Self::Lock => &[("lock", CommandKind::Lock)],
            Self::Temperature | Self::Humidity | Self::DemandPercent | Self::Demand => &[],
        }
    }
}

// ── Topic sets ───────────────────────────────────────────────────────

/// All topics of one entity of one zone.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EntityTopics {
    pub role: EntityRole,
    pub object_id: String,
    pub config: String,
    pub state: String,
    pub availability: String,
    pub commands: Vec<(CommandKind, String)>,
}

impl EntityTopics {
    /// Every topic of this entity, config first.
    pub fn all(&self) -> impl Iterator<Item = &str> {
        [self.config.as_str(), self.state.as_str(), self.availability.as_str()]
            .into_iter()
            .chain(self.commands.iter().map(|(_, t)| t.as_str()))
    }

    pub fn command_topic(&self, kind: CommandKind) -> Option<&str> {
        self.commands
            .iter()
            .find(|(k, _)| *k == kind)
            .map(|(_, t)| t.as_str())
    }
}

/// `rehau_<zoneId>[_<suffix>]`
pub fn object_id(zone: &ZoneId, role: EntityRole) -> String {
    match role.suffix() {
        Some(suffix) => format!("{OBJECT_PREFIX}{zone}_{suffix}"),
        None => format!("{OBJECT_PREFIX}{zone}"),
    }
}

pub fn entity_topics(zone: &ZoneId, role: EntityRole) -> EntityTopics {
    let object_id = object_id(zone, role);
    let base = format!("{DISCOVERY_PREFIX}/{}/{object_id}", role.class());

    EntityTopics {
        role,
        config: format!("{base}/config"),
        state: format!("{base}/state"),
        availability: format!("{base}/availability"),
        commands: role
            .command_fields()
            .iter()
            .map(|(field, kind)| (*kind, format!("{base}/{field}{COMMAND_SUFFIX}")))
            .collect(),
        object_id,
    }
}

/// The full topic set of a zone, one entry per [`EntityRole`].
pub fn zone_topics(zone: &ZoneId) -> Vec<EntityTopics> {
    EntityRole::ALL
        .iter()
        .map(|role| entity_topics(zone, *role))
        .collect()
}

// ── Command topic parsing ────────────────────────────────────────────

/// Zone a command topic refers to.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum CommandTarget {
    Zone(ZoneId),
    /// `rehau_<installId>_zone_<number>`: needs registry disambiguation.
    Legacy { installation: String, zone_number: u32 },
}

impl std::fmt::Display for CommandTarget {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Zone(id) => write!(f, "{id}"),
            Self::Legacy {
                installation,
                zone_number,
            } => write!(f, "{installation}/zone {zone_number}"),
        }
    }
}

/// Parse `homeassistant/<class>/<objectId>/<field>_command`.
///
/// Returns `None` for anything that is not a command topic the bridge
/// publishes in discovery (or its legacy equivalent).
pub fn parse_command_topic(topic: &str) -> Option<(CommandTarget, CommandKind)> {
    let mut parts = topic.split('/');
    let (Some(prefix), Some(class), Some(object), Some(last), None) = (
        parts.next(),
        parts.next(),
        parts.next(),
        parts.next(),
        parts.next(),
    ) else {
        return None;
    };
    if prefix != DISCOVERY_PREFIX {
        return None;
    }

    let field = last.strip_suffix(COMMAND_SUFFIX)?;
    let role = EntityRole::ALL.into_iter().find(|role| {
        <&str>::from(role.class()) == class
            && role.command_fields().iter().any(|(f, _)| *f == field)
    })?;
    let kind = role
        .command_fields()
        .iter()
        .find(|(f, _)| *f == field)
        .map(|(_, k)| *k)?;

    let mut zone_part = object.strip_prefix(OBJECT_PREFIX)?;
    if let Some(suffix) = role.suffix() {
        zone_part = zone_part.strip_suffix(suffix)?.strip_suffix('_')?;
    }

    parse_target(zone_part).map(|target| (target, kind))
}

fn parse_target(raw: &str) -> Option<CommandTarget> {
    if let Some((installation, number)) = raw.rsplit_once(LEGACY_ZONE_MARKER) {
        if installation.is_empty() {
            return None;
        }
        let zone_number = number.parse().ok()?;
        return Some(CommandTarget::Legacy {
            installation: installation.to_owned(),
            zone_number,
        });
    }
    ZoneId::parse(raw).ok().map(CommandTarget::Zone)
}

// ── Display names ────────────────────────────────────────────────────

/// Lowercase, with every run of non-alphanumerics collapsed to `_`.
pub fn sanitize_name(name: &str) -> String {
    let mut out = String::with_capacity(name.len());
    for c in name.chars().flat_map(char::to_lowercase) {
        if c.is_alphanumeric() {
            out.push(c);
        } else if !out.is_empty() && !out.ends_with('_') {
            out.push('_');
        }
    }
    while out.ends_with('_') {
        out.pop();
    }
    out
}

/// `<installation>[_<group>]_<zone>`, each part sanitized.
pub fn display_name(installation: &str, group: Option<&str>, zone: &str) -> String {
    [Some(installation), group, Some(zone)]
        .into_iter()
        .flatten()
        .map(sanitize_name)
        .filter(|part| !part.is_empty())
        .collect::<Vec<_>>()
        .join("_")
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::collections::HashSet;

    use pretty_assertions::assert_eq;

    use super::*;

    fn zone(id: &str) -> ZoneId {
        ZoneId::parse(id).unwrap()
    }

    #[test]
    fn climate_topics_have_no_suffix() {
        let topics = entity_topics(&zone("abc123"), EntityRole::Climate);
        assert_eq!(topics.config, "homeassistant/climate/rehau_abc123/config");
        assert_eq!(topics.state, "homeassistant/climate/rehau_abc123/state");
        assert_eq!(
            topics.command_topic(CommandKind::Temperature),
            Some("homeassistant/climate/rehau_abc123/temperature_command")
        );
    }

    #[test]
    fn sensor_topics_carry_suffix() {
        let topics = entity_topics(&zone("abc123"), EntityRole::DemandPercent);
        assert_eq!(
            topics.availability,
            "homeassistant/sensor/rehau_abc123_demand_percent/availability"
        );
        assert!(topics.commands.is_empty());

        let light = entity_topics(&zone("abc123"), EntityRole::RingLight);
        assert_eq!(
            light.command_topic(CommandKind::RingLight),
            Some("homeassistant/light/rehau_abc123_ring_light/light_command")
        );
    }

    #[test]
    fn every_command_topic_parses_back() {
        let id = zone("65f0a1b2c3d4");
        for entity in zone_topics(&id) {
            for (kind, topic) in &entity.commands {
                assert_eq!(
                    parse_command_topic(topic),
                    Some((CommandTarget::Zone(id.clone()), *kind)),
                    "{topic}"
                );
            }
        }
    }

    #[test]
    fn legacy_object_id_parses() {
        assert_eq!(
            parse_command_topic("homeassistant/climate/rehau_inst-1_zone_2/mode_command"),
            Some((
                CommandTarget::Legacy {
                    installation: "inst-1".into(),
                    zone_number: 2
                },
                CommandKind::Mode
            ))
        );
        assert_eq!(
            parse_command_topic("homeassistant/lock/rehau_inst-1_zone_7_lock/lock_command"),
            Some((
                CommandTarget::Legacy {
                    installation: "inst-1".into(),
                    zone_number: 7
                },
                CommandKind::Lock
            ))
        );
    }

    #[test]
    fn foreign_topics_do_not_parse() {
        for topic in [
            "homeassistant/status",
            "homeassistant/climate/rehau_abc/config",
            "homeassistant/climate/other_abc/mode_command",
            "homeassistant/sensor/rehau_abc_temperature/temperature_command",
            "homeassistant/light/rehau_abc/light_command",
            "homeassistant/climate/rehau_abc/fan_command",
            "homeassistant/climate/rehau_abc/mode_command/extra",
            "zigbee/climate/rehau_abc/mode_command",
            "homeassistant/climate/rehau_/mode_command",
            "homeassistant/climate/rehau_inst_zone_x/mode_command",
        ] {
            assert_eq!(parse_command_topic(topic), None, "{topic}");
        }
    }

    #[test]
    fn same_zone_number_different_ids_are_disjoint() {
        let a: HashSet<String> = zone_topics(&zone("ctrl0zone1aaaa"))
            .iter()
            .flat_map(|e| e.all().map(str::to_owned).collect::<Vec<_>>())
            .collect();
        let b: HashSet<String> = zone_topics(&zone("ctrl1zone1bbbb"))
            .iter()
            .flat_map(|e| e.all().map(str::to_owned).collect::<Vec<_>>())
            .collect();
        assert!(a.is_disjoint(&b));
    }

    #[test]
    fn names_are_sanitized() {
        assert_eq!(sanitize_name("  Living Room (Ground)  "), "living_room_ground");
        assert_eq!(sanitize_name("Bad--Name__"), "bad_name");
        assert_eq!(display_name("My Home", Some("1st Floor"), "Bath"), "my_home_1st_floor_bath");
        assert_eq!(display_name("My Home", None, "Bath"), "my_home_bath");
    }
}
