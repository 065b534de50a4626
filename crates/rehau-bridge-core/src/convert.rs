// ── API-to-domain type conversions ──
//
// Validates the raw installation tree from `rehau_bridge_api` into the
// domain model. Vendor temperatures become Celsius; zones without a
// usable persistent identifier are dropped with a warning instead of
// falling back to their zone number.

use tracing::warn;

use rehau_bridge_api::installation::{RawChannel, RawGroup, RawInstallation, RawSetpoints, RawZone};
use rehau_bridge_api::vendor::vendor_to_celsius;

use crate::model::{Channel, Group, HeatCoolMode, Installation, Setpoints, Zone, ZoneId};

// ── Helpers ────────────────────────────────────────────────────────

fn celsius(raw: Option<i32>) -> Option<f64> {
    raw.map(vendor_to_celsius)
}

fn parse_mode(raw: Option<&str>) -> HeatCoolMode {
    raw.and_then(|s| s.parse().ok()).unwrap_or_default()
}

// ── Installation ───────────────────────────────────────────────────

impl From<RawInstallation> for Installation {
    fn from(raw: RawInstallation) -> Self {
        let unique = raw
            .unique
            .filter(|u| !u.is_empty())
            .unwrap_or_else(|| raw.id.clone());

        let groups = raw
            .groups
            .into_iter()
            .map(|group| convert_group(&raw.id, group))
            .collect();

        Self {
            mode: parse_mode(raw.mode.as_deref()),
            outdoor_temperature: celsius(raw.outdoor_temperature),
            id: raw.id,
            unique,
            name: raw.name,
            groups,
        }
    }
}

fn convert_group(installation: &str, raw: RawGroup) -> Group {
    Group {
        zones: raw
            .zones
            .into_iter()
            .filter_map(|zone| convert_zone(installation, zone))
            .collect(),
        name: raw.name,
    }
}

/// `None` when the zone cannot be identified or has no channels.
fn convert_zone(installation: &str, raw: RawZone) -> Option<Zone> {
    let Some(raw_id) = raw.id.as_deref() else {
        warn!(
            installation,
            zone = %raw.name,
            number = raw.number,
            controller = raw.controller,
            "zone has no persistent identifier, skipping"
        );
        return None;
    };

    let id = match ZoneId::parse(raw_id) {
        Ok(id) => id,
        Err(e) => {
            warn!(installation, zone = %raw.name, error = %e, "zone identifier rejected, skipping");
            return None;
        }
    };

    if raw.channels.is_empty() {
        warn!(installation, zone = %id, "zone has no channels, skipping");
        return None;
    }

    Some(Zone {
        id,
        number: raw.number,
        controller: raw.controller,
        name: raw.name,
        channels: raw.channels.into_iter().map(Channel::from).collect(),
    })
}

// ── Channel ────────────────────────────────────────────────────────

impl From<RawChannel> for Channel {
    fn from(raw: RawChannel) -> Self {
        Self {
            id: raw.id,
            temperature: celsius(raw.temperature),
            setpoint: celsius(raw.setpoint),
            humidity: raw.humidity,
            demand: raw.demand,
            demand_percent: raw.demand_percent,
            setpoints: Setpoints::from(raw.setpoints),
            mode: raw.mode,
            preset: raw.preset,
            ring_light: raw.ring_light,
            lock: raw.lock,
        }
    }
}

impl From<RawSetpoints> for Setpoints {
    fn from(raw: RawSetpoints) -> Self {
        Self {
            heat_normal: celsius(raw.heat_normal),
            heat_reduced: celsius(raw.heat_reduced),
            cool_normal: celsius(raw.cool_normal),
            cool_reduced: celsius(raw.cool_reduced),
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    fn raw_zone(id: Option<&str>, number: u32, controller: u32) -> RawZone {
        RawZone {
            id: id.map(str::to_owned),
            number,
            controller,
            name: format!("Zone {number}"),
            channels: vec![RawChannel {
                id: format!("ch-{controller}-{number}"),
                temperature: Some(680),
                setpoint: Some(716),
                ..RawChannel::default()
            }],
        }
    }

    #[test]
    fn converts_tree_and_temperatures() {
        let raw = RawInstallation {
            id: "inst-1".into(),
            unique: Some("u-1".into()),
            name: "Home".into(),
            mode: Some("cool".into()),
            outdoor_temperature: Some(500),
            groups: vec![RawGroup {
                name: "Ground".into(),
                zones: vec![raw_zone(Some("aaa111"), 1, 0)],
            }],
        };

        let inst = Installation::from(raw);
        assert_eq!(inst.unique, "u-1");
        assert_eq!(inst.mode, HeatCoolMode::Cool);
        assert_eq!(inst.outdoor_temperature, Some(10.0));

        let zone = &inst.groups[0].zones[0];
        assert_eq!(zone.id.as_str(), "aaa111");
        assert_eq!(zone.channels[0].temperature, Some(20.0));
        assert_eq!(zone.channels[0].setpoint, Some(22.0));
    }

    #[test]
    fn unique_falls_back_to_id() {
        let inst = Installation::from(RawInstallation {
            id: "inst-9".into(),
            ..RawInstallation::default()
        });
        assert_eq!(inst.unique, "inst-9");
        assert_eq!(inst.mode, HeatCoolMode::Heat);
    }

    #[test]
    fn zones_without_usable_identifier_are_dropped() {
        let mut no_channels = raw_zone(Some("ccc333"), 4, 0);
        no_channels.channels.clear();

        let inst = Installation::from(RawInstallation {
            id: "inst-1".into(),
            groups: vec![RawGroup {
                name: "G".into(),
                zones: vec![
                    raw_zone(None, 1, 0),
                    raw_zone(Some("2"), 2, 0),
                    raw_zone(Some("bad/id"), 3, 0),
                    no_channels,
                    raw_zone(Some("bbb222"), 1, 1),
                ],
            }],
            ..RawInstallation::default()
        });

        let ids: Vec<_> = inst.zones().map(|(_, z)| z.id.to_string()).collect();
        assert_eq!(ids, vec!["bbb222".to_string()]);
    }
}
