// ── Zone identity registry ──
//
// Derives the Home Assistant topic space from the polled installation
// tree. The map from zone identifier to topic set is a bijection across
// all installations: a zone that would reuse an identifier or a topic
// already owned by another zone is rejected and logged, never allowed to
// shadow it. Topics depend on nothing but the identifier, so rebuilding
// from a refreshed snapshot reproduces them exactly.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use arc_swap::ArcSwap;
use serde::Serialize;
use tracing::{debug, warn};

use crate::error::CommandError;
use crate::model::{HeatCoolMode, Installation, ZoneId};
use crate::topics::{self, CommandTarget, EntityRole, EntityTopics};

/// Everything the bridge knows about one registered zone.
#[derive(Debug, Clone, Serialize)]
pub struct ZoneEntry {
    pub zone_id: ZoneId,
    pub installation_id: String,
    /// Scope of the installation's vendor topics.
    pub installation_unique: String,
    pub installation_mode: HeatCoolMode,
    pub zone_number: u32,
    pub controller: u32,
    /// Human-readable zone name as configured in the vendor app.
    pub name: String,
    /// Sanitized `<installation>[_<group>]_<zone>` name.
    pub display_name: String,
    /// Channel that receives writes for this zone.
    pub primary_channel: String,
    pub channels: Vec<String>,
    pub entities: Vec<EntityTopics>,
}

impl ZoneEntry {
    pub fn entity(&self, role: EntityRole) -> Option<&EntityTopics> {
        self.entities.iter().find(|e| e.role == role)
    }

    pub fn topics(&self) -> impl Iterator<Item = &str> {
        self.entities.iter().flat_map(|e| e.all())
    }
}

/// A zone left out of the topic space.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RejectedZone {
    pub zone_id: ZoneId,
    pub installation_id: String,
    pub reason: String,
}

/// Immutable snapshot of the identity space built from one poll.
#[derive(Debug, Default, Serialize)]
pub struct TopicSpace {
    zones: BTreeMap<ZoneId, ZoneEntry>,
    #[serde(skip)]
    by_channel: HashMap<String, ZoneId>,
    #[serde(skip)]
    by_topic: HashMap<String, ZoneId>,
    rejected: Vec<RejectedZone>,
}

impl TopicSpace {
    pub fn zone(&self, id: &ZoneId) -> Option<&ZoneEntry> {
        self.zones.get(id)
    }

    pub fn zones(&self) -> impl Iterator<Item = &ZoneEntry> {
        self.zones.values()
    }

    pub fn len(&self) -> usize {
        self.zones.len()
    }

    pub fn is_empty(&self) -> bool {
        self.zones.is_empty()
    }

    pub fn rejected(&self) -> &[RejectedZone] {
        &self.rejected
    }

    /// Zone that owns a realtime channel.
    pub fn zone_for_channel(&self, channel: &str) -> Option<&ZoneEntry> {
        self.by_channel.get(channel).and_then(|id| self.zones.get(id))
    }

    /// Zone that owns a topic.
    pub fn zone_for_topic(&self, topic: &str) -> Option<&ZoneEntry> {
        self.by_topic.get(topic).and_then(|id| self.zones.get(id))
    }

    /// Resolve a parsed command target to a registered zone.
    ///
    /// A legacy `installId + zoneNumber` reference only resolves when
    /// exactly one zone of that installation carries the number.
    pub fn resolve(&self, target: &CommandTarget) -> Result<&ZoneEntry, CommandError> {
        match target {
            CommandTarget::Zone(id) => self.zones.get(id).ok_or_else(|| CommandError::UnknownZone {
                zone: id.to_string(),
            }),
            CommandTarget::Legacy {
                installation,
                zone_number,
            } => {
                let mut matches = self.zones.values().filter(|z| {
                    z.zone_number == *zone_number
                        && (z.installation_id == *installation || z.installation_unique == *installation)
                });
                match (matches.next(), matches.next()) {
                    (Some(zone), None) => Ok(zone),
                    (None, _) => Err(CommandError::UnknownZone {
                        zone: target.to_string(),
                    }),
                    (Some(_), Some(_)) => Err(CommandError::UnknownZone {
                        zone: format!("{target} (ambiguous: zone number exists on several controllers)"),
                    }),
                }
            }
        }
    }

    fn insert(&mut self, entry: ZoneEntry) -> Result<(), String> {
        if self.zones.contains_key(&entry.zone_id) {
            return Err("duplicate zone identifier".into());
        }
        if let Some(owner) = entry.topics().find_map(|t| self.by_topic.get(t)) {
            return Err(format!("topic collision with zone {owner}"));
        }
        if let Some(owner) = entry.channels.iter().find_map(|c| self.by_channel.get(c)) {
            return Err(format!("channel already owned by zone {owner}"));
        }

        for topic in entry.topics() {
            self.by_topic.insert(topic.to_owned(), entry.zone_id.clone());
        }
        for channel in &entry.channels {
            self.by_channel.insert(channel.clone(), entry.zone_id.clone());
        }
        self.zones.insert(entry.zone_id.clone(), entry);
        Ok(())
    }
}

/// Build the topic space for every zone of every installation.
pub fn build_topic_space(installations: &[Installation], use_group_in_names: bool) -> TopicSpace {
    let mut space = TopicSpace::default();

    for installation in installations {
        for (group, zone) in installation.zones() {
            let channels: Vec<String> = zone.channels.iter().map(|c| c.id.clone()).collect();
            let Some(primary_channel) = channels.first().cloned() else {
                continue;
            };

            let entry = ZoneEntry {
                zone_id: zone.id.clone(),
                installation_id: installation.id.clone(),
                installation_unique: installation.unique.clone(),
                installation_mode: installation.mode,
                zone_number: zone.number,
                controller: zone.controller,
                name: zone.name.clone(),
                display_name: topics::display_name(
                    &installation.name,
                    use_group_in_names.then_some(group.name.as_str()),
                    &zone.name,
                ),
                primary_channel,
                channels,
                entities: topics::zone_topics(&zone.id),
            };

            if let Err(reason) = space.insert(entry) {
                warn!(
                    installation = %installation.id,
                    zone = %zone.id,
                    number = zone.number,
                    controller = zone.controller,
                    %reason,
                    "zone rejected from topic space"
                );
                space.rejected.push(RejectedZone {
                    zone_id: zone.id.clone(),
                    installation_id: installation.id.clone(),
                    reason,
                });
            }
        }
    }

    debug!(
        zones = space.len(),
        rejected = space.rejected.len(),
        "topic space built"
    );
    space
}

// ── Registry ─────────────────────────────────────────────────────────

/// Shared handle to the current [`TopicSpace`], swapped atomically on
/// every installation poll.
pub struct ZoneRegistry {
    current: ArcSwap<TopicSpace>,
}

impl ZoneRegistry {
    pub fn new() -> Self {
        Self {
            current: ArcSwap::from_pointee(TopicSpace::default()),
        }
    }

    pub fn snapshot(&self) -> Arc<TopicSpace> {
        self.current.load_full()
    }

    /// Install a new space, returning the one it replaces.
    pub fn replace(&self, space: TopicSpace) -> Arc<TopicSpace> {
        self.current.swap(Arc::new(space))
    }
}

impl Default for ZoneRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::collections::HashSet;

    use pretty_assertions::assert_eq;

    use super::*;
    use crate::model::{Channel, Group, Zone};

    fn zone(id: &str, number: u32, controller: u32, channel: &str) -> Zone {
        Zone {
            id: ZoneId::parse(id).unwrap(),
            number,
            controller,
            name: format!("Room {number}"),
            channels: vec![Channel {
                id: channel.into(),
                ..Channel::default()
            }],
        }
    }

    fn installation(id: &str, zones: Vec<Zone>) -> Installation {
        Installation {
            id: id.into(),
            unique: format!("{id}-u"),
            name: "My Home".into(),
            mode: HeatCoolMode::Heat,
            outdoor_temperature: None,
            groups: vec![Group {
                name: "Ground Floor".into(),
                zones,
            }],
        }
    }

    fn topic_set(entry: &ZoneEntry) -> HashSet<String> {
        entry.topics().map(str::to_owned).collect()
    }

    #[test]
    fn same_number_on_two_controllers_gets_disjoint_topics() {
        let inst = installation(
            "inst-1",
            vec![zone("aaa111", 1, 0, "ch-a"), zone("bbb222", 1, 1, "ch-b")],
        );
        let space = build_topic_space(&[inst], false);
        assert_eq!(space.len(), 2);

        let a = space.zone(&ZoneId::parse("aaa111").unwrap()).unwrap();
        let b = space.zone(&ZoneId::parse("bbb222").unwrap()).unwrap();
        assert!(topic_set(a).is_disjoint(&topic_set(b)));
        assert_eq!(space.zone_for_channel("ch-b").unwrap().zone_id, b.zone_id);
    }

    #[test]
    fn duplicate_identifier_is_rejected_not_shadowed() {
        let first = installation("inst-1", vec![zone("aaa111", 1, 0, "ch-a")]);
        let second = installation("inst-2", vec![zone("aaa111", 2, 0, "ch-z")]);
        let space = build_topic_space(&[first, second], false);

        assert_eq!(space.len(), 1);
        let kept = space.zone(&ZoneId::parse("aaa111").unwrap()).unwrap();
        assert_eq!(kept.installation_id, "inst-1");
        assert_eq!(space.rejected().len(), 1);
        assert_eq!(space.rejected()[0].installation_id, "inst-2");
        assert!(space.zone_for_channel("ch-z").is_none());
    }

    #[test]
    fn rebuild_yields_identical_topics() {
        let build = || {
            build_topic_space(
                &[installation("inst-1", vec![zone("aaa111", 1, 0, "ch-a"), zone("bbb222", 2, 0, "ch-b")])],
                true,
            )
        };
        let first = build();
        let mut changed = installation("inst-1", vec![zone("bbb222", 2, 0, "ch-b")]);
        changed.name = "Renamed".into();
        let second = build_topic_space(&[changed], true);

        let id = ZoneId::parse("bbb222").unwrap();
        assert_eq!(
            topic_set(first.zone(&id).unwrap()),
            topic_set(second.zone(&id).unwrap())
        );
        assert_eq!(build().zone(&id).unwrap().entities, first.zone(&id).unwrap().entities);
    }

    #[test]
    fn display_name_honours_group_flag() {
        let inst = installation("inst-1", vec![zone("aaa111", 1, 0, "ch-a")]);
        let id = ZoneId::parse("aaa111").unwrap();

        let with = build_topic_space(std::slice::from_ref(&inst), true);
        assert_eq!(with.zone(&id).unwrap().display_name, "my_home_ground_floor_room_1");

        let without = build_topic_space(&[inst], false);
        assert_eq!(without.zone(&id).unwrap().display_name, "my_home_room_1");
    }

    #[test]
    fn legacy_reference_resolves_only_when_unambiguous() {
        let inst = installation(
            "inst-1",
            vec![
                zone("aaa111", 1, 0, "ch-a"),
                zone("bbb222", 1, 1, "ch-b"),
                zone("ccc333", 2, 0, "ch-c"),
            ],
        );
        let space = build_topic_space(&[inst], false);

        let unique = CommandTarget::Legacy {
            installation: "inst-1".into(),
            zone_number: 2,
        };
        assert_eq!(space.resolve(&unique).unwrap().zone_id.as_str(), "ccc333");

        let ambiguous = CommandTarget::Legacy {
            installation: "inst-1".into(),
            zone_number: 1,
        };
        let err = space.resolve(&ambiguous).unwrap_err();
        assert!(err.to_string().contains("ambiguous"));

        let missing = CommandTarget::Zone(ZoneId::parse("zzz999").unwrap());
        assert!(matches!(space.resolve(&missing), Err(CommandError::UnknownZone { .. })));
    }

    #[test]
    fn registry_swaps_snapshots() {
        let registry = ZoneRegistry::new();
        assert!(registry.snapshot().is_empty());

        let space = build_topic_space(&[installation("inst-1", vec![zone("aaa111", 1, 0, "ch-a")])], false);
        let old = registry.replace(space);
        assert!(old.is_empty());
        assert_eq!(registry.snapshot().len(), 1);
        assert!(
            registry
                .snapshot()
                .zone_for_topic("homeassistant/lock/rehau_aaa111_lock/lock_command")
                .is_some()
        );
    }
}
