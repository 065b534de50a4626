// ── Zone state store ──
//
// Last observed state per zone, keyed by the zone identifier only.
// Replaced from each installation poll, patched by realtime updates.

use chrono::{DateTime, Utc};
use dashmap::DashMap;

use rehau_bridge_api::vendor::ChannelUpdate;

use crate::model::{Installation, ZoneId, ZoneState};
use crate::registry::TopicSpace;

#[derive(Debug, Default)]
pub struct ZoneStateStore {
    zones: DashMap<ZoneId, ZoneState>,
}

impl ZoneStateStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reset from a fresh poll. Zones absent from `space` are dropped.
    pub fn replace_from(&self, installations: &[Installation], space: &TopicSpace, at: DateTime<Utc>) {
        self.zones.retain(|id, _| space.zone(id).is_some());

        for installation in installations {
            for (_, zone) in installation.zones() {
                if space.zone(&zone.id).is_none() {
                    continue;
                }
                if let Some(channel) = zone.primary_channel() {
                    self.zones
                        .insert(zone.id.clone(), ZoneState::from_channel(channel, at));
                }
            }
        }
    }

    /// Patch a zone with a realtime update. Returns the new state.
    pub fn apply_update(&self, zone: &ZoneId, update: &ChannelUpdate, at: DateTime<Utc>) -> Option<ZoneState> {
        let mut state = self.zones.get_mut(zone)?;
        state.apply(update, at);
        Some(state.clone())
    }

    pub fn get(&self, zone: &ZoneId) -> Option<ZoneState> {
        self.zones.get(zone).map(|s| s.clone())
    }

    pub fn len(&self) -> usize {
        self.zones.len()
    }

    pub fn is_empty(&self) -> bool {
        self.zones.is_empty()
    }
}
