//! The identity pointer (the mirrored view of one identity) and the fold
//! that applies typed events to it.
//!
//! Every field (and every element of the set/map fields) records the
//! [`EventPosition`] of the event that last wrote it. A write only lands if
//! its position is newer than the recorded one, so:
//!
//! - reapplying an event is a no-op,
//! - a stale redelivery arriving after newer events cannot roll a field back,
//! - events touching disjoint fields commute, which is what lets identity and
//!   data ledger events arrive in any relative order.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use crate::event::{ClassifiedEvent, DataEvent, IdentityEvent, TypedEvent};
use crate::types::EventPosition;

/// Positions of the last write to each pointer field.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldVersions {
    pub created: Option<EventPosition>,
    pub owner: Option<EventPosition>,
    pub document: Option<EventPosition>,
    pub active: Option<EventPosition>,
    /// controller → last add/remove.
    #[serde(default)]
    pub controllers: BTreeMap<String, EventPosition>,
    /// data type → last store/update/delete.
    #[serde(default)]
    pub data: BTreeMap<String, EventPosition>,
    /// data type → accessor → last grant/revoke.
    #[serde(default)]
    pub access: BTreeMap<String, BTreeMap<String, EventPosition>>,
}

/// Current mirrored state of one identity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IdentityPointer {
    pub identity_hash: String,
    /// Empty until the Created event has been applied.
    pub identity: String,
    pub owner: String,
    pub document: String,
    pub controllers: BTreeSet<String>,
    pub data_types: BTreeSet<String>,
    pub data_hashes: BTreeMap<String, String>,
    /// data type → accessor → granted.
    pub access_control: BTreeMap<String, BTreeMap<String, bool>>,
    pub active: bool,
    /// Block timestamp of the Created event.
    pub created_at: Option<i64>,
    /// Latest block timestamp of an applied Created/Updated/Revoked event.
    pub updated_at: i64,
    #[serde(default)]
    pub versions: FieldVersions,
}

fn is_newer(slot: Option<EventPosition>, pos: EventPosition) -> bool {
    slot.map_or(true, |seen| pos > seen)
}

impl IdentityPointer {
    /// The minimal pointer created on first reference by any event.
    pub fn placeholder(identity_hash: impl Into<String>) -> Self {
        Self {
            identity_hash: identity_hash.into(),
            identity: String::new(),
            owner: String::new(),
            document: String::new(),
            controllers: BTreeSet::new(),
            data_types: BTreeSet::new(),
            data_hashes: BTreeMap::new(),
            access_control: BTreeMap::new(),
            active: true,
            created_at: None,
            updated_at: 0,
            versions: FieldVersions::default(),
        }
    }

    /// Returns `true` once the Created event has been applied.
    pub fn is_created(&self) -> bool {
        self.versions.created.is_some()
    }

    /// Whether `accessor` currently holds a grant on `data_type`.
    pub fn has_access(&self, data_type: &str, accessor: &str) -> bool {
        self.access_control
            .get(data_type)
            .and_then(|m| m.get(&accessor.to_ascii_lowercase()))
            .copied()
            .unwrap_or(false)
    }

    /// Apply one event. Returns `true` if any field changed.
    pub fn apply(&mut self, event: &ClassifiedEvent) -> bool {
        let pos = event.position;
        let ts = event.block_timestamp;
        match &event.event {
            TypedEvent::Identity(e) => self.apply_identity(e, pos, ts),
            TypedEvent::Data(e) => self.apply_data(e, pos),
        }
    }

    fn touch(&mut self, ts: i64) {
        self.updated_at = self.updated_at.max(ts);
    }

    fn apply_identity(&mut self, event: &IdentityEvent, pos: EventPosition, ts: i64) -> bool {
        match event {
            IdentityEvent::Created {
                identity, owner, ..
            } => {
                if self.is_created() {
                    return false;
                }
                self.versions.created = Some(pos);
                self.identity = identity.clone();
                self.created_at = Some(ts);
                if is_newer(self.versions.owner, pos) {
                    self.owner = owner.clone();
                    self.versions.owner = Some(pos);
                }
                if is_newer(self.versions.active, pos) {
                    self.active = true;
                    self.versions.active = Some(pos);
                }
                self.touch(ts);
                true
            }
            IdentityEvent::Updated { document, .. } => {
                if !is_newer(self.versions.document, pos) {
                    return false;
                }
                self.document = document.clone();
                self.versions.document = Some(pos);
                self.touch(ts);
                true
            }
            IdentityEvent::Revoked { .. } => {
                if !is_newer(self.versions.active, pos) {
                    return false;
                }
                self.active = false;
                self.versions.active = Some(pos);
                self.touch(ts);
                true
            }
            IdentityEvent::Transferred { new_owner, .. } => {
                if !is_newer(self.versions.owner, pos) {
                    return false;
                }
                self.owner = new_owner.clone();
                self.versions.owner = Some(pos);
                true
            }
            IdentityEvent::ControllerAdded { controller, .. }
            | IdentityEvent::ControllerRemoved { controller, .. } => {
                if !is_newer(self.versions.controllers.get(controller).copied(), pos) {
                    return false;
                }
                self.versions.controllers.insert(controller.clone(), pos);
                if matches!(event, IdentityEvent::ControllerAdded { .. }) {
                    self.controllers.insert(controller.clone());
                } else {
                    self.controllers.remove(controller);
                }
                true
            }
        }
    }

    fn apply_data(&mut self, event: &DataEvent, pos: EventPosition) -> bool {
        match event {
            DataEvent::Stored {
                data_type,
                content_hash,
                ..
            }
            | DataEvent::Updated {
                data_type,
                content_hash,
                ..
            } => {
                if !is_newer(self.versions.data.get(data_type).copied(), pos) {
                    return false;
                }
                self.versions.data.insert(data_type.clone(), pos);
                self.data_types.insert(data_type.clone());
                self.data_hashes.insert(data_type.clone(), content_hash.clone());
                true
            }
            DataEvent::Deleted { data_type, .. } => {
                if !is_newer(self.versions.data.get(data_type).copied(), pos) {
                    return false;
                }
                self.versions.data.insert(data_type.clone(), pos);
                self.data_types.remove(data_type);
                self.data_hashes.remove(data_type);
                true
            }
            DataEvent::AccessGranted {
                data_type,
                accessor,
                ..
            }
            | DataEvent::AccessRevoked {
                data_type,
                accessor,
                ..
            } => {
                let seen = self
                    .versions
                    .access
                    .get(data_type)
                    .and_then(|m| m.get(accessor))
                    .copied();
                if !is_newer(seen, pos) {
                    return false;
                }
                self.versions
                    .access
                    .entry(data_type.clone())
                    .or_default()
                    .insert(accessor.clone(), pos);
                let granted = matches!(event, DataEvent::AccessGranted { .. });
                self.access_control
                    .entry(data_type.clone())
                    .or_default()
                    .insert(accessor.clone(), granted);
                true
            }
        }
    }
}
