//! Typed event families and raw-event classification.
//!
//! Each ledger emits a closed set of events. Classification maps
//! `(ledger address, signature)` onto a variant of [`IdentityEvent`] or
//! [`DataEvent`]; everything downstream matches exhaustively on those enums.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::error::IndexerError;
use crate::identity::{identity_hash, normalize_hash};
use crate::types::{EventKind, EventPosition, LedgerEvent, LedgerFamily, RawLedgerEvent};

/// Events emitted by the identity ledger.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum IdentityEvent {
    Created {
        identity_hash: String,
        identity: String,
        owner: String,
    },
    Updated {
        identity_hash: String,
        document: String,
    },
    Revoked {
        identity_hash: String,
    },
    Transferred {
        identity_hash: String,
        new_owner: String,
    },
    ControllerAdded {
        identity_hash: String,
        controller: String,
    },
    ControllerRemoved {
        identity_hash: String,
        controller: String,
    },
}

/// Events emitted by the encrypted-data ledger.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum DataEvent {
    Stored {
        identity_hash: String,
        data_type: String,
        content_hash: String,
    },
    Updated {
        identity_hash: String,
        data_type: String,
        content_hash: String,
    },
    Deleted {
        identity_hash: String,
        data_type: String,
    },
    AccessGranted {
        identity_hash: String,
        data_type: String,
        accessor: String,
    },
    AccessRevoked {
        identity_hash: String,
        data_type: String,
        accessor: String,
    },
}

/// One event from either family.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "family", content = "event", rename_all = "snake_case")]
pub enum TypedEvent {
    Identity(IdentityEvent),
    Data(DataEvent),
}

impl TypedEvent {
    pub fn kind(&self) -> EventKind {
        match self {
            Self::Identity(e) => match e {
                IdentityEvent::Created { .. } => EventKind::Created,
                IdentityEvent::Updated { .. } => EventKind::Updated,
                IdentityEvent::Revoked { .. } => EventKind::Revoked,
                IdentityEvent::Transferred { .. } => EventKind::Transferred,
                IdentityEvent::ControllerAdded { .. } => EventKind::ControllerAdded,
                IdentityEvent::ControllerRemoved { .. } => EventKind::ControllerRemoved,
            },
            Self::Data(e) => match e {
                DataEvent::Stored { .. } => EventKind::DataStored,
                DataEvent::Updated { .. } => EventKind::DataUpdated,
                DataEvent::Deleted { .. } => EventKind::DataDeleted,
                DataEvent::AccessGranted { .. } => EventKind::AccessGranted,
                DataEvent::AccessRevoked { .. } => EventKind::AccessRevoked,
            },
        }
    }

    /// The identity this event applies to.
    pub fn identity_hash(&self) -> &str {
        match self {
            Self::Identity(
                IdentityEvent::Created { identity_hash, .. }
                | IdentityEvent::Updated { identity_hash, .. }
                | IdentityEvent::Revoked { identity_hash }
                | IdentityEvent::Transferred { identity_hash, .. }
                | IdentityEvent::ControllerAdded { identity_hash, .. }
                | IdentityEvent::ControllerRemoved { identity_hash, .. },
            ) => identity_hash,
            Self::Data(
                DataEvent::Stored { identity_hash, .. }
                | DataEvent::Updated { identity_hash, .. }
                | DataEvent::Deleted { identity_hash, .. }
                | DataEvent::AccessGranted { identity_hash, .. }
                | DataEvent::AccessRevoked { identity_hash, .. },
            ) => identity_hash,
        }
    }
}

/// A typed event plus the block metadata it was emitted in.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClassifiedEvent {
    pub ledger: String,
    pub position: EventPosition,
    pub tx_hash: String,
    pub block_timestamp: i64,
    pub event: TypedEvent,
}

impl ClassifiedEvent {
    pub fn kind(&self) -> EventKind {
        self.event.kind()
    }

    /// Build the immutable audit record for this event.
    pub fn to_record(&self) -> Result<LedgerEvent, IndexerError> {
        let payload = serde_json::to_value(&self.event).map_err(|e| IndexerError::Decode {
            event: self.kind().to_string(),
            reason: format!("payload not serializable: {e}"),
        })?;
        Ok(LedgerEvent {
            block_number: self.position.block_number,
            tx_hash: self.tx_hash.clone(),
            log_index: self.position.log_index,
            block_timestamp: self.block_timestamp,
            ledger: self.ledger.clone(),
            kind: self.kind(),
            identity_hash: self.event.identity_hash().to_string(),
            payload,
        })
    }
}

// ─── Classification ──────────────────────────────────────────────────────────

/// The configured ledger addresses. A `None` family is never classified.
#[derive(Debug, Clone, Default)]
pub struct LedgerAddresses {
    pub identity: Option<String>,
    pub data: Option<String>,
}

impl LedgerAddresses {
    /// Which family `address` belongs to, if any (case-insensitive).
    pub fn family_of(&self, address: &str) -> Option<LedgerFamily> {
        let matches = |configured: &Option<String>| {
            configured
                .as_deref()
                .is_some_and(|a| a.eq_ignore_ascii_case(address))
        };
        if matches(&self.identity) {
            Some(LedgerFamily::Identity)
        } else if matches(&self.data) {
            Some(LedgerFamily::Data)
        } else {
            None
        }
    }
}

/// Classify a raw event.
///
/// - `Ok(Some(_))`: a recognized event with well-formed fields.
/// - `Ok(None)`: unknown ledger or signature; the caller skips it.
/// - `Err(IndexerError::Decode)`: recognized but malformed.
pub fn classify(
    raw: &RawLedgerEvent,
    ledgers: &LedgerAddresses,
) -> Result<Option<ClassifiedEvent>, IndexerError> {
    let Some(family) = ledgers.family_of(&raw.address) else {
        return Ok(None);
    };
    let Some(kind) = EventKind::from_signature(&raw.signature) else {
        return Ok(None);
    };
    if kind.family() != family {
        return Ok(None);
    }

    let event = decode(kind, raw)?;
    Ok(Some(ClassifiedEvent {
        ledger: raw.address.to_ascii_lowercase(),
        position: raw.position(),
        tx_hash: raw.tx_hash.clone(),
        block_timestamp: raw.block_timestamp,
        event,
    }))
}

#[derive(Deserialize)]
struct CreatedFields {
    #[serde(default, alias = "identityHash")]
    identity_hash: Option<String>,
    identity: String,
    owner: String,
}

#[derive(Deserialize)]
struct UpdatedFields {
    #[serde(alias = "identityHash")]
    identity_hash: String,
    #[serde(alias = "didDocument")]
    document: String,
}

#[derive(Deserialize)]
struct HashOnly {
    #[serde(alias = "identityHash")]
    identity_hash: String,
}

#[derive(Deserialize)]
struct TransferredFields {
    #[serde(alias = "identityHash")]
    identity_hash: String,
    #[serde(alias = "newOwner")]
    new_owner: String,
}

#[derive(Deserialize)]
struct ControllerFields {
    #[serde(alias = "identityHash")]
    identity_hash: String,
    controller: String,
}

#[derive(Deserialize)]
struct DataFields {
    #[serde(alias = "identityHash")]
    identity_hash: String,
    #[serde(alias = "dataType")]
    data_type: String,
    #[serde(alias = "contentHash", alias = "dataHash")]
    content_hash: String,
}

#[derive(Deserialize)]
struct DataTypeFields {
    #[serde(alias = "identityHash")]
    identity_hash: String,
    #[serde(alias = "dataType")]
    data_type: String,
}

#[derive(Deserialize)]
struct AccessFields {
    #[serde(alias = "identityHash")]
    identity_hash: String,
    #[serde(alias = "dataType")]
    data_type: String,
    #[serde(alias = "grantee")]
    accessor: String,
}

fn fields<T: DeserializeOwned>(kind: EventKind, raw: &RawLedgerEvent) -> Result<T, IndexerError> {
    serde_json::from_value(raw.fields.clone()).map_err(|e| IndexerError::Decode {
        event: kind.to_string(),
        reason: e.to_string(),
    })
}

fn decode(kind: EventKind, raw: &RawLedgerEvent) -> Result<TypedEvent, IndexerError> {
    let event = match kind {
        EventKind::Created => {
            let f: CreatedFields = fields(kind, raw)?;
            let hash = match f.identity_hash {
                Some(h) => normalize_hash(&h),
                None => identity_hash(&f.identity),
            };
            TypedEvent::Identity(IdentityEvent::Created {
                identity_hash: hash,
                identity: f.identity,
                owner: f.owner.to_ascii_lowercase(),
            })
        }
        EventKind::Updated => {
            let f: UpdatedFields = fields(kind, raw)?;
            TypedEvent::Identity(IdentityEvent::Updated {
                identity_hash: normalize_hash(&f.identity_hash),
                document: f.document,
            })
        }
        EventKind::Revoked => {
            let f: HashOnly = fields(kind, raw)?;
            TypedEvent::Identity(IdentityEvent::Revoked {
                identity_hash: normalize_hash(&f.identity_hash),
            })
        }
        EventKind::Transferred => {
            let f: TransferredFields = fields(kind, raw)?;
            TypedEvent::Identity(IdentityEvent::Transferred {
                identity_hash: normalize_hash(&f.identity_hash),
                new_owner: f.new_owner.to_ascii_lowercase(),
            })
        }
        EventKind::ControllerAdded => {
            let f: ControllerFields = fields(kind, raw)?;
            TypedEvent::Identity(IdentityEvent::ControllerAdded {
                identity_hash: normalize_hash(&f.identity_hash),
                controller: f.controller.to_ascii_lowercase(),
            })
        }
        EventKind::ControllerRemoved => {
            let f: ControllerFields = fields(kind, raw)?;
            TypedEvent::Identity(IdentityEvent::ControllerRemoved {
                identity_hash: normalize_hash(&f.identity_hash),
                controller: f.controller.to_ascii_lowercase(),
            })
        }
        EventKind::DataStored => {
            let f: DataFields = fields(kind, raw)?;
            TypedEvent::Data(DataEvent::Stored {
                identity_hash: normalize_hash(&f.identity_hash),
                data_type: f.data_type,
                content_hash: f.content_hash,
            })
        }
        EventKind::DataUpdated => {
            let f: DataFields = fields(kind, raw)?;
            TypedEvent::Data(DataEvent::Updated {
                identity_hash: normalize_hash(&f.identity_hash),
                data_type: f.data_type,
                content_hash: f.content_hash,
            })
        }
        EventKind::DataDeleted => {
            let f: DataTypeFields = fields(kind, raw)?;
            TypedEvent::Data(DataEvent::Deleted {
                identity_hash: normalize_hash(&f.identity_hash),
                data_type: f.data_type,
            })
        }
        EventKind::AccessGranted => {
            let f: AccessFields = fields(kind, raw)?;
            TypedEvent::Data(DataEvent::AccessGranted {
                identity_hash: normalize_hash(&f.identity_hash),
                data_type: f.data_type,
                accessor: f.accessor.to_ascii_lowercase(),
            })
        }
        EventKind::AccessRevoked => {
            let f: AccessFields = fields(kind, raw)?;
            TypedEvent::Data(DataEvent::AccessRevoked {
                identity_hash: normalize_hash(&f.identity_hash),
                data_type: f.data_type,
                accessor: f.accessor.to_ascii_lowercase(),
            })
        }
    };
    Ok(event)
}
