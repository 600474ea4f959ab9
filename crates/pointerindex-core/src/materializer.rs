//! Pointer materializer: folds typed events into the stored pointers.

use std::sync::Arc;

use crate::error::IndexerError;
use crate::event::{ClassifiedEvent, TypedEvent};
use crate::pointer::IdentityPointer;
use crate::store::DocumentStore;

/// Applies classified events to the pointer collection.
pub struct PointerMaterializer {
    store: Arc<dyn DocumentStore>,
}

impl PointerMaterializer {
    pub fn new(store: Arc<dyn DocumentStore>) -> Self {
        Self { store }
    }

    /// Apply `event` to its identity's pointer, creating a placeholder on
    /// first reference. Returns `true` if the stored pointer changed.
    pub async fn apply(&self, event: &ClassifiedEvent) -> Result<bool, IndexerError> {
        let hash = event.event.identity_hash();
        let mut pointer = match self.store.get_pointer(hash).await? {
            Some(p) => p,
            None => {
                if !matches!(event.event, TypedEvent::Identity(_)) {
                    tracing::debug!(
                        identity_hash = hash,
                        kind = %event.kind(),
                        "data event ahead of identity; creating placeholder pointer"
                    );
                }
                IdentityPointer::placeholder(hash)
            }
        };

        if !pointer.apply(event) {
            tracing::debug!(
                identity_hash = hash,
                kind = %event.kind(),
                position = %event.position,
                "event already reflected in pointer"
            );
            return Ok(false);
        }

        self.store.put_pointer(&pointer).await?;
        Ok(true)
    }
}
