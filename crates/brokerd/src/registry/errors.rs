use thiserror::Error;

use super::{HandleId, HandleKind};

/// Errors raised when resolving handles.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RegistryError {
    /// No live handle of the requested kind exists under the ID.
    #[error("invalid {kind} handle: {id}")]
    NotFound {
        /// Requested ID.
        id: HandleId,
        /// Requested kind.
        kind: HandleKind,
    },
    /// A previous user of the handle panicked while holding it.
    #[error("handle {id} is unusable after a failed operation")]
    Poisoned {
        /// Affected ID.
        id: HandleId,
    },
}

impl RegistryError {
    pub(crate) fn not_found(id: &HandleId, kind: HandleKind) -> Self {
        Self::NotFound {
            id: id.clone(),
            kind,
        }
    }

    pub(crate) fn poisoned(id: &HandleId) -> Self {
        Self::Poisoned { id: id.clone() }
    }
}
