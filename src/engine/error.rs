use thiserror::Error;

use super::ConnectionId;
use crate::protocol::{ClientGuid, FileId, LeaseKey, NtStatus};

/// Reasons a create, reconnect or close is refused by the engine.
///
/// Several variants collapse onto `STATUS_OBJECT_NAME_NOT_FOUND` so that a
/// requester cannot tell which reconnect precondition failed.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EngineError {
    #[error("client {requester} does not own handle {file_id}")]
    IdentityMismatch {
        file_id: FileId,
        requester: ClientGuid,
    },
    #[error("handle {0} is still connected")]
    HandleNotDisconnected(FileId),
    #[error("lease {key} backing handle {file_id} was invalidated")]
    LeaseInvalidated { file_id: FileId, key: LeaseKey },
    #[error("handle {0} is already registered")]
    DuplicateHandle(FileId),
    #[error("no handle registered for {0}")]
    UnknownHandle(FileId),
    #[error("reconnect context does not match handle {0}")]
    DurableContextMismatch(FileId),
    #[error("lease key {key} is already bound to {path}")]
    LeaseKeyPathConflict { key: LeaseKey, path: String },
    #[error("connection {0} is closed")]
    ConnectionClosed(ConnectionId),
}

impl EngineError {
    /// Status reported to the requester.
    pub fn status(&self) -> NtStatus {
        match self {
            EngineError::IdentityMismatch { .. }
            | EngineError::LeaseInvalidated { .. }
            | EngineError::DurableContextMismatch(_)
            | EngineError::UnknownHandle(_) => NtStatus::OBJECT_NAME_NOT_FOUND,
            EngineError::HandleNotDisconnected(_) => NtStatus::INVALID_DEVICE_STATE,
            EngineError::DuplicateHandle(_) => NtStatus::DUPLICATE_OBJECTID,
            EngineError::LeaseKeyPathConflict { .. } => NtStatus::INVALID_PARAMETER,
            EngineError::ConnectionClosed(_) => NtStatus::CONNECTION_DISCONNECTED,
        }
    }

    /// Errors that can only come from engine bookkeeping going wrong, never
    /// from a well-formed request.
    pub fn is_bookkeeping(&self) -> bool {
        matches!(
            self,
            EngineError::DuplicateHandle(_) | EngineError::UnknownHandle(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_identity_and_invalidation_collapse() {
        let file_id = FileId::new(1, 1);
        let identity = EngineError::IdentityMismatch {
            file_id,
            requester: ClientGuid::generate(),
        };
        let invalidated = EngineError::LeaseInvalidated {
            file_id,
            key: LeaseKey::generate(),
        };
        assert_eq!(identity.status(), invalidated.status());
        assert_eq!(identity.status(), NtStatus::OBJECT_NAME_NOT_FOUND);
    }

    #[test]
    fn test_state_and_bookkeeping_statuses() {
        let file_id = FileId::new(2, 2);
        assert_eq!(
            EngineError::HandleNotDisconnected(file_id).status(),
            NtStatus::INVALID_DEVICE_STATE
        );
        assert_eq!(
            EngineError::DuplicateHandle(file_id).status(),
            NtStatus::DUPLICATE_OBJECTID
        );
        assert!(EngineError::DuplicateHandle(file_id).is_bookkeeping());
        assert!(!EngineError::HandleNotDisconnected(file_id).is_bookkeeping());
    }
}
