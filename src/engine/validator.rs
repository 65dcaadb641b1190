//! Decides whether a reconnect create may resume a durable handle.
//!
//! The checks run in a fixed order and stop at the first failure:
//!
//! ```text
//! Start -> IdentityCheck -> DisconnectCheck -> ContextCheck -> LeaseValidityCheck -> Granted
//! ```
//!
//! Evaluation never mutates; the caller applies a granted verdict.

use std::fmt;

use super::error::EngineError;
use super::lease_table::LeaseTable;
use super::registry::{DurableHandleRegistry, Durability, LookupDenial};
use crate::protocol::{ClientGuid, CreateGuid, FileId, LeaseKey, LeaseState};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconnectStage {
    IdentityCheck,
    DisconnectCheck,
    ContextCheck,
    LeaseValidityCheck,
}

impl fmt::Display for ReconnectStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            ReconnectStage::IdentityCheck => "identity",
            ReconnectStage::DisconnectCheck => "disconnect",
            ReconnectStage::ContextCheck => "context",
            ReconnectStage::LeaseValidityCheck => "lease",
        };
        f.write_str(text)
    }
}

/// Wire variant of the reconnect context.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconnectVersion {
    V1,
    V2 { create_guid: CreateGuid },
}

/// Everything a reconnect create claims about the handle it resumes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconnectClaim {
    pub file_id: FileId,
    pub requester: ClientGuid,
    pub version: ReconnectVersion,
    pub lease_key: Option<LeaseKey>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconnectGrant {
    pub file_id: FileId,
    pub lease_state: Option<LeaseState>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReconnectDenial {
    pub stage: ReconnectStage,
    pub error: EngineError,
}

pub fn evaluate(
    registry: &DurableHandleRegistry,
    leases: &LeaseTable,
    claim: &ReconnectClaim,
) -> Result<ReconnectGrant, ReconnectDenial> {
    let file_id = claim.file_id;
    let handle = registry
        .lookup_for_reconnect(file_id, claim.requester)
        .map_err(|denial| match denial {
            LookupDenial::UnknownHandle => ReconnectDenial {
                stage: ReconnectStage::IdentityCheck,
                error: EngineError::UnknownHandle(file_id),
            },
            LookupDenial::ClientGuidMismatch => ReconnectDenial {
                stage: ReconnectStage::IdentityCheck,
                error: EngineError::IdentityMismatch {
                    file_id,
                    requester: claim.requester,
                },
            },
            LookupDenial::NotDisconnected => ReconnectDenial {
                stage: ReconnectStage::DisconnectCheck,
                error: EngineError::HandleNotDisconnected(file_id),
            },
        })?;

    let version_matches = match (handle.durability, claim.version) {
        (Durability::V1, ReconnectVersion::V1) => true,
        (Durability::V2 { create_guid, .. }, ReconnectVersion::V2 { create_guid: claimed }) => {
            create_guid == claimed
        }
        _ => false,
    };
    if !version_matches || handle.lease_key() != claim.lease_key {
        return Err(ReconnectDenial {
            stage: ReconnectStage::ContextCheck,
            error: EngineError::DurableContextMismatch(file_id),
        });
    }

    let lease_state = match handle.lease {
        Some(binding) => {
            if !leases.is_current(binding) {
                return Err(ReconnectDenial {
                    stage: ReconnectStage::LeaseValidityCheck,
                    error: EngineError::LeaseInvalidated {
                        file_id,
                        key: binding.key,
                    },
                });
            }
            leases.get(binding.key).map(|lease| lease.granted_state)
        }
        None => None,
    };

    Ok(ReconnectGrant {
        file_id,
        lease_state,
    })
}
