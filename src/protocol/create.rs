//! SMB2 CREATE request/response surface used by the engine.
//!
//! Only the fields that matter for durable handles and leases are modelled.
//! Reference: [MS-SMB2] 2.2.13 and 2.2.14.

use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::guid::{CreateGuid, LeaseKey};
use super::lease::{LeaseRequest, LeaseState};

/// `SMB2_FILEID`: persistent part survives reconnects, volatile part is
/// per-open.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct FileId {
    pub persistent: u64,
    pub volatile: u64,
}

impl FileId {
    pub const fn new(persistent: u64, volatile: u64) -> Self {
        Self {
            persistent,
            volatile,
        }
    }
}

impl fmt::Display for FileId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:016x}:{:016x}", self.persistent, self.volatile)
    }
}

impl fmt::Debug for FileId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "FileId({self})")
    }
}

/// Access mask bits ([MS-SMB2] 2.2.13.1.1).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct AccessMask(pub u32);

impl AccessMask {
    pub const FILE_READ_DATA: Self = Self(0x0000_0001);
    pub const FILE_WRITE_DATA: Self = Self(0x0000_0002);
    pub const FILE_APPEND_DATA: Self = Self(0x0000_0004);
    pub const DELETE: Self = Self(0x0001_0000);
    pub const GENERIC_WRITE: Self = Self(0x4000_0000);
    pub const GENERIC_READ: Self = Self(0x8000_0000);

    pub fn union(self, other: Self) -> Self {
        Self(self.0 | other.0)
    }

    pub fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }
}

/// Share access flags ([MS-SMB2] 2.2.13, ShareAccess).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct ShareAccess(pub u32);

impl ShareAccess {
    pub const NONE: Self = Self(0);
    pub const READ: Self = Self(0x01);
    pub const WRITE: Self = Self(0x02);
    pub const DELETE: Self = Self(0x04);
    pub const ALL: Self = Self(0x07);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum CreateDisposition {
    #[default]
    Supersede,
    Open,
    Create,
    OpenIf,
    Overwrite,
    OverwriteIf,
}

impl CreateDisposition {
    pub fn wire_value(self) -> u32 {
        match self {
            CreateDisposition::Supersede => 0,
            CreateDisposition::Open => 1,
            CreateDisposition::Create => 2,
            CreateDisposition::OpenIf => 3,
            CreateDisposition::Overwrite => 4,
            CreateDisposition::OverwriteIf => 5,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum OplockLevel {
    #[default]
    None,
    II,
    Exclusive,
    Batch,
    Lease,
}

/// Durable-handle context attached to a create request.
///
/// The first three variants ask for a fresh open, the reconnect variants
/// claim a handle that survived a transport loss.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DurableRequest {
    #[default]
    None,
    /// `SMB2_CREATE_DURABLE_HANDLE_REQUEST`
    V1,
    /// `SMB2_CREATE_DURABLE_HANDLE_REQUEST_V2`; a zero timeout asks the
    /// server to pick its default.
    V2 {
        create_guid: CreateGuid,
        timeout: Duration,
    },
    /// `SMB2_CREATE_DURABLE_HANDLE_RECONNECT`
    ReconnectV1 { file_id: FileId },
    /// `SMB2_CREATE_DURABLE_HANDLE_RECONNECT_V2`
    ReconnectV2 {
        file_id: FileId,
        create_guid: CreateGuid,
    },
}

impl DurableRequest {
    pub fn v2() -> Self {
        DurableRequest::V2 {
            create_guid: CreateGuid::generate(),
            timeout: Duration::ZERO,
        }
    }

    pub fn is_reconnect(&self) -> bool {
        matches!(
            self,
            DurableRequest::ReconnectV1 { .. } | DurableRequest::ReconnectV2 { .. }
        )
    }

    /// The reconnect context that resumes a handle opened with `self`.
    pub fn reconnect_for(&self, file_id: FileId) -> Option<DurableRequest> {
        match *self {
            DurableRequest::V1 | DurableRequest::ReconnectV1 { .. } => {
                Some(DurableRequest::ReconnectV1 { file_id })
            }
            DurableRequest::V2 { create_guid, .. } | DurableRequest::ReconnectV2 { create_guid, .. } => {
                Some(DurableRequest::ReconnectV2 {
                    file_id,
                    create_guid,
                })
            }
            DurableRequest::None => None,
        }
    }
}

/// Durability granted by the server on a create response.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GrantedDurability {
    V1,
    V2 { timeout: Duration },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CreateRequest {
    pub path: String,
    pub desired_access: AccessMask,
    pub share_access: ShareAccess,
    pub disposition: CreateDisposition,
    pub oplock_level: OplockLevel,
    pub lease: Option<LeaseRequest>,
    pub durable: DurableRequest,
}

impl CreateRequest {
    /// Read/write/delete access with every share mode allowed.
    pub fn new(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            desired_access: AccessMask::FILE_READ_DATA
                .union(AccessMask::FILE_WRITE_DATA)
                .union(AccessMask::DELETE),
            share_access: ShareAccess::ALL,
            disposition: CreateDisposition::Supersede,
            oplock_level: OplockLevel::None,
            lease: None,
            durable: DurableRequest::None,
        }
    }

    pub fn with_lease(mut self, key: LeaseKey, state: LeaseState) -> Self {
        self.oplock_level = OplockLevel::Lease;
        self.lease = Some(LeaseRequest::new(key, state));
        self
    }

    pub fn with_disposition(mut self, disposition: CreateDisposition) -> Self {
        self.disposition = disposition;
        self
    }

    pub fn with_access(mut self, access: AccessMask, share: ShareAccess) -> Self {
        self.desired_access = access;
        self.share_access = share;
        self
    }

    pub fn with_durable(mut self, durable: DurableRequest) -> Self {
        self.durable = durable;
        self
    }

    /// Same parameters, carrying a reconnect context for `file_id`.
    /// Returns `None` when this request was not durable.
    pub fn to_reconnect(&self, file_id: FileId) -> Option<CreateRequest> {
        let durable = self.durable.reconnect_for(file_id)?;
        Some(Self {
            durable,
            ..self.clone()
        })
    }

    pub fn lease_key(&self) -> Option<LeaseKey> {
        self.lease.map(|lease| lease.key)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CreateResponse {
    pub file_id: FileId,
    pub oplock_level: OplockLevel,
    pub lease_state: Option<LeaseState>,
    pub durable: Option<GrantedDurability>,
    /// Set when the response resumed an existing durable handle.
    pub reconnected: bool,
}
