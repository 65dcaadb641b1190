//! Open-handle bookkeeping for one share.
//!
//! Every open is recorded here so that path conflicts, closes and
//! disconnects are handled uniformly. Only durable opens survive a
//! transport loss; the rest are dropped by the share when their connection
//! goes away.

use std::collections::HashMap;
use std::fmt;
use std::time::Duration;

use super::error::EngineError;
use super::lease_table::LeaseBinding;
use super::ConnectionId;
use crate::protocol::{
    AccessMask, ClientGuid, CreateDisposition, CreateGuid, FileId, GrantedDurability, LeaseKey,
    ShareAccess,
};

/// Durability of an open, tagged by the create context version that
/// requested it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Durability {
    None,
    V1,
    V2 {
        create_guid: CreateGuid,
        timeout: Duration,
    },
}

impl Durability {
    pub fn is_durable(&self) -> bool {
        !matches!(self, Durability::None)
    }

    pub fn granted(&self) -> Option<GrantedDurability> {
        match *self {
            Durability::None => None,
            Durability::V1 => Some(GrantedDurability::V1),
            Durability::V2 { timeout, .. } => Some(GrantedDurability::V2 { timeout }),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CreateParams {
    pub path: String,
    pub desired_access: AccessMask,
    pub share_access: ShareAccess,
    pub disposition: CreateDisposition,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DurableHandle {
    pub file_id: FileId,
    pub owner: ClientGuid,
    pub lease: Option<LeaseBinding>,
    pub params: CreateParams,
    pub durability: Durability,
    /// Connection the handle is bound to; `None` while disconnected.
    pub connection: Option<ConnectionId>,
}

impl DurableHandle {
    pub fn is_connected(&self) -> bool {
        self.connection.is_some()
    }

    pub fn lease_key(&self) -> Option<LeaseKey> {
        self.lease.map(|binding| binding.key)
    }

    pub fn path(&self) -> &str {
        &self.params.path
    }
}

/// Why `lookup_for_reconnect` refused to hand out a handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LookupDenial {
    UnknownHandle,
    ClientGuidMismatch,
    NotDisconnected,
}

impl fmt::Display for LookupDenial {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            LookupDenial::UnknownHandle => "unknown handle",
            LookupDenial::ClientGuidMismatch => "client guid mismatch",
            LookupDenial::NotDisconnected => "handle not disconnected",
        };
        f.write_str(text)
    }
}

#[derive(Debug, Default)]
pub struct DurableHandleRegistry {
    handles: HashMap<FileId, DurableHandle>,
}

impl DurableHandleRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, handle: DurableHandle) -> Result<(), EngineError> {
        if self.handles.contains_key(&handle.file_id) {
            return Err(EngineError::DuplicateHandle(handle.file_id));
        }
        self.handles.insert(handle.file_id, handle);
        Ok(())
    }

    /// Records transport loss for one handle. Lease state is not touched.
    pub fn mark_disconnected(
        &mut self,
        owner: ClientGuid,
        file_id: FileId,
    ) -> Result<(), EngineError> {
        let handle = self
            .handles
            .get_mut(&file_id)
            .ok_or(EngineError::UnknownHandle(file_id))?;
        if handle.owner != owner {
            return Err(EngineError::IdentityMismatch {
                file_id,
                requester: owner,
            });
        }
        handle.connection = None;
        Ok(())
    }

    /// Returns the handle only when `requester` owns it and it is currently
    /// disconnected. Never mutates.
    pub fn lookup_for_reconnect(
        &self,
        file_id: FileId,
        requester: ClientGuid,
    ) -> Result<&DurableHandle, LookupDenial> {
        let handle = self
            .handles
            .get(&file_id)
            .ok_or(LookupDenial::UnknownHandle)?;
        if handle.owner != requester {
            return Err(LookupDenial::ClientGuidMismatch);
        }
        if handle.is_connected() {
            return Err(LookupDenial::NotDisconnected);
        }
        Ok(handle)
    }

    pub fn mark_reconnected(
        &mut self,
        file_id: FileId,
        connection: ConnectionId,
    ) -> Result<&DurableHandle, EngineError> {
        let handle = self
            .handles
            .get_mut(&file_id)
            .ok_or(EngineError::UnknownHandle(file_id))?;
        if handle.is_connected() {
            return Err(EngineError::HandleNotDisconnected(file_id));
        }
        handle.connection = Some(connection);
        Ok(handle)
    }

    pub fn remove(&mut self, file_id: FileId) -> Result<DurableHandle, EngineError> {
        self.handles
            .remove(&file_id)
            .ok_or(EngineError::UnknownHandle(file_id))
    }

    pub fn get(&self, file_id: FileId) -> Option<&DurableHandle> {
        self.handles.get(&file_id)
    }

    pub fn contains(&self, file_id: FileId) -> bool {
        self.handles.contains_key(&file_id)
    }

    /// Handles currently bound to `connection`, in file id order.
    pub fn on_connection(&self, connection: ConnectionId) -> Vec<FileId> {
        let mut ids: Vec<FileId> = self
            .handles
            .values()
            .filter(|handle| handle.connection == Some(connection))
            .map(|handle| handle.file_id)
            .collect();
        ids.sort();
        ids
    }

    /// Handles bound to the given lease instance.
    pub fn holding(&self, binding: LeaseBinding) -> impl Iterator<Item = &DurableHandle> {
        self.handles
            .values()
            .filter(move |handle| handle.lease == Some(binding))
    }

    pub fn iter(&self) -> impl Iterator<Item = &DurableHandle> {
        self.handles.values()
    }

    pub fn len(&self) -> usize {
        self.handles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handles.is_empty()
    }
}
