//! Create, close and disconnect processing over the share tables.
//!
//! Every function here runs with the share lock held, so a lease break and
//! the grant that caused it are observed together.

use std::time::Duration;

use super::break_handler::{handle_break, BreakReport, BreakTrigger, LeaseBreakEvent};
use super::error::EngineError;
use super::lease_table::LeaseBinding;
use super::registry::{CreateParams, DurableHandle, Durability};
use super::validator::{self, ReconnectClaim, ReconnectStage, ReconnectVersion};
use super::{ConnectionId, ShareTables};
use crate::protocol::{
    ClientGuid, CreateRequest, CreateResponse, DurableRequest, FileId, LeaseState, OplockLevel,
};

/// Who is asking, and on which connection.
#[derive(Debug, Clone, Copy)]
pub struct CreateContext {
    pub connection: ConnectionId,
    pub client: ClientGuid,
    pub default_v2_timeout: Duration,
}

#[derive(Debug, Clone)]
pub struct CreateOutcome {
    pub response: CreateResponse,
    pub breaks: Vec<BreakReport>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DisconnectReport {
    /// Durable handles left waiting for a reconnect.
    pub preserved: Vec<FileId>,
    /// Non-durable handles closed with the transport.
    pub dropped: Vec<FileId>,
}

pub fn process_create(
    tables: &mut ShareTables,
    ctx: &CreateContext,
    request: &CreateRequest,
) -> Result<CreateOutcome, EngineError> {
    match request.durable {
        DurableRequest::ReconnectV1 { file_id } => {
            reconnect(tables, ctx, request, file_id, ReconnectVersion::V1)
        }
        DurableRequest::ReconnectV2 {
            file_id,
            create_guid,
        } => reconnect(
            tables,
            ctx,
            request,
            file_id,
            ReconnectVersion::V2 { create_guid },
        ),
        DurableRequest::None => fresh_create(tables, ctx, request, Durability::None),
        DurableRequest::V1 => fresh_create(tables, ctx, request, Durability::V1),
        DurableRequest::V2 {
            create_guid,
            timeout,
        } => {
            let timeout = if timeout.is_zero() {
                ctx.default_v2_timeout
            } else {
                timeout
            };
            fresh_create(
                tables,
                ctx,
                request,
                Durability::V2 {
                    create_guid,
                    timeout,
                },
            )
        }
    }
}

fn fresh_create(
    tables: &mut ShareTables,
    ctx: &CreateContext,
    request: &CreateRequest,
    durability: Durability,
) -> Result<CreateOutcome, EngineError> {
    let path = request.path.as_str();
    let requested_key = request.lease_key();

    let mut events = Vec::new();
    if let Some(key) = requested_key {
        if let Some(lease) = tables.leases.get(key).filter(|lease| !lease.invalidated) {
            if lease.path != path {
                return Err(EngineError::LeaseKeyPathConflict {
                    key,
                    path: lease.path.clone(),
                });
            }
            let binding = lease.binding();
            let orphaned = tables
                .registry
                .holding(binding)
                .all(|handle| !handle.is_connected());
            if orphaned {
                events.push(LeaseBreakEvent {
                    key,
                    trigger: BreakTrigger::SameKey,
                    requester: ctx.client,
                });
            }
        }
    }
    for binding in tables.leases.live_on_path(path, requested_key) {
        events.push(LeaseBreakEvent {
            key: binding.key,
            trigger: BreakTrigger::SharedFile,
            requester: ctx.client,
        });
    }

    // Breaks land before this request's own grant is computed.
    let mut breaks = Vec::with_capacity(events.len());
    for event in &events {
        if let Some(report) = handle_break(&tables.registry, &mut tables.leases, event) {
            breaks.push(report);
        }
    }

    let (lease, lease_state) = match request.lease {
        Some(lease_request) => {
            let contended = !tables
                .leases
                .live_on_path(path, Some(lease_request.key))
                .is_empty();
            let requested = if contended {
                lease_request.state.without(LeaseState::WRITE_CACHING)
            } else {
                lease_request.state
            };
            let grant = tables
                .leases
                .acquire_or_join(lease_request.key, path, requested)?;
            (Some(grant.binding), Some(grant.state))
        }
        None => (None, None),
    };

    let file_id = tables.allocate_file_id();
    tables.registry.register(DurableHandle {
        file_id,
        owner: ctx.client,
        lease,
        params: CreateParams {
            path: request.path.clone(),
            desired_access: request.desired_access,
            share_access: request.share_access,
            disposition: request.disposition,
        },
        durability,
        connection: Some(ctx.connection),
    })?;

    tracing::info!(
        file_id = %file_id,
        client = %ctx.client,
        connection = %ctx.connection,
        path = path,
        lease_state = ?lease_state.map(|state| state.letters()),
        durable = ?durability,
        breaks = breaks.len(),
        "Create granted"
    );

    Ok(CreateOutcome {
        response: CreateResponse {
            file_id,
            oplock_level: if lease.is_some() {
                OplockLevel::Lease
            } else {
                OplockLevel::None
            },
            lease_state,
            durable: durability.granted(),
            reconnected: false,
        },
        breaks,
    })
}

fn reconnect(
    tables: &mut ShareTables,
    ctx: &CreateContext,
    request: &CreateRequest,
    file_id: FileId,
    version: ReconnectVersion,
) -> Result<CreateOutcome, EngineError> {
    let claim = ReconnectClaim {
        file_id,
        requester: ctx.client,
        version,
        lease_key: request.lease_key(),
    };
    let grant = match validator::evaluate(&tables.registry, &tables.leases, &claim) {
        Ok(grant) => grant,
        Err(denial) => {
            tracing::info!(
                file_id = %file_id,
                client = %ctx.client,
                stage = %denial.stage,
                status = %denial.error.status(),
                reason = %denial.error,
                "Durable reconnect denied"
            );
            // The owner's lease is gone for good; the handle can never resume.
            if denial.stage == ReconnectStage::LeaseValidityCheck {
                if let Ok(stale) = tables.registry.remove(file_id) {
                    release_if_unheld(tables, stale.lease);
                }
            }
            return Err(denial.error);
        }
    };

    let handle = tables.registry.mark_reconnected(file_id, ctx.connection)?;
    tracing::info!(
        file_id = %file_id,
        client = %ctx.client,
        connection = %ctx.connection,
        lease_state = ?grant.lease_state.map(|state| state.letters()),
        "Durable reconnect granted"
    );

    Ok(CreateOutcome {
        response: CreateResponse {
            file_id,
            oplock_level: if handle.lease.is_some() {
                OplockLevel::Lease
            } else {
                OplockLevel::None
            },
            lease_state: grant.lease_state,
            durable: handle.durability.granted(),
            reconnected: true,
        },
        breaks: Vec::new(),
    })
}

/// Explicit close from the connection that owns the handle.
pub fn process_close(
    tables: &mut ShareTables,
    connection: ConnectionId,
    file_id: FileId,
) -> Result<DurableHandle, EngineError> {
    let bound_here = tables
        .registry
        .get(file_id)
        .map(|handle| handle.connection == Some(connection))
        .unwrap_or(false);
    if !bound_here {
        return Err(EngineError::UnknownHandle(file_id));
    }
    let handle = tables.registry.remove(file_id)?;
    release_if_unheld(tables, handle.lease);
    tracing::debug!(file_id = %file_id, connection = %connection, "Handle closed");
    Ok(handle)
}

/// Transport loss for `connection`: durable handles wait for a reconnect,
/// everything else is closed.
pub fn process_disconnect(
    tables: &mut ShareTables,
    connection: ConnectionId,
) -> Result<DisconnectReport, EngineError> {
    let mut report = DisconnectReport::default();
    for file_id in tables.registry.on_connection(connection) {
        let Some(handle) = tables.registry.get(file_id) else {
            continue;
        };
        if handle.durability.is_durable() {
            let owner = handle.owner;
            tables.registry.mark_disconnected(owner, file_id)?;
            report.preserved.push(file_id);
        } else {
            let handle = tables.registry.remove(file_id)?;
            release_if_unheld(tables, handle.lease);
            report.dropped.push(file_id);
        }
    }
    Ok(report)
}

fn release_if_unheld(tables: &mut ShareTables, binding: Option<LeaseBinding>) {
    let Some(binding) = binding else {
        return;
    };
    if tables.registry.holding(binding).next().is_none() {
        tables.leases.release(binding);
    }
}
