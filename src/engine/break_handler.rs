//! Lease breaks caused by a conflicting opener.

use super::lease_table::{BreakOutcome, Holders, LeaseBinding, LeaseTable};
use super::registry::DurableHandleRegistry;
use super::ConnectionId;
use crate::protocol::{ClientGuid, LeaseBreakNotification, LeaseKey};

/// How the conflicting open touched the lease.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BreakTrigger {
    /// The opener asked for the same lease key.
    SameKey,
    /// The opener targets the same file under another (or no) lease key.
    SharedFile,
}

/// A break request handed to [`handle_break`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LeaseBreakEvent {
    pub key: LeaseKey,
    pub trigger: BreakTrigger,
    pub requester: ClientGuid,
}

/// Result of one break: what happened to the lease and which connections
/// must be told.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BreakReport {
    pub key: LeaseKey,
    pub binding: LeaseBinding,
    pub outcome: BreakOutcome,
    pub notifications: Vec<(ConnectionId, LeaseBreakNotification)>,
}

/// Applies one break event to the lease table.
///
/// Returns `None` when the key has no live lease or nobody holds it.
pub fn handle_break(
    registry: &DurableHandleRegistry,
    leases: &mut LeaseTable,
    event: &LeaseBreakEvent,
) -> Option<BreakReport> {
    let binding = leases.get(event.key).filter(|l| !l.invalidated)?.binding();

    let mut connections: Vec<ConnectionId> = registry
        .holding(binding)
        .filter_map(|handle| handle.connection)
        .collect();
    connections.sort();
    connections.dedup();
    let any_holder = registry.holding(binding).next().is_some();
    if !any_holder {
        return None;
    }

    let holders = if connections.is_empty() {
        Holders::DisconnectedOnly
    } else {
        Holders::Connected
    };
    let outcome = leases.break_lease(event.key, holders)?;

    let notifications = match outcome {
        BreakOutcome::Downgraded { from, to } => connections
            .into_iter()
            .map(|connection| {
                (
                    connection,
                    LeaseBreakNotification {
                        lease_key: event.key,
                        current_state: from,
                        new_state: to,
                        epoch: binding.epoch,
                    },
                )
            })
            .collect(),
        BreakOutcome::Invalidated { .. } | BreakOutcome::Unchanged { .. } => Vec::new(),
    };

    match outcome {
        BreakOutcome::Invalidated { previous } => tracing::info!(
            lease_key = %event.key,
            epoch = binding.epoch,
            previous = %previous,
            trigger = ?event.trigger,
            requester = %event.requester,
            "Lease invalidated while holders disconnected"
        ),
        BreakOutcome::Downgraded { from, to } => tracing::info!(
            lease_key = %event.key,
            from = %from,
            to = %to,
            trigger = ?event.trigger,
            "Lease broken"
        ),
        BreakOutcome::Unchanged { state } => tracing::debug!(
            lease_key = %event.key,
            state = %state,
            holders = ?holders,
            "Lease break left state unchanged"
        ),
    }

    Some(BreakReport {
        key: event.key,
        binding,
        outcome,
        notifications,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::registry::{CreateParams, DurableHandle, Durability};
    use crate::protocol::{AccessMask, CreateDisposition, FileId, LeaseState, ShareAccess};

    fn holder(
        registry: &mut DurableHandleRegistry,
        file_id: FileId,
        binding: LeaseBinding,
        connection: Option<ConnectionId>,
    ) -> ClientGuid {
        let owner = ClientGuid::generate();
        registry
            .register(DurableHandle {
                file_id,
                owner,
                lease: Some(binding),
                params: CreateParams {
                    path: "durable.txt".to_string(),
                    desired_access: AccessMask::FILE_READ_DATA,
                    share_access: ShareAccess::ALL,
                    disposition: CreateDisposition::Supersede,
                },
                durability: Durability::V1,
                connection,
            })
            .unwrap();
        owner
    }

    fn event(key: LeaseKey) -> LeaseBreakEvent {
        LeaseBreakEvent {
            key,
            trigger: BreakTrigger::SharedFile,
            requester: ClientGuid::generate(),
        }
    }

    #[test]
    fn test_absent_lease_is_noop() {
        let registry = DurableHandleRegistry::new();
        let mut leases = LeaseTable::new();
        assert!(handle_break(&registry, &mut leases, &event(LeaseKey::generate())).is_none());
    }

    #[test]
    fn test_disconnected_without_handle_caching_invalidates() {
        let mut registry = DurableHandleRegistry::new();
        let mut leases = LeaseTable::new();
        let key = LeaseKey::generate();
        let grant = leases.acquire_or_join(key, "durable.txt", LeaseState::RW).unwrap();
        holder(&mut registry, FileId::new(1, 1), grant.binding, None);

        let report = handle_break(&registry, &mut leases, &event(key)).unwrap();
        assert_eq!(
            report.outcome,
            BreakOutcome::Invalidated {
                previous: LeaseState::RW
            }
        );
        assert!(report.notifications.is_empty());
        assert!(leases.is_invalidated(key));
    }

    #[test]
    fn test_disconnected_with_handle_caching_survives() {
        let mut registry = DurableHandleRegistry::new();
        let mut leases = LeaseTable::new();
        let key = LeaseKey::generate();
        let grant = leases.acquire_or_join(key, "durable.txt", LeaseState::RWH).unwrap();
        holder(&mut registry, FileId::new(1, 1), grant.binding, None);

        let report = handle_break(&registry, &mut leases, &event(key)).unwrap();
        assert_eq!(
            report.outcome,
            BreakOutcome::Unchanged {
                state: LeaseState::RWH
            }
        );
        assert!(leases.is_current(grant.binding));
    }

    #[test]
    fn test_connected_holder_is_notified() {
        let mut registry = DurableHandleRegistry::new();
        let mut leases = LeaseTable::new();
        let key = LeaseKey::generate();
        let grant = leases.acquire_or_join(key, "durable.txt", LeaseState::RWH).unwrap();
        holder(&mut registry, FileId::new(1, 1), grant.binding, Some(ConnectionId(4)));
        holder(&mut registry, FileId::new(2, 2), grant.binding, None);

        let report = handle_break(&registry, &mut leases, &event(key)).unwrap();
        assert_eq!(report.notifications.len(), 1);
        let (connection, notification) = &report.notifications[0];
        assert_eq!(*connection, ConnectionId(4));
        assert_eq!(notification.current_state, LeaseState::RWH);
        assert_eq!(notification.new_state, LeaseState::RH);
        assert!(!leases.is_invalidated(key));
    }

    #[test]
    fn test_unheld_lease_is_noop() {
        let registry = DurableHandleRegistry::new();
        let mut leases = LeaseTable::new();
        let key = LeaseKey::generate();
        leases.acquire_or_join(key, "durable.txt", LeaseState::RW).unwrap();
        assert!(handle_break(&registry, &mut leases, &event(key)).is_none());
        assert!(!leases.is_invalidated(key));
    }
}
