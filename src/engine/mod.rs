//! Durable-handle and lease reconciliation for one share.
//!
//! A [`Share`] owns the lease table and the handle registry. Every logical
//! operation (create, reconnect, close, disconnect, break) takes the share
//! lock once and runs to completion under it, so a lease break and a
//! concurrent reconnect are always observed in a single order.

use std::collections::HashMap;
use std::fmt;

use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, Mutex};

pub mod break_handler;
pub mod config;
pub mod error;
pub mod lease_table;
mod metrics;
pub mod processor;
pub mod registry;
pub mod validator;

pub use break_handler::{BreakReport, BreakTrigger, LeaseBreakEvent};
pub use config::{InvariantMode, ShareConfig};
pub use error::EngineError;
pub use lease_table::{BreakOutcome, Lease, LeaseBinding, LeaseTable};
pub use metrics::MetricsSnapshot;
pub use processor::DisconnectReport;
pub use registry::{DurableHandle, DurableHandleRegistry, Durability, LookupDenial};

use crate::protocol::{
    ClientGuid, CreateRequest, CreateResponse, FileId, LeaseBreakNotification, LeaseKey,
};
use metrics::ShareMetrics;
use processor::CreateContext;

/// One transport connection attached to a share.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(pub u64);

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

struct ConnectionEntry {
    client: ClientGuid,
    notify: mpsc::Sender<LeaseBreakNotification>,
}

/// Mutable state guarded by the share lock.
#[derive(Default)]
pub struct ShareTables {
    pub registry: DurableHandleRegistry,
    pub leases: LeaseTable,
    connections: HashMap<ConnectionId, ConnectionEntry>,
    next_connection: u64,
    next_persistent: u64,
    next_volatile: u64,
}

impl ShareTables {
    pub(crate) fn attach(
        &mut self,
        client: ClientGuid,
        notify: mpsc::Sender<LeaseBreakNotification>,
    ) -> ConnectionId {
        self.next_connection += 1;
        let id = ConnectionId(self.next_connection);
        self.connections.insert(id, ConnectionEntry { client, notify });
        id
    }

    fn client_of(&self, connection: ConnectionId) -> Option<ClientGuid> {
        self.connections.get(&connection).map(|entry| entry.client)
    }

    fn allocate_file_id(&mut self) -> FileId {
        self.next_persistent += 1;
        self.next_volatile += 1;
        FileId::new(self.next_persistent, self.next_volatile)
    }
}

pub struct Share {
    config: ShareConfig,
    tables: Mutex<ShareTables>,
    metrics: ShareMetrics,
}

impl Share {
    pub fn new(config: ShareConfig) -> Self {
        Self {
            config,
            tables: Mutex::new(ShareTables::default()),
            metrics: ShareMetrics::default(),
        }
    }

    pub fn config(&self) -> &ShareConfig {
        &self.config
    }

    /// Attaches a new connection for `client`. Lease breaks addressed to
    /// handles on this connection arrive on the returned receiver.
    pub async fn open_connection(
        &self,
        client: ClientGuid,
    ) -> (ConnectionId, mpsc::Receiver<LeaseBreakNotification>) {
        let (tx, rx) = mpsc::channel(self.config.notification_capacity.max(1));
        let mut tables = self.tables.lock().await;
        let id = tables.attach(client, tx);
        tracing::debug!(
            share = %self.config.share_name,
            connection = %id,
            client = %client,
            "Connection attached"
        );
        (id, rx)
    }

    pub async fn create(
        &self,
        connection: ConnectionId,
        request: &CreateRequest,
    ) -> Result<CreateResponse, EngineError> {
        let mut tables = self.tables.lock().await;
        let client = tables
            .client_of(connection)
            .ok_or(EngineError::ConnectionClosed(connection))?;
        let ctx = CreateContext {
            connection,
            client,
            default_v2_timeout: self.config.default_v2_timeout,
        };
        let reconnect = request.durable.is_reconnect();
        match processor::process_create(&mut tables, &ctx, request) {
            Ok(outcome) => {
                self.dispatch_breaks(&tables, &outcome.breaks);
                if reconnect {
                    ShareMetrics::bump(&self.metrics.reconnects_granted);
                } else {
                    ShareMetrics::bump(&self.metrics.creates);
                }
                Ok(outcome.response)
            }
            Err(err) => {
                if reconnect {
                    ShareMetrics::bump(&self.metrics.reconnects_denied);
                } else if err.is_bookkeeping() {
                    self.invariant_violation(&err);
                }
                Err(err)
            }
        }
    }

    pub async fn close(&self, connection: ConnectionId, file_id: FileId) -> Result<(), EngineError> {
        let mut tables = self.tables.lock().await;
        if tables.client_of(connection).is_none() {
            return Err(EngineError::ConnectionClosed(connection));
        }
        match processor::process_close(&mut tables, connection, file_id) {
            Ok(_) => Ok(()),
            Err(err) => {
                self.invariant_violation(&err);
                Err(err)
            }
        }
    }

    /// Transport loss. Durable handles stay registered for a reconnect;
    /// later requests on `connection` fail with a connection-closed error.
    pub async fn disconnect(&self, connection: ConnectionId) -> Result<DisconnectReport, EngineError> {
        let mut tables = self.tables.lock().await;
        if tables.connections.remove(&connection).is_none() {
            return Err(EngineError::ConnectionClosed(connection));
        }
        let report = processor::process_disconnect(&mut tables, connection).map_err(|err| {
            self.invariant_violation(&err);
            err
        })?;
        tracing::info!(
            share = %self.config.share_name,
            connection = %connection,
            preserved = report.preserved.len(),
            dropped = report.dropped.len(),
            "Connection lost"
        );
        Ok(report)
    }

    /// Applies an externally raised break event.
    pub async fn deliver_break(&self, event: LeaseBreakEvent) -> Option<BreakReport> {
        let mut tables = self.tables.lock().await;
        let tables = &mut *tables;
        let report = break_handler::handle_break(&tables.registry, &mut tables.leases, &event)?;
        self.dispatch_breaks(tables, std::slice::from_ref(&report));
        Some(report)
    }

    pub async fn lookup_for_reconnect(
        &self,
        file_id: FileId,
        requester: ClientGuid,
    ) -> Result<DurableHandle, LookupDenial> {
        let tables = self.tables.lock().await;
        tables
            .registry
            .lookup_for_reconnect(file_id, requester)
            .cloned()
    }

    pub async fn handle(&self, file_id: FileId) -> Option<DurableHandle> {
        self.tables.lock().await.registry.get(file_id).cloned()
    }

    pub async fn lease(&self, key: LeaseKey) -> Option<Lease> {
        self.tables.lock().await.leases.get(key).cloned()
    }

    /// Connections attached and not yet disconnected.
    pub async fn connection_count(&self) -> usize {
        self.tables.lock().await.connections.len()
    }

    pub async fn is_lease_invalidated(&self, key: LeaseKey) -> bool {
        self.tables.lock().await.leases.is_invalidated(key)
    }

    pub fn metrics(&self) -> MetricsSnapshot {
        self.metrics.snapshot()
    }

    fn dispatch_breaks(&self, tables: &ShareTables, reports: &[BreakReport]) {
        for report in reports {
            ShareMetrics::bump(&self.metrics.lease_breaks);
            if matches!(report.outcome, BreakOutcome::Invalidated { .. }) {
                ShareMetrics::bump(&self.metrics.lease_invalidations);
            }
            for (connection, notification) in &report.notifications {
                let Some(entry) = tables.connections.get(connection) else {
                    ShareMetrics::bump(&self.metrics.notifications_dropped);
                    continue;
                };
                match entry.notify.try_send(notification.clone()) {
                    Ok(()) => {}
                    Err(TrySendError::Full(_)) => {
                        ShareMetrics::bump(&self.metrics.notifications_dropped);
                        tracing::warn!(
                            connection = %connection,
                            lease_key = %notification.lease_key,
                            "Lease break queue full, notification dropped"
                        );
                    }
                    Err(TrySendError::Closed(_)) => {
                        ShareMetrics::bump(&self.metrics.notifications_dropped);
                        tracing::debug!(
                            connection = %connection,
                            lease_key = %notification.lease_key,
                            "Lease break receiver gone"
                        );
                    }
                }
            }
        }
    }

    fn invariant_violation(&self, err: &EngineError) {
        ShareMetrics::bump(&self.metrics.invariant_violations);
        tracing::error!(
            share = %self.config.share_name,
            error = %err,
            status = %err.status(),
            "Invariant violation"
        );
        match self.config.invariant_mode {
            InvariantMode::Panic => panic!("Invariant violation: {err}"),
            InvariantMode::LogAndContinue => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{DurableRequest, LeaseState, NtStatus};

    #[tokio::test]
    async fn test_requests_after_disconnect_fail_closed() {
        let share = Share::new(ShareConfig::default());
        let (conn, _rx) = share.open_connection(ClientGuid::generate()).await;
        share.disconnect(conn).await.unwrap();

        let err = share
            .create(conn, &CreateRequest::new("a.txt"))
            .await
            .unwrap_err();
        assert_eq!(err.status(), NtStatus::CONNECTION_DISCONNECTED);
        assert!(share.disconnect(conn).await.is_err());
    }

    #[tokio::test]
    async fn test_break_notification_reaches_connected_owner() {
        let share = Share::new(ShareConfig::default());
        let (first, mut rx) = share.open_connection(ClientGuid::generate()).await;
        let (second, _rx2) = share.open_connection(ClientGuid::generate()).await;
        let key = LeaseKey::generate();

        share
            .create(first, &CreateRequest::new("a.txt").with_lease(key, LeaseState::RWH))
            .await
            .unwrap();
        let response = share
            .create(
                second,
                &CreateRequest::new("a.txt").with_lease(LeaseKey::generate(), LeaseState::RWH),
            )
            .await
            .unwrap();
        assert_eq!(response.lease_state, Some(LeaseState::RH));

        let notification = rx.try_recv().unwrap();
        assert_eq!(notification.lease_key, key);
        assert_eq!(notification.new_state, LeaseState::RH);
        assert_eq!(share.metrics().lease_breaks, 1);
    }

    #[tokio::test]
    async fn test_full_queue_drops_notification() {
        let config = ShareConfig {
            notification_capacity: 1,
            ..ShareConfig::default()
        };
        let share = Share::new(config);
        let (owner, _rx) = share.open_connection(ClientGuid::generate()).await;
        let (other, _other_rx) = share.open_connection(ClientGuid::generate()).await;
        let k1 = LeaseKey::generate();
        let k2 = LeaseKey::generate();
        share
            .create(owner, &CreateRequest::new("a.txt").with_lease(k1, LeaseState::RWH))
            .await
            .unwrap();
        share
            .create(owner, &CreateRequest::new("b.txt").with_lease(k2, LeaseState::RWH))
            .await
            .unwrap();
        share
            .create(other, &CreateRequest::new("a.txt").with_lease(LeaseKey::generate(), LeaseState::R))
            .await
            .unwrap();
        share
            .create(other, &CreateRequest::new("b.txt").with_lease(LeaseKey::generate(), LeaseState::R))
            .await
            .unwrap();
        assert_eq!(share.metrics().notifications_dropped, 1);
    }

    #[tokio::test]
    async fn test_unknown_close_logged_in_continue_mode() {
        let share = Share::new(ShareConfig::default());
        let (conn, _rx) = share.open_connection(ClientGuid::generate()).await;
        let err = share.close(conn, FileId::new(42, 42)).await.unwrap_err();
        assert!(err.is_bookkeeping());
        assert_eq!(share.metrics().invariant_violations, 1);
    }

    #[tokio::test]
    #[should_panic(expected = "Invariant violation")]
    async fn test_unknown_close_panics_in_panic_mode() {
        let share = Share::new(ShareConfig {
            invariant_mode: InvariantMode::Panic,
            ..ShareConfig::default()
        });
        let (conn, _rx) = share.open_connection(ClientGuid::generate()).await;
        let _ = share.close(conn, FileId::new(42, 42)).await;
    }

    #[tokio::test]
    async fn test_deliver_break_event_directly() {
        let share = Share::new(ShareConfig::default());
        let owner = ClientGuid::generate();
        let (conn, _rx) = share.open_connection(owner).await;
        let key = LeaseKey::generate();
        share
            .create(
                conn,
                &CreateRequest::new("a.txt")
                    .with_lease(key, LeaseState::RW)
                    .with_durable(DurableRequest::V1),
            )
            .await
            .unwrap();
        share.disconnect(conn).await.unwrap();

        let report = share
            .deliver_break(LeaseBreakEvent {
                key,
                trigger: BreakTrigger::SharedFile,
                requester: ClientGuid::generate(),
            })
            .await
            .unwrap();
        assert!(matches!(report.outcome, BreakOutcome::Invalidated { .. }));
        assert!(share.is_lease_invalidated(key).await);
        assert_eq!(share.metrics().lease_invalidations, 1);
    }
}
