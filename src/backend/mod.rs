use std::collections::HashMap;

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::engine::EngineError;
use crate::protocol::{
    ClientGuid, CreateRequest, CreateResponse, FileId, LeaseBreakNotification, LeaseKey,
    LeaseState, NtStatus,
};

pub mod local;

pub use local::LocalBackend;

#[derive(Debug, Clone)]
pub struct BackendCapabilities {
    pub name: String,
    pub supports_leasing: bool,
    pub supports_durable_v1: bool,
    pub supports_durable_v2: bool,
}

impl Default for BackendCapabilities {
    fn default() -> Self {
        Self {
            name: "unknown".to_string(),
            supports_leasing: false,
            supports_durable_v1: false,
            supports_durable_v2: false,
        }
    }
}

#[async_trait]
pub trait SMBBackend: Send + Sync {
    fn capabilities(&self) -> BackendCapabilities;
    /// Opens a fresh transport on behalf of `client`.
    async fn connect(&self, client: ClientGuid) -> Result<ConnectionState>;
}

#[async_trait]
pub trait SMBConnectionInner: Send + Sync {
    fn client_guid(&self) -> ClientGuid;
    async fn create(&self, request: &CreateRequest) -> Result<CreateResponse>;
    async fn close(&self, file_id: FileId) -> Result<()>;
    /// Drops the transport without closing handles.
    async fn disconnect(&self) -> Result<()>;
}

/// Extracts the NTSTATUS a failed backend call maps to, when it came from
/// the engine.
pub fn status_of(err: &anyhow::Error) -> Option<NtStatus> {
    err.downcast_ref::<EngineError>().map(EngineError::status)
}

#[derive(Debug, Clone)]
struct HandleEntry {
    file_id: FileId,
    path: String,
    lease: Option<(LeaseKey, LeaseState)>,
}

/// Client-side view of one connection: which handle references are open,
/// and what lease state each of them currently caches.
pub struct ConnectionState {
    inner: Box<dyn SMBConnectionInner>,
    handles: HashMap<String, HandleEntry>,
    lease_break_rx: Option<mpsc::Receiver<LeaseBreakNotification>>,
    breaks_applied: u64,
}

impl ConnectionState {
    pub fn new(inner: Box<dyn SMBConnectionInner>) -> Self {
        Self {
            inner,
            handles: HashMap::new(),
            lease_break_rx: None,
            breaks_applied: 0,
        }
    }

    pub fn with_lease_channel(mut self, rx: mpsc::Receiver<LeaseBreakNotification>) -> Self {
        self.lease_break_rx = Some(rx);
        self
    }

    pub fn take_lease_break_receiver(&mut self) -> Option<mpsc::Receiver<LeaseBreakNotification>> {
        self.lease_break_rx.take()
    }

    pub fn client_guid(&self) -> ClientGuid {
        self.inner.client_guid()
    }

    /// Issues `request` and, on success, tracks the result under `handle_ref`.
    pub async fn create(&mut self, handle_ref: &str, request: &CreateRequest) -> Result<CreateResponse> {
        if self.handles.contains_key(handle_ref) {
            return Err(anyhow!("handle_ref already open on this connection: {}", handle_ref));
        }
        let response = self.inner.create(request).await?;
        let lease = match (request.lease_key(), response.lease_state) {
            (Some(key), Some(state)) => Some((key, state)),
            _ => None,
        };
        self.handles.insert(
            handle_ref.to_string(),
            HandleEntry {
                file_id: response.file_id,
                path: request.path.clone(),
                lease,
            },
        );
        Ok(response)
    }

    pub async fn close(&mut self, handle_ref: &str) -> Result<()> {
        let entry = self
            .handles
            .remove(handle_ref)
            .ok_or_else(|| anyhow!("Unknown handle_ref: {}", handle_ref))?;
        self.inner.close(entry.file_id).await
    }

    /// Simulates transport loss. Handle references are forgotten locally;
    /// durable ones can be resumed from a new connection.
    pub async fn disconnect(&mut self) -> Result<()> {
        self.handles.clear();
        self.lease_break_rx = None;
        self.inner.disconnect().await
    }

    /// Close all open handles (best-effort, errors are logged).
    pub async fn close_all_handles(&mut self) {
        let refs: Vec<String> = self.handles.keys().cloned().collect();
        for handle_ref in refs {
            if let Err(err) = self.close(&handle_ref).await {
                tracing::warn!(handle_ref = handle_ref, error = %err, "Failed to close handle during cleanup");
            }
        }
    }

    pub fn file_id(&self, handle_ref: &str) -> Option<FileId> {
        self.handles.get(handle_ref).map(|entry| entry.file_id)
    }

    pub fn lease_state(&self, handle_ref: &str) -> Option<LeaseState> {
        self.handles
            .get(handle_ref)
            .and_then(|entry| entry.lease.map(|(_, state)| state))
    }

    pub fn handle_count(&self) -> usize {
        self.handles.len()
    }

    pub fn breaks_applied(&self) -> u64 {
        self.breaks_applied
    }

    /// Applies a server lease break to every handle cached under its key.
    pub fn handle_lease_break(&mut self, notification: LeaseBreakNotification) {
        let mut matched = 0usize;
        for (handle_ref, entry) in self.handles.iter_mut() {
            let Some((key, state)) = entry.lease.as_mut() else {
                continue;
            };
            if *key != notification.lease_key {
                continue;
            }
            *state = notification.new_state;
            matched += 1;
            tracing::debug!(
                handle_ref = handle_ref.as_str(),
                path = entry.path.as_str(),
                lease_key = %notification.lease_key,
                new_state = %notification.new_state,
                "Lease break applied"
            );
        }
        if matched == 0 {
            tracing::warn!(
                lease_key = %notification.lease_key,
                epoch = notification.epoch,
                "Received lease break for unknown lease"
            );
        } else {
            self.breaks_applied += 1;
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::engine::{Share, ShareConfig};

    fn backend() -> LocalBackend {
        LocalBackend::new(Arc::new(Share::new(ShareConfig::default())))
    }

    #[tokio::test]
    async fn test_status_recovered_from_engine_error() {
        let backend = backend();
        let mut conn = backend.connect(ClientGuid::generate()).await.unwrap();
        let err = conn.close("missing").await.unwrap_err();
        assert_eq!(status_of(&err), None);

        conn.disconnect().await.unwrap();
        let err = conn
            .create("h1", &CreateRequest::new("a.txt"))
            .await
            .unwrap_err();
        assert_eq!(status_of(&err), Some(NtStatus::CONNECTION_DISCONNECTED));
    }

    #[tokio::test]
    async fn test_lease_break_updates_cached_state() {
        let backend = backend();
        let mut first = backend.connect(ClientGuid::generate()).await.unwrap();
        let mut second = backend.connect(ClientGuid::generate()).await.unwrap();
        let mut rx = first.take_lease_break_receiver().unwrap();

        first
            .create(
                "h1",
                &CreateRequest::new("a.txt").with_lease(LeaseKey::generate(), LeaseState::RWH),
            )
            .await
            .unwrap();
        assert_eq!(first.lease_state("h1"), Some(LeaseState::RWH));

        second
            .create(
                "h2",
                &CreateRequest::new("a.txt").with_lease(LeaseKey::generate(), LeaseState::RH),
            )
            .await
            .unwrap();

        let notification = rx.recv().await.unwrap();
        first.handle_lease_break(notification);
        assert_eq!(first.lease_state("h1"), Some(LeaseState::RH));
        assert_eq!(first.breaks_applied(), 1);
    }

    #[tokio::test]
    async fn test_unknown_lease_break_ignored() {
        let backend = backend();
        let mut conn = backend.connect(ClientGuid::generate()).await.unwrap();
        conn.handle_lease_break(LeaseBreakNotification {
            lease_key: LeaseKey::generate(),
            current_state: LeaseState::RWH,
            new_state: LeaseState::RH,
            epoch: 1,
        });
        assert_eq!(conn.breaks_applied(), 0);
    }

    #[tokio::test]
    async fn test_close_all_handles_empties_connection() {
        let backend = backend();
        let mut conn = backend.connect(ClientGuid::generate()).await.unwrap();
        let a = conn.create("a", &CreateRequest::new("a.txt")).await.unwrap();
        let b = conn.create("b", &CreateRequest::new("b.txt")).await.unwrap();
        assert_eq!(conn.file_id("a"), Some(a.file_id));
        assert_eq!(conn.handle_count(), 2);
        conn.close_all_handles().await;
        assert_eq!(conn.handle_count(), 0);
        assert!(backend.share().handle(a.file_id).await.is_none());
        assert!(backend.share().handle(b.file_id).await.is_none());
    }
}
