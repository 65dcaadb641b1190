//! Common test utilities for smbdurable integration tests
#![allow(dead_code)]

use std::sync::Arc;

use smbdurable::backend::{ConnectionState, LocalBackend, SMBBackend};
use smbdurable::engine::{Share, ShareConfig};
use smbdurable::protocol::{
    ClientGuid, CreateRequest, DurableRequest, LeaseKey, LeaseState,
};

pub const PATH: &str = "durable.txt";

/// A share with default configuration and a backend bound to it.
pub fn local_share() -> (Arc<Share>, Arc<LocalBackend>) {
    local_share_with(ShareConfig::default())
}

pub fn local_share_with(config: ShareConfig) -> (Arc<Share>, Arc<LocalBackend>) {
    let share = Arc::new(Share::new(config));
    let backend = Arc::new(LocalBackend::new(share.clone()));
    (share, backend)
}

pub async fn connect(backend: &LocalBackend, client: ClientGuid) -> ConnectionState {
    backend
        .connect(client)
        .await
        .expect("local connect never fails")
}

/// The create every durable scenario issues: full access, all share modes,
/// a lease context and the given durable context.
pub fn durable_create(key: LeaseKey, state: LeaseState, durable: DurableRequest) -> CreateRequest {
    CreateRequest::new(PATH)
        .with_lease(key, state)
        .with_durable(durable)
}

/// True while `key` names a lease instance that has not been invalidated.
pub async fn lease_is_live(share: &Share, key: LeaseKey) -> bool {
    share
        .lease(key)
        .await
        .map(|lease| !lease.invalidated)
        .unwrap_or(false)
}

pub fn both_versions() -> [DurableRequest; 2] {
    [DurableRequest::V1, DurableRequest::v2()]
}
