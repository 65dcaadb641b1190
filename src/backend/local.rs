//! In-process backend: every connection talks straight to a shared
//! [`Share`] engine instance.

use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;

use super::{BackendCapabilities, ConnectionState, SMBBackend, SMBConnectionInner};
use crate::engine::{ConnectionId, Share};
use crate::protocol::{ClientGuid, CreateRequest, CreateResponse, FileId};

pub struct LocalBackend {
    share: Arc<Share>,
}

impl LocalBackend {
    pub fn new(share: Arc<Share>) -> Self {
        Self { share }
    }

    pub fn share(&self) -> &Arc<Share> {
        &self.share
    }
}

#[async_trait]
impl SMBBackend for LocalBackend {
    fn capabilities(&self) -> BackendCapabilities {
        BackendCapabilities {
            name: format!("local ({})", self.share.config().share_name),
            supports_leasing: true,
            supports_durable_v1: true,
            supports_durable_v2: true,
        }
    }

    async fn connect(&self, client: ClientGuid) -> Result<ConnectionState> {
        let (connection, rx) = self.share.open_connection(client).await;
        Ok(ConnectionState::new(Box::new(LocalConnection {
            share: self.share.clone(),
            connection,
            client,
        }))
        .with_lease_channel(rx))
    }
}

struct LocalConnection {
    share: Arc<Share>,
    connection: ConnectionId,
    client: ClientGuid,
}

#[async_trait]
impl SMBConnectionInner for LocalConnection {
    fn client_guid(&self) -> ClientGuid {
        self.client
    }

    async fn create(&self, request: &CreateRequest) -> Result<CreateResponse> {
        Ok(self.share.create(self.connection, request).await?)
    }

    async fn close(&self, file_id: FileId) -> Result<()> {
        Ok(self.share.close(self.connection, file_id).await?)
    }

    async fn disconnect(&self) -> Result<()> {
        self.share.disconnect(self.connection).await?;
        Ok(())
    }
}
