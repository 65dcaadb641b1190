use std::collections::HashMap;
use std::sync::{
    atomic::{AtomicU64, Ordering as AtomicOrdering},
    Arc,
};

use anyhow::{anyhow, Result};
use tokio::sync::Mutex;
use tokio::time::{Duration, Instant};
use tracing::Instrument;

use crate::backend::{status_of, BackendCapabilities, ConnectionState, SMBBackend};
use crate::engine::InvariantMode;
use crate::protocol::{
    ClientGuid, CreateGuid, CreateRequest, CreateResponse, DurableRequest, FileId, LeaseKey,
    LeaseState, NtStatus,
};
use crate::script::{DurableKind, Expect, Script, Step};

/// Summary returned after a script run completes.
#[derive(Debug, Clone)]
pub struct RunSummary {
    pub script: String,
    /// Total steps executed.
    pub executed: u64,
    /// Steps whose operation completed successfully.
    pub succeeded: u64,
    /// Steps whose operation returned an error (expected or not).
    pub failed: u64,
    /// Steps whose outcome did not match their expectation.
    pub mismatches: u64,
    pub wall_clock: Duration,
    pub records: Vec<StepRecord>,
}

impl RunSummary {
    pub fn passed(&self) -> bool {
        self.mismatches == 0
    }
}

#[derive(Debug, Clone)]
pub struct StepRecord {
    pub step_id: String,
    pub client_id: String,
    pub kind: &'static str,
    pub outcome: StepOutcome,
    pub matched: bool,
    pub latency: Duration,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StepOutcome {
    Completed {
        lease_state: Option<LeaseState>,
        reconnected: bool,
    },
    Failed {
        status: Option<NtStatus>,
        message: String,
    },
}

impl StepOutcome {
    /// Completion status; `None` for failures that did not come from the
    /// share (for example a step against a client with no connection).
    pub fn status(&self) -> Option<NtStatus> {
        match self {
            StepOutcome::Completed { .. } => Some(NtStatus::SUCCESS),
            StepOutcome::Failed { status, .. } => *status,
        }
    }

    fn from_result(result: &Result<Option<CreateResponse>>) -> Self {
        match result {
            Ok(Some(response)) => StepOutcome::Completed {
                lease_state: response.lease_state,
                reconnected: response.reconnected,
            },
            Ok(None) => StepOutcome::Completed {
                lease_state: None,
                reconnected: false,
            },
            Err(err) => StepOutcome::Failed {
                status: status_of(err),
                message: err.to_string(),
            },
        }
    }

    fn matches(&self, expect: Option<&Expect>) -> bool {
        let expect = expect.cloned().unwrap_or_default();
        if expect.expected_status() != self.status() {
            return false;
        }
        match expect.lease_state {
            None => true,
            Some(wanted) => matches!(
                self,
                StepOutcome::Completed { lease_state, .. }
                    if lease_state.unwrap_or(LeaseState::NONE) == wanted
            ),
        }
    }
}

#[derive(Debug, Clone)]
pub struct RunnerConfig {
    /// Panic on the first expectation mismatch, or log it and keep going.
    pub invariant_mode: InvariantMode,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            invariant_mode: InvariantMode::LogAndContinue,
        }
    }
}

#[derive(Debug, Default)]
struct RunnerMetrics {
    executed: AtomicU64,
    succeeded: AtomicU64,
    failed: AtomicU64,
    mismatches: AtomicU64,
}

/// Where a handle reference came from, so a later step can resume it.
struct OpenRecord {
    file_id: FileId,
    request: CreateRequest,
}

/// Replays a [`Script`] one step at a time against a backend.
pub struct Runner {
    script: Script,
    config: RunnerConfig,
    metrics: RunnerMetrics,
    clients: HashMap<String, ClientGuid>,
    connections: HashMap<String, Arc<Mutex<ConnectionState>>>,
    lease_keys: HashMap<String, LeaseKey>,
    opens: HashMap<String, OpenRecord>,
}

impl Runner {
    pub fn new(script: Script, config: RunnerConfig) -> Result<Self> {
        script
            .validate()
            .map_err(|err| anyhow!("Invalid script {}: {}", script.metadata.name, err))?;
        let clients = script
            .clients
            .iter()
            .map(|client| (client.client_id.clone(), ClientGuid::generate()))
            .collect();
        Ok(Self {
            script,
            config,
            metrics: RunnerMetrics::default(),
            clients,
            connections: HashMap::new(),
            lease_keys: HashMap::new(),
            opens: HashMap::new(),
        })
    }

    pub async fn run(mut self, backend: Arc<dyn SMBBackend>) -> Result<RunSummary> {
        ensure_backend_supports(&self.script, &backend.capabilities())?;
        let run_start = Instant::now();
        let steps = std::mem::take(&mut self.script.steps);
        let mut records = Vec::with_capacity(steps.len());

        for step in &steps {
            let span = tracing::info_span!(
                "execute_step",
                step_id = step.step_id(),
                client_id = step.client_id()
            );

            let start = Instant::now();
            let result = self
                .execute(step, backend.as_ref())
                .instrument(span)
                .await;
            let latency = start.elapsed();
            let outcome = StepOutcome::from_result(&result);
            let matched = outcome.matches(step.expect());

            self.metrics
                .executed
                .fetch_add(1, AtomicOrdering::Relaxed);
            match &outcome {
                StepOutcome::Completed { .. } => {
                    self.metrics
                        .succeeded
                        .fetch_add(1, AtomicOrdering::Relaxed);
                }
                StepOutcome::Failed { .. } => {
                    self.metrics.failed.fetch_add(1, AtomicOrdering::Relaxed);
                }
            }
            tracing::info!(
                step_id = step.step_id(),
                client_id = step.client_id(),
                kind = step.kind(),
                outcome = ?outcome,
                matched = matched,
                latency_us = latency.as_micros() as u64,
                "Step completed"
            );

            let record = StepRecord {
                step_id: step.step_id().to_string(),
                client_id: step.client_id().to_string(),
                kind: step.kind(),
                outcome,
                matched,
                latency,
            };
            if !matched {
                self.handle_expectation_mismatch(&record, step.expect());
            }
            records.push(record);
        }

        self.cleanup_connections().await;

        Ok(RunSummary {
            script: self.script.metadata.name.clone(),
            executed: self.metrics.executed.load(AtomicOrdering::Relaxed),
            succeeded: self.metrics.succeeded.load(AtomicOrdering::Relaxed),
            failed: self.metrics.failed.load(AtomicOrdering::Relaxed),
            mismatches: self.metrics.mismatches.load(AtomicOrdering::Relaxed),
            wall_clock: run_start.elapsed(),
            records,
        })
    }

    async fn execute(&mut self, step: &Step, backend: &dyn SMBBackend) -> Result<Option<CreateResponse>> {
        match step {
            Step::Connect { client_id, .. } => {
                if self.connections.contains_key(client_id) {
                    return Err(anyhow!("Client {} is already connected", client_id));
                }
                let client = self.client_guid(client_id)?;
                let mut conn = backend.connect(client).await?;
                let rx = conn.take_lease_break_receiver();
                let conn_arc = Arc::new(Mutex::new(conn));
                if let Some(mut rx) = rx {
                    let handler_conn = conn_arc.clone();
                    tokio::spawn(async move {
                        while let Some(notification) = rx.recv().await {
                            let mut conn = handler_conn.lock().await;
                            conn.handle_lease_break(notification);
                        }
                    });
                }
                self.connections.insert(client_id.clone(), conn_arc);
                Ok(None)
            }
            Step::Create {
                client_id,
                handle_ref,
                path,
                disposition,
                lease,
                durable,
                timeout_ms,
                ..
            } => {
                let conn = self.connection(client_id)?;
                let mut request = CreateRequest::new(path.clone()).with_disposition(*disposition);
                if let Some(lease) = lease {
                    request = request.with_lease(self.lease_key(&lease.key), lease.state);
                }
                request = request.with_durable(match durable {
                    DurableKind::None => DurableRequest::None,
                    DurableKind::V1 => DurableRequest::V1,
                    DurableKind::V2 => DurableRequest::V2 {
                        create_guid: CreateGuid::generate(),
                        timeout: Duration::from_millis(timeout_ms.unwrap_or(0)),
                    },
                });
                let response = conn.lock().await.create(handle_ref, &request).await?;
                self.opens.insert(
                    handle_ref.clone(),
                    OpenRecord {
                        file_id: response.file_id,
                        request,
                    },
                );
                Ok(Some(response))
            }
            Step::Reconnect {
                client_id,
                handle_ref,
                ..
            } => {
                let conn = self.connection(client_id)?;
                let record = self
                    .opens
                    .get(handle_ref)
                    .ok_or_else(|| anyhow!("handle_ref {} was never opened", handle_ref))?;
                let request = record
                    .request
                    .to_reconnect(record.file_id)
                    .ok_or_else(|| anyhow!("handle_ref {} is not durable", handle_ref))?;
                let response = conn.lock().await.create(handle_ref, &request).await?;
                Ok(Some(response))
            }
            Step::Close {
                client_id,
                handle_ref,
                ..
            } => {
                let conn = self.connection(client_id)?;
                conn.lock().await.close(handle_ref).await?;
                Ok(None)
            }
            Step::Disconnect { client_id, .. } => {
                let conn = self
                    .connections
                    .remove(client_id)
                    .ok_or_else(|| anyhow!("Client {} is not connected", client_id))?;
                conn.lock().await.disconnect().await?;
                Ok(None)
            }
        }
    }

    fn client_guid(&self, client_id: &str) -> Result<ClientGuid> {
        self.clients
            .get(client_id)
            .copied()
            .ok_or_else(|| anyhow!("Unknown client_id: {}", client_id))
    }

    fn connection(&self, client_id: &str) -> Result<Arc<Mutex<ConnectionState>>> {
        self.connections
            .get(client_id)
            .cloned()
            .ok_or_else(|| anyhow!("Client {} is not connected", client_id))
    }

    fn lease_key(&mut self, name: &str) -> LeaseKey {
        *self
            .lease_keys
            .entry(name.to_string())
            .or_insert_with(LeaseKey::generate)
    }

    fn handle_expectation_mismatch(&self, record: &StepRecord, expect: Option<&Expect>) {
        self.metrics
            .mismatches
            .fetch_add(1, AtomicOrdering::Relaxed);
        let message = format!(
            "Expectation mismatch in step {}: expected {:?}, got {:?}",
            record.step_id,
            expect.cloned().unwrap_or_default(),
            record.outcome
        );
        tracing::error!(error = message.as_str(), "Invariant violation");
        match self.config.invariant_mode {
            InvariantMode::Panic => panic!("{message}"),
            InvariantMode::LogAndContinue => {}
        }
    }

    /// Close every handle still open once the script is done.
    async fn cleanup_connections(&mut self) {
        for (client_id, conn) in self.connections.drain() {
            let mut conn = conn.lock().await;
            conn.close_all_handles().await;
            if let Err(err) = conn.disconnect().await {
                tracing::warn!(client_id = client_id.as_str(), error = %err, "Failed to disconnect during cleanup");
            }
            tracing::debug!(client_id = client_id.as_str(), "Connection cleaned up");
        }
    }
}

/// Refuses scripts that need a durable version the backend cannot grant.
pub fn ensure_backend_supports(script: &Script, caps: &BackendCapabilities) -> Result<()> {
    for step in &script.steps {
        let Step::Create { durable, lease, .. } = step else {
            continue;
        };
        let supported = match durable {
            DurableKind::None => true,
            DurableKind::V1 => caps.supports_durable_v1,
            DurableKind::V2 => caps.supports_durable_v2,
        };
        if !supported {
            return Err(anyhow!(
                "Backend {} cannot grant {:?} durable handles (step {})",
                caps.name,
                durable,
                step.step_id()
            ));
        }
        if lease.is_some() && !caps.supports_leasing {
            return Err(anyhow!(
                "Backend {} does not support leasing (step {})",
                caps.name,
                step.step_id()
            ));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::LocalBackend;
    use crate::engine::{Share, ShareConfig};
    use crate::script::builtin;

    fn backend() -> Arc<dyn SMBBackend> {
        Arc::new(LocalBackend::new(Arc::new(Share::new(ShareConfig::default()))))
    }

    #[tokio::test]
    async fn test_builtin_reconnect_passes() {
        let script = builtin::by_name("durable-reconnect", DurableKind::V1).unwrap();
        let summary = Runner::new(script, RunnerConfig::default())
            .unwrap()
            .run(backend())
            .await
            .unwrap();
        assert!(summary.passed(), "{:?}", summary.records);
        assert_eq!(summary.executed, 6);
        assert_eq!(summary.failed, 0);
        assert!(matches!(
            summary.records[4].outcome,
            StepOutcome::Completed {
                reconnected: true,
                ..
            }
        ));
    }

    #[tokio::test]
    async fn test_cleanup_disconnects_remaining_clients() {
        let share = Arc::new(Share::new(ShareConfig::default()));
        let backend: Arc<dyn SMBBackend> = Arc::new(LocalBackend::new(share.clone()));
        let script = builtin::by_name("durable", DurableKind::V1).unwrap();
        let summary = Runner::new(script, RunnerConfig::default())
            .unwrap()
            .run(backend)
            .await
            .unwrap();
        assert!(summary.passed(), "{:?}", summary.records);
        assert_eq!(share.connection_count().await, 0);
    }

    #[tokio::test]
    async fn test_mismatch_logged_and_continues() {
        let mut script = builtin::by_name("durable", DurableKind::V1).unwrap();
        if let Step::Create { expect, .. } = &mut script.steps[1] {
            *expect = Some(Expect::lease(LeaseState::R));
        }
        let summary = Runner::new(script, RunnerConfig::default())
            .unwrap()
            .run(backend())
            .await
            .unwrap();
        assert_eq!(summary.mismatches, 1);
        assert!(!summary.passed());
        assert_eq!(summary.executed, 3);
    }

    #[tokio::test]
    #[should_panic(expected = "Expectation mismatch")]
    async fn test_mismatch_panics_in_panic_mode() {
        let mut script = builtin::by_name("durable", DurableKind::V1).unwrap();
        if let Step::Create { expect, .. } = &mut script.steps[1] {
            *expect = Some(Expect::status("STATUS_ACCESS_DENIED"));
        }
        let config = RunnerConfig {
            invariant_mode: InvariantMode::Panic,
        };
        let _ = Runner::new(script, config).unwrap().run(backend()).await;
    }

    #[test]
    fn test_expectation_matching() {
        let granted = StepOutcome::Completed {
            lease_state: Some(LeaseState::RWH),
            reconnected: false,
        };
        assert!(granted.matches(None));
        assert!(granted.matches(Some(&Expect::lease(LeaseState::RWH))));
        assert!(!granted.matches(Some(&Expect::lease(LeaseState::RH))));
        assert!(!granted.matches(Some(&Expect::status("OBJECT_NAME_NOT_FOUND"))));

        let denied = StepOutcome::Failed {
            status: Some(NtStatus::OBJECT_NAME_NOT_FOUND),
            message: "denied".to_string(),
        };
        assert!(denied.matches(Some(&Expect::status("STATUS_OBJECT_NAME_NOT_FOUND"))));
        assert!(!denied.matches(None));

        let local = StepOutcome::Failed {
            status: None,
            message: "not connected".to_string(),
        };
        assert!(!local.matches(Some(&Expect::status("STATUS_OBJECT_NAME_NOT_FOUND"))));
    }

    #[test]
    fn test_backend_without_v2_rejected() {
        let script = builtin::by_name("durable", DurableKind::V2).unwrap();
        let caps = BackendCapabilities {
            name: "v1-only".to_string(),
            supports_leasing: true,
            supports_durable_v1: true,
            supports_durable_v2: false,
        };
        assert!(ensure_backend_supports(&script, &caps).is_err());
        let script = builtin::by_name("durable", DurableKind::V1).unwrap();
        assert!(ensure_backend_supports(&script, &caps).is_ok());
    }
}
