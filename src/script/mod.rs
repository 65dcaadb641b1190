use std::collections::{HashMap, HashSet};

use serde::{Deserialize, Serialize};

use crate::protocol::{CreateDisposition, LeaseState, NtStatus};

pub mod builtin;

/// A multi-client durable-handle scenario, replayed step by step.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct Script {
    pub version: u32,
    pub metadata: Metadata,
    pub clients: Vec<ClientSpec>,
    pub steps: Vec<Step>,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct Metadata {
    pub name: String,
    #[serde(default)]
    pub description: String,
}

/// A logical client. Each one gets its own client GUID at run time, so two
/// entries here model two distinct SMB clients.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct ClientSpec {
    pub client_id: String,
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum DurableKind {
    #[default]
    None,
    V1,
    V2,
}

/// Lease context of a create step. `key` is a symbolic name; every step
/// naming the same key shares one lease key at run time.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct LeaseSpec {
    pub key: String,
    pub state: LeaseState,
}

/// What a step must complete with. An absent expectation means success.
#[derive(Debug, Serialize, Deserialize, Clone, Default, PartialEq, Eq)]
pub struct Expect {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lease_state: Option<LeaseState>,
}

impl Expect {
    pub fn status(name: &str) -> Self {
        Self {
            status: Some(name.to_string()),
            lease_state: None,
        }
    }

    pub fn lease(state: LeaseState) -> Self {
        Self {
            status: None,
            lease_state: Some(state),
        }
    }

    /// Expected completion status; success when unset.
    pub fn expected_status(&self) -> Option<NtStatus> {
        match &self.status {
            Some(name) => NtStatus::from_name(name),
            None => Some(NtStatus::SUCCESS),
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(tag = "type")]
pub enum Step {
    Connect {
        step_id: String,
        client_id: String,
    },
    Create {
        step_id: String,
        client_id: String,
        handle_ref: String,
        path: String,
        #[serde(default)]
        disposition: CreateDisposition,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        lease: Option<LeaseSpec>,
        #[serde(default)]
        durable: DurableKind,
        /// V2 timeout; zero or absent asks for the share default.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        timeout_ms: Option<u64>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        expect: Option<Expect>,
    },
    /// Resume `handle_ref` on the client's current connection.
    Reconnect {
        step_id: String,
        client_id: String,
        handle_ref: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        expect: Option<Expect>,
    },
    Close {
        step_id: String,
        client_id: String,
        handle_ref: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        expect: Option<Expect>,
    },
    /// Transport loss for the client's current connection.
    Disconnect {
        step_id: String,
        client_id: String,
    },
}

impl Step {
    pub fn step_id(&self) -> &str {
        match self {
            Step::Connect { step_id, .. }
            | Step::Create { step_id, .. }
            | Step::Reconnect { step_id, .. }
            | Step::Close { step_id, .. }
            | Step::Disconnect { step_id, .. } => step_id,
        }
    }

    pub fn client_id(&self) -> &str {
        match self {
            Step::Connect { client_id, .. }
            | Step::Create { client_id, .. }
            | Step::Reconnect { client_id, .. }
            | Step::Close { client_id, .. }
            | Step::Disconnect { client_id, .. } => client_id,
        }
    }

    pub fn handle_ref(&self) -> Option<&str> {
        match self {
            Step::Create { handle_ref, .. }
            | Step::Reconnect { handle_ref, .. }
            | Step::Close { handle_ref, .. } => Some(handle_ref),
            Step::Connect { .. } | Step::Disconnect { .. } => None,
        }
    }

    pub fn expect(&self) -> Option<&Expect> {
        match self {
            Step::Create { expect, .. }
            | Step::Reconnect { expect, .. }
            | Step::Close { expect, .. } => expect.as_ref(),
            Step::Connect { .. } | Step::Disconnect { .. } => None,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Step::Connect { .. } => "connect",
            Step::Create { .. } => "create",
            Step::Reconnect { .. } => "reconnect",
            Step::Close { .. } => "close",
            Step::Disconnect { .. } => "disconnect",
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct ScriptSummary {
    pub client_count: usize,
    pub step_count: usize,
    pub connect_steps: usize,
    pub create_steps: usize,
    pub durable_creates: usize,
    pub reconnect_steps: usize,
    pub close_steps: usize,
    pub disconnect_steps: usize,
    pub expectations: usize,
}

impl Script {
    pub fn validate(&self) -> Result<(), String> {
        if self.version != 1 {
            return Err(format!("Unsupported script version: {}", self.version));
        }
        if self.metadata.name.trim().is_empty() {
            return Err("metadata.name must be non-empty".to_string());
        }
        let mut clients = HashSet::new();
        for client in &self.clients {
            if client.client_id.trim().is_empty() {
                return Err("client_id must be non-empty".to_string());
            }
            if !clients.insert(client.client_id.as_str()) {
                return Err(format!("Duplicate client_id: {}", client.client_id));
            }
        }

        let mut step_ids = HashSet::new();
        // handle_ref -> whether it was opened durable
        let mut created: HashMap<&str, bool> = HashMap::new();
        for step in &self.steps {
            if step.step_id().trim().is_empty() {
                return Err("step_id must be non-empty".to_string());
            }
            if !step_ids.insert(step.step_id()) {
                return Err(format!("Duplicate step_id: {}", step.step_id()));
            }
            if !clients.contains(step.client_id()) {
                return Err(format!(
                    "Unknown client_id in step {}: {}",
                    step.step_id(),
                    step.client_id()
                ));
            }
            if let Some(expect) = step.expect() {
                if expect.expected_status().is_none() {
                    return Err(format!(
                        "Unknown status in step {}: {:?}",
                        step.step_id(),
                        expect.status
                    ));
                }
            }
            match step {
                Step::Create {
                    handle_ref,
                    path,
                    lease,
                    durable,
                    ..
                } => {
                    if path.trim().is_empty() {
                        return Err(format!("Empty path in step {}", step.step_id()));
                    }
                    if let Some(lease) = lease {
                        if lease.key.trim().is_empty() {
                            return Err(format!("Empty lease key in step {}", step.step_id()));
                        }
                    }
                    if created
                        .insert(handle_ref.as_str(), *durable != DurableKind::None)
                        .is_some()
                    {
                        return Err(format!("handle_ref created twice: {}", handle_ref));
                    }
                }
                Step::Reconnect { handle_ref, .. } => match created.get(handle_ref.as_str()) {
                    Some(true) => {}
                    Some(false) => {
                        return Err(format!(
                            "Step {} reconnects non-durable handle {}",
                            step.step_id(),
                            handle_ref
                        ))
                    }
                    None => {
                        return Err(format!(
                            "Step {} references unknown handle_ref {}",
                            step.step_id(),
                            handle_ref
                        ))
                    }
                },
                Step::Close { handle_ref, .. } => {
                    if !created.contains_key(handle_ref.as_str()) {
                        return Err(format!(
                            "Step {} references unknown handle_ref {}",
                            step.step_id(),
                            handle_ref
                        ));
                    }
                }
                Step::Connect { .. } | Step::Disconnect { .. } => {}
            }
        }
        Ok(())
    }

    pub fn summary(&self) -> ScriptSummary {
        let mut summary = ScriptSummary {
            client_count: self.clients.len(),
            step_count: self.steps.len(),
            ..ScriptSummary::default()
        };
        for step in &self.steps {
            if step.expect().is_some() {
                summary.expectations += 1;
            }
            match step {
                Step::Connect { .. } => summary.connect_steps += 1,
                Step::Create { durable, .. } => {
                    summary.create_steps += 1;
                    if *durable != DurableKind::None {
                        summary.durable_creates += 1;
                    }
                }
                Step::Reconnect { .. } => summary.reconnect_steps += 1,
                Step::Close { .. } => summary.close_steps += 1,
                Step::Disconnect { .. } => summary.disconnect_steps += 1,
            }
        }
        summary
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn script(steps: Vec<Step>) -> Script {
        Script {
            version: 1,
            metadata: Metadata {
                name: "test".to_string(),
                description: String::new(),
            },
            clients: vec![ClientSpec {
                client_id: "c1".to_string(),
            }],
            steps,
        }
    }

    fn connect(step_id: &str) -> Step {
        Step::Connect {
            step_id: step_id.to_string(),
            client_id: "c1".to_string(),
        }
    }

    fn create(step_id: &str, handle_ref: &str, durable: DurableKind) -> Step {
        Step::Create {
            step_id: step_id.to_string(),
            client_id: "c1".to_string(),
            handle_ref: handle_ref.to_string(),
            path: "durable.txt".to_string(),
            disposition: CreateDisposition::Supersede,
            lease: Some(LeaseSpec {
                key: "k1".to_string(),
                state: LeaseState::RWH,
            }),
            durable,
            timeout_ms: None,
            expect: Some(Expect::lease(LeaseState::RWH)),
        }
    }

    fn reconnect(step_id: &str, handle_ref: &str) -> Step {
        Step::Reconnect {
            step_id: step_id.to_string(),
            client_id: "c1".to_string(),
            handle_ref: handle_ref.to_string(),
            expect: None,
        }
    }

    #[test]
    fn test_validate_accepts_reconnect_of_durable_handle() {
        let s = script(vec![
            connect("s1"),
            create("s2", "h1", DurableKind::V1),
            Step::Disconnect {
                step_id: "s3".to_string(),
                client_id: "c1".to_string(),
            },
            connect("s4"),
            reconnect("s5", "h1"),
        ]);
        assert!(s.validate().is_ok());
        let summary = s.summary();
        assert_eq!(summary.step_count, 5);
        assert_eq!(summary.durable_creates, 1);
        assert_eq!(summary.reconnect_steps, 1);
        assert_eq!(summary.expectations, 1);
    }

    #[test]
    fn test_validate_rejects_unknown_references() {
        let s = script(vec![connect("s1"), reconnect("s2", "h1")]);
        assert!(s.validate().unwrap_err().contains("unknown handle_ref"));

        let s = script(vec![
            connect("s1"),
            create("s2", "h1", DurableKind::None),
            reconnect("s3", "h1"),
        ]);
        assert!(s.validate().unwrap_err().contains("non-durable"));

        let mut s = script(vec![connect("s1")]);
        s.steps.push(Step::Connect {
            step_id: "s2".to_string(),
            client_id: "nobody".to_string(),
        });
        assert!(s.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_duplicates_and_bad_status() {
        let s = script(vec![connect("s1"), connect("s1")]);
        assert!(s.validate().unwrap_err().contains("Duplicate step_id"));

        let mut bad = create("s2", "h1", DurableKind::V1);
        if let Step::Create { expect, .. } = &mut bad {
            *expect = Some(Expect::status("STATUS_NOT_A_REAL_CODE"));
        }
        let s = script(vec![connect("s1"), bad]);
        assert!(s.validate().unwrap_err().contains("Unknown status"));
    }

    #[test]
    fn test_json_shape() {
        let json = r#"{
            "version": 1,
            "metadata": { "name": "inline" },
            "clients": [ { "client_id": "c1" } ],
            "steps": [
                { "type": "Connect", "step_id": "s1", "client_id": "c1" },
                { "type": "Create", "step_id": "s2", "client_id": "c1", "handle_ref": "h1",
                  "path": "durable.txt", "lease": { "key": "k1", "state": "RWH" },
                  "durable": "v2", "expect": { "lease_state": "RWH" } },
                { "type": "Disconnect", "step_id": "s3", "client_id": "c1" }
            ]
        }"#;
        let s: Script = serde_json::from_str(json).unwrap();
        assert!(s.validate().is_ok());
        match &s.steps[1] {
            Step::Create {
                durable,
                lease,
                disposition,
                ..
            } => {
                assert_eq!(*durable, DurableKind::V2);
                assert_eq!(lease.as_ref().unwrap().state, LeaseState::RWH);
                assert_eq!(*disposition, CreateDisposition::Supersede);
            }
            other => panic!("unexpected step {other:?}"),
        }
    }
}
