//! Built-in durable-handle scenarios.
//!
//! Each one exists for both durable V1 and V2 contexts. All of them open
//! `durable.txt` with full access and every share mode.

use super::{ClientSpec, DurableKind, Expect, LeaseSpec, Metadata, Script, Step};
use crate::protocol::{CreateDisposition, LeaseState};

pub const NAMES: &[&str] = &[
    "durable",
    "durable-reconnect",
    "durable-reconnect-fails-client-guid",
    "durable-invalidate",
];

const PATH: &str = "durable.txt";

/// Builds the named scenario for the given durable context version.
pub fn by_name(name: &str, durable: DurableKind) -> Option<Script> {
    if durable == DurableKind::None {
        return None;
    }
    let script = match name {
        "durable" => durable_open(durable),
        "durable-reconnect" => durable_reconnect(durable),
        "durable-reconnect-fails-client-guid" => reconnect_fails_client_guid(durable),
        "durable-invalidate" => durable_invalidate(durable),
        _ => return None,
    };
    Some(script)
}

/// Every scenario, V1 first then V2.
pub fn all() -> Vec<Script> {
    [DurableKind::V1, DurableKind::V2]
        .into_iter()
        .flat_map(|durable| NAMES.iter().filter_map(move |name| by_name(name, durable)))
        .collect()
}

fn suffix(durable: DurableKind) -> &'static str {
    match durable {
        DurableKind::V2 => "v2",
        _ => "v1",
    }
}

struct Builder {
    script: Script,
}

impl Builder {
    fn new(name: &str, durable: DurableKind, description: &str, clients: &[&str]) -> Self {
        Self {
            script: Script {
                version: 1,
                metadata: Metadata {
                    name: format!("{name}-{}", suffix(durable)),
                    description: description.to_string(),
                },
                clients: clients
                    .iter()
                    .map(|client_id| ClientSpec {
                        client_id: client_id.to_string(),
                    })
                    .collect(),
                steps: Vec::new(),
            },
        }
    }

    fn next_id(&self) -> String {
        format!("s{}", self.script.steps.len() + 1)
    }

    fn connect(mut self, client_id: &str) -> Self {
        let step_id = self.next_id();
        self.script.steps.push(Step::Connect {
            step_id,
            client_id: client_id.to_string(),
        });
        self
    }

    fn disconnect(mut self, client_id: &str) -> Self {
        let step_id = self.next_id();
        self.script.steps.push(Step::Disconnect {
            step_id,
            client_id: client_id.to_string(),
        });
        self
    }

    #[allow(clippy::too_many_arguments)]
    fn create(
        mut self,
        client_id: &str,
        handle_ref: &str,
        lease_key: &str,
        state: LeaseState,
        disposition: CreateDisposition,
        durable: DurableKind,
        expect: Expect,
    ) -> Self {
        let step_id = self.next_id();
        self.script.steps.push(Step::Create {
            step_id,
            client_id: client_id.to_string(),
            handle_ref: handle_ref.to_string(),
            path: PATH.to_string(),
            disposition,
            lease: Some(LeaseSpec {
                key: lease_key.to_string(),
                state,
            }),
            durable,
            timeout_ms: None,
            expect: Some(expect),
        });
        self
    }

    fn reconnect(mut self, client_id: &str, handle_ref: &str, expect: Expect) -> Self {
        let step_id = self.next_id();
        self.script.steps.push(Step::Reconnect {
            step_id,
            client_id: client_id.to_string(),
            handle_ref: handle_ref.to_string(),
            expect: Some(expect),
        });
        self
    }

    fn close(mut self, client_id: &str, handle_ref: &str) -> Self {
        let step_id = self.next_id();
        self.script.steps.push(Step::Close {
            step_id,
            client_id: client_id.to_string(),
            handle_ref: handle_ref.to_string(),
            expect: None,
        });
        self
    }

    fn build(self) -> Script {
        self.script
    }
}

fn durable_open(durable: DurableKind) -> Script {
    Builder::new(
        "durable",
        durable,
        "A durable open with an RWH lease is granted RWH",
        &["c1"],
    )
    .connect("c1")
    .create(
        "c1",
        "h1",
        "lease1",
        LeaseState::RWH,
        CreateDisposition::Supersede,
        durable,
        Expect::lease(LeaseState::RWH),
    )
    .close("c1", "h1")
    .build()
}

fn durable_reconnect(durable: DurableKind) -> Script {
    Builder::new(
        "durable-reconnect",
        durable,
        "The owning client resumes its durable handle after a transport loss",
        &["c1"],
    )
    .connect("c1")
    .create(
        "c1",
        "h1",
        "lease1",
        LeaseState::RWH,
        CreateDisposition::Supersede,
        durable,
        Expect::lease(LeaseState::RWH),
    )
    .disconnect("c1")
    .connect("c1")
    .reconnect("c1", "h1", Expect::lease(LeaseState::RWH))
    .close("c1", "h1")
    .build()
}

fn reconnect_fails_client_guid(durable: DurableKind) -> Script {
    Builder::new(
        "durable-reconnect-fails-client-guid",
        durable,
        "A reconnect from another client GUID is refused and leaves the handle resumable",
        &["c1", "c2"],
    )
    .connect("c1")
    .create(
        "c1",
        "h1",
        "lease1",
        LeaseState::RWH,
        CreateDisposition::Supersede,
        durable,
        Expect::lease(LeaseState::RWH),
    )
    .disconnect("c1")
    .connect("c2")
    .reconnect("c2", "h1", Expect::status("STATUS_OBJECT_NAME_NOT_FOUND"))
    .disconnect("c2")
    .connect("c1")
    .reconnect("c1", "h1", Expect::lease(LeaseState::RWH))
    .close("c1", "h1")
    .build()
}

fn durable_invalidate(durable: DurableKind) -> Script {
    Builder::new(
        "durable-invalidate",
        durable,
        "Breaking the lease of a disconnected handle without HANDLE caching invalidates it",
        &["c1", "c2"],
    )
    .connect("c1")
    .create(
        "c1",
        "h1",
        "lease1",
        LeaseState::RW,
        CreateDisposition::Supersede,
        durable,
        Expect::lease(LeaseState::RW),
    )
    .disconnect("c1")
    .connect("c2")
    .create(
        "c2",
        "h2",
        "lease2",
        LeaseState::RW,
        CreateDisposition::Open,
        durable,
        Expect::lease(LeaseState::RW),
    )
    .close("c2", "h2")
    .disconnect("c2")
    .connect("c1")
    .reconnect("c1", "h1", Expect::status("STATUS_OBJECT_NAME_NOT_FOUND"))
    .build()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_all_builtins_validate() {
        let scripts = all();
        assert_eq!(scripts.len(), NAMES.len() * 2);
        for script in &scripts {
            script
                .validate()
                .unwrap_or_else(|err| panic!("{}: {}", script.metadata.name, err));
        }
        assert_eq!(scripts[0].metadata.name, "durable-v1");
        assert_eq!(scripts[NAMES.len()].metadata.name, "durable-v2");
    }

    #[test]
    fn test_unknown_name_or_plain_open() {
        assert!(by_name("no-such-scenario", DurableKind::V1).is_none());
        assert!(by_name("durable", DurableKind::None).is_none());
    }

    #[test]
    fn test_invalidate_uses_second_lease_key() {
        let script = by_name("durable-invalidate", DurableKind::V2).unwrap();
        let keys: Vec<&str> = script
            .steps
            .iter()
            .filter_map(|step| match step {
                Step::Create { lease, .. } => lease.as_ref().map(|lease| lease.key.as_str()),
                _ => None,
            })
            .collect();
        assert_eq!(keys, vec!["lease1", "lease2"]);
    }
}
