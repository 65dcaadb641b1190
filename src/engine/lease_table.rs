//! Lease table for one share, keyed by lease key.

use std::collections::HashMap;

use super::error::EngineError;
use crate::protocol::{LeaseKey, LeaseState};

/// A handle's reference to one specific lease instance.
///
/// The epoch changes whenever an invalidated key is granted afresh, so a
/// handle bound to the old instance keeps seeing it as invalid.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct LeaseBinding {
    pub key: LeaseKey,
    pub epoch: u64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Lease {
    pub key: LeaseKey,
    pub path: String,
    pub granted_state: LeaseState,
    pub invalidated: bool,
    pub epoch: u64,
}

impl Lease {
    pub fn binding(&self) -> LeaseBinding {
        LeaseBinding {
            key: self.key,
            epoch: self.epoch,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LeaseGrant {
    pub binding: LeaseBinding,
    pub state: LeaseState,
    /// True when this call created the lease instance.
    pub fresh: bool,
}

/// What a break did to a lease.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BreakOutcome {
    /// Held without HANDLE caching by disconnected handles only; the
    /// instance is now terminal for reconnects.
    Invalidated { previous: LeaseState },
    /// Downgraded in place for a connected holder.
    Downgraded { from: LeaseState, to: LeaseState },
    /// Nothing to give up (already compatible, or HANDLE caching protects
    /// a disconnected holder).
    Unchanged { state: LeaseState },
}

/// Who holds the lease being broken, as seen by the break handler.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Holders {
    Connected,
    DisconnectedOnly,
}

#[derive(Debug, Default)]
pub struct LeaseTable {
    leases: HashMap<LeaseKey, Lease>,
}

impl LeaseTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Grants `requested` when no live lease exists for `key`, otherwise
    /// joins the live lease at its current state. An invalidated lease is
    /// replaced by a new instance.
    pub fn acquire_or_join(
        &mut self,
        key: LeaseKey,
        path: &str,
        requested: LeaseState,
    ) -> Result<LeaseGrant, EngineError> {
        let next_epoch = match self.leases.get(&key) {
            Some(existing) if !existing.invalidated => {
                if existing.path != path {
                    return Err(EngineError::LeaseKeyPathConflict {
                        key,
                        path: existing.path.clone(),
                    });
                }
                return Ok(LeaseGrant {
                    binding: existing.binding(),
                    state: existing.granted_state,
                    fresh: false,
                });
            }
            Some(existing) => existing.epoch + 1,
            None => 1,
        };
        let lease = Lease {
            key,
            path: path.to_string(),
            granted_state: requested,
            invalidated: false,
            epoch: next_epoch,
        };
        let grant = LeaseGrant {
            binding: lease.binding(),
            state: requested,
            fresh: true,
        };
        self.leases.insert(key, lease);
        Ok(grant)
    }

    /// Downgrades the lease for a conflicting opener.
    ///
    /// A second opener can never share WRITE caching, so connected holders
    /// lose it. Disconnected holders cannot acknowledge a break: without
    /// HANDLE caching their lease is invalidated, with it the lease is kept
    /// as is for the reconnect.
    pub fn break_lease(&mut self, key: LeaseKey, holders: Holders) -> Option<BreakOutcome> {
        let lease = self.leases.get_mut(&key)?;
        if lease.invalidated {
            return None;
        }
        let current = lease.granted_state;
        let outcome = match holders {
            Holders::DisconnectedOnly if !current.has_handle_caching() => {
                lease.invalidated = true;
                lease.granted_state = LeaseState::NONE;
                BreakOutcome::Invalidated { previous: current }
            }
            Holders::DisconnectedOnly => BreakOutcome::Unchanged { state: current },
            Holders::Connected => {
                let target = current.without(LeaseState::WRITE_CACHING);
                if target == current {
                    BreakOutcome::Unchanged { state: current }
                } else {
                    lease.granted_state = target;
                    BreakOutcome::Downgraded {
                        from: current,
                        to: target,
                    }
                }
            }
        };
        Some(outcome)
    }

    /// True once the lease currently stored under `key` has been invalidated.
    pub fn is_invalidated(&self, key: LeaseKey) -> bool {
        self.leases
            .get(&key)
            .map(|lease| lease.invalidated)
            .unwrap_or(false)
    }

    /// True while `binding` still names the stored, non-invalidated instance.
    pub fn is_current(&self, binding: LeaseBinding) -> bool {
        self.leases
            .get(&binding.key)
            .map(|lease| lease.epoch == binding.epoch && !lease.invalidated)
            .unwrap_or(false)
    }

    pub fn get(&self, key: LeaseKey) -> Option<&Lease> {
        self.leases.get(&key)
    }

    /// Drops the instance named by `binding`, if it is still the stored one.
    pub fn release(&mut self, binding: LeaseBinding) -> Option<Lease> {
        let stored_epoch = self.leases.get(&binding.key)?.epoch;
        if stored_epoch != binding.epoch {
            return None;
        }
        self.leases.remove(&binding.key)
    }

    /// Live leases on `path`, excluding `except`, in key order.
    pub fn live_on_path(&self, path: &str, except: Option<LeaseKey>) -> Vec<LeaseBinding> {
        let mut bindings: Vec<LeaseBinding> = self
            .leases
            .values()
            .filter(|lease| !lease.invalidated && lease.path == path)
            .filter(|lease| Some(lease.key) != except)
            .map(Lease::binding)
            .collect();
        bindings.sort_by_key(|binding| binding.key);
        bindings
    }

    pub fn iter(&self) -> impl Iterator<Item = &Lease> {
        self.leases.values()
    }

    pub fn len(&self) -> usize {
        self.leases.len()
    }

    pub fn is_empty(&self) -> bool {
        self.leases.is_empty()
    }
}
