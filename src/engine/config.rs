use std::str::FromStr;
use std::time::Duration;

use anyhow::{anyhow, Result};

/// How bookkeeping errors that indicate engine misuse are treated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InvariantMode {
    Panic,
    LogAndContinue,
}

impl FromStr for InvariantMode {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "panic" => Ok(InvariantMode::Panic),
            "log" | "log-and-continue" | "continue" => Ok(InvariantMode::LogAndContinue),
            other => Err(anyhow!("Unknown invariant mode: {}", other)),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ShareConfig {
    pub share_name: String,
    pub invariant_mode: InvariantMode,
    /// Queue depth of each connection's lease-break notification channel.
    pub notification_capacity: usize,
    /// Timeout granted to V2 durable handles that ask for the default.
    pub default_v2_timeout: Duration,
}

impl Default for ShareConfig {
    fn default() -> Self {
        Self {
            share_name: "share".to_string(),
            invariant_mode: InvariantMode::LogAndContinue,
            notification_capacity: 64,
            default_v2_timeout: Duration::from_secs(60),
        }
    }
}

impl ShareConfig {
    /// Defaults overridden by `SMBDURABLE_*` environment variables.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let mut config = Self::default();
        if let Some(name) = lookup("SMBDURABLE_SHARE") {
            if name.trim().is_empty() {
                return Err(anyhow!("SMBDURABLE_SHARE must be non-empty"));
            }
            config.share_name = name;
        }
        if let Some(mode) = lookup("SMBDURABLE_INVARIANT_MODE") {
            config.invariant_mode = mode.parse()?;
        }
        if let Some(capacity) = lookup("SMBDURABLE_NOTIFY_CAPACITY") {
            let capacity: usize = capacity
                .parse()
                .map_err(|e| anyhow!("Invalid SMBDURABLE_NOTIFY_CAPACITY {:?}: {}", capacity, e))?;
            if capacity == 0 {
                return Err(anyhow!("SMBDURABLE_NOTIFY_CAPACITY must be at least 1"));
            }
            config.notification_capacity = capacity;
        }
        if let Some(timeout) = lookup("SMBDURABLE_V2_TIMEOUT_MS") {
            let millis: u64 = timeout
                .parse()
                .map_err(|e| anyhow!("Invalid SMBDURABLE_V2_TIMEOUT_MS {:?}: {}", timeout, e))?;
            config.default_v2_timeout = Duration::from_millis(millis);
        }
        Ok(config)
    }
}
