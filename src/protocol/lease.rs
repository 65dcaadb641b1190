//! SMB2 lease state and lease-break notification types.
//!
//! Lease state bits follow [MS-SMB2] 2.2.13.2.8:
//! - `0x01` READ caching
//! - `0x02` HANDLE caching
//! - `0x04` WRITE caching

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use super::guid::LeaseKey;

/// Bitset over {READ, WRITE, HANDLE} caching.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct LeaseState(u32);

impl LeaseState {
    const VALID_MASK: u32 = 0x07;

    pub const NONE: Self = Self(0x00);
    pub const READ_CACHING: Self = Self(0x01);
    pub const HANDLE_CACHING: Self = Self(0x02);
    pub const WRITE_CACHING: Self = Self(0x04);

    pub const R: Self = Self::READ_CACHING;
    pub const RW: Self = Self(0x05);
    pub const RH: Self = Self(0x03);
    pub const RWH: Self = Self(0x07);

    /// Builds a state from wire bits, dropping anything undefined.
    pub fn from_bits_truncate(bits: u32) -> Self {
        Self(bits & Self::VALID_MASK)
    }

    pub fn bits(self) -> u32 {
        self.0
    }

    pub fn is_empty(self) -> bool {
        self.0 == 0
    }

    pub fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }

    pub fn has_handle_caching(self) -> bool {
        self.contains(Self::HANDLE_CACHING)
    }

    pub fn has_write_caching(self) -> bool {
        self.contains(Self::WRITE_CACHING)
    }

    pub fn without(self, other: Self) -> Self {
        Self(self.0 & !other.0)
    }

    pub fn intersection(self, other: Self) -> Self {
        Self(self.0 & other.0)
    }

    pub fn union(self, other: Self) -> Self {
        Self(self.0 | other.0)
    }

    /// Short letter form used in logs and scripts (`"RWH"`, `"R"`, `"NONE"`).
    pub fn letters(self) -> String {
        if self.is_empty() {
            return "NONE".to_string();
        }
        let mut out = String::with_capacity(3);
        if self.contains(Self::READ_CACHING) {
            out.push('R');
        }
        if self.contains(Self::WRITE_CACHING) {
            out.push('W');
        }
        if self.contains(Self::HANDLE_CACHING) {
            out.push('H');
        }
        out
    }
}

impl fmt::Display for LeaseState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.letters())
    }
}

impl fmt::Debug for LeaseState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "LeaseState({} 0x{:02X})", self.letters(), self.0)
    }
}

impl FromStr for LeaseState {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        if trimmed.is_empty() || trimmed.eq_ignore_ascii_case("none") {
            return Ok(Self::NONE);
        }
        let mut state = Self::NONE;
        for ch in trimmed.chars() {
            let bit = match ch.to_ascii_uppercase() {
                'R' => Self::READ_CACHING,
                'W' => Self::WRITE_CACHING,
                'H' => Self::HANDLE_CACHING,
                other => return Err(format!("Invalid lease state letter '{other}' in {s:?}")),
            };
            if state.contains(bit) {
                return Err(format!("Duplicate lease state letter '{ch}' in {s:?}"));
            }
            state = state.union(bit);
        }
        Ok(state)
    }
}

impl TryFrom<String> for LeaseState {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<LeaseState> for String {
    fn from(state: LeaseState) -> String {
        state.letters()
    }
}

/// Lease create context carried on a create request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LeaseRequest {
    pub key: LeaseKey,
    pub state: LeaseState,
}

impl LeaseRequest {
    pub fn new(key: LeaseKey, state: LeaseState) -> Self {
        Self { key, state }
    }
}

/// Out-of-band `SMB2_LEASE_BREAK_NOTIFICATION`, addressed by lease key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LeaseBreakNotification {
    pub lease_key: LeaseKey,
    pub current_state: LeaseState,
    pub new_state: LeaseState,
    /// Instance number of the lease being broken.
    pub epoch: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_named_combinations() {
        assert_eq!(LeaseState::RWH.bits(), 0x07);
        assert_eq!(LeaseState::RW.bits(), 0x05);
        assert_eq!(LeaseState::RH.bits(), 0x03);
        assert!(LeaseState::RWH.has_handle_caching());
        assert!(!LeaseState::RW.has_handle_caching());
        assert!(LeaseState::RW.has_write_caching());
    }

    #[test]
    fn test_without_write() {
        assert_eq!(LeaseState::RWH.without(LeaseState::WRITE_CACHING), LeaseState::RH);
        assert_eq!(LeaseState::RW.without(LeaseState::WRITE_CACHING), LeaseState::R);
        assert_eq!(LeaseState::R.without(LeaseState::WRITE_CACHING), LeaseState::R);
    }

    #[test]
    fn test_letters_parse() {
        assert_eq!("rwh".parse::<LeaseState>().unwrap(), LeaseState::RWH);
        assert_eq!("HR".parse::<LeaseState>().unwrap(), LeaseState::RH);
        assert_eq!("none".parse::<LeaseState>().unwrap(), LeaseState::NONE);
        assert!("RX".parse::<LeaseState>().is_err());
        assert!("RR".parse::<LeaseState>().is_err());
        assert_eq!(LeaseState::RWH.to_string(), "RWH");
        assert_eq!(LeaseState::NONE.to_string(), "NONE");
    }

    #[test]
    fn test_serde_uses_letters() {
        let json = serde_json::to_string(&LeaseState::RW).unwrap();
        assert_eq!(json, "\"RW\"");
        let state: LeaseState = serde_json::from_str("\"RH\"").unwrap();
        assert_eq!(state, LeaseState::RH);
        assert!(serde_json::from_str::<LeaseState>("\"Q\"").is_err());
    }

    #[test]
    fn test_truncate_undefined_bits() {
        assert_eq!(LeaseState::from_bits_truncate(0xFF), LeaseState::RWH);
    }
}
