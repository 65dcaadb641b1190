//! NTSTATUS codes from [MS-ERREF] surfaced by the create path.
//!
//! The top 2 bits of an NTSTATUS code encode severity:
//! - 00 = Success
//! - 01 = Informational
//! - 10 = Warning
//! - 11 = Error

use std::fmt;

/// A raw `u32` NTSTATUS code with named constants for the statuses a
/// create or durable reconnect can complete with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NtStatus(pub u32);

impl NtStatus {
    const SEVERITY_MASK: u32 = 0xC000_0000;

    const NAMES: &'static [(u32, &'static str)] = &[
        (0x0000_0000, "STATUS_SUCCESS"),
        (0x0000_0103, "STATUS_PENDING"),
        (0xC000_0008, "STATUS_INVALID_HANDLE"),
        (0xC000_000D, "STATUS_INVALID_PARAMETER"),
        (0xC000_0022, "STATUS_ACCESS_DENIED"),
        (0xC000_0034, "STATUS_OBJECT_NAME_NOT_FOUND"),
        (0xC000_0035, "STATUS_OBJECT_NAME_COLLISION"),
        (0xC000_0043, "STATUS_SHARING_VIOLATION"),
        (0xC000_0128, "STATUS_FILE_CLOSED"),
        (0xC000_0184, "STATUS_INVALID_DEVICE_STATE"),
        (0xC000_0205, "STATUS_CONNECTION_DISCONNECTED"),
        (0xC000_022A, "STATUS_DUPLICATE_OBJECTID"),
        (0xC000_00BB, "STATUS_NOT_SUPPORTED"),
    ];

    pub fn is_success(self) -> bool {
        (self.0 & Self::SEVERITY_MASK) == 0x0000_0000
    }

    pub fn is_error(self) -> bool {
        (self.0 & Self::SEVERITY_MASK) == 0xC000_0000
    }

    pub fn code(self) -> u32 {
        self.0
    }

    /// Short name for known codes, `None` otherwise.
    pub fn name(self) -> Option<&'static str> {
        Self::NAMES
            .iter()
            .find(|(code, _)| *code == self.0)
            .map(|(_, name)| *name)
    }

    /// Looks up a code by its `STATUS_*` name; the prefix is optional.
    pub fn from_name(name: &str) -> Option<Self> {
        let wanted = name.trim().to_ascii_uppercase();
        let wanted = if wanted.starts_with("STATUS_") {
            wanted
        } else {
            format!("STATUS_{wanted}")
        };
        Self::NAMES
            .iter()
            .find(|(_, known)| *known == wanted)
            .map(|(code, _)| Self(*code))
    }

    pub const SUCCESS: Self = Self(0x0000_0000);
    pub const PENDING: Self = Self(0x0000_0103);

    pub const INVALID_HANDLE: Self = Self(0xC000_0008);
    pub const INVALID_PARAMETER: Self = Self(0xC000_000D);
    pub const ACCESS_DENIED: Self = Self(0xC000_0022);
    pub const OBJECT_NAME_NOT_FOUND: Self = Self(0xC000_0034);
    pub const OBJECT_NAME_COLLISION: Self = Self(0xC000_0035);
    pub const SHARING_VIOLATION: Self = Self(0xC000_0043);
    pub const FILE_CLOSED: Self = Self(0xC000_0128);
    pub const INVALID_DEVICE_STATE: Self = Self(0xC000_0184);
    pub const CONNECTION_DISCONNECTED: Self = Self(0xC000_0205);
    pub const DUPLICATE_OBJECTID: Self = Self(0xC000_022A);
    pub const NOT_SUPPORTED: Self = Self(0xC000_00BB);
}

impl fmt::Display for NtStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(name) = self.name() {
            write!(f, "{} (0x{:08X})", name, self.0)
        } else {
            let severity = match self.0 & Self::SEVERITY_MASK {
                0x0000_0000 => "Success",
                0x4000_0000 => "Info",
                0x8000_0000 => "Warning",
                _ => "Error",
            };
            write!(f, "NTSTATUS_{}(0x{:08X})", severity, self.0)
        }
    }
}

impl From<u32> for NtStatus {
    fn from(code: u32) -> Self {
        Self(code)
    }
}

impl From<NtStatus> for u32 {
    fn from(status: NtStatus) -> u32 {
        status.0
    }
}
