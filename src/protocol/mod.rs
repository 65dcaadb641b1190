pub mod create;
pub mod guid;
pub mod lease;
pub mod ntstatus;

pub use create::{
    AccessMask, CreateDisposition, CreateRequest, CreateResponse, DurableRequest, FileId,
    GrantedDurability, OplockLevel, ShareAccess,
};
pub use guid::{ClientGuid, CreateGuid, LeaseKey};
pub use lease::{LeaseBreakNotification, LeaseRequest, LeaseState};
pub use ntstatus::NtStatus;
