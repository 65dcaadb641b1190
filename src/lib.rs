//! Durable-handle and lease reconciliation for an SMB2/SMB3 share.
//!
//! The [`engine`] decides whether a create request that claims to resume a
//! durable handle after a transport loss may keep its cache lease. The
//! [`backend`] module exposes that engine through the same connection/handle
//! surface a real SMB client library offers, and [`script`] plus [`runner`]
//! replay multi-client scenarios against it.

pub mod backend;
pub mod engine;
pub mod observability;
pub mod protocol;
pub mod runner;
pub mod script;
