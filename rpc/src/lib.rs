//! HTTP and WebSocket surface for the Baton node.
//!
//! Provides endpoints for:
//! - Sessions: create, list, end, delete, enrolment and heartbeats
//! - Chains: seeding, inspection, teacher overrides and the holder's live token
//! - Scans: challenge, chain hop and standalone window scans
//! - Attendance records and the scan audit log
//! - A per-session event stream over WebSocket
//! - Health and Prometheus metrics
//!
//! Callers are identified by headers set by an authenticating proxy; see
//! [`auth`].

pub mod auth;
pub mod error;
pub mod handlers;
pub mod pagination;
pub mod server;
pub mod ws;

pub use error::RpcError;
pub use server::{router, RpcServer, RpcState};
