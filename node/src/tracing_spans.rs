//! Pre-built [`tracing::Span`] constructors for common Baton operations.
//!
//! Consistent span names and field sets make scans, rotation passes and
//! HTTP requests easy to filter and correlate across log lines.

use tracing::{info_span, Span};

/// Span covering a scan-path operation from gatekeeper to notification.
pub fn scan_span(operation: &str, session_id: &str, actor: &str) -> Span {
    info_span!("scan", op = %operation, session = %session_id, actor = %actor)
}

/// Span covering a teacher action on a session (seed, close, override, end).
pub fn session_span(action: &str, session_id: &str) -> Span {
    info_span!("session", action = %action, session = %session_id)
}

/// Span covering one rotation pass.
pub fn rotation_span(pass: u64) -> Span {
    info_span!("rotation", pass = pass)
}

/// Span covering a single HTTP request handled by the RPC server.
pub fn rpc_span(method: &str, route: &str) -> Span {
    info_span!("rpc", method = %method, route = %route)
}
