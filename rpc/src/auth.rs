//! Caller identity from trusted headers.
//!
//! The node sits behind an authenticating proxy that validates the user's
//! credentials and forwards the decoded identity.

use axum::async_trait;
use axum::extract::FromRequestParts;
use axum::http::request::Parts;
use axum::http::HeaderMap;
use baton_gatekeeper::ScanContext;
use baton_types::{GeoPoint, Identity, Role, UserId};

use crate::error::RpcError;

pub const USER_HEADER: &str = "x-baton-user";
pub const ROLE_HEADER: &str = "x-baton-role";
pub const DEVICE_HEADER: &str = "x-baton-device";
pub const FORWARDED_FOR_HEADER: &str = "x-forwarded-for";

/// The authenticated caller.
#[derive(Clone, Debug)]
pub struct Caller(pub Identity);

fn header<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
}

pub fn identity_from_headers(headers: &HeaderMap) -> Result<Identity, RpcError> {
    let user = header(headers, USER_HEADER)
        .ok_or_else(|| RpcError::Unauthenticated(format!("missing {USER_HEADER} header")))?;
    let role = header(headers, ROLE_HEADER)
        .ok_or_else(|| RpcError::Unauthenticated(format!("missing {ROLE_HEADER} header")))?;
    let id = UserId::parse(user)
        .map_err(|e| RpcError::Unauthenticated(format!("bad {USER_HEADER}: {e}")))?;
    let role: Role = role
        .parse()
        .map_err(|e| RpcError::Unauthenticated(format!("bad {ROLE_HEADER}: {e}")))?;
    Ok(Identity { id, role })
}

#[async_trait]
impl<S> FromRequestParts<S> for Caller
where
    S: Send + Sync,
{
    type Rejection = RpcError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        identity_from_headers(&parts.headers).map(Caller)
    }
}

/// Build the gatekeeper's view of a scan. The device fingerprint may come
/// from the body or the device header; the client IP is the first
/// `x-forwarded-for` hop.
pub fn scan_context(
    headers: &HeaderMap,
    fingerprint: Option<String>,
    gps: Option<GeoPoint>,
    bssid: Option<String>,
) -> ScanContext {
    ScanContext {
        fingerprint: fingerprint.or_else(|| header(headers, DEVICE_HEADER).map(str::to_string)),
        ip: header(headers, FORWARDED_FOR_HEADER)
            .and_then(|v| v.split(',').next())
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty()),
        gps,
        bssid,
    }
}
