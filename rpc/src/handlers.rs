//! HTTP request handlers.
//!
//! Handlers decode the request, hand the work to [`BatonService`] on the
//! blocking pool and serialize the result. Authorization lives in the
//! service.

use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::IntoResponse;
use axum::Json;
use baton_node::{BatonService, LiveToken};
use baton_relay::{
    ChallengeIssued, CloseOutcome, EndSummary, HopOutcome, NewSession, RelayError, StandaloneScan,
};
use baton_store::{
    AttendanceRecord, ChainRecord, Etag, HistoryEntry, ScanLogEntry, SessionRecord,
};
use baton_types::{ChainId, GeoPoint, Geofence, Phase, SessionId, StandaloneKind, Timestamp, TokenId, UserId};
use serde::{Deserialize, Serialize};

use crate::auth::{scan_context, Caller};
use crate::error::RpcError;
use crate::pagination::{Page, PaginationParams};
use crate::server::RpcState;

/// Run a service call on the blocking pool.
pub(crate) async fn blocking<T, F>(service: &Arc<BatonService>, f: F) -> Result<T, RpcError>
where
    T: Send + 'static,
    F: FnOnce(&BatonService) -> Result<T, RelayError> + Send + 'static,
{
    let service = Arc::clone(service);
    tokio::task::spawn_blocking(move || f(service.as_ref()))
        .await
        .map_err(|e| RpcError::Internal(format!("request task failed: {e}")))?
        .map_err(RpcError::from)
}

fn session_id(raw: String) -> Result<SessionId, RpcError> {
    Ok(SessionId::parse(raw)?)
}

fn chain_id(raw: String) -> Result<ChainId, RpcError> {
    Ok(ChainId::parse(raw)?)
}

fn token_id(raw: String) -> Result<TokenId, RpcError> {
    Ok(TokenId::parse(raw)?)
}

fn user_id(raw: String) -> Result<UserId, RpcError> {
    Ok(UserId::parse(raw)?)
}

// ── Health ───────────────────────────────────────────────────────────────

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: &'static str,
}

pub async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
    })
}

pub async fn metrics(State(state): State<RpcState>) -> Result<impl IntoResponse, RpcError> {
    if !state.enable_metrics {
        return Err(RpcError::MetricsDisabled);
    }
    let body = state
        .metrics
        .encode()
        .map_err(|e| RpcError::Internal(e.to_string()))?;
    Ok((
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        body,
    ))
}

// ── Sessions ─────────────────────────────────────────────────────────────

#[derive(Deserialize)]
pub struct CreateSessionRequest {
    pub id: Option<String>,
    pub starts_at: Timestamp,
    pub ends_at: Timestamp,
    #[serde(default)]
    pub late_cutoff_minutes: u32,
    #[serde(default)]
    pub exit_window_minutes: u32,
    #[serde(default)]
    pub geofence: Option<Geofence>,
}

pub async fn create_session(
    State(state): State<RpcState>,
    Caller(identity): Caller,
    Json(req): Json<CreateSessionRequest>,
) -> Result<(StatusCode, Json<SessionRecord>), RpcError> {
    let id = req.id.map(session_id).transpose()?;
    let params = NewSession {
        id,
        teacher_id: identity.id.clone(),
        starts_at: req.starts_at,
        ends_at: req.ends_at,
        late_cutoff_minutes: req.late_cutoff_minutes,
        exit_window_minutes: req.exit_window_minutes,
        geofence: req.geofence,
    };
    let session = blocking(&state.service, move |s| s.create_session(&identity, params)).await?;
    Ok((StatusCode::CREATED, Json(session)))
}

pub async fn list_sessions(
    State(state): State<RpcState>,
    Caller(identity): Caller,
) -> Result<Json<Vec<SessionRecord>>, RpcError> {
    let sessions = blocking(&state.service, move |s| s.list_sessions(&identity)).await?;
    Ok(Json(sessions))
}

pub async fn get_session(
    State(state): State<RpcState>,
    Caller(identity): Caller,
    Path(sid): Path<String>,
) -> Result<Json<SessionRecord>, RpcError> {
    let sid = session_id(sid)?;
    let session = blocking(&state.service, move |s| s.get_session(&identity, &sid)).await?;
    Ok(Json(session))
}

pub async fn delete_session(
    State(state): State<RpcState>,
    Caller(identity): Caller,
    Path(sid): Path<String>,
) -> Result<StatusCode, RpcError> {
    let sid = session_id(sid)?;
    blocking(&state.service, move |s| s.delete_session(&identity, &sid)).await?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn end_session(
    State(state): State<RpcState>,
    Caller(identity): Caller,
    Path(sid): Path<String>,
) -> Result<Json<EndSummary>, RpcError> {
    let sid = session_id(sid)?;
    let summary = blocking(&state.service, move |s| s.end_session(&identity, &sid)).await?;
    Ok(Json(summary))
}

#[derive(Default, Deserialize)]
pub struct EnrollRequest {
    /// Defaults to the caller.
    #[serde(default)]
    pub student_id: Option<String>,
}

pub async fn enroll(
    State(state): State<RpcState>,
    Caller(identity): Caller,
    Path(sid): Path<String>,
    Json(req): Json<EnrollRequest>,
) -> Result<Json<AttendanceRecord>, RpcError> {
    let sid = session_id(sid)?;
    let student = match req.student_id {
        Some(raw) => user_id(raw)?,
        None => identity.id.clone(),
    };
    let record =
        blocking(&state.service, move |s| s.enroll_student(&identity, &sid, &student)).await?;
    Ok(Json(record))
}

#[derive(Deserialize)]
pub struct HeartbeatRequest {
    #[serde(default = "default_online")]
    pub online: bool,
}

fn default_online() -> bool {
    true
}

pub async fn heartbeat(
    State(state): State<RpcState>,
    Caller(identity): Caller,
    Path(sid): Path<String>,
    Json(req): Json<HeartbeatRequest>,
) -> Result<Json<AttendanceRecord>, RpcError> {
    let sid = session_id(sid)?;
    let record =
        blocking(&state.service, move |s| s.heartbeat(&identity, &sid, req.online)).await?;
    Ok(Json(record))
}

pub async fn attendance(
    State(state): State<RpcState>,
    Caller(identity): Caller,
    Path(sid): Path<String>,
) -> Result<Json<Vec<AttendanceRecord>>, RpcError> {
    let sid = session_id(sid)?;
    let records = blocking(&state.service, move |s| s.attendance(&identity, &sid)).await?;
    Ok(Json(records))
}

pub async fn scan_log(
    State(state): State<RpcState>,
    Caller(identity): Caller,
    Path(sid): Path<String>,
    Query(page): Query<PaginationParams>,
) -> Result<Json<Page<ScanLogEntry>>, RpcError> {
    let sid = session_id(sid)?;
    let entries = blocking(&state.service, move |s| s.scan_log(&identity, &sid)).await?;
    Ok(Json(page.page(entries)))
}

#[derive(Deserialize)]
pub struct WindowRequest {
    pub enabled: bool,
}

pub async fn set_window(
    State(state): State<RpcState>,
    Caller(identity): Caller,
    Path((sid, kind)): Path<(String, String)>,
    Json(req): Json<WindowRequest>,
) -> Result<Json<SessionRecord>, RpcError> {
    let sid = session_id(sid)?;
    let kind: StandaloneKind = kind.parse()?;
    let session = blocking(&state.service, move |s| {
        s.set_window(&identity, &sid, kind, req.enabled)
    })
    .await?;
    Ok(Json(session))
}

// ── Chains ───────────────────────────────────────────────────────────────

#[derive(Deserialize)]
pub struct SeedRequest {
    pub phase: Phase,
    pub count: usize,
}

async fn seed(
    state: RpcState,
    identity: baton_types::Identity,
    sid: String,
    req: SeedRequest,
    reseed: bool,
) -> Result<Json<Vec<ChainRecord>>, RpcError> {
    let sid = session_id(sid)?;
    let chains = blocking(&state.service, move |s| {
        s.seed_chains(&identity, &sid, req.phase, req.count, reseed)
    })
    .await?;
    Ok(Json(chains))
}

pub async fn seed_chains(
    State(state): State<RpcState>,
    Caller(identity): Caller,
    Path(sid): Path<String>,
    Json(req): Json<SeedRequest>,
) -> Result<Json<Vec<ChainRecord>>, RpcError> {
    seed(state, identity, sid, req, false).await
}

pub async fn reseed_chains(
    State(state): State<RpcState>,
    Caller(identity): Caller,
    Path(sid): Path<String>,
    Json(req): Json<SeedRequest>,
) -> Result<Json<Vec<ChainRecord>>, RpcError> {
    seed(state, identity, sid, req, true).await
}

#[derive(Default, Deserialize)]
pub struct ListChainsQuery {
    pub phase: Option<Phase>,
}

pub async fn list_chains(
    State(state): State<RpcState>,
    Caller(identity): Caller,
    Path(sid): Path<String>,
    Query(query): Query<ListChainsQuery>,
) -> Result<Json<Vec<ChainRecord>>, RpcError> {
    let sid = session_id(sid)?;
    let chains =
        blocking(&state.service, move |s| s.list_chains(&identity, &sid, query.phase)).await?;
    Ok(Json(chains))
}

pub async fn get_chain(
    State(state): State<RpcState>,
    Caller(identity): Caller,
    Path((sid, cid)): Path<(String, String)>,
) -> Result<Json<ChainRecord>, RpcError> {
    let (sid, cid) = (session_id(sid)?, chain_id(cid)?);
    let chain = blocking(&state.service, move |s| s.get_chain(&identity, &sid, &cid)).await?;
    Ok(Json(chain))
}

pub async fn chain_history(
    State(state): State<RpcState>,
    Caller(identity): Caller,
    Path((sid, cid)): Path<(String, String)>,
) -> Result<Json<Vec<HistoryEntry>>, RpcError> {
    let (sid, cid) = (session_id(sid)?, chain_id(cid)?);
    let history =
        blocking(&state.service, move |s| s.chain_history(&identity, &sid, &cid)).await?;
    Ok(Json(history))
}

pub async fn current_token(
    State(state): State<RpcState>,
    Caller(identity): Caller,
    Path((sid, cid)): Path<(String, String)>,
) -> Result<Json<LiveToken>, RpcError> {
    let (sid, cid) = (session_id(sid)?, chain_id(cid)?);
    let token =
        blocking(&state.service, move |s| s.current_token(&identity, &sid, &cid)).await?;
    Ok(Json(token))
}

#[derive(Deserialize)]
pub struct SetHolderRequest {
    pub student_id: String,
}

pub async fn set_chain_holder(
    State(state): State<RpcState>,
    Caller(identity): Caller,
    Path((sid, cid)): Path<(String, String)>,
    Json(req): Json<SetHolderRequest>,
) -> Result<Json<HopOutcome>, RpcError> {
    let (sid, cid) = (session_id(sid)?, chain_id(cid)?);
    let student = user_id(req.student_id)?;
    let outcome = blocking(&state.service, move |s| {
        s.set_chain_holder(&identity, &sid, &cid, &student)
    })
    .await?;
    Ok(Json(outcome))
}

pub async fn close_chain(
    State(state): State<RpcState>,
    Caller(identity): Caller,
    Path((sid, cid)): Path<(String, String)>,
) -> Result<Json<CloseOutcome>, RpcError> {
    let (sid, cid) = (session_id(sid)?, chain_id(cid)?);
    let outcome = blocking(&state.service, move |s| s.close_chain(&identity, &sid, &cid)).await?;
    Ok(Json(outcome))
}

// ── Scans ────────────────────────────────────────────────────────────────

/// Device signals every scan request may carry.
#[derive(Default, Deserialize)]
pub struct ScanSignals {
    #[serde(default)]
    pub fingerprint: Option<String>,
    #[serde(default)]
    pub gps: Option<GeoPoint>,
    #[serde(default)]
    pub bssid: Option<String>,
}

#[derive(Deserialize)]
pub struct ChallengeRequest {
    #[serde(default)]
    pub chain_id: Option<String>,
    #[serde(flatten)]
    pub signals: ScanSignals,
}

pub async fn request_challenge(
    State(state): State<RpcState>,
    Caller(identity): Caller,
    headers: HeaderMap,
    Path((sid, tid)): Path<(String, String)>,
    Json(req): Json<ChallengeRequest>,
) -> Result<Json<ChallengeIssued>, RpcError> {
    let (sid, tid) = (session_id(sid)?, token_id(tid)?);
    let claimed = req.chain_id.map(chain_id).transpose()?;
    let scan = scan_context(&headers, req.signals.fingerprint, req.signals.gps, req.signals.bssid);
    let issued = blocking(&state.service, move |s| {
        s.request_challenge(&identity, &sid, &tid, claimed.as_ref(), &scan)
    })
    .await?;
    Ok(Json(issued))
}

#[derive(Deserialize)]
pub struct ChainScanRequest {
    pub code: String,
    /// Token version returned with the challenge.
    #[serde(default)]
    pub etag: Option<Etag>,
    #[serde(flatten)]
    pub signals: ScanSignals,
}

pub async fn chain_scan(
    State(state): State<RpcState>,
    Caller(identity): Caller,
    headers: HeaderMap,
    Path((sid, tid)): Path<(String, String)>,
    Json(req): Json<ChainScanRequest>,
) -> Result<Json<HopOutcome>, RpcError> {
    let (sid, tid) = (session_id(sid)?, token_id(tid)?);
    let scan = scan_context(&headers, req.signals.fingerprint, req.signals.gps, req.signals.bssid);
    let code = req.code;
    let etag = req.etag;
    let outcome = blocking(&state.service, move |s| {
        s.process_chain_scan(&identity, &sid, &tid, etag, &code, &scan)
    })
    .await?;
    Ok(Json(outcome))
}

pub async fn standalone_scan(
    State(state): State<RpcState>,
    Caller(identity): Caller,
    headers: HeaderMap,
    Path((sid, tid)): Path<(String, String)>,
    Json(signals): Json<ScanSignals>,
) -> Result<Json<StandaloneScan>, RpcError> {
    let (sid, tid) = (session_id(sid)?, token_id(tid)?);
    let scan = scan_context(&headers, signals.fingerprint, signals.gps, signals.bssid);
    let result = blocking(&state.service, move |s| {
        s.scan_standalone(&identity, &sid, &tid, &scan)
    })
    .await?;
    Ok(Json(result))
}
