//! HTTP-level tests driving the router directly.

use std::sync::Arc;

use axum::body::{to_bytes, Body};
use axum::http::{Method, Request, StatusCode};
use axum::Router;
use baton_node::{BatonNode, NodeConfig};
use baton_nullables::{NullClock, NullRandom, NullStore};
use baton_rpc::auth::{ROLE_HEADER, USER_HEADER};
use baton_rpc::{router, RpcState};
use serde_json::{json, Value};
use tower::ServiceExt;

const START: u64 = 30_000;

struct Harness {
    app: Router,
    _node: BatonNode,
}

fn harness_with(enable_metrics: bool) -> Harness {
    let node = BatonNode::with_parts(
        NodeConfig {
            memory: true,
            enable_metrics,
            challenge_secret: Some("00112233445566778899aabbccddeeff".into()),
            ..NodeConfig::default()
        },
        Arc::new(NullStore::new()),
        Arc::new(NullClock::at_secs(START)),
        Arc::new(NullRandom::default()),
    )
    .unwrap();
    Harness {
        app: router(RpcState::from_node(&node)),
        _node: node,
    }
}

fn harness() -> Harness {
    harness_with(true)
}

impl Harness {
    async fn call(
        &self,
        method: Method,
        uri: &str,
        caller: Option<(&str, &str)>,
        body: Option<Value>,
    ) -> (StatusCode, Value) {
        let mut builder = Request::builder().method(method).uri(uri);
        if let Some((user, role)) = caller {
            builder = builder.header(USER_HEADER, user).header(ROLE_HEADER, role);
        }
        let body = match body {
            Some(value) => {
                builder = builder.header("content-type", "application/json");
                Body::from(value.to_string())
            }
            None => Body::empty(),
        };
        let response = self
            .app
            .clone()
            .oneshot(builder.body(body).unwrap())
            .await
            .unwrap();
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let value = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap_or_else(|_| {
                Value::String(String::from_utf8_lossy(&bytes).into_owned())
            })
        };
        (status, value)
    }

    async fn as_prof(&self, method: Method, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
        self.call(method, uri, Some(("prof", "teacher")), body).await
    }

    async fn as_student(
        &self,
        who: &str,
        method: Method,
        uri: &str,
        body: Option<Value>,
    ) -> (StatusCode, Value) {
        self.call(method, uri, Some((who, "student")), body).await
    }

    async fn open_session(&self, students: &[&str]) {
        let (status, session) = self
            .as_prof(
                Method::POST,
                "/sessions",
                Some(json!({
                    "id": "s1",
                    "starts_at": START * 1_000,
                    "ends_at": (START + 3_600) * 1_000,
                    "late_cutoff_minutes": 10,
                    "exit_window_minutes": 10,
                })),
            )
            .await;
        assert_eq!(status, StatusCode::CREATED, "{session}");
        assert_eq!(session["teacher_id"], "prof");

        for s in students {
            let (status, _) = self
                .as_student(s, Method::POST, "/sessions/s1/enroll", Some(json!({})))
                .await;
            assert_eq!(status, StatusCode::OK);
            let (status, _) = self
                .as_student(s, Method::POST, "/sessions/s1/heartbeat", Some(json!({"online": true})))
                .await;
            assert_eq!(status, StatusCode::OK);
        }
    }
}

#[tokio::test]
async fn health_needs_no_identity() {
    let h = harness();
    let (status, body) = h.call(Method::GET, "/health", None, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ok");
}

#[tokio::test]
async fn missing_identity_headers_are_rejected() {
    let h = harness();
    let (status, body) = h.call(Method::GET, "/sessions", None, None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["code"], "UNAUTHENTICATED");

    let (status, _) = h
        .call(Method::GET, "/sessions", Some(("prof", "janitor")), None)
        .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn a_hop_over_http_and_its_replay() {
    let h = harness();
    h.open_session(&["ann", "ben"]).await;

    let (status, chains) = h
        .as_prof(
            Method::POST,
            "/sessions/s1/chains/seed",
            Some(json!({"phase": "ENTRY", "count": 1})),
        )
        .await;
    assert_eq!(status, StatusCode::OK, "{chains}");
    let chain_id = chains[0]["chain_id"].as_str().unwrap().to_string();
    let holder = chains[0]["last_holder"].as_str().unwrap().to_string();
    let scanner = if holder == "ann" { "ben" } else { "ann" };

    // Only the holder may fetch the live token.
    let token_uri = format!("/sessions/s1/chains/{chain_id}/token");
    let (status, _) = h.as_student(scanner, Method::GET, &token_uri, None).await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    let (status, live) = h.as_student(&holder, Method::GET, &token_uri, None).await;
    assert_eq!(status, StatusCode::OK);
    let token_id = live["token_id"].as_str().unwrap().to_string();

    let (status, issued) = h
        .as_student(
            scanner,
            Method::POST,
            &format!("/sessions/s1/tokens/{token_id}/challenge"),
            Some(json!({"chain_id": chain_id, "fingerprint": "device-1"})),
        )
        .await;
    assert_eq!(status, StatusCode::OK, "{issued}");
    assert_eq!(issued["holder_id"], holder.as_str());

    let scan_uri = format!("/sessions/s1/tokens/{token_id}/scan");
    let scan_body = json!({"code": issued["code"], "etag": issued["token_etag"]});
    let (status, hop) = h
        .as_student(&holder, Method::POST, &scan_uri, Some(scan_body.clone()))
        .await;
    assert_eq!(status, StatusCode::OK, "{hop}");
    assert_eq!(hop["new_holder"], scanner);
    assert_eq!(hop["seq"], 1);

    let (status, replay) = h
        .as_student(&holder, Method::POST, &scan_uri, Some(scan_body))
        .await;
    assert_eq!(status, StatusCode::GONE);
    assert_eq!(replay["code"], "TOKEN_USED");

    let (status, history) = h
        .as_prof(
            Method::GET,
            &format!("/sessions/s1/chains/{chain_id}/history"),
            None,
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(history.as_array().unwrap().len(), 2);

    let (status, log) = h
        .as_prof(Method::GET, "/sessions/s1/scan-log?count=1", None)
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(log["items"].as_array().unwrap().len(), 1);
    assert!(log["cursor"].is_string());

    // Students never read the audit log.
    let (status, _) = h
        .as_student(scanner, Method::GET, "/sessions/s1/scan-log", None)
        .await;
    assert_eq!(status, StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn seeding_beyond_the_class_size_is_a_capacity_error() {
    let h = harness();
    h.open_session(&["ann", "ben"]).await;
    let (status, body) = h
        .as_prof(
            Method::POST,
            "/sessions/s1/chains/seed",
            Some(json!({"phase": "ENTRY", "count": 5})),
        )
        .await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(body["code"], "INSUFFICIENT_STUDENTS");
    assert!(body["message"]
        .as_str()
        .unwrap()
        .contains("requested 5, available 2"));
}

#[tokio::test]
async fn unknown_window_kind_is_a_bad_request() {
    let h = harness();
    h.open_session(&[]).await;
    let (status, body) = h
        .as_prof(
            Method::PUT,
            "/sessions/s1/windows/coffee-break",
            Some(json!({"enabled": true})),
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["code"], "INVALID_REQUEST");

    let (status, session) = h
        .as_prof(
            Method::PUT,
            "/sessions/s1/windows/late-entry",
            Some(json!({"enabled": true})),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(session["late_entry_active"], true);
}

#[tokio::test]
async fn missing_session_is_not_found() {
    let h = harness();
    let (status, body) = h.as_prof(Method::GET, "/sessions/nope", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["code"], "SESSION_NOT_FOUND");
}

#[tokio::test]
async fn metrics_are_exposed_unless_disabled() {
    let h = harness();
    let (status, body) = h.call(Method::GET, "/metrics", None, None).await;
    assert_eq!(status, StatusCode::OK);
    assert!(body.as_str().unwrap().contains("baton_"));

    let quiet = harness_with(false);
    let (status, _) = quiet.call(Method::GET, "/metrics", None, None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}
