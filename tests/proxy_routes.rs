//! End-to-end route tests over the real router with a scripted directory.
//!
//! Covers the login flow, out-of-scope denial, revocation, group
//! invalidation, and the error envelope — everything that does not require a
//! live upstream. Forwarded (allowed) calls are exercised against the
//! authorization layer only, through deny and auth failures.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use axum::body::Body;
use axum::http::{Request, StatusCode, header};
use http_body_util::BodyExt;
use pretty_assertions::assert_eq;
use serde_json::Value;
use tower::ServiceExt;

use graph_scope_proxy::config::{AuthConfig, GraphConfig, JwtConfig, ScopeConfig};
use graph_scope_proxy::scope::{InMemoryScopeStore, ScopeBuilder, ScopeStore};
use graph_scope_proxy::server::{AppState, ResolvedAuth, create_router};
use graph_scope_proxy::token::TokenService;
use graph_scope_proxy::upstream::{
    AppCredentials, Directory, Forwarder, MemberPage, MemberRecord, PlaceRecord,
};

// ── Scripted upstream ──────────────────────────────────────────────────────

struct ScriptedDirectory {
    groups: HashMap<String, Vec<MemberRecord>>,
}

#[async_trait::async_trait]
impl Directory for ScriptedDirectory {
    async fn member_page(
        &self,
        group_id: &str,
        _next_link: Option<&str>,
    ) -> graph_scope_proxy::Result<MemberPage> {
        Ok(MemberPage {
            members: self.groups.get(group_id).cloned().unwrap_or_default(),
            next_link: None,
        })
    }

    async fn places(&self) -> graph_scope_proxy::Result<Vec<PlaceRecord>> {
        Ok(Vec::new())
    }

    async fn probe(&self) -> graph_scope_proxy::Result<()> {
        Ok(())
    }
}

fn member(id: &str, mail: &str, name: &str) -> MemberRecord {
    MemberRecord {
        id: id.to_string(),
        mail: Some(mail.to_string()),
        display_name: Some(name.to_string()),
    }
}

/// Directory fixture: G1 is the S1 group, GBIG overflows the scope cap,
/// GEMPTY yields nothing admissible.
fn directory() -> ScriptedDirectory {
    let mut groups = HashMap::new();
    groups.insert(
        "G1".to_string(),
        vec![
            member("r1", "room-a@x", "Conference Room A (Cap: 10)"),
            member("r2", "desk-1@x", "Workspace Desk 1"),
            member("u1", "alice@x", "Alice"),
        ],
    );
    groups.insert(
        "GBIG".to_string(),
        (0..7)
            .map(|i| member(&format!("big{i}"), &format!("room-big{i}@x"), "Meeting Room"))
            .collect(),
    );
    groups.insert(
        "GEMPTY".to_string(),
        vec![MemberRecord {
            id: "nomail".to_string(),
            mail: None,
            display_name: Some("Distribution object".to_string()),
        }],
    );
    ScriptedDirectory { groups }
}

fn test_router(max_scope_size: usize) -> Router {
    let jwt = JwtConfig {
        signing_key: "integration-test-signing-key-0123456789".to_string(),
        ..JwtConfig::default()
    };
    let scope_config = ScopeConfig {
        max_scope_size,
        use_places_api: false,
        ..ScopeConfig::default()
    };
    let auth_config = AuthConfig {
        api_keys: HashMap::from([
            ("k1".to_string(), vec!["G1".to_string()]),
            (
                "k2".to_string(),
                vec!["GBIG".to_string(), "GEMPTY".to_string()],
            ),
        ]),
        admin_key: Some("admin-secret".to_string()),
    };
    // Unroutable upstream: allowed forwards fail fast with a transport error
    let graph = GraphConfig {
        base_url: "http://127.0.0.1:9".to_string(),
        login_base_url: "http://127.0.0.1:9".to_string(),
        request_timeout: Duration::from_secs(2),
        ..GraphConfig::default()
    };

    let directory: Arc<dyn Directory> = Arc::new(directory());
    let credentials = Arc::new(AppCredentials::new(&graph).unwrap());
    let scopes: Arc<dyn ScopeStore> = Arc::new(InMemoryScopeStore::new());
    let ttl = Duration::from_secs(900);

    let state = Arc::new(AppState {
        auth: ResolvedAuth::from_config(&auth_config),
        tokens: Arc::new(TokenService::new(&jwt).unwrap()),
        scopes,
        builder: ScopeBuilder::new(Arc::clone(&directory), scope_config.policy(), ttl),
        directory,
        forwarder: Arc::new(Forwarder::new(&graph, credentials).unwrap()),
        scope_ttl: ttl,
    });

    create_router(state, 1024 * 1024)
}

async fn send(router: &Router, request: Request<Body>) -> (StatusCode, Value) {
    let response = router.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    let body = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap_or(Value::Null)
    };
    (status, body)
}

fn login_request(api_key: &str, group_id: &str) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri("/auth/login")
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(format!(
            r#"{{"apiKey":"{api_key}","groupId":"{group_id}"}}"#
        )))
        .unwrap()
}

async fn login(router: &Router, api_key: &str, group_id: &str) -> String {
    let (status, body) = send(router, login_request(api_key, group_id)).await;
    assert_eq!(status, StatusCode::OK);
    body["token"].as_str().unwrap().to_string()
}

fn bearer_get(uri: &str, token: &str) -> Request<Body> {
    Request::builder()
        .method("GET")
        .uri(uri)
        .header(header::AUTHORIZATION, format!("Bearer {token}"))
        .body(Body::empty())
        .unwrap()
}

fn bearer_post(uri: &str, token: &str) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header(header::AUTHORIZATION, format!("Bearer {token}"))
        .body(Body::empty())
        .unwrap()
}

// ── Login ──────────────────────────────────────────────────────────────────

#[tokio::test]
async fn login_materializes_scope_with_generic_fallback() {
    // Alice has no classification keywords; with generics disabled she falls
    // back to Room, so all three members are admitted.
    let router = test_router(500);
    let (status, body) = send(&router, login_request("k1", "G1")).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["groupId"], "G1");
    assert_eq!(body["resourceCount"], 3);
    assert_eq!(body["expiresIn"], 900);
    assert!(body["token"].as_str().unwrap().split('.').count() == 3);
}

#[tokio::test]
async fn login_with_unknown_key_is_unauthorized() {
    let router = test_router(500);
    let (status, body) = send(&router, login_request("stolen", "G1")).await;

    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["error"]["code"], "InvalidCredentials");
}

#[tokio::test]
async fn login_with_unbound_group_is_unauthorized() {
    let router = test_router(500);
    let (status, body) = send(&router, login_request("k1", "GBIG")).await;

    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["error"]["code"], "InvalidCredentials");
}

#[tokio::test]
async fn login_with_malformed_body_is_bad_request() {
    let router = test_router(500);
    let request = Request::builder()
        .method("POST")
        .uri("/auth/login")
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from("{not json"))
        .unwrap();
    let (status, body) = send(&router, request).await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"]["code"], "MalformedRequest");
}

#[tokio::test]
async fn login_against_inadmissible_group_is_not_found() {
    let router = test_router(500);
    let (status, body) = send(&router, login_request("k2", "GEMPTY")).await;

    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["error"]["code"], "EmptyScope");
}

#[tokio::test]
async fn error_envelope_carries_path_and_timestamp() {
    let router = test_router(500);
    let (_, body) = send(&router, login_request("stolen", "G1")).await;

    let error = &body["error"];
    assert_eq!(error["statusCode"], 401);
    assert_eq!(error["path"], "/auth/login");
    assert!(error["timestamp"].as_str().unwrap().contains('T'));
    assert!(error["message"].as_str().is_some());
}

// ── Protected calls ────────────────────────────────────────────────────────

#[tokio::test]
async fn out_of_scope_calendar_call_is_denied() {
    let router = test_router(500);
    let token = login(&router, "k1", "G1").await;

    let (status, body) = send(
        &router,
        bearer_get("/v1.0/users/bob@x/calendar/events", &token),
    )
    .await;

    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(body["error"]["code"], "OutOfScope");
    assert!(body["error"]["message"].as_str().unwrap().contains("bob@x"));
}

#[tokio::test]
async fn percent_encoded_segments_match_scope_entries() {
    let router = test_router(500);
    let token = login(&router, "k1", "G1").await;

    // carol is not in scope; the denied resource is reported decoded
    let (status, body) = send(
        &router,
        bearer_get("/v1.0/users/carol%40x/calendar/events", &token),
    )
    .await;

    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(body["error"]["code"], "OutOfScope");
    assert!(body["error"]["message"].as_str().unwrap().contains("carol@x"));
}

#[tokio::test]
async fn missing_bearer_is_unauthorized() {
    let router = test_router(500);
    let request = Request::builder()
        .method("GET")
        .uri("/v1.0/users/room-a@x/calendar/events")
        .body(Body::empty())
        .unwrap();
    let (status, body) = send(&router, request).await;

    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["error"]["code"], "TokenMalformed");
}

#[tokio::test]
async fn garbage_bearer_is_unauthorized() {
    let router = test_router(500);
    let (status, body) = send(&router, bearer_get("/v1.0/users/r1", "not.a.jwt")).await;

    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["error"]["code"], "TokenMalformed");
}

// ── Revocation ─────────────────────────────────────────────────────────────

#[tokio::test]
async fn logout_revokes_the_token() {
    let router = test_router(500);
    let token = login(&router, "k1", "G1").await;

    let (status, body) = send(&router, bearer_post("/auth/logout", &token)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["revoked"], true);

    let (status, body) = send(
        &router,
        bearer_get("/v1.0/users/room-a@x/calendar/events", &token),
    )
    .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["error"]["code"], "TokenRevoked");
}

#[tokio::test]
async fn refresh_rotates_the_token() {
    let router = test_router(500);
    let old_token = login(&router, "k1", "G1").await;

    let (status, body) = send(&router, bearer_post("/auth/refresh", &old_token)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["resourceCount"], 3);
    let new_token = body["token"].as_str().unwrap().to_string();
    assert_ne!(new_token, old_token);

    // The old token is revoked...
    let (status, body) = send(&router, bearer_get("/v1.0/users/bob@x", &old_token)).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["error"]["code"], "TokenRevoked");

    // ...and the new one resolves a scope (a deny proves full resolution)
    let (status, body) = send(&router, bearer_get("/v1.0/users/bob@x", &new_token)).await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(body["error"]["code"], "OutOfScope");
}

// ── Group invalidation ─────────────────────────────────────────────────────

#[tokio::test]
async fn admin_refresh_invalidates_group_scopes() {
    let router = test_router(500);
    let token = login(&router, "k1", "G1").await;

    let (status, body) = send(
        &router,
        bearer_post("/admin/refresh/G1", "admin-secret"),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["groupId"], "G1");
    assert_eq!(body["invalidated"], 1);

    // The still-signed token now resolves to a missing scope
    let (status, body) = send(&router, bearer_get("/v1.0/users/room-a@x", &token)).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["error"]["code"], "ScopeMissing");

    // Re-login restores access
    let token = login(&router, "k1", "G1").await;
    let (status, _) = send(&router, bearer_get("/v1.0/users/bob@x", &token)).await;
    assert_eq!(status, StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn admin_refresh_requires_the_admin_key() {
    let router = test_router(500);

    let (status, body) = send(&router, bearer_post("/admin/refresh/G1", "wrong")).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["error"]["code"], "InvalidCredentials");

    let request = Request::builder()
        .method("POST")
        .uri("/admin/refresh/G1")
        .body(Body::empty())
        .unwrap();
    let (status, _) = send(&router, request).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

// ── Oversize groups ────────────────────────────────────────────────────────

#[tokio::test]
async fn oversize_group_truncates_and_denies_the_tail() {
    let router = test_router(5);
    let (status, body) = send(&router, login_request("k2", "GBIG")).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["resourceCount"], 5);
    let token = body["token"].as_str().unwrap().to_string();

    // A truncated member behaves exactly like an out-of-scope resource
    let (status, body) = send(
        &router,
        bearer_get("/v1.0/users/room-big6@x/calendar/events", &token),
    )
    .await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(body["error"]["code"], "OutOfScope");

    // A kept member passes authorization; the forward itself then fails
    // against the unroutable upstream
    let (status, body) = send(&router, bearer_get("/v1.0/users/room-big0@x", &token)).await;
    assert_eq!(status, StatusCode::BAD_GATEWAY);
    assert_eq!(body["error"]["code"], "UpstreamUnavailable");
}

// ── Health ─────────────────────────────────────────────────────────────────

#[tokio::test]
async fn health_reports_upstream_reachability() {
    let router = test_router(500);
    let request = Request::builder()
        .method("GET")
        .uri("/admin/health")
        .body(Body::empty())
        .unwrap();
    let (status, body) = send(&router, request).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ok");
    assert_eq!(body["upstream"], "reachable");
}
