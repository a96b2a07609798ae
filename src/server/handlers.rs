//! HTTP handlers.
//!
//! # Endpoints
//!
//! | Method | Path | Description |
//! |--------|------|-------------|
//! | `POST` | `/auth/login` | Exchange API key + group id for a bearer token |
//! | `POST` | `/auth/refresh` | Mint a new token from a live one, revoking the old |
//! | `POST` | `/auth/logout` | Revoke a live token |
//! | `any`  | `/{version}/**` | Transparent scoped proxy (`v1.0`, `beta`) |
//! | `POST` | `/admin/refresh/{groupId}` | Invalidate all cached scopes for a group |
//! | `GET`  | `/admin/health` | Liveness and upstream reachability |
//!
//! Every failure is rendered as the standard error envelope by [`ApiError`];
//! handlers never panic on bad input.

use std::sync::Arc;

use axum::{
    Json,
    body::{Body, Bytes},
    extract::{OriginalUri, Path, State},
    http::{HeaderMap, Method, StatusCode, Uri, header},
    response::{IntoResponse, Response},
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{info, warn};

use super::router::AppState;
use crate::authz::{Decision, decide};
use crate::error::ApiError;
use crate::filter::filter_body;
use crate::scope::Scope;
use crate::token::Claims;
use crate::upstream::{UpstreamBody, UpstreamResponse};
use crate::{Error, Result};

// ── Request / Response types ───────────────────────────────────────────────

/// Login request body.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LoginRequest {
    /// Configured API key
    pub api_key: String,
    /// Group to materialize a scope from
    pub group_id: String,
}

/// Login and refresh response body.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LoginResponse {
    /// Bearer token
    pub token: String,
    /// Group the scope was built from
    pub group_id: String,
    /// Number of resources in the scope
    pub resource_count: usize,
    /// Seconds until the token expires
    pub expires_in: u64,
}

// ── Auth handlers ──────────────────────────────────────────────────────────

/// `POST /auth/login` — exchange `{apiKey, groupId}` for a bearer token.
pub async fn login(
    State(state): State<Arc<AppState>>,
    OriginalUri(uri): OriginalUri,
    body: Bytes,
) -> Response {
    let path = uri.path().to_string();

    let request: LoginRequest = match serde_json::from_slice(&body) {
        Ok(r) => r,
        Err(_) => return ApiError::new(Error::MalformedRequest, path).into_response(),
    };
    if request.api_key.is_empty() || request.group_id.is_empty() {
        return ApiError::new(Error::MalformedRequest, path).into_response();
    }

    let Some(binding) = state.auth.find_binding(&request.api_key) else {
        warn!(group_id = %request.group_id, "Login with unknown API key");
        return ApiError::new(Error::InvalidCredentials, path).into_response();
    };
    if !binding.is_bound_to(&request.group_id) {
        warn!(
            subject = %binding.handle,
            group_id = %request.group_id,
            "API key not bound to requested group"
        );
        return ApiError::new(Error::InvalidCredentials, path).into_response();
    }

    let scope = match state.builder.build(&request.group_id).await {
        Ok(scope) => scope,
        Err(e) => return ApiError::new(e, path).into_response(),
    };
    if scope.resources.is_empty() {
        return ApiError::new(Error::EmptyScope(request.group_id), path).into_response();
    }

    match issue_token(&state, &binding.handle, &scope).await {
        Ok(response) => {
            info!(
                subject = %binding.handle,
                group_id = %response.group_id,
                resource_count = response.resource_count,
                "Login succeeded"
            );
            (StatusCode::OK, Json(response)).into_response()
        }
        Err(e) => ApiError::new(e, path).into_response(),
    }
}

/// `POST /auth/refresh` — mint a new token from a live one, revoking the old.
pub async fn refresh(
    State(state): State<Arc<AppState>>,
    OriginalUri(uri): OriginalUri,
    headers: HeaderMap,
) -> Response {
    let path = uri.path().to_string();

    let (token, claims, scope) = match authenticate(&state, &headers).await {
        Ok(v) => v,
        Err(e) => return ApiError::new(e, path).into_response(),
    };

    let response = match issue_token(&state, &claims.sub, &scope).await {
        Ok(r) => r,
        Err(e) => return ApiError::new(e, path).into_response(),
    };

    // The old token and its cache entry are dead once the new one exists.
    state.tokens.revoke(token);
    state.scopes.remove(&claims.jti).await;

    info!(subject = %claims.sub, group_id = %claims.gid, "Token refreshed");
    (StatusCode::OK, Json(response)).into_response()
}

/// `POST /auth/logout` — revoke a live token.
pub async fn logout(
    State(state): State<Arc<AppState>>,
    OriginalUri(uri): OriginalUri,
    headers: HeaderMap,
) -> Response {
    let path = uri.path().to_string();

    let Some(token) = bearer_token(&headers) else {
        return ApiError::new(Error::TokenMalformed, path).into_response();
    };

    // Best effort: drop the cached scope while the claims are still readable.
    if let Ok(claims) = state.tokens.validate(token) {
        state.scopes.remove(&claims.jti).await;
    }

    if state.tokens.revoke(token) {
        (StatusCode::OK, Json(json!({"revoked": true}))).into_response()
    } else {
        ApiError::new(Error::TokenMalformed, path).into_response()
    }
}

// ── Admin handlers ─────────────────────────────────────────────────────────

/// `POST /admin/refresh/{groupId}` — invalidate all cached scopes for a group.
pub async fn admin_refresh(
    State(state): State<Arc<AppState>>,
    OriginalUri(uri): OriginalUri,
    Path(group_id): Path<String>,
    headers: HeaderMap,
) -> Response {
    let path = uri.path().to_string();

    if !state.auth.check_admin(bearer_token(&headers)) {
        return ApiError::new(Error::InvalidCredentials, path).into_response();
    }

    let invalidated = state.scopes.remove_by_group(&group_id).await;
    info!(group_id = %group_id, invalidated, "Group scopes invalidated");
    (
        StatusCode::OK,
        Json(json!({"groupId": group_id, "invalidated": invalidated})),
    )
        .into_response()
}

/// `GET /admin/health` — liveness and upstream reachability.
pub async fn admin_health(State(state): State<Arc<AppState>>) -> Response {
    match state.directory.probe().await {
        Ok(()) => Json(json!({"status": "ok", "upstream": "reachable"})).into_response(),
        Err(e) => {
            warn!(error = %e, "Upstream probe failed");
            Json(json!({"status": "degraded", "upstream": "unreachable"})).into_response()
        }
    }
}

// ── Proxy handlers ─────────────────────────────────────────────────────────

/// `/v1.0/**` — transparent scoped proxy against the stable surface.
pub async fn proxy_v1(
    State(state): State<Arc<AppState>>,
    Path(rest): Path<String>,
    OriginalUri(uri): OriginalUri,
    method: Method,
    headers: HeaderMap,
    body: Body,
) -> Response {
    proxy(state, "v1.0", rest, &uri, method, headers, body).await
}

/// `/beta/**` — transparent scoped proxy against the beta surface.
pub async fn proxy_beta(
    State(state): State<Arc<AppState>>,
    Path(rest): Path<String>,
    OriginalUri(uri): OriginalUri,
    method: Method,
    headers: HeaderMap,
    body: Body,
) -> Response {
    proxy(state, "beta", rest, &uri, method, headers, body).await
}

/// Common proxy flow: validate → authorize → forward → filter.
async fn proxy(
    state: Arc<AppState>,
    version: &'static str,
    decoded_rest: String,
    uri: &Uri,
    method: Method,
    headers: HeaderMap,
    body: Body,
) -> Response {
    let path = uri.path().to_string();

    let (_token, claims, scope) = match authenticate(&state, &headers).await {
        Ok(v) => v,
        Err(e) => return ApiError::new(e, path).into_response(),
    };

    let decision = decide(&decoded_rest, &scope);
    if let Decision::Deny(ref resource) = decision {
        warn!(
            subject = %claims.sub,
            resource = %resource,
            "Denied out-of-scope request"
        );
        return ApiError::new(Error::OutOfScope(resource.clone()), path).into_response();
    }

    // Forward using the raw (still percent-encoded) remainder of the path.
    let prefix = format!("/{version}/");
    let raw_rest = uri
        .path()
        .strip_prefix(prefix.as_str())
        .unwrap_or(decoded_rest.as_str());

    let buffer = decision == Decision::FilterCollection;
    let upstream = state
        .forwarder
        .forward(
            method,
            version,
            raw_rest,
            uri.query(),
            &headers,
            body,
            buffer,
        )
        .await;

    match upstream {
        Ok(mut response) => {
            if buffer && response.status.is_success() {
                apply_filter(&mut response, &scope);
            }
            into_client_response(response)
        }
        Err(e) => ApiError::new(e, path).into_response(),
    }
}

/// Rewrite a buffered collection body against the scope; non-JSON bodies pass
/// through unchanged.
fn apply_filter(response: &mut UpstreamResponse, scope: &Scope) {
    let UpstreamBody::Buffered(ref bytes) = response.body else {
        return;
    };
    let Some(filtered) = filter_body(bytes, scope) else {
        return;
    };
    response.body = UpstreamBody::Buffered(Bytes::from(filtered));
}

/// Render an upstream response to the client, reattaching the content type
/// the forwarder kept aside.
fn into_client_response(upstream: UpstreamResponse) -> Response {
    let mut headers = upstream.headers;
    if let Some(content_type) = upstream.content_type {
        headers.insert(header::CONTENT_TYPE, content_type);
    }
    match upstream.body {
        UpstreamBody::Buffered(bytes) => {
            (upstream.status, headers, Body::from(bytes)).into_response()
        }
        UpstreamBody::Stream(body) => (upstream.status, headers, body).into_response(),
    }
}

// ── Helpers ────────────────────────────────────────────────────────────────

/// Extract the bearer token from the `Authorization` header.
fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer ").or_else(|| v.strip_prefix("bearer ")))
}

/// Validate the bearer and resolve its scope: signature and window first,
/// then the revocation set, then the cache lookup.
async fn authenticate<'a>(
    state: &AppState,
    headers: &'a HeaderMap,
) -> Result<(&'a str, Claims, Scope)> {
    let token = bearer_token(headers).ok_or(Error::TokenMalformed)?;
    let claims = state.tokens.validate(token)?;
    let scope = state
        .scopes
        .get(&claims.jti)
        .await
        .ok_or(Error::ScopeMissing)?;
    Ok((token, claims, scope))
}

/// Mint a token for `subject` over `scope` and cache the scope under the new
/// token id.
async fn issue_token(
    state: &AppState,
    subject: &str,
    scope: &Scope,
) -> Result<LoginResponse> {
    #[allow(clippy::cast_possible_truncation)]
    let resource_count = scope.resource_count() as u32;
    let minted = state
        .tokens
        .mint(subject, &scope.group_id, resource_count)?;

    state
        .scopes
        .put(&minted.jti, scope.clone(), state.scope_ttl)
        .await;

    Ok(LoginResponse {
        token: minted.token,
        group_id: scope.group_id.clone(),
        resource_count: scope.resource_count(),
        expires_in: minted.expires_in,
    })
}
