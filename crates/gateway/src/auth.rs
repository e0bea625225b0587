use {
    axum::{
        extract::{Request, State},
        http::{StatusCode, header},
        middleware::Next,
        response::{IntoResponse, Response},
    },
    tracing::debug,
};

use crate::{response::ApiResponse, state::AppState};

/// Environment variable overriding `server.api_token`.
pub const TOKEN_ENV: &str = "WAHUB_TOKEN";

// ── Types ────────────────────────────────────────────────────────────────────

/// Resolved API auth configuration. No token means the API is open.
#[derive(Debug, Clone, Default)]
pub struct ResolvedAuth {
    pub token: Option<String>,
}

/// Result of an authentication attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthResult {
    pub ok: bool,
    pub reason: Option<&'static str>,
}

impl AuthResult {
    fn allow() -> Self {
        Self {
            ok: true,
            reason: None,
        }
    }

    fn deny(reason: &'static str) -> Self {
        Self {
            ok: false,
            reason: Some(reason),
        }
    }
}

// ── Helpers ──────────────────────────────────────────────────────────────────

/// Constant-time string comparison.
fn safe_equal(a: &str, b: &str) -> bool {
    if a.len() != b.len() {
        return false;
    }
    let diff = a
        .as_bytes()
        .iter()
        .zip(b.as_bytes())
        .fold(0u8, |acc, (x, y)| acc | (x ^ y));
    diff == 0
}

fn bearer(value: &str) -> Option<&str> {
    let (scheme, token) = value.split_once(' ')?;
    scheme.eq_ignore_ascii_case("bearer").then(|| token.trim())
}

// ── Auth logic ───────────────────────────────────────────────────────────────

/// The environment token wins over the configured one. Empty values count
/// as unset.
pub fn resolve_auth(env_token: Option<String>, config_token: Option<String>) -> ResolvedAuth {
    let token = env_token
        .filter(|t| !t.is_empty())
        .or_else(|| config_token.filter(|t| !t.is_empty()));
    ResolvedAuth { token }
}

/// Check an `Authorization` header value against the configured token.
pub fn authorize(auth: &ResolvedAuth, authorization: Option<&str>) -> AuthResult {
    let Some(expected) = auth.token.as_deref() else {
        return AuthResult::allow();
    };
    let Some(given) = authorization.and_then(bearer) else {
        return AuthResult::deny("token_missing");
    };
    if !safe_equal(given, expected) {
        return AuthResult::deny("token_mismatch");
    }
    AuthResult::allow()
}

/// Middleware guarding the account API.
pub async fn require_token(State(state): State<AppState>, request: Request, next: Next) -> Response {
    let authorization = request
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok());
    let result = authorize(&state.gateway.auth, authorization);
    if !result.ok {
        debug!(reason = result.reason, path = %request.uri().path(), "rejected API request");
        return ApiResponse::failure(StatusCode::UNAUTHORIZED, "UNAUTHORIZED", "Unauthorized")
            .into_response();
    }
    next.run(request).await
}
