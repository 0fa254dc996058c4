//! Token issuance endpoint and HTTP Basic credential parsing.

use std::net::SocketAddr;

use axum::{
    body::Bytes,
    extract::{rejection::BytesRejection, ConnectInfo, State},
    http::{header, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use serde::{Deserialize, Serialize};

use crate::state::AppState;

/// Request body cap for token issuance, 8 KiB.
pub const AUTH_BODY_LIMIT: usize = 1 << 13;

#[derive(Debug, Deserialize)]
pub struct BotAuthRequest {
    pub route: String,
}

/// RFC 6749 §5.1 access token response.
#[derive(Debug, Serialize)]
pub struct BotAuthResponse {
    pub access_token: String,
    pub token_type: String,
    /// Lifetime in seconds
    pub expires_in: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub scope: Option<String>,
}

/// POST /bot/auth
/// Issue a single-use registration token for a keychain-authenticated worker.
pub async fn bot_auth(
    State(state): State<AppState>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
    body: Result<Bytes, BytesRejection>,
) -> Response {
    let Some((id, secret)) = basic_credentials(&headers) else {
        tracing::warn!(addr = %addr, "token request without basic auth");
        return StatusCode::UNAUTHORIZED.into_response();
    };
    if !state.keychain.verify(&id, &secret) {
        tracing::warn!(addr = %addr, id = %id, "token request with bad credentials");
        return StatusCode::UNAUTHORIZED.into_response();
    }

    // An over-limit body surfaces as an extractor rejection; it is a
    // request-shape problem like malformed JSON, not a server fault.
    let Ok(body) = body else {
        return StatusCode::BAD_REQUEST.into_response();
    };
    let req: BotAuthRequest = match serde_json::from_slice(&body) {
        Ok(req) => req,
        Err(err) => {
            tracing::warn!(addr = %addr, error = %err, "malformed token request body");
            return StatusCode::BAD_REQUEST.into_response();
        }
    };

    if req.route.is_empty() || clean_path(&req.route) != req.route {
        tracing::warn!(addr = %addr, route = %req.route, "malformed route");
        return StatusCode::BAD_REQUEST.into_response();
    }

    let token = match state.issuer.issue(&id, &addr.ip().to_string(), &req.route) {
        Ok(token) => token,
        Err(err) => {
            tracing::error!(error = %err, "token issue failed");
            return StatusCode::INTERNAL_SERVER_ERROR.into_response();
        }
    };

    tracing::debug!(addr = %addr, id = %id, route = %req.route, "token issued");
    Json(BotAuthResponse {
        access_token: token,
        token_type: "Bearer".to_string(),
        expires_in: state.issuer.ttl().as_secs(),
        refresh_token: None,
        scope: None,
    })
    .into_response()
}

/// Extract an (id, secret) pair from an `Authorization: Basic` header.
pub fn basic_credentials(headers: &HeaderMap) -> Option<(String, String)> {
    let value = headers.get(header::AUTHORIZATION)?.to_str().ok()?;
    let encoded = value.strip_prefix("Basic ")?;
    let decoded = BASE64.decode(encoded).ok()?;
    let decoded = String::from_utf8(decoded).ok()?;
    let (id, secret) = decoded.split_once(':')?;
    Some((id.to_string(), secret.to_string()))
}

/// Lexically clean a slash-separated path: collapse repeated separators and
/// resolve `.` and `..` segments. The route in a token request must already
/// be in this form, which rules out traversal spellings of the same label.
pub fn clean_path(path: &str) -> String {
    if path.is_empty() {
        return ".".to_string();
    }
    let rooted = path.starts_with('/');

    let mut segments: Vec<&str> = Vec::new();
    for segment in path.split('/') {
        match segment {
            "" | "." => {}
            ".." => {
                if segments.last().is_some_and(|s| *s != "..") {
                    segments.pop();
                } else if !rooted {
                    segments.push("..");
                }
            }
            s => segments.push(s),
        }
    }

    let joined = segments.join("/");
    if rooted {
        format!("/{}", joined)
    } else if joined.is_empty() {
        ".".to_string()
    } else {
        joined
    }
}
