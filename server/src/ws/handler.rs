//! WebSocket upgrade endpoints for UI clients and workers.

use std::net::SocketAddr;

use axum::{
    extract::{ws::WebSocketUpgrade, ConnectInfo, Query, State},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
};
use serde::Deserialize;

use crate::auth::handler::basic_credentials;
use crate::state::AppState;
use crate::ws::actor;

#[derive(Debug, Deserialize)]
pub struct UiQuery {
    /// Route the client wants a worker on
    pub r: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct BotQuery {
    /// Route to register under (Basic auth path)
    pub r: Option<String>,
    /// Single-use registration token (token path; carries its own route)
    pub token: Option<String>,
}

/// GET /ws/ui?r=<route>
/// Upgrade a UI client. No client auth; matching happens lazily on the
/// first inbound frame.
pub async fn ui_upgrade(
    State(state): State<AppState>,
    Query(query): Query<UiQuery>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    ws: WebSocketUpgrade,
) -> Response {
    let Some(route) = query.r.filter(|r| !r.is_empty()) else {
        return StatusCode::BAD_REQUEST.into_response();
    };

    let conf = &state.conf.client_web_socket;
    ws.max_message_size(conf.max_message_size)
        .write_buffer_size(conf.write_buffer_size)
        .on_upgrade(move |socket| actor::run_client(socket, state, route, addr))
}

/// GET /ws/bot?token=<jwt> or GET /ws/bot?r=<route> with Basic auth
/// Upgrade a worker and park it in the pool.
///
/// A single-use token (from POST /bot/auth) carries the route and is bound
/// to the caller's address; otherwise the keychain checks the Basic pair
/// and the route comes from the query.
pub async fn bot_upgrade(
    State(state): State<AppState>,
    Query(query): Query<BotQuery>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
    ws: WebSocketUpgrade,
) -> Response {
    let route = if let Some(token) = query.token {
        match state.issuer.verify(&token, &addr.ip().to_string()) {
            Ok(claims) => claims.route,
            Err(err) => {
                tracing::warn!(addr = %addr, error = %err, "worker token rejected");
                return StatusCode::UNAUTHORIZED.into_response();
            }
        }
    } else {
        let Some((id, secret)) = basic_credentials(&headers) else {
            tracing::warn!(addr = %addr, "worker upgrade without credentials");
            return StatusCode::UNAUTHORIZED.into_response();
        };
        if !state.keychain.verify(&id, &secret) {
            tracing::warn!(addr = %addr, id = %id, "worker upgrade with bad credentials");
            return StatusCode::UNAUTHORIZED.into_response();
        }
        match query.r.filter(|r| !r.is_empty()) {
            Some(route) => route,
            None => return StatusCode::BAD_REQUEST.into_response(),
        }
    };

    let conf = &state.conf.bot_web_socket;
    ws.max_message_size(conf.max_message_size)
        .write_buffer_size(conf.write_buffer_size)
        .on_upgrade(move |socket| actor::run_worker(socket, state, route, addr))
}
