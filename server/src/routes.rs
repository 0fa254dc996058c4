use axum::{extract::DefaultBodyLimit, routing::get, routing::post, Router};
use tower_http::services::ServeDir;

use crate::auth::handler::{self, AUTH_BODY_LIMIT};
use crate::state::AppState;
use crate::ws;

/// Build the full axum Router, mounted under the configured base URL.
///
/// Plain GETs that match no route fall through to the static file tree at
/// `WebRoot`; the file service answers non-GET methods with 405 and missing
/// files with 404.
pub fn build_router(state: AppState) -> Router {
    let app = Router::new()
        .route("/ws/ui", get(ws::handler::ui_upgrade))
        .route("/ws/bot", get(ws::handler::bot_upgrade))
        .route(
            "/bot/auth",
            post(handler::bot_auth).layer(DefaultBodyLimit::max(AUTH_BODY_LIMIT)),
        )
        .fallback_service(ServeDir::new(&state.conf.web_root))
        .with_state(state.clone());

    let base = state.conf.base_url.trim_end_matches('/');
    if base.is_empty() {
        app
    } else {
        Router::new().nest(base, app)
    }
}
