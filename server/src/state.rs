use std::sync::Arc;

use crate::auth::token::TokenIssuer;
use crate::auth::Keychain;
use crate::config::Config;
use crate::ws::pool::WorkerPool;

/// Shared application state passed to all handlers via axum State extractor.
#[derive(Clone)]
pub struct AppState {
    pub conf: Arc<Config>,
    /// Single-use worker registration tokens
    pub issuer: Arc<TokenIssuer>,
    /// Workers waiting to be paired, by route
    pub workers: Arc<WorkerPool>,
    /// Validates worker Basic-auth credentials
    pub keychain: Arc<dyn Keychain>,
}
