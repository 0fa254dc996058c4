pub mod actor;
pub mod handler;
pub mod pool;

/// Sent to a client whose frame arrived with no worker waiting on the route.
pub const NO_PEER: &str = r#"{"t":"e","e":"no-peer"}"#;

/// Sent to a client whose paired worker was dropped for falling behind.
pub const PEER_DIED: &str = r#"{"t":"e","e":"peer-died"}"#;
