pub mod auth;
pub mod handlers;
pub mod server;
pub mod store;
pub mod vault;

use std::time::Duration;

/// Shared application state threaded through axum handlers.
#[derive(Clone)]
pub struct AppState {
    pub vault: vault::Vault,
    /// Optional API key protecting administrative routes.
    pub api_key: Option<String>,
    /// Upper bound on any single store call made on behalf of a request.
    pub store_timeout: Duration,
}

pub use server::{build_router, resolve_data_dir, run, ServerConfig};
pub use vault::{CreateError, Created, RedeemError, Redemption, Vault};
