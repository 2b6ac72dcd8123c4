/// API routes and handlers
pub mod devices;
pub mod legacy;

use crate::context::AppContext;
use axum::Router;

/// Build API routes
pub fn routes() -> Router<AppContext> {
    Router::new()
        .merge(devices::routes())
        .merge(legacy::routes())
}
