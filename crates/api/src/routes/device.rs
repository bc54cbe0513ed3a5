//! Route definitions for the `/devices` resource.

use axum::routing::{get, patch, post};
use axum::Router;

use crate::handlers::device;
use crate::state::AppState;

/// Routes mounted at `/devices`.
///
/// ```text
/// GET    /                   -> list (?project_id=)
/// POST   /                   -> create
/// GET    /{id}               -> get_by_id
/// PUT    /{id}               -> update
/// DELETE /{id}               -> delete
/// PATCH  /{id}/toggle        -> toggle
/// POST   /{id}/test          -> test
/// ```
pub fn router() -> Router<AppState> {
    Router::new()
        .route("/", get(device::list).post(device::create))
        .route(
            "/{id}",
            get(device::get_by_id)
                .put(device::update)
                .delete(device::delete),
        )
        .route("/{id}/toggle", patch(device::toggle))
        .route("/{id}/test", post(device::test))
}
