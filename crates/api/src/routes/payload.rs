//! Route definitions for the `/payloads` resource.

use axum::routing::{get, post};
use axum::Router;

use crate::handlers::payload;
use crate::state::AppState;

/// Routes mounted at `/payloads`.
///
/// ```text
/// GET    /                   -> list
/// POST   /                   -> create
/// POST   /validate           -> validate
/// POST   /test-python        -> test_python
/// GET    /{id}               -> get_by_id
/// PUT    /{id}               -> update
/// DELETE /{id}               -> delete
/// POST   /{id}/generate      -> generate
/// ```
pub fn router() -> Router<AppState> {
    Router::new()
        .route("/", get(payload::list).post(payload::create))
        .route("/validate", post(payload::validate))
        .route("/test-python", post(payload::test_python))
        .route(
            "/{id}",
            get(payload::get_by_id)
                .put(payload::update)
                .delete(payload::delete),
        )
        .route("/{id}/generate", post(payload::generate))
}
