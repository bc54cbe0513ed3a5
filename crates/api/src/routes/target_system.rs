//! Route definitions for the `/target-systems` resource.

use axum::routing::{get, post};
use axum::Router;

use crate::handlers::target_system;
use crate::state::AppState;

/// Routes mounted at `/target-systems`.
///
/// ```text
/// GET    /                          -> list
/// POST   /                          -> create
/// GET    /types                     -> types
/// GET    /types/{type}/schema       -> type_schema
/// POST   /test-connection-config    -> test_config
/// GET    /{id}                      -> get_by_id
/// PUT    /{id}                      -> update
/// DELETE /{id}                      -> delete
/// POST   /{id}/test-connection      -> test_connection
/// ```
pub fn router() -> Router<AppState> {
    Router::new()
        .route("/", get(target_system::list).post(target_system::create))
        .route("/types", get(target_system::types))
        .route("/types/{type}/schema", get(target_system::type_schema))
        .route("/test-connection-config", post(target_system::test_config))
        .route(
            "/{id}",
            get(target_system::get_by_id)
                .put(target_system::update)
                .delete(target_system::delete),
        )
        .route("/{id}/test-connection", post(target_system::test_connection))
}
