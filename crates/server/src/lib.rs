pub mod api;
pub mod config;
pub mod query;
pub mod range;
pub mod scan;
pub mod state;
pub mod streaming;
pub mod utils;
pub mod watch;

use axum::Router;
use tower_http::request_id::{MakeRequestUuid, SetRequestIdLayer};
use tower_http::trace::TraceLayer;

use api::api_router;
use state::AppState;

pub fn app_router(state: AppState) -> Router {
    api_router(state)
        .layer(SetRequestIdLayer::x_request_id(MakeRequestUuid))
        .layer(TraceLayer::new_for_http())
}
