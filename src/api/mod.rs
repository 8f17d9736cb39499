use axum::{
    Router,
    http::{Method, header::CONTENT_TYPE},
    routing::{get, post},
};
use std::sync::Arc;
use std::time::Duration;
use tower_http::cors::CorsLayer;

use crate::batch::BatchProcessor;
use crate::coordinator::VoteCoordinator;

mod error;
mod handlers;

/// Header carrying the user id vouched for by the upstream authentication
/// provider. Requests without it are anonymous.
pub const USER_ID_HEADER: &str = "x-user-id";
pub const ADMIN_TOKEN_HEADER: &str = "x-admin-token";

pub struct AppState {
    pub coordinator: VoteCoordinator,
    pub batch: BatchProcessor,
    pub admin_token: Option<String>,
}

pub fn router(state: Arc<AppState>) -> Router {
    let cors = CorsLayer::new()
        .allow_methods([Method::GET, Method::POST, Method::DELETE, Method::OPTIONS])
        .allow_headers([CONTENT_TYPE])
        .max_age(Duration::from_secs(60 * 60));

    Router::new()
        .route(
            "/polls/:poll_id/votes",
            post(handlers::cast_vote)
                .get(handlers::my_votes)
                .delete(handlers::remove_votes),
        )
        .route("/polls/:poll_id/votes/batch", post(handlers::batch_cast))
        .route("/polls/:poll_id/results", get(handlers::results))
        .layer(cors)
        .with_state(state)
}
