use axum::{
    Json,
    http::{HeaderValue, StatusCode, header::RETRY_AFTER},
    response::{IntoResponse, Response},
};
use serde_json::json;

use crate::error::VoteError;

impl IntoResponse for VoteError {
    fn into_response(self) -> Response {
        let status = match self {
            VoteError::Validation(_) => StatusCode::BAD_REQUEST,
            VoteError::AccessDenied(_) => StatusCode::FORBIDDEN,
            VoteError::PollNotFound => StatusCode::NOT_FOUND,
            VoteError::Expired => StatusCode::GONE,
            VoteError::RateLimited { .. } => StatusCode::TOO_MANY_REQUESTS,
            VoteError::Unavailable => StatusCode::SERVICE_UNAVAILABLE,
            VoteError::Internal => StatusCode::INTERNAL_SERVER_ERROR,
        };

        match self {
            VoteError::RateLimited { retry_after_secs } => {
                let body = Json(json!({
                    "error": self.to_string(),
                    "retryAfter": retry_after_secs,
                }));
                let mut response = (status, body).into_response();
                response
                    .headers_mut()
                    .insert(RETRY_AFTER, HeaderValue::from(retry_after_secs));
                response
            }
            _ => (status, Json(json!({ "error": self.to_string() }))).into_response(),
        }
    }
}
