mod common;

use axum::Router;
use axum::body::{Body, to_bytes};
use axum::http::{Request, StatusCode, header};
use serde_json::{Value, json};
use std::sync::Arc;
use tower::ServiceExt;

use common::{coordinator, memory_db, seed, two_option_poll};
use trusty_tally::BatchProcessor;
use trusty_tally::api::{AppState, router};
use trusty_tally::models::Poll;

async fn app(rate_limit: u64, admin_token: Option<&str>) -> (Router, Poll) {
    let db = memory_db().await;
    let poll = seed(&db, two_option_poll()).await;
    let state = AppState {
        coordinator: coordinator(&db).rate_limit(rate_limit).build(),
        batch: BatchProcessor::new(db.clone(), 100),
        admin_token: admin_token.map(str::to_string),
    };
    (router(Arc::new(state)), poll)
}

fn cast(poll_id: &str, body: Value) -> Request<Body> {
    Request::post(format!("/polls/{}/votes", poll_id))
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

async fn json_body(response: axum::response::Response) -> Value {
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

#[tokio::test]
async fn cast_returns_votes_and_results() {
    let (app, poll) = app(10, None).await;
    let body = json!({
        "optionIds": [poll.option_id(0).unwrap()],
        "voterFingerprint": "http-test-fingerprint",
    });

    let response = app.oneshot(cast(&poll.id, body)).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let body = json_body(response).await;
    assert_eq!(body["success"], json!(true));
    assert_eq!(body["votes"].as_array().unwrap().len(), 1);
    assert_eq!(body["results"][0]["voteCount"], json!(1));
    assert_eq!(body["results"][0]["percentage"], json!(100.0));
}

#[tokio::test]
async fn authenticated_header_is_used_as_identity() {
    let (app, poll) = app(10, None).await;
    let request = Request::post(format!("/polls/{}/votes", poll.id))
        .header(header::CONTENT_TYPE, "application/json")
        .header("x-user-id", "u-42")
        .body(Body::from(
            json!({ "optionIds": [poll.option_id(1).unwrap()] }).to_string(),
        ))
        .unwrap();
    app.clone().oneshot(request).await.unwrap();

    let mine = Request::get(format!("/polls/{}/votes", poll.id))
        .header("x-user-id", "u-42")
        .body(Body::empty())
        .unwrap();
    let response = app.oneshot(mine).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let body = json_body(response).await;
    assert_eq!(body["hasVoted"], json!(true));
    assert_eq!(body["votes"][0]["optionId"], json!(poll.option_id(1).unwrap()));
}

#[tokio::test]
async fn unknown_poll_is_404() {
    let (app, poll) = app(10, None).await;
    let body = json!({
        "optionIds": [poll.option_id(0).unwrap()],
        "voterFingerprint": "http-test-fingerprint",
    });

    let response = app.oneshot(cast("missing", body)).await.unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    assert!(json_body(response).await["error"].is_string());
}

#[tokio::test]
async fn malformed_fingerprint_is_400() {
    let (app, poll) = app(10, None).await;
    let body = json!({
        "optionIds": [poll.option_id(0).unwrap()],
        "voterFingerprint": "bad fp!",
    });

    let response = app.oneshot(cast(&poll.id, body)).await.unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn anonymous_without_fingerprint_is_403() {
    let (app, poll) = app(10, None).await;
    let body = json!({ "optionIds": [poll.option_id(0).unwrap()] });

    let response = app.oneshot(cast(&poll.id, body)).await.unwrap();
    assert_eq!(response.status(), StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn over_quota_is_429_with_retry_after() {
    let (app, poll) = app(1, None).await;
    let body = json!({
        "optionIds": [poll.option_id(0).unwrap()],
        "voterFingerprint": "http-test-fingerprint",
    });

    let first = app.clone().oneshot(cast(&poll.id, body.clone())).await.unwrap();
    assert_eq!(first.status(), StatusCode::OK);

    let second = app.oneshot(cast(&poll.id, body)).await.unwrap();
    assert_eq!(second.status(), StatusCode::TOO_MANY_REQUESTS);

    let retry_after: u64 = second
        .headers()
        .get(header::RETRY_AFTER)
        .unwrap()
        .to_str()
        .unwrap()
        .parse()
        .unwrap();
    assert!(retry_after > 0);
    assert_eq!(json_body(second).await["retryAfter"], json!(retry_after));
}

#[tokio::test]
async fn results_endpoint_lists_every_option() {
    let (app, poll) = app(10, None).await;
    let request = Request::get(format!("/polls/{}/results", poll.id))
        .body(Body::empty())
        .unwrap();

    let response = app.oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(json_body(response).await.as_array().unwrap().len(), 2);
}

#[tokio::test]
async fn batch_requires_admin_token() {
    let (app, poll) = app(10, Some("let-me-in")).await;
    let payload = json!({
        "entries": [
            { "optionId": poll.option_id(0).unwrap(), "identity": { "kind": "authenticated", "id": "imported-1" } },
            { "optionId": poll.option_id(1).unwrap(), "identity": { "kind": "anonymous", "id": "imported-fp-2" } },
        ]
    });
    let batch = |token: Option<&str>| {
        let mut request = Request::post(format!("/polls/{}/votes/batch", poll.id))
            .header(header::CONTENT_TYPE, "application/json");
        if let Some(token) = token {
            request = request.header("x-admin-token", token);
        }
        request.body(Body::from(payload.to_string())).unwrap()
    };

    let denied = app.clone().oneshot(batch(None)).await.unwrap();
    assert_eq!(denied.status(), StatusCode::FORBIDDEN);

    let wrong = app.clone().oneshot(batch(Some("guess"))).await.unwrap();
    assert_eq!(wrong.status(), StatusCode::FORBIDDEN);

    let accepted = app.oneshot(batch(Some("let-me-in"))).await.unwrap();
    assert_eq!(accepted.status(), StatusCode::OK);
    let report = json_body(accepted).await;
    assert_eq!(report["processed"], json!(2));
    assert_eq!(report["failed"], json!(0));
}

#[tokio::test]
async fn batch_is_disabled_without_configured_token() {
    let (app, poll) = app(10, None).await;
    let request = Request::post(format!("/polls/{}/votes/batch", poll.id))
        .header(header::CONTENT_TYPE, "application/json")
        .header("x-admin-token", "anything")
        .body(Body::from(json!({ "entries": [] }).to_string()))
        .unwrap();

    let response = app.oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn creator_clears_votes_over_http() {
    let (app, poll) = app(10, None).await;
    let body = json!({
        "optionIds": [poll.option_id(0).unwrap()],
        "voterFingerprint": "http-test-fingerprint",
    });
    app.clone().oneshot(cast(&poll.id, body)).await.unwrap();

    let request = Request::delete(format!("/polls/{}/votes?deleteAll=true", poll.id))
        .header("x-user-id", "creator")
        .body(Body::empty())
        .unwrap();
    let response = app.oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(json_body(response).await["removed"], json!(1));
}
