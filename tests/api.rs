use std::sync::Arc;
use std::time::Duration;

use axum::body::{to_bytes, Body};
use axum::http::{Method, Request, StatusCode};
use axum::Router;
use serde_json::{json, Value};
use tower::ServiceExt;
use trusty_poll::db::Database;
use trusty_poll::handlers::{router, AppState, ADMIN_HEADER, VOTER_HEADER};
use trusty_poll::PollEngine;

const ADMIN_CODE: &str = "letmein";

async fn app() -> Router {
    let engine = PollEngine::new(Database::in_memory().await.unwrap(), Duration::from_secs(5));
    router(AppState::new(Arc::new(engine), Some(ADMIN_CODE.to_string())))
}

async fn send(
    app: &Router,
    method: Method,
    uri: &str,
    headers: &[(&str, &str)],
    body: Option<Value>,
) -> (StatusCode, Value) {
    let mut request = Request::builder().method(method).uri(uri);
    for (name, value) in headers {
        request = request.header(*name, *value);
    }
    let request = match body {
        Some(body) => request
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap(),
        None => request.body(Body::empty()).unwrap(),
    };

    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let value = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap()
    };
    (status, value)
}

async fn create(app: &Router, allow_anonymous: bool) -> Value {
    let (status, poll) = send(
        app,
        Method::POST,
        "/api/polls",
        &[(ADMIN_HEADER, ADMIN_CODE)],
        Some(json!({ "question": "Best color?", "options": ["Red", "Blue"], "allowAnonymous": allow_anonymous })),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    poll
}

#[tokio::test]
async fn create_returns_full_poll_json() {
    let app = app().await;
    let poll = create(&app, true).await;

    assert!(poll["_id"].is_string());
    assert_eq!(poll["question"], "Best color?");
    assert_eq!(poll["options"], json!([{ "text": "Red", "votes": 0 }, { "text": "Blue", "votes": 0 }]));
    assert_eq!(poll["allowAnonymous"], true);
    assert!(poll["createdAt"].is_string());
    assert!(poll["updatedAt"].is_string());

    let id = poll["_id"].as_str().unwrap();
    let (status, fetched) = send(&app, Method::GET, &format!("/api/polls/{}", id), &[], None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(fetched, poll);

    let (status, listed) = send(&app, Method::GET, "/api/polls", &[], None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(listed, json!([poll]));
}

#[tokio::test]
async fn admin_code_gates_create_and_delete() {
    let app = app().await;
    let body = json!({ "question": "Q", "options": ["a", "b"], "allowAnonymous": true });

    let (status, error) = send(&app, Method::POST, "/api/polls", &[], Some(body.clone())).await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert!(error["message"].is_string());

    let (status, _) = send(&app, Method::POST, "/api/polls", &[(ADMIN_HEADER, "wrong")], Some(body)).await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let poll = create(&app, true).await;
    let uri = format!("/api/polls/{}", poll["_id"].as_str().unwrap());

    let (status, _) = send(&app, Method::DELETE, &uri, &[], None).await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, body) = send(&app, Method::DELETE, &uri, &[(ADMIN_HEADER, ADMIN_CODE)], None).await;
    assert_eq!(status, StatusCode::NO_CONTENT);
    assert_eq!(body, Value::Null);

    let (status, error) = send(&app, Method::GET, &uri, &[], None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert!(error["message"].as_str().unwrap().contains("not found"));
}

#[tokio::test]
async fn vote_clear_and_results_flow() {
    let app = app().await;
    let poll = create(&app, true).await;
    let id = poll["_id"].as_str().unwrap();
    let vote_uri = format!("/api/polls/{}/vote", id);
    let clear_uri = format!("/api/polls/{}/clear-vote", id);

    let (status, updated) = send(
        &app,
        Method::POST,
        &vote_uri,
        &[(VOTER_HEADER, "anon1")],
        Some(json!({ "optionIndex": 0 })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(updated["options"][0]["votes"], 1);

    let (status, _) = send(
        &app,
        Method::POST,
        &vote_uri,
        &[(VOTER_HEADER, "anon2")],
        Some(json!({ "optionIndex": 1 })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    let (status, mine) = send(
        &app,
        Method::GET,
        &format!("/api/polls/{}/my-vote", id),
        &[(VOTER_HEADER, "anon1")],
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(mine, json!({ "optionIndex": 0 }));

    let (status, results) = send(&app, Method::GET, &format!("/api/polls/{}/results", id), &[], None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(results["totalVotes"], 2);
    assert_eq!(results["options"][0]["percentage"], 50.0);
    assert_eq!(results["leaders"], json!([0, 1]));

    let (status, cleared) = send(
        &app,
        Method::POST,
        &clear_uri,
        &[(VOTER_HEADER, "anon1")],
        Some(json!({ "optionIndex": 0 })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(cleared["options"], json!([{ "text": "Red", "votes": 0 }, { "text": "Blue", "votes": 1 }]));
}

#[tokio::test]
async fn vote_errors_map_to_statuses_with_messages() {
    let app = app().await;
    let anon = create(&app, true).await;
    let named = create(&app, false).await;
    let anon_vote = format!("/api/polls/{}/vote", anon["_id"].as_str().unwrap());
    let anon_clear = format!("/api/polls/{}/clear-vote", anon["_id"].as_str().unwrap());
    let named_vote = format!("/api/polls/{}/vote", named["_id"].as_str().unwrap());
    let voter = [(VOTER_HEADER, "anon1")];

    // Identified poll without an identity.
    let (status, error) = send(&app, Method::POST, &named_vote, &[], Some(json!({ "optionIndex": 0 }))).await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert!(error["message"].as_str().unwrap().contains("log in"));

    // Out of range and negative indices.
    let (status, _) = send(&app, Method::POST, &anon_vote, &voter, Some(json!({ "optionIndex": 2 }))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    let (status, _) = send(&app, Method::POST, &anon_vote, &voter, Some(json!({ "optionIndex": -1 }))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    // Malformed body.
    let (status, error) = send(&app, Method::POST, &anon_vote, &voter, Some(json!({ "option": "Red" }))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(error["message"].is_string());

    // Clearing before voting.
    let (status, error) = send(&app, Method::POST, &anon_clear, &voter, Some(json!({ "optionIndex": 0 }))).await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(error["message"], "You have not voted yet.");

    let (status, _) = send(&app, Method::POST, &anon_vote, &voter, Some(json!({ "optionIndex": 0 }))).await;
    assert_eq!(status, StatusCode::OK);

    let (status, error) = send(&app, Method::POST, &anon_vote, &voter, Some(json!({ "optionIndex": 0 }))).await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(error["message"], "You have already voted for this option.");

    let (status, error) = send(&app, Method::POST, &anon_vote, &voter, Some(json!({ "optionIndex": 1 }))).await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(
        error["message"],
        "You have already voted. Clear your response to change your vote."
    );

    let (status, _) = send(&app, Method::POST, &anon_clear, &voter, Some(json!({ "optionIndex": 1 }))).await;
    assert_eq!(status, StatusCode::CONFLICT);

    let (status, _) = send(&app, Method::POST, "/api/polls/missing/vote", &voter, Some(json!({ "optionIndex": 0 }))).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn create_validation_errors_are_bad_requests() {
    let app = app().await;
    let admin = [(ADMIN_HEADER, ADMIN_CODE)];

    let (status, error) = send(
        &app,
        Method::POST,
        "/api/polls",
        &admin,
        Some(json!({ "question": "Q", "options": ["only one"], "allowAnonymous": true })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(error["message"].is_string());

    let (status, _) = send(
        &app,
        Method::POST,
        "/api/polls",
        &admin,
        Some(json!({ "question": " ", "options": ["a", "b"] })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, poll) = send(
        &app,
        Method::POST,
        "/api/polls",
        &admin,
        Some(json!({ "question": "Default?", "options": ["a", "b"] })),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(poll["allowAnonymous"], true);
}

#[tokio::test]
async fn health_is_ok() {
    let app = app().await;
    let (status, body) = send(&app, Method::GET, "/health", &[], None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ok");
}
