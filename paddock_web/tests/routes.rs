use std::convert::Infallible;
use std::path::PathBuf;
use std::time::Duration;

use axum::{
    body::Body,
    http::{
        header::{CONTENT_TYPE, LOCATION},
        Request, StatusCode,
    },
    response::IntoResponse,
    routing::get,
    Json, Router,
};
use futures::stream;
use http_body_util::BodyExt;
use paddock_core::{
    parallel, policy_fn, Outcome, PaddockConfig, Pipeline, PolicyLoader, RoutePolicies, Stage,
};
use paddock_web::{demo, enforce::MAX_BUFFERED_BODY, with_policies, PolicyState};
use serde_json::{json, Value};
use tower::ServiceExt;

fn state() -> PolicyState {
    let config = PaddockConfig {
        policy_directory: PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("../policies"),
        watch_stages: vec![Stage::PreHandler],
        ..PaddockConfig::default()
    };
    let state = PolicyState::new(Pipeline::load(&config, &PolicyLoader::default()).unwrap());
    state
        .registry()
        .register_policy("moonInPhase", policy_fn(|_| async { Ok(Outcome::Continue) }))
        .unwrap();
    state
}

async fn get_response(app: Router, uri: &str) -> (StatusCode, Vec<u8>) {
    let response = app
        .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
        .await
        .unwrap();
    let status = response.status();
    let body = response.into_body().collect().await.unwrap().to_bytes().to_vec();
    (status, body)
}

fn as_json(body: &[u8]) -> Value {
    serde_json::from_slice(body).unwrap()
}

#[tokio::test]
async fn index_has_no_policies() {
    let (status, body) = get_response(demo::app(&state()), "/").await;
    assert_eq!(status, StatusCode::OK);
    assert!(String::from_utf8(body).unwrap().contains("/loggedin"));
}

#[tokio::test]
async fn logged_in_route() {
    let app = demo::app(&state());

    let (status, body) = get_response(app.clone(), "/loggedin").await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(
        as_json(&body),
        json!({"statusCode": 403, "error": "Forbidden", "message": "Forbidden"})
    );

    let (status, body) = get_response(app, "/loggedin?loggedin=true").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, b"You are logged in.");
}

#[tokio::test]
async fn admin_route_mixes_policies() {
    let app = demo::app(&state());

    let (status, body) = get_response(app.clone(), "/admin?loggedin=true").await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(as_json(&body)["message"], "You are not an admin");

    let (status, _) = get_response(app, "/admin?loggedin=true&admin=true").await;
    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn admin_night_runs_group_in_parallel() {
    let app = demo::app(&state());

    let (status, _) = get_response(app.clone(), "/adminnight?admin=true").await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, _) = get_response(app, "/adminnight?loggedin=true&admin=true").await;
    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn analytics_are_added_after_the_handler() {
    let (status, body) = get_response(demo::app(&state()), "/addanalytics").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(
        as_json(&body),
        json!({
            "data": "this could be cached",
            "analytics": "this is the added analytics data",
        })
    );
}

#[tokio::test]
async fn misspelled_policy_is_not_implemented() {
    let state = state();
    let app = Router::new().route(
        "/misspelled",
        with_policies(get(|| async { "unreachable" }), RoutePolicies::new().name("misspelled"), &state),
    );

    let (status, body) = get_response(app, "/misspelled").await;
    assert_eq!(status, StatusCode::NOT_IMPLEMENTED);
    assert_eq!(as_json(&body)["message"], "Missing policy: misspelled");
}

#[tokio::test]
async fn redirect_and_header_policies() {
    let state = state();
    let app = Router::new()
        .route(
            "/private",
            with_policies(get(|| async { "private" }), RoutePolicies::new().name("goToLogin"), &state),
        )
        .route(
            "/api",
            with_policies(get(|| async { "api" }), RoutePolicies::new().name("hasApiKey"), &state),
        );

    let response = app
        .clone()
        .oneshot(Request::builder().uri("/private").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::FOUND);
    assert_eq!(response.headers()[LOCATION], "/login");

    let (status, body) = get_response(app.clone(), "/api").await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(as_json(&body)["message"], "An API key is required");

    let response = app
        .oneshot(
            Request::builder()
                .uri("/api")
                .header("x-api-key", "secret")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn bearer_credentials_reach_post_auth_policies() {
    let state = state();
    assert_eq!(state.registry().stage_of("isAuthenticated"), Some(Stage::PostAuth));

    let app = Router::new().route(
        "/me",
        with_policies(
            get(|| async { Json(json!({"me": true})) }),
            RoutePolicies::new().name("isAuthenticated"),
            &state,
        ),
    );

    let (status, _) = get_response(app.clone(), "/me").await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let response = app
        .oneshot(
            Request::builder()
                .uri("/me")
                .header("authorization", "Bearer token")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn inline_aggregate_on_a_route() {
    let state = state();
    let app = Router::new().route(
        "/both",
        with_policies(
            get(|| async { Json(json!({"ok": true})) }),
            RoutePolicies::new().inline(parallel(["isLoggedIn", "isAnAdmin"]).unwrap()),
            &state,
        ),
    );

    let (status, body) = get_response(app.clone(), "/both?loggedin=true").await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(as_json(&body)["message"], "You are not an admin");

    let (status, body) = get_response(app, "/both?loggedin=true&admin=true").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(as_json(&body), json!({"ok": true}));
}

async fn events() -> impl IntoResponse {
    let ticks = stream::unfold(0u64, |n| async move {
        tokio::time::sleep(Duration::from_millis(10)).await;
        Some((Ok::<_, Infallible>(format!("data: {}\n\n", n)), n + 1))
    });
    ([(CONTENT_TYPE, "text/event-stream")], Body::from_stream(ticks))
}

#[tokio::test]
async fn guarded_event_stream_is_not_buffered() {
    let state = state();
    assert!(state.pipeline().is_intercepting(Stage::PostHandler));
    let app = Router::new().route(
        "/events",
        with_policies(get(events), RoutePolicies::new().name("isLoggedIn"), &state),
    );

    let (status, _) = get_response(app.clone(), "/events").await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let first = tokio::time::timeout(Duration::from_secs(2), async {
        let response = app
            .oneshot(
                Request::builder()
                    .uri("/events?loggedin=true")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let mut body = response.into_body();
        body.frame().await.unwrap().unwrap().into_data().unwrap()
    })
    .await
    .expect("stream should start before the timeout");
    assert_eq!(&first[..], b"data: 0\n\n");
}

#[tokio::test]
async fn json_passes_through_when_no_post_handler_stage_is_wired() {
    let pipeline = Pipeline::new(&PaddockConfig::default());
    pipeline
        .registry()
        .register_policy("passes", policy_fn(|_| async { Ok(Outcome::Continue) }))
        .unwrap();
    let state = PolicyState::new(pipeline);
    assert!(!state.pipeline().is_intercepting(Stage::PostHandler));

    let app = Router::new().route(
        "/data",
        with_policies(
            get(|| async { Json(json!({"data": 1})) }),
            RoutePolicies::new().name("passes"),
            &state,
        ),
    );
    let (status, body) = get_response(app, "/data").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(as_json(&body), json!({"data": 1}));
}

#[tokio::test]
async fn oversized_json_is_not_buffered_without_bound() {
    let state = state();
    let app = Router::new().route(
        "/large",
        with_policies(
            get(|| async { Json(json!({"blob": "x".repeat(MAX_BUFFERED_BODY)})) }),
            RoutePolicies::new().name("addAnalytics"),
            &state,
        ),
    );
    let (status, _) = get_response(app, "/large").await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
}
