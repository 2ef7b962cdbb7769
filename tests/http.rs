mod common;

use std::time::Duration;

use axum::{
    Router,
    body::Body,
    http::{
        Method, Request, StatusCode,
        header::{CONTENT_LENGTH, CONTENT_TYPE},
    },
};
use http_body_util::BodyExt;
use thumbgen::{
    domain::signature::parse_source,
    infra::http::{HttpState, build_probe_router, build_router},
};
use tower::ServiceExt;

use common::{CountingStore, FRAME, RecordingExtractor, SOURCE, pool};

fn router(default_source: Option<&str>) -> (Router, std::sync::Arc<RecordingExtractor>) {
    let extractor = RecordingExtractor::new();
    let pool = pool(
        Duration::from_secs(60),
        CountingStore::new(),
        extractor.clone(),
    );
    let default_source = default_source.map(|value| parse_source(value).expect("default url"));
    (
        build_router(HttpState::new(pool, default_source)),
        extractor,
    )
}

fn request(uri: &str, source: Option<&str>) -> Request<Body> {
    let mut builder = Request::builder().method(Method::GET).uri(uri);
    if let Some(source) = source {
        builder = builder.header("X-Source-Url", source);
    }
    builder.body(Body::empty()).expect("request should build")
}

async fn body_bytes(response: axum::response::Response) -> Vec<u8> {
    response
        .into_body()
        .collect()
        .await
        .expect("body should collect")
        .to_bytes()
        .to_vec()
}

#[tokio::test]
async fn thumbnail_is_served_with_image_headers() {
    let (app, extractor) = router(None);

    let response = app
        .oneshot(request("/?offset=300", Some(SOURCE)))
        .await
        .expect("router should respond");

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        response.headers().get(CONTENT_TYPE).and_then(|v| v.to_str().ok()),
        Some("image/webp")
    );
    assert_eq!(
        response
            .headers()
            .get(CONTENT_LENGTH)
            .and_then(|v| v.to_str().ok()),
        Some(FRAME.len().to_string().as_str())
    );
    assert_eq!(body_bytes(response).await, FRAME);
    assert_eq!(extractor.calls(), 1);
}

#[tokio::test]
async fn repeated_requests_reuse_the_generator() {
    let (app, extractor) = router(None);

    for _ in 0..3 {
        let response = app
            .clone()
            .oneshot(request("/", Some(SOURCE)))
            .await
            .expect("router should respond");
        assert_eq!(response.status(), StatusCode::OK);
    }

    assert_eq!(extractor.calls(), 1);
}

#[tokio::test]
async fn unsupported_format_is_a_server_error() {
    let (app, extractor) = router(None);

    let response = app
        .oneshot(request("/?format=png", Some(SOURCE)))
        .await
        .expect("router should respond");

    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(body_bytes(response).await, b"Failed to generate thumbnail");
    assert_eq!(extractor.calls(), 0);
}

#[tokio::test]
async fn missing_source_is_a_server_error() {
    let (app, _) = router(None);

    let response = app
        .oneshot(request("/", None))
        .await
        .expect("router should respond");

    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
}

#[tokio::test]
async fn malformed_offset_is_a_server_error() {
    let (app, extractor) = router(None);

    let response = app
        .oneshot(request("/?offset=soon", Some(SOURCE)))
        .await
        .expect("router should respond");

    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(extractor.calls(), 0);
}

#[tokio::test]
async fn configured_source_ignores_request_header() {
    let (app, extractor) = router(Some("https://cdn.example.com/fixed.mp4"));

    let response = app
        .oneshot(request("/", Some("http://elsewhere.example.com/other.mp4")))
        .await
        .expect("router should respond");
    assert_eq!(response.status(), StatusCode::OK);

    let args = extractor.invocations().remove(0);
    assert!(args.iter().any(|arg| arg == "https://cdn.example.com/fixed.mp4"));
    assert!(!args.iter().any(|arg| arg.contains("elsewhere")));
}

#[tokio::test]
async fn favicon_is_not_found() {
    let (app, extractor) = router(None);

    let response = app
        .oneshot(request("/favicon.ico", Some(SOURCE)))
        .await
        .expect("router should respond");

    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    assert_eq!(extractor.calls(), 0);
}

#[tokio::test]
async fn probes_report_ok() {
    let app = build_probe_router();

    for uri in ["/liveness", "/readiness"] {
        let response = app
            .clone()
            .oneshot(request(uri, None))
            .await
            .expect("router should respond");
        assert_eq!(response.status(), StatusCode::OK, "probe {uri}");
    }
}
