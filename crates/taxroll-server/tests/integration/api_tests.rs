use axum::body::Body;
use axum::http::{Request, StatusCode};
use http_body_util::BodyExt;
use tower::ServiceExt;

use taxroll_core::models::PropertyRecord;
use taxroll_core::testutil::make_test_record;

use crate::integration::common::setup_test_app;

async fn get(router: axum::Router, uri: &str) -> (StatusCode, serde_json::Value) {
    let response = router
        .oneshot(Request::get(uri).body(Body::empty()).unwrap())
        .await
        .unwrap();
    let status = response.status();
    let body = response.into_body().collect().await.unwrap().to_bytes();
    (status, serde_json::from_slice(&body).unwrap())
}

#[tokio::test]
async fn health_returns_200() {
    let app = setup_test_app().await;

    let (status, json) = get(app.router, "/health").await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["status"], "healthy");
    assert_eq!(json["database"], "ok");
}

#[tokio::test]
async fn version_reports_crate_version() {
    let app = setup_test_app().await;

    let (status, json) = get(app.router, "/version").await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["name"], "taxroll-server");
    assert_eq!(json["version"], env!("CARGO_PKG_VERSION"));
}

#[tokio::test]
async fn stored_property_is_returned_in_full() {
    let app = setup_test_app().await;
    let record = make_test_record(4242);
    app.db.property_repo().persist(&record).await.unwrap();

    let (status, json) = get(app.router, "/v1/properties/4242").await;

    assert_eq!(status, StatusCode::OK);
    let returned: PropertyRecord = serde_json::from_value(json).unwrap();
    assert_eq!(returned, record);
}

#[tokio::test]
async fn missing_property_returns_404() {
    let app = setup_test_app().await;

    let (status, json) = get(app.router, "/v1/properties/999").await;

    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(json["error"], "not_found");
}

#[tokio::test]
async fn non_numeric_id_returns_400() {
    let app = setup_test_app().await;

    let (status, json) = get(app.router, "/v1/properties/abc").await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(json["error"], "malformed_input");
}
