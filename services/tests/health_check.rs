mod common;

use axum::http::StatusCode;
use axum_test::TestServer;
use tiawpao_services::{
    config::Config, database::MockStorage, email::MockMailer, routes, service_version,
};

#[tokio::test]
async fn test_health_check_integration() {
    // Case 1: Connected
    let env = common::test_env();
    let response = env.server.get("/is-health").await;
    response.assert_status(StatusCode::OK);
    assert_eq!(response.header("x-service-env"), "local");
    assert_eq!(response.header("x-service-version"), service_version().as_str());

    // Case 2: Disconnected
    let storage = MockStorage::disconnected();
    let app = routes(storage, MockMailer::new(), Config::new_for_test());
    let server = TestServer::new(app).expect("Failed to start test server");

    let response = server.get("/is-health").await;
    response.assert_status(StatusCode::BAD_GATEWAY);
}
