//! Shared fixtures for integration tests.
//!
//! Servers run over [`MockStorage`] and [`MockMailer`] with a workflow that
//! always issues [`TEST_CODE`], so a test can read the code back from the
//! outbox or just use the constant.

use axum_test::TestServer;
use tiawpao_services::{
    config::Config, database::MockStorage, email::MockMailer, router_with_state, state::AppState,
    verification::VerificationWorkflow,
};

pub const TEST_CODE: &str = "135790";

#[allow(dead_code)]
pub struct TestEnv {
    pub server: TestServer,
    pub storage: MockStorage,
    pub mailer: MockMailer,
    pub config: Config,
}

pub fn test_env() -> TestEnv {
    let storage = MockStorage::new();
    let mailer = MockMailer::new();
    let config = Config::new_for_test();

    let verification =
        VerificationWorkflow::new(storage.clone(), mailer.clone(), config.otp_ttl())
            .with_code_generator(|| TEST_CODE.to_owned());
    let state = AppState::new(storage.clone(), mailer.clone(), verification);
    let server = TestServer::new(router_with_state(state, config.clone()))
        .expect("Failed to start test server");

    TestEnv {
        server,
        storage,
        mailer,
        config,
    }
}

/// Runs the passcode flow for `email` and returns the session token.
#[allow(dead_code)]
pub async fn sign_in(env: &TestEnv, email: &str) -> String {
    env.server
        .get(&format!("/api/v1/user/genotp/{email}"))
        .await
        .assert_status_ok();

    let response = env
        .server
        .post("/api/v1/user/verifyotp")
        .json(&serde_json::json!({ "email": email, "otp": TEST_CODE }))
        .await;
    response.assert_status_ok();

    let body: serde_json::Value = response.json();
    body["token"]
        .as_str()
        .expect("token should be a string")
        .to_owned()
}
