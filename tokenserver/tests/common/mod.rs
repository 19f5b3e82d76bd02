//! Common test utilities for token server integration tests

#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use axum::http::{header, HeaderName, HeaderValue};
use axum_test::TestServer;
use chrono::Duration as ChronoDuration;
use tokenserver::{
    routes, AppState, ChainWorker, CryptoWorker, MemoryAssignment, TokenIssuer, Verifier,
    WorkerPool,
};
use tokenserver_core::{Assertion, AssertionBundle, Certificate, ClaimsValidator, KeyPair, TrustAnchors};

pub const AUDIENCE: &str = "https://service.example";
pub const ISSUER: &str = "idp.example";
pub const TOKEN_PATH: &str = "/1.0/sync/1.5";
pub const NODES: [&str; 2] = ["https://node1.example", "https://node2.example"];

pub type TestState = AppState<WorkerPool, MemoryAssignment>;

pub struct TestContext {
    pub server: TestServer,
    pub state: Arc<TestState>,
    /// Trusted root for the server's issuer
    pub root: KeyPair,
    /// Key the server signs tokens with
    pub token_key: KeyPair,
}

/// Build a server with a two-worker pool running `worker`
pub fn create_test_server_with<W: CryptoWorker>(worker: W, worker_timeout: Duration) -> TestContext {
    build_server(worker, worker_timeout, ISSUER, &[])
}

/// Build a server whose root is trusted for `issuer`, with extra issuers
/// allowed to vouch for any email domain
pub fn create_test_server_for(issuer: &str, secondary_issuers: &[&str]) -> TestContext {
    build_server(ChainWorker::new(), Duration::from_secs(5), issuer, secondary_issuers)
}

fn build_server<W: CryptoWorker>(
    worker: W,
    worker_timeout: Duration,
    issuer: &str,
    secondary_issuers: &[&str],
) -> TestContext {
    let root = KeyPair::generate();
    let token_key = KeyPair::generate();

    let backend = MemoryAssignment::new();
    for url in NODES {
        tokenserver::NodeAssignment::add_node(&backend, url, 100).unwrap();
    }

    let pool = WorkerPool::start(2, worker).expect("Failed to start worker pool");
    let verifier = Verifier::new(
        pool,
        Arc::new(TrustAnchors::new().with_root(issuer, root.public_key())),
        ClaimsValidator::new(AUDIENCE).with_secondary_issuers(secondary_issuers),
        worker_timeout,
    );
    let state = Arc::new(AppState::new(
        verifier,
        backend,
        TokenIssuer::new(token_key.clone(), Duration::from_secs(300)),
        ["sync/1.5"],
    ));

    let app = routes::create_router(Arc::clone(&state));
    let server = TestServer::new(app).expect("Failed to create test server");

    TestContext {
        server,
        state,
        root,
        token_key,
    }
}

pub fn create_test_server() -> TestContext {
    create_test_server_with(ChainWorker::new(), Duration::from_secs(5))
}

/// Encode a bundle for `email` issued by `ISSUER` under `root`
pub fn make_bundle(root: &KeyPair, email: &str, audience: &str, validity: ChronoDuration) -> String {
    make_bundle_from(root, ISSUER, email, audience, validity)
}

pub fn make_bundle_from(
    root: &KeyPair,
    issuer: &str,
    email: &str,
    audience: &str,
    validity: ChronoDuration,
) -> String {
    let user = KeyPair::generate();
    let cert = Certificate::create(issuer, email, &user.public_key(), ChronoDuration::hours(1), root)
        .unwrap();
    let assertion = Assertion::create(audience, validity, &user).unwrap();
    AssertionBundle::new(cert, assertion).encode()
}

pub fn authorization(value: &str) -> (HeaderName, HeaderValue) {
    (header::AUTHORIZATION, HeaderValue::from_str(value).unwrap())
}

/// `Authorization: BrowserID <assertion>`
pub fn browserid(assertion: &str) -> (HeaderName, HeaderValue) {
    authorization(&format!("BrowserID {}", assertion))
}
