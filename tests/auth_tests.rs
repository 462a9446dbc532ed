//! Integration tests for the login flows against a mock API server.

use std::sync::{Arc, Once};

use serde_json::json;
use tracing_subscriber::EnvFilter;
use wiremock::matchers::{body_json, header_exists, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use traderepublic_rs::auth::{
    AuthStateKind, DeviceKey, MemoryTokenStore, NegotiatorConfig, ResetConfirmation,
    SessionNegotiator, TokenStore,
};
use traderepublic_rs::{ClientConfig, Credentials, Endpoints, Error, LoginMode};

static INIT: Once = Once::new();

fn init_logging() {
    INIT.call_once(|| {
        tracing_subscriber::fmt()
            .with_env_filter(EnvFilter::from_default_env())
            .with_test_writer()
            .try_init()
            .ok();
    });
}

fn config_for(server: &MockServer) -> ClientConfig {
    ClientConfig::default().with_endpoints(Endpoints::custom(server.uri(), "ws://127.0.0.1:9"))
}

fn credentials() -> Credentials {
    Credentials::new("+4917612345678", "1234")
}

fn negotiator(
    server: &MockServer,
    store: Arc<MemoryTokenStore>,
    config: NegotiatorConfig,
) -> SessionNegotiator {
    SessionNegotiator::new(credentials(), store, config, &config_for(server)).unwrap()
}

#[tokio::test]
async fn test_web_login_with_code() {
    init_logging();
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/v1/auth/web/login"))
        .and(body_json(json!({"phoneNumber": "+4917612345678", "pin": "1234"})))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!({"processId": "proc-1", "countdownInSeconds": 0})),
        )
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/api/v1/auth/web/login/proc-1/0000"))
        .respond_with(ResponseTemplate::new(400).set_body_json(json!({
            "errors": [{"errorCode": "VALIDATION_CODE_INVALID", "errorMessage": "wrong code"}]
        })))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/api/v1/auth/web/login/proc-1/4321"))
        .respond_with(
            ResponseTemplate::new(200).insert_header("set-cookie", "tr_session=s3cr3t; Path=/"),
        )
        .mount(&server)
        .await;

    let store = Arc::new(MemoryTokenStore::new());
    let mut negotiator = negotiator(&server, store.clone(), NegotiatorConfig::web());

    assert!(!negotiator.resume_session().await.unwrap());
    assert_eq!(negotiator.begin_web_login().await.unwrap(), 0);
    assert_eq!(negotiator.state(), AuthStateKind::AwaitingCode);

    let err = negotiator.complete_web_login("0000").await.unwrap_err();
    assert!(matches!(err, Error::Authentication(ref m) if m == "wrong code"));
    assert_eq!(negotiator.state(), AuthStateKind::AwaitingCode);

    let session = negotiator.complete_web_login("4321").await.unwrap();
    assert_eq!(session.mode(), LoginMode::Web);
    assert_eq!(negotiator.state(), AuthStateKind::Authenticated);

    let stored = store.load_session_token().unwrap().unwrap();
    assert!(String::from_utf8(stored).unwrap().contains("tr_session=s3cr3t"));
}

#[tokio::test]
async fn test_resume_stored_session() {
    init_logging();
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/v1/auth/web/session"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({})))
        .expect(1)
        .mount(&server)
        .await;

    let store = Arc::new(MemoryTokenStore::with_session_token("tr_session=stored"));
    let mut negotiator = negotiator(&server, store, NegotiatorConfig::web());

    assert!(negotiator.resume_session().await.unwrap());
    assert_eq!(negotiator.session().unwrap().mode(), LoginMode::Web);
}

#[tokio::test]
async fn test_resume_rejected_session() {
    init_logging();
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/v1/auth/web/session"))
        .respond_with(ResponseTemplate::new(401))
        .mount(&server)
        .await;

    let store = Arc::new(MemoryTokenStore::with_session_token("tr_session=expired"));
    let mut negotiator = negotiator(&server, store, NegotiatorConfig::web());

    assert!(!negotiator.resume_session().await.unwrap());
    assert_eq!(negotiator.state(), AuthStateKind::Unauthenticated);
}

#[tokio::test]
async fn test_begin_login_rejected_credentials() {
    init_logging();
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/v1/auth/web/login"))
        .respond_with(ResponseTemplate::new(400).set_body_json(json!({
            "errors": [{"errorCode": "BAD_CREDENTIALS"}]
        })))
        .mount(&server)
        .await;

    let mut negotiator = negotiator(
        &server,
        Arc::new(MemoryTokenStore::new()),
        NegotiatorConfig::web(),
    );
    let err = negotiator.begin_web_login().await.unwrap_err();
    assert!(matches!(err, Error::Configuration(_)));
    assert_eq!(negotiator.state(), AuthStateKind::Unauthenticated);
}

#[tokio::test]
async fn test_rate_limited_login() {
    init_logging();
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/v1/auth/web/login"))
        .respond_with(ResponseTemplate::new(429).insert_header("retry-after", "17"))
        .mount(&server)
        .await;

    let mut negotiator = negotiator(
        &server,
        Arc::new(MemoryTokenStore::new()),
        NegotiatorConfig::web(),
    );
    let err = negotiator.begin_web_login().await.unwrap_err();
    assert!(matches!(err, Error::RateLimited { retry_after_secs: 17 }));
}

#[tokio::test]
async fn test_app_login_signs_request() {
    init_logging();
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/v1/auth/login"))
        .and(header_exists("x-zeta-timestamp"))
        .and(header_exists("x-zeta-signature"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "sessionToken": "session-token",
            "refreshToken": "refresh-token"
        })))
        .expect(1)
        .mount(&server)
        .await;

    let key = DeviceKey::generate();
    let store = Arc::new(MemoryTokenStore::with_device_key(key.to_bytes()));
    let mut negotiator = negotiator(&server, store, NegotiatorConfig::app());

    let session = negotiator.login_app().await.unwrap();
    assert_eq!(session.mode(), LoginMode::App);
}

#[tokio::test]
async fn test_app_login_wrong_pin_is_not_stale() {
    init_logging();
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/v1/auth/login"))
        .respond_with(ResponseTemplate::new(401).set_body_json(json!({
            "errors": [{"errorCode": "PIN_INVALID", "errorMessage": "wrong pin"}]
        })))
        .expect(1)
        .mount(&server)
        .await;

    let key = DeviceKey::generate();
    let store = Arc::new(MemoryTokenStore::with_device_key(key.to_bytes()));
    let mut negotiator = negotiator(&server, store, NegotiatorConfig::app());

    let err = negotiator.login_app().await.unwrap_err();
    assert!(matches!(err, Error::Authentication(ref m) if m == "wrong pin"));
}

#[tokio::test]
async fn test_web_login_code_is_path_escaped() {
    init_logging();
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/v1/auth/web/login"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!({"processId": "proc/1", "countdownInSeconds": 0})),
        )
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/api/v1/auth/web/login/proc%2F1/AB12"))
        .respond_with(
            ResponseTemplate::new(200).insert_header("set-cookie", "tr_session=escaped; Path=/"),
        )
        .expect(1)
        .mount(&server)
        .await;

    let mut negotiator = negotiator(
        &server,
        Arc::new(MemoryTokenStore::new()),
        NegotiatorConfig::web(),
    );
    negotiator.begin_web_login().await.unwrap();

    let err = negotiator.complete_web_login("12/34").await.unwrap_err();
    assert!(matches!(err, Error::InvalidInput(_)));

    let session = negotiator.complete_web_login("AB12").await.unwrap();
    assert_eq!(session.mode(), LoginMode::Web);
}

#[tokio::test]
async fn test_app_login_without_key_is_stale() {
    init_logging();
    let server = MockServer::start().await;

    let mut negotiator = negotiator(
        &server,
        Arc::new(MemoryTokenStore::new()),
        NegotiatorConfig::app(),
    );
    let err = negotiator.login_app().await.unwrap_err();
    assert!(matches!(err, Error::StaleCredential(_)));
}

#[tokio::test]
async fn test_device_reset_recovers_stale_key() {
    init_logging();
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/v1/auth/login"))
        .respond_with(ResponseTemplate::new(401).set_body_json(json!({
            "errors": [{"errorCode": "DEVICE_KEY_INVALID"}]
        })))
        .up_to_n_times(1)
        .with_priority(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/api/v1/auth/login"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "sessionToken": "fresh-token"
        })))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/api/v1/auth/account/reset/device"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"processId": "reset-1"})))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/api/v1/auth/account/reset/device/reset-1/key"))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&server)
        .await;

    let old_key = DeviceKey::generate();
    let store = Arc::new(MemoryTokenStore::with_device_key(old_key.to_bytes()));
    let mut negotiator = negotiator(&server, store.clone(), NegotiatorConfig::app());

    let err = negotiator.login_app().await.unwrap_err();
    assert!(matches!(err, Error::StaleCredential(_)));

    negotiator
        .initiate_device_reset(ResetConfirmation::Confirmed)
        .await
        .unwrap();
    assert_eq!(negotiator.state(), AuthStateKind::AwaitingDeviceReset);

    let session = negotiator.complete_device_reset("123456").await.unwrap();
    assert_eq!(session.mode(), LoginMode::App);
    assert_eq!(negotiator.state(), AuthStateKind::Authenticated);

    let stored = store.load_device_key().unwrap().unwrap();
    assert_ne!(stored, old_key.to_bytes());
}

#[tokio::test]
async fn test_declined_reset_sends_nothing() {
    init_logging();
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/v1/auth/account/reset/device"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"processId": "reset-1"})))
        .expect(0)
        .mount(&server)
        .await;

    let mut negotiator = negotiator(
        &server,
        Arc::new(MemoryTokenStore::new()),
        NegotiatorConfig::app(),
    );
    let err = negotiator
        .initiate_device_reset(ResetConfirmation::Declined)
        .await
        .unwrap_err();
    assert!(matches!(err, Error::InvalidInput(_)));
    assert_eq!(negotiator.state(), AuthStateKind::Unauthenticated);
}
