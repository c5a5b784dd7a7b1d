use std::time::Duration;

use relay_auth::OAuth2Session;
use wiremock::matchers::{body_string_contains, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn token_body(token: &str, expires_in: Option<u64>) -> serde_json::Value {
    match expires_in {
        Some(secs) => serde_json::json!({ "access_token": token, "expires_in": secs, "token_type": "Bearer" }),
        None => serde_json::json!({ "access_token": token, "token_type": "Bearer" }),
    }
}

fn session(server: &MockServer, buffer: Duration) -> OAuth2Session {
    OAuth2Session::new(
        format!("{}/oauth/token", server.uri()),
        "svc-client".into(),
        "svc-secret".into(),
        Some("ingest:write".into()),
        buffer,
    )
    .expect("session builds")
}

#[tokio::test]
async fn posts_a_form_encoded_client_credentials_grant() {
    let server = MockServer::start().await;
    let mock = Mock::given(method("POST"))
        .and(path("/oauth/token"))
        .and(header("content-type", "application/x-www-form-urlencoded"))
        .and(body_string_contains("grant_type=client_credentials"))
        .and(body_string_contains("client_id=svc-client"))
        .and(body_string_contains("client_secret=svc-secret"))
        .and(body_string_contains("scope=ingest%3Awrite"))
        .respond_with(ResponseTemplate::new(200).set_body_json(token_body("t-1", Some(3600))))
        .expect(1)
        .mount_as_scoped(&server)
        .await;

    let bearer = session(&server, Duration::from_secs(30))
        .bearer()
        .await
        .expect("token obtained");
    assert_eq!(bearer, "Bearer t-1");
    drop(mock);
}

#[tokio::test]
async fn caches_the_token_across_calls() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/oauth/token"))
        .respond_with(ResponseTemplate::new(200).set_body_json(token_body("t-1", Some(3600))))
        .expect(1)
        .mount(&server)
        .await;

    let session = session(&server, Duration::from_secs(30));
    for _ in 0..3 {
        assert_eq!(session.bearer().await.unwrap(), "Bearer t-1");
    }
    // `expect(1)` on the mock verifies a single POST at drop.
}

#[tokio::test]
async fn missing_expires_in_defaults_to_an_hour() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/oauth/token"))
        .respond_with(ResponseTemplate::new(200).set_body_json(token_body("t-1", None)))
        .expect(1)
        .mount(&server)
        .await;

    let session = session(&server, Duration::from_secs(30));
    // Two immediate calls: if the default lifetime were treated as zero
    // the second call would refetch and trip the expect(1).
    assert_eq!(session.bearer().await.unwrap(), "Bearer t-1");
    assert_eq!(session.bearer().await.unwrap(), "Bearer t-1");
}

#[tokio::test]
async fn expired_tokens_are_refetched() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/oauth/token"))
        .respond_with(ResponseTemplate::new(200).set_body_json(token_body("t-1", Some(1))))
        .up_to_n_times(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/oauth/token"))
        .respond_with(ResponseTemplate::new(200).set_body_json(token_body("t-2", Some(3600))))
        .expect(1)
        .mount(&server)
        .await;

    let session = session(&server, Duration::ZERO);
    assert_eq!(session.bearer().await.unwrap(), "Bearer t-1");
    tokio::time::sleep(Duration::from_millis(1_100)).await;
    assert_eq!(session.bearer().await.unwrap(), "Bearer t-2");
}

#[tokio::test]
async fn refresh_failure_degrades_onto_a_live_token() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/oauth/token"))
        .respond_with(ResponseTemplate::new(200).set_body_json(token_body("t-1", Some(3))))
        .up_to_n_times(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/oauth/token"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&server)
        .await;

    // Buffer of 2s: after ~1.5s the token is stale per the buffer but
    // still has over a second of real lifetime left.
    let session = session(&server, Duration::from_secs(2));
    assert_eq!(session.bearer().await.unwrap(), "Bearer t-1");
    tokio::time::sleep(Duration::from_millis(1_500)).await;
    assert_eq!(
        session.bearer().await.unwrap(),
        "Bearer t-1",
        "refresh failed but the unexpired token is reused"
    );
}

#[tokio::test]
async fn refresh_failure_without_a_live_token_is_an_auth_fault() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/oauth/token"))
        .respond_with(ResponseTemplate::new(401))
        .mount(&server)
        .await;

    let err = session(&server, Duration::ZERO)
        .bearer()
        .await
        .expect_err("no token to fall back to");
    let msg = err.to_string();
    assert!(msg.contains("auth"), "{msg}");
    assert!(msg.contains("401"), "{msg}");
    // The client secret never leaks into the error text.
    assert!(!msg.contains("svc-secret"), "{msg}");
}

#[tokio::test]
async fn concurrent_callers_share_one_refresh() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/oauth/token"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(token_body("t-1", Some(3600)))
                .set_delay(Duration::from_millis(150)),
        )
        .expect(1)
        .mount(&server)
        .await;

    let session = std::sync::Arc::new(session(&server, Duration::from_secs(30)));
    let tasks: Vec<_> = (0..8)
        .map(|_| {
            let s = session.clone();
            tokio::spawn(async move { s.bearer().await.unwrap() })
        })
        .collect();
    for task in tasks {
        assert_eq!(task.await.unwrap(), "Bearer t-1");
    }
}
