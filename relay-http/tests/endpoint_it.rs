use std::time::Duration;

use relay_common::TransportKind;
use relay_http::{ClientOptions, EndpointClient, OutboundRequest};
use reqwest::{Method, Url};
use wiremock::matchers::{body_string, header, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn request(url: &str) -> OutboundRequest {
    OutboundRequest {
        method: Method::POST,
        url: Url::parse(url).expect("test url"),
        headers: vec![],
        query: vec![],
        body: Some(b"{\"a\":1}".to_vec()),
        content_type: "application/json".into(),
    }
}

fn client() -> EndpointClient {
    EndpointClient::new(ClientOptions::default()).expect("client builds")
}

#[tokio::test]
async fn captures_status_headers_body_and_elapsed() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/ingest"))
        .and(header("content-type", "application/json"))
        .and(body_string("{\"a\":1}"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_string("{\"ok\":true}")
                .insert_header("x-request-id", "r-77")
                .set_delay(Duration::from_millis(40)),
        )
        .mount(&server)
        .await;

    let resp = client()
        .send(&request(&format!("{}/ingest", server.uri())))
        .await
        .expect("attempt succeeds");

    assert_eq!(resp.status, 200);
    assert!(resp.is_success());
    assert_eq!(resp.body.as_deref(), Some("{\"ok\":true}"));
    assert!(resp
        .headers
        .iter()
        .any(|(n, v)| n == "x-request-id" && v == "r-77"));
    assert!(resp.elapsed_ms >= 35, "elapsed {} too small", resp.elapsed_ms);
}

#[tokio::test]
async fn error_statuses_are_responses_not_faults() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;

    let resp = client()
        .send(&request(&server.uri()))
        .await
        .expect("a 404 still yields a response");

    assert_eq!(resp.status, 404);
    assert!(!resp.is_success());
    assert_eq!(resp.body, None, "empty body collapses to None");
}

#[tokio::test]
async fn query_auth_params_reach_the_wire() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(query_param("api_key", "k-123"))
        .respond_with(ResponseTemplate::new(204))
        .mount(&server)
        .await;

    let mut req = request(&server.uri());
    req.query = vec![("api_key".into(), "k-123".into())];
    let resp = client().send(&req).await.expect("attempt succeeds");
    assert_eq!(resp.status, 204);
}

#[tokio::test]
async fn same_scheme_redirects_are_followed() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/old"))
        .respond_with(
            ResponseTemplate::new(307)
                .insert_header("location", format!("{}/new", server.uri()).as_str()),
        )
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/new"))
        .respond_with(ResponseTemplate::new(200).set_body_string("moved"))
        .mount(&server)
        .await;

    let resp = client()
        .send(&request(&format!("{}/old", server.uri())))
        .await
        .expect("redirect chain succeeds");
    assert_eq!(resp.status, 200);
    assert_eq!(resp.body.as_deref(), Some("moved"));
}

#[tokio::test]
async fn slow_endpoints_classify_as_timeout() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_secs(5)))
        .mount(&server)
        .await;

    let client = EndpointClient::new(ClientOptions {
        request_timeout: Duration::from_millis(200),
        ..ClientOptions::default()
    })
    .expect("client builds");

    let fault = client
        .send(&request(&server.uri()))
        .await
        .expect_err("deadline should trip");
    assert_eq!(fault.kind, TransportKind::Timeout);
    assert!(fault.is_retryable());
}

#[tokio::test]
async fn refused_connections_classify_as_connect() {
    // Nothing listens on the discard port.
    let fault = client()
        .send(&request("http://127.0.0.1:9/ingest"))
        .await
        .expect_err("connection should be refused");
    assert_eq!(fault.kind, TransportKind::Connect);
    assert!(fault.is_retryable());
}
