//! Fetch client against a real HTTP server
use std::num::NonZeroU32;
use std::sync::Arc;

use product_harvester::domain::{CollectionError, FetchOutcome};
use product_harvester::infrastructure::config::HttpConfig;
use product_harvester::infrastructure::{
    FetchOptions, ProxyRotator, RandomIdentitySupplier, ReqwestTransport, ResilientClient, RetryPolicy,
};
use tokio_util::sync::CancellationToken;
use wiremock::matchers::{header_exists, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn direct_client() -> ResilientClient {
    let http = HttpConfig {
        timeout_secs: 5,
        ..HttpConfig::default()
    };
    let transport = ReqwestTransport::new(&http, &[]).expect("transport builds");
    ResilientClient::with_transport(
        Arc::new(transport),
        Arc::new(RandomIdentitySupplier::new()),
        Arc::new(ProxyRotator::direct()),
        NonZeroU32::new(1000).unwrap(),
    )
}

#[tokio::test]
async fn gateway_errors_are_retried_until_success() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/search"))
        .respond_with(ResponseTemplate::new(503))
        .up_to_n_times(2)
        .expect(2)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/search"))
        .respond_with(ResponseTemplate::new(200).set_body_string(r#"{"products":[]}"#))
        .expect(1)
        .mount(&server)
        .await;

    let client = direct_client();
    let outcome = client
        .fetch(&format!("{}/search", server.uri()), &FetchOptions::get(RetryPolicy::immediate(5)))
        .await;

    assert_eq!(
        outcome,
        FetchOutcome::Success {
            status: 200,
            body: r#"{"products":[]}"#.to_string()
        }
    );
}

#[tokio::test]
async fn blocked_responses_exhaust_the_budget_exactly() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/detail/1"))
        .respond_with(ResponseTemplate::new(403))
        .expect(3)
        .mount(&server)
        .await;

    let client = direct_client();
    let url = format!("{}/detail/1", server.uri());
    let result = client.fetch_body(&url, &FetchOptions::get(RetryPolicy::immediate(3))).await;

    match result {
        Err(CollectionError::Fatal { attempts, last_reason, .. }) => {
            assert_eq!(attempts, 3);
            assert!(last_reason.contains("403"), "unexpected reason: {last_reason}");
        }
        other => panic!("expected a give-up, got {other:?}"),
    }
}

#[tokio::test]
async fn not_found_is_retried_like_any_other_status() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/missing"))
        .respond_with(ResponseTemplate::new(404))
        .expect(2)
        .mount(&server)
        .await;

    let client = direct_client();
    let outcome = client
        .fetch(&format!("{}/missing", server.uri()), &FetchOptions::get(RetryPolicy::immediate(2)))
        .await;

    assert!(matches!(outcome, FetchOutcome::FatalFailure { attempts: 2, .. }));
}

#[tokio::test]
async fn every_attempt_presents_a_browser_identity() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/search"))
        .and(header_exists("user-agent"))
        .and(header_exists("accept"))
        .and(header_exists("accept-language"))
        .respond_with(ResponseTemplate::new(200).set_body_string("ok"))
        .expect(1)
        .mount(&server)
        .await;

    let client = direct_client();
    let body = client
        .fetch_body(&format!("{}/search", server.uri()), &FetchOptions::get(RetryPolicy::immediate(1)))
        .await
        .unwrap();
    assert_eq!(body, "ok");
}

#[tokio::test]
async fn unreachable_host_gives_up_with_a_network_reason() {
    // Bind then drop a listener so nothing is accepting on the port
    let port = {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        listener.local_addr().unwrap().port()
    };

    let client = direct_client();
    let outcome = client
        .fetch(&format!("http://127.0.0.1:{port}/search"), &FetchOptions::get(RetryPolicy::immediate(2)))
        .await;

    match outcome {
        FetchOutcome::FatalFailure { attempts, reason } => {
            assert_eq!(attempts, 2);
            assert!(reason.starts_with("network error"), "unexpected reason: {reason}");
        }
        other => panic!("expected a give-up, got {other:?}"),
    }
}

#[tokio::test]
async fn cancelled_client_sends_nothing() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&server)
        .await;

    let token = CancellationToken::new();
    token.cancel();
    let client = direct_client().with_cancellation(token);

    let result = client
        .fetch_body(&format!("{}/search", server.uri()), &FetchOptions::get(RetryPolicy::immediate(3)))
        .await;
    assert!(matches!(result, Err(CollectionError::Cancelled)));
}
