mod common;

use cloud_logging_client::auth::AuthStrategy;
use cloud_logging_client::config::ConfigOverrides;
use cloud_logging_client::error::DeliveryError;
use cloud_logging_client::formatter::LogFormatter;
use cloud_logging_client::transport::{HttpTransport, Payload, Transport};
use cloud_logging_client::{metadata_from, DeliveryService, LogLevel, LogMetadata};
use common::resolve;
use mockito::{Matcher, Server};
use serde_json::json;

#[tokio::test]
async fn basic_auth_post_reaches_ingest_endpoint() {
    let mut server = Server::new_async().await;
    let mock = server
        .mock("POST", "/")
        .match_header("Authorization", "Basic dTpw")
        .match_header("Content-Type", "application/json")
        .match_body(Matcher::PartialJson(json!({
            "level": "INFO",
            "message": "hello",
            "userId": "42",
        })))
        .with_status(200)
        .expect(1)
        .create_async()
        .await;

    let svc = DeliveryService::from_config(resolve(
        ConfigOverrides::new()
            .ingest_endpoint(server.url())
            .basic_auth("u", "p"),
    ))
    .unwrap();

    svc.info("hello", metadata_from(json!({"userId": "42"}))).await;

    mock.assert_async().await;
    let health = svc.health_status();
    assert!(health.healthy);
    assert_eq!(health.retry_count, 0);
}

#[tokio::test]
async fn batch_is_posted_as_json_array() {
    let mut server = Server::new_async().await;
    let mock = server
        .mock("POST", "/")
        .match_body(Matcher::Regex(r#"^\[\{.*"message":"a".*\},\{.*"message":"b".*\}\]$"#.to_string()))
        .with_status(202)
        .create_async()
        .await;

    let config = resolve(
        ConfigOverrides::new()
            .ingest_endpoint(server.url())
            .basic_auth("u", "p"),
    );
    let formatter = LogFormatter::new(&config);
    let entries = vec![
        formatter.format(LogLevel::Info, &json!("a"), &LogMetadata::new()),
        formatter.format(LogLevel::Info, &json!("b"), &LogMetadata::new()),
    ];
    let transport = HttpTransport::new(&config, AuthStrategy::select(&config)).unwrap();

    transport.send(Payload::Batch(&entries)).await.unwrap();
    mock.assert_async().await;
}

#[tokio::test]
async fn error_status_is_a_delivery_failure() {
    let mut server = Server::new_async().await;
    let _mock = server
        .mock("POST", "/")
        .with_status(500)
        .with_body("ingest exploded")
        .create_async()
        .await;

    let config = resolve(
        ConfigOverrides::new()
            .ingest_endpoint(server.url())
            .basic_auth("u", "p"),
    );
    let transport = HttpTransport::new(&config, AuthStrategy::select(&config)).unwrap();
    let entry = LogFormatter::new(&config).format(LogLevel::Error, &json!("x"), &LogMetadata::new());

    match transport.send(Payload::Single(&entry)).await {
        Err(DeliveryError::Status { status, body }) => {
            assert_eq!(status, 500);
            assert_eq!(body, "ingest exploded");
        }
        other => panic!("unexpected result: {other:?}"),
    }
}

#[tokio::test]
async fn client_errors_are_failures_too() {
    let mut server = Server::new_async().await;
    let _mock = server
        .mock("POST", "/")
        .with_status(401)
        .create_async()
        .await;

    let config = resolve(
        ConfigOverrides::new()
            .ingest_endpoint(server.url())
            .basic_auth("u", "wrong"),
    );
    let transport = HttpTransport::new(&config, AuthStrategy::select(&config)).unwrap();
    let entry = LogFormatter::new(&config).format(LogLevel::Info, &json!("x"), &LogMetadata::new());
    let err = transport.send(Payload::Single(&entry)).await.unwrap_err();
    assert!(matches!(err, DeliveryError::Status { status: 401, .. }));
}

#[tokio::test]
async fn unreachable_endpoint_is_a_network_failure() {
    let config = resolve(
        ConfigOverrides::new()
            .ingest_endpoint("http://127.0.0.1:1")
            .basic_auth("u", "p"),
    );
    let transport = HttpTransport::new(&config, AuthStrategy::select(&config)).unwrap();
    let entry = LogFormatter::new(&config).format(LogLevel::Info, &json!("x"), &LogMetadata::new());
    let err = transport.send(Payload::Single(&entry)).await.unwrap_err();
    assert!(matches!(err, DeliveryError::Network(_) | DeliveryError::Timeout));
}

#[tokio::test]
async fn no_strategy_means_no_endpoint() {
    let config = resolve(ConfigOverrides::new().ingest_endpoint("https://e"));
    let transport = HttpTransport::new(&config, AuthStrategy::select(&config)).unwrap();
    let entry = LogFormatter::new(&config).format(LogLevel::Info, &json!("x"), &LogMetadata::new());
    let err = transport.send(Payload::Single(&entry)).await.unwrap_err();
    assert!(matches!(err, DeliveryError::EndpointNotConfigured));
}
