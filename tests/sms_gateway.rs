//! SMS gateway adapter against a stubbed HTTP gateway

use serde_json::json;
use uuid::Uuid;
use wiremock::matchers::{method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

use notify_pipeline::notification::Channel;
use notify_pipeline::provider::{
    NotificationProvider, ProviderAdapter, ProviderError, SendRequest, SendStatus,
    SmsGatewayAdapter,
};

fn adapter(server: &MockServer) -> SmsGatewayAdapter {
    let provider = NotificationProvider::new(
        "kannel",
        "sms_gateway",
        Channel::Sms,
        json!({
            "base_url": server.uri(),
            "status_path": "/cgi-bin/status",
            "username": "relay",
            "password": "secret",
            "from": "ACME",
            "timeout_seconds": 5
        }),
    );
    SmsGatewayAdapter::from_provider(&provider).unwrap()
}

fn request(body: &str) -> SendRequest {
    SendRequest {
        notification_id: Uuid::new_v4(),
        channel: Some(Channel::Sms),
        recipient: "+15550100".to_string(),
        body: body.to_string(),
        ..Default::default()
    }
}

#[tokio::test]
async fn test_accepted_message_is_sent() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/cgi-bin/sendsms"))
        .and(query_param("username", "relay"))
        .and(query_param("password", "secret"))
        .and(query_param("to", "+15550100"))
        .and(query_param("text", "Your code is 1234"))
        .and(query_param("from", "ACME"))
        .respond_with(ResponseTemplate::new(202).set_body_string("0: Accepted for delivery"))
        .expect(1)
        .mount(&server)
        .await;

    let req = request("Your code is 1234");
    let outcome = adapter(&server).send(&req).await.unwrap();

    assert_eq!(outcome.status, SendStatus::Sent);
    assert_eq!(
        outcome.provider_message_id,
        Some(req.notification_id.to_string())
    );
    assert_eq!(outcome.response["http_status"], 202);
}

#[tokio::test]
async fn test_request_sender_overrides_configured_one() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/cgi-bin/sendsms"))
        .and(query_param("from", "SHOP"))
        .and(query_param("dlr-url", "https://hooks.example.com/dlr"))
        .and(query_param("dlr-mask", "31"))
        .respond_with(ResponseTemplate::new(200).set_body_string("3: Queued for later delivery"))
        .expect(1)
        .mount(&server)
        .await;

    let req = SendRequest {
        from: Some("SHOP".to_string()),
        dlr_url: Some("https://hooks.example.com/dlr".to_string()),
        dlr_mask: Some(31),
        ..request("hello")
    };
    let outcome = adapter(&server).send(&req).await.unwrap();

    assert_eq!(outcome.status, SendStatus::Queued);
}

#[tokio::test]
async fn test_refusal_is_rejection() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/cgi-bin/sendsms"))
        .respond_with(ResponseTemplate::new(403).set_body_string("Authorization failed"))
        .mount(&server)
        .await;

    let err = adapter(&server).send(&request("hi")).await.unwrap_err();

    match err {
        ProviderError::Rejected { reason, response } => {
            assert!(reason.contains("Authorization failed"));
            assert_eq!(response.unwrap()["http_status"], 403);
        }
        other => panic!("expected rejection, got {other:?}"),
    }
}

#[tokio::test]
async fn test_server_error_is_transport_failure() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/cgi-bin/sendsms"))
        .respond_with(ResponseTemplate::new(503).set_body_string("busy"))
        .mount(&server)
        .await;

    let err = adapter(&server).send(&request("hi")).await.unwrap_err();

    assert!(matches!(err, ProviderError::Transport(_)));
}

#[tokio::test]
async fn test_unreachable_gateway_is_transport_failure() {
    let server = MockServer::start().await;
    let adapter = adapter(&server);
    drop(server);

    let err = adapter.send(&request("hi")).await.unwrap_err();

    assert!(matches!(
        err,
        ProviderError::Transport(_) | ProviderError::Timeout(_)
    ));
}

#[tokio::test]
async fn test_status_query_reports_delivery() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/cgi-bin/status"))
        .and(query_param("id", "msg-42"))
        .respond_with(ResponseTemplate::new(200).set_body_string("DELIVERED"))
        .mount(&server)
        .await;

    let adapter = adapter(&server);
    assert!(adapter.supports_delivery_confirmation());

    let info = adapter.check_status("msg-42").await.unwrap();
    assert_eq!(info.provider_message_id, "msg-42");
    assert_eq!(info.status, "DELIVERED");
    assert_eq!(info.delivered, Some(true));
}

#[tokio::test]
async fn test_error_answer_mentioning_sent_is_rejection() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/cgi-bin/sendsms"))
        .respond_with(
            ResponseTemplate::new(200).set_body_string("Message not sent: absent subscriber"),
        )
        .mount(&server)
        .await;

    let err = adapter(&server).send(&request("hi")).await.unwrap_err();

    assert!(matches!(err, ProviderError::Rejected { .. }));
}
