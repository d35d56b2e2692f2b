use std::sync::Arc;

use assert_matches::assert_matches;
use serde_json::json;
use uuid::Uuid;
use wiremock::matchers::{body_json, header, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

use notification_cell::{
    DeliveryResult, HttpMailGateway, NotificationError, NotificationGateway, RecipientDirectory,
    SupabaseRecipientDirectory, CONFIRMATION_TEMPLATE,
};
use shared_database::SupabaseClient;
use shared_utils::test_utils::{MockSupabaseResponses, TestConfig};

// ==============================================================================
// MAIL GATEWAY
// ==============================================================================

fn gateway_for(server: &MockServer) -> HttpMailGateway {
    HttpMailGateway::new(&TestConfig::with_mock_server(&server.uri()).to_app_config()).unwrap()
}

#[tokio::test]
async fn test_gateway_posts_message() {
    let server = MockServer::start().await;
    let payload = json!({ "appointment_id": Uuid::new_v4() });

    Mock::given(method("POST"))
        .and(path("/v1/messages"))
        .and(header("authorization", "Bearer test-mail-key"))
        .and(body_json(json!({
            "from": "appointments@petcare.test",
            "to": "owner@example.com",
            "template_id": CONFIRMATION_TEMPLATE,
            "data": payload.clone(),
        })))
        .respond_with(ResponseTemplate::new(202).set_body_json(json!({ "id": "msg_1" })))
        .expect(1)
        .mount(&server)
        .await;

    let result = gateway_for(&server)
        .send(CONFIRMATION_TEMPLATE, "owner@example.com", &payload)
        .await;
    assert_eq!(result, DeliveryResult::Success);
}

#[tokio::test]
async fn test_gateway_classifies_failures() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/v1/messages"))
        .respond_with(ResponseTemplate::new(503).set_body_string("maintenance"))
        .up_to_n_times(1)
        .mount(&server)
        .await;

    Mock::given(method("POST"))
        .and(path("/v1/messages"))
        .respond_with(ResponseTemplate::new(422).set_body_json(json!({ "error": "mailbox does not exist" })))
        .mount(&server)
        .await;

    let gateway = gateway_for(&server);
    let payload = json!({});

    assert_matches!(
        gateway.send(CONFIRMATION_TEMPLATE, "owner@example.com", &payload).await,
        DeliveryResult::TransientFailure(_)
    );
    assert_matches!(
        gateway.send(CONFIRMATION_TEMPLATE, "owner@example.com", &payload).await,
        DeliveryResult::FatalFailure(reason) if reason.contains("mailbox")
    );
}

#[tokio::test]
async fn test_gateway_rejects_malformed_address_without_calling_api() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(202))
        .expect(0)
        .mount(&server)
        .await;

    let result = gateway_for(&server).send(CONFIRMATION_TEMPLATE, "not-an-address", &json!({})).await;
    assert_matches!(result, DeliveryResult::FatalFailure(_));
}

#[tokio::test]
async fn test_unreachable_gateway_is_transient() {
    let gateway = HttpMailGateway::with_settings("http://127.0.0.1:1", "key", "sender@petcare.test");
    let result = gateway.send(CONFIRMATION_TEMPLATE, "owner@example.com", &json!({})).await;
    assert_matches!(result, DeliveryResult::TransientFailure(_));
}

#[test]
fn test_gateway_requires_mail_settings() {
    let mut config = TestConfig::default().to_app_config();
    config.mail_api_key = String::new();
    assert_matches!(HttpMailGateway::new(&config), Err(NotificationError::Configuration(_)));
}

// ==============================================================================
// RECIPIENT DIRECTORY
// ==============================================================================

fn directory_for(server: &MockServer) -> SupabaseRecipientDirectory {
    let client = Arc::new(SupabaseClient::with_base_url(&server.uri(), "anon-key"));
    SupabaseRecipientDirectory::with_client(client, "service-role-key".to_string())
}

#[tokio::test]
async fn test_directory_resolves_profile_email() {
    let server = MockServer::start().await;
    let owner_id = Uuid::new_v4();

    Mock::given(method("GET"))
        .and(path("/rest/v1/profiles"))
        .and(query_param("id", format!("eq.{}", owner_id)))
        .and(query_param("select", "email"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            MockSupabaseResponses::profile_response(owner_id, "owner@example.com")
        ])))
        .mount(&server)
        .await;

    let resolved = directory_for(&server).resolve(owner_id).await.unwrap();
    assert_eq!(resolved.as_deref(), Some("owner@example.com"));
}

#[tokio::test]
async fn test_directory_missing_or_blank_email_is_none() {
    let server = MockServer::start().await;
    let blank_owner = Uuid::new_v4();

    Mock::given(method("GET"))
        .and(path("/rest/v1/profiles"))
        .and(query_param("id", format!("eq.{}", blank_owner)))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([{ "email": "  " }])))
        .mount(&server)
        .await;

    Mock::given(method("GET"))
        .and(path("/rest/v1/profiles"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
        .mount(&server)
        .await;

    let directory = directory_for(&server);
    assert_eq!(directory.resolve(blank_owner).await.unwrap(), None);
    assert_eq!(directory.resolve(Uuid::new_v4()).await.unwrap(), None);
}

#[tokio::test]
async fn test_directory_outage_is_error() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/rest/v1/profiles"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&server)
        .await;

    let result = directory_for(&server).resolve(Uuid::new_v4()).await;
    assert_matches!(result, Err(NotificationError::Directory(_)));
}
