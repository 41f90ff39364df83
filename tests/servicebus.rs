//! Service Bus backend against a wiremock management endpoint

use std::sync::Arc;

use busprov::{
    config::TransportConfig,
    entity::EntitySettings,
    management::{CreateOutcome, ManagementError},
    servicebus::{ServiceBusConnector, ServiceBusPermissions},
    EntityProvisioner, ProvisionError, ProvisioningRequest,
};
use tokio_util::sync::CancellationToken;
use wiremock::{
    matchers::{body_string_contains, header, header_exists, method, path, query_param},
    Mock, MockServer, ResponseTemplate,
};

const CONNECTION_STRING: &str = "Endpoint=sb://contoso.servicebus.windows.net/;\
     SharedAccessKeyName=RootManageSharedAccessKey;SharedAccessKey=c2VjcmV0a2V5";

const ATOM_ENTRY: &str = "application/atom+xml;type=entry;charset=utf-8";

fn provisioner(server: &MockServer, connection_string: &str) -> EntityProvisioner {
    let connector = ServiceBusConnector::from_connection_string(connection_string)
        .unwrap()
        .with_base_url(server.uri());
    EntityProvisioner::new(
        Arc::new(ServiceBusPermissions::new(connector.clone())),
        Arc::new(connector),
        EntitySettings::from_config(&TransportConfig::default()),
    )
}

fn request(topic: &str, queues: &[&str]) -> ProvisioningRequest {
    ProvisioningRequest {
        topic: topic.parse().unwrap(),
        queues: queues.iter().map(|q| q.parse().unwrap()).collect(),
    }
}

async fn allow_manage(server: &MockServer) {
    Mock::given(method("GET"))
        .and(path("/$nservicebus-verification-queue"))
        .and(query_param("api-version", "2017-04"))
        .and(header_exists("authorization"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_string(r#"<feed xmlns="http://www.w3.org/2005/Atom"></feed>"#),
        )
        .mount(server)
        .await;
}

fn conflict(detail: &str) -> ResponseTemplate {
    ResponseTemplate::new(409).set_body_string(format!(
        "<Error><Code>409</Code><Detail>{detail}</Detail></Error>"
    ))
}

#[tokio::test]
async fn test_provision_tolerates_conflicts() {
    let server = MockServer::start().await;
    allow_manage(&server).await;

    Mock::given(method("PUT"))
        .and(path("/audit"))
        .and(query_param("api-version", "2017-04"))
        .and(header("content-type", ATOM_ENTRY))
        .and(body_string_contains("<TopicDescription"))
        .and(body_string_contains(
            "<MaxSizeInMegabytes>5120</MaxSizeInMegabytes>",
        ))
        .respond_with(ResponseTemplate::new(201))
        .expect(1)
        .mount(&server)
        .await;

    Mock::given(method("PUT"))
        .and(path("/order.create"))
        .and(body_string_contains("<QueueDescription"))
        .and(body_string_contains("<LockDuration>PT5M</LockDuration>"))
        .and(body_string_contains(
            "<MaxDeliveryCount>2147483647</MaxDeliveryCount>",
        ))
        .respond_with(conflict(
            "The messaging entity 'contoso:Queue:order.create' already exists. SubCode=40900.",
        ))
        .expect(1)
        .mount(&server)
        .await;

    Mock::given(method("PUT"))
        .and(path("/order.cancel"))
        .respond_with(conflict(
            "Conflict. SubCode=40901. Another conflicting operation is in progress.",
        ))
        .expect(1)
        .mount(&server)
        .await;

    let report = provisioner(&server, CONNECTION_STRING)
        .provision(
            &request("audit", &["order.create", "order.cancel"]),
            &CancellationToken::new(),
        )
        .await
        .unwrap();

    let outcomes: Vec<CreateOutcome> = report.entities.iter().map(|e| e.outcome).collect();
    assert_eq!(
        outcomes,
        [
            CreateOutcome::Created,
            CreateOutcome::AlreadyExists,
            CreateOutcome::ConflictingOperation,
        ]
    );
}

#[tokio::test]
async fn test_unauthorized_creates_nothing() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/$nservicebus-verification-queue"))
        .respond_with(ResponseTemplate::new(401).set_body_string(
            "<Error><Code>401</Code><Detail>Manage,EntityRead claims required for this operation.</Detail></Error>",
        ))
        .mount(&server)
        .await;

    Mock::given(method("PUT"))
        .respond_with(ResponseTemplate::new(201))
        .expect(0)
        .mount(&server)
        .await;

    let err = provisioner(&server, CONNECTION_STRING)
        .provision(&request("audit", &["a"]), &CancellationToken::new())
        .await
        .unwrap_err();

    assert!(matches!(err, ProvisionError::AuthorizationDenied { .. }));
    assert!(err.to_string().contains("Manage claim"));
}

#[tokio::test]
async fn test_server_error_aborts_remaining_queues() {
    let server = MockServer::start().await;
    allow_manage(&server).await;

    Mock::given(method("PUT"))
        .and(path("/audit"))
        .respond_with(ResponseTemplate::new(201))
        .mount(&server)
        .await;

    Mock::given(method("PUT"))
        .and(path("/a"))
        .respond_with(ResponseTemplate::new(503).set_body_string("server busy"))
        .expect(1)
        .mount(&server)
        .await;

    Mock::given(method("PUT"))
        .and(path("/b"))
        .respond_with(ResponseTemplate::new(201))
        .expect(0)
        .mount(&server)
        .await;

    let err = provisioner(&server, CONNECTION_STRING)
        .provision(&request("audit", &["a", "b"]), &CancellationToken::new())
        .await
        .unwrap_err();

    match err {
        ProvisionError::EntityCreationFailed { entity, source, .. } => {
            assert_eq!(entity, "a");
            match source {
                ManagementError::Service { status, message } => {
                    assert_eq!(status, Some(503));
                    assert_eq!(message, "server busy");
                }
                other => panic!("unexpected cause: {other:?}"),
            }
        }
        other => panic!("unexpected error: {other:?}"),
    }
}

#[tokio::test]
async fn test_literal_signature_is_sent_as_is() {
    let server = MockServer::start().await;
    let signature = "SharedAccessSignature sr=x&sig=y&se=1&skn=z";

    Mock::given(header("authorization", signature))
        .respond_with(ResponseTemplate::new(200))
        .expect(2)
        .mount(&server)
        .await;

    provisioner(
        &server,
        &format!("Endpoint=sb://contoso.servicebus.windows.net/;SharedAccessSignature={signature}"),
    )
    .provision(&request("audit", &[]), &CancellationToken::new())
    .await
    .unwrap();
}

#[tokio::test]
async fn test_generated_signature_targets_namespace() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&server)
        .await;

    let received = Mock::given(method("PUT"))
        .respond_with(ResponseTemplate::new(201))
        .expect(1)
        .mount_as_scoped(&server)
        .await;

    provisioner(&server, CONNECTION_STRING)
        .provision(&request("audit", &[]), &CancellationToken::new())
        .await
        .unwrap();

    let requests = received.received_requests().await;
    let authorization = requests[0]
        .headers
        .get("authorization")
        .unwrap()
        .to_str()
        .unwrap();
    assert!(authorization
        .starts_with("SharedAccessSignature sr=https%3A%2F%2Fcontoso.servicebus.windows.net%2F&sig="));
    assert!(authorization.ends_with("&skn=RootManageSharedAccessKey"));
}

#[tokio::test]
async fn test_queues_differing_in_case_are_both_requested() {
    let server = MockServer::start().await;
    allow_manage(&server).await;

    Mock::given(method("PUT"))
        .and(path("/audit"))
        .respond_with(ResponseTemplate::new(201))
        .mount(&server)
        .await;

    Mock::given(method("PUT"))
        .and(path("/orders"))
        .respond_with(ResponseTemplate::new(201))
        .expect(1)
        .mount(&server)
        .await;

    // entity names are case insensitive on the service
    Mock::given(method("PUT"))
        .and(path("/Orders"))
        .respond_with(conflict(
            "The messaging entity 'contoso:Queue:orders' already exists. SubCode=40900.",
        ))
        .expect(1)
        .mount(&server)
        .await;

    let config = TransportConfig {
        connection_string: CONNECTION_STRING.to_string(),
        topic_name: "audit".parse().unwrap(),
        queues: ["orders", "Orders", "orders"]
            .iter()
            .map(|q| q.parse().unwrap())
            .collect(),
        ..TransportConfig::default()
    };

    let report = provisioner(&server, CONNECTION_STRING)
        .provision(
            &ProvisioningRequest::from_config(&config),
            &CancellationToken::new(),
        )
        .await
        .unwrap();

    let outcomes: Vec<(String, CreateOutcome)> = report
        .entities
        .iter()
        .map(|e| (e.name.clone(), e.outcome))
        .collect();
    assert_eq!(
        outcomes,
        [
            ("audit".to_string(), CreateOutcome::Created),
            ("orders".to_string(), CreateOutcome::Created),
            ("Orders".to_string(), CreateOutcome::AlreadyExists),
        ]
    );
}
