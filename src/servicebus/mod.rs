//! Azure Service Bus management plane over its REST api.

mod atom;
mod connection_string;
mod sas;

use async_trait::async_trait;
use reqwest::{header, Client, RequestBuilder, StatusCode};
use tracing::debug;

pub use connection_string::{ConnectionString, Credentials};

use crate::{
    entity::EntityDescriptor,
    management::{is_conflicting_operation, Connector, ManagementClient, ManagementError},
    permissions::{denied_or_unavailable, NamespacePermissions, PermissionError},
};

const API_VERSION: &str = "2017-04";
const ATOM_ENTRY: &str = "application/atom+xml;type=entry;charset=utf-8";

/// Probed to find out whether the credentials carry the Manage claim, it does not
/// need to exist.
const VERIFICATION_QUEUE: &str = "$nservicebus-verification-queue";

#[derive(Debug, Clone)]
pub struct ServiceBusConnector {
    connection: ConnectionString,
    base_url: String,
}

impl ServiceBusConnector {
    pub fn new(connection: ConnectionString) -> Self {
        let base_url = connection.management_url();
        Self {
            connection,
            base_url,
        }
    }

    pub fn from_connection_string(s: &str) -> Result<Self, ManagementError> {
        Ok(Self::new(ConnectionString::parse(s)?))
    }

    /// Send management requests somewhere other than the namespace host, tokens are
    /// still issued for the namespace.
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        let mut base_url = base_url.into();
        if !base_url.ends_with('/') {
            base_url.push('/');
        }
        self.base_url = base_url;
        self
    }

    fn open(&self) -> Result<ServiceBusManagementClient, ManagementError> {
        Ok(ServiceBusManagementClient {
            http: Client::builder().build()?,
            base_url: self.base_url.clone(),
            connection: self.connection.clone(),
        })
    }
}

#[async_trait]
impl Connector for ServiceBusConnector {
    async fn connect(&self) -> Result<Box<dyn ManagementClient>, ManagementError> {
        debug!("opening management client for {}", self.connection.host);
        Ok(Box::new(self.open()?))
    }
}

pub struct ServiceBusManagementClient {
    http: Client,
    base_url: String,
    connection: ConnectionString,
}

impl ServiceBusManagementClient {
    fn entity_url(&self, path: &str) -> String {
        format!("{}{path}?api-version={API_VERSION}", self.base_url)
    }

    fn authorization(&self) -> Result<String, ManagementError> {
        match &self.connection.credentials {
            Credentials::SharedAccessSignature(signature) => Ok(signature.clone()),
            Credentials::SharedAccessKey { key_name, key } => sas::shared_access_signature(
                &self.connection.management_url(),
                key_name,
                key,
                sas::expiry_from_now(),
            ),
        }
    }

    async fn send(&self, request: RequestBuilder, entity: &str) -> Result<(), ManagementError> {
        let response = request
            .header(header::AUTHORIZATION, self.authorization()?)
            .send()
            .await?;

        let status = response.status();
        if status.is_success() {
            return Ok(());
        }
        let message = response.text().await.unwrap_or_default();
        Err(match status {
            StatusCode::UNAUTHORIZED => ManagementError::Unauthorized { message },
            StatusCode::CONFLICT => {
                let error = ManagementError::Service {
                    status: Some(status.as_u16()),
                    message,
                };
                if is_conflicting_operation(&error) {
                    error
                } else {
                    ManagementError::AlreadyExists {
                        entity: entity.to_string(),
                    }
                }
            }
            _ => ManagementError::Service {
                status: Some(status.as_u16()),
                message,
            },
        })
    }

    async fn put_entity(&self, entity: &EntityDescriptor) -> Result<(), ManagementError> {
        let request = self
            .http
            .put(self.entity_url(entity.name.as_str()))
            .header(header::CONTENT_TYPE, ATOM_ENTRY)
            .body(atom::entry(entity));
        self.send(request, entity.name.as_str()).await
    }
}

#[async_trait]
impl ManagementClient for ServiceBusManagementClient {
    async fn create_topic(&self, topic: &EntityDescriptor) -> Result<(), ManagementError> {
        self.put_entity(topic).await
    }

    async fn create_queue(&self, queue: &EntityDescriptor) -> Result<(), ManagementError> {
        self.put_entity(queue).await
    }

    async fn close(self: Box<Self>) -> Result<(), ManagementError> {
        // http connections are pooled per client, dropping it closes them
        debug!("closing management client for {}", self.connection.host);
        Ok(())
    }
}

/// Checks for the Manage claim by reading an entity description with the configured
/// credentials.
#[derive(Debug, Clone)]
pub struct ServiceBusPermissions {
    connector: ServiceBusConnector,
}

impl ServiceBusPermissions {
    pub fn new(connector: ServiceBusConnector) -> Self {
        Self { connector }
    }
}

#[async_trait]
impl NamespacePermissions for ServiceBusPermissions {
    async fn can_manage(&self) -> Result<(), PermissionError> {
        let client = self.connector.open().map_err(PermissionError::Unavailable)?;
        let probe = client.http.get(client.entity_url(VERIFICATION_QUEUE));
        client
            .send(probe, VERIFICATION_QUEUE)
            .await
            .map_err(|e| {
                denied_or_unavailable(
                    e,
                    "management rights are required to provision entities, \
                     verify that the SAS policy has the Manage claim",
                )
            })
    }
}
