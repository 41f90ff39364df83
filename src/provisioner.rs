use std::{
    fmt::{Display, Formatter},
    future::Future,
    sync::Arc,
};

use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::{
    amqp::{AmqpConnector, AmqpPermissions},
    config::{EntityName, TransportConfig},
    entity::{EntityDescriptor, EntityKind, EntitySettings},
    error::ProvisionError,
    management::{classify, Connector, CreateOutcome, ManagementClient},
    permissions::{NamespacePermissions, PermissionError},
    servicebus::{ServiceBusConnector, ServiceBusPermissions},
};

/// The topic and the queues, in creation order, that must exist after provisioning.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProvisioningRequest {
    pub topic: EntityName,
    pub queues: Vec<EntityName>,
}

impl ProvisioningRequest {
    pub fn from_config(config: &TransportConfig) -> Self {
        Self {
            topic: config.topic_name.clone(),
            queues: config.queue_names(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EntityReport {
    pub name: String,
    pub kind: EntityKind,
    pub outcome: CreateOutcome,
}

/// What happened to each entity, in the order they were ensured.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ProvisioningReport {
    pub entities: Vec<EntityReport>,
}

impl ProvisioningReport {
    fn record(&mut self, entity: &EntityDescriptor, outcome: CreateOutcome) {
        self.entities.push(EntityReport {
            name: entity.name.to_string(),
            kind: entity.kind,
            outcome,
        });
    }

    /// Number of entities this run actually created.
    pub fn created(&self) -> usize {
        self.entities
            .iter()
            .filter(|e| e.outcome == CreateOutcome::Created)
            .count()
    }
}

impl Display for ProvisioningReport {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        for entity in &self.entities {
            let outcome = match entity.outcome {
                CreateOutcome::Created => "created",
                CreateOutcome::AlreadyExists => "already exists",
                CreateOutcome::ConflictingOperation => "creation already in progress",
            };
            writeln!(f, "{} {}: {}", entity.kind, entity.name, outcome)?;
        }
        write!(
            f,
            "{} of {} entities created",
            self.created(),
            self.entities.len()
        )
    }
}

/// Ensures a topic and a set of queues exist in a broker namespace.
///
/// Creation is idempotent: entities that already exist, or whose creation is already
/// in progress on the service, count as provisioned and are left untouched. The first
/// other failure aborts the run. The management connection is released on every path
/// once it has been opened.
pub struct EntityProvisioner {
    permissions: Arc<dyn NamespacePermissions>,
    connector: Arc<dyn Connector>,
    settings: EntitySettings,
}

impl EntityProvisioner {
    pub fn new(
        permissions: Arc<dyn NamespacePermissions>,
        connector: Arc<dyn Connector>,
        settings: EntitySettings,
    ) -> Self {
        Self {
            permissions,
            connector,
            settings,
        }
    }

    /// Pick the backend from the shape of the connection string: `Endpoint=sb://...` is
    /// Azure Service Bus, `amqp://` and `amqps://` uris are AMQP 0-9-1 brokers.
    ///
    /// The configuration is validated first, so entity sizes and idle timeouts the
    /// service would reject never reach it.
    pub fn from_config(config: &TransportConfig) -> anyhow::Result<Self> {
        config.validate()?;
        let settings = EntitySettings::from_config(config);
        let connection_string = config.connection_string.trim();

        if connection_string.starts_with("amqp://") || connection_string.starts_with("amqps://")
        {
            let connector = AmqpConnector::new(connection_string);
            return Ok(Self::new(
                Arc::new(AmqpPermissions::new(connector.clone())),
                Arc::new(connector),
                settings,
            ));
        }

        let connector = ServiceBusConnector::from_connection_string(connection_string)?;
        Ok(Self::new(
            Arc::new(ServiceBusPermissions::new(connector.clone())),
            Arc::new(connector),
            settings,
        ))
    }

    pub async fn provision(
        &self,
        request: &ProvisioningRequest,
        cancel: &CancellationToken,
    ) -> Result<ProvisioningReport, ProvisionError> {
        info!(
            topic = %request.topic,
            queues = request.queues.len(),
            "provisioning entities"
        );

        match cancellable(cancel, self.permissions.can_manage()).await? {
            Ok(()) => {}
            Err(PermissionError::Denied(reason)) => {
                return Err(ProvisionError::AuthorizationDenied { reason })
            }
            Err(PermissionError::Unavailable(e)) => return Err(ProvisionError::PermissionCheck(e)),
        }

        let client = cancellable(cancel, self.connector.connect())
            .await?
            .map_err(ProvisionError::Connect)?;

        let result = self.create_entities(client.as_ref(), request, cancel).await;

        // release is not raced against the token, it must run even after cancellation
        match client.close().await {
            Ok(()) => debug!("management connection released"),
            Err(e) => warn!("failed to release management connection: {e}"),
        }

        result
    }

    async fn create_entities(
        &self,
        client: &dyn ManagementClient,
        request: &ProvisioningRequest,
        cancel: &CancellationToken,
    ) -> Result<ProvisioningReport, ProvisionError> {
        let mut report = ProvisioningReport::default();

        let topic = EntityDescriptor::topic(request.topic.clone(), &self.settings);
        let outcome = ensure(client, &topic, cancel).await?;
        report.record(&topic, outcome);

        for name in &request.queues {
            let queue = EntityDescriptor::queue(name.clone(), &self.settings);
            let outcome = ensure(client, &queue, cancel).await?;
            report.record(&queue, outcome);
        }

        Ok(report)
    }
}

async fn ensure(
    client: &dyn ManagementClient,
    entity: &EntityDescriptor,
    cancel: &CancellationToken,
) -> Result<CreateOutcome, ProvisionError> {
    let create = match entity.kind {
        EntityKind::Topic => client.create_topic(entity),
        EntityKind::Queue => client.create_queue(entity),
    };
    let outcome = classify(cancellable(cancel, create).await?).map_err(|source| {
        ProvisionError::EntityCreationFailed {
            entity: entity.name.to_string(),
            kind: entity.kind,
            source,
        }
    })?;

    match outcome {
        CreateOutcome::Created => info!("created {} {}", entity.kind, entity.name),
        CreateOutcome::AlreadyExists => {
            debug!("{} {} already exists", entity.kind, entity.name)
        }
        CreateOutcome::ConflictingOperation => debug!(
            "{} {} has a conflicting operation in progress, assuming it will exist",
            entity.kind, entity.name
        ),
    }
    Ok(outcome)
}

/// Race a management call against the cancellation token.
async fn cancellable<F: Future>(
    cancel: &CancellationToken,
    call: F,
) -> Result<F::Output, ProvisionError> {
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(ProvisionError::Cancelled),
        output = call => Ok(output),
    }
}
