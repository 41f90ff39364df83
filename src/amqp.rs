//! AMQP 0-9-1 brokers (RabbitMQ) as a management plane.
//!
//! Topics become durable topic exchanges and queues become durable quorum queues.
//! Declares are idempotent on the broker side as long as the arguments match; a
//! declare with different arguments fails with PRECONDITION_FAILED, which is reported
//! as "already exists" since existing entities are never reconfigured.

use std::{
    fmt::{Debug, Formatter},
    time::Duration,
};

use async_trait::async_trait;
use lapin::{
    options::{ExchangeDeclareOptions, QueueDeclareOptions, QueueDeleteOptions},
    protocol::{AMQPErrorKind, AMQPSoftError},
    types::{AMQPValue, FieldTable, LongString, ShortString},
    Channel, Connection, ConnectionProperties, ExchangeKind,
};
use tokio::sync::Mutex;
use tracing::debug;

use crate::{
    entity::EntityDescriptor,
    management::{Connector, ManagementClient, ManagementError},
    permissions::{denied_or_unavailable, NamespacePermissions, PermissionError},
};

const BYTES_PER_MEGABYTE: u64 = 1024 * 1024;

#[derive(Clone)]
pub struct AmqpConnector {
    uri: String,
}

impl Debug for AmqpConnector {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        // uris may carry a password
        let host = self.uri.rsplit('@').next().unwrap_or_default();
        write!(f, "AmqpConnector({host})")
    }
}

impl AmqpConnector {
    pub fn new(uri: impl Into<String>) -> Self {
        Self { uri: uri.into() }
    }

    async fn open(&self) -> Result<Connection, ManagementError> {
        Connection::connect(&self.uri, ConnectionProperties::default())
            .await
            .map_err(|e| classify_amqp_error(e, ""))
    }
}

#[async_trait]
impl Connector for AmqpConnector {
    async fn connect(&self) -> Result<Box<dyn ManagementClient>, ManagementError> {
        let connection = self.open().await?;
        let channel = connection
            .create_channel()
            .await
            .map_err(|e| classify_amqp_error(e, ""))?;
        Ok(Box::new(AmqpManagementClient {
            connection,
            channel: Mutex::new(channel),
        }))
    }
}

pub struct AmqpManagementClient {
    connection: Connection,
    channel: Mutex<Channel>,
}

impl AmqpManagementClient {
    /// A usable channel. Soft errors close the channel they happen on, so a channel
    /// closed by an earlier declare is replaced.
    async fn channel(&self) -> Result<Channel, ManagementError> {
        let mut channel = self.channel.lock().await;
        if !channel.status().connected() {
            debug!("reopening channel closed by a previous declare");
            *channel = self
                .connection
                .create_channel()
                .await
                .map_err(|e| classify_amqp_error(e, ""))?;
        }
        Ok(channel.clone())
    }
}

#[async_trait]
impl ManagementClient for AmqpManagementClient {
    async fn create_topic(&self, topic: &EntityDescriptor) -> Result<(), ManagementError> {
        if topic.enable_partitioning {
            debug!("partitioning has no amqp equivalent, ignoring it for {}", topic.name);
        }
        self.channel()
            .await?
            .exchange_declare(
                topic.name.as_str(),
                ExchangeKind::Topic,
                ExchangeDeclareOptions {
                    durable: true,
                    ..Default::default()
                },
                FieldTable::default(),
            )
            .await
            .map_err(|e| classify_amqp_error(e, topic.name.as_str()))
    }

    async fn create_queue(&self, queue: &EntityDescriptor) -> Result<(), ManagementError> {
        if queue.enable_partitioning {
            debug!("partitioning has no amqp equivalent, ignoring it for {}", queue.name);
        }
        self.channel()
            .await?
            .queue_declare(
                queue.name.as_str(),
                QueueDeclareOptions {
                    durable: true,
                    ..Default::default()
                },
                queue_arguments(queue),
            )
            .await
            .map(|_| ())
            .map_err(|e| classify_amqp_error(e, queue.name.as_str()))
    }

    async fn close(self: Box<Self>) -> Result<(), ManagementError> {
        self.connection
            .close(200, "OK")
            .await
            .map_err(ManagementError::Amqp)
    }
}

fn queue_arguments(queue: &EntityDescriptor) -> FieldTable {
    let mut arguments = FieldTable::default();
    arguments.insert(
        ShortString::from("x-queue-type"),
        AMQPValue::LongString(LongString::from("quorum")),
    );
    arguments.insert(
        ShortString::from("x-max-length-bytes"),
        AMQPValue::LongLongInt(saturating_i64(
            queue.max_size_in_mb.saturating_mul(BYTES_PER_MEGABYTE),
        )),
    );
    if let Some(idle) = queue.auto_delete_on_idle {
        arguments.insert(
            ShortString::from("x-expires"),
            AMQPValue::LongLongInt(millis(idle)),
        );
    }
    if let Some(count) = queue.max_delivery_count {
        arguments.insert(
            ShortString::from("x-delivery-limit"),
            AMQPValue::LongInt(count),
        );
    }
    if let Some(lock) = queue.lock_duration {
        arguments.insert(
            ShortString::from("x-consumer-timeout"),
            AMQPValue::LongLongInt(millis(lock)),
        );
    }
    arguments
}

fn millis(duration: Duration) -> i64 {
    saturating_i64(u64::try_from(duration.as_millis()).unwrap_or(u64::MAX))
}

fn saturating_i64(value: u64) -> i64 {
    i64::try_from(value).unwrap_or(i64::MAX)
}

/// Map the broker's reply codes onto management errors.
fn classify_amqp_error(error: lapin::Error, entity: &str) -> ManagementError {
    if let lapin::Error::ProtocolError(amqp) = &error {
        match amqp.kind() {
            AMQPErrorKind::Soft(AMQPSoftError::PRECONDITIONFAILED) => {
                return ManagementError::AlreadyExists {
                    entity: entity.to_string(),
                }
            }
            AMQPErrorKind::Soft(AMQPSoftError::ACCESSREFUSED) => {
                return ManagementError::Unauthorized {
                    message: amqp.get_message().as_str().to_string(),
                }
            }
            _ => {}
        }
    }
    ManagementError::Amqp(error)
}

/// Checks the configure permission by declaring, then deleting, a server named queue.
#[derive(Debug, Clone)]
pub struct AmqpPermissions {
    connector: AmqpConnector,
}

impl AmqpPermissions {
    pub fn new(connector: AmqpConnector) -> Self {
        Self { connector }
    }

    async fn probe(&self) -> Result<(), ManagementError> {
        let connection = self.connector.open().await?;
        let result = async {
            let channel = connection.create_channel().await?;
            let queue = channel
                .queue_declare(
                    "",
                    QueueDeclareOptions {
                        exclusive: true,
                        auto_delete: true,
                        ..Default::default()
                    },
                    FieldTable::default(),
                )
                .await?;
            channel
                .queue_delete(queue.name().as_str(), QueueDeleteOptions::default())
                .await?;
            Ok::<_, lapin::Error>(())
        }
        .await
        .map_err(|e| classify_amqp_error(e, ""));

        if let Err(e) = connection.close(200, "OK").await {
            debug!("failed to close permission probe connection: {e}");
        }
        result
    }
}

#[async_trait]
impl NamespacePermissions for AmqpPermissions {
    async fn can_manage(&self) -> Result<(), PermissionError> {
        self.probe().await.map_err(|e| {
            denied_or_unavailable(
                e,
                "configure permission on the virtual host is required to provision entities",
            )
        })
    }
}
