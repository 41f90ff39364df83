use std::{
    fmt::{Display, Formatter},
    time::Duration,
};

use serde::Serialize;

use crate::config::{EntityName, TransportConfig};

/// Queues hold a message lock this long before it is released for redelivery.
pub const LOCK_DURATION: Duration = Duration::from_secs(5 * 60);

/// Effectively unlimited redelivery, dead-lettering is left to the endpoint.
pub const MAX_DELIVERY_COUNT: i32 = i32::MAX;

/// Configured sizes are in gigabytes, the management api takes megabytes.
const MEGABYTES_PER_GIGABYTE: u64 = 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum EntityKind {
    Topic,
    Queue,
}

impl Display for EntityKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            EntityKind::Topic => write!(f, "topic"),
            EntityKind::Queue => write!(f, "queue"),
        }
    }
}

/// Attributes shared by every entity created in one provisioning run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntitySettings {
    pub max_size_in_mb: u64,
    pub auto_delete_on_idle: Option<Duration>,
    pub enable_partitioning: bool,
}

impl EntitySettings {
    pub fn from_config(config: &TransportConfig) -> Self {
        Self {
            max_size_in_mb: u64::from(config.entity_maximum_size) * MEGABYTES_PER_GIGABYTE,
            auto_delete_on_idle: config.auto_delete_on_idle,
            enable_partitioning: config.enable_partitioning,
        }
    }
}

/// Everything the management plane needs to create a topic or a queue.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntityDescriptor {
    pub name: EntityName,
    pub kind: EntityKind,
    pub max_size_in_mb: u64,
    pub auto_delete_on_idle: Option<Duration>,
    pub enable_partitioning: bool,
    pub enable_batched_operations: bool,
    /// queues only
    pub lock_duration: Option<Duration>,
    /// queues only
    pub max_delivery_count: Option<i32>,
}

impl EntityDescriptor {
    pub fn topic(name: EntityName, settings: &EntitySettings) -> Self {
        Self {
            name,
            kind: EntityKind::Topic,
            max_size_in_mb: settings.max_size_in_mb,
            auto_delete_on_idle: settings.auto_delete_on_idle,
            enable_partitioning: settings.enable_partitioning,
            enable_batched_operations: true,
            lock_duration: None,
            max_delivery_count: None,
        }
    }

    pub fn queue(name: EntityName, settings: &EntitySettings) -> Self {
        Self {
            kind: EntityKind::Queue,
            lock_duration: Some(LOCK_DURATION),
            max_delivery_count: Some(MAX_DELIVERY_COUNT),
            ..Self::topic(name, settings)
        }
    }
}
