//! The management-plane seam: the calls provisioning needs from a broker backend and
//! the errors they report.

use async_trait::async_trait;
use serde::Serialize;
use thiserror::Error;

use crate::entity::EntityDescriptor;

/// Marker the service embeds in its error text when another operation on the same
/// entity has not finished yet.
// Match on text until the management api exposes the sub-code as a structured field.
const CONFLICTING_OPERATION_SUBCODE: &str = "SubCode=40901.";

#[derive(Debug, Error)]
pub enum ManagementError {
    #[error("entity {entity} already exists")]
    AlreadyExists { entity: String },
    #[error("unauthorized: {message}")]
    Unauthorized { message: String },
    #[error("management service error (status {status:?}): {message}")]
    Service {
        status: Option<u16>,
        message: String,
    },
    #[error("invalid connection string: {0}")]
    ConnectionString(String),
    #[error("http request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("amqp error: {0}")]
    Amqp(#[from] lapin::Error),
}

/// True when the service rejected a create because a conflicting operation on the same
/// entity is still in progress.
pub fn is_conflicting_operation(error: &ManagementError) -> bool {
    match error {
        ManagementError::Service { message, .. } => {
            message.contains(CONFLICTING_OPERATION_SUBCODE)
        }
        _ => false,
    }
}

/// How an idempotent create ended when it did not fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CreateOutcome {
    Created,
    AlreadyExists,
    ConflictingOperation,
}

/// Fold the creation conflicts that count as success into an outcome, pass every
/// other error through.
pub fn classify(result: Result<(), ManagementError>) -> Result<CreateOutcome, ManagementError> {
    match result {
        Ok(()) => Ok(CreateOutcome::Created),
        Err(ManagementError::AlreadyExists { .. }) => Ok(CreateOutcome::AlreadyExists),
        Err(e) if is_conflicting_operation(&e) => Ok(CreateOutcome::ConflictingOperation),
        Err(e) => Err(e),
    }
}

/// An open management-plane connection.
#[async_trait]
pub trait ManagementClient: Send + Sync {
    async fn create_topic(&self, topic: &EntityDescriptor) -> Result<(), ManagementError>;

    async fn create_queue(&self, queue: &EntityDescriptor) -> Result<(), ManagementError>;

    /// Release the connection.
    async fn close(self: Box<Self>) -> Result<(), ManagementError>;
}

/// Opens management-plane connections.
#[async_trait]
pub trait Connector: Send + Sync {
    async fn connect(&self) -> Result<Box<dyn ManagementClient>, ManagementError>;
}
