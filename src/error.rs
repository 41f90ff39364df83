use thiserror::Error;

use crate::{entity::EntityKind, management::ManagementError};

#[derive(Debug, Error)]
pub enum ProvisionError {
    #[error("not authorized to manage the namespace: {reason}")]
    AuthorizationDenied { reason: String },
    #[error("could not check namespace permissions: {0}")]
    PermissionCheck(#[source] ManagementError),
    #[error("could not open a management connection: {0}")]
    Connect(#[source] ManagementError),
    #[error("failed to create {kind} {entity}: {source}")]
    EntityCreationFailed {
        entity: String,
        kind: EntityKind,
        #[source]
        source: ManagementError,
    },
    #[error("provisioning was cancelled")]
    Cancelled,
}
