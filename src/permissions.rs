use async_trait::async_trait;
use thiserror::Error;

use crate::management::ManagementError;

#[derive(Debug, Error)]
pub enum PermissionError {
    #[error("{0}")]
    Denied(String),
    #[error("permission check failed: {0}")]
    Unavailable(#[source] ManagementError),
}

/// Verifies the configured credentials may create entities in the namespace.
#[async_trait]
pub trait NamespacePermissions: Send + Sync {
    async fn can_manage(&self) -> Result<(), PermissionError>;
}

/// Map the error of a probe call made with the configured credentials.
pub(crate) fn denied_or_unavailable(error: ManagementError, reason: &str) -> PermissionError {
    match error {
        ManagementError::Unauthorized { message } => {
            PermissionError::Denied(format!("{reason} ({message})"))
        }
        other => PermissionError::Unavailable(other),
    }
}
