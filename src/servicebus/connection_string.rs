use std::fmt::{Debug, Formatter};

use crate::management::ManagementError;

/// The parts of an Azure Service Bus connection string the management plane needs.
#[derive(Clone, PartialEq, Eq)]
pub struct ConnectionString {
    /// Namespace host, e.g. `contoso.servicebus.windows.net`.
    pub host: String,
    pub credentials: Credentials,
    pub use_development_emulator: bool,
}

#[derive(Clone, PartialEq, Eq)]
pub enum Credentials {
    SharedAccessKey { key_name: String, key: String },
    SharedAccessSignature(String),
}

impl ConnectionString {
    pub fn parse(s: &str) -> Result<Self, ManagementError> {
        let mut endpoint = None;
        let mut key_name = None;
        let mut key = None;
        let mut signature = None;
        let mut use_development_emulator = false;

        for part in s.split(';').map(str::trim).filter(|p| !p.is_empty()) {
            let (name, value) = part.split_once('=').ok_or_else(|| {
                ManagementError::ConnectionString(format!("malformed segment {part:?}"))
            })?;
            match name.trim().to_ascii_lowercase().as_str() {
                "endpoint" => endpoint = Some(value.trim().to_string()),
                "sharedaccesskeyname" => key_name = Some(value.trim().to_string()),
                "sharedaccesskey" => key = Some(value.trim().to_string()),
                "sharedaccesssignature" => signature = Some(value.trim().to_string()),
                "usedevelopmentemulator" => {
                    use_development_emulator = value.trim().eq_ignore_ascii_case("true")
                }
                // entity scoped connection strings still address the whole namespace
                "entitypath" | "transporttype" => {}
                other => {
                    return Err(ManagementError::ConnectionString(format!(
                        "unknown setting {other:?}"
                    )))
                }
            }
        }

        let endpoint = endpoint
            .ok_or_else(|| ManagementError::ConnectionString("missing Endpoint".to_string()))?;
        let host = endpoint
            .strip_prefix("sb://")
            .ok_or_else(|| {
                ManagementError::ConnectionString(format!(
                    "endpoint {endpoint:?} must start with sb://"
                ))
            })?
            .trim_end_matches('/')
            .to_string();
        if host.is_empty() {
            return Err(ManagementError::ConnectionString(
                "endpoint has no host".to_string(),
            ));
        }

        let credentials = match (key_name, key, signature) {
            (_, _, Some(signature)) => Credentials::SharedAccessSignature(signature),
            (Some(key_name), Some(key), None) => Credentials::SharedAccessKey { key_name, key },
            _ => {
                return Err(ManagementError::ConnectionString(
                    "expected SharedAccessKeyName and SharedAccessKey, or SharedAccessSignature"
                        .to_string(),
                ))
            }
        };

        Ok(Self {
            host,
            credentials,
            use_development_emulator,
        })
    }

    /// Base url of the management endpoint, with a trailing slash.
    pub fn management_url(&self) -> String {
        let scheme = if self.use_development_emulator {
            "http"
        } else {
            "https"
        };
        format!("{scheme}://{}/", self.host)
    }
}

impl Debug for ConnectionString {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let credentials = match &self.credentials {
            Credentials::SharedAccessKey { key_name, .. } => format!("key {key_name}"),
            Credentials::SharedAccessSignature(_) => "signature".to_string(),
        };
        f.debug_struct("ConnectionString")
            .field("host", &self.host)
            .field("credentials", &credentials)
            .field("use_development_emulator", &self.use_development_emulator)
            .finish()
    }
}

impl Debug for Credentials {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Credentials::SharedAccessKey { key_name, .. } => f
                .debug_struct("SharedAccessKey")
                .field("key_name", key_name)
                .field("key", &"<redacted>")
                .finish(),
            Credentials::SharedAccessSignature(_) => f
                .debug_tuple("SharedAccessSignature")
                .field(&"<redacted>")
                .finish(),
        }
    }
}
