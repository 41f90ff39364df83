use std::time::{Duration, SystemTime, UNIX_EPOCH};

use base64::{engine::general_purpose::STANDARD, Engine};
use hmac::{Hmac, Mac};
use sha2::Sha256;

use crate::management::ManagementError;

pub const TOKEN_VALIDITY: Duration = Duration::from_secs(60 * 60);

/// Build a shared access signature for `resource_uri` valid until `expiry` (seconds
/// since the unix epoch).
pub fn shared_access_signature(
    resource_uri: &str,
    key_name: &str,
    key: &str,
    expiry: u64,
) -> Result<String, ManagementError> {
    let encoded_uri = urlencoding::encode(resource_uri);
    let string_to_sign = format!("{encoded_uri}\n{expiry}");

    let mut mac = Hmac::<Sha256>::new_from_slice(key.as_bytes())
        .map_err(|e| ManagementError::ConnectionString(format!("unusable key: {e}")))?;
    mac.update(string_to_sign.as_bytes());
    let signature = STANDARD.encode(mac.finalize().into_bytes());

    Ok(format!(
        "SharedAccessSignature sr={encoded_uri}&sig={}&se={expiry}&skn={key_name}",
        urlencoding::encode(&signature)
    ))
}

/// Expiry for a token issued now.
pub fn expiry_from_now() -> u64 {
    let now = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default();
    (now + TOKEN_VALIDITY).as_secs()
}
