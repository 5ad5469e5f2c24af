//! Hub connection strings and shared access signatures

use crate::error::HubError;
use base64::{engine::general_purpose::STANDARD, Engine};
use hmac::{Hmac, Mac};
use sha2::Sha256;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

type HmacSha256 = Hmac<Sha256>;

/// Per-device hub identity parsed from
/// `HostName=..;DeviceId=..;SharedAccessKey=..` (or `SharedAccessSignature=..`)
#[derive(Clone, PartialEq, Eq)]
pub struct DeviceCredential {
    pub host_name: String,
    pub device_id: String,
    shared_access_key: Option<String>,
    shared_access_signature: Option<String>,
}

impl DeviceCredential {
    /// Resource URI the device token is scoped to
    pub fn resource_uri(&self) -> String {
        format!("{}/devices/{}", self.host_name, self.device_id)
    }

    /// MQTT username expected by the hub
    pub fn mqtt_username(&self) -> String {
        format!("{}/{}/?api-version={}", self.host_name, self.device_id, super::API_VERSION)
    }

    /// Token used as MQTT password, minted from the key when no signature was given
    pub fn password(&self, ttl: Duration) -> Result<String, HubError> {
        self.password_at(ttl, chrono::Utc::now().timestamp())
    }

    /// Same as [`password`](Self::password), minted at unix time `now`
    pub fn password_at(&self, ttl: Duration, now: i64) -> Result<String, HubError> {
        if let Some(signature) = &self.shared_access_signature {
            return Ok(signature.clone());
        }
        let key = self
            .shared_access_key
            .as_deref()
            .ok_or_else(|| HubError::Credential(format!("no key or signature for {}", self.device_id)))?;
        sas_token(&self.resource_uri(), key, None, now + ttl.as_secs() as i64)
    }
}

impl FromStr for DeviceCredential {
    type Err = HubError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut host_name = None;
        let mut device_id = None;
        let mut shared_access_key = None;
        let mut shared_access_signature = None;

        for (key, value) in connection_string_pairs(s) {
            match key {
                "HostName" => host_name = Some(value.to_string()),
                "DeviceId" => device_id = Some(value.to_string()),
                "SharedAccessKey" => shared_access_key = Some(value.to_string()),
                "SharedAccessSignature" => shared_access_signature = Some(value.to_string()),
                _ => {}
            }
        }

        let host_name = host_name.ok_or_else(|| HubError::Credential("missing HostName".into()))?;
        let device_id = device_id.ok_or_else(|| HubError::Credential("missing DeviceId".into()))?;
        if shared_access_key.is_none() && shared_access_signature.is_none() {
            return Err(HubError::Credential(format!(
                "missing SharedAccessKey or SharedAccessSignature for {}",
                device_id
            )));
        }

        Ok(Self {
            host_name,
            device_id,
            shared_access_key,
            shared_access_signature,
        })
    }
}

// Never print keys
impl fmt::Debug for DeviceCredential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DeviceCredential")
            .field("host_name", &self.host_name)
            .field("device_id", &self.device_id)
            .finish_non_exhaustive()
    }
}

/// Split `k=v;k=v` pairs; values may themselves contain `=` (base64 padding)
pub fn connection_string_pairs(s: &str) -> impl Iterator<Item = (&str, &str)> {
    s.split(';')
        .filter(|part| !part.trim().is_empty())
        .filter_map(|part| part.split_once('='))
        .map(|(k, v)| (k.trim(), v.trim()))
}

/// Shared access signature for `resource_uri`, valid until `expiry` (unix seconds)
pub fn sas_token(
    resource_uri: &str,
    key_base64: &str,
    policy_name: Option<&str>,
    expiry: i64,
) -> Result<String, HubError> {
    let key = STANDARD
        .decode(key_base64)
        .map_err(|e| HubError::Credential(format!("shared access key is not base64: {}", e)))?;

    let encoded_uri = urlencoding::encode(resource_uri);
    let string_to_sign = format!("{}\n{}", encoded_uri, expiry);

    let mut mac = HmacSha256::new_from_slice(&key)
        .map_err(|e| HubError::Credential(e.to_string()))?;
    mac.update(string_to_sign.as_bytes());
    let signature = STANDARD.encode(mac.finalize().into_bytes());

    let mut token = format!(
        "SharedAccessSignature sr={}&sig={}&se={}",
        encoded_uri,
        urlencoding::encode(&signature),
        expiry
    );
    if let Some(policy) = policy_name {
        token.push_str("&skn=");
        token.push_str(policy);
    }
    Ok(token)
}
