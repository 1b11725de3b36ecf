use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Response from `/login` and `/validate`.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AccountLoginResponse {
    #[serde(default)]
    pub ds_info: Option<DsInfo>,
    #[serde(default)]
    pub webservices: Option<Webservices>,
    #[serde(default)]
    pub hsa_challenge_required: bool,
    #[serde(default)]
    pub hsa_trusted_browser: bool,
    #[serde(default)]
    pub domain_to_use: Option<String>,
}

impl AccountLoginResponse {
    /// Two-step verification is pending when the account is enrolled
    /// (`hsaVersion >= 1`) and Apple either demands a challenge or does not
    /// yet trust this browser session.
    pub fn requires_two_step(&self) -> bool {
        let hsa_version = self.ds_info.as_ref().map_or(0, |ds| ds.hsa_version);
        hsa_version >= 1 && (self.hsa_challenge_required || !self.hsa_trusted_browser)
    }

    pub fn ckdatabasews_url(&self) -> Option<&str> {
        self.webservices
            .as_ref()
            .and_then(|ws| ws.ckdatabasews.as_ref())
            .map(|ep| ep.url.as_str())
    }

    pub fn dsid(&self) -> Option<String> {
        self.ds_info.as_ref().and_then(|ds| match &ds.dsid {
            Some(Value::String(s)) => Some(s.clone()),
            Some(Value::Number(n)) => Some(n.to_string()),
            _ => None,
        })
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DsInfo {
    #[serde(default)]
    pub hsa_version: i64,
    /// Apple has sent this both as a string and as a number.
    #[serde(default)]
    pub dsid: Option<Value>,
}

#[derive(Debug, Deserialize)]
pub struct Webservices {
    #[serde(default)]
    pub ckdatabasews: Option<WebserviceEndpoint>,
}

#[derive(Debug, Deserialize)]
pub struct WebserviceEndpoint {
    pub url: String,
}

/// Response from `/listDevices`.
#[derive(Debug, Deserialize)]
pub struct DeviceListResponse {
    #[serde(default)]
    pub devices: Vec<TrustedDeviceRecord>,
}

/// A trusted device as Apple describes it.
///
/// Unknown fields are kept in `extra` because the record must be posted back
/// verbatim when requesting and validating a code.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TrustedDeviceRecord {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub device_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phone_number: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub device_type: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Response from `/sendVerificationCode`.
#[derive(Debug, Deserialize)]
pub struct SendCodeResponse {
    #[serde(default)]
    pub success: bool,
}
