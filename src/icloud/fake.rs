//! Scripted [`RemoteService`] used by the auth, catalog and download tests.

use std::collections::{HashMap, HashSet};
use std::sync::Mutex;
use std::time::Duration;

use bytes::Bytes;
use chrono::{DateTime, Utc};
use futures_util::stream::{self, BoxStream, StreamExt};
use reqwest::header::HeaderMap;
use serde_json::{json, Value};

use super::responses::TrustedDeviceRecord;
use super::{ContentStream, ICloudError, LoginOutcome, RemoteItem, RemoteService, TrustedDevice};
use crate::transport::Transport;

pub struct FakeService {
    transport: Transport,
    pub password: String,
    pub login: LoginOutcome,
    pub devices: Vec<TrustedDevice>,
    pub dispatch_succeeds: bool,
    pub valid_code: String,
    pub items: Vec<RemoteItem>,
    /// Catalog position at which listing fails instead of yielding an item.
    pub catalog_fails_at: Option<usize>,
    /// Bytes served per item id; items not listed get `size` zero bytes.
    pub contents: HashMap<String, Vec<u8>>,
    pub failing_fetches: HashSet<String>,
    calls: Mutex<Vec<String>>,
}

impl FakeService {
    pub fn new() -> Self {
        Self {
            transport: Transport::new(HeaderMap::new(), Duration::from_secs(1), None).unwrap(),
            password: "secret".to_string(),
            login: LoginOutcome::Authenticated,
            devices: Vec::new(),
            dispatch_succeeds: true,
            valid_code: "123456".to_string(),
            items: Vec::new(),
            catalog_fails_at: None,
            contents: HashMap::new(),
            failing_fetches: HashSet::new(),
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn with_items(items: Vec<RemoteItem>) -> Self {
        Self {
            items,
            ..Self::new()
        }
    }

    pub fn challenged(devices: Vec<TrustedDevice>) -> Self {
        Self {
            login: LoginOutcome::ChallengeRequired,
            devices,
            ..Self::new()
        }
    }

    /// Every call received so far, as `name` or `name:argument`.
    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    pub fn fetch_count(&self) -> usize {
        self.calls()
            .iter()
            .filter(|c| c.starts_with("fetch:"))
            .count()
    }

    fn record(&self, call: impl Into<String>) {
        self.calls.lock().unwrap().push(call.into());
    }
}

pub fn date(rfc3339: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(rfc3339)
        .unwrap()
        .with_timezone(&Utc)
}

/// Item whose asset and added dates are both `when`.
pub fn item(id: &str, filename: &str, size: u64, when: &str) -> RemoteItem {
    RemoteItem {
        id: id.to_string(),
        filename: filename.to_string(),
        size: Some(size),
        asset_date: Some(date(when)),
        added_date: date(when),
        content_location: format!("https://content.invalid/{id}"),
    }
}

pub fn device(index: usize, name: Option<&str>, phone: Option<&str>) -> TrustedDevice {
    TrustedDevice::from_record(
        index,
        TrustedDeviceRecord {
            device_name: name.map(str::to_string),
            phone_number: phone.map(str::to_string),
            ..Default::default()
        },
    )
}

#[async_trait::async_trait]
impl RemoteService for FakeService {
    fn transport(&self) -> &Transport {
        &self.transport
    }

    async fn authenticate(
        &self,
        account: &str,
        password: &str,
    ) -> Result<LoginOutcome, ICloudError> {
        self.record(format!("authenticate:{account}"));
        if password != self.password {
            return Err(ICloudError::FailedLogin("Invalid email/password combination.".into()));
        }
        Ok(self.login)
    }

    async fn trusted_devices(&self) -> Result<Vec<TrustedDevice>, ICloudError> {
        self.record("trusted_devices");
        Ok(self.devices.clone())
    }

    async fn send_verification_code(&self, device: &TrustedDevice) -> Result<bool, ICloudError> {
        self.record(format!("send_code:{}", device.index));
        Ok(self.dispatch_succeeds)
    }

    async fn validate_verification_code(
        &self,
        device: &TrustedDevice,
        code: &str,
    ) -> Result<bool, ICloudError> {
        self.record(format!("validate_code:{}:{}", device.index, code));
        Ok(code == self.valid_code)
    }

    async fn account_summary(&self) -> Result<Value, ICloudError> {
        self.record("account_summary");
        Ok(json!({"fullName": "Test Account"}))
    }

    fn media_items(&self) -> BoxStream<'_, Result<RemoteItem, ICloudError>> {
        self.record("media_items");
        let fail_at = self.catalog_fails_at;
        stream::iter(self.items.iter().cloned().enumerate())
            .map(move |(i, item)| {
                if Some(i) == fail_at {
                    Err(ICloudError::ApiError {
                        code: 503,
                        message: "catalog unavailable".into(),
                    })
                } else {
                    Ok(item)
                }
            })
            // Stop after the failure like a real pager would.
            .take(fail_at.map_or(usize::MAX, |i| i + 1))
            .boxed()
    }

    async fn item_count(&self) -> Result<Option<u64>, ICloudError> {
        Ok(Some(self.items.len() as u64))
    }

    async fn fetch_original(&self, item: &RemoteItem) -> Result<ContentStream, ICloudError> {
        self.record(format!("fetch:{}", item.id));
        if self.failing_fetches.contains(&item.id) {
            return Err(ICloudError::ApiError {
                code: 500,
                message: format!("downloading {}", item.id),
            });
        }
        let body = self
            .contents
            .get(&item.id)
            .cloned()
            .unwrap_or_else(|| vec![0u8; item.size.unwrap_or(0) as usize]);
        let chunks: Vec<Result<Bytes, ICloudError>> = body
            .chunks(64)
            .map(|c| Ok(Bytes::copy_from_slice(c)))
            .collect();
        Ok(stream::iter(chunks).boxed())
    }
}
