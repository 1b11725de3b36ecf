//! Remote account service: login, two-step verification, the photo catalog
//! and original-content download.
//!
//! [`RemoteService`] is the seam the rest of the crate talks to;
//! [`ICloudService`] implements it against iCloud's setup and CloudKit web
//! services.

pub mod endpoints;
pub mod error;
#[cfg(test)]
pub mod fake;
pub mod photos;
pub mod responses;
pub mod session;
pub mod types;

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use bytes::Bytes;
use futures_util::stream::{self, BoxStream, StreamExt, TryStreamExt};
use reqwest::{Method, StatusCode};
use serde_json::Value;
use uuid::Uuid;

use self::endpoints::Endpoints;
pub use self::error::ICloudError;
use self::responses::{AccountLoginResponse, DeviceListResponse, SendCodeResponse};
use self::session::Session;
pub use self::types::{RemoteItem, TrustedDevice};
use crate::transport::{RequestObserver, Transport};
use crate::types::Domain;

/// Apple error code for an incorrect verification code.
const WRONG_CODE: &str = "-21669";

/// Statuses Apple answers with when it rejects the credentials themselves.
const REJECTED_LOGIN_STATUSES: &[u16] = &[401, 403, 421, 450];

/// Result of submitting credentials.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoginOutcome {
    Authenticated,
    ChallengeRequired,
}

pub type ContentStream = BoxStream<'static, Result<Bytes, ICloudError>>;

#[async_trait::async_trait]
pub trait RemoteService: Send + Sync {
    /// Transport every call of this service is issued through.
    fn transport(&self) -> &Transport;

    async fn authenticate(&self, account: &str, password: &str)
        -> Result<LoginOutcome, ICloudError>;

    async fn trusted_devices(&self) -> Result<Vec<TrustedDevice>, ICloudError>;

    /// Ask Apple to deliver a code to `device`. `Ok(false)` means the
    /// service declined.
    async fn send_verification_code(&self, device: &TrustedDevice) -> Result<bool, ICloudError>;

    /// `Ok(false)` means the code was wrong or the session still needs a
    /// challenge afterwards.
    async fn validate_verification_code(
        &self,
        device: &TrustedDevice,
        code: &str,
    ) -> Result<bool, ICloudError>;

    /// Opaque account record, for display only.
    async fn account_summary(&self) -> Result<Value, ICloudError>;

    /// Catalog items in ascending catalog order, fetched lazily page by page.
    fn media_items(&self) -> BoxStream<'_, Result<RemoteItem, ICloudError>>;

    /// Total number of catalog items, when the service can tell cheaply.
    async fn item_count(&self) -> Result<Option<u64>, ICloudError> {
        Ok(None)
    }

    async fn fetch_original(&self, item: &RemoteItem) -> Result<ContentStream, ICloudError>;
}

pub struct ICloudService {
    endpoints: Endpoints,
    session: Session,
    account: Mutex<Option<AccountLoginResponse>>,
}

impl std::fmt::Debug for ICloudService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ICloudService")
            .field("endpoints", &self.endpoints)
            .field("session", &self.session)
            .finish_non_exhaustive()
    }
}

impl ICloudService {
    pub fn new(
        domain: Domain,
        timeout: Duration,
        observer: Option<Arc<dyn RequestObserver>>,
    ) -> Result<Self, ICloudError> {
        let endpoints = Endpoints::for_domain(domain);
        let session = Session::new(endpoints.home, timeout, observer)?;
        session.set_param("clientBuildNumber", "2522Project44");
        session.set_param("clientMasteringNumber", "2522B2");
        session.set_param("clientId", Uuid::new_v4().to_string().to_uppercase());

        Ok(Self {
            endpoints,
            session,
            account: Mutex::new(None),
        })
    }

    /// Record a login/validate payload and return whether a challenge is
    /// still pending.
    fn store_account(&self, data: AccountLoginResponse) -> Result<bool, ICloudError> {
        // Apple redirects China mainland accounts to .com.cn; the user has
        // to re-run with --domain cn.
        if let Some(domain_to_use) = &data.domain_to_use {
            return Err(ICloudError::FailedLogin(format!(
                "Apple insists on using {} for this account; use the --domain option",
                domain_to_use
            )));
        }
        if let Some(dsid) = data.dsid() {
            self.session.set_param("dsid", dsid);
        }
        let requires_two_step = data.requires_two_step();
        *self.account.lock().unwrap_or_else(PoisonError::into_inner) = Some(data);
        Ok(requires_two_step)
    }

    /// Re-read account state for the current session cookies.
    async fn validate_session(&self) -> Result<Value, ICloudError> {
        let url = format!("{}/validate", self.endpoints.setup);
        let response = self
            .session
            .post(&url, "null".to_string(), "application/json")
            .await?;
        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(ICloudError::from_response_body(status.as_u16(), &text));
        }
        let body: Value = response.json().await?;
        self.store_account(serde_json::from_value(body.clone())?)?;
        Ok(body)
    }

    fn photos_endpoint(&self) -> Result<String, ICloudError> {
        let account = self.account.lock().unwrap_or_else(PoisonError::into_inner);
        account
            .as_ref()
            .and_then(|a| a.ckdatabasews_url())
            .map(photos::database_endpoint)
            .ok_or(ICloudError::MissingWebservice("ckdatabasews"))
    }

    async fn post_cloudkit(&self, url: &str, body: &Value) -> Result<Value, ICloudError> {
        let url = format!("{}?{}", url, self.session.encoded_params());
        let response = self
            .session
            .transport()
            .send(Method::POST, &url, |b| {
                b.header(reqwest::header::CONTENT_TYPE, "text/plain")
                    .body(body.to_string())
            })
            .await?;
        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(ICloudError::from_response_body(status.as_u16(), &text));
        }
        Ok(response.json().await?)
    }

    async fn fetch_page(&self, offset: u64) -> Result<photos::CatalogPage, ICloudError> {
        let url = format!("{}/records/query", self.photos_endpoint()?);
        tracing::debug!(offset, "Fetching catalog page");
        let response = self.post_cloudkit(&url, &photos::list_query(offset)).await?;
        Ok(photos::parse_page(response))
    }
}

/// Paging state of [`ICloudService::media_items`].
struct Cursor {
    offset: u64,
    buffered: VecDeque<Result<RemoteItem, ICloudError>>,
    exhausted: bool,
}

#[async_trait::async_trait]
impl RemoteService for ICloudService {
    fn transport(&self) -> &Transport {
        self.session.transport()
    }

    async fn authenticate(
        &self,
        account: &str,
        password: &str,
    ) -> Result<LoginOutcome, ICloudError> {
        tracing::debug!("Authenticating as {}", account);
        let url = format!("{}/login", self.endpoints.setup);
        let body = serde_json::json!({
            "apple_id": account,
            "password": password,
            "extended_login": false,
        });
        let response = self
            .session
            .post(&url, body.to_string(), "application/json")
            .await?;

        let status = response.status();
        if REJECTED_LOGIN_STATUSES.contains(&status.as_u16()) {
            let text = response.text().await.unwrap_or_default();
            let reason = match ICloudError::from_response_body(status.as_u16(), &text) {
                ICloudError::ApiError { message, .. } if !message.is_empty() => message,
                _ => format!("HTTP {}", status.as_u16()),
            };
            return Err(ICloudError::FailedLogin(reason));
        }
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(ICloudError::from_response_body(status.as_u16(), &text));
        }

        let data: AccountLoginResponse = response.json().await?;
        if self.store_account(data)? {
            Ok(LoginOutcome::ChallengeRequired)
        } else {
            Ok(LoginOutcome::Authenticated)
        }
    }

    async fn trusted_devices(&self) -> Result<Vec<TrustedDevice>, ICloudError> {
        let url = format!("{}/listDevices", self.endpoints.setup);
        let response = self.session.get(&url).await?;
        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(ICloudError::from_response_body(status.as_u16(), &text));
        }
        let list: DeviceListResponse = response.json().await?;
        Ok(list
            .devices
            .into_iter()
            .enumerate()
            .map(|(i, record)| TrustedDevice::from_record(i, record))
            .collect())
    }

    async fn send_verification_code(&self, device: &TrustedDevice) -> Result<bool, ICloudError> {
        let url = format!("{}/sendVerificationCode", self.endpoints.setup);
        let body = serde_json::to_string(&device.record)?;
        let response = self.session.post(&url, body, "application/json").await?;
        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(ICloudError::from_response_body(status.as_u16(), &text));
        }
        let result: SendCodeResponse = response.json().await?;
        Ok(result.success)
    }

    async fn validate_verification_code(
        &self,
        device: &TrustedDevice,
        code: &str,
    ) -> Result<bool, ICloudError> {
        let url = format!("{}/validateVerificationCode", self.endpoints.setup);
        let mut body = serde_json::to_value(&device.record)?;
        body["verificationCode"] = Value::String(code.to_string());
        body["trustBrowser"] = Value::Bool(true);

        let response = self
            .session
            .post(&url, body.to_string(), "application/json")
            .await?;
        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            if text.contains(WRONG_CODE) {
                tracing::debug!("Apple rejected the verification code");
                return Ok(false);
            }
            return Err(ICloudError::from_response_body(status.as_u16(), &text));
        }

        // A trusted browser no longer reports a pending challenge.
        self.validate_session().await?;
        let still_challenged = self
            .account
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .is_some_and(AccountLoginResponse::requires_two_step);
        Ok(!still_challenged)
    }

    async fn account_summary(&self) -> Result<Value, ICloudError> {
        let mut body = self.validate_session().await?;
        if let Some(ds_info) = body.get_mut("dsInfo") {
            return Ok(ds_info.take());
        }
        Ok(body)
    }

    fn media_items(&self) -> BoxStream<'_, Result<RemoteItem, ICloudError>> {
        let cursor = Cursor {
            offset: 0,
            buffered: VecDeque::new(),
            exhausted: false,
        };
        stream::unfold(cursor, move |mut cursor| async move {
            loop {
                if let Some(next) = cursor.buffered.pop_front() {
                    return Some((next, cursor));
                }
                if cursor.exhausted {
                    return None;
                }
                match self.fetch_page(cursor.offset).await {
                    Ok(page) => {
                        if page.masters == 0 {
                            cursor.exhausted = true;
                        }
                        cursor.offset += page.masters as u64;
                        cursor.buffered.extend(page.items);
                    }
                    Err(e) => {
                        cursor.exhausted = true;
                        return Some((Err(e), cursor));
                    }
                }
            }
        })
        .boxed()
    }

    async fn item_count(&self) -> Result<Option<u64>, ICloudError> {
        let url = format!(
            "{}/internal/records/query/batch",
            self.photos_endpoint()?
        );
        let response = self.post_cloudkit(&url, &photos::count_query()).await?;
        Ok(photos::parse_count(&response))
    }

    async fn fetch_original(&self, item: &RemoteItem) -> Result<ContentStream, ICloudError> {
        let response = self
            .session
            .transport()
            .send(Method::GET, &item.content_location, |b| b)
            .await?;
        let status = response.status();
        if status != StatusCode::OK {
            return Err(ICloudError::ApiError {
                code: status.as_u16(),
                message: format!("downloading {}", item.id),
            });
        }
        Ok(response.bytes_stream().map_err(ICloudError::from).boxed())
    }
}
