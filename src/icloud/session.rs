use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use reqwest::header::{HeaderMap, HeaderValue, CONTENT_TYPE, ORIGIN, REFERER, USER_AGENT};
use reqwest::{Method, Response};

use super::error::ICloudError;
use crate::transport::{RequestObserver, Transport};

/// Apple's setup APIs return session state in custom HTTP headers.
/// They are captured after every request and echoed back on the next one.
const HEADER_DATA: &[(&str, &str)] = &[
    ("X-Apple-ID-Account-Country", "account_country"),
    ("X-Apple-ID-Session-Id", "session_id"),
    ("X-Apple-Session-Token", "session_token"),
    ("X-Apple-TwoSV-Trust-Token", "trust_token"),
    ("scnt", "scnt"),
];

/// Session values sent back as request headers.
const ECHOED_HEADERS: &[(&str, &str)] = &[
    ("session_id", "X-Apple-ID-Session-Id"),
    ("scnt", "scnt"),
];

const DEFAULT_USER_AGENT: &str = "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/138.0.0.0 Safari/537.36";

/// In-memory HTTP session for one run. Nothing here is written to disk.
pub struct Session {
    transport: Transport,
    session_data: Mutex<HashMap<String, String>>,
    params: Mutex<BTreeMap<String, String>>,
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("transport", &self.transport)
            .field("session_data", &"<redacted>")
            .finish_non_exhaustive()
    }
}

impl Session {
    pub fn new(
        home_endpoint: &str,
        timeout: Duration,
        observer: Option<Arc<dyn RequestObserver>>,
    ) -> Result<Self, ICloudError> {
        // Origin/Referer headers are required by Apple's CORS checks
        let mut default_headers = HeaderMap::new();
        default_headers.insert(ORIGIN, HeaderValue::from_str(home_endpoint)?);
        default_headers.insert(
            REFERER,
            HeaderValue::from_str(&format!("{}/", home_endpoint))?,
        );
        default_headers.insert(USER_AGENT, HeaderValue::from_static(DEFAULT_USER_AGENT));

        Ok(Self {
            transport: Transport::new(default_headers, timeout, observer)?,
            session_data: Mutex::new(HashMap::new()),
            params: Mutex::new(BTreeMap::new()),
        })
    }

    pub fn transport(&self) -> &Transport {
        &self.transport
    }

    /// Set a query parameter attached to every setup and CloudKit call.
    pub fn set_param(&self, key: &str, value: impl Into<String>) {
        self.params
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(key.to_string(), value.into());
    }

    pub fn params(&self) -> BTreeMap<String, String> {
        self.params
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Query string form of the current parameters, sorted by key.
    pub fn encoded_params(&self) -> String {
        self.params()
            .iter()
            .map(|(k, v)| format!("{}={}", urlencoding::encode(k), urlencoding::encode(v)))
            .collect::<Vec<_>>()
            .join("&")
    }

    fn echoed_headers(&self) -> Result<HeaderMap, ICloudError> {
        let data = self.session_data.lock().unwrap_or_else(PoisonError::into_inner);
        let mut headers = HeaderMap::new();
        for &(session_key, header_name) in ECHOED_HEADERS {
            if let Some(value) = data.get(session_key) {
                headers.insert(header_name, HeaderValue::from_str(value)?);
            }
        }
        Ok(headers)
    }

    /// POST `body` with the session parameters in the query string.
    pub async fn post(
        &self,
        url: &str,
        body: String,
        content_type: &'static str,
    ) -> Result<Response, ICloudError> {
        let headers = self.echoed_headers()?;
        let params = self.params();
        let response = self
            .transport
            .send(Method::POST, url, |b| {
                b.query(&params)
                    .headers(headers)
                    .header(CONTENT_TYPE, content_type)
                    .body(body)
            })
            .await?;
        self.capture(&response);
        Ok(response)
    }

    /// GET with the session parameters in the query string.
    pub async fn get(&self, url: &str) -> Result<Response, ICloudError> {
        let headers = self.echoed_headers()?;
        let params = self.params();
        let response = self
            .transport
            .send(Method::GET, url, |b| b.query(&params).headers(headers))
            .await?;
        self.capture(&response);
        Ok(response)
    }

    /// Apple may rotate these at any time, so every response is inspected.
    fn capture(&self, response: &Response) {
        let mut data = self.session_data.lock().unwrap_or_else(PoisonError::into_inner);
        for &(header_name, session_key) in HEADER_DATA {
            if let Some(val) = response.headers().get(header_name) {
                if let Ok(val_str) = val.to_str() {
                    data.insert(session_key.to_string(), val_str.to_string());
                }
            }
        }
    }

    #[cfg(test)]
    fn session_value(&self, key: &str) -> Option<String> {
        self.session_data
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(key)
            .cloned()
    }

    #[cfg(test)]
    fn insert_session_value(&self, key: &str, value: &str) {
        self.session_data
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(key.to_string(), value.to_string());
    }
}
