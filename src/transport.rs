//! HTTP transport shared by every remote call.
//!
//! Certificate verification is a property of the transport value, not of the
//! process. Two clients share one cookie jar; the [`TransportSettings`]
//! current at request time decide which of them sends. [`InsecureScope`]
//! swaps the settings for its lifetime and puts the previous snapshot back
//! when dropped, so the verification-disabled state cannot outlive the block
//! that asked for it.

use std::future::Future;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use reqwest::header::HeaderMap;
use reqwest::{Client, Method, RequestBuilder, Response, StatusCode};

/// Hook invoked around every request the transport issues.
pub trait RequestObserver: Send + Sync {
    fn on_request(&self, method: &Method, url: &str, verified: bool);
    fn on_response(&self, method: &Method, url: &str, status: StatusCode);
}

/// Logs each request and response status at `debug` level.
pub struct TracingObserver;

impl RequestObserver for TracingObserver {
    fn on_request(&self, method: &Method, url: &str, verified: bool) {
        tracing::debug!(target: "icloud_sync::http", %method, url, verified, "request");
    }

    fn on_response(&self, method: &Method, url: &str, status: StatusCode) {
        tracing::debug!(target: "icloud_sync::http", %method, url, status = status.as_u16(), "response");
    }
}

/// Verification behaviour of the transport at a point in time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransportSettings {
    pub verify_certificates: bool,
    /// Emit a warning for each request sent without verification.
    pub warn_on_unverified: bool,
}

impl TransportSettings {
    /// Settings installed by [`InsecureScope`].
    pub const INSECURE: Self = Self {
        verify_certificates: false,
        warn_on_unverified: false,
    };
}

impl Default for TransportSettings {
    fn default() -> Self {
        Self {
            verify_certificates: true,
            warn_on_unverified: true,
        }
    }
}

pub struct Transport {
    verified: Client,
    unverified: Client,
    settings: Mutex<TransportSettings>,
    observer: Option<Arc<dyn RequestObserver>>,
}

impl std::fmt::Debug for Transport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Transport")
            .field("settings", &self.settings())
            .field("observer", &self.observer.is_some())
            .finish_non_exhaustive()
    }
}

impl Transport {
    pub fn new(
        default_headers: HeaderMap,
        timeout: Duration,
        observer: Option<Arc<dyn RequestObserver>>,
    ) -> reqwest::Result<Self> {
        let jar = Arc::new(reqwest::cookie::Jar::default());
        let build = |accept_invalid_certs: bool| {
            Client::builder()
                .cookie_provider(jar.clone())
                .default_headers(default_headers.clone())
                .timeout(timeout)
                .danger_accept_invalid_certs(accept_invalid_certs)
                .build()
        };

        Ok(Self {
            verified: build(false)?,
            unverified: build(true)?,
            settings: Mutex::new(TransportSettings::default()),
            observer,
        })
    }

    /// Snapshot of the current settings.
    pub fn settings(&self) -> TransportSettings {
        *self.settings.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn replace_settings(&self, next: TransportSettings) -> TransportSettings {
        let mut current = self.settings.lock().unwrap_or_else(PoisonError::into_inner);
        std::mem::replace(&mut *current, next)
    }

    /// Disable certificate verification (and its warning) until the returned
    /// guard is dropped.
    ///
    /// The transport is shared, so requests issued concurrently from other
    /// tasks during the scope are unverified as well.
    pub fn insecure_scope(&self) -> InsecureScope<'_> {
        let saved = self.replace_settings(TransportSettings::INSECURE);
        tracing::debug!("TLS certificate verification disabled");
        InsecureScope {
            transport: self,
            saved,
        }
    }

    /// Send a request through whichever client the current settings select.
    ///
    /// `customize` adds headers, query and body to the builder.
    pub async fn send(
        &self,
        method: Method,
        url: &str,
        customize: impl FnOnce(RequestBuilder) -> RequestBuilder,
    ) -> reqwest::Result<Response> {
        let settings = self.settings();
        if !settings.verify_certificates && settings.warn_on_unverified {
            tracing::warn!(url, "Sending request without TLS certificate verification");
        }
        if let Some(observer) = &self.observer {
            observer.on_request(&method, url, settings.verify_certificates);
        }

        let client = if settings.verify_certificates {
            &self.verified
        } else {
            &self.unverified
        };
        let response = customize(client.request(method.clone(), url)).send().await?;

        if let Some(observer) = &self.observer {
            observer.on_response(&method, url, response.status());
        }
        Ok(response)
    }
}

/// Guard returned by [`Transport::insecure_scope`].
///
/// Restores the settings captured at creation on drop: normal return, `?`
/// early exit, unwinding, or the owning future being dropped mid-flight.
#[must_use = "verification is restored as soon as the scope is dropped"]
pub struct InsecureScope<'a> {
    transport: &'a Transport,
    saved: TransportSettings,
}

impl Drop for InsecureScope<'_> {
    fn drop(&mut self) {
        self.transport.replace_settings(self.saved);
        tracing::debug!("TLS certificate verification restored");
    }
}

/// Run `body` with certificate verification disabled on `transport`.
pub async fn with_insecure_transport<F, T>(transport: &Transport, body: F) -> T
where
    F: Future<Output = T>,
{
    let _scope = transport.insecure_scope();
    body.await
}
