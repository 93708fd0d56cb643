//! HTTP client facade wiring governance into a single request path.
//!
//! Every business call goes caller → admission control → transport → retry
//! policy (transport failures only) → refresh coordinator (first 401) →
//! error classification. Rejections by admission control never reach the
//! network and surface as THROTTLED, distinct from transport and server
//! errors.

use std::sync::Arc;

use reqwest::{Client, Method, StatusCode};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tracing::{debug, instrument};
use url::Url;

use crate::bus::ErrorBus;
use crate::config::{build_http_client, ClientConfig};
use crate::credentials::CredentialStore;
use crate::error::{ApiError, TransportFailure};
use crate::refresh::TokenRefreshCoordinator;
use crate::retry::RetryPolicy;
use crate::throttle::{AdmissionDecision, RequestThrottler, ThrottleKey};

/// API client for the Docuflow backend.
///
/// Construct one per process at application start and share it; the
/// throttle windows, breaker, and refresh coordination are all scoped to
/// this instance.
pub struct ApiClient {
    config: ClientConfig,
    http: Client,
    throttler: RequestThrottler,
    retry: RetryPolicy,
    refresh: TokenRefreshCoordinator,
    store: Arc<dyn CredentialStore>,
    errors: ErrorBus,
}

impl ApiClient {
    /// Create a client from configuration and a credential store.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be built or the refresh
    /// endpoint path does not resolve against the base URL.
    pub fn new(config: ClientConfig, store: Arc<dyn CredentialStore>) -> Result<Self, ApiError> {
        let http = build_http_client(&config)
            .map_err(|e| ApiError::network(format!("failed to build HTTP client: {e}")))?;
        let refresh_url = config
            .base_url
            .join(&config.refresh_path)
            .map_err(|e| ApiError::network(format!("invalid refresh path: {e}")))?;

        Ok(Self {
            http: http.clone(),
            throttler: RequestThrottler::new(config.throttle.clone()),
            retry: RetryPolicy::new(config.retry.clone()),
            refresh: TokenRefreshCoordinator::new(http, refresh_url, Arc::clone(&store)),
            store,
            errors: ErrorBus::new(),
            config,
        })
    }

    /// Install a hook invoked when the session cannot be recovered.
    #[must_use]
    pub fn with_session_expired(mut self, hook: impl Fn() + Send + Sync + 'static) -> Self {
        self.refresh = self.refresh.with_session_expired(hook);
        self
    }

    /// The bus carrying errors classified as global.
    #[must_use]
    pub fn errors(&self) -> &ErrorBus {
        &self.errors
    }

    /// Persist a credential pair after a login exchange.
    pub async fn store_session(&self, access: String, refresh: Option<String>) {
        self.store.store(access, refresh).await;
    }

    /// Clear credentials and all cached payloads.
    pub async fn logout(&self) {
        self.store.clear().await;
        self.throttler.reset().await;
    }

    /// Issue a GET request and decode the JSON response.
    ///
    /// # Errors
    ///
    /// Returns the classified [`ApiError`] on any terminal failure.
    pub async fn get<T: DeserializeOwned>(&self, path: &str) -> Result<T, ApiError> {
        self.request(Method::GET, path, None::<&()>, None).await
    }

    /// Issue a POST request with a JSON body.
    ///
    /// # Errors
    ///
    /// Returns the classified [`ApiError`] on any terminal failure.
    pub async fn post<T, B>(&self, path: &str, body: &B) -> Result<T, ApiError>
    where
        T: DeserializeOwned,
        B: Serialize + ?Sized,
    {
        self.request(Method::POST, path, Some(body), None).await
    }

    /// Issue a PUT request with a JSON body.
    ///
    /// # Errors
    ///
    /// Returns the classified [`ApiError`] on any terminal failure.
    pub async fn put<T, B>(&self, path: &str, body: &B) -> Result<T, ApiError>
    where
        T: DeserializeOwned,
        B: Serialize + ?Sized,
    {
        self.request(Method::PUT, path, Some(body), None).await
    }

    /// Issue a DELETE request.
    ///
    /// # Errors
    ///
    /// Returns the classified [`ApiError`] on any terminal failure.
    pub async fn delete<T: DeserializeOwned>(&self, path: &str) -> Result<T, ApiError> {
        self.request(Method::DELETE, path, None::<&()>, None).await
    }

    /// Issue a request with full control over verb, body, and cancellation.
    ///
    /// The path is resolved against the configured base URL. Cancellation is
    /// recognized as a non-retryable transport failure.
    ///
    /// # Errors
    ///
    /// Returns the classified [`ApiError`] on any terminal failure.
    #[instrument(skip(self, body, cancel), fields(method = %method, path))]
    pub async fn request<T, B>(
        &self,
        method: Method,
        path: &str,
        body: Option<&B>,
        cancel: Option<&CancellationToken>,
    ) -> Result<T, ApiError>
    where
        T: DeserializeOwned,
        B: Serialize + ?Sized,
    {
        let key = ThrottleKey::new(method.clone(), path);
        match self.throttler.check(&key).await {
            AdmissionDecision::Admit => {}
            AdmissionDecision::ServeCached(value) => {
                // Status 0 marks the payload as cache-served.
                return decode_value(&value, 0);
            }
            AdmissionDecision::Reject(rejection) => {
                debug!(%key, %rejection, "rejected by admission control");
                return Err(ApiError::throttled(rejection.to_string()));
            }
        }

        let url = self
            .config
            .base_url
            .join(path)
            .map_err(|e| ApiError::network(format!("invalid request path: {e}")))?;

        let mut attempt = 0u32;
        let mut first_unauthorized: Option<ApiError> = None;

        loop {
            match self.send_once(&method, &url, body, cancel).await {
                Err(failure) => {
                    if self.retry.should_retry(&failure, attempt) {
                        attempt += 1;
                        let delay = self.retry.delay_for_attempt(attempt);
                        debug!(
                            %key,
                            attempt,
                            delay_ms = delay.as_millis() as u64,
                            "transient transport failure, retrying"
                        );
                        tokio::time::sleep(delay).await;
                        continue;
                    }
                    let error = ApiError::from(failure);
                    self.report(&error);
                    return Err(error);
                }
                Ok((status, bytes)) => {
                    if status.is_success() {
                        let value = parse_json(status, &bytes)?;
                        self.throttler.record_success(&key, value.clone()).await;
                        return decode_value(&value, status.as_u16());
                    }

                    if status == StatusCode::UNAUTHORIZED {
                        let error = ApiError::from_response(status.as_u16(), &bytes);
                        if let Some(original) = first_unauthorized.take() {
                            // Refreshed once already; surface the original
                            // 401 rather than looping.
                            return Err(original);
                        }
                        first_unauthorized = Some(error);
                        self.refresh.refresh().await?;
                        continue;
                    }

                    let error = ApiError::from_response(status.as_u16(), &bytes);
                    self.report(&error);
                    return Err(error);
                }
            }
        }
    }

    async fn send_once<B>(
        &self,
        method: &Method,
        url: &Url,
        body: Option<&B>,
        cancel: Option<&CancellationToken>,
    ) -> Result<(StatusCode, Vec<u8>), TransportFailure>
    where
        B: Serialize + ?Sized,
    {
        let mut request = self.http.request(method.clone(), url.clone());
        if let Some(token) = self.store.access_token().await {
            request = request.bearer_auth(token);
        }
        if let Some(body) = body {
            request = request.json(body);
        }

        let send = async {
            let response = request
                .send()
                .await
                .map_err(|e| TransportFailure::from_reqwest(&e))?;
            let status = response.status();
            let bytes = response
                .bytes()
                .await
                .map_err(|e| TransportFailure::from_reqwest(&e))?;
            Ok((status, bytes.to_vec()))
        };

        match cancel {
            Some(token) => tokio::select! {
                () = token.cancelled() => Err(TransportFailure::Canceled),
                result = send => result,
            },
            None => send.await,
        }
    }

    fn report(&self, error: &ApiError) {
        if error.is_global_error() {
            self.errors.publish(error);
        }
    }
}

fn parse_json(status: StatusCode, bytes: &[u8]) -> Result<Value, ApiError> {
    if bytes.is_empty() {
        return Ok(Value::Null);
    }
    serde_json::from_slice(bytes).map_err(|e| ApiError::invalid_body(status.as_u16(), e.to_string()))
}

fn decode_value<T: DeserializeOwned>(value: &Value, status: u16) -> Result<T, ApiError> {
    serde_json::from_value(value.clone())
        .map_err(|e| ApiError::invalid_body(status, e.to_string()))
}
