//! Single-flight access-token refresh coordination.
//!
//! When many concurrent requests fail with 401 at once, exactly one refresh
//! exchange must run; every other caller waits on its outcome. The in-flight
//! slot is checked and claimed under one lock acquisition, with no await
//! between the check and the claim, so two exchanges can never start.

use std::sync::Arc;

use reqwest::Client;
use serde::{Deserialize, Serialize};
use tokio::sync::{broadcast, Mutex};
use tracing::{debug, info, warn};
use url::Url;

use crate::credentials::CredentialStore;
use crate::error::ApiError;

type RefreshResult = Result<String, ApiError>;

enum FlightPath {
    Join(broadcast::Receiver<RefreshResult>),
    Lead(broadcast::Sender<RefreshResult>),
}

#[derive(Serialize)]
struct RefreshRequest<'a> {
    refresh_token: &'a str,
}

#[derive(Deserialize)]
struct RefreshResponse {
    access_token: String,
    refresh_token: Option<String>,
}

/// Coordinates refresh exchanges so at most one is in flight process-wide.
pub struct TokenRefreshCoordinator {
    http: Client,
    refresh_url: Url,
    store: Arc<dyn CredentialStore>,
    on_session_expired: Option<Arc<dyn Fn() + Send + Sync>>,
    in_flight: Mutex<Option<broadcast::Sender<RefreshResult>>>,
}

impl TokenRefreshCoordinator {
    /// Create a coordinator posting to `refresh_url`.
    #[must_use]
    pub fn new(http: Client, refresh_url: Url, store: Arc<dyn CredentialStore>) -> Self {
        Self {
            http,
            refresh_url,
            store,
            on_session_expired: None,
            in_flight: Mutex::new(None),
        }
    }

    /// Install a hook invoked when the session cannot be recovered.
    ///
    /// Host applications use this to redirect to the login screen.
    #[must_use]
    pub fn with_session_expired(mut self, hook: impl Fn() + Send + Sync + 'static) -> Self {
        self.on_session_expired = Some(Arc::new(hook));
        self
    }

    /// Obtain a fresh access token, joining an in-flight exchange if one
    /// exists.
    ///
    /// # Errors
    ///
    /// Returns a terminal UNAUTHORIZED error when no refresh credential is
    /// stored or the exchange fails; in both cases all credentials have been
    /// purged and the session-expired hook has fired.
    pub async fn refresh(&self) -> RefreshResult {
        // Check-and-claim happens under one guard, so only one exchange can
        // ever start per cycle.
        let path = {
            let mut slot = self.in_flight.lock().await;
            match slot.as_ref() {
                Some(tx) => FlightPath::Join(tx.subscribe()),
                None => {
                    let (tx, _) = broadcast::channel(1);
                    *slot = Some(tx.clone());
                    FlightPath::Lead(tx)
                }
            }
        };

        match path {
            FlightPath::Join(mut rx) => {
                debug!("joining in-flight credential refresh");
                match rx.recv().await {
                    Ok(result) => result,
                    Err(_) => Err(ApiError::unauthorized("credential refresh was interrupted")),
                }
            }
            FlightPath::Lead(tx) => {
                let result = self.exchange().await;
                // Clear the slot before fan-out so the next 401 starts a new
                // cycle.
                self.in_flight.lock().await.take();
                let _ = tx.send(result.clone());
                result
            }
        }
    }

    async fn exchange(&self) -> RefreshResult {
        let Some(refresh_token) = self.store.refresh_token().await else {
            warn!("401 received with no refresh credential stored");
            self.expire_session().await;
            return Err(ApiError::unauthorized("no refresh credential available"));
        };

        debug!("refreshing access credential");
        let response = self
            .http
            .post(self.refresh_url.clone())
            .json(&RefreshRequest {
                refresh_token: &refresh_token,
            })
            .send()
            .await;

        let response = match response {
            Ok(response) if response.status().is_success() => response,
            Ok(response) => {
                warn!(status = response.status().as_u16(), "refresh credential rejected");
                self.expire_session().await;
                return Err(ApiError::unauthorized("refresh credential rejected"));
            }
            Err(err) => {
                warn!(error = %err, "refresh exchange failed");
                self.expire_session().await;
                return Err(ApiError::unauthorized("refresh exchange failed"));
            }
        };

        match response.json::<RefreshResponse>().await {
            Ok(body) => {
                self.store
                    .store(body.access_token.clone(), body.refresh_token)
                    .await;
                info!("access credential refreshed");
                Ok(body.access_token)
            }
            Err(err) => {
                warn!(error = %err, "malformed refresh response");
                self.expire_session().await;
                Err(ApiError::unauthorized("malformed refresh response"))
            }
        }
    }

    async fn expire_session(&self) {
        self.store.clear().await;
        if let Some(hook) = &self.on_session_expired {
            hook();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::credentials::InMemoryCredentialStore;
    use serde_json::json;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::time::Duration;
    use wiremock::matchers::{body_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn coordinator(
        server: &MockServer,
        store: Arc<dyn CredentialStore>,
    ) -> TokenRefreshCoordinator {
        let refresh_url = Url::parse(&format!("{}/auth/refresh", server.uri()))
            .expect("mock server uri is valid");
        TokenRefreshCoordinator::new(Client::new(), refresh_url, store)
    }

    #[tokio::test]
    async fn test_concurrent_refreshes_issue_one_exchange() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/auth/refresh"))
            .and(body_json(json!({"refresh_token": "refresh-1"})))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_delay(Duration::from_millis(100))
                    .set_body_json(json!({
                        "access_token": "access-2",
                        "refresh_token": "refresh-2"
                    })),
            )
            .expect(1)
            .mount(&server)
            .await;

        let store = Arc::new(InMemoryCredentialStore::with_tokens("access-1", "refresh-1"));
        let coordinator = Arc::new(coordinator(&server, store.clone()));

        let mut handles = Vec::new();
        for _ in 0..5 {
            let coordinator = Arc::clone(&coordinator);
            handles.push(tokio::spawn(async move { coordinator.refresh().await }));
        }

        for handle in handles {
            let token = handle.await.expect("task panicked").expect("refresh failed");
            assert_eq!(token, "access-2");
        }
        assert_eq!(store.access_token().await, Some("access-2".to_owned()));
        assert_eq!(store.refresh_token().await, Some("refresh-2".to_owned()));
    }

    #[tokio::test]
    async fn test_failed_refresh_purges_credentials_and_signals_logout() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/auth/refresh"))
            .respond_with(ResponseTemplate::new(401))
            .expect(1)
            .mount(&server)
            .await;

        let store = Arc::new(InMemoryCredentialStore::with_tokens("access-1", "refresh-1"));
        let expired = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&expired);
        let coordinator =
            coordinator(&server, store.clone()).with_session_expired(move || {
                flag.store(true, Ordering::SeqCst);
            });

        let err = coordinator.refresh().await.expect_err("refresh must fail");
        assert_eq!(err.kind, crate::error::ErrorKind::Unauthorized);
        assert_eq!(store.access_token().await, None);
        assert_eq!(store.refresh_token().await, None);
        assert!(expired.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn test_missing_refresh_credential_skips_the_exchange() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/auth/refresh"))
            .respond_with(ResponseTemplate::new(200))
            .expect(0)
            .mount(&server)
            .await;

        let store = Arc::new(InMemoryCredentialStore::new());
        let expired = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&expired);
        let coordinator =
            coordinator(&server, store).with_session_expired(move || {
                flag.store(true, Ordering::SeqCst);
            });

        let err = coordinator.refresh().await.expect_err("refresh must fail");
        assert_eq!(err.kind, crate::error::ErrorKind::Unauthorized);
        assert!(expired.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn test_unrotated_refresh_token_is_kept() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/auth/refresh"))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(json!({"access_token": "access-2"})),
            )
            .mount(&server)
            .await;

        let store = Arc::new(InMemoryCredentialStore::with_tokens("access-1", "refresh-1"));
        let coordinator = coordinator(&server, store.clone());

        let token = coordinator.refresh().await.expect("refresh failed");
        assert_eq!(token, "access-2");
        assert_eq!(store.refresh_token().await, Some("refresh-1".to_owned()));
    }

    #[tokio::test]
    async fn test_sequential_refreshes_each_run_an_exchange() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/auth/refresh"))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(json!({"access_token": "access-2"})),
            )
            .expect(2)
            .mount(&server)
            .await;

        let store = Arc::new(InMemoryCredentialStore::with_tokens("access-1", "refresh-1"));
        let coordinator = coordinator(&server, store);

        coordinator.refresh().await.expect("first refresh failed");
        coordinator.refresh().await.expect("second refresh failed");
    }
}
