//! Credential storage for the authenticated session.
//!
//! The store is the single source of truth for "is the user signed in". It is
//! read by every outgoing request and written only by the refresh coordinator
//! and by logout. Browser hosts back this trait with origin-scoped persistent
//! storage; the in-memory implementation serves native hosts and tests.

use async_trait::async_trait;
use std::collections::HashMap;
use tokio::sync::RwLock;

/// Storage key for the access credential.
pub const ACCESS_TOKEN_KEY: &str = "docuflow.access_token";

/// Storage key for the refresh credential.
pub const REFRESH_TOKEN_KEY: &str = "docuflow.refresh_token";

/// Keyed credential store shared between the client and the host application.
#[async_trait]
pub trait CredentialStore: Send + Sync {
    /// Current access token, if any.
    async fn access_token(&self) -> Option<String>;

    /// Current refresh token, if any.
    async fn refresh_token(&self) -> Option<String>;

    /// Persist a new credential pair.
    ///
    /// A `None` refresh token leaves the stored refresh token unchanged; the
    /// refresh exchange only returns one when it was rotated.
    async fn store(&self, access: String, refresh: Option<String>);

    /// Remove both credentials.
    async fn clear(&self);
}

/// In-memory credential store.
pub struct InMemoryCredentialStore {
    entries: RwLock<HashMap<String, String>>,
}

impl InMemoryCredentialStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
        }
    }

    /// Create a store pre-loaded with a credential pair.
    #[must_use]
    pub fn with_tokens(access: impl Into<String>, refresh: impl Into<String>) -> Self {
        let mut entries = HashMap::new();
        entries.insert(ACCESS_TOKEN_KEY.to_owned(), access.into());
        entries.insert(REFRESH_TOKEN_KEY.to_owned(), refresh.into());
        Self {
            entries: RwLock::new(entries),
        }
    }
}

impl Default for InMemoryCredentialStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl CredentialStore for InMemoryCredentialStore {
    async fn access_token(&self) -> Option<String> {
        self.entries.read().await.get(ACCESS_TOKEN_KEY).cloned()
    }

    async fn refresh_token(&self) -> Option<String> {
        self.entries.read().await.get(REFRESH_TOKEN_KEY).cloned()
    }

    async fn store(&self, access: String, refresh: Option<String>) {
        let mut entries = self.entries.write().await;
        entries.insert(ACCESS_TOKEN_KEY.to_owned(), access);
        if let Some(refresh) = refresh {
            entries.insert(REFRESH_TOKEN_KEY.to_owned(), refresh);
        }
    }

    async fn clear(&self) {
        let mut entries = self.entries.write().await;
        entries.remove(ACCESS_TOKEN_KEY);
        entries.remove(REFRESH_TOKEN_KEY);
    }
}
