//! `TokenProvider` backed by the OS keyring, refreshing through an
//! [`OAuthHandler`] when the stored access token is near expiry.
//!
//! Refreshes are serialized per credentials id with a mutex map (the same
//! per-key-lock idiom the sync engine uses to serialize work on a source),
//! so concurrent `get_token` calls for the same credentials trigger
//! exactly one refresh instead of a thundering herd.

use std::collections::HashMap;
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use sercha_core::domain::{ConnectorError, CredentialsId};
use sercha_core::ports::{OAuthHandler, TokenProvider};
use tokio::sync::Mutex as AsyncMutex;

use crate::keyring_storage::KeyringTokenStorage;

/// Tokens are refreshed once they're within this window of expiry, per
/// spec §4.4.
const DEFAULT_SKEW: Duration = Duration::from_secs(60);

/// Epoch-stamped expiry (used by Notion and other non-expiring tokens)
/// never triggers a refresh.
fn is_non_expiring(expiry: chrono::DateTime<Utc>) -> bool {
    expiry.timestamp() == 0
}

pub struct KeyringTokenProvider {
    handler: Arc<dyn OAuthHandler>,
    skew: Duration,
    refresh_locks: StdMutex<HashMap<CredentialsId, Arc<AsyncMutex<()>>>>,
}

impl KeyringTokenProvider {
    pub fn new(handler: Arc<dyn OAuthHandler>) -> Self {
        Self {
            handler,
            skew: DEFAULT_SKEW,
            refresh_locks: StdMutex::new(HashMap::new()),
        }
    }

    pub fn with_skew(handler: Arc<dyn OAuthHandler>, skew: Duration) -> Self {
        Self {
            handler,
            skew,
            refresh_locks: StdMutex::new(HashMap::new()),
        }
    }

    fn lock_for(&self, credentials_id: CredentialsId) -> Arc<AsyncMutex<()>> {
        let mut locks = self.refresh_locks.lock().expect("refresh lock map poisoned");
        locks
            .entry(credentials_id)
            .or_insert_with(|| Arc::new(AsyncMutex::new(())))
            .clone()
    }
}

#[async_trait]
impl TokenProvider for KeyringTokenProvider {
    async fn get_token(&self, credentials_id: CredentialsId) -> Result<String, ConnectorError> {
        let skew = chrono::Duration::from_std(self.skew).unwrap_or(chrono::Duration::zero());

        // Fast path: no lock needed if the cached token is already valid.
        let stored = KeyringTokenStorage::load(credentials_id)?;
        if is_non_expiring(stored.expiry) || Utc::now() + skew < stored.expiry {
            return Ok(stored.access_token);
        }

        // Slow path: serialize refreshes for this credentials id. A
        // waiter that acquires the lock after a concurrent refresh
        // completed re-reads the now-fresh token instead of refreshing
        // again.
        let lock = self.lock_for(credentials_id);
        let _guard = lock.lock().await;

        let stored = KeyringTokenStorage::load(credentials_id)?;
        if is_non_expiring(stored.expiry) || Utc::now() + skew < stored.expiry {
            return Ok(stored.access_token);
        }

        let refresh_token = stored.refresh_token.clone().ok_or(ConnectorError::AuthInvalid)?;

        let mut refreshed = self.handler.refresh_token(&refresh_token).await?;
        if refreshed.refresh_token.is_none() {
            refreshed.refresh_token = Some(refresh_token);
        }

        KeyringTokenStorage::store(credentials_id, &refreshed)?;
        Ok(refreshed.access_token)
    }
}
