//! OS keyring-backed storage for OAuth tokens, keyed by credentials id.

use keyring::Entry;
use sercha_core::domain::{ConnectorError, CredentialsId};
use sercha_core::ports::OAuthTokens;
use serde::{Deserialize, Serialize};

const KEYRING_SERVICE: &str = "sercha";

#[derive(Serialize, Deserialize)]
struct StoredTokens {
    access_token: String,
    refresh_token: Option<String>,
    token_type: String,
    expiry: chrono::DateTime<chrono::Utc>,
}

impl From<&OAuthTokens> for StoredTokens {
    fn from(tokens: &OAuthTokens) -> Self {
        Self {
            access_token: tokens.access_token.clone(),
            refresh_token: tokens.refresh_token.clone(),
            token_type: tokens.token_type.clone(),
            expiry: tokens.expiry,
        }
    }
}

impl From<StoredTokens> for OAuthTokens {
    fn from(stored: StoredTokens) -> Self {
        Self {
            access_token: stored.access_token,
            refresh_token: stored.refresh_token,
            token_type: stored.token_type,
            expiry: stored.expiry,
        }
    }
}

/// Stores/loads OAuth tokens in the platform keyring, one entry per
/// credentials id.
pub struct KeyringTokenStorage;

impl KeyringTokenStorage {
    fn entry(credentials_id: CredentialsId) -> Result<Entry, ConnectorError> {
        Entry::new(KEYRING_SERVICE, &credentials_id.to_string())
            .map_err(|e| ConnectorError::Other(e.into()))
    }

    pub fn store(credentials_id: CredentialsId, tokens: &OAuthTokens) -> Result<(), ConnectorError> {
        let entry = Self::entry(credentials_id)?;
        let json = serde_json::to_string(&StoredTokens::from(tokens))
            .map_err(|e| ConnectorError::Other(e.into()))?;
        entry.set_password(&json).map_err(|e| ConnectorError::Other(e.into()))
    }

    pub fn load(credentials_id: CredentialsId) -> Result<OAuthTokens, ConnectorError> {
        let entry = Self::entry(credentials_id)?;
        let json = entry
            .get_password()
            .map_err(|_| ConnectorError::AuthRequired)?;
        let stored: StoredTokens =
            serde_json::from_str(&json).map_err(|e| ConnectorError::Other(e.into()))?;
        Ok(stored.into())
    }

    pub fn clear(credentials_id: CredentialsId) -> Result<(), ConnectorError> {
        let entry = Self::entry(credentials_id)?;
        match entry.delete_credential() {
            Ok(()) | Err(keyring::Error::NoEntry) => Ok(()),
            Err(e) => Err(ConnectorError::Other(e.into())),
        }
    }
}
