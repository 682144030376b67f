//! The `TokenProvider` port: always-valid bearer token lookup.
//!
//! Connectors never talk to an `OAuthHandler` directly; they ask a
//! `TokenProvider` for a token and get back something already refreshed if
//! it was within the expiry skew, per spec §4.4.

use async_trait::async_trait;

use crate::domain::{ConnectorError, CredentialsId};

#[async_trait]
pub trait TokenProvider: Send + Sync {
    /// Returns a bearer token valid for at least the provider's skew
    /// window, refreshing first if the stored token is about to expire.
    /// Returns `ConnectorError::AuthInvalid` if refresh itself fails.
    async fn get_token(&self, credentials_id: CredentialsId) -> Result<String, ConnectorError>;
}
