//! The `OAuthHandler` port: per-provider-family OAuth wire dialect.
//!
//! Google/Microsoft/GitHub/Dropbox all speak the standard Authorization
//! Code + PKCE dialect (RFC 6749 / RFC 7636) and share one implementation
//! parameterized by endpoint URLs; Notion is PKCE-exempt and uses HTTP
//! Basic auth with a JSON token body, so it gets its own implementation.
//! Both live behind this one trait.

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::domain::{AccountIdentifier, ConnectorError};

/// Tokens returned by an authorization-code exchange or a refresh.
#[derive(Debug, Clone)]
pub struct OAuthTokens {
    pub access_token: String,
    /// `None` when a refresh response omitted it; callers must preserve
    /// the previous refresh token in that case (spec §4.3).
    pub refresh_token: Option<String>,
    pub token_type: String,
    pub expiry: DateTime<Utc>,
}

/// The account a set of tokens is bound to, as reported by the provider's
/// user-info endpoint.
#[derive(Debug, Clone)]
pub struct UserInfo {
    pub account_identifier: AccountIdentifier,
    pub display_name: Option<String>,
}

#[async_trait]
pub trait OAuthHandler: Send + Sync {
    /// Builds the provider's authorization URL the user is sent to.
    /// `pkce_challenge` is `None` only for Notion, which doesn't support PKCE.
    fn build_auth_url(&self, state: &str, pkce_challenge: Option<&str>) -> String;

    /// Exchanges an authorization code for tokens. `pkce_verifier` mirrors
    /// `build_auth_url`'s `pkce_challenge`.
    async fn exchange_code(
        &self,
        code: &str,
        pkce_verifier: Option<&str>,
    ) -> Result<OAuthTokens, ConnectorError>;

    /// Exchanges a refresh token for a new access token.
    async fn refresh_token(&self, refresh_token: &str) -> Result<OAuthTokens, ConnectorError>;

    /// Looks up the account identifier (usually an email) bound to an
    /// access token.
    async fn get_user_info(&self, access_token: &str) -> Result<UserInfo, ConnectorError>;

    /// The scopes this handler requests when none are configured explicitly.
    fn default_scopes(&self) -> Vec<String>;

    /// A short human-readable hint for registering an OAuth app with this
    /// provider, surfaced to the user the first time a source of this
    /// family is configured.
    fn setup_hint(&self) -> &'static str;
}
