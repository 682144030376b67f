//! Authorization Code + PKCE (RFC 6749 / RFC 7636), shared by every
//! provider family except Notion.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use oauth2::basic::BasicClient;
use oauth2::{
    AuthorizationCode, ClientId, ClientSecret, PkceCodeVerifier, RedirectUrl, RefreshToken,
    Scope, TokenResponse, TokenUrl,
};
use sercha_core::domain::{AccountIdentifier, ConnectorError};
use sercha_core::ports::{OAuthHandler, OAuthTokens, UserInfo};

/// A freshly-generated PKCE challenge/verifier pair, produced once per
/// authorization attempt by the caller (not the handler), so the
/// verifier can be held across the redirect without going through the
/// `OAuthHandler` trait object.
pub struct PkceMaterial {
    pub challenge: String,
    pub verifier: String,
}

impl PkceMaterial {
    pub fn generate() -> Self {
        let (challenge, verifier) = oauth2::PkceCodeChallenge::new_random_sha256();
        Self {
            challenge: challenge.as_str().to_string(),
            verifier: verifier.secret().clone(),
        }
    }
}

/// Static, non-secret configuration for one PKCE-dialect provider.
#[derive(Debug, Clone)]
pub struct PkceProviderConfig {
    pub client_id: String,
    pub client_secret: String,
    pub auth_url: String,
    pub token_url: String,
    pub user_info_url: String,
    pub redirect_uri: String,
    pub scopes: Vec<String>,
    /// JSON field in the user-info response holding the account identifier
    /// (`"email"` for Google/Microsoft/Dropbox, `"login"` for GitHub).
    pub account_identifier_field: &'static str,
    pub setup_hint: &'static str,
    /// Extra `key=value` pairs merged into the authorization URL, for
    /// providers that need non-standard params (Google's
    /// `access_type=offline`/`prompt=consent` to force a refresh token).
    pub extra_auth_params: &'static [(&'static str, &'static str)],
}

/// Handles the Google/Microsoft/GitHub/Dropbox dialect: standard
/// authorization-code exchange with PKCE, bearer-token user-info lookup.
pub struct PkceOAuthHandler {
    config: PkceProviderConfig,
    client: BasicClient,
    http: reqwest::Client,
}

impl PkceOAuthHandler {
    pub fn new(config: PkceProviderConfig) -> Result<Self, ConnectorError> {
        let client = BasicClient::new(ClientId::new(config.client_id.clone()))
            .set_client_secret(ClientSecret::new(config.client_secret.clone()))
            .set_auth_uri(
                oauth2::AuthUrl::new(config.auth_url.clone())
                    .map_err(|e| ConnectorError::InvalidInput(e.to_string()))?,
            )
            .set_token_uri(
                TokenUrl::new(config.token_url.clone())
                    .map_err(|e| ConnectorError::InvalidInput(e.to_string()))?,
            )
            .set_redirect_uri(
                RedirectUrl::new(config.redirect_uri.clone())
                    .map_err(|e| ConnectorError::InvalidInput(e.to_string()))?,
            );

        Ok(Self {
            config,
            client,
            http: reqwest::Client::new(),
        })
    }

    fn token_response_to_tokens(resp: &impl TokenResponse) -> OAuthTokens {
        let expiry = resp
            .expires_in()
            .and_then(|d| chrono::Duration::from_std(d).ok())
            .map(|d| Utc::now() + d)
            .unwrap_or_else(|| DateTime::<Utc>::from_timestamp(0, 0).unwrap());

        OAuthTokens {
            access_token: resp.access_token().secret().clone(),
            refresh_token: resp.refresh_token().map(|t| t.secret().clone()),
            token_type: "Bearer".to_string(),
            expiry,
        }
    }
}

#[async_trait]
impl OAuthHandler for PkceOAuthHandler {
    fn build_auth_url(&self, state: &str, pkce_challenge: Option<&str>) -> String {
        let mut params = vec![
            ("response_type".to_string(), "code".to_string()),
            ("client_id".to_string(), self.config.client_id.clone()),
            ("redirect_uri".to_string(), self.config.redirect_uri.clone()),
            ("scope".to_string(), self.config.scopes.join(" ")),
            ("state".to_string(), state.to_string()),
        ];
        if let Some(challenge) = pkce_challenge {
            params.push(("code_challenge".to_string(), challenge.to_string()));
            params.push(("code_challenge_method".to_string(), "S256".to_string()));
        }
        for (key, value) in self.config.extra_auth_params {
            params.push((key.to_string(), value.to_string()));
        }

        url::Url::parse_with_params(&self.config.auth_url, &params)
            .map(|u| u.to_string())
            .unwrap_or_else(|_| self.config.auth_url.clone())
    }

    async fn exchange_code(
        &self,
        code: &str,
        pkce_verifier: Option<&str>,
    ) -> Result<OAuthTokens, ConnectorError> {
        let mut request = self.client.exchange_code(AuthorizationCode::new(code.to_string()));
        if let Some(verifier) = pkce_verifier {
            request = request.set_pkce_verifier(PkceCodeVerifier::new(verifier.to_string()));
        }

        let response = request
            .request_async(&self.http)
            .await
            .map_err(|e| ConnectorError::Other(anyhow::anyhow!("token exchange failed: {e}")))?;

        Ok(Self::token_response_to_tokens(&response))
    }

    async fn refresh_token(&self, refresh_token: &str) -> Result<OAuthTokens, ConnectorError> {
        let response = self
            .client
            .exchange_refresh_token(&RefreshToken::new(refresh_token.to_string()))
            .request_async(&self.http)
            .await
            .map_err(|_| ConnectorError::AuthInvalid)?;

        Ok(Self::token_response_to_tokens(&response))
    }

    async fn get_user_info(&self, access_token: &str) -> Result<UserInfo, ConnectorError> {
        let response = self
            .http
            .get(&self.config.user_info_url)
            .bearer_auth(access_token)
            .send()
            .await
            .map_err(|e| ConnectorError::Other(e.into()))?;

        if response.status() == reqwest::StatusCode::UNAUTHORIZED {
            return Err(ConnectorError::AuthInvalid);
        }

        let body: serde_json::Value = response
            .json()
            .await
            .map_err(|e| ConnectorError::Other(e.into()))?;

        let identifier = body
            .get(self.config.account_identifier_field)
            .and_then(|v| v.as_str())
            .ok_or_else(|| {
                ConnectorError::Other(anyhow::anyhow!(
                    "user-info response missing '{}'",
                    self.config.account_identifier_field
                ))
            })?;

        Ok(UserInfo {
            account_identifier: AccountIdentifier::new(identifier)?,
            display_name: body
                .get("name")
                .and_then(|v| v.as_str())
                .map(|s| s.to_string()),
        })
    }

    fn default_scopes(&self) -> Vec<String> {
        self.config.scopes.clone()
    }

    fn setup_hint(&self) -> &'static str {
        self.config.setup_hint
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_config() -> PkceProviderConfig {
        PkceProviderConfig {
            client_id: "client-123".into(),
            client_secret: "secret".into(),
            auth_url: "https://example.com/oauth/authorize".into(),
            token_url: "https://example.com/oauth/token".into(),
            user_info_url: "https://example.com/userinfo".into(),
            redirect_uri: "http://127.0.0.1:18080/callback".into(),
            scopes: vec!["read".into(), "write".into()],
            account_identifier_field: "email",
            setup_hint: "register an app at example.com/developers",
            extra_auth_params: &[],
        }
    }

    #[test]
    fn pkce_material_generates_distinct_pairs() {
        let a = PkceMaterial::generate();
        let b = PkceMaterial::generate();
        assert_ne!(a.verifier, b.verifier);
        assert_ne!(a.challenge, b.challenge);
    }

    #[test]
    fn build_auth_url_includes_pkce_and_state() {
        let handler = PkceOAuthHandler::new(test_config()).unwrap();
        let url = handler.build_auth_url("state-abc", Some("challenge-xyz"));
        assert!(url.contains("client_id=client-123"));
        assert!(url.contains("state=state-abc"));
        assert!(url.contains("code_challenge=challenge-xyz"));
        assert!(url.contains("code_challenge_method=S256"));
    }

    #[test]
    fn build_auth_url_omits_pkce_params_when_not_given() {
        let handler = PkceOAuthHandler::new(test_config()).unwrap();
        let url = handler.build_auth_url("state-abc", None);
        assert!(!url.contains("code_challenge"));
    }

    #[test]
    fn default_scopes_matches_config() {
        let handler = PkceOAuthHandler::new(test_config()).unwrap();
        assert_eq!(handler.default_scopes(), vec!["read".to_string(), "write".to_string()]);
    }
}
