//! Notion OAuth: PKCE-exempt, HTTP Basic client authentication, JSON
//! token exchange body, and a mandatory `Notion-Version` header on every
//! API call (including the exchange and user-info lookups).

use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use chrono::{DateTime, Utc};
use sercha_core::domain::{AccountIdentifier, ConnectorError};
use sercha_core::ports::{OAuthHandler, OAuthTokens, UserInfo};
use serde::Deserialize;

pub const AUTH_URL: &str = "https://api.notion.com/v1/oauth/authorize";
pub const TOKEN_URL: &str = "https://api.notion.com/v1/oauth/token";
pub const USER_INFO_URL: &str = "https://api.notion.com/v1/users/me";
pub const NOTION_VERSION: &str = "2022-06-28";

#[derive(Debug, Clone)]
pub struct NotionConfig {
    pub client_id: String,
    pub client_secret: String,
    pub redirect_uri: String,
}

pub struct NotionOAuthHandler {
    config: NotionConfig,
    http: reqwest::Client,
}

impl NotionOAuthHandler {
    pub fn new(config: NotionConfig) -> Self {
        Self {
            config,
            http: reqwest::Client::new(),
        }
    }

    fn basic_auth_header(&self) -> String {
        let credentials = format!("{}:{}", self.config.client_id, self.config.client_secret);
        format!("Basic {}", STANDARD.encode(credentials))
    }
}

#[derive(Deserialize)]
struct NotionTokenResponse {
    access_token: String,
    // Notion's integration tokens do not expire and carry no refresh token.
    #[serde(default)]
    bot_id: Option<String>,
}

#[derive(Deserialize)]
struct NotionUser {
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    bot: Option<NotionBotOwner>,
    id: String,
}

#[derive(Deserialize)]
struct NotionBotOwner {
    #[serde(default)]
    owner: Option<NotionOwner>,
    #[serde(default)]
    workspace_name: Option<String>,
}

#[derive(Deserialize)]
struct NotionOwner {
    #[serde(default)]
    user: Option<NotionOwnerUser>,
}

#[derive(Deserialize)]
struct NotionOwnerUser {
    #[serde(default)]
    person: Option<NotionPerson>,
}

#[derive(Deserialize)]
struct NotionPerson {
    #[serde(default)]
    email: Option<String>,
}

#[async_trait]
impl OAuthHandler for NotionOAuthHandler {
    fn build_auth_url(&self, state: &str, _pkce_challenge: Option<&str>) -> String {
        let params = [
            ("client_id", self.config.client_id.as_str()),
            ("redirect_uri", self.config.redirect_uri.as_str()),
            ("response_type", "code"),
            ("owner", "user"),
            ("state", state),
        ];
        url::Url::parse_with_params(AUTH_URL, params)
            .map(|u| u.to_string())
            .unwrap_or_else(|_| AUTH_URL.to_string())
    }

    async fn exchange_code(
        &self,
        code: &str,
        _pkce_verifier: Option<&str>,
    ) -> Result<OAuthTokens, ConnectorError> {
        let response = self
            .http
            .post(TOKEN_URL)
            .header("Authorization", self.basic_auth_header())
            .header("Notion-Version", NOTION_VERSION)
            .json(&serde_json::json!({
                "grant_type": "authorization_code",
                "code": code,
                "redirect_uri": self.config.redirect_uri,
            }))
            .send()
            .await
            .map_err(|e| ConnectorError::Other(e.into()))?;

        if !response.status().is_success() {
            return Err(ConnectorError::AuthInvalid);
        }

        let body: NotionTokenResponse = response
            .json()
            .await
            .map_err(|e| ConnectorError::Other(e.into()))?;

        Ok(OAuthTokens {
            access_token: body.access_token,
            refresh_token: None,
            token_type: "Bearer".to_string(),
            // Notion integration tokens don't expire; represented as the
            // Unix epoch so `Credentials::oauth_valid_within` always
            // treats it as valid (see that method's doc comment).
            expiry: DateTime::<Utc>::from_timestamp(0, 0).unwrap(),
        })
    }

    async fn refresh_token(&self, _refresh_token: &str) -> Result<OAuthTokens, ConnectorError> {
        Err(ConnectorError::NotImplemented(
            "Notion access tokens do not expire and cannot be refreshed".to_string(),
        ))
    }

    async fn get_user_info(&self, access_token: &str) -> Result<UserInfo, ConnectorError> {
        let response = self
            .http
            .get(USER_INFO_URL)
            .bearer_auth(access_token)
            .header("Notion-Version", NOTION_VERSION)
            .send()
            .await
            .map_err(|e| ConnectorError::Other(e.into()))?;

        if response.status() == reqwest::StatusCode::UNAUTHORIZED {
            return Err(ConnectorError::AuthInvalid);
        }

        let user: NotionUser = response
            .json()
            .await
            .map_err(|e| ConnectorError::Other(e.into()))?;

        let display_name = user
            .name
            .clone()
            .or_else(|| user.bot.as_ref().and_then(|b| b.workspace_name.clone()));

        let email = user
            .bot
            .as_ref()
            .and_then(|b| b.owner.as_ref())
            .and_then(|o| o.user.as_ref())
            .and_then(|u| u.person.as_ref())
            .and_then(|p| p.email.clone());
        let identifier = email
            .or_else(|| user.bot.as_ref().and_then(|b| b.workspace_name.clone()))
            .unwrap_or(user.id);

        Ok(UserInfo {
            account_identifier: AccountIdentifier::new(identifier)?,
            display_name,
        })
    }

    fn default_scopes(&self) -> Vec<String> {
        // Notion's permission model is workspace-capability based, granted
        // at integration-install time rather than via OAuth scopes.
        Vec::new()
    }

    fn setup_hint(&self) -> &'static str {
        "Create a public integration at https://www.notion.so/my-integrations \
         and enable OAuth; Notion grants capabilities per-page at \
         connection time rather than via OAuth scopes."
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn handler() -> NotionOAuthHandler {
        NotionOAuthHandler::new(NotionConfig {
            client_id: "notion-client".into(),
            client_secret: "notion-secret".into(),
            redirect_uri: "http://127.0.0.1:18080/callback".into(),
        })
    }

    #[test]
    fn build_auth_url_has_no_pkce_params() {
        let url = handler().build_auth_url("state-1", Some("ignored-challenge"));
        assert!(!url.contains("code_challenge"));
        assert!(url.contains("owner=user"));
        assert!(url.contains("state=state-1"));
    }

    #[test]
    fn basic_auth_header_is_base64_of_id_colon_secret() {
        let header = handler().basic_auth_header();
        assert!(header.starts_with("Basic "));
        let decoded = STANDARD.decode(header.trim_start_matches("Basic ")).unwrap();
        assert_eq!(decoded, b"notion-client:notion-secret");
    }

    #[test]
    fn default_scopes_is_empty() {
        assert!(handler().default_scopes().is_empty());
    }
}
