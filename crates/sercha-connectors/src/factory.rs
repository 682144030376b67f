//! The connector factory: builds a `Connector` from a `Source`, and
//! dispatches OAuth operations to the handler registered for that
//! source's connector type.
//!
//! A builder closure composes a connector with a `TokenProvider` resolved
//! through an injected `TokenProviderFactory`, keeping the factory itself
//! ignorant of how tokens are actually minted or stored.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use sercha_core::domain::{
    AuthProvider, ConnectorError, ConnectorKind, CredentialsId, ProviderFamily, Source,
};
use sercha_core::ports::connector::Connector;
use sercha_core::ports::{OAuthHandler, OAuthTokens, RateLimiter, TokenProvider, UserInfo};
use sercha_oauth::handlers::{dropbox, github, google, microsoft, notion as notion_oauth};
use sercha_oauth::NotionOAuthHandler;

use crate::dropbox::DropboxConnector;
use crate::filesystem::FilesystemConnector;
use crate::github::GitHubConnector;
use crate::google::GoogleConnector;
use crate::microsoft::MicrosoftConnector;
use crate::notion::NotionConnector;

/// Everything a builder needs besides the `Source` itself: the rate
/// limiter shared across the provider family, a ready-to-use token
/// provider for this source's credentials, and the credentials id to
/// hand to the connector.
pub struct BuildContext {
    pub rate_limiter: Arc<dyn RateLimiter>,
    pub token_provider: Arc<dyn TokenProvider>,
    pub credentials_id: CredentialsId,
}

type ConnectorBuilder =
    Box<dyn Fn(&Source, BuildContext) -> Result<Arc<dyn Connector>, ConnectorError> + Send + Sync>;

type OAuthHandlerBuilder =
    Box<dyn Fn(&AuthProvider, &str) -> Result<Arc<dyn OAuthHandler>, ConnectorError> + Send + Sync>;

/// Resolves a `TokenProvider` for a source, given its credentials id.
/// Implemented by the composition root (typically backed by
/// `sercha_oauth::KeyringTokenProvider` wrapping the handler for that
/// source's connector type).
pub trait TokenProviderFactory: Send + Sync {
    fn token_provider_for(&self, source: &Source) -> Result<Arc<dyn TokenProvider>, ConnectorError>;
}

/// Resolves the shared rate limiter for a provider family.
pub trait RateLimiterFactory: Send + Sync {
    fn rate_limiter_for(&self, provider_family: ProviderFamily) -> Arc<dyn RateLimiter>;
}

/// Stands in for a source's token provider when its connector kind has no
/// auth capability (only `Filesystem`, today). Its builder never calls
/// `get_token`, so this only needs to exist to satisfy `BuildContext`.
struct NoAuthTokenProvider;

#[async_trait]
impl TokenProvider for NoAuthTokenProvider {
    async fn get_token(&self, _credentials_id: CredentialsId) -> Result<String, ConnectorError> {
        Err(ConnectorError::AuthRequired)
    }
}

pub struct ConnectorFactory {
    builders: RwLock<HashMap<ConnectorKind, ConnectorBuilder>>,
    oauth_handlers: RwLock<HashMap<ConnectorKind, OAuthHandlerBuilder>>,
    token_providers: Arc<dyn TokenProviderFactory>,
    rate_limiters: Arc<dyn RateLimiterFactory>,
}

impl ConnectorFactory {
    pub fn new(
        token_providers: Arc<dyn TokenProviderFactory>,
        rate_limiters: Arc<dyn RateLimiterFactory>,
    ) -> Self {
        let factory = Self {
            builders: RwLock::new(HashMap::new()),
            oauth_handlers: RwLock::new(HashMap::new()),
            token_providers,
            rate_limiters,
        };
        factory.register_defaults();
        factory
    }

    fn register_defaults(&self) {
        self.register_builder(ConnectorKind::Filesystem, |source, _ctx| {
            let path = source
                .config()
                .get("path")
                .ok_or_else(|| ConnectorError::InvalidInput("filesystem source requires `path`".into()))?;
            Ok(Arc::new(FilesystemConnector::new(source.id(), crate::filesystem::expand_path(path))) as Arc<dyn Connector>)
        });

        self.register_builder(ConnectorKind::GitHub, |source, ctx| {
            let config = crate::github::GitHubConfig::from_map(source.config())?;
            Ok(Arc::new(GitHubConnector::new(
                source.id(),
                config,
                ctx.rate_limiter,
                ctx.token_provider,
                ctx.credentials_id,
            )) as Arc<dyn Connector>)
        });

        for kind in [ConnectorKind::GoogleDrive, ConnectorKind::Gmail, ConnectorKind::GoogleCalendar] {
            self.register_builder(kind, move |source, ctx| {
                Ok(Arc::new(GoogleConnector::new(
                    source.id(),
                    source.connector_kind(),
                    ctx.rate_limiter,
                    ctx.token_provider,
                    ctx.credentials_id,
                )) as Arc<dyn Connector>)
            });
        }

        for kind in [ConnectorKind::OneDrive, ConnectorKind::Outlook, ConnectorKind::MicrosoftCalendar] {
            self.register_builder(kind, move |source, ctx| {
                Ok(Arc::new(MicrosoftConnector::new(
                    source.id(),
                    source.connector_kind(),
                    ctx.rate_limiter,
                    ctx.token_provider,
                    ctx.credentials_id,
                )) as Arc<dyn Connector>)
            });
        }

        self.register_builder(ConnectorKind::Dropbox, |source, ctx| {
            let root_path = source.config().get("path").cloned().unwrap_or_else(|| "".to_string());
            Ok(Arc::new(DropboxConnector::new(
                source.id(),
                root_path,
                ctx.rate_limiter,
                ctx.token_provider,
                ctx.credentials_id,
            )) as Arc<dyn Connector>)
        });

        self.register_builder(ConnectorKind::Notion, |source, ctx| {
            let include_comments = source
                .config()
                .get("include_comments")
                .map(|v| v == "true")
                .unwrap_or(false);
            Ok(Arc::new(NotionConnector::new(
                source.id(),
                include_comments,
                ctx.rate_limiter,
                ctx.token_provider,
                ctx.credentials_id,
            )) as Arc<dyn Connector>)
        });

        self.register_oauth_handler(ConnectorKind::GitHub, |provider, redirect_uri| {
            let handler = github::build(
                provider.client_id().to_string(),
                provider.client_secret().to_string(),
                redirect_uri.to_string(),
            )?;
            Ok(Arc::new(handler) as Arc<dyn OAuthHandler>)
        });
        for kind in [ConnectorKind::GoogleDrive, ConnectorKind::Gmail, ConnectorKind::GoogleCalendar] {
            self.register_oauth_handler(kind, |provider, redirect_uri| {
                let handler = google::build(
                    provider.client_id().to_string(),
                    provider.client_secret().to_string(),
                    redirect_uri.to_string(),
                )?;
                Ok(Arc::new(handler) as Arc<dyn OAuthHandler>)
            });
        }
        for kind in [ConnectorKind::OneDrive, ConnectorKind::Outlook, ConnectorKind::MicrosoftCalendar] {
            self.register_oauth_handler(kind, |provider, redirect_uri| {
                let handler = microsoft::build(
                    provider.client_id().to_string(),
                    provider.client_secret().to_string(),
                    redirect_uri.to_string(),
                )?;
                Ok(Arc::new(handler) as Arc<dyn OAuthHandler>)
            });
        }
        self.register_oauth_handler(ConnectorKind::Dropbox, |provider, redirect_uri| {
            let handler = dropbox::build(
                provider.client_id().to_string(),
                provider.client_secret().to_string(),
                redirect_uri.to_string(),
            )?;
            Ok(Arc::new(handler) as Arc<dyn OAuthHandler>)
        });
        self.register_oauth_handler(ConnectorKind::Notion, |provider, redirect_uri| {
            Ok(Arc::new(NotionOAuthHandler::new(notion_oauth::NotionConfig {
                client_id: provider.client_id().to_string(),
                client_secret: provider.client_secret().to_string(),
                redirect_uri: redirect_uri.to_string(),
            })) as Arc<dyn OAuthHandler>)
        });
    }

    pub fn register_builder<F>(&self, kind: ConnectorKind, builder: F)
    where
        F: Fn(&Source, BuildContext) -> Result<Arc<dyn Connector>, ConnectorError> + Send + Sync + 'static,
    {
        self.builders.write().expect("builder map poisoned").insert(kind, Box::new(builder));
    }

    pub fn register_oauth_handler<F>(&self, kind: ConnectorKind, builder: F)
    where
        F: Fn(&AuthProvider, &str) -> Result<Arc<dyn OAuthHandler>, ConnectorError> + Send + Sync + 'static,
    {
        self.oauth_handlers.write().expect("oauth handler map poisoned").insert(kind, Box::new(builder));
    }

    /// Builds a connector for `source`, resolving its token provider and
    /// rate limiter along the way. Fails with `UnsupportedType` if no
    /// builder is registered for `source.connector_kind()`.
    pub fn create(&self, source: &Source) -> Result<Arc<dyn Connector>, ConnectorError> {
        let kind = source.connector_kind();
        let builders = self.builders.read().expect("builder map poisoned");
        let builder = builders
            .get(&kind)
            .ok_or_else(|| ConnectorError::UnsupportedType(kind.as_str().to_string()))?;

        let ctx = if crate::capabilities::auth_capability(kind).requires_auth() {
            BuildContext {
                rate_limiter: self.rate_limiters.rate_limiter_for(kind.provider_family()),
                token_provider: self.token_providers.token_provider_for(source)?,
                credentials_id: source.credentials_id().ok_or(ConnectorError::AuthRequired)?,
            }
        } else {
            BuildContext {
                rate_limiter: self.rate_limiters.rate_limiter_for(kind.provider_family()),
                token_provider: Arc::new(NoAuthTokenProvider),
                credentials_id: CredentialsId::new(),
            }
        };
        builder(source, ctx)
    }

    fn handler_for(&self, kind: ConnectorKind, provider: &AuthProvider, redirect_uri: &str) -> Result<Arc<dyn OAuthHandler>, ConnectorError> {
        let handlers = self.oauth_handlers.read().expect("oauth handler map poisoned");
        let builder = handlers
            .get(&kind)
            .ok_or_else(|| ConnectorError::UnsupportedType(kind.as_str().to_string()))?;
        builder(provider, redirect_uri)
    }

    pub fn supports_oauth(&self, kind: ConnectorKind) -> bool {
        self.oauth_handlers.read().expect("oauth handler map poisoned").contains_key(&kind)
    }

    pub fn build_auth_url(
        &self,
        kind: ConnectorKind,
        provider: &AuthProvider,
        redirect_uri: &str,
        state: &str,
        pkce_challenge: Option<&str>,
    ) -> Result<String, ConnectorError> {
        let handler = self.handler_for(kind, provider, redirect_uri)?;
        Ok(handler.build_auth_url(state, pkce_challenge))
    }

    pub async fn exchange_code(
        &self,
        kind: ConnectorKind,
        provider: &AuthProvider,
        redirect_uri: &str,
        code: &str,
        pkce_verifier: Option<&str>,
    ) -> Result<OAuthTokens, ConnectorError> {
        let handler = self.handler_for(kind, provider, redirect_uri)?;
        handler.exchange_code(code, pkce_verifier).await
    }

    pub async fn refresh_token(
        &self,
        kind: ConnectorKind,
        provider: &AuthProvider,
        redirect_uri: &str,
        refresh_token: &str,
    ) -> Result<OAuthTokens, ConnectorError> {
        let handler = self.handler_for(kind, provider, redirect_uri)?;
        handler.refresh_token(refresh_token).await
    }

    pub async fn get_user_info(
        &self,
        kind: ConnectorKind,
        provider: &AuthProvider,
        redirect_uri: &str,
        access_token: &str,
    ) -> Result<UserInfo, ConnectorError> {
        let handler = self.handler_for(kind, provider, redirect_uri)?;
        handler.get_user_info(access_token).await
    }

    pub fn get_default_oauth_config(
        &self,
        kind: ConnectorKind,
        provider: &AuthProvider,
        redirect_uri: &str,
    ) -> Result<Vec<String>, ConnectorError> {
        let handler = self.handler_for(kind, provider, redirect_uri)?;
        Ok(handler.default_scopes())
    }

    pub fn get_setup_hint(
        &self,
        kind: ConnectorKind,
        provider: &AuthProvider,
        redirect_uri: &str,
    ) -> Result<&'static str, ConnectorError> {
        let handler = self.handler_for(kind, provider, redirect_uri)?;
        Ok(handler.setup_hint())
    }
}
