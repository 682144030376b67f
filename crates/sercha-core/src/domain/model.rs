//! Core entities: sources, credentials, cursors, and the streaming units
//! produced by connectors.

use std::collections::HashMap;

use bitflags::bitflags;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::newtypes::{AccountIdentifier, AuthProviderId, CredentialsId, RemoteId, SourceId};

// ============================================================================
// ConnectorKind / ProviderFamily
// ============================================================================

/// Static tag identifying one of the ten connector implementations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ConnectorKind {
    Filesystem,
    GitHub,
    GoogleDrive,
    Gmail,
    GoogleCalendar,
    OneDrive,
    Outlook,
    MicrosoftCalendar,
    Dropbox,
    Notion,
}

impl ConnectorKind {
    /// The provider family this connector's OAuth app belongs to.
    pub fn provider_family(&self) -> ProviderFamily {
        match self {
            ConnectorKind::Filesystem => ProviderFamily::Filesystem,
            ConnectorKind::GitHub => ProviderFamily::GitHub,
            ConnectorKind::GoogleDrive | ConnectorKind::Gmail | ConnectorKind::GoogleCalendar => {
                ProviderFamily::Google
            }
            ConnectorKind::OneDrive | ConnectorKind::Outlook | ConnectorKind::MicrosoftCalendar => {
                ProviderFamily::Microsoft
            }
            ConnectorKind::Dropbox => ProviderFamily::Dropbox,
            ConnectorKind::Notion => ProviderFamily::Notion,
        }
    }

    /// Stable string id, used in config/registry lookups and logging.
    pub fn as_str(&self) -> &'static str {
        match self {
            ConnectorKind::Filesystem => "filesystem",
            ConnectorKind::GitHub => "github",
            ConnectorKind::GoogleDrive => "google-drive",
            ConnectorKind::Gmail => "gmail",
            ConnectorKind::GoogleCalendar => "google-calendar",
            ConnectorKind::OneDrive => "onedrive",
            ConnectorKind::Outlook => "outlook",
            ConnectorKind::MicrosoftCalendar => "ms-calendar",
            ConnectorKind::Dropbox => "dropbox",
            ConnectorKind::Notion => "notion",
        }
    }
}

/// Groups connectors that share one OAuth app registration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ProviderFamily {
    Filesystem,
    GitHub,
    Google,
    Microsoft,
    Dropbox,
    Notion,
}

impl ProviderFamily {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProviderFamily::Filesystem => "filesystem",
            ProviderFamily::GitHub => "github",
            ProviderFamily::Google => "google",
            ProviderFamily::Microsoft => "microsoft",
            ProviderFamily::Dropbox => "dropbox",
            ProviderFamily::Notion => "notion",
        }
    }
}

bitflags! {
    /// Authentication methods a connector type supports.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
    pub struct AuthCapability: u8 {
        const PAT   = 0b0000_0001;
        const OAUTH = 0b0000_0010;
    }
}

impl AuthCapability {
    pub fn requires_auth(&self) -> bool {
        !self.is_empty()
    }

    pub fn supports_pat(&self) -> bool {
        self.contains(AuthCapability::PAT)
    }

    pub fn supports_oauth(&self) -> bool {
        self.contains(AuthCapability::OAUTH)
    }

    pub fn supports_multiple_methods(&self) -> bool {
        self.supports_pat() && self.supports_oauth()
    }

    /// The methods this capability set supports, in a stable order.
    pub fn supported_methods(&self) -> Vec<&'static str> {
        let mut methods = Vec::new();
        if self.supports_pat() {
            methods.push("pat");
        }
        if self.supports_oauth() {
            methods.push("oauth");
        }
        methods
    }
}

bitflags! {
    /// What a connector instance can do; the orchestrator consults this
    /// before attempting an operation instead of calling it speculatively.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
    pub struct ConnectorCapabilities: u16 {
        const SUPPORTS_INCREMENTAL    = 1 << 0;
        const SUPPORTS_WATCH          = 1 << 1;
        const SUPPORTS_HIERARCHY      = 1 << 2;
        const SUPPORTS_BINARY         = 1 << 3;
        const REQUIRES_AUTH           = 1 << 4;
        const SUPPORTS_VALIDATION     = 1 << 5;
        const SUPPORTS_CURSOR_RETURN  = 1 << 6;
        const SUPPORTS_PARTIAL_SYNC   = 1 << 7;
        const SUPPORTS_RATE_LIMITING  = 1 << 8;
        const SUPPORTS_PAGINATION     = 1 << 9;
    }
}

// ============================================================================
// Source / AuthProvider / Credentials
// ============================================================================

/// A user-configured subscription to an external system.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Source {
    id: SourceId,
    connector_kind: ConnectorKind,
    name: String,
    /// Connector-specific configuration (e.g. `path` for filesystem,
    /// `owner`/`repos` for GitHub). Semantics are entirely connector-owned.
    config: HashMap<String, String>,
    auth_provider_id: Option<AuthProviderId>,
    credentials_id: Option<CredentialsId>,
}

impl Source {
    pub fn new(connector_kind: ConnectorKind, name: impl Into<String>) -> Self {
        Self {
            id: SourceId::new(),
            connector_kind,
            name: name.into(),
            config: HashMap::new(),
            auth_provider_id: None,
            credentials_id: None,
        }
    }

    pub fn with_config(mut self, config: HashMap<String, String>) -> Self {
        self.config = config;
        self
    }

    pub fn id(&self) -> SourceId {
        self.id
    }

    pub fn connector_kind(&self) -> ConnectorKind {
        self.connector_kind
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn config(&self) -> &HashMap<String, String> {
        &self.config
    }

    pub fn auth_provider_id(&self) -> Option<AuthProviderId> {
        self.auth_provider_id
    }

    pub fn credentials_id(&self) -> Option<CredentialsId> {
        self.credentials_id
    }

    /// Links this source to a credentials row. Enforces the invariant that
    /// a source's `credentials_id`, once set, always points at credentials
    /// whose `source_id` equals this source's id — callers pass the
    /// already-constructed `Credentials` so the invariant is checked here
    /// rather than trusted at a distance.
    pub fn link_credentials(&mut self, credentials: &Credentials) -> Result<(), super::errors::DomainError> {
        if credentials.source_id() != self.id {
            return Err(super::errors::DomainError::ValidationFailed(format!(
                "credentials {} belong to source {}, not {}",
                credentials.id(),
                credentials.source_id(),
                self.id
            )));
        }
        self.credentials_id = Some(credentials.id());
        Ok(())
    }

    pub fn link_auth_provider(&mut self, auth_provider_id: AuthProviderId) {
        self.auth_provider_id = Some(auth_provider_id);
    }
}

/// An OAuth app registration shared across sources of the same provider family.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthProvider {
    id: AuthProviderId,
    display_name: String,
    provider_family: ProviderFamily,
    client_id: String,
    client_secret: String,
    auth_url: String,
    token_url: String,
    scopes: Vec<String>,
}

impl AuthProvider {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        display_name: impl Into<String>,
        provider_family: ProviderFamily,
        client_id: impl Into<String>,
        client_secret: impl Into<String>,
        auth_url: impl Into<String>,
        token_url: impl Into<String>,
        scopes: Vec<String>,
    ) -> Self {
        Self {
            id: AuthProviderId::new(),
            display_name: display_name.into(),
            provider_family,
            client_id: client_id.into(),
            client_secret: client_secret.into(),
            auth_url: auth_url.into(),
            token_url: token_url.into(),
            scopes,
        }
    }

    pub fn id(&self) -> AuthProviderId {
        self.id
    }

    pub fn display_name(&self) -> &str {
        &self.display_name
    }

    pub fn provider_family(&self) -> ProviderFamily {
        self.provider_family
    }

    pub fn client_id(&self) -> &str {
        &self.client_id
    }

    pub fn client_secret(&self) -> &str {
        &self.client_secret
    }

    pub fn auth_url(&self) -> &str {
        &self.auth_url
    }

    pub fn token_url(&self) -> &str {
        &self.token_url
    }

    pub fn scopes(&self) -> &[String] {
        &self.scopes
    }
}

/// Per-source authentication material. Exactly one variant is populated.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum CredentialsMaterial {
    OAuth {
        access_token: String,
        refresh_token: Option<String>,
        token_type: String,
        /// Zero when the provider omitted `expires_in`; the token provider
        /// then treats the token as valid until a 401 forces refresh.
        expiry: DateTime<Utc>,
    },
    Pat {
        token: String,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Credentials {
    id: CredentialsId,
    source_id: SourceId,
    account_identifier: Option<AccountIdentifier>,
    material: CredentialsMaterial,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl Credentials {
    pub fn new(source_id: SourceId, material: CredentialsMaterial) -> Self {
        let now = Utc::now();
        Self {
            id: CredentialsId::new(),
            source_id,
            account_identifier: None,
            material,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn id(&self) -> CredentialsId {
        self.id
    }

    pub fn source_id(&self) -> SourceId {
        self.source_id
    }

    pub fn account_identifier(&self) -> Option<&AccountIdentifier> {
        self.account_identifier.as_ref()
    }

    pub fn set_account_identifier(&mut self, identifier: AccountIdentifier) {
        self.account_identifier = Some(identifier);
    }

    pub fn material(&self) -> &CredentialsMaterial {
        &self.material
    }

    /// Replaces OAuth tokens in place (refresh), preserving the old
    /// refresh token when the provider's response omitted a new one,
    /// per spec §4.3.
    pub fn apply_refresh(
        &mut self,
        access_token: String,
        refresh_token: Option<String>,
        token_type: String,
        expiry: DateTime<Utc>,
    ) {
        let preserved_refresh = match (&self.material, &refresh_token) {
            (CredentialsMaterial::OAuth { refresh_token: old, .. }, None) => old.clone(),
            _ => refresh_token,
        };
        self.material = CredentialsMaterial::OAuth {
            access_token,
            refresh_token: preserved_refresh,
            token_type,
            expiry,
        };
        self.updated_at = Utc::now();
    }

    /// True when the stored access token is valid for at least `skew`
    /// longer (spec §4.4's ~1 minute skew).
    pub fn oauth_valid_within(&self, now: DateTime<Utc>, skew: chrono::Duration) -> bool {
        match &self.material {
            CredentialsMaterial::OAuth { expiry, .. } => {
                *expiry == DateTime::<Utc>::from_timestamp(0, 0).unwrap() || now + skew < *expiry
            }
            CredentialsMaterial::Pat { .. } => true,
        }
    }
}

// ============================================================================
// SyncState / Cursor
// ============================================================================

/// Per-source persisted progress.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SyncState {
    pub cursor: Option<String>,
    pub last_sync: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
}

impl SyncState {
    /// The predicate the orchestrator uses to decide full-vs-incremental.
    pub fn needs_full_sync(&self) -> bool {
        match &self.cursor {
            None => true,
            Some(c) => c.is_empty(),
        }
    }
}

// ============================================================================
// RawDocument / RawDocumentChange / SyncComplete
// ============================================================================

/// The streaming unit from connector to the (external) normalisation pipeline.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawDocument {
    pub source_id: SourceId,
    /// Opaque `connector://...` scheme URI, per spec §6.
    pub uri: String,
    pub remote_id: RemoteId,
    pub mime_type: String,
    pub content: Vec<u8>,
    /// Containing item's URI, for hierarchy; unset at the connector's root.
    pub parent_uri: Option<String>,
    pub title: Option<String>,
    pub modified_at: Option<DateTime<Utc>>,
    pub metadata: HashMap<String, String>,
}

/// Change type for incremental sync / watch streams.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeKind {
    Created,
    Updated,
    Deleted,
}

/// Wrapper carrying a change type and its document. For deletions only
/// `source_id` and `uri` are meaningful; the rest of the document is left
/// at its default.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawDocumentChange {
    pub kind: ChangeKind,
    pub document: RawDocument,
}

impl RawDocumentChange {
    pub fn created(document: RawDocument) -> Self {
        Self { kind: ChangeKind::Created, document }
    }

    pub fn updated(document: RawDocument) -> Self {
        Self { kind: ChangeKind::Updated, document }
    }

    /// Builds a deletion record; only `source_id`/`uri` are meaningful on
    /// the embedded document.
    pub fn deleted(source_id: SourceId, uri: impl Into<String>, remote_id: RemoteId) -> Self {
        Self {
            kind: ChangeKind::Deleted,
            document: RawDocument {
                source_id,
                uri: uri.into(),
                remote_id,
                mime_type: String::new(),
                content: Vec::new(),
                parent_uri: None,
                title: None,
                modified_at: None,
                metadata: HashMap::new(),
            },
        }
    }
}

/// Terminal sentinel emitted on the error channel on successful completion
/// of a sync operation; carries the cursor to persist.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncComplete {
    pub new_cursor: String,
}

/// What a connector operation sends on its error channel: either a real,
/// terminal error, or the `SyncComplete` success sentinel.
#[derive(Debug)]
pub enum SyncEvent {
    Error(super::errors::ConnectorError),
    Complete(SyncComplete),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn auth_capability_predicates() {
        let both = AuthCapability::PAT | AuthCapability::OAUTH;
        assert!(both.supports_multiple_methods());
        assert_eq!(both.supported_methods(), vec!["pat", "oauth"]);

        let oauth_only = AuthCapability::OAUTH;
        assert!(!oauth_only.supports_multiple_methods());
        assert!(oauth_only.supports_oauth());
        assert!(!oauth_only.supports_pat());

        let none = AuthCapability::empty();
        assert!(!none.requires_auth());
    }

    #[test]
    fn connector_kind_provider_family_grouping() {
        assert_eq!(ConnectorKind::GoogleDrive.provider_family(), ProviderFamily::Google);
        assert_eq!(ConnectorKind::Gmail.provider_family(), ProviderFamily::Google);
        assert_eq!(ConnectorKind::OneDrive.provider_family(), ProviderFamily::Microsoft);
        assert_eq!(ConnectorKind::Notion.provider_family(), ProviderFamily::Notion);
    }

    #[test]
    fn sync_state_needs_full_sync_when_cursor_absent_or_empty() {
        assert!(SyncState::default().needs_full_sync());
        assert!(SyncState {
            cursor: Some(String::new()),
            ..Default::default()
        }
        .needs_full_sync());
        assert!(!SyncState {
            cursor: Some("abc".into()),
            ..Default::default()
        }
        .needs_full_sync());
    }

    #[test]
    fn credentials_refresh_preserves_old_refresh_token_when_omitted() {
        let source_id = SourceId::new();
        let mut creds = Credentials::new(
            source_id,
            CredentialsMaterial::OAuth {
                access_token: "old-access".into(),
                refresh_token: Some("old-refresh".into()),
                token_type: "Bearer".into(),
                expiry: Utc::now(),
            },
        );

        creds.apply_refresh("new-access".into(), None, "Bearer".into(), Utc::now());

        match creds.material() {
            CredentialsMaterial::OAuth { access_token, refresh_token, .. } => {
                assert_eq!(access_token, "new-access");
                assert_eq!(refresh_token.as_deref(), Some("old-refresh"));
            }
            _ => panic!("expected oauth material"),
        }
    }

    #[test]
    fn link_credentials_rejects_mismatched_source() {
        let mut source = Source::new(ConnectorKind::Filesystem, "local docs");
        let other_creds = Credentials::new(
            SourceId::new(),
            CredentialsMaterial::Pat { token: "tok".into() },
        );
        assert!(source.link_credentials(&other_creds).is_err());
    }

    #[test]
    fn raw_document_change_deleted_leaves_rest_default() {
        let change = RawDocumentChange::deleted(
            SourceId::new(),
            "filesystem:///tmp/a.txt",
            RemoteId::new("a.txt").unwrap(),
        );
        assert_eq!(change.kind, ChangeKind::Deleted);
        assert!(change.document.content.is_empty());
        assert!(change.document.metadata.is_empty());
    }
}
