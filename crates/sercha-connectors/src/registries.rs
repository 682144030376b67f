//! Static connector/provider registries.
//!
//! Structured like `sercha_core::config`'s validation-table pattern: a
//! static table plus small derived views over it.

use std::collections::HashSet;

use sercha_core::domain::{AuthCapability, ConnectorCapabilities, ConnectorError, ConnectorKind, ProviderFamily};

use crate::capabilities::{auth_capability, default_capabilities};
use crate::factory::ConnectorFactory;

/// One entry in a connector's config schema: enough for a settings UI to
/// render a field and validate it without knowing anything about the
/// connector itself.
#[derive(Debug, Clone, Copy)]
pub struct ConfigKey {
    pub key: &'static str,
    pub label: &'static str,
    pub description: &'static str,
    pub required: bool,
    pub secret: bool,
    pub default: Option<&'static str>,
}

/// Resolves one of this connector's document URIs back to a URL a human can
/// open in a browser. `None` when the provider exposes no stable web view
/// for the resource (or the URI carries too little to construct one).
pub type UrlResolver = fn(&str) -> Option<String>;

/// One row of the static connector table.
#[derive(Debug, Clone, Copy)]
pub struct ConnectorTypeInfo {
    pub kind: ConnectorKind,
    pub provider_family: ProviderFamily,
    pub capabilities: ConnectorCapabilities,
    pub auth_capability: AuthCapability,
    pub config_keys: &'static [ConfigKey],
    pub resolve_web_url: UrlResolver,
}

impl ConnectorTypeInfo {
    /// Config keys that must be present and non-empty for this connector.
    pub fn required_config_keys(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.config_keys.iter().filter(|k| k.required).map(|k| k.key)
    }
}

fn no_web_url(_uri: &str) -> Option<String> {
    None
}

fn github_web_url(uri: &str) -> Option<String> {
    let rest = uri.strip_prefix("github://")?;
    let mut parts = rest.splitn(4, '/');
    let (kind, owner, repo, tail) = (parts.next()?, parts.next()?, parts.next()?, parts.next()?);
    match kind {
        "repos" => Some(format!("https://github.com/{owner}/{repo}/blob/HEAD/{tail}")),
        "issues" => Some(format!("https://github.com/{owner}/{repo}/issues/{tail}")),
        "prs" => Some(format!("https://github.com/{owner}/{repo}/pull/{tail}")),
        "wikis" => Some(format!("https://github.com/{owner}/{repo}/wiki/{tail}")),
        _ => None,
    }
}

fn gdrive_web_url(uri: &str) -> Option<String> {
    let id = uri.strip_prefix("gdrive://files/")?;
    Some(format!("https://drive.google.com/file/d/{id}/view"))
}

fn gmail_web_url(uri: &str) -> Option<String> {
    let id = uri.strip_prefix("gmail://messages/")?;
    Some(format!("https://mail.google.com/mail/u/0/#all/{id}"))
}

fn gcal_web_url(uri: &str) -> Option<String> {
    let rest = uri.strip_prefix("gcal://")?;
    let (_calendar_id, tail) = rest.split_once('/')?;
    let event_id = tail.strip_prefix("events/")?;
    Some(format!("https://calendar.google.com/calendar/r/eventedit/{event_id}"))
}

fn onedrive_web_url(uri: &str) -> Option<String> {
    let _id = uri.strip_prefix("onedrive://files/")?;
    None
}

fn dropbox_web_url(uri: &str) -> Option<String> {
    let path = uri.strip_prefix("dropbox://files")?;
    Some(format!("https://www.dropbox.com/home{path}"))
}

fn notion_web_url(uri: &str) -> Option<String> {
    let rest = uri.strip_prefix("notion://")?;
    let id = rest.split_once('/').map(|(_, id)| id).unwrap_or(rest);
    Some(format!("https://notion.so/{}", id.replace('-', "")))
}

const CONNECTOR_TABLE: &[ConnectorTypeInfoStatic] = &[
    ConnectorTypeInfoStatic {
        kind: ConnectorKind::Filesystem,
        config_keys: &[ConfigKey {
            key: "path",
            label: "Root path",
            description: "Directory to index, recursively. Supports a leading `~`.",
            required: true,
            secret: false,
            default: None,
        }],
        resolve_web_url: no_web_url,
    },
    ConnectorTypeInfoStatic {
        kind: ConnectorKind::GitHub,
        config_keys: &[
            ConfigKey {
                key: "owner",
                label: "Owner",
                description: "GitHub user or organization that owns the repositories.",
                required: true,
                secret: false,
                default: None,
            },
            ConfigKey {
                key: "repos",
                label: "Repositories",
                description: "Comma-separated list of repository names under `owner`.",
                required: true,
                secret: false,
                default: None,
            },
            ConfigKey {
                key: "include_issues",
                label: "Include issues",
                description: "Index open and closed issues.",
                required: false,
                secret: false,
                default: Some("true"),
            },
            ConfigKey {
                key: "include_prs",
                label: "Include pull requests",
                description: "Index open and closed pull requests.",
                required: false,
                secret: false,
                default: Some("true"),
            },
            ConfigKey {
                key: "include_wiki",
                label: "Include wiki",
                description: "Index the repository wiki, if one exists.",
                required: false,
                secret: false,
                default: Some("false"),
            },
        ],
        resolve_web_url: github_web_url,
    },
    ConnectorTypeInfoStatic { kind: ConnectorKind::GoogleDrive, config_keys: &[], resolve_web_url: gdrive_web_url },
    ConnectorTypeInfoStatic { kind: ConnectorKind::Gmail, config_keys: &[], resolve_web_url: gmail_web_url },
    ConnectorTypeInfoStatic { kind: ConnectorKind::GoogleCalendar, config_keys: &[], resolve_web_url: gcal_web_url },
    ConnectorTypeInfoStatic { kind: ConnectorKind::OneDrive, config_keys: &[], resolve_web_url: onedrive_web_url },
    ConnectorTypeInfoStatic { kind: ConnectorKind::Outlook, config_keys: &[], resolve_web_url: no_web_url },
    ConnectorTypeInfoStatic { kind: ConnectorKind::MicrosoftCalendar, config_keys: &[], resolve_web_url: no_web_url },
    ConnectorTypeInfoStatic {
        kind: ConnectorKind::Dropbox,
        config_keys: &[ConfigKey {
            key: "path",
            label: "Root path",
            description: "Dropbox folder to index, recursively (e.g. `/Notes`).",
            required: true,
            secret: false,
            default: None,
        }],
        resolve_web_url: dropbox_web_url,
    },
    ConnectorTypeInfoStatic {
        kind: ConnectorKind::Notion,
        config_keys: &[ConfigKey {
            key: "include_comments",
            label: "Include comments",
            description: "Index page comments alongside page content.",
            required: false,
            secret: false,
            default: Some("false"),
        }],
        resolve_web_url: notion_web_url,
    },
];

/// Minimal literal used to build `CONNECTOR_TABLE` as a `const`; expanded
/// into the richer [`ConnectorTypeInfo`] on demand since
/// `ConnectorCapabilities`/`AuthCapability` values aren't `const fn`-derivable
/// from `ConnectorKind` here.
struct ConnectorTypeInfoStatic {
    kind: ConnectorKind,
    config_keys: &'static [ConfigKey],
    resolve_web_url: UrlResolver,
}

fn info_for(row: &ConnectorTypeInfoStatic) -> ConnectorTypeInfo {
    ConnectorTypeInfo {
        kind: row.kind,
        provider_family: row.kind.provider_family(),
        capabilities: default_capabilities(row.kind),
        auth_capability: auth_capability(row.kind),
        config_keys: row.config_keys,
        resolve_web_url: row.resolve_web_url,
    }
}

/// Holds the static connector table and answers capability/config
/// questions about it; delegates OAuth-capable queries to the factory
/// rather than duplicating its registration state.
pub struct ConnectorRegistry<'a> {
    factory: &'a ConnectorFactory,
}

impl<'a> ConnectorRegistry<'a> {
    pub fn new(factory: &'a ConnectorFactory) -> Self {
        Self { factory }
    }

    pub fn all(&self) -> Vec<ConnectorTypeInfo> {
        CONNECTOR_TABLE.iter().map(info_for).collect()
    }

    pub fn get(&self, kind: ConnectorKind) -> ConnectorTypeInfo {
        info_for(CONNECTOR_TABLE.iter().find(|r| r.kind == kind).expect("every ConnectorKind has a table row"))
    }

    pub fn supports_oauth(&self, kind: ConnectorKind) -> bool {
        self.factory.supports_oauth(kind)
    }

    /// Checks that every `required_config_keys` entry for `kind` is
    /// present in `config` and non-empty.
    pub fn validate_config(
        &self,
        kind: ConnectorKind,
        config: &std::collections::HashMap<String, String>,
    ) -> Result<(), ConnectorError> {
        let info = self.get(kind);
        for key in info.required_config_keys() {
            match config.get(key) {
                Some(value) if !value.is_empty() => {}
                _ => {
                    return Err(ConnectorError::InvalidInput(format!(
                        "missing required config key: {key}"
                    )))
                }
            }
        }
        Ok(())
    }
}

/// Derived view over the connector table grouped by provider family —
/// drives "one OAuth app covers N connectors" UI flows (e.g. Google).
pub struct ProviderRegistry;

impl ProviderRegistry {
    pub fn get_providers() -> Vec<ProviderFamily> {
        let mut seen = HashSet::new();
        let mut providers = Vec::new();
        for row in CONNECTOR_TABLE {
            if seen.insert(row.kind.provider_family()) {
                providers.push(row.kind.provider_family());
            }
        }
        providers
    }

    pub fn get_connectors_for_provider(provider: ProviderFamily) -> Vec<ConnectorKind> {
        CONNECTOR_TABLE
            .iter()
            .filter(|r| r.kind.provider_family() == provider)
            .map(|r| r.kind)
            .collect()
    }

    /// Returns the auth capability shared by every connector of `provider`.
    /// Invariant (enforced by `capabilities::auth_capability`, never by
    /// this function): all connectors of one provider family share one
    /// capability, so the first one found is representative.
    pub fn get_auth_capability(provider: ProviderFamily) -> Option<AuthCapability> {
        CONNECTOR_TABLE
            .iter()
            .find(|r| r.kind.provider_family() == provider)
            .map(|r| auth_capability(r.kind))
    }

    pub fn has_multiple_connectors(provider: ProviderFamily) -> bool {
        Self::get_connectors_for_provider(provider).len() > 1
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn google_provider_has_multiple_connectors() {
        assert!(ProviderRegistry::has_multiple_connectors(ProviderFamily::Google));
        assert_eq!(ProviderRegistry::get_connectors_for_provider(ProviderFamily::Google).len(), 3);
    }

    #[test]
    fn filesystem_provider_has_exactly_one_connector() {
        assert!(!ProviderRegistry::has_multiple_connectors(ProviderFamily::Filesystem));
    }

    #[test]
    fn get_providers_has_no_duplicates() {
        let providers = ProviderRegistry::get_providers();
        let unique: HashSet<_> = providers.iter().collect();
        assert_eq!(providers.len(), unique.len());
    }
}
