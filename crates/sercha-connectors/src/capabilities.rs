//! Static auth/capability tables, one row per connector type.

use sercha_core::domain::{AuthCapability, ConnectorCapabilities, ConnectorKind};

/// Authentication methods each connector type accepts.
pub fn auth_capability(kind: ConnectorKind) -> AuthCapability {
    match kind {
        ConnectorKind::Filesystem => AuthCapability::empty(),
        ConnectorKind::GitHub => AuthCapability::PAT | AuthCapability::OAUTH,
        ConnectorKind::GoogleDrive
        | ConnectorKind::Gmail
        | ConnectorKind::GoogleCalendar
        | ConnectorKind::OneDrive
        | ConnectorKind::Outlook
        | ConnectorKind::MicrosoftCalendar
        | ConnectorKind::Dropbox
        | ConnectorKind::Notion => AuthCapability::OAUTH,
    }
}

/// What each connector type supports, independent of any one instance's
/// configuration.
pub fn default_capabilities(kind: ConnectorKind) -> ConnectorCapabilities {
    use ConnectorCapabilities as C;

    match kind {
        ConnectorKind::Filesystem => {
            C::SUPPORTS_INCREMENTAL
                | C::SUPPORTS_WATCH
                | C::SUPPORTS_HIERARCHY
                | C::SUPPORTS_BINARY
                | C::SUPPORTS_VALIDATION
                | C::SUPPORTS_CURSOR_RETURN
        }
        ConnectorKind::GitHub => {
            C::SUPPORTS_INCREMENTAL
                | C::SUPPORTS_HIERARCHY
                | C::SUPPORTS_BINARY
                | C::REQUIRES_AUTH
                | C::SUPPORTS_VALIDATION
                | C::SUPPORTS_CURSOR_RETURN
                | C::SUPPORTS_RATE_LIMITING
                | C::SUPPORTS_PAGINATION
        }
        ConnectorKind::GoogleDrive | ConnectorKind::OneDrive | ConnectorKind::Dropbox => {
            C::SUPPORTS_INCREMENTAL
                | C::SUPPORTS_HIERARCHY
                | C::SUPPORTS_BINARY
                | C::REQUIRES_AUTH
                | C::SUPPORTS_VALIDATION
                | C::SUPPORTS_CURSOR_RETURN
                | C::SUPPORTS_PARTIAL_SYNC
                | C::SUPPORTS_RATE_LIMITING
                | C::SUPPORTS_PAGINATION
        }
        ConnectorKind::Gmail => {
            C::SUPPORTS_INCREMENTAL
                | C::REQUIRES_AUTH
                | C::SUPPORTS_VALIDATION
                | C::SUPPORTS_CURSOR_RETURN
                | C::SUPPORTS_RATE_LIMITING
                | C::SUPPORTS_PAGINATION
        }
        ConnectorKind::GoogleCalendar | ConnectorKind::Outlook | ConnectorKind::MicrosoftCalendar => {
            C::SUPPORTS_INCREMENTAL
                | C::REQUIRES_AUTH
                | C::SUPPORTS_VALIDATION
                | C::SUPPORTS_CURSOR_RETURN
                | C::SUPPORTS_RATE_LIMITING
                | C::SUPPORTS_PAGINATION
        }
        ConnectorKind::Notion => {
            C::SUPPORTS_INCREMENTAL
                | C::SUPPORTS_HIERARCHY
                | C::REQUIRES_AUTH
                | C::SUPPORTS_VALIDATION
                | C::SUPPORTS_CURSOR_RETURN
                | C::SUPPORTS_RATE_LIMITING
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn filesystem_requires_no_auth() {
        assert!(auth_capability(ConnectorKind::Filesystem).is_empty());
    }

    #[test]
    fn github_supports_both_auth_methods() {
        let cap = auth_capability(ConnectorKind::GitHub);
        assert!(cap.supports_pat());
        assert!(cap.supports_oauth());
    }

    #[test]
    fn filesystem_supports_watch_but_gmail_does_not() {
        assert!(default_capabilities(ConnectorKind::Filesystem).contains(ConnectorCapabilities::SUPPORTS_WATCH));
        assert!(!default_capabilities(ConnectorKind::Gmail).contains(ConnectorCapabilities::SUPPORTS_WATCH));
    }
}
