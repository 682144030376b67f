//! Connector error taxonomy
//!
//! One variant per row of the error handling table: each variant carries
//! exactly the data the sync orchestrator needs to decide its reaction
//! (retry, clear cursor and resync, prompt re-auth, surface and stop).

use std::time::Duration;

use thiserror::Error;

/// Validation errors for domain entities and newtypes, raised at
/// construction time rather than left for callers to discover later.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DomainError {
    #[error("invalid id: {0}")]
    InvalidId(String),

    #[error("invalid remote id: {0}")]
    InvalidRemoteId(String),

    #[error("validation failed: {0}")]
    ValidationFailed(String),
}

/// Errors surfaced across connector, OAuth, rate-limiter and cursor port
/// boundaries.
///
/// Names are semantic rather than any one provider's wire vocabulary, so a
/// caller can react to "the cursor expired" without knowing whether that
/// came back as a 410, a 498, or a sync-token-invalid response body.
#[derive(Debug, Error)]
pub enum ConnectorError {
    /// An operation was called after `Close()`.
    #[error("connector closed")]
    ConnectorClosed,

    /// The factory has no builder registered for this connector type.
    #[error("unsupported connector type: {0}")]
    UnsupportedType(String),

    /// No credentials exist for this source.
    #[error("authentication required")]
    AuthRequired,

    /// Refresh failed, or the provider returned 401 after a refresh attempt.
    #[error("authentication invalid, re-authentication required")]
    AuthInvalid,

    /// Gmail's `historyId` no longer exists on the server.
    #[error("history id expired")]
    HistoryIdExpired,

    /// A Microsoft Graph delta link is no longer valid (HTTP 410).
    #[error("delta token expired")]
    DeltaTokenExpired,

    /// A persisted cursor failed to decode (bad base64/JSON, or a version
    /// newer than this build understands).
    #[error("invalid cursor")]
    InvalidCursor,

    /// The provider returned HTTP 429.
    #[error("rate limited, retry after {retry_after:?}")]
    RateLimited {
        /// `None` when the provider gave no `Retry-After` hint; the caller
        /// falls back to the rate limiter's default backoff floor.
        retry_after: Option<Duration>,
    },

    /// `Watch()` called on a connector that doesn't support it.
    #[error("not implemented: {0}")]
    NotImplemented(String),

    /// Connector configuration failed validation before any I/O was attempted.
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// Requested connector/provider id is unknown to the registry.
    #[error("not found: {0}")]
    NotFound(String),

    /// Anything else: network/transport failures, unexpected provider
    /// responses, and other non-semantic errors. Terminates the sync
    /// without advancing the cursor.
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl From<DomainError> for ConnectorError {
    fn from(err: DomainError) -> Self {
        ConnectorError::InvalidInput(err.to_string())
    }
}

impl ConnectorError {
    /// True for errors that should terminate the current sync without
    /// advancing the cursor (as opposed to `HistoryIdExpired`/
    /// `DeltaTokenExpired`/`InvalidCursor`, which trigger an immediate
    /// full resync instead).
    pub fn is_terminal_without_resync(&self) -> bool {
        !matches!(
            self,
            ConnectorError::HistoryIdExpired
                | ConnectorError::DeltaTokenExpired
                | ConnectorError::InvalidCursor
        )
    }

    /// True for the three "cursor is stale" kinds that force an immediate
    /// full resync per spec §4.9/§7.
    pub fn forces_full_resync(&self) -> bool {
        matches!(
            self,
            ConnectorError::HistoryIdExpired
                | ConnectorError::DeltaTokenExpired
                | ConnectorError::InvalidCursor
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn forces_full_resync_for_stale_cursor_kinds() {
        assert!(ConnectorError::HistoryIdExpired.forces_full_resync());
        assert!(ConnectorError::DeltaTokenExpired.forces_full_resync());
        assert!(ConnectorError::InvalidCursor.forces_full_resync());
        assert!(!ConnectorError::AuthInvalid.forces_full_resync());
    }

    #[test]
    fn terminal_without_resync_excludes_stale_cursor_kinds() {
        assert!(!ConnectorError::DeltaTokenExpired.is_terminal_without_resync());
        assert!(ConnectorError::ConnectorClosed.is_terminal_without_resync());
        assert!(ConnectorError::AuthInvalid.is_terminal_without_resync());
    }

    #[test]
    fn display_messages() {
        assert_eq!(ConnectorError::ConnectorClosed.to_string(), "connector closed");
        assert_eq!(
            ConnectorError::UnsupportedType("foo".into()).to_string(),
            "unsupported connector type: foo"
        );
        let err = ConnectorError::RateLimited {
            retry_after: Some(Duration::from_secs(2)),
        };
        assert!(err.to_string().contains("2s"));
    }
}
