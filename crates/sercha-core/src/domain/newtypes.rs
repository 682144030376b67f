//! Validated newtype wrappers for domain identifiers.
//!
//! Each newtype enforces its invariants at construction time rather than
//! leaving callers to pass around bare `String`/`Uuid` values.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::errors::DomainError;

macro_rules! uuid_newtype {
    ($name:ident) => {
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(Uuid);

        impl $name {
            /// Generates a fresh random identifier.
            pub fn new() -> Self {
                Self(Uuid::new_v4())
            }

            /// Wraps an existing UUID (e.g. one loaded from storage).
            pub fn from_uuid(id: Uuid) -> Self {
                Self(id)
            }

            /// Returns the underlying UUID.
            pub fn as_uuid(&self) -> Uuid {
                self.0
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl FromStr for $name {
            type Err = DomainError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                Uuid::parse_str(s)
                    .map(Self)
                    .map_err(|e| DomainError::InvalidId(e.to_string()))
            }
        }

        impl From<Uuid> for $name {
            fn from(id: Uuid) -> Self {
                Self(id)
            }
        }
    };
}

uuid_newtype!(SourceId);
uuid_newtype!(AuthProviderId);
uuid_newtype!(CredentialsId);

/// A provider-specific item identifier (file id, message id, page id, ...).
///
/// Non-empty; providers hand these back verbatim so validation is kept
/// deliberately loose (alphanumeric plus the separators real-world provider
/// ids use: `-`, `_`, `:`, `/`, `.`).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RemoteId(String);

impl RemoteId {
    pub fn new(value: impl Into<String>) -> Result<Self, DomainError> {
        let value = value.into();
        if value.is_empty() {
            return Err(DomainError::InvalidRemoteId("must not be empty".into()));
        }
        if !value
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || "-_:./!".contains(c))
        {
            return Err(DomainError::InvalidRemoteId(format!(
                "contains disallowed characters: {value}"
            )));
        }
        Ok(Self(value))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RemoteId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// An account identifier as reported by a provider's user-info endpoint
/// (usually an email address, sometimes a bot/workspace name for Notion).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AccountIdentifier(String);

impl AccountIdentifier {
    pub fn new(value: impl Into<String>) -> Result<Self, DomainError> {
        let value = value.into();
        if value.trim().is_empty() {
            return Err(DomainError::ValidationFailed(
                "account identifier must not be empty".into(),
            ));
        }
        Ok(Self(value))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for AccountIdentifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    mod source_id_tests {
        use super::*;

        #[test]
        fn new_generates_unique_ids() {
            assert_ne!(SourceId::new(), SourceId::new());
        }

        #[test]
        fn display_and_from_str_roundtrip() {
            let id = SourceId::new();
            let parsed: SourceId = id.to_string().parse().unwrap();
            assert_eq!(id, parsed);
        }

        #[test]
        fn from_str_rejects_garbage() {
            assert!("not-a-uuid".parse::<SourceId>().is_err());
        }

        #[test]
        fn serde_roundtrip() {
            let id = SourceId::new();
            let json = serde_json::to_string(&id).unwrap();
            let back: SourceId = serde_json::from_str(&json).unwrap();
            assert_eq!(id, back);
        }
    }

    mod remote_id_tests {
        use super::*;

        #[test]
        fn accepts_typical_provider_ids() {
            assert!(RemoteId::new("01AB-cd_ef:gh/ij.kl!mn").is_ok());
        }

        #[test]
        fn rejects_empty() {
            assert!(RemoteId::new("").is_err());
        }

        #[test]
        fn rejects_whitespace() {
            assert!(RemoteId::new("has space").is_err());
        }

        #[test]
        fn display_matches_input() {
            let id = RemoteId::new("abc123").unwrap();
            assert_eq!(id.to_string(), "abc123");
            assert_eq!(id.as_str(), "abc123");
        }
    }

    mod account_identifier_tests {
        use super::*;

        #[test]
        fn accepts_email_like_value() {
            let id = AccountIdentifier::new("user@example.com").unwrap();
            assert_eq!(id.as_str(), "user@example.com");
        }

        #[test]
        fn rejects_blank() {
            assert!(AccountIdentifier::new("   ").is_err());
        }
    }
}
