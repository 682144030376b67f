//! Domain entities and error types
//!
//! - Newtypes for type-safe identifiers and validated domain values
//! - `Source`/`AuthProvider`/`Credentials` entities and the capability
//!   bit-sets attached to them
//! - `SyncState`, the streaming document/change types, and the
//!   connector error taxonomy

pub mod errors;
pub mod model;
pub mod newtypes;

pub use errors::{ConnectorError, DomainError};
pub use model::{
    AuthProvider, AuthCapability, ChangeKind, ConnectorCapabilities, ConnectorKind, Credentials,
    CredentialsMaterial, ProviderFamily, RawDocument, RawDocumentChange, Source, SyncComplete,
    SyncEvent, SyncState,
};
pub use newtypes::{AccountIdentifier, AuthProviderId, CredentialsId, RemoteId, SourceId};
