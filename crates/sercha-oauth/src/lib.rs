//! OAuth 2.0 Authorization Code + PKCE flows, the loopback callback
//! server, per-provider-family handlers, and token storage/refresh.
//!
//! Google, Microsoft, GitHub, and Dropbox all speak the standard PKCE
//! dialect and share [`pkce::PkceOAuthHandler`]; Notion is PKCE-exempt and
//! gets its own handler in [`handlers::notion`].

pub mod callback_server;
pub mod handlers;
pub mod keyring_storage;
pub mod pkce;
pub mod token_provider;

pub use callback_server::{CallbackError, OAuthCallbackServer};
pub use keyring_storage::KeyringTokenStorage;
pub use pkce::{PkceMaterial, PkceOAuthHandler, PkceProviderConfig};
pub use token_provider::KeyringTokenProvider;
