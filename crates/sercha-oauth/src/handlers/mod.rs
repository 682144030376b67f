//! Per-provider-family `OAuthHandler` constructors.
//!
//! Google, Microsoft, GitHub, and Dropbox are thin [`PkceOAuthHandler`](crate::pkce::PkceOAuthHandler)
//! configurations; Notion gets its own implementation since it is
//! PKCE-exempt and uses HTTP Basic auth with a JSON token body.

pub mod dropbox;
pub mod github;
pub mod google;
pub mod microsoft;
pub mod notion;

pub use notion::NotionOAuthHandler;
