//! Port definitions (hexagonal architecture interfaces)
//!
//! These traits are the boundary of the domain core: the core depends on
//! them, but every implementation lives in an adapter crate
//! (`sercha-ratelimit`, `sercha-oauth`, `sercha-connectors`, `sercha-sync`).
//!
//! - [`Connector`] — one sync source's read path: validate, full sync,
//!   incremental sync, watch.
//! - [`OAuthHandler`] — per-provider-family OAuth wire dialect.
//! - [`RateLimiter`] — per-source outbound request pacing.
//! - [`TokenProvider`] — valid bearer token lookup, refreshing as needed.
//! - [`SyncStateStore`] — cursor/last-sync persistence.

pub mod connector;
pub mod oauth;
pub mod rate_limiter;
pub mod state_store;
pub mod token_provider;

pub use connector::{Connector, SyncHandle};
pub use oauth::{OAuthHandler, OAuthTokens, UserInfo};
pub use rate_limiter::RateLimiter;
pub use state_store::{InMemoryStateStore, SyncStateStore};
pub use token_provider::TokenProvider;
