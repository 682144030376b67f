//! Connector adapters: one module per provider family, a shared
//! retrying HTTP client, and the factory/registry layer that composes
//! them from a `Source`.
//!
//! ## Modules
//!
//! - [`capabilities`] - static auth/feature tables, one row per connector type
//! - [`http`] - shared rate-limited, retrying HTTP client
//! - [`cursor_codec`] - cursor encode/decode pinned to the current version
//! - [`filesystem`] - local filesystem connector
//! - [`github`] - GitHub connector (repo trees, issues, PRs)
//! - [`google`] - Google Drive / Gmail / Calendar connector
//! - [`microsoft`] - OneDrive / Outlook / Microsoft Calendar connector
//! - [`dropbox`] - Dropbox connector
//! - [`notion`] - Notion connector
//! - [`factory`] - builds a `Connector` from a `Source`
//! - [`registries`] - static connector/provider lookup tables

pub mod capabilities;
pub mod cursor_codec;
pub mod dropbox;
pub mod factory;
pub mod filesystem;
pub mod github;
pub mod google;
pub mod http;
pub mod microsoft;
pub mod notion;
pub mod registries;
