//! sercha-core — domain model, ports and cursor codecs for the sync/connector subsystem.
//!
//! This crate contains the hexagonal architecture core:
//! - **Domain entities** — `Source`, `AuthProvider`, `Credentials`, `SyncState`,
//!   `RawDocument`, `RawDocumentChange`.
//! - **Port definitions** — traits implemented by adapter crates: `Connector`,
//!   `OAuthHandler`, `RateLimiter`, `TokenProvider`, `SyncStateStore`.
//! - **Cursor codecs** — versioned, base64(JSON) cursor (de)serialisation shared
//!   by every connector family.
//!
//! The domain module has no knowledge of any concrete provider; adapter crates
//! (`sercha-oauth`, `sercha-connectors`, `sercha-sync`) depend on this crate, not
//! the other way around.

pub mod config;
pub mod cursor;
pub mod domain;
pub mod ports;
