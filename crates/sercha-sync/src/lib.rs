//! Sync orchestration: drives one source's `Connector` through a full or
//! incremental sync cycle and persists the resulting cursor.
//!
//! ## Modules
//!
//! - [`orchestrator`] - `SyncOrchestrator`, the sync driver
//! - [`sink`] - `DocumentSink`, the port the orchestrator forwards
//!   streamed documents/changes to (the normaliser pipeline's entry
//!   point, out of scope here)

pub mod orchestrator;
pub mod sink;

pub use orchestrator::SyncOrchestrator;
pub use sink::{DocumentSink, RawDocumentOrChange};
