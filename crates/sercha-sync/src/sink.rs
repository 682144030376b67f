//! The `DocumentSink` port: where the orchestrator forwards everything a
//! connector streams. Stands in for the normalisation/indexing pipeline,
//! which lives outside this crate.

use async_trait::async_trait;
use sercha_core::domain::{RawDocument, RawDocumentChange};

/// Either side of a connector's streaming output: a full-sync item or an
/// incremental-sync/watch change.
#[derive(Debug, Clone)]
pub enum RawDocumentOrChange {
    Full(RawDocument),
    Change(RawDocumentChange),
}

#[async_trait]
pub trait DocumentSink: Send + Sync {
    /// Accepts one streamed item. An `Err` here is logged and skipped by
    /// the orchestrator rather than aborting the sync.
    async fn accept(&self, doc: RawDocumentOrChange) -> anyhow::Result<()>;
}
