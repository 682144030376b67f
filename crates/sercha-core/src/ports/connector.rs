//! The `Connector` port: one sync source's read path.
//!
//! A connector never writes back to its provider; it only produces
//! [`RawDocument`](crate::domain::RawDocument)s (full sync) or
//! [`RawDocumentChange`](crate::domain::RawDocumentChange)s (incremental
//! sync, watch) onto an item channel, terminated by a [`SyncEvent`] on a
//! separate events channel. Both channels are capacity-1: the producer
//! blocks until the orchestrator has drained the previous item, giving
//! natural backpressure without an unbounded buffer.

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::domain::{
    AccountIdentifier, ConnectorCapabilities, ConnectorError, ConnectorKind, RawDocument,
    RawDocumentChange, SourceId, SyncEvent,
};

/// Channel capacity used for every item/events pair. See module docs.
pub const CHANNEL_CAPACITY: usize = 1;

/// The two channels a sync operation hands back to its caller.
pub struct SyncHandle<T> {
    pub items: mpsc::Receiver<T>,
    pub events: mpsc::Receiver<SyncEvent>,
}

impl<T> SyncHandle<T> {
    /// Builds the sender halves for a connector implementation to move
    /// into its background task, and the receiver halves to hand back to
    /// the caller.
    pub fn channel_pair() -> (mpsc::Sender<T>, mpsc::Sender<SyncEvent>, Self) {
        let (items_tx, items_rx) = mpsc::channel(CHANNEL_CAPACITY);
        let (events_tx, events_rx) = mpsc::channel(CHANNEL_CAPACITY);
        (
            items_tx,
            events_tx,
            SyncHandle {
                items: items_rx,
                events: events_rx,
            },
        )
    }
}

/// A read-only adapter for one configured [`Source`](crate::domain::Source).
///
/// Implementations are constructed already bound to a specific source and
/// its credentials (if any); the factory in `sercha-connectors` is
/// responsible for wiring those up before handing out a `Connector`.
#[async_trait]
pub trait Connector: Send + Sync {
    /// The static connector type this instance implements.
    fn kind(&self) -> ConnectorKind;

    /// The source this instance is bound to.
    fn source_id(&self) -> SourceId;

    /// What this connector instance supports; callers check this before
    /// calling `incremental_sync`/`watch` rather than calling speculatively.
    fn capabilities(&self) -> ConnectorCapabilities;

    /// Checks configuration and, if present, credentials, without
    /// performing a sync. Called before a source is first activated.
    async fn validate(&self) -> Result<(), ConnectorError>;

    /// Streams every item currently visible to this connector, ending with
    /// a [`SyncEvent::Complete`] carrying the cursor to persist for future
    /// incremental syncs.
    async fn full_sync(
        &self,
        cancel: CancellationToken,
    ) -> Result<SyncHandle<RawDocument>, ConnectorError>;

    /// Streams only what changed since `cursor`. Returns
    /// `ConnectorError::HistoryIdExpired`/`DeltaTokenExpired`/`InvalidCursor`
    /// synchronously (before spawning any background work) when the cursor
    /// itself is unusable, so the orchestrator can fall back to
    /// `full_sync` without first draining a channel.
    async fn incremental_sync(
        &self,
        cursor: String,
        cancel: CancellationToken,
    ) -> Result<SyncHandle<RawDocumentChange>, ConnectorError>;

    /// Streams changes as they happen, for connectors capable of push or
    /// local notification (`ConnectorCapabilities::SUPPORTS_WATCH`).
    /// Default implementation reports unsupported.
    async fn watch(
        &self,
        _cancel: CancellationToken,
    ) -> Result<SyncHandle<RawDocumentChange>, ConnectorError> {
        Err(ConnectorError::NotImplemented(format!(
            "{:?} does not support watch",
            self.kind()
        )))
    }

    /// The remote account this connector is authenticated as, used to
    /// detect when a re-auth silently switched accounts.
    async fn get_account_identifier(&self) -> Result<AccountIdentifier, ConnectorError>;

    /// Releases any held resources (file watches, open handles). Idempotent;
    /// operations called after `close` return `ConnectorError::ConnectorClosed`.
    async fn close(&self) -> Result<(), ConnectorError>;
}
