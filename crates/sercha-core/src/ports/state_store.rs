//! The `SyncStateStore` port: cursor/last-sync persistence.
//!
//! The SQLite-backed implementation this trait fronts in production is out
//! of scope here (referenced by interface only, per the system's
//! persistence boundary); [`InMemoryStateStore`] is a reference
//! implementation for tests and for composing a sync pipeline without a
//! database.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;

use crate::domain::{ConnectorError, SourceId, SyncState};

#[async_trait]
pub trait SyncStateStore: Send + Sync {
    /// Loads the persisted state for a source, or a fresh default if none
    /// has been saved yet.
    async fn load(&self, source_id: SourceId) -> Result<SyncState, ConnectorError>;

    /// Persists a source's state, overwriting whatever was there before.
    async fn save(&self, source_id: SourceId, state: SyncState) -> Result<(), ConnectorError>;
}

/// A `Mutex<HashMap>`-backed store, sufficient for tests and for running
/// the orchestrator without a database.
#[derive(Debug, Default)]
pub struct InMemoryStateStore {
    states: Mutex<HashMap<SourceId, SyncState>>,
}

impl InMemoryStateStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SyncStateStore for InMemoryStateStore {
    async fn load(&self, source_id: SourceId) -> Result<SyncState, ConnectorError> {
        let states = self.states.lock().expect("state store mutex poisoned");
        Ok(states.get(&source_id).cloned().unwrap_or_default())
    }

    async fn save(&self, source_id: SourceId, state: SyncState) -> Result<(), ConnectorError> {
        let mut states = self.states.lock().expect("state store mutex poisoned");
        states.insert(source_id, state);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn load_returns_default_when_unset() {
        let store = InMemoryStateStore::new();
        let state = store.load(SourceId::new()).await.unwrap();
        assert!(state.needs_full_sync());
    }

    #[tokio::test]
    async fn save_then_load_roundtrips() {
        let store = InMemoryStateStore::new();
        let source_id = SourceId::new();
        let state = SyncState {
            cursor: Some("abc".into()),
            ..Default::default()
        };
        store.save(source_id, state.clone()).await.unwrap();
        let loaded = store.load(source_id).await.unwrap();
        assert_eq!(loaded.cursor, state.cursor);
    }
}
