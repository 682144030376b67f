//! Dropbox connector.
//!
//! Same delta/list-continue shape as the Microsoft connectors, applied to
//! Dropbox's `list_folder`/`list_folder/continue`: an initial call with
//! `recursive` + `path`, an opaque `cursor` for resuming, and a
//! `has_more` flag instead of a `next_link` field.

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use sercha_core::domain::{
    AccountIdentifier, ConnectorCapabilities, ConnectorError, ConnectorKind, CredentialsId,
    RawDocument, RawDocumentChange, RemoteId, SourceId, SyncComplete, SyncEvent,
};
use sercha_core::ports::connector::{Connector, SyncHandle};
use sercha_core::ports::{RateLimiter, TokenProvider};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::capabilities::default_capabilities;
use crate::cursor_codec::{decode, encode};
use crate::http::RetryingClient;

const API_BASE: &str = "https://api.dropboxapi.com/2";
const CONTENT_BASE: &str = "https://content.dropboxapi.com/2";

fn should_download_content(mime: &str) -> bool {
    mime.starts_with("text/") || mime == "application/pdf"
}

fn guess_mime(path: &str) -> String {
    match path.rsplit('.').next() {
        Some("md") => "text/markdown",
        Some("txt") => "text/plain",
        Some("pdf") => "application/pdf",
        Some("json") => "application/json",
        _ => "application/octet-stream",
    }
    .to_string()
}

#[derive(Serialize, Deserialize)]
struct DropboxCursor {
    v: u32,
    cursor: String,
}

#[derive(Clone)]
pub struct DropboxConnector {
    source_id: SourceId,
    root_path: String,
    client: RetryingClient,
    content_client: RetryingClient,
    closed: Arc<std::sync::atomic::AtomicBool>,
}

impl DropboxConnector {
    pub fn new(
        source_id: SourceId,
        root_path: impl Into<String>,
        rate_limiter: Arc<dyn RateLimiter>,
        token_provider: Arc<dyn TokenProvider>,
        credentials_id: CredentialsId,
    ) -> Self {
        Self {
            source_id,
            root_path: root_path.into(),
            client: RetryingClient::new(API_BASE, rate_limiter.clone(), token_provider.clone(), credentials_id),
            content_client: RetryingClient::new(CONTENT_BASE, rate_limiter, token_provider, credentials_id),
            closed: Arc::new(std::sync::atomic::AtomicBool::new(false)),
        }
    }

    fn check_open(&self) -> Result<(), ConnectorError> {
        if self.closed.load(std::sync::atomic::Ordering::SeqCst) {
            Err(ConnectorError::ConnectorClosed)
        } else {
            Ok(())
        }
    }

    async fn entry_to_document(&self, entry: &Value) -> Option<RawDocument> {
        if entry[".tag"].as_str() != Some("file") {
            return None;
        }
        let id = entry["id"].as_str()?;
        let path = entry["path_display"].as_str().unwrap_or_default();
        let mime = guess_mime(path);

        let content = if should_download_content(&mime) {
            let args = json!({ "path": path });
            let resp = self
                .content_client
                .post_json_with_dropbox_arg("/files/download", &args, CancellationToken::new())
                .await;
            match resp {
                Ok(r) => r.bytes().await.map(|b| b.to_vec()).unwrap_or_default(),
                Err(_) => Vec::new(),
            }
        } else {
            Vec::new()
        };

        Some(RawDocument {
            source_id: self.source_id,
            uri: format!("dropbox://files{path}"),
            remote_id: RemoteId::new(id.to_string()).ok()?,
            mime_type: mime,
            content,
            parent_uri: path.rsplit_once('/').map(|(parent, _)| format!("dropbox://files{parent}")),
            title: entry["name"].as_str().map(String::from),
            modified_at: entry["server_modified"].as_str().and_then(|t| t.parse().ok()),
            metadata: Default::default(),
        })
    }

    async fn run_full_sync(
        &self,
        items_tx: mpsc::Sender<RawDocument>,
        events_tx: mpsc::Sender<SyncEvent>,
        cancel: CancellationToken,
    ) {
        let body = json!({ "path": self.root_path, "recursive": true, "include_deleted": false });
        let mut resp = match self.client.post_json("/files/list_folder", body, cancel.clone()).await {
            Ok(r) => r,
            Err(e) => {
                let _ = events_tx.send(SyncEvent::Error(e)).await;
                return;
            }
        };

        loop {
            if cancel.is_cancelled() {
                return;
            }
            let parsed: Value = match resp.json().await {
                Ok(v) => v,
                Err(e) => {
                    let _ = events_tx.send(SyncEvent::Error(ConnectorError::Other(e.into()))).await;
                    return;
                }
            };

            for entry in parsed["entries"].as_array().cloned().unwrap_or_default() {
                if let Some(doc) = self.entry_to_document(&entry).await {
                    if items_tx.send(doc).await.is_err() {
                        return;
                    }
                }
            }

            let has_more = parsed["has_more"].as_bool().unwrap_or(false);
            let cursor_value = parsed["cursor"].as_str().unwrap_or_default().to_string();
            if !has_more {
                let cursor = DropboxCursor { v: 1, cursor: cursor_value };
                match encode(&cursor) {
                    Ok(new_cursor) => {
                        let _ = events_tx.send(SyncEvent::Complete(SyncComplete { new_cursor })).await;
                    }
                    Err(e) => {
                        let _ = events_tx.send(SyncEvent::Error(e)).await;
                    }
                }
                return;
            }

            let body = json!({ "cursor": cursor_value });
            resp = match self
                .client
                .post_json("/files/list_folder/continue", body, cancel.clone())
                .await
            {
                Ok(r) => r,
                Err(e) => {
                    let _ = events_tx.send(SyncEvent::Error(e)).await;
                    return;
                }
            };
        }
    }

    async fn run_incremental_sync(
        &self,
        cursor: DropboxCursor,
        items_tx: mpsc::Sender<RawDocumentChange>,
        events_tx: mpsc::Sender<SyncEvent>,
        cancel: CancellationToken,
    ) {
        let mut cursor_value = cursor.cursor;
        loop {
            if cancel.is_cancelled() {
                return;
            }
            let body = json!({ "cursor": cursor_value });
            let resp = match self
                .client
                .post_json("/files/list_folder/continue", body, cancel.clone())
                .await
            {
                Ok(r) => r,
                Err(ConnectorError::InvalidCursor) => {
                    let _ = events_tx.send(SyncEvent::Error(ConnectorError::InvalidCursor)).await;
                    return;
                }
                Err(e) => {
                    let _ = events_tx.send(SyncEvent::Error(e)).await;
                    return;
                }
            };
            let parsed: Value = match resp.json().await {
                Ok(v) => v,
                Err(e) => {
                    let _ = events_tx.send(SyncEvent::Error(ConnectorError::Other(e.into()))).await;
                    return;
                }
            };

            for entry in parsed["entries"].as_array().cloned().unwrap_or_default() {
                let change = if entry[".tag"].as_str() == Some("deleted") {
                    let path = entry["path_display"].as_str().unwrap_or_default();
                    RemoteId::new(path.to_string())
                        .ok()
                        .map(|rid| RawDocumentChange::deleted(self.source_id, format!("dropbox://files{path}"), rid))
                } else {
                    match self.entry_to_document(&entry).await {
                        Some(doc) => Some(RawDocumentChange::updated(doc)),
                        None => None,
                    }
                };
                if let Some(change) = change {
                    if items_tx.send(change).await.is_err() {
                        return;
                    }
                }
            }

            cursor_value = parsed["cursor"].as_str().unwrap_or(&cursor_value).to_string();
            if !parsed["has_more"].as_bool().unwrap_or(false) {
                let cursor = DropboxCursor { v: 1, cursor: cursor_value };
                match encode(&cursor) {
                    Ok(new_cursor) => {
                        let _ = events_tx.send(SyncEvent::Complete(SyncComplete { new_cursor })).await;
                    }
                    Err(e) => {
                        let _ = events_tx.send(SyncEvent::Error(e)).await;
                    }
                }
                return;
            }
        }
    }
}

#[async_trait]
impl Connector for DropboxConnector {
    fn kind(&self) -> ConnectorKind {
        ConnectorKind::Dropbox
    }

    fn source_id(&self) -> SourceId {
        self.source_id
    }

    fn capabilities(&self) -> ConnectorCapabilities {
        default_capabilities(ConnectorKind::Dropbox)
    }

    async fn validate(&self) -> Result<(), ConnectorError> {
        self.check_open()?;
        self.client
            .post_json("/users/get_current_account", json!(null), CancellationToken::new())
            .await?;
        Ok(())
    }

    async fn full_sync(&self, cancel: CancellationToken) -> Result<SyncHandle<RawDocument>, ConnectorError> {
        self.check_open()?;
        let (items_tx, events_tx, handle) = SyncHandle::channel_pair();
        let this = self.clone();
        tokio::spawn(async move { this.run_full_sync(items_tx, events_tx, cancel).await });
        Ok(handle)
    }

    async fn incremental_sync(
        &self,
        cursor: String,
        cancel: CancellationToken,
    ) -> Result<SyncHandle<RawDocumentChange>, ConnectorError> {
        self.check_open()?;
        let cursor: DropboxCursor = decode(&cursor)?;
        let (items_tx, events_tx, handle) = SyncHandle::channel_pair();
        let this = self.clone();
        tokio::spawn(async move { this.run_incremental_sync(cursor, items_tx, events_tx, cancel).await });
        Ok(handle)
    }

    async fn get_account_identifier(&self) -> Result<AccountIdentifier, ConnectorError> {
        self.check_open()?;
        let resp = self
            .client
            .post_json("/users/get_current_account", json!(null), CancellationToken::new())
            .await?;
        let body: Value = resp.json().await.map_err(|e| ConnectorError::Other(e.into()))?;
        let email = body["email"]
            .as_str()
            .ok_or_else(|| ConnectorError::Other(anyhow::anyhow!("missing email")))?;
        AccountIdentifier::new(email.to_string()).map_err(Into::into)
    }

    async fn close(&self) -> Result<(), ConnectorError> {
        self.closed.store(true, std::sync::atomic::Ordering::SeqCst);
        Ok(())
    }
}
