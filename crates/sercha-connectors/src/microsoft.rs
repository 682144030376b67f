//! Microsoft OneDrive / Outlook / Calendar connectors.
//!
//! All three Graph resources share the exact same delta-query shape:
//! each page carries either `@odata.nextLink` (more pages) or
//! `@odata.deltaLink` (done; becomes the next cursor), and a `410 Gone`
//! on the delta endpoint means the token expired. One pagination loop
//! drives all three, generalized from OneDrive's `driveItem` delta to the
//! Outlook/Calendar delta resources.

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
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

const GRAPH_BASE: &str = "https://graph.microsoft.com/v1.0";
const MAX_INLINE_DOWNLOAD_BYTES: u64 = 5 * 1024 * 1024;

fn should_download_content(mime: &str, size: u64) -> bool {
    size <= MAX_INLINE_DOWNLOAD_BYTES
        && (mime.starts_with("text/") || mime == "application/pdf" || mime == "application/json")
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum MicrosoftResource {
    OneDrive,
    Outlook,
    Calendar,
}

impl MicrosoftResource {
    fn from_kind(kind: ConnectorKind) -> Self {
        match kind {
            ConnectorKind::OneDrive => Self::OneDrive,
            ConnectorKind::Outlook => Self::Outlook,
            ConnectorKind::MicrosoftCalendar => Self::Calendar,
            other => panic!("{other:?} is not a Microsoft connector kind"),
        }
    }

    fn delta_path(self) -> &'static str {
        match self {
            Self::OneDrive => "/me/drive/root/delta?$top=200",
            Self::Outlook => "/me/mailFolders/inbox/messages/delta",
            Self::Calendar => "/me/calendarView/delta",
        }
    }

    fn scheme(self) -> &'static str {
        match self {
            Self::OneDrive => "onedrive",
            Self::Outlook => "outlook",
            Self::Calendar => "microsoftcalendar",
        }
    }

    /// URI segment for an item of this resource, analogous to OneDrive's
    /// `files`.
    fn item_segment(self) -> &'static str {
        match self {
            Self::OneDrive => "files",
            Self::Outlook => "messages",
            Self::Calendar => "events",
        }
    }

    /// URI segment for an item's parent, analogous to OneDrive's `folders`.
    fn parent_segment(self) -> &'static str {
        match self {
            Self::OneDrive => "folders",
            Self::Outlook => "folders",
            Self::Calendar => "events",
        }
    }
}

#[derive(Serialize, Deserialize)]
struct DeltaCursor {
    v: u32,
    delta_link: String,
}

#[derive(Clone)]
pub struct MicrosoftConnector {
    source_id: SourceId,
    kind: ConnectorKind,
    resource: MicrosoftResource,
    client: RetryingClient,
    closed: Arc<std::sync::atomic::AtomicBool>,
}

impl MicrosoftConnector {
    pub fn new(
        source_id: SourceId,
        kind: ConnectorKind,
        rate_limiter: Arc<dyn RateLimiter>,
        token_provider: Arc<dyn TokenProvider>,
        credentials_id: CredentialsId,
    ) -> Self {
        Self {
            source_id,
            kind,
            resource: MicrosoftResource::from_kind(kind),
            client: RetryingClient::new(GRAPH_BASE, rate_limiter, token_provider, credentials_id),
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

    async fn item_to_change(&self, item: &Value) -> Option<RawDocumentChange> {
        let id = item["id"].as_str()?;
        let uri = format!("{}://{}/{id}", self.resource.scheme(), self.resource.item_segment());
        if item.get("deleted").is_some() {
            let rid = RemoteId::new(id.to_string()).ok()?;
            return Some(RawDocumentChange::deleted(self.source_id, uri, rid));
        }
        if item.get("folder").is_some() {
            return None;
        }
        Some(RawDocumentChange::updated(self.item_to_document(item).await?))
    }

    async fn item_to_document(&self, item: &Value) -> Option<RawDocument> {
        let id = item["id"].as_str()?;
        let mime = item["file"]["mimeType"]
            .as_str()
            .unwrap_or("application/octet-stream")
            .to_string();
        let size = item["size"].as_u64().unwrap_or(0);

        let content = if self.resource == MicrosoftResource::OneDrive
            && should_download_content(&mime, size)
        {
            let path = format!("/me/drive/items/{id}/content");
            match self.client.get(&path, CancellationToken::new()).await {
                Ok(resp) => resp.bytes().await.map(|b| b.to_vec()).unwrap_or_default(),
                Err(_) => Vec::new(),
            }
        } else {
            Vec::new()
        };

        Some(RawDocument {
            source_id: self.source_id,
            uri: format!("{}://{}/{id}", self.resource.scheme(), self.resource.item_segment()),
            remote_id: RemoteId::new(id.to_string()).ok()?,
            mime_type: mime,
            content,
            parent_uri: item["parentReference"]["id"]
                .as_str()
                .map(|p| format!("{}://{}/{p}", self.resource.scheme(), self.resource.parent_segment())),
            title: item["name"]
                .as_str()
                .or_else(|| item["subject"].as_str())
                .map(String::from),
            modified_at: item["lastModifiedDateTime"].as_str().and_then(|t| t.parse().ok()),
            metadata: Default::default(),
        })
    }

    async fn run_full_delta(
        &self,
        items_tx: mpsc::Sender<RawDocument>,
        events_tx: mpsc::Sender<SyncEvent>,
        cancel: CancellationToken,
    ) {
        self.run_delta(self.resource.delta_path().to_string(), items_tx, None, events_tx, cancel)
            .await;
    }

    async fn run_incremental_delta(
        &self,
        cursor: DeltaCursor,
        items_tx: mpsc::Sender<RawDocumentChange>,
        events_tx: mpsc::Sender<SyncEvent>,
        cancel: CancellationToken,
    ) {
        self.run_delta(cursor.delta_link, None, Some(items_tx), events_tx, cancel).await;
    }

    /// Shared pagination loop. Exactly one of `full_tx`/`change_tx` is set
    /// depending on whether this is a full or incremental sync; items are
    /// filtered (folders skipped) and either emitted as bare documents or
    /// wrapped in a change record accordingly.
    async fn run_delta(
        &self,
        start_url_or_path: String,
        full_tx: Option<mpsc::Sender<RawDocument>>,
        change_tx: Option<mpsc::Sender<RawDocumentChange>>,
        events_tx: mpsc::Sender<SyncEvent>,
        cancel: CancellationToken,
    ) {
        let mut next: Option<String> = Some(start_url_or_path);
        let mut delta_link = String::new();

        while let Some(url) = next.take() {
            if cancel.is_cancelled() {
                return;
            }
            let resp = if url.starts_with("http") {
                self.client.get_absolute(&url, cancel.clone()).await
            } else {
                self.client.get(&url, cancel.clone()).await
            };
            let resp = match resp {
                Ok(r) => r,
                Err(ConnectorError::InvalidCursor) => {
                    let _ = events_tx.send(SyncEvent::Error(ConnectorError::DeltaTokenExpired)).await;
                    return;
                }
                Err(e) => {
                    let _ = events_tx.send(SyncEvent::Error(e)).await;
                    return;
                }
            };
            let body: Value = match resp.json().await {
                Ok(v) => v,
                Err(e) => {
                    let _ = events_tx.send(SyncEvent::Error(ConnectorError::Other(e.into()))).await;
                    return;
                }
            };

            for item in body["value"].as_array().cloned().unwrap_or_default() {
                if let Some(full_tx) = &full_tx {
                    if item.get("deleted").is_some() || item.get("folder").is_some() {
                        continue;
                    }
                    if let Some(doc) = self.item_to_document(&item).await {
                        if full_tx.send(doc).await.is_err() {
                            return;
                        }
                    }
                } else if let Some(change_tx) = &change_tx {
                    if let Some(change) = self.item_to_change(&item).await {
                        if change_tx.send(change).await.is_err() {
                            return;
                        }
                    }
                }
            }

            if let Some(n) = body["@odata.nextLink"].as_str() {
                next = Some(n.to_string());
            } else if let Some(d) = body["@odata.deltaLink"].as_str() {
                delta_link = d.to_string();
            }
        }

        let cursor = DeltaCursor { v: 1, delta_link };
        match encode(&cursor) {
            Ok(new_cursor) => {
                let _ = events_tx.send(SyncEvent::Complete(SyncComplete { new_cursor })).await;
            }
            Err(e) => {
                let _ = events_tx.send(SyncEvent::Error(e)).await;
            }
        }
    }
}

#[async_trait]
impl Connector for MicrosoftConnector {
    fn kind(&self) -> ConnectorKind {
        self.kind
    }

    fn source_id(&self) -> SourceId {
        self.source_id
    }

    fn capabilities(&self) -> ConnectorCapabilities {
        default_capabilities(self.kind)
    }

    async fn validate(&self) -> Result<(), ConnectorError> {
        self.check_open()?;
        self.client.get("/me", CancellationToken::new()).await?;
        Ok(())
    }

    async fn full_sync(&self, cancel: CancellationToken) -> Result<SyncHandle<RawDocument>, ConnectorError> {
        self.check_open()?;
        let (items_tx, events_tx, handle) = SyncHandle::channel_pair();
        let this = self.clone();
        tokio::spawn(async move { this.run_full_delta(items_tx, events_tx, cancel).await });
        Ok(handle)
    }

    async fn incremental_sync(
        &self,
        cursor: String,
        cancel: CancellationToken,
    ) -> Result<SyncHandle<RawDocumentChange>, ConnectorError> {
        self.check_open()?;
        let cursor: DeltaCursor = decode(&cursor)?;
        let (items_tx, events_tx, handle) = SyncHandle::channel_pair();
        let this = self.clone();
        tokio::spawn(async move { this.run_incremental_delta(cursor, items_tx, events_tx, cancel).await });
        Ok(handle)
    }

    async fn get_account_identifier(&self) -> Result<AccountIdentifier, ConnectorError> {
        self.check_open()?;
        let resp = self.client.get("/me", CancellationToken::new()).await?;
        let body: Value = resp.json().await.map_err(|e| ConnectorError::Other(e.into()))?;
        let upn = body["userPrincipalName"]
            .as_str()
            .or_else(|| body["mail"].as_str())
            .ok_or_else(|| ConnectorError::Other(anyhow::anyhow!("missing userPrincipalName")))?;
        AccountIdentifier::new(upn.to_string()).map_err(Into::into)
    }

    async fn close(&self) -> Result<(), ConnectorError> {
        self.closed.store(true, std::sync::atomic::Ordering::SeqCst);
        Ok(())
    }
}
