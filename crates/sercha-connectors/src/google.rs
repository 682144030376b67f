//! Google Drive / Gmail / Calendar connectors.
//!
//! All three share one OAuth handler (a single pre-granted scope set) and
//! the `"google"` rate-limit preset, and all follow the same shape: an
//! initial enumeration call that also captures a cursor, then a native
//! change-feed endpoint for incremental sync: Drive's
//! `files.list`/`changes.list`, Gmail's `history.list`, and Calendar's
//! sync-token model.

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sercha_core::domain::{
    AccountIdentifier, ConnectorCapabilities, ConnectorError, ConnectorKind, CredentialsId,
    RawDocument, RawDocumentChange, SourceId, SyncComplete, SyncEvent,
};
use sercha_core::ports::connector::{Connector, SyncHandle};
use sercha_core::ports::{RateLimiter, TokenProvider};
use tokio_util::sync::CancellationToken;
use tracing::warn;

use crate::capabilities::default_capabilities;
use crate::cursor_codec::{decode, encode};
use crate::http::RetryingClient;

const DRIVE_BASE: &str = "https://www.googleapis.com/drive/v3";
const GMAIL_BASE: &str = "https://gmail.googleapis.com/gmail/v1";
const CALENDAR_BASE: &str = "https://www.googleapis.com/calendar/v3";

/// Text MIME types downloaded inline; everything else is skipped unless
/// explicitly allow-listed via `mime_allowlist` in the source config.
fn should_download_content(mime: &str) -> bool {
    mime.starts_with("text/") || mime == "application/pdf" || mime == "application/json"
}

/// Gmail's `historyId` rides as a JSON string (Gmail's API avoids precision
/// loss on int64 values in JSON numbers), but the persisted cursor wants it
/// numeric; accept either representation from the wire.
fn parse_history_id(value: &Value) -> u64 {
    value
        .as_str()
        .and_then(|s| s.parse().ok())
        .or_else(|| value.as_u64())
        .unwrap_or_default()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum GoogleProduct {
    Drive,
    Gmail,
    Calendar,
}

impl GoogleProduct {
    fn from_kind(kind: ConnectorKind) -> Self {
        match kind {
            ConnectorKind::GoogleDrive => Self::Drive,
            ConnectorKind::Gmail => Self::Gmail,
            ConnectorKind::GoogleCalendar => Self::Calendar,
            other => panic!("{other:?} is not a Google connector kind"),
        }
    }
}

#[derive(Serialize, Deserialize)]
struct DriveCursor {
    v: u32,
    page_token: String,
}

#[derive(Serialize, Deserialize)]
struct GmailCursor {
    v: u32,
    history_id: u64,
}

#[derive(Serialize, Deserialize)]
struct CalendarCursor {
    v: u32,
    sync_token: String,
}

#[derive(Clone)]
pub struct GoogleConnector {
    source_id: SourceId,
    kind: ConnectorKind,
    product: GoogleProduct,
    client: RetryingClient,
    closed: Arc<std::sync::atomic::AtomicBool>,
}

impl GoogleConnector {
    pub fn new(
        source_id: SourceId,
        kind: ConnectorKind,
        rate_limiter: Arc<dyn RateLimiter>,
        token_provider: Arc<dyn TokenProvider>,
        credentials_id: CredentialsId,
    ) -> Self {
        let product = GoogleProduct::from_kind(kind);
        let base = match product {
            GoogleProduct::Drive => DRIVE_BASE,
            GoogleProduct::Gmail => GMAIL_BASE,
            GoogleProduct::Calendar => CALENDAR_BASE,
        };
        Self {
            source_id,
            kind,
            product,
            client: RetryingClient::new(base, rate_limiter, token_provider, credentials_id),
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

    async fn drive_full_sync(
        &self,
        items_tx: tokio::sync::mpsc::Sender<RawDocument>,
        events_tx: tokio::sync::mpsc::Sender<SyncEvent>,
        cancel: CancellationToken,
    ) {
        // Capture the starting page token before enumerating, same
        // reasoning as Gmail's historyId: a change that lands mid-sync
        // must still show up on the next incremental pass.
        let start_token = match self
            .client
            .get("/changes/startPageToken", cancel.clone())
            .await
        {
            Ok(resp) => match resp.json::<Value>().await {
                Ok(v) => v["startPageToken"].as_str().unwrap_or_default().to_string(),
                Err(e) => {
                    let _ = events_tx.send(SyncEvent::Error(ConnectorError::Other(e.into()))).await;
                    return;
                }
            },
            Err(e) => {
                let _ = events_tx.send(SyncEvent::Error(e)).await;
                return;
            }
        };

        let mut page_token: Option<String> = None;
        loop {
            if cancel.is_cancelled() {
                return;
            }
            let path = match &page_token {
                Some(token) => format!(
                    "/files?pageSize=100&pageToken={token}&fields=nextPageToken,files(id,name,mimeType,parents,modifiedTime,trashed)"
                ),
                None => "/files?pageSize=100&fields=nextPageToken,files(id,name,mimeType,parents,modifiedTime,trashed)".to_string(),
            };
            let resp = match self.client.get(&path, cancel.clone()).await {
                Ok(r) => r,
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

            for file in body["files"].as_array().cloned().unwrap_or_default() {
                if file["trashed"].as_bool().unwrap_or(false) {
                    continue;
                }
                if let Some(doc) = self.drive_file_to_document(&file).await {
                    if items_tx.send(doc).await.is_err() {
                        return;
                    }
                }
            }

            page_token = body["nextPageToken"].as_str().map(String::from);
            if page_token.is_none() {
                break;
            }
        }

        let cursor = DriveCursor { v: 1, page_token: start_token };
        match encode(&cursor) {
            Ok(new_cursor) => {
                let _ = events_tx.send(SyncEvent::Complete(SyncComplete { new_cursor })).await;
            }
            Err(e) => {
                let _ = events_tx.send(SyncEvent::Error(e)).await;
            }
        }
    }

    async fn drive_file_to_document(&self, file: &Value) -> Option<RawDocument> {
        let id = file["id"].as_str()?;
        let mime = file["mimeType"].as_str().unwrap_or("application/octet-stream");
        let content = if should_download_content(mime) {
            self.client
                .get(&format!("/files/{id}?alt=media"), CancellationToken::new())
                .await
                .ok()?
                .bytes()
                .await
                .ok()
                .map(|b| b.to_vec())
                .unwrap_or_default()
        } else {
            Vec::new()
        };

        Some(RawDocument {
            source_id: self.source_id,
            uri: format!("gdrive://files/{id}"),
            remote_id: sercha_core::domain::RemoteId::new(id.to_string()).ok()?,
            mime_type: mime.to_string(),
            content,
            parent_uri: file["parents"][0]
                .as_str()
                .map(|p| format!("gdrive://files/{p}")),
            title: file["name"].as_str().map(String::from),
            modified_at: file["modifiedTime"].as_str().and_then(|t| t.parse().ok()),
            metadata: Default::default(),
        })
    }

    async fn drive_incremental_sync(
        &self,
        cursor: DriveCursor,
        items_tx: tokio::sync::mpsc::Sender<RawDocumentChange>,
        events_tx: tokio::sync::mpsc::Sender<SyncEvent>,
        cancel: CancellationToken,
    ) {
        let mut page_token = cursor.page_token;
        loop {
            if cancel.is_cancelled() {
                return;
            }
            let path = format!(
                "/changes?pageToken={page_token}&fields=nextPageToken,newStartPageToken,changes(fileId,removed,file(id,name,mimeType,parents,modifiedTime,trashed))"
            );
            let resp = match self.client.get(&path, cancel.clone()).await {
                Ok(r) => r,
                Err(e) => {
                    // A bad/expired page token maps to `InvalidCursor`
                    // already, inside `RetryingClient::map_status_error`.
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

            for change in body["changes"].as_array().cloned().unwrap_or_default() {
                let removed = change["removed"].as_bool().unwrap_or(false)
                    || change["file"]["trashed"].as_bool().unwrap_or(false);
                let file_id = change["fileId"].as_str().unwrap_or_default();
                let change = if removed {
                    sercha_core::domain::RemoteId::new(file_id.to_string())
                        .ok()
                        .map(|rid| {
                            RawDocumentChange::deleted(
                                self.source_id,
                                format!("gdrive://files/{file_id}"),
                                rid,
                            )
                        })
                } else if let Some(doc) = self.drive_file_to_document(&change["file"]).await {
                    Some(RawDocumentChange::updated(doc))
                } else {
                    None
                };
                if let Some(change) = change {
                    if items_tx.send(change).await.is_err() {
                        return;
                    }
                }
            }

            if let Some(next) = body["nextPageToken"].as_str() {
                page_token = next.to_string();
                continue;
            }

            let new_start = body["newStartPageToken"]
                .as_str()
                .unwrap_or(&page_token)
                .to_string();
            let cursor = DriveCursor { v: 1, page_token: new_start };
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

    async fn gmail_full_sync(
        &self,
        items_tx: tokio::sync::mpsc::Sender<RawDocument>,
        events_tx: tokio::sync::mpsc::Sender<SyncEvent>,
        cancel: CancellationToken,
    ) {
        let history_id = match self.client.get("/users/me/profile", cancel.clone()).await {
            Ok(resp) => match resp.json::<Value>().await {
                Ok(v) => parse_history_id(&v["historyId"]),
                Err(e) => {
                    let _ = events_tx.send(SyncEvent::Error(ConnectorError::Other(e.into()))).await;
                    return;
                }
            },
            Err(e) => {
                let _ = events_tx.send(SyncEvent::Error(e)).await;
                return;
            }
        };

        let mut page_token: Option<String> = None;
        loop {
            if cancel.is_cancelled() {
                return;
            }
            let path = match &page_token {
                Some(t) => format!("/users/me/messages?labelIds=INBOX&pageToken={t}"),
                None => "/users/me/messages?labelIds=INBOX".to_string(),
            };
            let resp = match self.client.get(&path, cancel.clone()).await {
                Ok(r) => r,
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

            for msg in body["messages"].as_array().cloned().unwrap_or_default() {
                let Some(id) = msg["id"].as_str() else { continue };
                if let Some(doc) = self.gmail_fetch_message(id).await {
                    if items_tx.send(doc).await.is_err() {
                        return;
                    }
                }
            }

            page_token = body["nextPageToken"].as_str().map(String::from);
            if page_token.is_none() {
                break;
            }
        }

        let cursor = GmailCursor { v: 1, history_id };
        match encode(&cursor) {
            Ok(new_cursor) => {
                let _ = events_tx.send(SyncEvent::Complete(SyncComplete { new_cursor })).await;
            }
            Err(e) => {
                let _ = events_tx.send(SyncEvent::Error(e)).await;
            }
        }
    }

    async fn gmail_fetch_message(&self, id: &str) -> Option<RawDocument> {
        let resp = self
            .client
            .get(&format!("/users/me/messages/{id}?format=raw"), CancellationToken::new())
            .await
            .ok()?;
        let body: Value = resp.json().await.ok()?;
        let raw = body["raw"].as_str().unwrap_or_default();
        let content = {
            use base64::Engine as _;
            base64::engine::general_purpose::URL_SAFE_NO_PAD
                .decode(raw)
                .unwrap_or_default()
        };

        Some(RawDocument {
            source_id: self.source_id,
            uri: format!("gmail://messages/{id}"),
            remote_id: sercha_core::domain::RemoteId::new(id.to_string()).ok()?,
            mime_type: "message/rfc822".to_string(),
            content,
            parent_uri: body["threadId"].as_str().map(|t| format!("gmail://threads/{t}")),
            title: body["snippet"].as_str().map(String::from),
            modified_at: None,
            metadata: Default::default(),
        })
    }

    async fn gmail_incremental_sync(
        &self,
        cursor: GmailCursor,
        items_tx: tokio::sync::mpsc::Sender<RawDocumentChange>,
        events_tx: tokio::sync::mpsc::Sender<SyncEvent>,
        cancel: CancellationToken,
    ) {
        let mut max_history_id = cursor.history_id;
        let mut page_token: Option<String> = None;
        loop {
            if cancel.is_cancelled() {
                return;
            }
            let path = match &page_token {
                Some(t) => format!(
                    "/users/me/history?startHistoryId={}&pageToken={t}",
                    cursor.history_id
                ),
                None => format!("/users/me/history?startHistoryId={}", cursor.history_id),
            };
            let resp = match self.client.get(&path, cancel.clone()).await {
                Ok(r) => r,
                Err(ConnectorError::NotFound(_)) => {
                    let _ = events_tx.send(SyncEvent::Error(ConnectorError::HistoryIdExpired)).await;
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

            if body.get("historyId").is_some() {
                max_history_id = parse_history_id(&body["historyId"]);
            }

            for record in body["history"].as_array().cloned().unwrap_or_default() {
                for added in record["messagesAdded"].as_array().cloned().unwrap_or_default() {
                    let Some(id) = added["message"]["id"].as_str() else { continue };
                    if let Some(doc) = self.gmail_fetch_message(id).await {
                        if items_tx.send(RawDocumentChange::created(doc)).await.is_err() {
                            return;
                        }
                    }
                }
                for deleted in record["messagesDeleted"].as_array().cloned().unwrap_or_default() {
                    let Some(id) = deleted["message"]["id"].as_str() else { continue };
                    if let Ok(rid) = sercha_core::domain::RemoteId::new(id.to_string()) {
                        let change = RawDocumentChange::deleted(self.source_id, format!("gmail://messages/{id}"), rid);
                        if items_tx.send(change).await.is_err() {
                            return;
                        }
                    }
                }
                for relabeled in [
                    record["labelsAdded"].as_array().cloned().unwrap_or_default(),
                    record["labelsRemoved"].as_array().cloned().unwrap_or_default(),
                ]
                .concat()
                {
                    let Some(id) = relabeled["message"]["id"].as_str() else { continue };
                    if let Some(doc) = self.gmail_fetch_message(id).await {
                        if items_tx.send(RawDocumentChange::updated(doc)).await.is_err() {
                            return;
                        }
                    }
                }
            }

            page_token = body["nextPageToken"].as_str().map(String::from);
            if page_token.is_none() {
                break;
            }
        }

        let cursor = GmailCursor { v: 1, history_id: max_history_id };
        match encode(&cursor) {
            Ok(new_cursor) => {
                let _ = events_tx.send(SyncEvent::Complete(SyncComplete { new_cursor })).await;
            }
            Err(e) => {
                let _ = events_tx.send(SyncEvent::Error(e)).await;
            }
        }
    }

    async fn calendar_full_sync(
        &self,
        items_tx: tokio::sync::mpsc::Sender<RawDocument>,
        events_tx: tokio::sync::mpsc::Sender<SyncEvent>,
        cancel: CancellationToken,
    ) {
        let mut page_token: Option<String> = None;
        let mut sync_token = String::new();
        loop {
            if cancel.is_cancelled() {
                return;
            }
            let path = match &page_token {
                Some(t) => format!("/calendars/primary/events?pageToken={t}"),
                None => "/calendars/primary/events".to_string(),
            };
            let resp = match self.client.get(&path, cancel.clone()).await {
                Ok(r) => r,
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

            for event in body["items"].as_array().cloned().unwrap_or_default() {
                if let Some(doc) = Self::calendar_event_to_document(self.source_id, &event) {
                    if items_tx.send(doc).await.is_err() {
                        return;
                    }
                }
            }

            page_token = body["nextPageToken"].as_str().map(String::from);
            if let Some(t) = body["nextSyncToken"].as_str() {
                sync_token = t.to_string();
            }
            if page_token.is_none() {
                break;
            }
        }

        let cursor = CalendarCursor { v: 1, sync_token };
        match encode(&cursor) {
            Ok(new_cursor) => {
                let _ = events_tx.send(SyncEvent::Complete(SyncComplete { new_cursor })).await;
            }
            Err(e) => {
                let _ = events_tx.send(SyncEvent::Error(e)).await;
            }
        }
    }

    fn calendar_event_to_document(source_id: SourceId, event: &Value) -> Option<RawDocument> {
        let id = event["id"].as_str()?;
        let content = event["description"].as_str().unwrap_or_default().as_bytes().to_vec();
        let parent_uri = event["recurringEventId"]
            .as_str()
            .map(|p| format!("gcal://primary/events/{p}"));

        Some(RawDocument {
            source_id,
            uri: format!("gcal://primary/events/{id}"),
            remote_id: sercha_core::domain::RemoteId::new(id.to_string()).ok()?,
            mime_type: "text/calendar".to_string(),
            content,
            parent_uri,
            title: event["summary"].as_str().map(String::from),
            modified_at: event["updated"].as_str().and_then(|t| t.parse().ok()),
            metadata: Default::default(),
        })
    }

    async fn calendar_incremental_sync(
        &self,
        cursor: CalendarCursor,
        items_tx: tokio::sync::mpsc::Sender<RawDocumentChange>,
        events_tx: tokio::sync::mpsc::Sender<SyncEvent>,
        cancel: CancellationToken,
    ) {
        let mut page_token: Option<String> = None;
        let mut sync_token = cursor.sync_token.clone();
        loop {
            if cancel.is_cancelled() {
                return;
            }
            let path = match &page_token {
                Some(t) => format!("/calendars/primary/events?pageToken={t}"),
                None => format!("/calendars/primary/events?syncToken={}", cursor.sync_token),
            };
            let resp = match self.client.get(&path, cancel.clone()).await {
                Ok(r) => r,
                Err(e) => {
                    // Google returns 410 Gone for an expired sync token,
                    // which `RetryingClient` already maps to `InvalidCursor`.
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

            for event in body["items"].as_array().cloned().unwrap_or_default() {
                let id = event["id"].as_str().unwrap_or_default();
                let change = if event["status"].as_str() == Some("cancelled") {
                    sercha_core::domain::RemoteId::new(id.to_string()).ok().map(|rid| {
                        RawDocumentChange::deleted(self.source_id, format!("gcal://primary/events/{id}"), rid)
                    })
                } else {
                    Self::calendar_event_to_document(self.source_id, &event).map(RawDocumentChange::updated)
                };
                if let Some(change) = change {
                    if items_tx.send(change).await.is_err() {
                        return;
                    }
                }
            }

            page_token = body["nextPageToken"].as_str().map(String::from);
            if let Some(t) = body["nextSyncToken"].as_str() {
                sync_token = t.to_string();
            }
            if page_token.is_none() {
                break;
            }
        }

        let cursor = CalendarCursor { v: 1, sync_token };
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
impl Connector for GoogleConnector {
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
        let path = match self.product {
            GoogleProduct::Drive => "/about?fields=user",
            GoogleProduct::Gmail => "/users/me/profile",
            GoogleProduct::Calendar => "/calendars/primary",
        };
        self.client.get(path, CancellationToken::new()).await?;
        Ok(())
    }

    async fn full_sync(&self, cancel: CancellationToken) -> Result<SyncHandle<RawDocument>, ConnectorError> {
        self.check_open()?;
        let (items_tx, events_tx, handle) = SyncHandle::channel_pair();
        let this = self.clone();
        tokio::spawn(async move {
            match this.product {
                GoogleProduct::Drive => this.drive_full_sync(items_tx, events_tx, cancel).await,
                GoogleProduct::Gmail => this.gmail_full_sync(items_tx, events_tx, cancel).await,
                GoogleProduct::Calendar => this.calendar_full_sync(items_tx, events_tx, cancel).await,
            }
        });
        Ok(handle)
    }

    async fn incremental_sync(
        &self,
        cursor: String,
        cancel: CancellationToken,
    ) -> Result<SyncHandle<RawDocumentChange>, ConnectorError> {
        self.check_open()?;
        let (items_tx, events_tx, handle) = SyncHandle::channel_pair();
        let this = self.clone();
        match this.product {
            GoogleProduct::Drive => {
                let cursor: DriveCursor = decode(&cursor)?;
                tokio::spawn(async move { this.drive_incremental_sync(cursor, items_tx, events_tx, cancel).await });
            }
            GoogleProduct::Gmail => {
                let cursor: GmailCursor = decode(&cursor)?;
                tokio::spawn(async move { this.gmail_incremental_sync(cursor, items_tx, events_tx, cancel).await });
            }
            GoogleProduct::Calendar => {
                let cursor: CalendarCursor = decode(&cursor)?;
                tokio::spawn(async move { this.calendar_incremental_sync(cursor, items_tx, events_tx, cancel).await });
            }
        }
        Ok(handle)
    }

    async fn get_account_identifier(&self) -> Result<AccountIdentifier, ConnectorError> {
        self.check_open()?;
        let resp = self.client.get("/about?fields=user", CancellationToken::new()).await?;
        let body: Value = resp.json().await.map_err(|e| ConnectorError::Other(e.into()))?;
        let email = body["user"]["emailAddress"]
            .as_str()
            .ok_or_else(|| ConnectorError::Other(anyhow::anyhow!("missing emailAddress")))?;
        AccountIdentifier::new(email.to_string()).map_err(Into::into)
    }

    async fn close(&self) -> Result<(), ConnectorError> {
        self.closed.store(true, std::sync::atomic::Ordering::SeqCst);
        Ok(())
    }
}

