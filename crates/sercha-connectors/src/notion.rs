//! Notion connector.
//!
//! Notion's `/v1/search` reports no deletions, so incremental sync tracks
//! every known page/database id itself, diffing the current enumeration
//! against the prior cursor to synthesize deletions. Pages are rendered
//! block-by-block into Markdown rather than downloaded as a single blob,
//! via the pure rendering submodule in [`render`].

use std::collections::HashMap;
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

mod render;

const API_BASE: &str = "https://api.notion.com/v1";
const NOTION_VERSION: &str = "2022-06-28";
const MAX_BLOCK_DEPTH: u32 = 10;

#[derive(Serialize, Deserialize, Default)]
struct PageState {
    #[serde(rename = "last_edited")]
    last_edited_time: String,
    #[serde(rename = "is_db")]
    is_database: bool,
}

#[derive(Serialize, Deserialize)]
struct NotionCursor {
    v: u32,
    page_states: HashMap<String, PageState>,
    last_sync_time: String,
}

impl Default for NotionCursor {
    fn default() -> Self {
        Self {
            v: 1,
            page_states: HashMap::new(),
            last_sync_time: chrono::DateTime::<chrono::Utc>::from_timestamp(0, 0)
                .unwrap()
                .to_rfc3339(),
        }
    }
}

#[derive(Clone)]
pub struct NotionConnector {
    source_id: SourceId,
    include_comments: bool,
    client: RetryingClient,
    closed: Arc<std::sync::atomic::AtomicBool>,
}

impl NotionConnector {
    pub fn new(
        source_id: SourceId,
        include_comments: bool,
        rate_limiter: Arc<dyn RateLimiter>,
        token_provider: Arc<dyn TokenProvider>,
        credentials_id: CredentialsId,
    ) -> Self {
        Self {
            source_id,
            include_comments,
            client: RetryingClient::new(API_BASE, rate_limiter, token_provider, credentials_id),
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

    async fn search_all(&self) -> Result<Vec<Value>, ConnectorError> {
        let mut results = Vec::new();
        let mut cursor: Option<String> = None;
        loop {
            let mut body = json!({ "page_size": 100 });
            if let Some(c) = &cursor {
                body["start_cursor"] = json!(c);
            }
            let resp = self.post("/search", body).await?;
            let parsed: Value = resp.json().await.map_err(|e| ConnectorError::Other(e.into()))?;
            results.extend(parsed["results"].as_array().cloned().unwrap_or_default());
            if parsed["has_more"].as_bool().unwrap_or(false) {
                cursor = parsed["next_cursor"].as_str().map(String::from);
            } else {
                break;
            }
        }
        Ok(results)
    }

    async fn get(&self, path: &str) -> Result<reqwest::Response, ConnectorError> {
        self.client
            .get_with_header(path, "Notion-Version", NOTION_VERSION, CancellationToken::new())
            .await
    }

    async fn post(&self, path: &str, body: Value) -> Result<reqwest::Response, ConnectorError> {
        self.client
            .post_json_with_header(path, body, "Notion-Version", NOTION_VERSION, CancellationToken::new())
            .await
    }

    async fn fetch_blocks(&self, block_id: &str, depth: u32) -> Vec<Value> {
        if depth >= MAX_BLOCK_DEPTH {
            return Vec::new();
        }
        let mut blocks = Vec::new();
        let mut cursor: Option<String> = None;
        loop {
            let path = match &cursor {
                Some(c) => format!("/blocks/{block_id}/children?page_size=100&start_cursor={c}"),
                None => format!("/blocks/{block_id}/children?page_size=100"),
            };
            let resp = match self.get(&path).await {
                Ok(r) => r,
                Err(_) => break,
            };
            let parsed: Value = match resp.json().await {
                Ok(v) => v,
                Err(_) => break,
            };
            for mut block in parsed["results"].as_array().cloned().unwrap_or_default() {
                if block["has_children"].as_bool().unwrap_or(false) {
                    let Some(id) = block["id"].as_str().map(String::from) else { continue };
                    let children = Box::pin(self.fetch_blocks(&id, depth + 1)).await;
                    block["_children"] = Value::Array(children);
                }
                blocks.push(block);
            }
            if parsed["has_more"].as_bool().unwrap_or(false) {
                cursor = parsed["next_cursor"].as_str().map(String::from);
            } else {
                break;
            }
        }
        blocks
    }

    async fn fetch_comments(&self, block_id: &str) -> Vec<String> {
        let path = format!("/comments?block_id={block_id}");
        let Ok(resp) = self.get(&path).await else {
            return Vec::new();
        };
        let Ok(parsed) = resp.json::<Value>().await else {
            return Vec::new();
        };
        parsed["results"]
            .as_array()
            .cloned()
            .unwrap_or_default()
            .into_iter()
            .filter_map(|c| render::plain_text_of(&c["rich_text"]))
            .collect()
    }

    async fn render_page(&self, id: &str, title: &str) -> Result<Vec<u8>, ConnectorError> {
        let blocks = self.fetch_blocks(id, 0).await;
        let mut markdown = render::render_blocks(&blocks);
        if self.include_comments {
            let comments = self.fetch_comments(id).await;
            if !comments.is_empty() {
                markdown.push_str("\n## Comments\n\n");
                for comment in comments {
                    markdown.push_str(&format!("- {comment}\n"));
                }
            }
        }
        let _ = title;
        Ok(markdown.into_bytes())
    }

    async fn render_database(&self, database: &Value) -> Result<(RawDocument, Vec<RawDocument>), ConnectorError> {
        let id = database["id"].as_str().unwrap_or_default();
        let title = render::plain_text_of(&database["title"]).unwrap_or_else(|| "Untitled".to_string());
        let schema_summary = render::render_property_schema(&database["properties"]);

        let summary_doc = RawDocument {
            source_id: self.source_id,
            uri: format!("notion://databases/{id}"),
            remote_id: RemoteId::new(id.to_string()).map_err(|_| ConnectorError::InvalidInput("bad id".into()))?,
            mime_type: "application/vnd.notion.database+json".to_string(),
            content: format!("# {title}\n\n{schema_summary}").into_bytes(),
            parent_uri: None,
            title: Some(title),
            modified_at: database["last_edited_time"].as_str().and_then(|t| t.parse().ok()),
            metadata: Default::default(),
        };

        let query: Value = self
            .post(&format!("/databases/{id}/query"), json!({}))
            .await?
            .json()
            .await
            .map_err(|e| ConnectorError::Other(e.into()))?;

        let mut rows = Vec::new();
        for row in query["results"].as_array().cloned().unwrap_or_default() {
            let Some(row_id) = row["id"].as_str() else { continue };
            let (metadata, row_title) = render::flatten_properties(&row["properties"]);
            rows.push(RawDocument {
                source_id: self.source_id,
                uri: format!("notion://databases/{id}/rows/{row_id}"),
                remote_id: RemoteId::new(row_id.to_string()).map_err(|_| ConnectorError::InvalidInput("bad id".into()))?,
                mime_type: "application/vnd.notion.database-item+json".to_string(),
                content: Vec::new(),
                parent_uri: Some(format!("notion://databases/{id}")),
                title: row_title,
                modified_at: row["last_edited_time"].as_str().and_then(|t| t.parse().ok()),
                metadata,
            });
        }

        Ok((summary_doc, rows))
    }

    async fn run_full_sync(
        &self,
        items_tx: mpsc::Sender<RawDocument>,
        events_tx: mpsc::Sender<SyncEvent>,
        cancel: CancellationToken,
    ) {
        let results = match self.search_all().await {
            Ok(r) => r,
            Err(e) => {
                let _ = events_tx.send(SyncEvent::Error(e)).await;
                return;
            }
        };

        let mut page_states = HashMap::new();
        for entry in &results {
            if cancel.is_cancelled() {
                return;
            }
            let Some(id) = entry["id"].as_str() else { continue };
            let is_database = entry["object"].as_str() == Some("database");
            let last_edited = entry["last_edited_time"].as_str().unwrap_or_default().to_string();
            page_states.insert(
                id.to_string(),
                PageState { last_edited_time: last_edited, is_database },
            );

            if is_database {
                match self.render_database(entry).await {
                    Ok((summary, rows)) => {
                        if items_tx.send(summary).await.is_err() {
                            return;
                        }
                        for row in rows {
                            if items_tx.send(row).await.is_err() {
                                return;
                            }
                        }
                    }
                    Err(e) => {
                        let _ = events_tx.send(SyncEvent::Error(e)).await;
                        return;
                    }
                }
            } else {
                let title = render::plain_text_of(&entry["properties"]["title"]["title"]).unwrap_or_default();
                match self.render_page(id, &title).await {
                    Ok(content) => {
                        let doc = RawDocument {
                            source_id: self.source_id,
                            uri: format!("notion://pages/{id}"),
                            remote_id: match RemoteId::new(id.to_string()) {
                                Ok(r) => r,
                                Err(_) => continue,
                            },
                            mime_type: "application/vnd.notion.page+json".to_string(),
                            content,
                            parent_uri: entry["parent"]["page_id"].as_str().map(|p| format!("notion://pages/{p}")),
                            title: Some(title),
                            modified_at: entry["last_edited_time"].as_str().and_then(|t| t.parse().ok()),
                            metadata: Default::default(),
                        };
                        if items_tx.send(doc).await.is_err() {
                            return;
                        }
                    }
                    Err(e) => {
                        let _ = events_tx.send(SyncEvent::Error(e)).await;
                        return;
                    }
                }
            }
        }

        let cursor = NotionCursor {
            v: 1,
            page_states,
            last_sync_time: chrono::Utc::now().to_rfc3339(),
        };
        match encode(&cursor) {
            Ok(new_cursor) => {
                let _ = events_tx.send(SyncEvent::Complete(SyncComplete { new_cursor })).await;
            }
            Err(e) => {
                let _ = events_tx.send(SyncEvent::Error(e)).await;
            }
        }
    }

    async fn run_incremental_sync(
        &self,
        mut cursor: NotionCursor,
        items_tx: mpsc::Sender<RawDocumentChange>,
        events_tx: mpsc::Sender<SyncEvent>,
        cancel: CancellationToken,
    ) {
        let results = match self.search_all().await {
            Ok(r) => r,
            Err(e) => {
                let _ = events_tx.send(SyncEvent::Error(e)).await;
                return;
            }
        };

        let mut seen = std::collections::HashSet::new();
        for entry in &results {
            if cancel.is_cancelled() {
                return;
            }
            let Some(id) = entry["id"].as_str() else { continue };
            seen.insert(id.to_string());
            let is_database = entry["object"].as_str() == Some("database");
            let last_edited = entry["last_edited_time"].as_str().unwrap_or_default().to_string();

            let prior_existed = cursor.page_states.contains_key(id);
            let unchanged = cursor
                .page_states
                .get(id)
                .map(|p| p.last_edited_time == last_edited)
                .unwrap_or(false);
            cursor.page_states.insert(
                id.to_string(),
                PageState { last_edited_time: last_edited, is_database },
            );
            if unchanged {
                continue;
            }
            let kind_ctor: fn(RawDocument) -> RawDocumentChange =
                if prior_existed { RawDocumentChange::updated } else { RawDocumentChange::created };

            if is_database {
                match self.render_database(entry).await {
                    Ok((summary, rows)) => {
                        if items_tx.send(kind_ctor(summary)).await.is_err() {
                            return;
                        }
                        for row in rows {
                            if items_tx.send(RawDocumentChange::updated(row)).await.is_err() {
                                return;
                            }
                        }
                    }
                    Err(e) => {
                        let _ = events_tx.send(SyncEvent::Error(e)).await;
                        return;
                    }
                }
            } else {
                let title = render::plain_text_of(&entry["properties"]["title"]["title"]).unwrap_or_default();
                match self.render_page(id, &title).await {
                    Ok(content) => {
                        let Ok(remote_id) = RemoteId::new(id.to_string()) else { continue };
                        let doc = RawDocument {
                            source_id: self.source_id,
                            uri: format!("notion://pages/{id}"),
                            remote_id,
                            mime_type: "application/vnd.notion.page+json".to_string(),
                            content,
                            parent_uri: entry["parent"]["page_id"].as_str().map(|p| format!("notion://pages/{p}")),
                            title: Some(title),
                            modified_at: entry["last_edited_time"].as_str().and_then(|t| t.parse().ok()),
                            metadata: Default::default(),
                        };
                        if items_tx.send(kind_ctor(doc)).await.is_err() {
                            return;
                        }
                    }
                    Err(e) => {
                        let _ = events_tx.send(SyncEvent::Error(e)).await;
                        return;
                    }
                }
            }
        }

        // Anything in the prior cursor not seen this pass is gone.
        let removed: Vec<String> = cursor
            .page_states
            .keys()
            .filter(|id| !seen.contains(*id))
            .cloned()
            .collect();
        for id in removed {
            cursor.page_states.remove(&id);
            let Ok(rid) = RemoteId::new(id.clone()) else { continue };
            let uri = format!("notion://pages/{id}");
            let change = RawDocumentChange::deleted(self.source_id, uri, rid);
            if items_tx.send(change).await.is_err() {
                return;
            }
        }

        cursor.last_sync_time = chrono::Utc::now().to_rfc3339();
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
impl Connector for NotionConnector {
    fn kind(&self) -> ConnectorKind {
        ConnectorKind::Notion
    }

    fn source_id(&self) -> SourceId {
        self.source_id
    }

    fn capabilities(&self) -> ConnectorCapabilities {
        default_capabilities(ConnectorKind::Notion)
    }

    async fn validate(&self) -> Result<(), ConnectorError> {
        self.check_open()?;
        self.get("/users/me").await.map(|_| ())
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
        let cursor: NotionCursor = decode(&cursor)?;
        let (items_tx, events_tx, handle) = SyncHandle::channel_pair();
        let this = self.clone();
        tokio::spawn(async move { this.run_incremental_sync(cursor, items_tx, events_tx, cancel).await });
        Ok(handle)
    }

    async fn get_account_identifier(&self) -> Result<AccountIdentifier, ConnectorError> {
        self.check_open()?;
        let resp = self.get("/users/me").await?;
        let body: Value = resp.json().await.map_err(|e| ConnectorError::Other(e.into()))?;
        let identifier = body["bot"]["owner"]["user"]["person"]["email"]
            .as_str()
            .or_else(|| body["bot"]["workspace_name"].as_str())
            .unwrap_or("notion-workspace");
        AccountIdentifier::new(identifier.to_string()).map_err(Into::into)
    }

    async fn close(&self) -> Result<(), ConnectorError> {
        self.closed.store(true, std::sync::atomic::Ordering::SeqCst);
        Ok(())
    }
}
