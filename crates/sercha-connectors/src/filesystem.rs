//! Local filesystem connector: reads files under a configured root,
//! recursing through subdirectories and skipping dot-prefixed entries.
//!
//! Cursors are plain decimal nanosecond timestamps (no base64/JSON
//! envelope, unlike every other connector family) since there's no wire
//! format to match — the cursor is purely this connector's own
//! high-water mark.

use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use sercha_core::domain::{
    AccountIdentifier, ChangeKind, ConnectorCapabilities, ConnectorError, ConnectorKind,
    RawDocument, RawDocumentChange, RemoteId, SourceId,
};
use sercha_core::ports::connector::{Connector, SyncHandle};
use sercha_core::domain::SyncEvent;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::warn;

use crate::capabilities::default_capabilities;

const MIME_OVERRIDES: &[(&str, &str)] = &[
    ("txt", "text/plain"),
    ("md", "text/markdown"),
    ("markdown", "text/markdown"),
    ("html", "text/html"),
    ("htm", "text/html"),
    ("json", "application/json"),
    ("pdf", "application/pdf"),
    ("csv", "text/csv"),
    ("xml", "application/xml"),
    ("ts", "text/typescript"),
    ("rs", "text/x-rust"),
];

fn guess_mime(path: &Path) -> String {
    path.extension()
        .and_then(|ext| ext.to_str())
        .and_then(|ext| {
            MIME_OVERRIDES
                .iter()
                .find(|(candidate, _)| candidate.eq_ignore_ascii_case(ext))
                .map(|(_, mime)| mime.to_string())
        })
        .unwrap_or_else(|| "application/octet-stream".to_string())
}

/// Expands a leading `~` via the OS home dir, resolves the result to an
/// absolute path against the current working dir, and cleans `.`/`..`
/// components — all without touching the filesystem.
pub fn expand_path(path: &str) -> PathBuf {
    let expanded = match path.strip_prefix("~/") {
        Some(rest) => dirs::home_dir()
            .map(|home| home.join(rest))
            .unwrap_or_else(|| PathBuf::from(path)),
        None if path == "~" => dirs::home_dir().unwrap_or_else(|| PathBuf::from(path)),
        None => PathBuf::from(path),
    };

    let absolute = if expanded.is_absolute() {
        expanded
    } else {
        std::env::current_dir()
            .map(|cwd| cwd.join(&expanded))
            .unwrap_or(expanded)
    };

    clean_path(&absolute)
}

fn clean_path(path: &Path) -> PathBuf {
    let mut cleaned = PathBuf::new();
    for component in path.components() {
        match component {
            std::path::Component::ParentDir => {
                cleaned.pop();
            }
            std::path::Component::CurDir => {}
            other => cleaned.push(other.as_os_str()),
        }
    }
    cleaned
}

fn is_hidden(path: &Path) -> bool {
    path.file_name()
        .and_then(|n| n.to_str())
        .map(|n| n.starts_with('.'))
        .unwrap_or(false)
}

fn uri_for(root: &Path, path: &Path) -> String {
    let relative = path.strip_prefix(root).unwrap_or(path);
    format!("filesystem://{}", relative.to_string_lossy())
}

fn system_time_to_nanos(time: SystemTime) -> i64 {
    time.duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos() as i64)
        .unwrap_or(0)
}

fn nanos_to_system_time(nanos: i64) -> SystemTime {
    UNIX_EPOCH + Duration::from_nanos(nanos.max(0) as u64)
}

fn system_time_to_chrono(time: SystemTime) -> DateTime<Utc> {
    DateTime::<Utc>::from(time)
}

/// Recursively collects every non-hidden regular file under `root`, in no
/// particular order, skipping directories (and their contents) whose name
/// starts with `.`.
fn walk(root: &Path) -> std::io::Result<Vec<PathBuf>> {
    let mut files = Vec::new();
    let mut stack = vec![root.to_path_buf()];
    while let Some(dir) = stack.pop() {
        for entry in std::fs::read_dir(&dir)? {
            let entry = entry?;
            let path = entry.path();
            if is_hidden(&path) {
                continue;
            }
            let file_type = entry.file_type()?;
            if file_type.is_dir() {
                stack.push(path);
            } else if file_type.is_file() {
                files.push(path);
            }
        }
    }
    Ok(files)
}

fn build_document(source_id: SourceId, root: &Path, path: &Path) -> std::io::Result<RawDocument> {
    let metadata = std::fs::metadata(path)?;
    let content = std::fs::read(path)?;
    let modified_at = metadata.modified().ok().map(system_time_to_chrono);

    Ok(RawDocument {
        source_id,
        uri: uri_for(root, path),
        remote_id: RemoteId::new(path.to_string_lossy().to_string())
            .unwrap_or_else(|_| RemoteId::new("unknown").expect("static literal is valid")),
        mime_type: guess_mime(path),
        content,
        parent_uri: path
            .parent()
            .filter(|p| *p != root)
            .map(|p| uri_for(root, p)),
        title: path.file_name().map(|n| n.to_string_lossy().to_string()),
        modified_at,
        metadata: Default::default(),
    })
}

pub struct FilesystemConnector {
    source_id: SourceId,
    root: PathBuf,
    closed: std::sync::atomic::AtomicBool,
}

impl FilesystemConnector {
    pub fn new(source_id: SourceId, root: impl Into<PathBuf>) -> Self {
        Self {
            source_id,
            root: root.into(),
            closed: std::sync::atomic::AtomicBool::new(false),
        }
    }

    fn check_open(&self) -> Result<(), ConnectorError> {
        if self.closed.load(std::sync::atomic::Ordering::SeqCst) {
            Err(ConnectorError::ConnectorClosed)
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl Connector for FilesystemConnector {
    fn kind(&self) -> ConnectorKind {
        ConnectorKind::Filesystem
    }

    fn source_id(&self) -> SourceId {
        self.source_id
    }

    fn capabilities(&self) -> ConnectorCapabilities {
        default_capabilities(ConnectorKind::Filesystem)
    }

    async fn validate(&self) -> Result<(), ConnectorError> {
        self.check_open()?;
        let metadata = tokio::fs::metadata(&self.root)
            .await
            .map_err(|e| ConnectorError::InvalidInput(format!("{}: {e}", self.root.display())))?;
        if !metadata.is_dir() {
            return Err(ConnectorError::InvalidInput(format!(
                "{} is not a directory",
                self.root.display()
            )));
        }
        Ok(())
    }

    async fn full_sync(
        &self,
        cancel: CancellationToken,
    ) -> Result<SyncHandle<RawDocument>, ConnectorError> {
        self.check_open()?;
        let root = self.root.clone();
        let source_id = self.source_id;
        let (items_tx, events_tx, handle) = SyncHandle::channel_pair();

        tokio::spawn(async move {
            let files = match walk(&root) {
                Ok(files) => files,
                Err(e) => {
                    let _ = events_tx
                        .send(SyncEvent::Error(ConnectorError::Other(e.into())))
                        .await;
                    return;
                }
            };

            for path in files {
                if cancel.is_cancelled() {
                    return;
                }
                match build_document(source_id, &root, &path) {
                    Ok(doc) => {
                        if items_tx.send(doc).await.is_err() {
                            return;
                        }
                    }
                    Err(e) => warn!(path = %path.display(), error = %e, "skipping unreadable file"),
                }
            }

            let new_cursor = system_time_to_nanos(SystemTime::now()).to_string();
            let _ = events_tx
                .send(SyncEvent::Complete(sercha_core::domain::SyncComplete { new_cursor }))
                .await;
        });

        Ok(handle)
    }

    async fn incremental_sync(
        &self,
        cursor: String,
        cancel: CancellationToken,
    ) -> Result<SyncHandle<RawDocumentChange>, ConnectorError> {
        self.check_open()?;
        let since_nanos: i64 = cursor
            .parse()
            .map_err(|_| ConnectorError::InvalidCursor)?;
        let since = nanos_to_system_time(since_nanos);

        let root = self.root.clone();
        let source_id = self.source_id;
        let (items_tx, events_tx, handle) = SyncHandle::channel_pair();

        tokio::spawn(async move {
            let files = match walk(&root) {
                Ok(files) => files,
                Err(e) => {
                    let _ = events_tx
                        .send(SyncEvent::Error(ConnectorError::Other(e.into())))
                        .await;
                    return;
                }
            };

            for path in files {
                if cancel.is_cancelled() {
                    return;
                }
                let modified = std::fs::metadata(&path).and_then(|m| m.modified());
                let Ok(modified) = modified else { continue };
                if modified <= since {
                    continue;
                }
                match build_document(source_id, &root, &path) {
                    // Incremental sync cannot distinguish new files from
                    // modified ones without per-file state; per spec,
                    // deletions are reported only by `watch`, never here.
                    Ok(doc) => {
                        if items_tx.send(RawDocumentChange::updated(doc)).await.is_err() {
                            return;
                        }
                    }
                    Err(e) => warn!(path = %path.display(), error = %e, "skipping unreadable file"),
                }
            }

            let new_cursor = system_time_to_nanos(SystemTime::now()).to_string();
            let _ = events_tx
                .send(SyncEvent::Complete(sercha_core::domain::SyncComplete { new_cursor }))
                .await;
        });

        Ok(handle)
    }

    async fn watch(
        &self,
        cancel: CancellationToken,
    ) -> Result<SyncHandle<RawDocumentChange>, ConnectorError> {
        self.check_open()?;
        let root = self.root.clone();
        let source_id = self.source_id;
        let (items_tx, events_tx, handle) = SyncHandle::channel_pair();

        let (raw_tx, mut raw_rx) = mpsc::channel::<notify::Result<Event>>(64);
        let mut watcher: RecommendedWatcher = notify::recommended_watcher(move |res| {
            let _ = raw_tx.blocking_send(res);
        })
        .map_err(|e| ConnectorError::Other(e.into()))?;
        watcher
            .watch(&root, RecursiveMode::Recursive)
            .map_err(|e| ConnectorError::Other(e.into()))?;

        tokio::spawn(async move {
            let _watcher = watcher; // keep alive for the task's lifetime
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => return,
                    event = raw_rx.recv() => {
                        let Some(Ok(event)) = event else { return };
                        for path in event.paths {
                            if is_hidden(&path) {
                                continue;
                            }
                            let change = match event.kind {
                                EventKind::Remove(_) => Some(RawDocumentChange::deleted(
                                    source_id,
                                    uri_for(&root, &path),
                                    RemoteId::new(path.to_string_lossy().to_string())
                                        .unwrap_or_else(|_| RemoteId::new("unknown").expect("static literal is valid")),
                                )),
                                EventKind::Create(_) => build_document(source_id, &root, &path)
                                    .ok()
                                    .map(RawDocumentChange::created),
                                EventKind::Modify(_) => build_document(source_id, &root, &path)
                                    .ok()
                                    .map(RawDocumentChange::updated),
                                _ => None,
                            };
                            if let Some(change) = change {
                                if items_tx.send(change).await.is_err() {
                                    return;
                                }
                            }
                        }
                    }
                }
            }
        });

        // `watch` never completes on its own; callers drop the handle
        // (dropping `cancel`'s owner) to stop it. No `Complete` event is
        // ever sent on this channel.
        let _ = &events_tx;
        Ok(handle)
    }

    async fn get_account_identifier(&self) -> Result<AccountIdentifier, ConnectorError> {
        self.check_open()?;
        AccountIdentifier::new(self.root.to_string_lossy().to_string()).map_err(Into::into)
    }

    async fn close(&self) -> Result<(), ConnectorError> {
        self.closed.store(true, std::sync::atomic::Ordering::SeqCst);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_file(dir: &Path, name: &str, contents: &str) -> PathBuf {
        let path = dir.join(name);
        let mut f = std::fs::File::create(&path).unwrap();
        f.write_all(contents.as_bytes()).unwrap();
        path
    }

    #[tokio::test]
    async fn full_sync_emits_all_non_hidden_files() {
        let dir = tempfile::tempdir().unwrap();
        write_file(dir.path(), "a.txt", "hello");
        write_file(dir.path(), ".hidden", "skip me");
        std::fs::create_dir(dir.path().join("sub")).unwrap();
        write_file(&dir.path().join("sub"), "b.md", "# hi");

        let connector = FilesystemConnector::new(SourceId::new(), dir.path());
        let mut handle = connector.full_sync(CancellationToken::new()).await.unwrap();

        let mut seen = Vec::new();
        while let Some(doc) = handle.items.recv().await {
            seen.push(doc.uri);
        }
        let complete = handle.events.recv().await;
        assert!(matches!(complete, Some(SyncEvent::Complete(_))));

        assert_eq!(seen.len(), 2);
        assert!(seen.iter().any(|u| u.ends_with("a.txt")));
        assert!(seen.iter().any(|u| u.ends_with("sub/b.md")));
    }

    #[tokio::test]
    async fn validate_rejects_missing_directory() {
        let connector = FilesystemConnector::new(SourceId::new(), "/nonexistent/path/xyz");
        assert!(connector.validate().await.is_err());
    }

    #[tokio::test]
    async fn incremental_sync_rejects_malformed_cursor() {
        let dir = tempfile::tempdir().unwrap();
        let connector = FilesystemConnector::new(SourceId::new(), dir.path());
        let result = connector
            .incremental_sync("not-a-number".to_string(), CancellationToken::new())
            .await;
        assert!(matches!(result, Err(ConnectorError::InvalidCursor)));
    }

    #[tokio::test]
    async fn operations_after_close_fail() {
        let dir = tempfile::tempdir().unwrap();
        let connector = FilesystemConnector::new(SourceId::new(), dir.path());
        connector.close().await.unwrap();
        assert!(matches!(
            connector.validate().await,
            Err(ConnectorError::ConnectorClosed)
        ));
    }

    #[test]
    fn guess_mime_uses_override_table() {
        assert_eq!(guess_mime(Path::new("a.md")), "text/markdown");
        assert_eq!(guess_mime(Path::new("a.unknownext")), "application/octet-stream");
    }
}
