//! Ingest sources for the scheduler trigger.
//!
//! `SpoolIngestSource` watches an inbox directory. Each `*.txt` file holds one
//! raw reference per line (blank lines and `#` comments are skipped). Files
//! read for a window are renamed to `*.done` once the window is acknowledged,
//! so a crash between discover and acknowledge re-reads them and the dedup
//! key absorbs the repeat.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio::sync::Mutex;

use crate::app::scheduler::RunWindow;
use crate::ports::{IngestError, IngestSource};

pub struct SpoolIngestSource {
    inbox: PathBuf,
    /// Files handed out by the latest discover, keyed by its window. A newer
    /// discover replaces an unacknowledged list.
    pending: Mutex<Option<(String, Vec<PathBuf>)>>,
}

impl SpoolIngestSource {
    pub fn new(inbox: impl Into<PathBuf>) -> Self {
        Self {
            inbox: inbox.into(),
            pending: Mutex::new(None),
        }
    }

    pub fn inbox(&self) -> &Path {
        &self.inbox
    }

    async fn spool_files(&self) -> Result<Vec<PathBuf>, IngestError> {
        let mut files = Vec::new();
        let mut entries = match tokio::fs::read_dir(&self.inbox).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::debug!(inbox = %self.inbox.display(), "inbox does not exist yet");
                return Ok(files);
            }
            Err(e) => return Err(e.into()),
        };
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.extension().is_some_and(|ext| ext == "txt") && entry.file_type().await?.is_file()
            {
                files.push(path);
            }
        }
        files.sort();
        Ok(files)
    }
}

fn parse_references(content: &str) -> impl Iterator<Item = String> + '_ {
    content
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .map(str::to_string)
}

#[async_trait]
impl IngestSource for SpoolIngestSource {
    async fn discover(&self, window: &RunWindow) -> Result<Vec<String>, IngestError> {
        let files = self.spool_files().await?;
        let mut refs = Vec::new();
        for path in &files {
            let content = tokio::fs::read_to_string(path).await?;
            refs.extend(parse_references(&content));
        }

        tracing::debug!(
            inbox = %self.inbox.display(),
            files = files.len(),
            refs = refs.len(),
            window = %window,
            "spool scanned"
        );
        *self.pending.lock().await = Some((window.key(), files));
        Ok(refs)
    }

    async fn acknowledge(&self, window: &RunWindow) -> Result<(), IngestError> {
        let files = {
            let mut pending = self.pending.lock().await;
            match pending.take() {
                Some((key, files)) if key == window.key() => files,
                other => {
                    *pending = other;
                    return Ok(());
                }
            }
        };
        for path in files {
            let done = path.with_extension("done");
            tokio::fs::rename(&path, &done).await?;
        }
        Ok(())
    }
}

/// Fixed reference list, returned on every discover.
#[derive(Debug, Clone, Default)]
pub struct StaticIngestSource {
    refs: Vec<String>,
}

impl StaticIngestSource {
    pub fn new<I, S>(refs: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            refs: refs.into_iter().map(Into::into).collect(),
        }
    }
}

#[async_trait]
impl IngestSource for StaticIngestSource {
    async fn discover(&self, _window: &RunWindow) -> Result<Vec<String>, IngestError> {
        Ok(self.refs.clone())
    }
}
