//! CSV-backed topic queue and its append-only ledgers.
//!
//! The queue is a plain text file, one entry per line, oldest first.
//! Producers append at the tail; the single consumer reads the head and only
//! removes it once the entry is either archived or quarantined.
//!
//! # Files
//!
//! ```text
//! topics_dir/
//! ├── new_topics.csv                 # the queue
//! ├── archived_topics.csv            # url, title, description
//! ├── archived_affiliate_topics.csv  # url, affiliate id, source url
//! └── error_topics.csv               # raw quarantined lines
//! ```
//!
//! # Head retirement
//!
//! Removing the head always goes through [`TopicQueue::retire_head`]: the
//! remaining lines are written to a sibling temp file, the ledger lines are
//! appended, and the temp file is renamed over the queue. If any step fails
//! the ledgers are truncated back to their previous length and the queue file
//! is left untouched, so a line is never both kept and logged, nor lost.
//!
//! There is no locking: running two consumers against the same files is not
//! supported.

use crate::models::{ParsedLine, TopicEntry};
use crate::utils::{quote_all, split_fields};
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info, instrument, warn};

/// Errors raised by queue and ledger operations.
#[derive(Debug, Error)]
pub enum QueueError {
    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("queue is empty")]
    Empty,

    /// Queue entries are single lines; a field with a line break would be
    /// read back as separate malformed lines.
    #[error("field {0:?} contains a line break")]
    MultilineField(String),

    /// The caller tried to retire a line that is not the current head.
    #[error("line {expected:?} is not the queue head (head is {found:?})")]
    HeadMismatch { expected: String, found: String },
}

fn io_err(path: &Path) -> impl FnOnce(std::io::Error) -> QueueError + '_ {
    move |source| QueueError::Io {
        path: path.to_path_buf(),
        source,
    }
}

/// Create `path` as an empty file if it does not exist yet.
async fn touch(path: &Path) -> Result<(), QueueError> {
    if fs::try_exists(path).await.map_err(io_err(path))? {
        debug!(path = %path.display(), "File already exists");
        return Ok(());
    }
    fs::write(path, b"").await.map_err(io_err(path))?;
    info!(path = %path.display(), "Created empty file");
    Ok(())
}

/// Read `path` as lines, treating a missing file as empty.
async fn read_lines(path: &Path) -> Result<Vec<String>, QueueError> {
    match fs::read_to_string(path).await {
        Ok(content) => Ok(content.lines().map(str::to_string).collect()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Vec::new()),
        Err(e) => Err(io_err(path)(e)),
    }
}

/// An append-only log file (archive or quarantine).
#[derive(Debug, Clone)]
pub struct Ledger {
    path: PathBuf,
}

impl Ledger {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub async fn init(&self) -> Result<(), QueueError> {
        touch(&self.path).await
    }

    /// All lines currently in the log.
    pub async fn lines(&self) -> Result<Vec<String>, QueueError> {
        read_lines(&self.path).await
    }

    /// Append one line verbatim.
    pub async fn append_line(&self, line: &str) -> Result<(), QueueError> {
        let mut file = fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await
            .map_err(io_err(&self.path))?;
        let mut buf = String::with_capacity(line.len() + 1);
        buf.push_str(line);
        buf.push('\n');
        file.write_all(buf.as_bytes()).await.map_err(io_err(&self.path))?;
        file.flush().await.map_err(io_err(&self.path))?;
        Ok(())
    }

    async fn len(&self) -> Result<u64, QueueError> {
        match fs::metadata(&self.path).await {
            Ok(meta) => Ok(meta.len()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(0),
            Err(e) => Err(io_err(&self.path)(e)),
        }
    }

    async fn truncate(&self, len: u64) -> Result<(), QueueError> {
        let file = fs::OpenOptions::new()
            .write(true)
            .open(&self.path)
            .await
            .map_err(io_err(&self.path))?;
        file.set_len(len).await.map_err(io_err(&self.path))
    }
}

/// The FIFO of pending topic lines.
#[derive(Debug, Clone)]
pub struct TopicQueue {
    path: PathBuf,
}

impl TopicQueue {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub async fn init(&self) -> Result<(), QueueError> {
        touch(&self.path).await
    }

    /// All pending lines, head first.
    pub async fn lines(&self) -> Result<Vec<String>, QueueError> {
        read_lines(&self.path).await
    }

    /// The first pending line, without removing it. `None` when the queue is empty.
    #[instrument(level = "debug", skip_all, fields(path = %self.path.display()))]
    pub async fn peek_head(&self) -> Result<Option<String>, QueueError> {
        Ok(self.lines().await?.into_iter().next())
    }

    /// Classify a raw line: one field is an affiliate id, two fields are a
    /// title and description, anything else is malformed.
    pub fn parse_line(raw: &str) -> ParsedLine {
        let Some(mut fields) = split_fields(raw) else {
            return ParsedLine::Malformed { field_count: None };
        };
        match fields.len() {
            1 => ParsedLine::Valid(TopicEntry::Affiliate {
                item_id: fields.remove(0),
            }),
            2 => {
                let description = fields.remove(1);
                let title = fields.remove(0);
                ParsedLine::Valid(TopicEntry::Article { title, description })
            }
            n => ParsedLine::Malformed {
                field_count: Some(n),
            },
        }
    }

    /// Append rows at the tail, quoting every field.
    ///
    /// Every row becomes exactly one line. Rows are checked before anything is
    /// written, so a field containing `\n` or `\r` rejects the whole batch.
    #[instrument(level = "info", skip_all, fields(path = %self.path.display(), rows = rows.len()))]
    pub async fn append(&self, rows: &[Vec<String>]) -> Result<(), QueueError> {
        if let Some(field) = rows.iter().flatten().find(|f| f.contains(['\n', '\r'])) {
            return Err(QueueError::MultilineField(field.clone()));
        }
        if rows.is_empty() {
            return Ok(());
        }
        let tail = Ledger::new(&self.path);
        for row in rows {
            tail.append_line(&quote_all(row)).await?;
        }
        info!("Appended entries to queue");
        Ok(())
    }

    /// Remove the head line and return it.
    #[instrument(level = "info", skip_all, fields(path = %self.path.display()))]
    pub async fn dequeue_head(&self) -> Result<String, QueueError> {
        let head = self.peek_head().await?.ok_or(QueueError::Empty)?;
        self.retire_head(&head, &[]).await?;
        Ok(head)
    }

    /// Move `raw` (which must be the current head) into the quarantine log.
    ///
    /// After success the line is present once more in `log` and gone from the
    /// queue; after failure neither file changed.
    #[instrument(level = "info", skip_all, fields(path = %self.path.display(), %reason))]
    pub async fn quarantine(
        &self,
        raw: &str,
        reason: &str,
        log: &Ledger,
    ) -> Result<(), QueueError> {
        self.retire_head(raw, &[(log, raw.to_string())]).await?;
        warn!(line = %raw, "Quarantined queue entry");
        Ok(())
    }

    /// Record `raw` (the current head) as done by appending `records` to their
    /// ledgers, then drop it from the queue.
    #[instrument(level = "info", skip_all, fields(path = %self.path.display()))]
    pub async fn archive(
        &self,
        raw: &str,
        records: &[(&Ledger, [&str; 3])],
    ) -> Result<(), QueueError> {
        let lines: Vec<(&Ledger, String)> = records
            .iter()
            .map(|(ledger, fields)| (*ledger, quote_all(fields)))
            .collect();
        self.retire_head(raw, &lines).await?;
        info!(line = %raw, "Archived queue entry");
        Ok(())
    }

    fn temp_path(&self) -> PathBuf {
        let mut name: OsString = self.path.as_os_str().to_owned();
        name.push(".tmp");
        PathBuf::from(name)
    }

    /// Remove the head line, appending `entries` to their ledgers, all or nothing.
    async fn retire_head(
        &self,
        raw: &str,
        entries: &[(&Ledger, String)],
    ) -> Result<(), QueueError> {
        let lines = self.lines().await?;
        let Some(head) = lines.first() else {
            return Err(QueueError::Empty);
        };
        if head.trim_end_matches('\r') != raw.trim_end_matches('\r') {
            return Err(QueueError::HeadMismatch {
                expected: raw.to_string(),
                found: head.clone(),
            });
        }

        let mut rest = lines[1..].join("\n");
        if !rest.is_empty() {
            rest.push('\n');
        }
        let temp = self.temp_path();
        fs::write(&temp, rest).await.map_err(io_err(&temp))?;

        let mut appended: Vec<(&Ledger, u64)> = Vec::with_capacity(entries.len());
        for (ledger, line) in entries {
            let outcome = match ledger.len().await {
                Ok(before) => ledger.append_line(line).await.map(|_| before),
                Err(e) => Err(e),
            };
            match outcome {
                Ok(before) => appended.push((*ledger, before)),
                Err(e) => {
                    rollback(&appended, &temp).await;
                    return Err(e);
                }
            }
        }

        if let Err(e) = fs::rename(&temp, &self.path).await {
            rollback(&appended, &temp).await;
            return Err(io_err(&self.path)(e));
        }
        debug!(remaining = lines.len() - 1, "Queue head removed");
        Ok(())
    }
}

async fn rollback(appended: &[(&Ledger, u64)], temp: &Path) {
    for (ledger, len) in appended {
        if let Err(e) = ledger.truncate(*len).await {
            warn!(path = %ledger.path().display(), error = %e, "Failed to roll back ledger append");
        }
    }
    let _ = fs::remove_file(temp).await;
}
