//! Append-only update record log.
//!
//! Every vendor worker appends through a cloned [`UpdateLog`] handle. Appends
//! go over an `mpsc` queue to one writer task, which keeps the JSONL file and
//! an in-memory window of the most recent records in append order. The file
//! is the full history.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use tokio::io::AsyncWriteExt;
use tokio::sync::{mpsc, oneshot};
use tracing::warn;
use uuid::Uuid;

use crate::error::Result;
use crate::registry::Digest;

/// Records kept in memory; older ones are only in the file.
pub const RECENT_RECORDS: usize = 256;

/// What happened to an available update.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum UpdateOutcome {
    Applied,
    RolledBack { reason: String },
    Failed { reason: String },
}

impl UpdateOutcome {
    pub fn label(&self) -> &'static str {
        match self {
            UpdateOutcome::Applied => "applied",
            UpdateOutcome::RolledBack { .. } => "rolled_back",
            UpdateOutcome::Failed { .. } => "failed",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpdateRecord {
    pub id: Uuid,
    pub stack: String,
    pub vendor: String,
    pub previous_digest: Option<Digest>,
    pub new_digest: Option<Digest>,
    pub timestamp: DateTime<Utc>,
    pub outcome: UpdateOutcome,
    pub notification_sent: bool,
}

impl UpdateRecord {
    pub fn new(
        stack: &str,
        vendor: &str,
        previous_digest: Option<Digest>,
        new_digest: Option<Digest>,
        outcome: UpdateOutcome,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            stack: stack.to_string(),
            vendor: vendor.to_string(),
            previous_digest,
            new_digest,
            timestamp: Utc::now(),
            outcome,
            notification_sent: false,
        }
    }
}

enum Command {
    Append(Box<UpdateRecord>),
    Flush(oneshot::Sender<()>),
}

/// Cloneable handle to the single log writer.
///
/// # Example
///
/// ```
/// use bandstack::watcher::{UpdateLog, UpdateOutcome, UpdateRecord};
///
/// # tokio_test::block_on(async {
/// let log = UpdateLog::in_memory();
/// log.append(UpdateRecord::new("home", "earnapp", None, None, UpdateOutcome::Applied));
/// log.flush().await;
/// assert_eq!(log.records().len(), 1);
/// # });
/// ```
#[derive(Clone)]
pub struct UpdateLog {
    tx: mpsc::UnboundedSender<Command>,
    records: Arc<Mutex<VecDeque<UpdateRecord>>>,
}

impl UpdateLog {
    /// Start the writer. With `path`, records are also appended to that file.
    /// Must be called inside a Tokio runtime.
    pub fn open(path: Option<PathBuf>) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        let records = Arc::new(Mutex::new(VecDeque::with_capacity(RECENT_RECORDS)));
        tokio::spawn(writer(path, rx, records.clone()));
        Self { tx, records }
    }

    pub fn in_memory() -> Self {
        Self::open(None)
    }

    pub fn append(&self, record: UpdateRecord) {
        if self.tx.send(Command::Append(Box::new(record))).is_err() {
            warn!("Update log writer has stopped; record dropped");
        }
    }

    /// Wait until everything appended so far has been written.
    pub async fn flush(&self) {
        let (done_tx, done_rx) = oneshot::channel();
        if self.tx.send(Command::Flush(done_tx)).is_ok() {
            let _ = done_rx.await;
        }
    }

    /// The most recent records written by this handle's writer, oldest first.
    pub fn records(&self) -> Vec<UpdateRecord> {
        self.records
            .lock()
            .map(|r| r.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Read a JSONL log. Unparseable lines are skipped.
    pub fn load(path: &Path) -> Result<Vec<UpdateRecord>> {
        let content = match std::fs::read_to_string(path) {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };
        let mut out = Vec::new();
        for (n, line) in content.lines().enumerate() {
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str(line) {
                Ok(record) => out.push(record),
                Err(e) => warn!(path = %path.display(), line = n + 1, error = %e, "Skipping bad update record"),
            }
        }
        Ok(out)
    }
}

async fn writer(
    path: Option<PathBuf>,
    mut rx: mpsc::UnboundedReceiver<Command>,
    records: Arc<Mutex<VecDeque<UpdateRecord>>>,
) {
    let mut file = None;
    if let Some(path) = &path {
        if let Some(parent) = path.parent() {
            if let Err(e) = tokio::fs::create_dir_all(parent).await {
                warn!(path = %parent.display(), error = %e, "Cannot create update log directory");
            }
        }
        match tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .await
        {
            Ok(f) => file = Some(f),
            Err(e) => warn!(path = %path.display(), error = %e, "Cannot open update log; keeping records in memory only"),
        }
    }

    while let Some(cmd) = rx.recv().await {
        match cmd {
            Command::Append(record) => {
                if let Some(f) = file.as_mut() {
                    match serde_json::to_string(&*record) {
                        Ok(mut line) => {
                            line.push('\n');
                            if let Err(e) = f.write_all(line.as_bytes()).await {
                                warn!(error = %e, "Update log write failed");
                            }
                        }
                        Err(e) => warn!(error = %e, "Update record not serializable"),
                    }
                }
                if let Ok(mut r) = records.lock() {
                    if r.len() == RECENT_RECORDS {
                        r.pop_front();
                    }
                    r.push_back(*record);
                }
            }
            Command::Flush(done) => {
                if let Some(f) = file.as_mut() {
                    let _ = f.flush().await;
                }
                let _ = done.send(());
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn digest(c: char) -> Digest {
        Digest::parse(&format!("sha256:{}", c.to_string().repeat(64))).unwrap()
    }

    #[tokio::test]
    async fn test_concurrent_appends_all_land() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("logs").join("updates.jsonl");
        let log = UpdateLog::open(Some(path.clone()));

        let mut handles = Vec::new();
        for i in 0..20 {
            let log = log.clone();
            handles.push(tokio::spawn(async move {
                log.append(UpdateRecord::new(
                    "home",
                    &format!("vendor{}", i),
                    Some(digest('a')),
                    Some(digest('b')),
                    UpdateOutcome::Applied,
                ));
            }));
        }
        for h in handles {
            h.await.unwrap();
        }
        log.flush().await;

        assert_eq!(log.records().len(), 20);
        let loaded = UpdateLog::load(&path).unwrap();
        assert_eq!(loaded.len(), 20);
        assert_eq!(loaded, log.records());
    }

    #[tokio::test]
    async fn test_outcome_serialization() {
        let record = UpdateRecord::new(
            "home",
            "earnapp",
            Some(digest('a')),
            Some(digest('b')),
            UpdateOutcome::RolledBack {
                reason: "exited".into(),
            },
        );
        let json = serde_json::to_value(&record).unwrap();
        assert_eq!(json["outcome"]["kind"], "rolled_back");
        assert_eq!(json["outcome"]["reason"], "exited");
        assert_eq!(json["notification_sent"], false);
        assert_eq!(record.outcome.label(), "rolled_back");
    }

    #[tokio::test]
    async fn test_memory_window_is_bounded_but_file_keeps_all() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("updates.jsonl");
        let log = UpdateLog::open(Some(path.clone()));
        let total = RECENT_RECORDS + 10;
        for i in 0..total {
            log.append(UpdateRecord::new(
                "home",
                &format!("v{}", i),
                None,
                Some(digest('a')),
                UpdateOutcome::Applied,
            ));
        }
        log.flush().await;

        let recent = log.records();
        assert_eq!(recent.len(), RECENT_RECORDS);
        assert_eq!(recent[0].vendor, "v10");
        assert_eq!(recent[RECENT_RECORDS - 1].vendor, format!("v{}", total - 1));
        assert_eq!(UpdateLog::load(&path).unwrap().len(), total);
    }

    #[test]
    fn test_load_missing_file_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        assert!(UpdateLog::load(&dir.path().join("none.jsonl"))
            .unwrap()
            .is_empty());
    }

    #[test]
    fn test_load_skips_garbage_lines() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("updates.jsonl");
        let good = UpdateRecord::new("home", "a", None, Some(digest('c')), UpdateOutcome::Applied);
        std::fs::write(
            &path,
            format!("{}\nnot json\n\n", serde_json::to_string(&good).unwrap()),
        )
        .unwrap();
        assert_eq!(UpdateLog::load(&path).unwrap(), vec![good]);
    }

    #[tokio::test]
    async fn test_in_memory_log() {
        let log = UpdateLog::in_memory();
        log.append(UpdateRecord::new(
            "home",
            "a",
            None,
            None,
            UpdateOutcome::Failed {
                reason: "pull".into(),
            },
        ));
        log.flush().await;
        assert_eq!(log.records()[0].vendor, "a");
    }
}
