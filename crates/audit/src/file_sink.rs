use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;

use crate::model::AuditEvent;
use crate::traits::{AuditError, AuditSink, AuditStore};

/// Appends one JSON object per line to a file, fsyncing after every write
/// so a record is durable before `log` returns. Optionally mirrors each
/// event into a database store as well.
///
/// The file handle is a blocking `std::fs::File`; writes run on a blocking
/// thread via `spawn_blocking` so fsync never stalls the async runtime.
pub struct FileAuditSink {
    path: PathBuf,
    file: Arc<Mutex<std::fs::File>>,
    store: Option<Arc<dyn AuditStore>>,
    closed: std::sync::atomic::AtomicBool,
}

impl FileAuditSink {
    pub fn open(path: impl AsRef<Path>) -> std::io::Result<Self> {
        let path = path.as_ref().to_path_buf();
        let file = OpenOptions::new().create(true).append(true).open(&path)?;
        Ok(Self {
            path,
            file: Arc::new(Mutex::new(file)),
            store: None,
            closed: std::sync::atomic::AtomicBool::new(false),
        })
    }

    pub fn with_store(mut self, store: Arc<dyn AuditStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl AuditSink for FileAuditSink {
    async fn log(&self, event: AuditEvent) -> Result<(), AuditError> {
        let line = serde_json::to_string(&event).map_err(|e| AuditError::Io(e.to_string()))?;
        let file = self.file.clone();
        tokio::task::spawn_blocking(move || {
            let mut file = file.lock();
            writeln!(file, "{line}")?;
            file.sync_data()
        })
        .await
        .map_err(|e| AuditError::Io(e.to_string()))?
        .map_err(|e| AuditError::Io(e.to_string()))?;

        if let Some(store) = &self.store {
            store.store_audit_event(&event).await?;
        }
        Ok(())
    }

    async fn close(&self) -> Result<(), AuditError> {
        // Idempotent: the underlying file is closed when dropped; this just
        // marks the sink so a caller can check whether it already ran.
        self.closed.store(true, std::sync::atomic::Ordering::Release);
        Ok(())
    }
}
