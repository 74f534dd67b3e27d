use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::{Duration, SystemTime};

use async_trait::async_trait;
use tokio::io::AsyncWriteExt;

use mirra_common::error::{MirraError, MirraResult};

/// Get/set of a single opaque document.
#[async_trait]
pub trait BlobStore: Send + Sync {
    /// `None` when nothing has been stored yet.
    async fn get(&self) -> MirraResult<Option<Vec<u8>>>;

    /// Replace the document. Readers see either the old or the new bytes.
    async fn put(&self, bytes: &[u8]) -> MirraResult<()>;

    /// Exclusive hold on the document, shared with every other holder of the
    /// same store. Stores only reachable from one process need no more than
    /// the caller's own mutex.
    async fn lock(&self) -> MirraResult<BlobLock> {
        Ok(BlobLock { path: None })
    }
}

/// Held while a read-modify-write is in flight. The lock file goes on drop.
#[derive(Debug)]
pub struct BlobLock {
    path: Option<PathBuf>,
}

impl Drop for BlobLock {
    fn drop(&mut self) {
        if let Some(path) = self.path.take() {
            let _ = std::fs::remove_file(path);
        }
    }
}

/// A lock file older than this belongs to a writer that died mid-update.
const STALE_LOCK_AFTER: Duration = Duration::from_secs(30);
const LOCK_WAIT: Duration = Duration::from_secs(10);
const LOCK_POLL: Duration = Duration::from_millis(10);

/// A document kept in one file, replaced through a uniquely named sibling temp
/// file and rename. Writers in other processes are excluded by `<file>.lock`.
pub struct FileBlobStore {
    path: PathBuf,
}

impl FileBlobStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn lock_path(&self) -> PathBuf {
        let mut name = self
            .path
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_else(|| "sync-state.json".into());
        name.push(".lock");
        self.path.with_file_name(name)
    }

    fn dir(&self) -> &Path {
        self.path
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .unwrap_or_else(|| Path::new("."))
    }
}

async fn lock_is_stale(path: &Path) -> bool {
    let Ok(meta) = tokio::fs::metadata(path).await else {
        return false;
    };
    meta.modified()
        .ok()
        .and_then(|at| SystemTime::now().duration_since(at).ok())
        .is_some_and(|age| age > STALE_LOCK_AFTER)
}

fn write_replacing(dir: &Path, path: &Path, bytes: &[u8]) -> MirraResult<()> {
    let mut tmp = tempfile::NamedTempFile::new_in(dir).map_err(|e| {
        MirraError::Database(format!("failed to create temp file in {}: {e}", dir.display()))
    })?;
    tmp.write_all(bytes)
        .and_then(|()| tmp.as_file().sync_all())
        .map_err(|e| {
            MirraError::Database(format!("failed to write {}: {e}", tmp.path().display()))
        })?;
    tmp.persist(path).map_err(|e| {
        MirraError::Database(format!("failed to replace {}: {}", path.display(), e.error))
    })?;
    Ok(())
}

#[async_trait]
impl BlobStore for FileBlobStore {
    async fn get(&self) -> MirraResult<Option<Vec<u8>>> {
        match tokio::fs::read(&self.path).await {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(MirraError::Database(format!(
                "failed to read {}: {e}",
                self.path.display()
            ))),
        }
    }

    async fn put(&self, bytes: &[u8]) -> MirraResult<()> {
        let dir = self.dir().to_path_buf();
        tokio::fs::create_dir_all(&dir).await.map_err(|e| {
            MirraError::Database(format!("failed to create {}: {e}", dir.display()))
        })?;

        let path = self.path.clone();
        let bytes = bytes.to_vec();
        tokio::task::spawn_blocking(move || write_replacing(&dir, &path, &bytes))
            .await
            .map_err(|e| MirraError::Internal(format!("blob write task failed: {e}")))?
    }

    async fn lock(&self) -> MirraResult<BlobLock> {
        let dir = self.dir();
        tokio::fs::create_dir_all(dir).await.map_err(|e| {
            MirraError::Database(format!("failed to create {}: {e}", dir.display()))
        })?;

        let lock_path = self.lock_path();
        let deadline = tokio::time::Instant::now() + LOCK_WAIT;
        loop {
            let opened = tokio::fs::OpenOptions::new()
                .write(true)
                .create_new(true)
                .open(&lock_path)
                .await;
            match opened {
                Ok(mut file) => {
                    let _ = file.write_all(std::process::id().to_string().as_bytes()).await;
                    return Ok(BlobLock {
                        path: Some(lock_path),
                    });
                }
                Err(e) if e.kind() == ErrorKind::AlreadyExists => {
                    if lock_is_stale(&lock_path).await {
                        tracing::warn!(path = %lock_path.display(), "removing stale state lock");
                        let _ = tokio::fs::remove_file(&lock_path).await;
                        continue;
                    }
                    if tokio::time::Instant::now() >= deadline {
                        return Err(MirraError::Database(format!(
                            "timed out waiting for {}",
                            lock_path.display()
                        )));
                    }
                    tokio::time::sleep(LOCK_POLL).await;
                }
                Err(e) => {
                    return Err(MirraError::Database(format!(
                        "failed to create {}: {e}",
                        lock_path.display()
                    )))
                }
            }
        }
    }
}

/// Process-local store, for tests and single-process deployments without persistence.
#[derive(Default)]
pub struct MemoryBlobStore {
    bytes: Mutex<Option<Vec<u8>>>,
}

impl MemoryBlobStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_contents(bytes: impl Into<Vec<u8>>) -> Self {
        Self {
            bytes: Mutex::new(Some(bytes.into())),
        }
    }
}

#[async_trait]
impl BlobStore for MemoryBlobStore {
    async fn get(&self) -> MirraResult<Option<Vec<u8>>> {
        let guard = self
            .bytes
            .lock()
            .map_err(|_| MirraError::Internal("memory blob store poisoned".to_owned()))?;
        Ok(guard.clone())
    }

    async fn put(&self, bytes: &[u8]) -> MirraResult<()> {
        let mut guard = self
            .bytes
            .lock()
            .map_err(|_| MirraError::Internal("memory blob store poisoned".to_owned()))?;
        *guard = Some(bytes.to_vec());
        Ok(())
    }
}
