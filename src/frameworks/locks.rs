//! The three process-wide file locks from §5/§6: `spads.lock` (one
//! instance per `instanceDir`), `unitsync.lock` (archive enumeration and
//! game launch are mutually exclusive), and `autoUpdate.lock` (at most one
//! instance in a shared directory runs periodic updates). `fs4` provides
//! the cross-platform advisory-lock primitive, matching the pack's own
//! choice for this kind of "one writer at a time" coordination.

use std::fs::File;
use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;

use fs4::tokio::AsyncFileExt;
use tokio::fs::File as TokioFile;
use tokio::io::{AsyncReadExt, AsyncWriteExt};

use crate::domain::AutohostError;

/// `spads.lock` + `spads.pid`: acquired non-blocking on startup; on
/// failure, read the PID from the lock file and exit `EXIT_CONFLICT`
/// (§5, §8 scenario 1).
pub struct InstanceLock {
    _file: TokioFile,
    lock_path: PathBuf,
    pid_path: PathBuf,
}

impl InstanceLock {
    pub async fn acquire(instance_dir: &Path) -> Result<Self, AutohostError> {
        tokio::fs::create_dir_all(instance_dir)
            .await
            .map_err(|e| AutohostError::System(format!("creating instance dir: {e}")))?;

        let lock_path = instance_dir.join("spads.lock");
        let pid_path = instance_dir.join("spads.pid");

        let file = tokio::fs::OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(false)
            .open(&lock_path)
            .await
            .map_err(|e| AutohostError::System(format!("opening {}: {e}", lock_path.display())))?;

        if file.try_lock_exclusive().is_err() {
            let pid = read_pid(&pid_path).await.unwrap_or(0);
            return Err(AutohostError::Conflict { pid });
        }

        let mut pid_file = tokio::fs::OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(&pid_path)
            .await
            .map_err(|e| AutohostError::System(format!("writing {}: {e}", pid_path.display())))?;
        pid_file
            .write_all(std::process::id().to_string().as_bytes())
            .await
            .map_err(|e| AutohostError::System(format!("writing pid: {e}")))?;

        Ok(Self { _file: file, lock_path, pid_path })
    }
}

impl Drop for InstanceLock {
    fn drop(&mut self) {
        let _ = std::fs::remove_file(&self.pid_path);
        let _ = std::fs::remove_file(&self.lock_path);
    }
}

async fn read_pid(path: &Path) -> Option<u32> {
    let mut file = TokioFile::open(path).await.ok()?;
    let mut contents = String::new();
    file.read_to_string(&mut contents).await.ok()?;
    contents.trim().parse().ok()
}

/// `unitsync.lock`: the exclusive gate for archive enumeration (§4.L) and
/// game launch (§4.J). Held non-blocking first; on contention, callers
/// queue a timed blocking acquisition per §4.J's 30s pre-launch wait.
pub struct ArchiveLock {
    path: PathBuf,
}

pub struct ArchiveLockGuard(#[allow(dead_code)] TokioFile);

impl ArchiveLock {
    pub fn new(instance_dir: &Path) -> Self {
        Self { path: instance_dir.join("unitsync.lock") }
    }

    pub async fn try_acquire(&self) -> io::Result<Option<ArchiveLockGuard>> {
        let file = tokio::fs::OpenOptions::new().create(true).write(true).open(&self.path).await?;
        if file.try_lock_exclusive().is_ok() {
            Ok(Some(ArchiveLockGuard(file)))
        } else {
            Ok(None)
        }
    }

    /// Blocking acquisition bounded by `timeout`, used by the pre-launch
    /// path when the non-blocking attempt finds the lock already held
    /// (§4.J: "enqueue a timed (30s) blocking request").
    pub async fn acquire_with_timeout(&self, timeout: Duration) -> Option<ArchiveLockGuard> {
        let path = self.path.clone();
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            if let Ok(Some(guard)) = self.try_acquire().await {
                return Some(guard);
            }
            if tokio::time::Instant::now() >= deadline {
                return None;
            }
            let _ = &path;
            tokio::time::sleep(Duration::from_millis(200)).await;
        }
    }
}

/// `autoUpdate.lock`: "at most one SPADS instance in a shared directory
/// performs periodic updates" (§5). Held for the duration of one update
/// check, non-blocking — a losing instance simply skips that cycle.
pub struct AutoUpdateLock {
    path: PathBuf,
}

impl AutoUpdateLock {
    pub fn new(shared_dir: &Path) -> Self {
        Self { path: shared_dir.join("autoUpdate.lock") }
    }

    pub async fn try_acquire(&self) -> io::Result<Option<File>> {
        let file = std::fs::OpenOptions::new().create(true).write(true).open(&self.path)?;
        match fs4::fs_std::FileExt::try_lock_exclusive(&file) {
            Ok(()) => Ok(Some(file)),
            Err(_) => Ok(None),
        }
    }
}

/// Encapsulates a chained auto-retry loop (§9's `tryWithBackoff` design
/// note) for operations like acquiring `autoUpdate.lock` that may be held
/// by a sibling instance only briefly.
pub async fn try_with_backoff<T, E>(
    mut op: impl FnMut() -> std::pin::Pin<Box<dyn std::future::Future<Output = Result<Option<T>, E>> + Send>>,
    max_tries: u32,
    delay: Duration,
) -> Result<Option<T>, E> {
    for attempt in 0..max_tries {
        if let Some(result) = op().await? {
            return Ok(Some(result));
        }
        if attempt + 1 < max_tries {
            tokio::time::sleep(delay).await;
        }
    }
    Ok(None)
}
