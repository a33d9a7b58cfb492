//! Spawns the game-engine process under the exclusive archive-cache lock
//! and classifies how it ends (§4.J "Launch sequence", "Crash detection").
//!
//! The engine binary and the unit-archive cache layout are external
//! collaborators (§1 non-goal); this module only owns the process
//! lifecycle (spawn, track PID, wait, classify exit).

use std::path::{Path, PathBuf};
use std::process::Stdio;

use tokio::process::{Child, Command};

use crate::domain::AutohostError;
use crate::frameworks::locks::{ArchiveLock, ArchiveLockGuard};
use crate::use_cases::launch::{classify_process_end, ProcessEndClass};

/// A spawned game process plus the archive-cache lock guard it was
/// launched under. The lock is held for the process's entire lifetime
/// (§3 invariant 5: "must be held whenever ... starting the game"); it is
/// never inherited by the child (§4.J "never inherit the lock FD").
pub struct RunningEngine {
    child: Child,
    _lock: ArchiveLockGuard,
    pub pid: Option<u32>,
}

impl RunningEngine {
    /// Writes the assembled start script to `instance_dir/startscript.txt`
    /// (§6 "Persisted state"), acquires `unitsync.lock` non-blocking (the
    /// pre-launch 30s timed wait, if the lock was already held, is the
    /// caller's responsibility via `ArchiveLock::acquire_with_timeout`),
    /// and spawns the engine with stdout/stderr appended to a log file.
    pub async fn spawn(
        engine_binary: &Path,
        instance_dir: &Path,
        script_body: &str,
        log_path: &Path,
        lock: ArchiveLockGuard,
    ) -> Result<Self, AutohostError> {
        let script_path = instance_dir.join("startscript.txt");
        tokio::fs::write(&script_path, script_body)
            .await
            .map_err(|e| AutohostError::System(format!("writing startscript.txt: {e}")))?;

        let log_file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(log_path)
            .map_err(|e| AutohostError::System(format!("opening {}: {e}", log_path.display())))?;
        let log_file_err = log_file
            .try_clone()
            .map_err(|e| AutohostError::System(format!("cloning log handle: {e}")))?;

        let mut command = Command::new(engine_binary);
        command
            .arg(&script_path)
            .current_dir(instance_dir)
            .stdin(Stdio::null())
            .stdout(Stdio::from(log_file))
            .stderr(Stdio::from(log_file_err));

        let child = command
            .spawn()
            .map_err(|e| AutohostError::System(format!("spawning engine process: {e}")))?;
        let pid = child.id();

        Ok(Self { child, _lock: lock, pid })
    }

    /// Blocks until the process exits, then classifies the end per §4.J.
    pub async fn wait(mut self) -> Result<ProcessEndClass, AutohostError> {
        let status = self
            .child
            .wait()
            .await
            .map_err(|e| AutohostError::System(format!("waiting for engine process: {e}")))?;

        #[cfg(unix)]
        {
            use std::os::unix::process::ExitStatusExt;
            let signaled = status.signal().is_some();
            let core_dumped = status.core_dumped();
            Ok(classify_process_end(status.code(), signaled, core_dumped))
        }
        #[cfg(not(unix))]
        {
            Ok(classify_process_end(status.code(), false, false))
        }
    }
}

/// Acquires `unitsync.lock`, trying non-blocking first and falling back
/// to the timed (30s) blocking wait the caller is expected to have
/// already broadcast "preparing to launch" for (§4.J).
pub async fn acquire_launch_lock(lock: &ArchiveLock) -> Option<ArchiveLockGuard> {
    if let Ok(Some(guard)) = lock.try_acquire().await {
        return Some(guard);
    }
    lock.acquire_with_timeout(std::time::Duration::from_secs(30)).await
}

pub fn default_log_path(instance_dir: &Path) -> PathBuf {
    instance_dir.join("engine.log")
}
