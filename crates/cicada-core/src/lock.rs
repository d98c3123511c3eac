//! Process-level repository exclusion.
//!
//! Only one process may hold a repo cache at a time. The lock is a file
//! under the repository metadata directory holding the holder's decimal
//! pid (at most 10 bytes). Acquisition reclaims locks left behind by dead
//! processes; a lock held by a live process fails with the holder's pid.
//!
//! The window between the liveness check and the lock write is racy and
//! accepted: repositories are driven by user interaction, not by
//! contending daemons.
//!
//! Release runs on every exit path: explicitly, on drop, and, for
//! abnormal termination, through [`release_all`], which a signal handler
//! can call to drain every lock the process still holds.

use std::fs::{self, OpenOptions};
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use tracing::info;

use crate::error::Error;

/// Name of the lock file under the metadata directory.
pub const LOCK_FILE_NAME: &str = "lock";

/// Maximum size of the lock file content in bytes.
pub const MAX_LOCK_CONTENT: usize = 10;

/// Locks currently held by this process, drained by [`release_all`].
static ACTIVE_LOCKS: Mutex<Vec<PathBuf>> = Mutex::new(Vec::new());

/// Errors from lock acquisition.
#[derive(Debug, thiserror::Error)]
pub enum LockError {
    /// Another live process holds the lock.
    #[error("repository locked by running process {pid}")]
    Held {
        /// Pid read from the lock file.
        pid: u32,
    },

    /// The lock file exists but its content is not a pid.
    #[error("lock file {} is malformed: {reason}", path.display())]
    Malformed { path: PathBuf, reason: String },

    /// Filesystem failure while locking.
    #[error(transparent)]
    Io(#[from] io::Error),
}

impl From<LockError> for Error {
    fn from(err: LockError) -> Self {
        match err {
            LockError::Held { pid } => Self::Locked { pid },
            LockError::Malformed { .. } => Self::CorruptStorage(err.to_string()),
            LockError::Io(e) => Self::Io(e),
        }
    }
}

/// An exclusive per-repository lock, released on drop.
#[derive(Debug)]
pub struct RepoLock {
    path: PathBuf,
    released: bool,
}

impl RepoLock {
    /// Acquire the lock for the repository metadata directory.
    ///
    /// A stale lock whose pid is not alive is removed (with a log line)
    /// and acquisition retries.
    ///
    /// # Errors
    ///
    /// [`LockError::Held`] when a live process holds the lock,
    /// [`LockError::Malformed`] when the lock file is unreadable as a pid.
    pub fn acquire(dir: &Path) -> Result<Self, LockError> {
        fs::create_dir_all(dir)?;
        let path = dir.join(LOCK_FILE_NAME);

        // Bounded retries: each loop either takes the lock or removes one
        // stale file. More than a few rounds means live contention.
        for _ in 0..4 {
            match OpenOptions::new().write(true).create_new(true).open(&path) {
                Ok(mut file) => {
                    let pid = std::process::id().to_string();
                    debug_assert!(pid.len() <= MAX_LOCK_CONTENT);
                    file.write_all(pid.as_bytes())?;
                    file.sync_all()?;

                    register(&path);
                    return Ok(Self {
                        path,
                        released: false,
                    });
                }
                Err(e) if e.kind() == io::ErrorKind::AlreadyExists => {
                    let Some(pid) = read_holder(&path)? else {
                        // The holder vanished between our open and read.
                        continue;
                    };

                    if is_process_alive(pid) {
                        return Err(LockError::Held { pid });
                    }

                    info!(pid, path = %path.display(), "removing stale lock of dead process");
                    match fs::remove_file(&path) {
                        Ok(()) => {}
                        Err(e) if e.kind() == io::ErrorKind::NotFound => {}
                        Err(e) => return Err(e.into()),
                    }
                }
                Err(e) => return Err(e.into()),
            }
        }

        // Somebody kept re-creating the lock under us.
        match read_holder(&path)? {
            Some(pid) => Err(LockError::Held { pid }),
            None => Err(io::Error::new(
                io::ErrorKind::WouldBlock,
                "lock file keeps reappearing",
            )
            .into()),
        }
    }

    /// The lock file path.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Explicitly release the lock. Release also happens automatically on
    /// drop.
    pub fn release(mut self) {
        self.release_inner();
    }

    fn release_inner(&mut self) {
        if self.released {
            return;
        }
        self.released = true;
        let _ = fs::remove_file(&self.path);
        deregister(&self.path);
    }
}

impl Drop for RepoLock {
    fn drop(&mut self) {
        self.release_inner();
    }
}

/// Delete every lock file this process still holds.
///
/// Meant for signal handlers and abnormal-exit hooks; ordinary code paths
/// release through [`RepoLock::release`] or drop.
pub fn release_all() {
    let mut locks = match ACTIVE_LOCKS.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    };
    for path in locks.drain(..) {
        let _ = fs::remove_file(path);
    }
}

fn register(path: &Path) {
    let mut locks = match ACTIVE_LOCKS.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    };
    locks.push(path.to_path_buf());
}

fn deregister(path: &Path) {
    let mut locks = match ACTIVE_LOCKS.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    };
    locks.retain(|p| p != path);
}

/// Read the holder pid, or `None` if the lock file vanished.
fn read_holder(path: &Path) -> Result<Option<u32>, LockError> {
    let mut file = match fs::File::open(path) {
        Ok(file) => file,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(e.into()),
    };

    // Read one byte past the limit so an oversized file is detectable.
    let mut content = Vec::with_capacity(MAX_LOCK_CONTENT + 1);
    file.take(MAX_LOCK_CONTENT as u64 + 1)
        .read_to_end(&mut content)?;
    if content.len() > MAX_LOCK_CONTENT {
        return Err(LockError::Malformed {
            path: path.to_path_buf(),
            reason: format!("content exceeds {MAX_LOCK_CONTENT} bytes"),
        });
    }

    let text = std::str::from_utf8(&content).map_err(|_| LockError::Malformed {
        path: path.to_path_buf(),
        reason: "content is not UTF-8".into(),
    })?;
    text.trim().parse().map(Some).map_err(|_| LockError::Malformed {
        path: path.to_path_buf(),
        reason: format!("'{}' is not a pid", text.trim()),
    })
}

/// Whether a process with the given pid is alive.
///
/// On Linux, `/proc/{pid}/stat` existence; zombies keep a `/proc` entry
/// but this is as close as it gets without a syscall.
#[cfg(target_os = "linux")]
fn is_process_alive(pid: u32) -> bool {
    Path::new(&format!("/proc/{pid}/stat")).exists()
}

/// On other Unix systems `/proc` may not exist; ask `kill -0`.
#[cfg(all(unix, not(target_os = "linux")))]
fn is_process_alive(pid: u32) -> bool {
    std::process::Command::new("kill")
        .args(["-0", &pid.to_string()])
        .output()
        .map(|o| o.status.success())
        .unwrap_or(true)
}

/// Elsewhere, assume the holder is alive; stale locks need manual
/// removal.
#[cfg(not(unix))]
fn is_process_alive(_pid: u32) -> bool {
    true
}
