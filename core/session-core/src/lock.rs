//! Advisory file locking for session resources.
//!
//! Every session file has a sibling `<path>.lock`. A hook that wants to read or
//! mutate the session takes an exclusive `flock` on that file for exactly one
//! read-modify-write cycle.
//!
//! # Release Guarantees
//!
//! A [`LockGuard`] releases on [`LockGuard::release`] and again (idempotently)
//! on drop, so `?` propagation and panics unwind through the release. If the
//! holder process dies outright, the kernel drops the descriptor and the
//! `flock` with it: no lock can outlive its holder.
//!
//! # Degraded Mode
//!
//! When the filesystem has no `flock` support (some network mounts), the
//! manager hands back an unlocked guard and logs a warning. Timeouts are
//! governed by [`LockPolicy`].

use std::fs::{File, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};
use std::thread;
use std::time::{Duration, Instant};

use fs2::FileExt;

use crate::error::{Result, SessionError};
use crate::storage::lock_path_for;

pub const DEFAULT_LOCK_TIMEOUT: Duration = Duration::from_secs(5);

const INITIAL_BACKOFF: Duration = Duration::from_millis(2);
const MAX_BACKOFF: Duration = Duration::from_millis(50);

/// What to do when the lock cannot be taken within the timeout.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LockPolicy {
    /// Log a warning and continue without mutual exclusion.
    #[default]
    FailOpen,
    /// Return [`SessionError::LockTimeout`] to the caller.
    FailClosed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LockManager {
    timeout: Duration,
    policy: LockPolicy,
}

impl Default for LockManager {
    fn default() -> Self {
        LockManager::new(DEFAULT_LOCK_TIMEOUT, LockPolicy::default())
    }
}

impl LockManager {
    pub fn new(timeout: Duration, policy: LockPolicy) -> Self {
        LockManager { timeout, policy }
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub fn policy(&self) -> LockPolicy {
        self.policy
    }

    /// Takes the exclusive lock guarding `resource`, waiting up to the timeout.
    ///
    /// With [`LockPolicy::FailOpen`] a timeout yields an unlocked guard instead
    /// of an error.
    pub fn acquire(&self, resource: &Path) -> Result<LockGuard> {
        match self.try_acquire_within(resource, self.timeout) {
            Err(SessionError::LockTimeout { path, timeout })
                if self.policy == LockPolicy::FailOpen =>
            {
                tracing::warn!(
                    lock = %path.display(),
                    timeout_ms = timeout.as_millis() as u64,
                    "Lock timeout, continuing without mutual exclusion"
                );
                Ok(LockGuard::unlocked(path))
            }
            other => other,
        }
    }

    /// Takes the lock with an explicit timeout, ignoring the policy.
    ///
    /// A lock won on a file that has since been unlinked or replaced (by
    /// `clear`) guards nothing, so the open-and-lock cycle restarts on the
    /// file now at the path.
    pub fn try_acquire_within(&self, resource: &Path, timeout: Duration) -> Result<LockGuard> {
        let lock_path = lock_path_for(resource);
        if let Some(parent) = lock_path.parent() {
            fs_err::create_dir_all(parent)
                .map_err(|e| SessionError::io("Failed to create lock directory", e))?;
        }

        // No representable deadline means wait without one.
        let deadline = Instant::now().checked_add(timeout);
        let mut backoff = INITIAL_BACKOFF;

        loop {
            let file = open_lock_file(&lock_path)?;

            loop {
                match file.try_lock_exclusive() {
                    Ok(()) => break,
                    Err(err) if is_contended(&err) => {
                        let now = Instant::now();
                        let pause = match deadline {
                            Some(deadline) if now >= deadline => {
                                return Err(SessionError::LockTimeout {
                                    path: lock_path,
                                    timeout,
                                });
                            }
                            Some(deadline) => backoff.min(deadline - now),
                            None => backoff,
                        };
                        thread::sleep(pause);
                        backoff = (backoff * 2).min(MAX_BACKOFF);
                    }
                    Err(err) if is_unsupported(&err) => {
                        tracing::warn!(
                            lock = %lock_path.display(),
                            error = %err,
                            "File locking unavailable, continuing without mutual exclusion"
                        );
                        return Ok(LockGuard::unlocked(lock_path));
                    }
                    Err(err) => {
                        return Err(SessionError::io(
                            format!("Failed to lock {}", lock_path.display()),
                            err,
                        ));
                    }
                }
            }

            let current = is_current_lock_file(&file, &lock_path).map_err(|e| {
                SessionError::io(format!("Failed to stat lock {}", lock_path.display()), e)
            })?;
            if current {
                tracing::trace!(lock = %lock_path.display(), "Lock acquired");
                return Ok(LockGuard {
                    path: lock_path,
                    file: Some(file),
                });
            }
            tracing::debug!(
                lock = %lock_path.display(),
                "Lock file replaced while waiting, retrying"
            );
        }
    }

    /// Releases a guard. Equivalent to dropping it.
    pub fn release(&self, guard: LockGuard) {
        guard.release();
    }
}

/// A held (or deliberately degraded) lock on one resource.
#[derive(Debug)]
pub struct LockGuard {
    path: PathBuf,
    file: Option<File>,
}

impl LockGuard {
    fn unlocked(path: PathBuf) -> Self {
        LockGuard { path, file: None }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// True when the guard really holds the OS lock.
    pub fn is_held(&self) -> bool {
        self.file.is_some()
    }

    pub fn release(mut self) {
        self.unlock();
    }

    fn unlock(&mut self) {
        if let Some(file) = self.file.take() {
            if let Err(err) = FileExt::unlock(&file) {
                // Closing the descriptor below drops the flock regardless.
                tracing::debug!(
                    lock = %self.path.display(),
                    error = %err,
                    "Explicit unlock failed"
                );
            }
            tracing::trace!(lock = %self.path.display(), "Lock released");
        }
    }
}

impl Drop for LockGuard {
    fn drop(&mut self) {
        self.unlock();
    }
}

fn open_lock_file(lock_path: &Path) -> Result<File> {
    OpenOptions::new()
        .read(true)
        .write(true)
        .create(true)
        .truncate(false)
        .open(lock_path)
        .map_err(|e| SessionError::io(format!("Failed to open lock {}", lock_path.display()), e))
}

/// True while `file` is still the file at `lock_path` (same device and inode).
fn is_current_lock_file(file: &File, lock_path: &Path) -> io::Result<bool> {
    #[cfg(unix)]
    {
        use std::os::unix::fs::MetadataExt;

        let held = file.metadata()?;
        match fs_err::metadata(lock_path) {
            Ok(current) => Ok(held.dev() == current.dev() && held.ino() == current.ino()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e),
        }
    }
    #[cfg(not(unix))]
    {
        let _ = (file, lock_path);
        Ok(true)
    }
}

fn is_contended(err: &io::Error) -> bool {
    err.kind() == io::ErrorKind::WouldBlock
        || err.raw_os_error() == fs2::lock_contended_error().raw_os_error()
}

fn is_unsupported(err: &io::Error) -> bool {
    if err.kind() == io::ErrorKind::Unsupported {
        return true;
    }
    #[cfg(unix)]
    {
        matches!(
            err.raw_os_error(),
            Some(code) if code == libc::ENOLCK || code == libc::EOPNOTSUPP || code == libc::ENOSYS
        )
    }
    #[cfg(not(unix))]
    {
        false
    }
}
