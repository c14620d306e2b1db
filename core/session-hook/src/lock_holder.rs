//! Holds the session lock on purpose.
//!
//! Used to reproduce contention: while this process lives, every other hook
//! of the session waits on the lock (and times out). The kernel drops the
//! `flock` when the process dies, however it dies, which is exactly what the
//! integration tests check.
//!
//! ## Lifecycle
//!
//! 1. Acquire the session lock (fail closed: no lock, no holder)
//! 2. Print `locked` on stdout so the spawner knows the lock is taken
//! 3. Sleep until the hold time elapses or the watched PID exits

use std::io::Write;
use std::thread;
use std::time::{Duration, Instant};

use session_core::{HookConfig, LockPolicy, Result, SessionError};

const POLL_INTERVAL: Duration = Duration::from_millis(100);

pub fn run(config: &HookConfig, hold_secs: u64, watch_pid: Option<u32>) -> Result<i32> {
    let (key, _) = config.resolve_session_key();
    let session_file = config.storage.session_file(key);
    let guard = config
        .lock_manager(LockPolicy::FailClosed)
        .acquire(&session_file)?;

    tracing::info!(
        session = %key,
        lock = %guard.path().display(),
        hold_secs,
        watch_pid,
        "Lock holder acquired session lock"
    );

    let mut stdout = std::io::stdout().lock();
    writeln!(stdout, "locked")
        .and_then(|()| stdout.flush())
        .map_err(|source| SessionError::Io {
            context: "Failed to announce lock".to_string(),
            source,
        })?;
    drop(stdout);

    let deadline = Instant::now() + Duration::from_secs(hold_secs);
    while Instant::now() < deadline {
        if let Some(pid) = watch_pid {
            if !is_pid_alive(pid) {
                tracing::info!(pid, "Watched process exited, releasing lock");
                break;
            }
        }
        thread::sleep(POLL_INTERVAL);
    }

    guard.release();
    Ok(0)
}

fn is_pid_alive(pid: u32) -> bool {
    #[cfg(unix)]
    {
        // SAFETY: kill with signal 0 only checks that the process exists.
        unsafe {
            libc::kill(pid as i32, 0) == 0
        }
    }
    #[cfg(not(unix))]
    {
        let _ = pid;
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_own_process_is_alive() {
        assert!(is_pid_alive(std::process::id()));
    }

    #[test]
    fn test_reaped_child_is_not_alive() {
        let mut child = std::process::Command::new("true").spawn().unwrap();
        let pid = child.id();
        child.wait().unwrap();
        assert!(!is_pid_alive(pid));
    }
}
