//! Atomic file replacement
//!
//! Every artifact (ticket images, the issuance ledger) is written to a temp
//! file next to its destination and renamed over it. Readers either see the
//! old file or the new one, never a partial write.

use std::fs::{self, File};
use std::io::{self, ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::thread;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info, warn};
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum PersistError {
    #[error("Could not write {} after {attempts} attempt(s): {source}", path.display())]
    PersistenceWriteError {
        path: PathBuf,
        attempts: u32,
        #[source]
        source: io::Error,
    },
}

/// Bounded retry for transient lock errors (sync clients, virus scanners).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub attempts: u32,
    /// Sleep before retry `n` is `backoff * n`.
    pub backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            attempts: 5,
            backoff: Duration::from_millis(400),
        }
    }
}

impl RetryPolicy {
    pub fn immediate(attempts: u32) -> Self {
        Self {
            attempts,
            backoff: Duration::ZERO,
        }
    }
}

fn is_transient(err: &io::Error) -> bool {
    matches!(
        err.kind(),
        ErrorKind::PermissionDenied | ErrorKind::Interrupted | ErrorKind::WouldBlock
    )
}

fn temp_path_for(dest: &Path) -> PathBuf {
    let name = dest
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "artifact".to_string());
    let tmp_name = format!(".{}.{}.tmp", name, Uuid::new_v4().simple());
    match dest.parent() {
        Some(parent) => parent.join(tmp_name),
        None => PathBuf::from(tmp_name),
    }
}

/// Best effort: flush the directory entry so the rename survives a crash.
fn sync_parent(dest: &Path) {
    let Some(parent) = dest.parent().filter(|p| !p.as_os_str().is_empty()) else {
        return;
    };
    if let Err(e) = File::open(parent).and_then(|dir| dir.sync_all()) {
        debug!(dir = %parent.display(), error = %e, "directory sync skipped");
    }
}

fn attempt<F>(dest: &Path, write: &mut F) -> io::Result<()>
where
    F: FnMut(&mut File) -> io::Result<()>,
{
    let tmp = temp_path_for(dest);
    let result = (|| {
        let mut file = File::create(&tmp)?;
        write(&mut file)?;
        file.flush()?;
        file.sync_all()?;
        drop(file);
        fs::rename(&tmp, dest)?;
        sync_parent(dest);
        Ok(())
    })();

    if result.is_err() && tmp.exists() {
        if let Err(e) = fs::remove_file(&tmp) {
            warn!(tmp = %tmp.display(), error = %e, "could not remove temp file");
        }
    }
    result
}

/// Write `dest` through a temp file and rename, retrying transient errors.
///
/// `write` may be called once per attempt and must produce the full content
/// each time.
pub fn write_atomic<F>(dest: &Path, policy: &RetryPolicy, mut write: F) -> Result<(), PersistError>
where
    F: FnMut(&mut File) -> io::Result<()>,
{
    let attempts = policy.attempts.max(1);
    let fail = |n: u32, source: io::Error| PersistError::PersistenceWriteError {
        path: dest.to_path_buf(),
        attempts: n,
        source,
    };

    if let Some(parent) = dest.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent).map_err(|e| fail(0, e))?;
    }

    for n in 1..=attempts {
        match attempt(dest, &mut write) {
            Ok(()) => {
                info!(path = %dest.display(), "saved");
                return Ok(());
            }
            Err(e) if is_transient(&e) && n < attempts => {
                warn!(path = %dest.display(), attempt = n, attempts, error = %e, "transient write failure, retrying");
                thread::sleep(policy.backoff * n);
            }
            Err(e) => return Err(fail(n, e)),
        }
    }

    // attempts >= 1, so the loop always returns
    Err(fail(
        attempts,
        io::Error::new(ErrorKind::Other, "retry loop exhausted"),
    ))
}

pub fn write_atomic_bytes(dest: &Path, bytes: &[u8], policy: &RetryPolicy) -> Result<(), PersistError> {
    write_atomic(dest, policy, |file| file.write_all(bytes))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn leftovers(dir: &Path) -> Vec<String> {
        fs::read_dir(dir)
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .filter(|n| n.ends_with(".tmp"))
            .collect()
    }

    #[test]
    fn test_writes_new_file() {
        let dir = tempfile::tempdir().unwrap();
        let dest = dir.path().join("nested/out.bin");
        write_atomic_bytes(&dest, b"hello", &RetryPolicy::immediate(1)).unwrap();
        assert_eq!(fs::read(&dest).unwrap(), b"hello");
        assert!(leftovers(dest.parent().unwrap()).is_empty());
    }

    #[test]
    fn test_replace_is_visible_after_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let dest = dir.path().join("ledger.json");
        fs::write(&dest, b"old").unwrap();
        write_atomic_bytes(&dest, b"new", &RetryPolicy::immediate(1)).unwrap();

        sync_parent(&dest);
        sync_parent(Path::new("relative.json"));
        let names: Vec<_> = fs::read_dir(dir.path())
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names, ["ledger.json"]);
        assert_eq!(fs::read(&dest).unwrap(), b"new");
    }

    #[test]
    fn test_failure_mid_write_keeps_previous_content() {
        let dir = tempfile::tempdir().unwrap();
        let dest = dir.path().join("ticket.png");
        fs::write(&dest, b"previous ticket").unwrap();

        let err = write_atomic(&dest, &RetryPolicy::immediate(3), |file| {
            file.write_all(b"half")?;
            Err(io::Error::new(ErrorKind::Other, "disk full"))
        })
        .unwrap_err();

        let PersistError::PersistenceWriteError { attempts, .. } = err;
        assert_eq!(attempts, 1, "non-transient errors are not retried");
        assert_eq!(fs::read(&dest).unwrap(), b"previous ticket");
        assert!(leftovers(dir.path()).is_empty());
    }

    #[test]
    fn test_transient_errors_retried_then_succeed() {
        let dir = tempfile::tempdir().unwrap();
        let dest = dir.path().join("ledger.json");
        let mut calls = 0;
        write_atomic(&dest, &RetryPolicy::immediate(5), |file| {
            calls += 1;
            if calls < 3 {
                return Err(io::Error::new(ErrorKind::PermissionDenied, "locked"));
            }
            file.write_all(b"{}")
        })
        .unwrap();
        assert_eq!(calls, 3);
        assert_eq!(fs::read(&dest).unwrap(), b"{}");
    }

    #[test]
    fn test_transient_errors_exhaust_retries() {
        let dir = tempfile::tempdir().unwrap();
        let dest = dir.path().join("ledger.json");
        fs::write(&dest, b"old").unwrap();
        let err = write_atomic(&dest, &RetryPolicy::immediate(4), |_| {
            Err(io::Error::new(ErrorKind::PermissionDenied, "locked"))
        })
        .unwrap_err();
        let PersistError::PersistenceWriteError { attempts, .. } = err;
        assert_eq!(attempts, 4);
        assert_eq!(fs::read(&dest).unwrap(), b"old");
        assert!(leftovers(dir.path()).is_empty());
    }
}
