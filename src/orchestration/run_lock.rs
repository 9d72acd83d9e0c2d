//! Single-instance guard for reconciliation runs
//!
//! The lock is a file created with `create_new`, holding the owner's pid,
//! start time and a random token. It is removed when the guard is dropped,
//! provided the file still carries our token. A lock older than the staleness
//! window is assumed to belong to a crashed process and taken over.
//!
//! Takeover renames the stale file aside instead of deleting it in place, so
//! that of two processes racing for the same stale lock only the one that
//! actually moved the stale content proceeds. The other one finds a live lock
//! in its grave file, puts it back and gives up.

use crate::core::error::MirrorError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs::{self, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};
use tracing::{debug, warn};

/// Contents of the lock file
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LockInfo {
    /// Process id of the holder
    pub pid: u32,
    /// When the holder acquired the lock; staleness is measured from here
    pub started_at: DateTime<Utc>,
    /// Random per-acquisition value identifying the holder
    #[serde(default)]
    pub token: String,
}

impl LockInfo {
    fn current() -> Self {
        Self {
            pid: std::process::id(),
            started_at: Utc::now(),
            token: uuid::Uuid::new_v4().simple().to_string(),
        }
    }
}

/// What was found in an existing lock file
struct Observed {
    raw: Option<String>,
    holder: Option<LockInfo>,
    age: Duration,
}

impl Observed {
    fn in_progress(self) -> MirrorError {
        MirrorError::RunInProgress {
            pid: self.holder.as_ref().map(|h| h.pid).unwrap_or_default(),
            since: self
                .holder
                .map(|h| h.started_at.to_rfc3339())
                .unwrap_or_else(|| "an unknown time".to_string()),
        }
    }
}

/// Held for the duration of one run
#[derive(Debug)]
pub struct RunLock {
    path: PathBuf,
    info: LockInfo,
}

impl RunLock {
    /// Create the lock file, taking over a lock older than `stale_after`.
    ///
    /// Fails with [`MirrorError::RunInProgress`] while another holder's lock
    /// is fresh.
    pub fn acquire(path: &Path, stale_after: Duration) -> Result<Self, MirrorError> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }

        let info = LockInfo::current();
        let json =
            serde_json::to_string(&info).map_err(|e| MirrorError::ConfigError(e.to_string()))?;

        // second attempt only after moving a stale lock aside
        for _ in 0..2 {
            match OpenOptions::new().write(true).create_new(true).open(path) {
                Ok(mut file) => {
                    file.write_all(json.as_bytes())?;
                    drop(file);

                    let observed = Self::inspect(path);
                    if observed.holder.as_ref().map(|h| h.token.as_str())
                        != Some(info.token.as_str())
                    {
                        return Err(observed.in_progress());
                    }

                    debug!(path = %path.display(), pid = info.pid, "run lock acquired");
                    return Ok(Self {
                        path: path.to_path_buf(),
                        info,
                    });
                }
                Err(e) if e.kind() == io::ErrorKind::AlreadyExists => {
                    let observed = Self::inspect(path);
                    if observed.age < stale_after {
                        return Err(observed.in_progress());
                    }
                    warn!(
                        path = %path.display(),
                        age_secs = observed.age.as_secs(),
                        "taking over stale run lock"
                    );
                    Self::take_over(path, &observed)?;
                }
                Err(e) => return Err(e.into()),
            }
        }

        Err(Self::inspect(path).in_progress())
    }

    /// Move the stale lock out of the way.
    ///
    /// If the file moved aside is not the one `stale` describes, another
    /// process got there first and now holds a fresh lock; it is restored.
    fn take_over(path: &Path, stale: &Observed) -> Result<(), MirrorError> {
        let grave = path.with_extension(format!("stale-{}", uuid::Uuid::new_v4().simple()));

        match fs::rename(path, &grave) {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(()),
            Err(e) => return Err(e.into()),
        }

        let moved = fs::read_to_string(&grave).ok();
        if moved != stale.raw {
            match fs::hard_link(&grave, path) {
                Ok(()) => {}
                Err(e) if e.kind() == io::ErrorKind::AlreadyExists => {}
                Err(e) => {
                    let _ = fs::remove_file(&grave);
                    return Err(e.into());
                }
            }
            let _ = fs::remove_file(&grave);
            return Err(Self::inspect(path).in_progress());
        }

        fs::remove_file(&grave)?;
        Ok(())
    }

    /// Current holder (if the file parses) and the lock's age
    fn inspect(path: &Path) -> Observed {
        let raw = fs::read_to_string(path).ok();
        let holder = raw
            .as_deref()
            .and_then(|content| serde_json::from_str::<LockInfo>(content).ok());

        let age = match &holder {
            Some(info) => (Utc::now() - info.started_at).to_std().unwrap_or_default(),
            None => fs::metadata(path)
                .and_then(|m| m.modified())
                .ok()
                .and_then(|modified| SystemTime::now().duration_since(modified).ok())
                .unwrap_or_default(),
        };

        Observed { raw, holder, age }
    }
}

impl Drop for RunLock {
    fn drop(&mut self) {
        let ours = Self::inspect(&self.path)
            .holder
            .is_some_and(|holder| holder.token == self.info.token);
        if !ours {
            warn!(path = %self.path.display(), "run lock was taken over, leaving it in place");
            return;
        }
        if let Err(e) = fs::remove_file(&self.path) {
            warn!(path = %self.path.display(), error = %e, "failed to release run lock");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    const STALE: Duration = Duration::from_secs(23 * 3600);

    fn lock_files(dir: &Path) -> Vec<String> {
        let mut names: Vec<String> = fs::read_dir(dir)
            .unwrap()
            .map(|entry| entry.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        names.sort();
        names
    }

    fn foreign(hours_ago: i64) -> LockInfo {
        LockInfo {
            pid: 999_999,
            started_at: Utc::now() - chrono::Duration::hours(hours_ago),
            token: "foreign".to_string(),
        }
    }

    #[test]
    fn test_second_acquire_fails_while_held() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("mirror.lock");

        let lock = RunLock::acquire(&path, STALE).unwrap();
        assert_eq!(lock.info.pid, std::process::id());
        assert_eq!(lock.info.token.len(), 32);

        match RunLock::acquire(&path, STALE) {
            Err(MirrorError::RunInProgress { pid, .. }) => assert_eq!(pid, std::process::id()),
            other => panic!("expected RunInProgress, got {:?}", other),
        }

        drop(lock);
        assert!(!path.exists());
        assert!(RunLock::acquire(&path, STALE).is_ok());
    }

    #[test]
    fn test_stale_lock_is_taken_over() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("mirror.lock");
        fs::write(&path, serde_json::to_string(&foreign(30)).unwrap()).unwrap();

        let lock = RunLock::acquire(&path, STALE).unwrap();
        assert_eq!(lock.info.pid, std::process::id());

        let on_disk: LockInfo =
            serde_json::from_str(&fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(on_disk, lock.info);
        assert_eq!(lock_files(temp.path()), vec!["mirror.lock"]);
    }

    #[test]
    fn test_lock_without_token_still_parses() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("mirror.lock");
        fs::write(
            &path,
            format!(r#"{{"pid":4242,"started_at":"{}"}}"#, Utc::now().to_rfc3339()),
        )
        .unwrap();

        assert!(matches!(
            RunLock::acquire(&path, STALE),
            Err(MirrorError::RunInProgress { pid: 4242, .. })
        ));
    }

    #[test]
    fn test_takeover_loses_to_a_fresher_lock() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("mirror.lock");

        // observed stale, but another process replaced it before our rename
        let stale = foreign(30);
        let observed = Observed {
            raw: Some(serde_json::to_string(&stale).unwrap()),
            holder: Some(stale),
            age: Duration::from_secs(30 * 3600),
        };
        let winner = serde_json::to_string(&LockInfo {
            token: "winner".to_string(),
            ..foreign(0)
        })
        .unwrap();
        fs::write(&path, &winner).unwrap();

        match RunLock::take_over(&path, &observed) {
            Err(MirrorError::RunInProgress { pid, .. }) => assert_eq!(pid, 999_999),
            other => panic!("expected RunInProgress, got {:?}", other),
        }
        assert_eq!(fs::read_to_string(&path).unwrap(), winner);
        assert_eq!(lock_files(temp.path()), vec!["mirror.lock"]);
    }

    #[test]
    fn test_takeover_when_lock_already_gone() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("mirror.lock");
        let observed = Observed {
            raw: Some("garbage".to_string()),
            holder: None,
            age: Duration::from_secs(30 * 3600),
        };

        assert!(RunLock::take_over(&path, &observed).is_ok());
        assert!(lock_files(temp.path()).is_empty());
    }

    #[test]
    fn test_drop_leaves_foreign_lock_alone() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("mirror.lock");

        let lock = RunLock::acquire(&path, STALE).unwrap();
        let replacement = serde_json::to_string(&foreign(0)).unwrap();
        fs::write(&path, &replacement).unwrap();

        drop(lock);
        assert_eq!(fs::read_to_string(&path).unwrap(), replacement);
    }

    #[test]
    fn test_unparsable_fresh_lock_blocks() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("nested/mirror.lock");
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(&path, "garbage").unwrap();

        assert!(matches!(
            RunLock::acquire(&path, STALE),
            Err(MirrorError::RunInProgress { pid: 0, .. })
        ));
    }
}
