//! Advisory lock markers beside a target path.
//!
//! A conversion claims a file by creating `<path>.lock` next to it and
//! removes the marker when done, on every exit path. A second claimant that
//! finds a fresh marker is told the path is busy.
//!
//! ## Staleness
//!
//! A marker whose modification time is older than the staleness threshold
//! (five minutes by default, `[locks] stale_after_secs`) is treated as
//! abandoned by a crashed run: it is deleted and recreated. A marker with a
//! modification time in the future counts as fresh.
//!
//! ## Atomicity
//!
//! Inspection, creation and removal of markers all run inside one
//! process-wide critical section, so two threads can never both observe
//! "no marker" for the same path. Creation uses `create_new`, so a second
//! process racing on the same path loses at the filesystem level rather than
//! silently sharing the marker. Between processes this is still advisory:
//! the stale-reclaim step can race with another process doing the same.
//!
//! The marker holds a `pid=<pid>` line for humans. Nothing reads it.

use std::fs::{self, Metadata, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};
use std::time::{Duration, SystemTime};
use thiserror::Error;

/// Markers older than this are reclaimed.
pub const DEFAULT_STALE_AFTER: Duration = Duration::from_secs(5 * 60);

static MARKER_SECTION: Mutex<()> = Mutex::new(());

#[derive(Error, Debug)]
pub enum LockError {
    #[error("{} is locked by another process", .0.display())]
    Busy(PathBuf),
    #[error("lock marker {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

/// `<path>.lock`
pub fn marker_path(path: &Path) -> PathBuf {
    let mut marker = path.as_os_str().to_owned();
    marker.push(".lock");
    PathBuf::from(marker)
}

/// Creates and removes lock markers.
#[derive(Debug, Clone, Copy)]
pub struct LockCoordinator {
    stale_after: Duration,
}

impl Default for LockCoordinator {
    fn default() -> Self {
        Self::new(DEFAULT_STALE_AFTER)
    }
}

impl LockCoordinator {
    pub fn new(stale_after: Duration) -> Self {
        Self { stale_after }
    }

    pub fn stale_after(&self) -> Duration {
        self.stale_after
    }

    fn is_stale(&self, metadata: &Metadata) -> bool {
        metadata
            .modified()
            .ok()
            .and_then(|mtime| SystemTime::now().duration_since(mtime).ok())
            .is_some_and(|age| age >= self.stale_after)
    }

    /// Claim `path`. Fails with [`LockError::Busy`] without touching anything
    /// if a fresh marker exists.
    pub fn acquire(&self, path: &Path) -> Result<LockGuard<'_>, LockError> {
        let _section = MARKER_SECTION.lock().unwrap_or_else(PoisonError::into_inner);
        let marker = marker_path(path);
        let io_err = |source| LockError::Io {
            path: marker.clone(),
            source,
        };

        match fs::metadata(&marker) {
            Ok(meta) if !self.is_stale(&meta) => {
                return Err(LockError::Busy(path.to_path_buf()));
            }
            Ok(_) => {
                tracing::warn!(marker = %marker.display(), "reclaiming stale lock marker");
                if let Err(e) = fs::remove_file(&marker)
                    && e.kind() != io::ErrorKind::NotFound
                {
                    return Err(io_err(e));
                }
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => return Err(io_err(e)),
        }

        let mut file = match OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&marker)
        {
            Ok(file) => file,
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists => {
                return Err(LockError::Busy(path.to_path_buf()));
            }
            Err(e) => return Err(io_err(e)),
        };
        // Informational only; an empty marker still locks.
        let _ = writeln!(file, "pid={}", std::process::id());
        tracing::debug!(marker = %marker.display(), "lock acquired");

        Ok(LockGuard {
            coordinator: self,
            path: path.to_path_buf(),
            armed: true,
        })
    }

    /// Remove the marker for `path`. Returns `false` if the marker is still
    /// there afterwards. Never panics and never returns an error.
    pub fn release(&self, path: &Path) -> bool {
        let _section = MARKER_SECTION.lock().unwrap_or_else(PoisonError::into_inner);
        let marker = marker_path(path);
        if let Err(e) = fs::remove_file(&marker)
            && e.kind() != io::ErrorKind::NotFound
        {
            tracing::warn!(marker = %marker.display(), error = %e, "could not remove lock marker");
        }
        let removed = !marker.exists();
        if !removed {
            tracing::warn!(marker = %marker.display(), "lock marker still present after release");
        }
        removed
    }
}

/// Held claim on a path. Dropping it releases the marker.
#[must_use = "the lock is released as soon as the guard is dropped"]
pub struct LockGuard<'a> {
    coordinator: &'a LockCoordinator,
    path: PathBuf,
    armed: bool,
}

impl LockGuard<'_> {
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Release now and report whether the marker is gone.
    pub fn release(mut self) -> bool {
        self.armed = false;
        self.coordinator.release(&self.path)
    }
}

impl Drop for LockGuard<'_> {
    fn drop(&mut self) {
        if self.armed {
            self.coordinator.release(&self.path);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Barrier};
    use std::thread;
    use tempfile::TempDir;

    fn backdate(path: &Path, by: Duration) {
        let file = fs::File::options().write(true).open(path).unwrap();
        file.set_modified(SystemTime::now() - by).unwrap();
    }

    #[test]
    fn marker_sits_beside_target() {
        assert_eq!(
            marker_path(Path::new("/shots/a.0001.exr")),
            PathBuf::from("/shots/a.0001.exr.lock")
        );
    }

    #[test]
    fn acquire_creates_marker_and_release_removes_it() {
        let tmp = TempDir::new().unwrap();
        let target = tmp.path().join("a.png");
        let locks = LockCoordinator::default();

        let guard = locks.acquire(&target).unwrap();
        let marker = marker_path(&target);
        assert!(marker.exists());
        let payload = fs::read_to_string(&marker).unwrap();
        assert!(payload.starts_with("pid="));

        assert!(guard.release());
        assert!(!marker.exists());
    }

    #[test]
    fn fresh_marker_is_busy() {
        let tmp = TempDir::new().unwrap();
        let target = tmp.path().join("a.png");
        let locks = LockCoordinator::default();

        let _held = locks.acquire(&target).unwrap();
        assert!(matches!(locks.acquire(&target), Err(LockError::Busy(_))));
    }

    #[test]
    fn busy_does_not_touch_foreign_marker() {
        let tmp = TempDir::new().unwrap();
        let target = tmp.path().join("a.png");
        fs::write(marker_path(&target), "someone else").unwrap();

        let locks = LockCoordinator::default();
        assert!(matches!(locks.acquire(&target), Err(LockError::Busy(_))));
        assert_eq!(
            fs::read_to_string(marker_path(&target)).unwrap(),
            "someone else"
        );
    }

    #[test]
    fn stale_marker_is_reclaimed() {
        let tmp = TempDir::new().unwrap();
        let target = tmp.path().join("a.png");
        let marker = marker_path(&target);
        fs::write(&marker, "").unwrap();
        backdate(&marker, Duration::from_secs(301));

        let locks = LockCoordinator::default();
        let guard = locks.acquire(&target).unwrap();
        assert!(fs::read_to_string(&marker).unwrap().starts_with("pid="));
        drop(guard);
        assert!(!marker.exists());
    }

    #[test]
    fn marker_just_under_threshold_is_busy() {
        let tmp = TempDir::new().unwrap();
        let target = tmp.path().join("a.png");
        let marker = marker_path(&target);
        fs::write(&marker, "").unwrap();
        backdate(&marker, Duration::from_secs(240));

        let locks = LockCoordinator::default();
        assert!(matches!(locks.acquire(&target), Err(LockError::Busy(_))));
    }

    #[test]
    fn future_mtime_counts_as_fresh() {
        let tmp = TempDir::new().unwrap();
        let target = tmp.path().join("a.png");
        let marker = marker_path(&target);
        fs::write(&marker, "").unwrap();
        let file = fs::File::options().write(true).open(&marker).unwrap();
        file.set_modified(SystemTime::now() + Duration::from_secs(3600))
            .unwrap();

        let locks = LockCoordinator::default();
        assert!(matches!(locks.acquire(&target), Err(LockError::Busy(_))));
    }

    #[test]
    fn drop_releases() {
        let tmp = TempDir::new().unwrap();
        let target = tmp.path().join("a.png");
        let locks = LockCoordinator::default();
        {
            let _guard = locks.acquire(&target).unwrap();
        }
        assert!(!marker_path(&target).exists());
        assert!(locks.acquire(&target).is_ok());
    }

    #[test]
    fn release_without_marker_succeeds() {
        let tmp = TempDir::new().unwrap();
        let locks = LockCoordinator::default();
        assert!(locks.release(&tmp.path().join("never-locked.png")));
    }

    #[test]
    fn concurrent_acquire_has_one_winner() {
        let tmp = TempDir::new().unwrap();
        let target = Arc::new(tmp.path().join("contended.png"));
        let locks = Arc::new(LockCoordinator::default());
        let attempt = Arc::new(Barrier::new(8));
        let done = Arc::new(Barrier::new(8));

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let (target, locks) = (Arc::clone(&target), Arc::clone(&locks));
                let (attempt, done) = (Arc::clone(&attempt), Arc::clone(&done));
                thread::spawn(move || {
                    attempt.wait();
                    let result = locks.acquire(&target);
                    let won = result.is_ok();
                    // Hold every guard until all threads have tried.
                    done.wait();
                    drop(result);
                    won
                })
            })
            .collect();

        let winners = handles
            .into_iter()
            .map(|h| h.join().unwrap())
            .filter(|won| *won)
            .count();
        assert_eq!(winners, 1);
    }

    #[test]
    fn different_paths_lock_independently() {
        let tmp = TempDir::new().unwrap();
        let locks = LockCoordinator::default();
        let _a = locks.acquire(&tmp.path().join("a.png")).unwrap();
        let _b = locks.acquire(&tmp.path().join("b.png")).unwrap();
    }
}
