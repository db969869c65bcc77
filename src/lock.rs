use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::fs::{self, File, OpenOptions};
use std::path::{Path, PathBuf};
use tracing::warn;

/// How rollover is serialized across processes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LockMode {
    /// OS exclusive lock on the `.lock` sibling (flock on unix,
    /// LockFileEx byte-range lock on windows).
    #[default]
    #[serde(alias = "flock")]
    Exclusive,
    /// No OS lock at all. Threads sharing one writer are still serialized,
    /// but separate processes (or separate writers on the same file) are
    /// NOT: opt in only when a single writer owns the file.
    #[serde(rename = "none")]
    Disabled,
}

/// Serializes "decide, roll over, append" on one active file.
///
/// Holds a handle to `<active>.lock` and takes an exclusive, blocking OS
/// lock on it around each critical section. Interrupted waits are retried.
/// The lock file is only ever unlocked, never deleted: removing it would let
/// a concurrent acquirer lock a different inode.
///
/// Access is `&mut self`, so threads sharing a coordinator must already be
/// serialized by the owner (the writer keeps it behind its state mutex).
#[derive(Debug)]
pub struct LockCoordinator {
    path: PathBuf,
    mode: LockMode,
    file: Option<File>,
}

impl LockCoordinator {
    pub fn new(path: impl Into<PathBuf>, mode: LockMode) -> Self {
        let path = path.into();
        if mode == LockMode::Disabled || !sys::NATIVE {
            warn!(path = %path.display(), "rollover locking disabled; file is not safe to share between processes");
        }
        LockCoordinator { path, mode, file: None }
    }

    /// Coordinator for the `<active>.lock` sibling of an active file.
    pub fn for_active_file(active: &Path, mode: LockMode) -> Self {
        let mut name = active.file_name().map(|n| n.to_os_string()).unwrap_or_default();
        name.push(".lock");
        LockCoordinator::new(active.with_file_name(name), mode)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn mode(&self) -> LockMode {
        self.mode
    }

    /// Runs `critical` while holding the lock.
    ///
    /// The lock is released on every exit path, unwinding included (the
    /// held guard unlocks on drop).
    pub fn with_lock<T>(&mut self, critical: impl FnOnce() -> T) -> Result<T> {
        if self.mode == LockMode::Disabled {
            return Ok(critical());
        }

        let file = match self.file.take() {
            Some(file) => file,
            None => self.open()?,
        };
        let held = sys::lock_exclusive(file)
            .map_err(|source| Error::LockAcquisition { path: self.path.clone(), source })?;

        let out = critical();

        // on failure the handle is dropped, and closing it releases the lock
        if let Ok(file) = sys::unlock(held) {
            self.file = Some(file);
        }
        Ok(out)
    }

    fn open(&self) -> Result<File> {
        let lock_err = |source| Error::LockAcquisition { path: self.path.clone(), source };
        if let Some(dir) = self.path.parent().filter(|d| !d.as_os_str().is_empty()) {
            fs::create_dir_all(dir).map_err(lock_err)?;
        }
        OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&self.path)
            .map_err(lock_err)
    }
}

#[cfg(unix)]
mod sys {
    use nix::errno::Errno;
    use nix::fcntl::{Flock, FlockArg};
    use std::fs::File;
    use std::io;

    pub(super) const NATIVE: bool = true;

    /// Unlocks on drop.
    pub(super) struct Held(Flock<File>);

    pub(super) fn lock_exclusive(mut file: File) -> io::Result<Held> {
        loop {
            match Flock::lock(file, FlockArg::LockExclusive) {
                Ok(locked) => return Ok(Held(locked)),
                Err((f, Errno::EINTR)) => file = f,
                Err((_, errno)) => return Err(io::Error::from(errno)),
            }
        }
    }

    pub(super) fn unlock(held: Held) -> io::Result<File> {
        held.0.unlock().map_err(|(_, errno)| io::Error::from(errno))
    }
}

#[cfg(windows)]
mod sys {
    use fs2::FileExt;
    use std::fs::File;
    use std::io;

    pub(super) const NATIVE: bool = true;

    /// Windows releases the range when the handle closes, so dropping this
    /// during unwinding releases the lock too.
    pub(super) struct Held(File);

    pub(super) fn lock_exclusive(file: File) -> io::Result<Held> {
        loop {
            match FileExt::lock_exclusive(&file) {
                Ok(()) => return Ok(Held(file)),
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e),
            }
        }
    }

    pub(super) fn unlock(held: Held) -> io::Result<File> {
        FileExt::unlock(&held.0)?;
        Ok(held.0)
    }
}

// No exclusive-lock primitive: same interface, thread-safe only.
#[cfg(not(any(unix, windows)))]
mod sys {
    use std::fs::File;
    use std::io;

    pub(super) const NATIVE: bool = false;

    pub(super) struct Held(File);

    pub(super) fn lock_exclusive(file: File) -> io::Result<Held> {
        Ok(Held(file))
    }

    pub(super) fn unlock(held: Held) -> io::Result<File> {
        Ok(held.0)
    }
}
