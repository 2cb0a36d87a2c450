//! Per-image advisory locking.
//!
//! First-time extraction of an image is a check-then-act sequence on a
//! directory shared by every container of that image. Concurrent launches
//! serialise on an exclusive `flock(2)` held across that sequence.

use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};

use boxcar_common::error::{BoxcarError, Result};
use nix::fcntl::{Flock, FlockArg};

/// An exclusive lock on an image's lock file.
///
/// Released when dropped, or by the kernel when the process exits.
pub struct ImageLock {
    _guard: Flock<File>,
    path: PathBuf,
}

impl ImageLock {
    /// Blocks until an exclusive lock on `lock_path` is held, creating the
    /// file if needed.
    ///
    /// # Errors
    ///
    /// Returns an error if the lock file cannot be opened or locked.
    pub fn acquire(lock_path: &Path) -> Result<Self> {
        let file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(false)
            .open(lock_path)
            .map_err(|e| BoxcarError::io(lock_path, e))?;

        let guard = Flock::lock(file, FlockArg::LockExclusive)
            .map_err(|(_, errno)| BoxcarError::io(lock_path, errno.into()))?;

        tracing::debug!(lock_path = %lock_path.display(), "acquired image lock");
        Ok(Self {
            _guard: guard,
            path: lock_path.to_path_buf(),
        })
    }

    /// Returns the lock file path.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl std::fmt::Debug for ImageLock {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ImageLock").field("path", &self.path).finish_non_exhaustive()
    }
}

impl Drop for ImageLock {
    fn drop(&mut self) {
        tracing::debug!(lock_path = %self.path.display(), "released image lock");
    }
}
