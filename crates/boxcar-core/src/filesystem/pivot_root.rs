//! Secure root filesystem switching via `pivot_root(2)`.
//!
//! More secure than `chroot` because it actually changes the root mount
//! point rather than just the process's view of `/`, and lets the old root
//! be detached from the namespace entirely.

use std::path::Path;

use boxcar_common::constants::OLD_ROOT_DIR;
use boxcar_common::error::{BoxcarError, Result};

/// Makes `new_root` the process root and detaches the previous root.
///
/// Steps, each depending on the previous one:
/// 1. create `{new_root}/old_root`;
/// 2. `pivot_root(new_root, new_root/old_root)`;
/// 3. `chdir("/")`;
/// 4. lazily unmount `/old_root` (`MNT_DETACH`), since the calling process
///    may still reference the old root at this instant;
/// 5. remove the now empty `/old_root` directory.
///
/// `new_root` must be a mount point in a private mount namespace.
///
/// # Errors
///
/// Returns [`BoxcarError::PivotRootFailed`] if the pivot itself fails, and
/// [`BoxcarError::MountFailed`] if the old root cannot be detached. Failure
/// to remove the empty directory is logged and ignored.
#[cfg(target_os = "linux")]
pub fn pivot_root(new_root: &Path) -> Result<()> {
    use nix::mount::{MntFlags, umount2};
    use nix::unistd::chdir;

    let put_old = new_root.join(OLD_ROOT_DIR);
    std::fs::create_dir_all(&put_old).map_err(|e| BoxcarError::io(&put_old, e))?;

    tracing::info!(new_root = %new_root.display(), "performing pivot_root");
    nix::unistd::pivot_root(new_root, &put_old).map_err(|e| BoxcarError::PivotRootFailed {
        new_root: new_root.to_path_buf(),
        source: e.into(),
    })?;

    chdir("/").map_err(|e| BoxcarError::io("/", e.into()))?;

    let old_root = Path::new("/").join(OLD_ROOT_DIR);
    umount2(&old_root, MntFlags::MNT_DETACH).map_err(|e| BoxcarError::MountFailed {
        target: old_root.clone(),
        flags: "MNT_DETACH".into(),
        source: e.into(),
    })?;
    tracing::debug!(path = %old_root.display(), "old root detached");

    if let Err(error) = std::fs::remove_dir(&old_root) {
        tracing::warn!(path = %old_root.display(), %error, "could not remove old root directory");
    }
    Ok(())
}

/// Stub for non-Linux platforms.
///
/// # Errors
///
/// Always returns an error: `pivot_root(2)` requires Linux.
#[cfg(not(target_os = "linux"))]
pub fn pivot_root(_new_root: &Path) -> Result<()> {
    Err(BoxcarError::Unsupported {
        feature: "pivot_root",
    })
}
